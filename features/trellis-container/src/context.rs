use std::{
    cell::RefCell,
    collections::HashSet,
    sync::atomic::{AtomicU64, Ordering},
};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Per-request creation context, threaded explicitly through the `get` call
/// chain instead of living in thread-local state.
///
/// One context spans one logical request: a top-level `get` and every
/// recursive resolution it triggers. The set of names currently in creation
/// on this context is what detects construction cycles, for singleton and
/// prototype scope alike.
pub struct CreationContext {
    id: u64,
    in_creation: RefCell<HashSet<String>>,
}

impl CreationContext {
    pub fn new() -> Self {
        CreationContext {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            in_creation: RefCell::new(HashSet::new()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Mark a name as in creation on this request; false if already marked
    pub fn enter(&self, name: &str) -> bool {
        self.in_creation.borrow_mut().insert(name.to_string())
    }

    pub fn exit(&self, name: &str) {
        self.in_creation.borrow_mut().remove(name);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.in_creation.borrow().contains(name)
    }
}

impl Default for CreationContext {
    fn default() -> Self {
        Self::new()
    }
}

/// How a `get` request reached the orchestrator. Property-reference re-entry
/// may be served an early reference; direct construction recursion may not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOrigin {
    Direct,
    Reference,
}
