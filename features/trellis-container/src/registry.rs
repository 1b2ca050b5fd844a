use std::{
    collections::{HashMap, HashSet},
    sync::{Condvar, Mutex},
};

use trellis_convert::value::{DynError, ObjectHandle};

use crate::{
    context::CreationContext,
    errors::{RegistryError, ResolveError},
};

type EarlyFactory = Box<dyn FnOnce() -> ObjectHandle + Send>;
type DestroyFn = Box<dyn FnOnce() -> Result<(), DynError> + Send>;

/// The concurrency-safe cache of fully and partially constructed singletons.
///
/// Three occupancy tiers per name: complete objects, early instances (handed
/// out to break cycles), and early factories (not yet consumed). A name moves
/// absent → early → complete and never regresses; failed creation evicts
/// every tier so a retry starts from scratch.
#[derive(Default)]
pub struct SingletonRegistry {
    state: Mutex<RegistryState>,
    settled: Condvar,
}

#[derive(Default)]
struct RegistryState {
    complete: HashMap<String, ObjectHandle>,
    early_instances: HashMap<String, ObjectHandle>,
    early_factories: HashMap<String, EarlyFactory>,
    /// Names in registration order, for destruction-order inversion
    registration_order: Vec<String>,
    /// Name → id of the creation context currently constructing it
    in_creation: HashMap<String, u64>,
    in_destruction: bool,
    /// Errors swallowed while a name was being created, reported as related
    /// causes on the eventual creation failure
    suppressed: HashMap<String, Vec<String>>,
    /// Name → names that depend on it
    dependents: HashMap<String, HashSet<String>>,
    /// Name → names it depends on
    dependencies: HashMap<String, HashSet<String>>,
    destroy_callbacks: HashMap<String, DestroyFn>,
}

impl RegistryState {
    fn record_registration(&mut self, name: &str) {
        if !self.registration_order.iter().any(|n| n == name) {
            self.registration_order.push(name.to_string());
        }
    }

    fn evict(&mut self, name: &str) {
        self.complete.remove(name);
        self.early_instances.remove(name);
        self.early_factories.remove(name);
        self.registration_order.retain(|n| n != name);
    }
}

impl SingletonRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the complete object for `name`, creating it via `factory` if
    /// necessary. The factory runs at most once system-wide per name: a
    /// caller arriving while another context is constructing the same name
    /// blocks until that construction settles, then re-checks.
    ///
    /// Re-entry from the constructing context itself is a circular-creation
    /// error; construction requested mid-teardown is refused.
    pub fn get_or_create(
        &self,
        name: &str,
        ctx: &CreationContext,
        factory: impl FnOnce() -> Result<ObjectHandle, ResolveError>,
    ) -> Result<ObjectHandle, ResolveError> {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(object) = state.complete.get(name) {
                return Ok(object.clone());
            }
            if state.in_destruction {
                return Err(RegistryError::NotAllowed(name.to_string()).into());
            }
            match state.in_creation.get(name) {
                Some(&creator) if creator == ctx.id() => {
                    return Err(RegistryError::CircularCreation(name.to_string()).into());
                }
                Some(_) => {
                    // Another context is constructing this name; wait for it
                    // to settle and re-check.
                    state = self.settled.wait(state).unwrap();
                }
                None => break,
            }
        }

        tracing::debug!(name, "creating shared instance of singleton");
        state.in_creation.insert(name.to_string(), ctx.id());
        state.suppressed.insert(name.to_string(), Vec::new());
        drop(state);

        // The factory runs outside the state lock so construction of other
        // names can proceed; the in-creation marker is what serializes this
        // name.
        let result = factory();

        let mut state = self.state.lock().unwrap();
        state.in_creation.remove(name);
        let suppressed = state.suppressed.remove(name).unwrap_or_default();

        let outcome = match result {
            Ok(object) => {
                state.complete.insert(name.to_string(), object.clone());
                state.early_instances.remove(name);
                state.early_factories.remove(name);
                state.record_registration(name);
                Ok(object)
            }
            Err(error) => {
                // The factory may have registered the instance itself
                // mid-creation; if the object appeared anyway, proceed with it.
                if let Some(object) = state.complete.get(name) {
                    tracing::debug!(name, "singleton appeared during failed factory run");
                    Ok(object.clone())
                } else {
                    state.evict(name);
                    Err(attach_suppressed(error, suppressed))
                }
            }
        };

        self.settled.notify_all();
        outcome
    }

    pub fn get_complete(&self, name: &str) -> Option<ObjectHandle> {
        self.state.lock().unwrap().complete.get(name).cloned()
    }

    /// Resolve an early reference for a name mid-construction: an already
    /// materialized early instance, else the registered early factory
    /// (promoted to an early instance exactly once).
    pub fn get_early(&self, name: &str) -> Option<ObjectHandle> {
        let mut state = self.state.lock().unwrap();
        if let Some(object) = state.complete.get(name) {
            return Some(object.clone());
        }
        if let Some(object) = state.early_instances.get(name) {
            return Some(object.clone());
        }
        let factory = state.early_factories.remove(name)?;
        let object = factory();
        state
            .early_instances
            .insert(name.to_string(), object.clone());
        Some(object)
    }

    /// The early instance for a name, if one was actually handed out
    pub fn consumed_early_instance(&self, name: &str) -> Option<ObjectHandle> {
        self.state.lock().unwrap().early_instances.get(name).cloned()
    }

    /// Register the factory producing an early reference for a name whose
    /// construction is underway. Ignored once the complete object exists.
    pub fn register_early_factory(&self, name: &str, factory: EarlyFactory) {
        let mut state = self.state.lock().unwrap();
        if !state.complete.contains_key(name) {
            state.early_factories.insert(name.to_string(), factory);
            state.early_instances.remove(name);
            state.record_registration(name);
        }
    }

    /// Register an externally constructed singleton under a name
    pub fn register_singleton(&self, name: &str, object: ObjectHandle) -> Result<(), RegistryError> {
        let mut state = self.state.lock().unwrap();
        if state.complete.contains_key(name) || state.early_instances.contains_key(name) {
            return Err(RegistryError::AlreadyRegistered(name.to_string()));
        }
        state.complete.insert(name.to_string(), object);
        state.record_registration(name);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.state.lock().unwrap().complete.contains_key(name)
    }

    pub fn is_in_creation(&self, name: &str) -> bool {
        self.state.lock().unwrap().in_creation.contains_key(name)
    }

    pub fn singleton_names(&self) -> Vec<String> {
        self.state.lock().unwrap().registration_order.clone()
    }

    /// Record an error swallowed while `name` was being created
    pub fn suppress(&self, name: &str, message: String) {
        let mut state = self.state.lock().unwrap();
        if let Some(suppressed) = state.suppressed.get_mut(name) {
            suppressed.push(message);
        }
    }

    /// Record "dependent depends on name", for destroy-order inversion and
    /// depends-on cycle rejection
    pub fn register_dependent(&self, name: &str, dependent: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .dependents
            .entry(name.to_string())
            .or_default()
            .insert(dependent.to_string());
        state
            .dependencies
            .entry(dependent.to_string())
            .or_default()
            .insert(name.to_string());
    }

    /// Whether `dependent` is registered as depending on `name`, directly or
    /// through transitive dependents
    pub fn is_dependent(&self, name: &str, dependent: &str) -> bool {
        let state = self.state.lock().unwrap();
        let mut seen = HashSet::new();
        return walk(&state, name, dependent, &mut seen);

        fn walk<'a>(
            state: &'a RegistryState,
            name: &'a str,
            dependent: &str,
            seen: &mut HashSet<&'a str>,
        ) -> bool {
            if !seen.insert(name) {
                return false;
            }
            let Some(dependents) = state.dependents.get(name) else {
                return false;
            };
            if dependents.contains(dependent) {
                return true;
            }
            dependents
                .iter()
                .any(|transitive| walk(state, transitive, dependent, seen))
        }
    }

    pub fn register_destruction(&self, name: &str, callback: DestroyFn) {
        self.state
            .lock()
            .unwrap()
            .destroy_callbacks
            .insert(name.to_string(), callback);
    }

    /// Destroy every registered singleton, dependents before their
    /// dependencies, in reverse registration order. Callback failures are
    /// collected and logged, never propagated, so destruction always visits
    /// every name.
    pub fn destroy_singletons(&self) -> Vec<(String, DynError)> {
        {
            self.state.lock().unwrap().in_destruction = true;
        }

        let names: Vec<String> = {
            let state = self.state.lock().unwrap();
            state.registration_order.iter().rev().cloned().collect()
        };

        let mut failures = Vec::new();
        for name in &names {
            self.destroy_one(name, &mut failures);
        }

        let mut state = self.state.lock().unwrap();
        state.complete.clear();
        state.early_instances.clear();
        state.early_factories.clear();
        state.registration_order.clear();
        state.dependents.clear();
        state.dependencies.clear();
        state.in_destruction = false;
        drop(state);
        self.settled.notify_all();

        failures
    }

    /// Remove every cache tier for a name and run its destruction callback,
    /// destroying registered dependents first
    pub fn destroy_singleton(&self, name: &str) -> Vec<(String, DynError)> {
        let mut failures = Vec::new();
        self.destroy_one(name, &mut failures);
        failures
    }

    fn destroy_one(&self, name: &str, failures: &mut Vec<(String, DynError)>) {
        let dependents: Vec<String> = {
            let mut state = self.state.lock().unwrap();
            state
                .dependents
                .remove(name)
                .map(|set| set.into_iter().collect())
                .unwrap_or_default()
        };
        for dependent in dependents {
            self.destroy_one(&dependent, failures);
        }

        let callback = {
            let mut state = self.state.lock().unwrap();
            state.evict(name);
            state.destroy_callbacks.remove(name)
        };
        if let Some(callback) = callback {
            tracing::debug!(name, "destroying singleton");
            if let Err(error) = callback() {
                tracing::warn!(name, %error, "destruction callback failed");
                failures.push((name.to_string(), error));
            }
        }
    }
}

fn attach_suppressed(error: ResolveError, suppressed: Vec<String>) -> ResolveError {
    match error {
        ResolveError::Creation(mut creation) if !suppressed.is_empty() => {
            creation.suppressed.extend(suppressed);
            ResolveError::Creation(creation)
        }
        other => other,
    }
}
