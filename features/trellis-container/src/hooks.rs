use std::{collections::HashMap, sync::Arc};

use trellis_convert::{
    descriptor::TypeDescriptor,
    value::{DynError, ObjectHandle, Value},
};

use crate::{
    definition::{Definition, ResolvedDefinition},
    errors::DefinitionError,
};

/// Where the container looks definitions up. Implemented by
/// [`DefinitionRegistry`] and by anything that loads definitions from
/// elsewhere.
pub trait DefinitionSource: Send + Sync {
    /// The definition registered under a canonical name
    fn lookup(&self, name: &str) -> Option<Arc<Definition>>;

    /// Follow the alias chain from `name` to the canonical name. Names with
    /// no alias resolve to themselves.
    fn resolve_alias(&self, name: &str) -> String;

    fn definition_names(&self) -> Vec<String>;
}

/// In-memory definition store with alias support
#[derive(Default)]
pub struct DefinitionRegistry {
    definitions: HashMap<String, Arc<Definition>>,
    aliases: HashMap<String, String>,
}

impl DefinitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        definition: Definition,
    ) -> Result<(), DefinitionError> {
        let name = name.into();
        if self.definitions.contains_key(&name) {
            return Err(DefinitionError::Duplicate(name));
        }
        self.definitions.insert(name, Arc::new(definition));
        Ok(())
    }

    /// Register `alias` as another name for `name`. An alias equal to its
    /// target is dropped silently; an alias that would close a chain back on
    /// itself is refused.
    pub fn register_alias(
        &mut self,
        alias: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<(), DefinitionError> {
        let alias = alias.into();
        let name = name.into();
        if alias == name {
            self.aliases.remove(&alias);
            return Ok(());
        }
        if self.canonical(&name) == alias {
            return Err(DefinitionError::AliasCycle { name, alias });
        }
        self.aliases.insert(alias, name);
        Ok(())
    }

    pub fn aliases(&self) -> impl Iterator<Item = (&str, &str)> {
        self.aliases
            .iter()
            .map(|(alias, name)| (alias.as_str(), name.as_str()))
    }

    fn canonical(&self, name: &str) -> String {
        let mut canonical = name;
        while let Some(next) = self.aliases.get(canonical) {
            canonical = next;
        }
        canonical.to_string()
    }
}

impl DefinitionSource for DefinitionRegistry {
    fn lookup(&self, name: &str) -> Option<Arc<Definition>> {
        self.definitions.get(&self.canonical(name)).cloned()
    }

    fn resolve_alias(&self, name: &str) -> String {
        self.canonical(name)
    }

    fn definition_names(&self) -> Vec<String> {
        self.definitions.keys().cloned().collect()
    }
}

/// How raw objects come into existence from a resolved definition and its
/// already-resolved constructor arguments
pub trait InstantiationStrategy: Send + Sync {
    fn instantiate(
        &self,
        definition: &ResolvedDefinition,
        descriptor: &TypeDescriptor,
        args: &[Value],
    ) -> Result<ObjectHandle, DynError>;
}

/// Default strategy: a named factory when the definition selects one, the
/// registered no-arg constructor otherwise
pub struct SimpleInstantiationStrategy;

impl InstantiationStrategy for SimpleInstantiationStrategy {
    fn instantiate(
        &self,
        definition: &ResolvedDefinition,
        descriptor: &TypeDescriptor,
        args: &[Value],
    ) -> Result<ObjectHandle, DynError> {
        if let Some(factory_name) = &definition.factory {
            let factory = descriptor.factory(factory_name).ok_or_else(|| {
                format!(
                    "type '{}' has no factory named '{factory_name}'",
                    descriptor.info.type_name
                )
            })?;
            return factory(args);
        }
        if !args.is_empty() {
            return Err(format!(
                "definition '{}' declares constructor arguments but selects no factory",
                definition.name
            )
            .into());
        }
        descriptor.construct().ok_or_else(|| {
            format!(
                "type '{}' has no registered constructor",
                descriptor.info.type_name
            )
            .into()
        })
    }
}

/// Whether the pipeline keeps running hooks for the current stage
pub enum HookFlow {
    /// Proceed with this object (possibly a replacement)
    Continue(ObjectHandle),
    /// Use this object and skip the remaining hooks of the stage
    Stop(ObjectHandle),
}

impl HookFlow {
    pub fn into_object(self) -> ObjectHandle {
        match self {
            HookFlow::Continue(object) | HookFlow::Stop(object) => object,
        }
    }
}

/// Interception points around the creation pipeline. All methods default to
/// pass-through.
pub trait LifecycleHook: Send + Sync {
    /// Inspect a freshly merged definition, once per resolved definition
    fn on_merged_definition(&self, _definition: &ResolvedDefinition) {}

    /// Runs after wiring, before the init callback. May replace the object.
    fn before_init(&self, _name: &str, object: ObjectHandle) -> Result<HookFlow, DynError> {
        Ok(HookFlow::Continue(object))
    }

    /// Runs after the init callback. May replace the object.
    fn after_init(&self, _name: &str, object: ObjectHandle) -> Result<HookFlow, DynError> {
        Ok(HookFlow::Continue(object))
    }
}
