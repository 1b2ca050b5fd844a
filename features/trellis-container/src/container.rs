use std::{
    any::TypeId,
    collections::HashMap,
    sync::{Arc, Mutex},
};

use trellis_convert::{
    convert::{convert_if_necessary, Converter, ConverterRegistry},
    descriptor::{ParseFn, TypeDescriptor},
    errors::PropertyError,
    suggest::closest_matches,
    value::{DynError, ObjectHandle, TypeInfo, Value},
};

use crate::{
    context::{CreationContext, RequestOrigin},
    definition::{Definition, PropertyValue, ResolvedDefinition, Scope},
    errors::{CreationError, CreationPhase, DefinitionError, RegistryError, ResolveError},
    hooks::{
        DefinitionRegistry, DefinitionSource, HookFlow, InstantiationStrategy, LifecycleHook,
        SimpleInstantiationStrategy,
    },
    merge,
    registry::SingletonRegistry,
};

const SUGGESTION_DISTANCE: usize = 2;

/// The container proper: definitions in, fully wired objects out.
///
/// Cheap to clone and share; all clones address the same caches.
#[derive(Clone)]
pub struct Container(pub Arc<ContainerInner>);

pub struct ContainerInner {
    source: Box<dyn DefinitionSource>,
    descriptors_by_name: HashMap<String, Arc<TypeDescriptor>>,
    descriptors_by_type: HashMap<TypeId, Arc<TypeDescriptor>>,
    converters: ConverterRegistry,
    hooks: Vec<Arc<dyn LifecycleHook>>,
    strategy: Arc<dyn InstantiationStrategy>,
    allow_circular: bool,
    registry: SingletonRegistry,
    /// Definitions flattened against their parent chain, cached per name.
    /// An entry is evicted when creating from it fails, so a retry starts
    /// from a fresh merge.
    merged: Mutex<HashMap<String, Arc<ResolvedDefinition>>>,
}

impl Container {
    pub fn builder() -> ContainerBuilder {
        ContainerBuilder::default()
    }

    /// Resolve a name to its fully constructed, wired and initialized object
    pub fn get(&self, name: &str) -> Result<ObjectHandle, ResolveError> {
        let ctx = CreationContext::new();
        self.resolve(name, &ctx, RequestOrigin::Direct)
    }

    /// [`Container::get`] plus a checked downcast to the requested type
    pub fn get_as<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>, ResolveError> {
        let object = self.get(name)?;
        object
            .downcast::<T>()
            .map_err(|actual_type| ResolveError::Downcast {
                name: name.to_string(),
                required_type: std::any::type_name::<T>(),
                actual_type,
            })
    }

    /// Whether a definition (under any alias) or a manually registered
    /// singleton answers to this name
    pub fn contains(&self, name: &str) -> bool {
        let canonical = self.0.source.resolve_alias(name);
        self.0.source.lookup(&canonical).is_some() || self.0.registry.contains(&canonical)
    }

    pub fn definition_names(&self) -> Vec<String> {
        self.0.source.definition_names()
    }

    pub fn singleton_names(&self) -> Vec<String> {
        self.0.registry.singleton_names()
    }

    /// Register an externally constructed object as a completed singleton
    pub fn register_singleton(
        &self,
        name: &str,
        object: ObjectHandle,
    ) -> Result<(), RegistryError> {
        self.0.registry.register_singleton(name, object)
    }

    /// Eagerly construct every non-lazy, non-abstract singleton definition.
    /// Stops at the first failure.
    pub fn preinstantiate_singletons(&self) -> Result<(), ResolveError> {
        let mut names = self.0.source.definition_names();
        names.sort();
        for name in names {
            let merged = self.merged_definition(&name)?;
            if merged.is_abstract || merged.lazy_init || !merged.scope.is_singleton() {
                continue;
            }
            tracing::debug!(%name, "pre-instantiating singleton");
            self.resolve(&name, &CreationContext::new(), RequestOrigin::Direct)?;
        }
        Ok(())
    }

    /// Tear down all singletons, dependents before dependencies. Callback
    /// failures are returned, not propagated.
    pub fn destroy_singletons(&self) -> Vec<(String, DynError)> {
        self.0.registry.destroy_singletons()
    }

    fn resolve(
        &self,
        name: &str,
        ctx: &CreationContext,
        origin: RequestOrigin,
    ) -> Result<ObjectHandle, ResolveError> {
        let name = self.0.source.resolve_alias(name);

        if let Some(object) = self.0.registry.get_complete(&name) {
            return Ok(object);
        }
        // A request arriving through a property reference while the target is
        // mid-construction may be served the early, not-yet-wired reference.
        // That is what breaks wiring cycles.
        if origin == RequestOrigin::Reference
            && self.0.allow_circular
            && self.0.registry.is_in_creation(&name)
        {
            if let Some(object) = self.0.registry.get_early(&name) {
                tracing::debug!(
                    %name,
                    "returning eagerly cached instance that is not fully initialized yet"
                );
                return Ok(object);
            }
        }

        let merged = self.merged_definition(&name)?;
        if merged.is_abstract {
            return Err(DefinitionError::Abstract(name).into());
        }

        match &merged.scope {
            Scope::Singleton => {
                let result = self.0.registry.get_or_create(&name, ctx, || {
                    self.create(&name, &merged, ctx, true)
                });
                if result.is_err() {
                    self.0.merged.lock().unwrap().remove(&name);
                }
                result
            }
            Scope::Prototype => {
                if !ctx.enter(&name) {
                    return Err(RegistryError::CircularCreation(name).into());
                }
                let result = self.create(&name, &merged, ctx, false);
                ctx.exit(&name);
                result
            }
            Scope::Custom(scope) => Err(ResolveError::UnsupportedScope {
                name,
                scope: scope.clone(),
            }),
        }
    }

    /// The full creation pipeline for one object: depends-on, instantiation,
    /// early exposure, property population, initialization, commit checks.
    fn create(
        &self,
        name: &str,
        merged: &Arc<ResolvedDefinition>,
        ctx: &CreationContext,
        as_singleton: bool,
    ) -> Result<ObjectHandle, ResolveError> {
        for dependency in &merged.depends_on {
            let dependency = self.0.source.resolve_alias(dependency);
            if self.0.registry.is_dependent(name, &dependency) {
                return Err(CreationError::new(
                    name,
                    CreationPhase::DependsOn,
                    format!("circular depends-on relationship with '{dependency}'"),
                )
                .into());
            }
            self.0.registry.register_dependent(&dependency, name);
            self.resolve(&dependency, ctx, RequestOrigin::Direct)
                .map_err(|error| CreationError::new(name, CreationPhase::DependsOn, error))?;
        }

        let descriptor = self
            .descriptor_for(merged)
            .map_err(|error| CreationError::new(name, CreationPhase::Instantiation, error))?;

        let mut args = Vec::with_capacity(merged.constructor_args.len());
        for (index, value) in merged.constructor_args.iter() {
            // Constructor arguments cannot be satisfied with early
            // references; a cycle through them is unresolvable.
            let resolved = self
                .resolve_value(&format!("arg[{index}]"), value, ctx, merged)
                .map_err(|error| {
                    CreationError::new(name, CreationPhase::Instantiation, error)
                })?;
            args.push(resolved);
        }

        let object = self
            .0
            .strategy
            .instantiate(merged, &descriptor, &args)
            .map_err(|error| CreationError::new(name, CreationPhase::Instantiation, error))?;

        if as_singleton && self.0.allow_circular && self.0.registry.is_in_creation(name) {
            tracing::debug!(
                name,
                "eagerly exposing singleton to allow resolving circular references"
            );
            let early = object.clone();
            self.0
                .registry
                .register_early_factory(name, Box::new(move || early));
        }

        self.apply_properties(name, merged, &descriptor, &object, ctx)
            .map_err(|error| CreationError::new(name, CreationPhase::Properties, error))?;

        let object = self
            .initialize(name, merged, &descriptor, object)
            .map_err(|error| CreationError::new(name, CreationPhase::Initialization, error))?;

        if as_singleton {
            if let Some(early) = self.0.registry.consumed_early_instance(name) {
                // Other objects already hold the early reference. If a hook
                // swapped the object since, those references are stale and
                // the result cannot be committed.
                if !early.same_instance(&object) {
                    return Err(CreationError::new(
                        name,
                        CreationPhase::Commit,
                        "object was replaced after its early reference had been handed out",
                    )
                    .into());
                }
            }
            self.register_destruction(name, merged, &descriptor, &object)
                .map_err(|error| CreationError::new(name, CreationPhase::Commit, error))?;
        }

        Ok(object)
    }

    fn descriptor_for(
        &self,
        merged: &ResolvedDefinition,
    ) -> Result<Arc<TypeDescriptor>, DynError> {
        let type_name = merged
            .type_name
            .as_deref()
            .ok_or_else(|| format!("definition '{}' declares no type", merged.name))?;
        self.0
            .descriptors_by_name
            .get(type_name)
            .cloned()
            .ok_or_else(|| format!("no type registered under the name '{type_name}'").into())
    }

    fn apply_properties(
        &self,
        name: &str,
        merged: &Arc<ResolvedDefinition>,
        descriptor: &TypeDescriptor,
        object: &ObjectHandle,
        ctx: &CreationContext,
    ) -> Result<(), ResolveError> {
        for assignment in &merged.properties {
            let Some(property) = descriptor.property(&assignment.name) else {
                if assignment.optional {
                    tracing::debug!(
                        name,
                        property = %assignment.name,
                        "skipping optional assignment to unknown property"
                    );
                    continue;
                }
                return Err(PropertyError::NotWritable {
                    property: assignment.name.clone(),
                    type_name: descriptor.info.type_name,
                    suggestions: closest_matches(
                        &assignment.name,
                        descriptor.writable_properties(),
                        SUGGESTION_DISTANCE,
                    ),
                }
                .into());
            };

            let converted = match assignment.converted() {
                Some(cached) => cached.clone(),
                None => {
                    let raw = match self.resolve_value(&assignment.name, &assignment.value, ctx, merged)
                    {
                        Ok(raw) => raw,
                        Err(error) if assignment.optional => {
                            tracing::debug!(
                                name,
                                property = %assignment.name,
                                %error,
                                "skipping optional assignment that failed to resolve"
                            );
                            self.0.registry.suppress(name, error.to_string());
                            continue;
                        }
                        Err(error) => return Err(error),
                    };
                    let converted = convert_if_necessary(
                        raw,
                        property.value_type,
                        &assignment.name,
                        &self.0.converters,
                        self.parse_for(property.value_type),
                    )?;
                    // Values that resolve to themselves every time keep their
                    // converted form; references and inner definitions are
                    // re-resolved per instance.
                    if assignment.value.is_cacheable() {
                        assignment.cache_converted(converted.clone());
                    }
                    converted
                }
            };

            property.set(object.as_any(), converted).map_err(ResolveError::from)?;
        }
        Ok(())
    }

    /// Resolve a declared value to a runtime [`Value`], constructing
    /// referenced and nested objects as needed
    fn resolve_value(
        &self,
        property: &str,
        value: &PropertyValue,
        ctx: &CreationContext,
        containing: &ResolvedDefinition,
    ) -> Result<Value, ResolveError> {
        match value {
            PropertyValue::Literal(value) => Ok(value.clone()),
            PropertyValue::TypedString { value, target_type } => match target_type {
                Some(target) => Ok(convert_if_necessary(
                    Value::Str(value.clone()),
                    *target,
                    property,
                    &self.0.converters,
                    self.parse_for(*target),
                )?),
                None => Ok(Value::Str(value.clone())),
            },
            PropertyValue::Reference(target) => {
                let object = self.resolve(target, ctx, RequestOrigin::Reference)?;
                Ok(Value::Object(object))
            }
            PropertyValue::Inner(definition) => {
                let inner_name = format!("(inner of '{}')", containing.name);
                let merged = Arc::new(merge::merge(
                    self.0.source.as_ref(),
                    &inner_name,
                    definition,
                    Some(containing),
                )?);
                // Nested objects live and die with their containing object
                // and never enter the singleton caches.
                let object = self.create(&inner_name, &merged, ctx, false)?;
                Ok(Value::Object(object))
            }
        }
    }

    fn initialize(
        &self,
        name: &str,
        merged: &ResolvedDefinition,
        descriptor: &TypeDescriptor,
        object: ObjectHandle,
    ) -> Result<ObjectHandle, DynError> {
        if let Some(on_name) = descriptor.on_name() {
            on_name(object.as_any(), name);
        }
        if let Some(on_context) = descriptor.on_context() {
            on_context(object.as_any(), &ObjectHandle::new(self.clone()));
        }

        let mut object = object;
        for hook in &self.0.hooks {
            match hook.before_init(name, object)? {
                HookFlow::Continue(replacement) => object = replacement,
                HookFlow::Stop(replacement) => {
                    object = replacement;
                    break;
                }
            }
        }

        match &merged.init_callback {
            Some(callback_name) => {
                let callback = descriptor.callback(callback_name).ok_or_else(|| {
                    format!(
                        "type '{}' has no callback named '{callback_name}'",
                        descriptor.info.type_name
                    )
                })?;
                tracing::debug!(name, callback = %callback_name, "invoking init callback");
                callback(object.as_any())?;
            }
            None => {
                if let Some(after_wired) = descriptor.after_wired() {
                    after_wired(object.as_any())?;
                }
            }
        }

        for hook in &self.0.hooks {
            match hook.after_init(name, object)? {
                HookFlow::Continue(replacement) => object = replacement,
                HookFlow::Stop(replacement) => {
                    object = replacement;
                    break;
                }
            }
        }
        Ok(object)
    }

    fn register_destruction(
        &self,
        name: &str,
        merged: &ResolvedDefinition,
        descriptor: &TypeDescriptor,
        object: &ObjectHandle,
    ) -> Result<(), DynError> {
        let Some(callback_name) = &merged.destroy_callback else {
            return Ok(());
        };
        let callback = descriptor.callback(callback_name).cloned().ok_or_else(|| {
            format!(
                "type '{}' has no callback named '{callback_name}'",
                descriptor.info.type_name
            )
        })?;
        let handle = object.clone();
        self.0
            .registry
            .register_destruction(name, Box::new(move || callback(handle.as_any())));
        Ok(())
    }

    fn merged_definition(&self, name: &str) -> Result<Arc<ResolvedDefinition>, ResolveError> {
        if let Some(merged) = self.0.merged.lock().unwrap().get(name) {
            return Ok(merged.clone());
        }

        let definition = self
            .0
            .source
            .lookup(name)
            .ok_or_else(|| DefinitionError::NotFound(name.to_string()))?;
        let merged = Arc::new(merge::merge(
            self.0.source.as_ref(),
            name,
            &definition,
            None,
        )?);
        let merged = self
            .0
            .merged
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_insert(merged)
            .clone();

        // Inspection hooks see each resolved definition exactly once, even
        // when two requests race to merge it.
        if merged.mark_inspected() {
            for hook in &self.0.hooks {
                hook.on_merged_definition(&merged);
            }
        }
        Ok(merged)
    }

    fn parse_for(&self, target: TypeInfo) -> Option<&ParseFn> {
        self.0
            .descriptors_by_type
            .get(&target.type_id)
            .and_then(|descriptor| descriptor.parse())
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("definitions", &self.0.source.definition_names().len())
            .field("singletons", &self.0.registry.singleton_names())
            .finish()
    }
}

/// Fluent, consuming builder for [`Container`]
pub struct ContainerBuilder {
    definitions: Vec<(String, Definition)>,
    aliases: Vec<(String, String)>,
    descriptors_by_name: HashMap<String, Arc<TypeDescriptor>>,
    converters: ConverterRegistry,
    hooks: Vec<Arc<dyn LifecycleHook>>,
    strategy: Arc<dyn InstantiationStrategy>,
    allow_circular: bool,
}

impl Default for ContainerBuilder {
    fn default() -> Self {
        ContainerBuilder {
            definitions: Vec::new(),
            aliases: Vec::new(),
            descriptors_by_name: HashMap::new(),
            converters: ConverterRegistry::new(),
            hooks: Vec::new(),
            strategy: Arc::new(SimpleInstantiationStrategy),
            allow_circular: true,
        }
    }
}

impl ContainerBuilder {
    pub fn definition(mut self, name: impl Into<String>, definition: Definition) -> Self {
        self.definitions.push((name.into(), definition));
        self
    }

    pub fn alias(mut self, alias: impl Into<String>, name: impl Into<String>) -> Self {
        self.aliases.push((alias.into(), name.into()));
        self
    }

    /// Register a managed type's descriptor under the name definitions use
    /// to refer to it
    pub fn register_type(
        mut self,
        name: impl Into<String>,
        descriptor: Arc<TypeDescriptor>,
    ) -> Self {
        self.descriptors_by_name.insert(name.into(), descriptor);
        self
    }

    pub fn converter(mut self, target: TypeInfo, converter: Arc<dyn Converter>) -> Self {
        self.converters.register(target, converter);
        self
    }

    pub fn converter_for_property(
        mut self,
        target: TypeInfo,
        property: &str,
        converter: Arc<dyn Converter>,
    ) -> Self {
        self.converters
            .register_for_property(target, property, converter);
        self
    }

    pub fn hook(mut self, hook: Arc<dyn LifecycleHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn strategy(mut self, strategy: Arc<dyn InstantiationStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Whether wiring cycles may be broken with early references. On by
    /// default; when off, every cycle is a hard error.
    pub fn allow_circular(mut self, allow: bool) -> Self {
        self.allow_circular = allow;
        self
    }

    pub fn build(self) -> Result<Container, DefinitionError> {
        let mut source = DefinitionRegistry::new();
        for (name, definition) in self.definitions {
            source.register(name, definition)?;
        }
        for (alias, name) in self.aliases {
            source.register_alias(alias, name)?;
        }

        let descriptors_by_type = self
            .descriptors_by_name
            .values()
            .map(|descriptor| (descriptor.info.type_id, descriptor.clone()))
            .collect();

        Ok(Container(Arc::new(ContainerInner {
            source: Box::new(source),
            descriptors_by_name: self.descriptors_by_name,
            descriptors_by_type,
            converters: self.converters,
            hooks: self.hooks,
            strategy: self.strategy,
            allow_circular: self.allow_circular,
            registry: SingletonRegistry::new(),
            merged: Mutex::new(HashMap::new()),
        })))
    }
}
