use std::{collections::BTreeMap, sync::Arc, sync::OnceLock};

use trellis_convert::value::{TypeInfo, Value};

/// Lifecycle scope of a definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// At most one instance per name, shared by all requesters
    Singleton,
    /// A fresh instance per request, never cached
    Prototype,
    /// Declared but not implemented by this container
    Custom(String),
}

impl Scope {
    pub fn is_singleton(&self) -> bool {
        matches!(self, Scope::Singleton)
    }

    pub fn is_prototype(&self) -> bool {
        matches!(self, Scope::Prototype)
    }
}

/// A declared value: either usable as-is, in need of conversion, or a
/// reference to something that only exists at wiring time
#[derive(Debug, Clone)]
pub enum PropertyValue {
    /// A literal runtime value
    Literal(Value),
    /// A string that must be converted, optionally toward a declared type
    /// before property-level conversion
    TypedString {
        value: String,
        target_type: Option<TypeInfo>,
    },
    /// Forward reference to another named object, resolved at wiring time
    Reference(String),
    /// An anonymous nested definition, constructed per outer object
    Inner(Arc<Definition>),
}

impl PropertyValue {
    pub fn literal(value: Value) -> Self {
        PropertyValue::Literal(value)
    }

    pub fn string(value: impl Into<String>) -> Self {
        PropertyValue::TypedString {
            value: value.into(),
            target_type: None,
        }
    }

    pub fn typed_string(value: impl Into<String>, target_type: TypeInfo) -> Self {
        PropertyValue::TypedString {
            value: value.into(),
            target_type: Some(target_type),
        }
    }

    pub fn reference(name: impl Into<String>) -> Self {
        PropertyValue::Reference(name.into())
    }

    pub fn inner(definition: Definition) -> Self {
        PropertyValue::Inner(Arc::new(definition))
    }

    /// Only values that resolve to themselves on every construction may have
    /// their converted form cached; references and inner definitions must be
    /// re-resolved per instance.
    pub fn is_cacheable(&self) -> bool {
        matches!(
            self,
            PropertyValue::Literal(_) | PropertyValue::TypedString { .. }
        )
    }
}

/// One named property assignment, with a one-shot cache for the converted
/// value so repeated construction from the same resolved definition skips
/// re-conversion
#[derive(Debug)]
pub struct PropertyAssignment {
    pub name: String,
    pub value: PropertyValue,
    /// Tolerant assignments skip silently when the target exposes no such
    /// writable property
    pub optional: bool,
    converted: OnceLock<Value>,
}

impl PropertyAssignment {
    pub fn new(name: impl Into<String>, value: PropertyValue) -> Self {
        PropertyAssignment {
            name: name.into(),
            value,
            optional: false,
            converted: OnceLock::new(),
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn converted(&self) -> Option<&Value> {
        self.converted.get()
    }

    /// Cache the converted value; later callers keep the first one stored
    pub fn cache_converted(&self, value: Value) {
        let _ = self.converted.set(value);
    }
}

// The conversion cache belongs to one resolved definition; copies start cold.
impl Clone for PropertyAssignment {
    fn clone(&self) -> Self {
        PropertyAssignment {
            name: self.name.clone(),
            value: self.value.clone(),
            optional: self.optional,
            converted: OnceLock::new(),
        }
    }
}

/// Declarative blueprint for constructing and wiring one object.
///
/// Built fluently, registered under a name, and merged with its parent chain
/// into a [`ResolvedDefinition`] before first use.
#[derive(Debug, Clone, Default)]
pub struct Definition {
    pub type_name: Option<String>,
    pub scope: Option<Scope>,
    pub parent: Option<String>,
    pub is_abstract: bool,
    pub lazy_init: Option<bool>,
    pub primary: bool,
    pub candidate: bool,
    pub depends_on: Vec<String>,
    pub constructor_args: BTreeMap<usize, PropertyValue>,
    pub properties: Vec<PropertyAssignment>,
    pub init_callback: Option<String>,
    pub destroy_callback: Option<String>,
    pub factory: Option<String>,
}

impl Definition {
    pub fn new(type_name: impl Into<String>) -> Self {
        Definition {
            type_name: Some(type_name.into()),
            candidate: true,
            ..Default::default()
        }
    }

    /// A child definition inheriting everything unset from its parent
    pub fn child_of(parent: impl Into<String>) -> Self {
        Definition {
            parent: Some(parent.into()),
            candidate: true,
            ..Default::default()
        }
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn prototype(self) -> Self {
        self.scope(Scope::Prototype)
    }

    /// Mark as a template: merged into children but never instantiated
    pub fn abstract_template(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    pub fn lazy(mut self) -> Self {
        self.lazy_init = Some(true);
        self
    }

    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }

    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.depends_on.push(name.into());
        self
    }

    pub fn property(mut self, name: impl Into<String>, value: PropertyValue) -> Self {
        self.properties.push(PropertyAssignment::new(name, value));
        self
    }

    pub fn property_optional(mut self, name: impl Into<String>, value: PropertyValue) -> Self {
        self.properties
            .push(PropertyAssignment::new(name, value).optional());
        self
    }

    pub fn constructor_arg(mut self, index: usize, value: PropertyValue) -> Self {
        self.constructor_args.insert(index, value);
        self
    }

    pub fn init(mut self, callback: impl Into<String>) -> Self {
        self.init_callback = Some(callback.into());
        self
    }

    pub fn destroy(mut self, callback: impl Into<String>) -> Self {
        self.destroy_callback = Some(callback.into());
        self
    }

    /// Select a named factory on the type descriptor instead of the
    /// no-arg constructor
    pub fn factory(mut self, name: impl Into<String>) -> Self {
        self.factory = Some(name.into());
        self
    }
}

/// A definition flattened against its transitive parent chain: immutable
/// once published, shared via `Arc` by the container's merged cache
#[derive(Debug)]
pub struct ResolvedDefinition {
    pub name: String,
    pub type_name: Option<String>,
    pub scope: Scope,
    pub is_abstract: bool,
    pub lazy_init: bool,
    pub primary: bool,
    pub candidate: bool,
    pub depends_on: Vec<String>,
    pub constructor_args: BTreeMap<usize, PropertyValue>,
    pub properties: Vec<PropertyAssignment>,
    pub init_callback: Option<String>,
    pub destroy_callback: Option<String>,
    pub factory: Option<String>,
    inspected: OnceLock<()>,
}

impl ResolvedDefinition {
    pub(crate) fn from_parts(name: &str, definition: Definition) -> Self {
        ResolvedDefinition {
            name: name.to_string(),
            type_name: definition.type_name,
            scope: definition.scope.unwrap_or(Scope::Singleton),
            is_abstract: definition.is_abstract,
            lazy_init: definition.lazy_init.unwrap_or(false),
            primary: definition.primary,
            candidate: definition.candidate,
            depends_on: definition.depends_on,
            constructor_args: definition.constructor_args,
            properties: definition.properties,
            init_callback: definition.init_callback,
            destroy_callback: definition.destroy_callback,
            factory: definition.factory,
            inspected: OnceLock::new(),
        }
    }

    /// Constructor arguments in positional order
    pub fn args_in_order(&self) -> impl Iterator<Item = &PropertyValue> {
        self.constructor_args.values()
    }

    /// Latch for one-shot merged-definition inspection hooks; true only for
    /// the first caller
    pub(crate) fn mark_inspected(&self) -> bool {
        self.inspected.set(()).is_ok()
    }
}
