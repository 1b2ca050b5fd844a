use std::{any::Any, collections::HashMap, marker::PhantomData, sync::Arc};

use crate::{
    errors::PropertyError,
    value::{DynError, ObjectHandle, TypeInfo, Value},
};

pub type SetFn = Arc<dyn Fn(&(dyn Any + Send + Sync), Value) -> Result<(), PropertyError> + Send + Sync>;
pub type GetFn = Arc<dyn Fn(&(dyn Any + Send + Sync)) -> Option<Value> + Send + Sync>;
pub type ConstructFn = Arc<dyn Fn() -> ObjectHandle + Send + Sync>;
pub type FactoryFn = Arc<dyn Fn(&[Value]) -> Result<ObjectHandle, DynError> + Send + Sync>;
pub type ParseFn = Arc<dyn Fn(&str) -> Result<Value, DynError> + Send + Sync>;
pub type CallbackFn = Arc<dyn Fn(&(dyn Any + Send + Sync)) -> Result<(), DynError> + Send + Sync>;
pub type NameFn = Arc<dyn Fn(&(dyn Any + Send + Sync), &str) + Send + Sync>;
pub type ContextFn = Arc<dyn Fn(&(dyn Any + Send + Sync), &ObjectHandle) + Send + Sync>;

/// One writable (and optionally readable) property of a managed type
#[derive(Clone)]
pub struct PropertyDescriptor {
    pub name: String,
    /// Declared type the assigned value must be converted to
    pub value_type: TypeInfo,
    set: SetFn,
    get: Option<GetFn>,
}

impl PropertyDescriptor {
    pub fn set(&self, target: &(dyn Any + Send + Sync), value: Value) -> Result<(), PropertyError> {
        (self.set)(target, value)
    }

    pub fn get(&self, target: &(dyn Any + Send + Sync)) -> Option<Value> {
        self.get.as_ref().and_then(|get| get(target))
    }
}

/// Per-type descriptor table: the explicit replacement for runtime
/// reflection. Built once per managed type and shared as `Arc`.
///
/// Setters receive `&dyn Any` rather than `&mut` so that wiring can happen
/// after an early reference to the object has already been shared; managed
/// types use interior mutability for wired fields.
pub struct TypeDescriptor {
    pub info: TypeInfo,
    properties: HashMap<String, PropertyDescriptor>,
    construct: Option<ConstructFn>,
    factories: HashMap<String, FactoryFn>,
    parse: Option<ParseFn>,
    callbacks: HashMap<String, CallbackFn>,
    after_wired: Option<CallbackFn>,
    on_name: Option<NameFn>,
    on_context: Option<ContextFn>,
}

impl TypeDescriptor {
    pub fn builder<T: Send + Sync + 'static>() -> TypeDescriptorBuilder<T> {
        TypeDescriptorBuilder {
            inner: TypeDescriptor {
                info: TypeInfo::of::<T>(),
                properties: HashMap::new(),
                construct: None,
                factories: HashMap::new(),
                parse: None,
                callbacks: HashMap::new(),
                after_wired: None,
                on_name: None,
                on_context: None,
            },
            _marker: PhantomData,
        }
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties.get(name)
    }

    pub fn writable_properties(&self) -> impl Iterator<Item = &str> {
        self.properties.keys().map(String::as_str)
    }

    /// Construct via the registered no-arg constructor, if any
    pub fn construct(&self) -> Option<ObjectHandle> {
        self.construct.as_ref().map(|construct| construct())
    }

    pub fn factory(&self, name: &str) -> Option<&FactoryFn> {
        self.factories.get(name)
    }

    pub fn parse(&self) -> Option<&ParseFn> {
        self.parse.as_ref()
    }

    pub fn callback(&self, name: &str) -> Option<&CallbackFn> {
        self.callbacks.get(name)
    }

    pub fn after_wired(&self) -> Option<&CallbackFn> {
        self.after_wired.as_ref()
    }

    pub fn on_name(&self) -> Option<&NameFn> {
        self.on_name.as_ref()
    }

    pub fn on_context(&self) -> Option<&ContextFn> {
        self.on_context.as_ref()
    }
}
impl std::fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("type", &self.info.type_name)
            .field("properties", &self.properties.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Fluent builder for [`TypeDescriptor`], typed over the described type so
/// registered closures take `&T` instead of `&dyn Any`.
pub struct TypeDescriptorBuilder<T> {
    inner: TypeDescriptor,
    _marker: PhantomData<T>,
}

impl<T: Send + Sync + 'static> TypeDescriptorBuilder<T> {
    pub fn constructor(mut self, construct: impl Fn() -> T + Send + Sync + 'static) -> Self {
        self.inner.construct = Some(Arc::new(move || ObjectHandle::new(construct())));
        self
    }

    /// Register a named factory taking already-resolved argument values
    pub fn factory(
        mut self,
        name: &str,
        factory: impl Fn(&[Value]) -> Result<T, DynError> + Send + Sync + 'static,
    ) -> Self {
        self.inner.factories.insert(
            name.to_string(),
            Arc::new(move |args| factory(args).map(ObjectHandle::new)),
        );
        self
    }

    /// Register a textual parser, making string values convertible to this type
    pub fn parses_str(
        mut self,
        parse: impl Fn(&str) -> Result<T, DynError> + Send + Sync + 'static,
    ) -> Self {
        self.inner.parse = Some(Arc::new(move |text| parse(text).map(Value::object)));
        self
    }

    pub fn property(
        self,
        name: &str,
        value_type: TypeInfo,
        set: impl Fn(&T, Value) -> Result<(), PropertyError> + Send + Sync + 'static,
    ) -> Self {
        self.property_with_get(name, value_type, set, None::<fn(&T) -> Option<Value>>)
    }

    pub fn property_with_get(
        mut self,
        name: &str,
        value_type: TypeInfo,
        set: impl Fn(&T, Value) -> Result<(), PropertyError> + Send + Sync + 'static,
        get: Option<impl Fn(&T) -> Option<Value> + Send + Sync + 'static>,
    ) -> Self {
        let property = name.to_string();
        let set_property = property.clone();
        let descriptor = PropertyDescriptor {
            name: property.clone(),
            value_type,
            set: Arc::new(move |target, value| match target.downcast_ref::<T>() {
                Some(target) => set(target, value),
                None => Err(PropertyError::SetterFailed {
                    property: set_property.clone(),
                    reason: format!("target is not a {}", std::any::type_name::<T>()),
                }),
            }),
            get: get.map(|get| -> GetFn {
                Arc::new(move |target: &(dyn Any + Send + Sync)| {
                    target.downcast_ref::<T>().and_then(&get)
                })
            }),
        };
        self.inner.properties.insert(property, descriptor);
        self
    }

    /// Register a named lifecycle callback (init or destroy target)
    pub fn callback(
        mut self,
        name: &str,
        callback: impl Fn(&T) -> Result<(), DynError> + Send + Sync + 'static,
    ) -> Self {
        self.inner
            .callbacks
            .insert(name.to_string(), wrap_callback(callback));
        self
    }

    /// Conventional initializer, run after wiring when the definition names
    /// no init callback of its own
    pub fn after_wired(
        mut self,
        callback: impl Fn(&T) -> Result<(), DynError> + Send + Sync + 'static,
    ) -> Self {
        self.inner.after_wired = Some(wrap_callback(callback));
        self
    }

    /// Context-injection callback receiving the object's registered name
    pub fn on_name(mut self, callback: impl Fn(&T, &str) + Send + Sync + 'static) -> Self {
        self.inner.on_name = Some(Arc::new(move |target, name| {
            if let Some(target) = target.downcast_ref::<T>() {
                callback(target, name);
            }
        }));
        self
    }

    /// Context-injection callback receiving a handle to the owning container
    pub fn on_context(
        mut self,
        callback: impl Fn(&T, &ObjectHandle) + Send + Sync + 'static,
    ) -> Self {
        self.inner.on_context = Some(Arc::new(move |target, context| {
            if let Some(target) = target.downcast_ref::<T>() {
                callback(target, context);
            }
        }));
        self
    }

    pub fn build(self) -> Arc<TypeDescriptor> {
        Arc::new(self.inner)
    }
}

fn wrap_callback<T: Send + Sync + 'static>(
    callback: impl Fn(&T) -> Result<(), DynError> + Send + Sync + 'static,
) -> CallbackFn {
    Arc::new(move |target| match target.downcast_ref::<T>() {
        Some(target) => callback(target),
        None => Err(format!("target is not a {}", std::any::type_name::<T>()).into()),
    })
}
