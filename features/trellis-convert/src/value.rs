use std::{
    any::{Any, TypeId},
    sync::Arc,
};

/// All errors crossing the accessor/converter seam must be Send + Sync
pub type DynError = Box<dyn std::error::Error + Send + Sync>;

/// Type Name and Type Id
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct TypeInfo {
    pub type_name: &'static str,
    pub type_id: TypeId,
}
impl std::fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.type_name)
    }
}
impl TypeInfo {
    pub fn of<T: 'static + ?Sized>() -> TypeInfo {
        TypeInfo {
            type_name: std::any::type_name::<T>(),
            type_id: TypeId::of::<T>(),
        }
    }
}

/// A shared handle to a container-managed object
#[derive(Clone)]
pub struct ObjectHandle {
    pub info: TypeInfo,
    instance: Arc<dyn Any + Send + Sync>,
}

impl ObjectHandle {
    pub fn new<T: Send + Sync + 'static>(instance: T) -> Self {
        ObjectHandle {
            info: TypeInfo::of::<T>(),
            instance: Arc::new(instance),
        }
    }

    pub fn from_arc<T: Send + Sync + 'static>(instance: Arc<T>) -> Self {
        ObjectHandle {
            info: TypeInfo::of::<T>(),
            instance,
        }
    }

    /// Downcast to the concrete type, returning the actual type name on failure
    pub fn downcast<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, &'static str> {
        match Arc::downcast::<T>(self.instance.clone()) {
            Ok(downcasted) => Ok(downcasted),
            Err(_) => Err(self.info.type_name),
        }
    }

    pub fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self.instance.as_ref()
    }

    /// Whether two handles refer to the same allocation
    pub fn same_instance(&self, other: &ObjectHandle) -> bool {
        Arc::ptr_eq(&self.instance, &other.instance)
    }
}
impl std::fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ObjectHandle").field(&self.info).finish()
    }
}

/// Runtime value model for property assignments and constructor arguments.
///
/// Scalars carry canonical Rust types; anything else travels as an
/// [`ObjectHandle`]. Conversion between a declared value shape and a
/// property's declared type happens in [`crate::convert`].
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Object(ObjectHandle),
}

impl Value {
    pub fn object<T: Send + Sync + 'static>(instance: T) -> Value {
        Value::Object(ObjectHandle::new(instance))
    }

    /// The runtime type of this value, using canonical scalar types
    pub fn type_info(&self) -> TypeInfo {
        match self {
            Value::Null => TypeInfo::of::<()>(),
            Value::Bool(_) => TypeInfo::of::<bool>(),
            Value::Int(_) => TypeInfo::of::<i64>(),
            Value::Float(_) => TypeInfo::of::<f64>(),
            Value::Str(_) => TypeInfo::of::<String>(),
            Value::List(_) => TypeInfo::of::<Vec<Value>>(),
            Value::Object(handle) => handle.info,
        }
    }

    /// Identity fast path: no conversion needed when the runtime type
    /// already matches the declared target. Null is assignable anywhere.
    pub fn is_assignable_to(&self, target: TypeInfo) -> bool {
        match self {
            Value::Null => true,
            other => other.type_info().type_id == target.type_id,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectHandle> {
        match self {
            Value::Object(handle) => Some(handle),
            _ => None,
        }
    }
}
