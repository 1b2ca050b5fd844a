use std::{any::TypeId, collections::HashMap, sync::Arc};

use crate::{
    descriptor::ParseFn,
    errors::ConversionError,
    value::{TypeInfo, Value},
};

/// A custom property converter for one declared target type
pub trait Converter: Send + Sync {
    /// Name used in conversion failure diagnostics
    fn name(&self) -> &str {
        "custom converter"
    }

    fn convert(
        &self,
        value: &Value,
        target: TypeInfo,
        property: &str,
    ) -> Result<Value, ConversionError>;
}

/// Custom converters, keyed by declared target type and optionally by
/// property name. A property-specific registration shadows a type-wide one.
#[derive(Default)]
pub struct ConverterRegistry {
    by_property: HashMap<(TypeId, String), Arc<dyn Converter>>,
    by_type: HashMap<TypeId, Arc<dyn Converter>>,
}

impl ConverterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, target: TypeInfo, converter: Arc<dyn Converter>) {
        self.by_type.insert(target.type_id, converter);
    }

    pub fn register_for_property(
        &mut self,
        target: TypeInfo,
        property: &str,
        converter: Arc<dyn Converter>,
    ) {
        self.by_property
            .insert((target.type_id, property.to_string()), converter);
    }

    pub fn find(&self, target: TypeInfo, property: &str) -> Option<&Arc<dyn Converter>> {
        self.by_property
            .get(&(target.type_id, property.to_string()))
            .or_else(|| self.by_type.get(&target.type_id))
    }
}

/// Coerce `value` to the declared `target` type of `property`.
///
/// Strategy order: identity fast path, custom converter (property-specific
/// before type-wide), built-in scalar coercions, then the target type's
/// textual parser for string values. Whatever a converter produces is
/// verified to actually be assignable before it is accepted.
pub fn convert_if_necessary(
    value: Value,
    target: TypeInfo,
    property: &str,
    registry: &ConverterRegistry,
    parse: Option<&ParseFn>,
) -> Result<Value, ConversionError> {
    if value.is_assignable_to(target) {
        return Ok(value);
    }

    if let Some(converter) = registry.find(target, property) {
        let produced = converter.convert(&value, target, property)?;
        return check_assignable(produced, target, property, converter.name());
    }

    if let Some(result) = convert_builtin(&value, target, property) {
        return result;
    }

    if let (Value::Str(text), Some(parse)) = (&value, parse) {
        tracing::trace!(property, %target, "parsing string value via textual parser");
        let produced = parse(text).map_err(|error| ConversionError::ConverterFailed {
            converter: "textual parser".into(),
            value_type: value.type_info(),
            target_type: target,
            property: property.to_string(),
            reason: error.to_string(),
        })?;
        return check_assignable(produced, target, property, "textual parser");
    }

    Err(ConversionError::NoStrategy {
        value_type: value.type_info(),
        target_type: target,
        property: property.to_string(),
    })
}

fn check_assignable(
    produced: Value,
    target: TypeInfo,
    property: &str,
    converter: &str,
) -> Result<Value, ConversionError> {
    if produced.is_assignable_to(target) {
        Ok(produced)
    } else {
        Err(ConversionError::NotAssignable {
            converter: converter.to_string(),
            produced: produced.type_info(),
            target_type: target,
            property: property.to_string(),
        })
    }
}

/// Built-in coercions for common scalar shapes. Returns `None` when no
/// built-in strategy applies to the source/target pair.
fn convert_builtin(
    value: &Value,
    target: TypeInfo,
    property: &str,
) -> Option<Result<Value, ConversionError>> {
    let failed = |reason: String| ConversionError::ConverterFailed {
        converter: "built-in".into(),
        value_type: value.type_info(),
        target_type: target,
        property: property.to_string(),
        reason,
    };

    if target.type_id == TypeId::of::<i64>() {
        if let Value::Str(text) = value {
            return Some(
                text.trim()
                    .parse::<i64>()
                    .map(Value::Int)
                    .map_err(|e| failed(e.to_string())),
            );
        }
    } else if target.type_id == TypeId::of::<f64>() {
        match value {
            Value::Str(text) => {
                return Some(
                    text.trim()
                        .parse::<f64>()
                        .map(Value::Float)
                        .map_err(|e| failed(e.to_string())),
                );
            }
            Value::Int(n) => return Some(Ok(Value::Float(*n as f64))),
            _ => {}
        }
    } else if target.type_id == TypeId::of::<bool>() {
        if let Value::Str(text) = value {
            return Some(match text.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Ok(Value::Bool(true)),
                "false" | "no" | "off" | "0" => Ok(Value::Bool(false)),
                other => Err(failed(format!("'{other}' is not a boolean"))),
            });
        }
    } else if target.type_id == TypeId::of::<String>() {
        match value {
            Value::Int(n) => return Some(Ok(Value::Str(n.to_string()))),
            Value::Float(n) => return Some(Ok(Value::Str(n.to_string()))),
            Value::Bool(b) => return Some(Ok(Value::Str(b.to_string()))),
            _ => {}
        }
    }

    None
}
