use thiserror::Error;

use crate::value::TypeInfo;

/// Errors while coercing a value to a property's declared type
#[derive(Error, Debug)]
pub enum ConversionError {
    /// No converter strategy applies to this source/target pair
    #[error("no conversion from '{value_type}' to '{target_type}' for property '{property}'")]
    NoStrategy {
        value_type: TypeInfo,
        target_type: TypeInfo,
        property: String,
    },
    /// A converter ran and failed
    #[error("converter '{converter}' failed converting '{value_type}' to '{target_type}' for property '{property}': {reason}")]
    ConverterFailed {
        converter: String,
        value_type: TypeInfo,
        target_type: TypeInfo,
        property: String,
        reason: String,
    },
    /// A converter ran but produced a value of the wrong type
    #[error("converter '{converter}' produced '{produced}' which is not assignable to '{target_type}' for property '{property}'")]
    NotAssignable {
        converter: String,
        produced: TypeInfo,
        target_type: TypeInfo,
        property: String,
    },
}

/// Errors while writing a property on a target object
#[derive(Error, Debug)]
pub enum PropertyError {
    /// The target type exposes no writable property of that name
    #[error("no writable property '{property}' on '{type_name}'{}", render_suggestions(.suggestions))]
    NotWritable {
        property: String,
        type_name: &'static str,
        suggestions: Vec<String>,
    },
    /// The supplied value does not match the property's declared type
    #[error("value of type '{value_type}' does not match declared type '{expected}' of property '{property}'")]
    TypeMismatch {
        property: String,
        expected: TypeInfo,
        value_type: TypeInfo,
    },
    /// The setter itself rejected the value
    #[error("setting property '{property}' failed: {reason}")]
    SetterFailed { property: String, reason: String },
    #[error(transparent)]
    Conversion(#[from] ConversionError),
}

fn render_suggestions(suggestions: &[String]) -> String {
    if suggestions.is_empty() {
        String::new()
    } else {
        format!(" - did you mean one of {suggestions:?}?")
    }
}
