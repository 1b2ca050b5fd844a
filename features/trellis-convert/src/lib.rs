//! Trellis Convert provides the runtime value model and the type-coercion
//! engine used when declared property values meet live objects.
//!
//! It is split into four parts:
//! 1. [`value`]: the [`value::Value`] model, [`value::TypeInfo`] and the
//!    shared [`value::ObjectHandle`]
//! 2. [`descriptor`]: per-type property-descriptor tables, the explicit
//!    replacement for runtime reflection
//! 3. [`convert`]: the converter registry and the `convert_if_necessary`
//!    strategy chain
//! 4. [`suggest`]: near-miss property-name suggestions for diagnostics

pub mod convert;
pub mod descriptor;
pub mod errors;
pub mod suggest;
pub mod value;
