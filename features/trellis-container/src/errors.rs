use thiserror::Error;

use trellis_convert::errors::{ConversionError, PropertyError};
use trellis_convert::value::DynError;

/// Errors while resolving or merging definitions
#[derive(Error, Debug)]
pub enum DefinitionError {
    /// No definition is registered under the (canonicalized) name
    #[error("no definition registered under the name '{0}'")]
    NotFound(String),
    /// The resolved definition is a template and must never be instantiated
    #[error("definition '{0}' is abstract and cannot be instantiated")]
    Abstract(String),
    /// The parent chain loops back on itself
    #[error("definition '{name}' has a circular parent chain through '{parent}'")]
    CircularParent { name: String, parent: String },
    /// Two definitions registered under one name
    #[error("a definition is already registered under the name '{0}'")]
    Duplicate(String),
    /// Registering the alias would create an alias cycle
    #[error("cannot alias '{alias}' to '{name}': '{name}' already resolves to '{alias}'")]
    AliasCycle { name: String, alias: String },
}

/// Errors raised by the singleton registry's creation bookkeeping
#[derive(Error, Debug)]
pub enum RegistryError {
    /// The name is already being constructed on the same logical request
    #[error("'{0}' is currently in creation: unresolvable circular reference")]
    CircularCreation(String),
    /// The registry is mid-teardown; no new singletons may be created
    #[error("creation of '{0}' not allowed while singletons are in destruction")]
    NotAllowed(String),
    /// An object already occupies the name
    #[error("a singleton is already registered under the name '{0}'")]
    AlreadyRegistered(String),
}

/// Pipeline phase a creation attempt failed in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreationPhase {
    DependsOn,
    Instantiation,
    Properties,
    Initialization,
    Commit,
}
impl std::fmt::Display for CreationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CreationPhase::DependsOn => "depends-on resolution",
            CreationPhase::Instantiation => "instantiation",
            CreationPhase::Properties => "property population",
            CreationPhase::Initialization => "initialization",
            CreationPhase::Commit => "commit",
        })
    }
}

/// Umbrella wrapper surfaced to top-level callers when a construction
/// attempt fails part-way through the pipeline
#[derive(Error, Debug)]
#[error("creating '{name}' failed during {phase}: {source}")]
pub struct CreationError {
    pub name: String,
    pub phase: CreationPhase,
    #[source]
    pub source: DynError,
    /// Errors suppressed while rolling back related state
    pub suppressed: Vec<String>,
}

impl CreationError {
    pub fn new(name: &str, phase: CreationPhase, source: impl Into<DynError>) -> Self {
        CreationError {
            name: name.to_string(),
            phase,
            source: source.into(),
            suppressed: Vec::new(),
        }
    }
}

/// Errors surfaced by [`crate::container::Container::get`] and friends
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error(transparent)]
    Definition(#[from] DefinitionError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Creation(#[from] CreationError),
    #[error(transparent)]
    Property(#[from] PropertyError),
    #[error(transparent)]
    Conversion(#[from] ConversionError),
    /// The definition declares a scope the container has no implementation for
    #[error("definition '{name}' uses unsupported scope '{scope}'")]
    UnsupportedScope { name: String, scope: String },
    #[error("'{name}' is not a '{required_type}' but a '{actual_type}'")]
    Downcast {
        name: String,
        required_type: &'static str,
        actual_type: &'static str,
    },
}
