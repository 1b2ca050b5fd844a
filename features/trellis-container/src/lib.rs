//! A declarative object container: register blueprints for how objects are
//! constructed, wired and initialized, then resolve them by name.
//!
//! Definitions may inherit from parent definitions, reference each other
//! (cycles included, broken with early references), and carry lifecycle
//! callbacks. Singletons are created exactly once under concurrency and are
//! torn down dependents-first.
//!
//! ```no_run
//! use std::sync::{Arc, Mutex};
//! use trellis_container::container::Container;
//! use trellis_container::definition::{Definition, PropertyValue};
//! use trellis_convert::descriptor::TypeDescriptor;
//! use trellis_convert::value::{TypeInfo, Value};
//!
//! #[derive(Default)]
//! struct Greeter {
//!     greeting: Mutex<String>,
//! }
//!
//! let descriptor = TypeDescriptor::builder::<Greeter>()
//!     .constructor(Greeter::default)
//!     .property("greeting", TypeInfo::of::<String>(), |greeter: &Greeter, value| {
//!         if let Value::Str(text) = value {
//!             *greeter.greeting.lock().unwrap() = text;
//!         }
//!         Ok(())
//!     })
//!     .build();
//!
//! let container = Container::builder()
//!     .register_type("Greeter", descriptor)
//!     .definition(
//!         "greeter",
//!         Definition::new("Greeter").property("greeting", PropertyValue::string("hello")),
//!     )
//!     .build()
//!     .unwrap();
//!
//! let greeter: Arc<Greeter> = container.get_as("greeter").unwrap();
//! ```

pub mod container;
pub mod context;
pub mod definition;
pub mod errors;
pub mod hooks;
pub(crate) mod merge;
pub mod registry;

pub use container::{Container, ContainerBuilder};
pub use definition::{Definition, PropertyValue, Scope};
pub use errors::ResolveError;
