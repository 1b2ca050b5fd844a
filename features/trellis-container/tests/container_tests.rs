use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use trellis_container::{
    container::Container,
    definition::{Definition, PropertyValue, Scope},
    errors::{CreationPhase, DefinitionError, RegistryError, ResolveError},
    hooks::{HookFlow, LifecycleHook},
};
use trellis_convert::{
    convert::Converter,
    descriptor::TypeDescriptor,
    errors::ConversionError,
    value::{DynError, ObjectHandle, TypeInfo, Value},
};

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Default)]
struct Widget {
    label: Mutex<String>,
    size: Mutex<i64>,
}

fn widget_descriptor() -> Arc<TypeDescriptor> {
    TypeDescriptor::builder::<Widget>()
        .constructor(Widget::default)
        .property("label", TypeInfo::of::<String>(), |widget: &Widget, value| {
            if let Value::Str(text) = value {
                *widget.label.lock().unwrap() = text;
            }
            Ok(())
        })
        .property("size", TypeInfo::of::<i64>(), |widget: &Widget, value| {
            if let Value::Int(size) = value {
                *widget.size.lock().unwrap() = size;
            }
            Ok(())
        })
        .build()
}

#[derive(Default)]
struct Node {
    peer: Mutex<Option<Arc<Node>>>,
}

fn node_descriptor() -> Arc<TypeDescriptor> {
    TypeDescriptor::builder::<Node>()
        .constructor(Node::default)
        .factory("with_peer", |args| match args {
            [Value::Object(handle)] => {
                let peer = handle.downcast::<Node>().map_err(|actual| -> DynError {
                    format!("expected a Node, got {actual}").into()
                })?;
                Ok(Node {
                    peer: Mutex::new(Some(peer)),
                })
            }
            other => Err(format!("unexpected arguments: {other:?}").into()),
        })
        .property("peer", TypeInfo::of::<Node>(), |node: &Node, value| {
            if let Some(handle) = value.as_object() {
                if let Ok(peer) = handle.downcast::<Node>() {
                    *node.peer.lock().unwrap() = Some(peer);
                }
            }
            Ok(())
        })
        .build()
}

#[test]
fn wires_literals_and_converts_strings() {
    init_tracing();
    let container = Container::builder()
        .register_type("Widget", widget_descriptor())
        .definition(
            "widget",
            Definition::new("Widget")
                .property("label", PropertyValue::string("front"))
                .property("size", PropertyValue::string("42")),
        )
        .build()
        .unwrap();

    let widget: Arc<Widget> = container.get_as("widget").unwrap();
    assert_eq!(*widget.label.lock().unwrap(), "front");
    assert_eq!(*widget.size.lock().unwrap(), 42);
}

#[test]
fn unconvertible_value_fails_in_the_property_phase() {
    let container = Container::builder()
        .register_type("Widget", widget_descriptor())
        .definition(
            "widget",
            Definition::new("Widget").property("size", PropertyValue::string("abc")),
        )
        .build()
        .unwrap();

    let err = container.get("widget").unwrap_err();
    match &err {
        ResolveError::Creation(creation) => {
            assert_eq!(creation.phase, CreationPhase::Properties);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("size"), "got: {err}");
    assert!(container.singleton_names().is_empty());
}

#[test]
fn concurrent_requests_construct_the_singleton_once() {
    init_tracing();
    let constructed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&constructed);
    let descriptor = TypeDescriptor::builder::<Widget>()
        .constructor(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(10));
            Widget::default()
        })
        .build();

    let container = Container::builder()
        .register_type("Widget", descriptor)
        .definition("widget", Definition::new("Widget"))
        .build()
        .unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let container = container.clone();
            std::thread::spawn(move || container.get("widget").unwrap())
        })
        .collect();
    let objects: Vec<ObjectHandle> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(constructed.load(Ordering::SeqCst), 1);
    assert!(objects.windows(2).all(|pair| pair[0].same_instance(&pair[1])));
}

#[test]
fn reference_cycles_are_wired_through_early_references() {
    init_tracing();
    let container = Container::builder()
        .register_type("Node", node_descriptor())
        .definition(
            "a",
            Definition::new("Node").property("peer", PropertyValue::reference("b")),
        )
        .definition(
            "b",
            Definition::new("Node").property("peer", PropertyValue::reference("a")),
        )
        .build()
        .unwrap();

    let a: Arc<Node> = container.get_as("a").unwrap();
    let b = a.peer.lock().unwrap().clone().unwrap();
    let back = b.peer.lock().unwrap().clone().unwrap();
    assert!(Arc::ptr_eq(&a, &back));
}

#[test]
fn cycles_are_fatal_when_early_references_are_disabled() {
    let container = Container::builder()
        .allow_circular(false)
        .register_type("Node", node_descriptor())
        .definition(
            "a",
            Definition::new("Node").property("peer", PropertyValue::reference("b")),
        )
        .definition(
            "b",
            Definition::new("Node").property("peer", PropertyValue::reference("a")),
        )
        .build()
        .unwrap();

    let err = container.get("a").unwrap_err();
    assert!(err.to_string().contains("circular"), "got: {err}");
}

#[test]
fn constructor_arguments_cannot_join_cycles() {
    let container = Container::builder()
        .register_type("Node", node_descriptor())
        .definition(
            "a",
            Definition::new("Node")
                .factory("with_peer")
                .constructor_arg(0, PropertyValue::reference("b")),
        )
        .definition(
            "b",
            Definition::new("Node").property("peer", PropertyValue::reference("a")),
        )
        .build()
        .unwrap();

    let err = container.get("a").unwrap_err();
    assert!(err.to_string().contains("circular"), "got: {err}");
}

#[test]
fn children_inherit_and_override_parent_settings() {
    let container = Container::builder()
        .register_type("Widget", widget_descriptor())
        .definition(
            "base",
            Definition::new("Widget")
                .abstract_template()
                .property("label", PropertyValue::string("base"))
                .property("size", PropertyValue::string("1")),
        )
        .definition(
            "child",
            Definition::child_of("base").property("label", PropertyValue::string("child")),
        )
        .build()
        .unwrap();

    let child: Arc<Widget> = container.get_as("child").unwrap();
    assert_eq!(*child.label.lock().unwrap(), "child");
    assert_eq!(*child.size.lock().unwrap(), 1);

    let err = container.get("base").unwrap_err();
    assert!(matches!(
        err,
        ResolveError::Definition(DefinitionError::Abstract(name)) if name == "base"
    ));
}

#[test]
fn depends_on_creates_the_dependency_first() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let order = Arc::clone(&log);
    let descriptor = TypeDescriptor::builder::<Widget>()
        .constructor(Widget::default)
        .on_name(move |_: &Widget, name| order.lock().unwrap().push(name.to_string()))
        .build();

    let container = Container::builder()
        .register_type("Widget", descriptor)
        .definition("store", Definition::new("Widget"))
        .definition("service", Definition::new("Widget").depends_on("store"))
        .build()
        .unwrap();

    container.get("service").unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["store", "service"]);
}

#[test]
fn circular_depends_on_is_rejected() {
    let container = Container::builder()
        .register_type("Widget", widget_descriptor())
        .definition("a", Definition::new("Widget").depends_on("b"))
        .definition("b", Definition::new("Widget").depends_on("a"))
        .build()
        .unwrap();

    let err = container.get("a").unwrap_err();
    assert!(err.to_string().contains("depends-on"), "got: {err}");
}

#[test]
fn failed_initialization_rolls_back_and_allows_retry() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let descriptor = TypeDescriptor::builder::<Widget>()
        .constructor(Widget::default)
        .callback("boot", move |_: &Widget| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err("warmup failed".into())
            } else {
                Ok(())
            }
        })
        .build();

    let container = Container::builder()
        .register_type("Widget", descriptor)
        .definition("widget", Definition::new("Widget").init("boot"))
        .build()
        .unwrap();

    let err = container.get("widget").unwrap_err();
    match err {
        ResolveError::Creation(creation) => {
            assert_eq!(creation.phase, CreationPhase::Initialization);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(container.singleton_names().is_empty());

    container.get("widget").unwrap();
    assert_eq!(container.singleton_names(), vec!["widget"]);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[test]
fn aliases_resolve_to_the_same_singleton() {
    let container = Container::builder()
        .register_type("Widget", widget_descriptor())
        .definition("widget", Definition::new("Widget"))
        .alias("svc", "widget")
        .alias("s", "svc")
        .build()
        .unwrap();

    assert!(container.contains("s"));
    let by_alias = container.get("s").unwrap();
    let by_name = container.get("widget").unwrap();
    assert!(by_alias.same_instance(&by_name));
    assert_eq!(container.singleton_names(), vec!["widget"]);
}

struct CountingConverter(Arc<AtomicUsize>);
impl Converter for CountingConverter {
    fn name(&self) -> &str {
        "counting"
    }
    fn convert(
        &self,
        _value: &Value,
        _target: TypeInfo,
        _property: &str,
    ) -> Result<Value, ConversionError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(Value::Int(7))
    }
}

#[test]
fn prototypes_are_distinct_but_reuse_the_converted_value() {
    let conversions = Arc::new(AtomicUsize::new(0));
    let container = Container::builder()
        .register_type("Widget", widget_descriptor())
        .converter(
            TypeInfo::of::<i64>(),
            Arc::new(CountingConverter(Arc::clone(&conversions))),
        )
        .definition(
            "widget",
            Definition::new("Widget")
                .prototype()
                .property("size", PropertyValue::string("anything")),
        )
        .build()
        .unwrap();

    let first: Arc<Widget> = container.get_as("widget").unwrap();
    let second: Arc<Widget> = container.get_as("widget").unwrap();

    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(*first.size.lock().unwrap(), 7);
    assert_eq!(*second.size.lock().unwrap(), 7);
    assert_eq!(conversions.load(Ordering::SeqCst), 1);
    assert!(container.singleton_names().is_empty());
}

struct Replacer;
impl LifecycleHook for Replacer {
    fn before_init(&self, name: &str, object: ObjectHandle) -> Result<HookFlow, DynError> {
        if name == "widget" {
            let replacement = Widget::default();
            *replacement.label.lock().unwrap() = "replaced".into();
            Ok(HookFlow::Continue(ObjectHandle::new(replacement)))
        } else {
            Ok(HookFlow::Continue(object))
        }
    }
}

#[test]
fn hooks_may_replace_the_object_before_init() {
    let container = Container::builder()
        .register_type("Widget", widget_descriptor())
        .hook(Arc::new(Replacer))
        .definition(
            "widget",
            Definition::new("Widget").property("label", PropertyValue::string("original")),
        )
        .build()
        .unwrap();

    let widget: Arc<Widget> = container.get_as("widget").unwrap();
    assert_eq!(*widget.label.lock().unwrap(), "replaced");
}

struct LateReplacer;
impl LifecycleHook for LateReplacer {
    fn after_init(&self, name: &str, object: ObjectHandle) -> Result<HookFlow, DynError> {
        if name == "a" {
            Ok(HookFlow::Continue(ObjectHandle::new(Node::default())))
        } else {
            Ok(HookFlow::Continue(object))
        }
    }
}

#[test]
fn replacement_after_an_early_reference_was_shared_is_refused() {
    let container = Container::builder()
        .register_type("Node", node_descriptor())
        .hook(Arc::new(LateReplacer))
        .definition(
            "a",
            Definition::new("Node").property("peer", PropertyValue::reference("b")),
        )
        .definition(
            "b",
            Definition::new("Node").property("peer", PropertyValue::reference("a")),
        )
        .build()
        .unwrap();

    let err = container.get("a").unwrap_err();
    match err {
        ResolveError::Creation(creation) => assert_eq!(creation.phase, CreationPhase::Commit),
        other => panic!("unexpected error: {other}"),
    }
}

struct Stopper(Arc<AtomicUsize>);
impl LifecycleHook for Stopper {
    fn before_init(&self, _name: &str, object: ObjectHandle) -> Result<HookFlow, DynError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(HookFlow::Stop(object))
    }
}

struct NeverRuns(Arc<AtomicUsize>);
impl LifecycleHook for NeverRuns {
    fn before_init(&self, _name: &str, object: ObjectHandle) -> Result<HookFlow, DynError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(HookFlow::Continue(object))
    }
}

#[test]
fn a_stopping_hook_short_circuits_the_remaining_hooks() {
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));
    let container = Container::builder()
        .register_type("Widget", widget_descriptor())
        .hook(Arc::new(Stopper(Arc::clone(&first))))
        .hook(Arc::new(NeverRuns(Arc::clone(&second))))
        .definition("widget", Definition::new("Widget"))
        .build()
        .unwrap();

    container.get("widget").unwrap();
    assert_eq!(first.load(Ordering::SeqCst), 1);
    assert_eq!(second.load(Ordering::SeqCst), 0);
}

#[test]
fn unknown_property_suggests_near_misses() {
    let container = Container::builder()
        .register_type("Widget", widget_descriptor())
        .definition(
            "widget",
            Definition::new("Widget").property("lable", PropertyValue::string("x")),
        )
        .build()
        .unwrap();

    let err = container.get("widget").unwrap_err();
    let message = err.to_string();
    assert!(message.contains("did you mean"), "got: {message}");
    assert!(message.contains("label"), "got: {message}");
}

#[test]
fn optional_assignments_to_unknown_properties_are_skipped() {
    let container = Container::builder()
        .register_type("Widget", widget_descriptor())
        .definition(
            "widget",
            Definition::new("Widget")
                .property_optional("colour", PropertyValue::string("red"))
                .property("label", PropertyValue::string("kept")),
        )
        .build()
        .unwrap();

    let widget: Arc<Widget> = container.get_as("widget").unwrap();
    assert_eq!(*widget.label.lock().unwrap(), "kept");
}

#[test]
fn preinstantiation_skips_lazy_abstract_and_prototype_definitions() {
    let container = Container::builder()
        .register_type("Widget", widget_descriptor())
        .definition("eager", Definition::new("Widget"))
        .definition("sleepy", Definition::new("Widget").lazy())
        .definition("proto", Definition::new("Widget").prototype())
        .definition("tmpl", Definition::new("Widget").abstract_template())
        .build()
        .unwrap();

    container.preinstantiate_singletons().unwrap();
    assert_eq!(container.singleton_names(), vec!["eager"]);
}

#[derive(Default)]
struct Service {
    name: Mutex<String>,
}

#[test]
fn destruction_visits_dependents_before_their_dependencies() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let named = Arc::clone(&log);
    let descriptor = TypeDescriptor::builder::<Service>()
        .constructor(Service::default)
        .on_name(|service: &Service, name| *service.name.lock().unwrap() = name.to_string())
        .callback("shutdown", move |service: &Service| {
            named.lock().unwrap().push(service.name.lock().unwrap().clone());
            Ok(())
        })
        .build();

    let container = Container::builder()
        .register_type("Service", descriptor)
        .definition("store", Definition::new("Service").destroy("shutdown"))
        .definition(
            "service",
            Definition::new("Service").depends_on("store").destroy("shutdown"),
        )
        .build()
        .unwrap();

    container.get("service").unwrap();
    let failures = container.destroy_singletons();
    assert!(failures.is_empty());
    assert_eq!(*log.lock().unwrap(), vec!["service", "store"]);
    assert!(container.singleton_names().is_empty());
}

#[test]
fn custom_scopes_are_unsupported() {
    let container = Container::builder()
        .register_type("Widget", widget_descriptor())
        .definition(
            "widget",
            Definition::new("Widget").scope(Scope::Custom("request".into())),
        )
        .build()
        .unwrap();

    let err = container.get("widget").unwrap_err();
    assert!(matches!(
        err,
        ResolveError::UnsupportedScope { scope, .. } if scope == "request"
    ));
}

#[derive(Default)]
struct Outer {
    inner: Mutex<Option<Arc<Widget>>>,
}

#[test]
fn nested_definitions_are_constructed_with_their_containing_object() {
    let descriptor = TypeDescriptor::builder::<Outer>()
        .constructor(Outer::default)
        .property("inner", TypeInfo::of::<Widget>(), |outer: &Outer, value| {
            if let Some(handle) = value.as_object() {
                if let Ok(widget) = handle.downcast::<Widget>() {
                    *outer.inner.lock().unwrap() = Some(widget);
                }
            }
            Ok(())
        })
        .build();

    let container = Container::builder()
        .register_type("Outer", descriptor)
        .register_type("Widget", widget_descriptor())
        .definition(
            "outer",
            Definition::new("Outer").property(
                "inner",
                PropertyValue::inner(
                    Definition::new("Widget").property("label", PropertyValue::string("nested")),
                ),
            ),
        )
        .build()
        .unwrap();

    let outer: Arc<Outer> = container.get_as("outer").unwrap();
    let inner = outer.inner.lock().unwrap().clone().unwrap();
    assert_eq!(*inner.label.lock().unwrap(), "nested");
}

struct Server {
    port: i64,
}

#[test]
fn factories_receive_resolved_and_converted_arguments() {
    let descriptor = TypeDescriptor::builder::<Server>()
        .factory("with_port", |args| match args {
            [Value::Int(port)] => Ok(Server { port: *port }),
            other => Err(format!("unexpected arguments: {other:?}").into()),
        })
        .build();

    let container = Container::builder()
        .register_type("Server", descriptor)
        .definition(
            "server",
            Definition::new("Server")
                .factory("with_port")
                .constructor_arg(0, PropertyValue::typed_string("8080", TypeInfo::of::<i64>())),
        )
        .build()
        .unwrap();

    let server: Arc<Server> = container.get_as("server").unwrap();
    assert_eq!(server.port, 8080);
}

#[test]
fn get_as_reports_the_actual_type_on_mismatch() {
    let container = Container::builder()
        .register_type("Widget", widget_descriptor())
        .definition("widget", Definition::new("Widget"))
        .build()
        .unwrap();

    let err = container.get_as::<String>("widget").unwrap_err();
    assert!(matches!(
        err,
        ResolveError::Downcast { actual_type, .. } if actual_type.contains("Widget")
    ));
}

#[derive(Default)]
struct Aware {
    container: Mutex<Option<Container>>,
}

#[test]
fn context_injection_hands_out_a_usable_container() {
    let descriptor = TypeDescriptor::builder::<Aware>()
        .constructor(Aware::default)
        .on_context(|aware: &Aware, handle| {
            if let Ok(container) = handle.downcast::<Container>() {
                *aware.container.lock().unwrap() = Some((*container).clone());
            }
        })
        .build();

    let container = Container::builder()
        .register_type("Aware", descriptor)
        .register_type("Widget", widget_descriptor())
        .definition("aware", Definition::new("Aware"))
        .definition("widget", Definition::new("Widget"))
        .build()
        .unwrap();

    let aware: Arc<Aware> = container.get_as("aware").unwrap();
    let injected = aware.container.lock().unwrap().clone().unwrap();
    injected.get("widget").unwrap();
}

#[test]
fn unknown_names_are_not_found() {
    let container = Container::builder().build().unwrap();
    let err = container.get("ghost").unwrap_err();
    assert!(matches!(
        err,
        ResolveError::Definition(DefinitionError::NotFound(name)) if name == "ghost"
    ));
}

#[test]
fn manually_registered_singletons_are_served_without_a_definition() {
    let container = Container::builder().build().unwrap();
    container
        .register_singleton("answer", ObjectHandle::new(41_i64))
        .unwrap();

    let answer = container.get("answer").unwrap();
    assert_eq!(*answer.downcast::<i64>().unwrap(), 41);

    let err = container
        .register_singleton("answer", ObjectHandle::new(0_i64))
        .unwrap_err();
    assert!(matches!(err, RegistryError::AlreadyRegistered(_)));
}
