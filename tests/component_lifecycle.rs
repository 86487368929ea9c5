//! Full component lifecycle through a guest-defined module.

use std::cell::Cell;
use std::rc::Rc;

use serde_json::json;
use spark_bridge::guest::{self, ComponentDefinition, GuestModule, RenderContext};
use spark_bridge::{HostValue, Module, NodeId, ObjectSchema, Result, Runtime, RuntimeError, Word};

const COUNTER_MANIFEST: &str = r#"{
    "label": "String",
    "count": "Int",
    "width": "Length",
    "items": ["String"],
    "on_change": "Callback"
}"#;

fn render_counter(rt: &mut Runtime, ctx: &RenderContext) -> Result<()> {
    let node = ctx.node();
    let props = ctx.props();
    let label = props.get("label")?;
    let count = props.get("count")?;

    rt.reconcile_begin(node)?;
    let text = format!("{}: {}", label.as_str().unwrap_or_default(), count);
    guest::enter(rt, node, Some("span"), 0, Some(&text))?;

    let button = guest::enter(rt, node, Some("button"), 1, Some("+"))?;
    let increment = ctx.handler(rt, "increment", |rt, props| {
        let count = props.get("count")?.as_i64().unwrap_or_default();
        props.set("count", &json!(count + 1))?;
        props.call(rt, "on_change")?;
        Ok(())
    });
    guest::bind_event(rt, button, "click", increment)?;

    let width = props.get("width")?;
    guest::set_style(rt, node, "width", width.as_str().unwrap_or_default())?;

    rt.reconcile_begin_group(node, 2)?;
    let items = props.get("items")?.as_array().cloned().unwrap_or_default();
    for (position, item) in items.iter().enumerate() {
        guest::enter(rt, node, Some("li"), position as Word, item.as_str())?;
    }
    rt.reconcile_end_group(node)?;
    Ok(())
}

fn counter_runtime() -> Runtime {
    let manifest = ObjectSchema::from_json_str(COUNTER_MANIFEST).unwrap();
    let mut module = GuestModule::new();
    module.define(ComponentDefinition::new("Counter", manifest, render_counter));
    Runtime::with_module(module.finish())
}

fn mounted_counter(props: impl Into<HostValue>) -> (Runtime, spark_bridge::InstanceId, NodeId) {
    let mut rt = counter_runtime();
    let id = rt.instantiate("Counter", &props.into()).unwrap();
    let root = rt.document().root();
    rt.attach(id, root).unwrap();
    (rt, id, root)
}

/// Props literal plus an `on_change` function counting its calls by `step`.
fn with_on_change(props: serde_json::Value, calls: &Rc<Cell<u32>>, step: u32) -> HostValue {
    let seen = calls.clone();
    let mut props = HostValue::from(props);
    if let HostValue::Object(map) = &mut props {
        let on_change = HostValue::function(move |_, _| {
            seen.set(seen.get() + step);
            Ok(HostValue::Null)
        });
        map.insert("on_change".to_string(), on_change);
    }
    props
}

fn child_text(rt: &Runtime, parent: NodeId, index: usize) -> String {
    let child = rt.document().children(parent).unwrap()[index];
    rt.document().text_content(child).unwrap()
}

fn property(rt: &mut Runtime, id: spark_bridge::InstanceId, key: &str) -> serde_json::Value {
    rt.get_property(id, key).unwrap().into_value().unwrap().to_json()
}

#[test]
fn test_load_caches_kind() {
    let mut rt = counter_runtime();
    let first = rt.load_component("Counter").unwrap();
    let second = rt.load_component("Counter").unwrap();
    assert!(Rc::ptr_eq(&first, &second));
    assert_eq!(first.name(), "Counter");

    let keys: Vec<&str> = first.manifest().iter().map(|(key, _)| key).collect();
    assert_eq!(keys, ["label", "count", "width", "items", "on_change"]);
}

#[test]
fn test_missing_export_fails_load() {
    let mut module = Module::new();
    module.export("Broken__new_component", |_, _| Ok(0));
    let mut rt = Runtime::with_module(module);

    assert_eq!(
        rt.load_component("Broken").unwrap_err(),
        RuntimeError::InvalidComponent {
            kind: "Broken".to_string(),
            export: "Broken__attach_to_node".to_string(),
        }
    );
    assert!(matches!(
        rt.instantiate("Nope", &HostValue::Null),
        Err(RuntimeError::InvalidComponent { .. })
    ));
}

#[test]
fn test_construction_drops_invalid_props() {
    let (mut rt, id, _) = mounted_counter(json!({ "label": "Clicks", "count": true, "bogus": 1 }));
    assert_eq!(property(&mut rt, id, "label"), json!("Clicks"));
    assert_eq!(property(&mut rt, id, "count"), json!(0));
}

#[test]
fn test_attach_renders_once() {
    let (rt, id, root) = mounted_counter(json!({ "label": "Clicks", "count": 2, "width": 10 }));
    assert_eq!(rt.instance_node(id).unwrap(), Some(root));
    assert_eq!(rt.document().children(root).unwrap().len(), 2);
    assert_eq!(child_text(&rt, root, 0), "Clicks: 2");
    assert_eq!(child_text(&rt, root, 1), "+");
    assert_eq!(rt.document().style(root, "width").unwrap(), Some("10px"));
}

#[test]
fn test_writes_coalesce_into_one_render() {
    let (mut rt, id, root) = mounted_counter(json!({ "label": "n" }));
    rt.document_mut().reset_stats();

    rt.set_property(id, "count", &HostValue::from(5.0)).unwrap();
    rt.set_property(id, "count", &HostValue::from(6.0)).unwrap();
    assert_eq!(rt.pending_renders(), 1);
    assert_eq!(child_text(&rt, root, 0), "n: 0");

    assert_eq!(rt.tick().unwrap(), 1);
    assert_eq!(child_text(&rt, root, 0), "n: 6");
    assert_eq!(property(&mut rt, id, "count"), json!(6));

    let stats = rt.document().stats();
    assert_eq!((stats.created, stats.removed), (0, 0));
    assert_eq!(rt.tick().unwrap(), 0);
}

#[test]
fn test_invalid_write_is_dropped() {
    let (mut rt, id, _) = mounted_counter(json!({ "label": "n", "count": 3 }));
    rt.set_property(id, "label", &HostValue::from(4.0)).unwrap();
    rt.set_property(id, "missing", &HostValue::from("x")).unwrap();
    assert_eq!(rt.pending_renders(), 0);
    assert_eq!(property(&mut rt, id, "label"), json!("n"));
}

#[test]
fn test_sequence_property() {
    let (mut rt, id, root) = mounted_counter(json!({ "items": ["a", "b", "c"] }));
    assert_eq!(rt.document().children(root).unwrap().len(), 5);

    let items = rt.get_property(id, "items").unwrap();
    let items = items.as_sequence().unwrap();
    let values: Vec<_> = items.to_vec(&mut rt).unwrap().iter().map(HostValue::to_json).collect();
    assert_eq!(values, [json!("a"), json!("b"), json!("c")]);
    assert!(items.get(&mut rt, 9).unwrap().is_null());

    items.set(&mut rt, 1, HostValue::from("B")).unwrap();
    items.set(&mut rt, 2, HostValue::from(7.0)).unwrap();
    rt.tick().unwrap();
    assert_eq!(child_text(&rt, root, 3), "B");
    assert_eq!(child_text(&rt, root, 4), "c");
}

#[test]
fn test_group_shrinks_on_shorter_list() {
    let (mut rt, id, root) = mounted_counter(json!({ "items": ["a", "b", "c"] }));
    rt.document_mut().reset_stats();

    rt.set_property(id, "items", &HostValue::from(json!(["x"]))).unwrap();
    rt.tick().unwrap();

    let stats = rt.document().stats();
    assert_eq!((stats.created, stats.removed), (0, 2));
    assert_eq!(rt.document().children(root).unwrap().len(), 3);
    assert_eq!(child_text(&rt, root, 2), "x");
}

#[test]
fn test_list_cycles_reuse_nodes_and_handles() {
    let items = json!(["a", "b", "c", "d"]);
    let (mut rt, id, root) = mounted_counter(json!({ "items": items.clone() }));
    rt.document_mut().reset_stats();
    let live = rt.handles().live();

    for cycle in 0..20 {
        let next = if cycle % 2 == 0 { json!([]) } else { items.clone() };
        rt.set_property(id, "items", &HostValue::from(next)).unwrap();
        rt.tick().unwrap();
    }

    assert_eq!(rt.document().stats().created, 0);
    assert_eq!(rt.handles().live(), live);
    assert_eq!(rt.document().children(root).unwrap().len(), 6);
}

#[test]
fn test_event_runs_handler_and_callback() {
    let changes = Rc::new(Cell::new(0));
    let (mut rt, id, root) = mounted_counter(with_on_change(json!({ "label": "c" }), &changes, 1));

    let button = rt.document().children(root).unwrap()[1];
    let listener = rt.document().listener(button, "click").unwrap().cloned().unwrap();

    assert!(rt.dispatch_event(button, "click").unwrap());
    assert!(rt.dispatch_event(button, "click").unwrap());
    assert_eq!(changes.get(), 2);
    assert_eq!(child_text(&rt, root, 0), "c: 2");
    assert_eq!(property(&mut rt, id, "count"), json!(2));

    let rebound = rt.document().listener(button, "click").unwrap().cloned().unwrap();
    assert!(Rc::ptr_eq(&listener, &rebound));
    assert_eq!(rt.document().listener_count(button).unwrap(), 1);

    let span = rt.document().children(root).unwrap()[0];
    assert!(!rt.dispatch_event(span, "click").unwrap());
}

#[test]
fn test_callback_property_invokes_prop() {
    let changes = Rc::new(Cell::new(0));
    let (mut rt, id, _) = mounted_counter(with_on_change(json!({}), &changes, 1));

    let callback = rt.get_property(id, "on_change").unwrap();
    let callback = callback.as_callback().unwrap();
    callback.invoke(&mut rt).unwrap();
    assert_eq!(changes.get(), 1);

    // Not a function: dropped, the old callback stays.
    rt.set_property(id, "on_change", &HostValue::Null).unwrap();
    callback.invoke(&mut rt).unwrap();
    assert_eq!(changes.get(), 2);

    let replacement = with_on_change(json!({}), &changes, 10);
    let function = replacement.property("on_change").cloned().unwrap();
    rt.set_property(id, "on_change", &function).unwrap();
    callback.invoke(&mut rt).unwrap();
    assert_eq!(changes.get(), 12);
}
