//! Manifest-driven component definitions.
//!
//! A [`ComponentDefinition`] turns a kind name, a manifest and a render
//! function into the full export surface of that kind. Instance props live
//! in a [`ReactiveObject`] on the runtime's scheduler; its commit
//! notification marks the instance dirty and asks the runtime for a render,
//! and `render_component` only runs the render function for dirty (or
//! never-rendered) instances.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use serde_json::{Map, Value as Json};

use super::{member, receive_value, send_json, send_str};
use crate::bridge::{arg, Handle, Module, Runtime, Word, DISPATCH_BOUND_CALLBACK, NULL_HANDLE};
use crate::config::RuntimeConfig;
use crate::error::{Result, RuntimeError};
use crate::reactive::{CoerceContext, ReactiveObject};
use crate::types::{ObjectSchema, Value, ValueKind};

/// Renders one instance into its attached node.
pub type RenderFn = Rc<dyn Fn(&mut Runtime, &RenderContext) -> Result<()>>;

type BoundCallback = Rc<dyn Fn(&mut Runtime) -> Result<()>>;

#[derive(Default)]
struct CallbackRegistry {
    next: Word,
    entries: HashMap<Word, BoundCallback>,
}

impl CallbackRegistry {
    fn register(&mut self, callback: BoundCallback) -> Word {
        let token = self.next;
        self.next += 1;
        self.entries.insert(token, callback);
        token
    }
}

// =============================================================================
// GuestModule
// =============================================================================

/// Builds a [`Module`] from component definitions.
///
/// Owns the module-wide `dispatch_bound_callback` export that event
/// handlers created with [`RenderContext::handler`] run through.
pub struct GuestModule {
    module: Module,
    config: RuntimeConfig,
    callbacks: Rc<RefCell<CallbackRegistry>>,
}

impl Default for GuestModule {
    fn default() -> Self {
        Self::new()
    }
}

impl GuestModule {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Export names follow `config`'s separator, which must match the
    /// runtime loading the module.
    pub fn with_config(config: RuntimeConfig) -> Self {
        let callbacks = Rc::new(RefCell::new(CallbackRegistry::default()));
        let mut module = Module::new();
        let registry = callbacks.clone();
        module.export(DISPATCH_BOUND_CALLBACK, move |rt, args| {
            let token = arg(args, 0);
            let callback = registry
                .borrow()
                .entries
                .get(&token)
                .cloned()
                .ok_or_else(|| RuntimeError::ModuleFault(format!("unknown callback token {token}")))?;
            callback(rt)?;
            Ok(0)
        });
        Self { module, config, callbacks }
    }

    pub fn define(&mut self, definition: ComponentDefinition) -> &mut Self {
        definition.register(&mut self.module, &self.config, &self.callbacks);
        self
    }

    pub fn finish(self) -> Module {
        self.module
    }
}

// =============================================================================
// ComponentDefinition
// =============================================================================

/// One component kind as the module defines it.
pub struct ComponentDefinition {
    name: String,
    manifest: ObjectSchema,
    render: RenderFn,
}

impl ComponentDefinition {
    pub fn new(
        name: impl Into<String>,
        manifest: ObjectSchema,
        render: impl Fn(&mut Runtime, &RenderContext) -> Result<()> + 'static,
    ) -> Self {
        Self { name: name.into(), manifest, render: Rc::new(render) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn manifest(&self) -> &ObjectSchema {
        &self.manifest
    }

    fn register(self, module: &mut Module, config: &RuntimeConfig, callbacks: &Rc<RefCell<CallbackRegistry>>) {
        let export = |entry: &str| config.export_name(&self.name, entry);
        // Callback props are handles, not reactive state.
        let state_schema = ObjectSchema::new(
            self.manifest
                .iter()
                .filter(|(_, kind)| **kind != ValueKind::Callback)
                .map(|(key, kind)| (key.to_string(), kind.clone())),
        );
        let manifest_text = self.manifest.to_json().to_string();
        let kind = Rc::new(KindState {
            name: Rc::from(self.name.as_str()),
            manifest: self.manifest.clone(),
            state_schema: Rc::new(state_schema),
            render: self.render.clone(),
            instances: RefCell::new(Vec::new()),
            callbacks: callbacks.clone(),
        });

        module.export(export("get_props_manifest"), move |rt, _| {
            let handle = send_str(rt, &manifest_text)?;
            if handle != NULL_HANDLE {
                rt.drop_handle(handle)?;
            }
            Ok(0)
        });
        let k = kind.clone();
        module.export(export("new_component"), move |rt, args| k.construct(rt, arg(args, 0)));
        let k = kind.clone();
        module.export(export("attach_to_node"), move |_, args| {
            k.with_instance(arg(args, 0), |instance| instance.node = Some(arg(args, 1)))?;
            Ok(0)
        });
        let k = kind.clone();
        module.export(export("update_component"), move |_, args| {
            k.update(arg(args, 0))?;
            Ok(0)
        });
        let k = kind.clone();
        module.export(export("render_component"), move |rt, args| {
            k.render(rt, arg(args, 0))?;
            Ok(0)
        });

        for (key, value_kind) in self.manifest.iter() {
            let (k, name) = (kind.clone(), key.to_string());
            match value_kind {
                ValueKind::Callback => {
                    module.export(export(&format!("set_{key}")), move |rt, args| {
                        k.set_callback(rt, arg(args, 0), &name, arg(args, 1))?;
                        Ok(0)
                    });
                    let (k, name) = (kind.clone(), key.to_string());
                    module.export(export(&format!("call_{key}")), move |rt, args| {
                        k.props(arg(args, 0))?.call(rt, &name)?;
                        Ok(0)
                    });
                }
                _ => {
                    module.export(export(&format!("set_{key}")), move |rt, args| {
                        k.set_value(rt, arg(args, 0), &name, arg(args, 1))?;
                        Ok(0)
                    });
                    let (k, name) = (kind.clone(), key.to_string());
                    module.export(export(&format!("get_{key}")), move |rt, args| {
                        k.get_value(rt, arg(args, 0), &name)
                    });
                }
            }
            if let ValueKind::Iter(item) = value_kind {
                let (k, name) = (kind.clone(), key.to_string());
                module.export(export(&format!("get_index_{key}")), move |rt, args| {
                    k.get_index(rt, arg(args, 0), &name, arg(args, 1))
                });
                let (k, name, item) = (kind.clone(), key.to_string(), (**item).clone());
                module.export(export(&format!("set_index_{key}")), move |rt, args| {
                    k.set_index(rt, arg(args, 0), &name, &item, arg(args, 1), arg(args, 2))?;
                    Ok(0)
                });
            }
        }
        tracing::debug!(kind = %self.name, exports = module.len(), "component defined");
    }
}

impl fmt::Debug for ComponentDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentDefinition")
            .field("name", &self.name)
            .field("manifest", &self.manifest.to_json())
            .finish()
    }
}

// =============================================================================
// Instances
// =============================================================================

struct GuestInstance {
    props: Props,
    node: Option<Handle>,
    dirty: Rc<Cell<bool>>,
    rendered: bool,
    /// Event handler handles by name, stable across renders.
    bound: Rc<RefCell<HashMap<String, Handle>>>,
}

struct KindState {
    name: Rc<str>,
    manifest: ObjectSchema,
    state_schema: Rc<ObjectSchema>,
    render: RenderFn,
    instances: RefCell<Vec<GuestInstance>>,
    callbacks: Rc<RefCell<CallbackRegistry>>,
}

impl KindState {
    fn with_instance<R>(&self, reference: Word, f: impl FnOnce(&mut GuestInstance) -> R) -> Result<R> {
        let mut instances = self.instances.borrow_mut();
        let instance = instances
            .get_mut(reference as usize)
            .ok_or(RuntimeError::UnknownInstance(reference as usize))?;
        Ok(f(instance))
    }

    fn props(&self, reference: Word) -> Result<Props> {
        self.with_instance(reference, |instance| instance.props.clone())
    }

    /// Read the sanitized props object into fresh instance state.
    /// Consumes `input`.
    fn construct(&self, rt: &mut Runtime, input: Handle) -> Result<Word> {
        let mut raw = Map::new();
        let mut callbacks = IndexMap::new();
        for (key, kind) in self.manifest.iter() {
            let field = member(rt, input, key)?;
            if field == NULL_HANDLE {
                continue;
            }
            if *kind == ValueKind::Callback {
                callbacks.insert(key.to_string(), field);
                continue;
            }
            let value = receive_value(rt, field, kind);
            rt.drop_handle(field)?;
            raw.insert(key.to_string(), value?);
        }
        rt.drop_handle(input)?;

        let ctx = CoerceContext::scheduled(rt.scheduler().clone());
        let state = ReactiveObject::from_raw(self.state_schema.clone(), &Json::Object(raw), &ctx)?;
        let reference = self.instances.borrow().len() as Word;
        let dirty = Rc::new(Cell::new(false));
        let (flag, requests, name) = (dirty.clone(), rt.render_requests().clone(), self.name.clone());
        state.set_on_commit(move || {
            flag.set(true);
            requests.request(&name, reference);
        });

        self.instances.borrow_mut().push(GuestInstance {
            props: Props { state, callbacks: Rc::new(RefCell::new(callbacks)) },
            node: None,
            dirty,
            rendered: false,
            bound: Rc::new(RefCell::new(HashMap::new())),
        });
        Ok(reference)
    }

    fn update(&self, reference: Word) -> Result<()> {
        self.props(reference)?.state.commit()?;
        Ok(())
    }

    fn render(self: &Rc<Self>, rt: &mut Runtime, reference: Word) -> Result<()> {
        let pending = self.with_instance(reference, |instance| {
            let node = instance.node?;
            if instance.rendered && !instance.dirty.get() {
                return None;
            }
            instance.dirty.set(false);
            instance.rendered = true;
            Some((node, instance.props.clone(), instance.bound.clone()))
        })?;
        let Some((node, props, bound)) = pending else {
            return Ok(());
        };
        rt.render_requests().withdraw(&self.name, reference);

        let ctx = RenderContext {
            kind: Rc::downgrade(self),
            callbacks: self.callbacks.clone(),
            instance: reference,
            props,
            node,
            bound,
        };
        (self.render)(rt, &ctx)
    }

    /// Commit and re-render after an event handler ran.
    fn refresh(self: &Rc<Self>, rt: &mut Runtime, reference: Word) -> Result<()> {
        self.update(reference)?;
        self.render(rt, reference)
    }

    fn get_value(&self, rt: &mut Runtime, reference: Word, key: &str) -> Result<Word> {
        let value = self.props(reference)?.state.get(key)?;
        let json = match value.sequence_items() {
            Some(items) => Json::Array(items?.iter().map(Value::flatten).collect()),
            None => value.flatten(),
        };
        send_json(rt, &json)
    }

    /// Consumes `handle`.
    fn set_value(&self, rt: &mut Runtime, reference: Word, key: &str, handle: Handle) -> Result<()> {
        let kind = self
            .manifest
            .get(key)
            .ok_or_else(|| RuntimeError::UnknownProperty(key.to_string()))?;
        let value = receive_value(rt, handle, kind);
        rt.drop_handle(handle)?;
        self.props(reference)?.state.set(key, &value?)
    }

    fn get_index(&self, rt: &mut Runtime, reference: Word, key: &str, index: Word) -> Result<Word> {
        let value = self.props(reference)?.state.get(key)?;
        let element = match value.sequence_items() {
            Some(items) => items?.get(index as usize).map(Value::flatten),
            None => None,
        };
        match element {
            Some(element) => send_json(rt, &element),
            None => Ok(NULL_HANDLE),
        }
    }

    /// Consumes `handle`. Counted sequences have nothing to write to.
    fn set_index(
        &self,
        rt: &mut Runtime,
        reference: Word,
        key: &str,
        item: &ValueKind,
        index: Word,
        handle: Handle,
    ) -> Result<()> {
        let value = receive_value(rt, handle, item);
        rt.drop_handle(handle)?;
        let value = value?;
        match self.props(reference)?.state.get(key)? {
            Value::Collection(collection) => {
                collection.set(index as usize, &value)?;
            }
            other => tracing::debug!(key, kind = other.kind_name(), "element write to counted sequence ignored"),
        }
        Ok(())
    }

    /// Replace a callback prop. Consumes `handle`; null clears it.
    fn set_callback(&self, rt: &mut Runtime, reference: Word, key: &str, handle: Handle) -> Result<()> {
        if handle != NULL_HANDLE && !rt.is_function(handle)? {
            rt.drop_handle(handle)?;
            return Ok(());
        }
        let props = self.props(reference)?;
        let previous = if handle == NULL_HANDLE {
            props.callbacks.borrow_mut().shift_remove(key)
        } else {
            props.callbacks.borrow_mut().insert(key.to_string(), handle)
        };
        if let Some(previous) = previous.filter(|previous| *previous != handle) {
            rt.drop_handle(previous)?;
        }
        Ok(())
    }
}

// =============================================================================
// Props and render context
// =============================================================================

/// An instance's props: reactive state plus callback handles.
#[derive(Clone)]
pub struct Props {
    state: ReactiveObject,
    callbacks: Rc<RefCell<IndexMap<String, Handle>>>,
}

impl Props {
    pub fn state(&self) -> &ReactiveObject {
        &self.state
    }

    /// Flattened visible value.
    pub fn get(&self, key: &str) -> Result<Json> {
        self.state.get_flat(key)
    }

    pub fn value(&self, key: &str) -> Result<Value> {
        self.state.get(key)
    }

    /// Stage a write; it commits on the next frame, which also re-renders
    /// the instance.
    pub fn set(&self, key: &str, raw: &Json) -> Result<()> {
        self.state.set(key, raw)
    }

    pub fn has_callback(&self, key: &str) -> bool {
        self.callbacks.borrow().contains_key(key)
    }

    /// Invoke a callback prop. Returns false if none is set.
    pub fn call(&self, rt: &mut Runtime, key: &str) -> Result<bool> {
        let Some(handle) = self.callbacks.borrow().get(key).copied() else {
            return Ok(false);
        };
        let result = rt.call_function(handle)?;
        rt.drop_handle(result)?;
        Ok(true)
    }
}

impl fmt::Debug for Props {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Props")
            .field("state", &self.state.flatten())
            .field("callbacks", &self.callbacks.borrow().keys().collect::<Vec<_>>())
            .finish()
    }
}

/// What a render function sees for one instance.
pub struct RenderContext {
    kind: Weak<KindState>,
    callbacks: Rc<RefCell<CallbackRegistry>>,
    instance: Word,
    props: Props,
    node: Handle,
    bound: Rc<RefCell<HashMap<String, Handle>>>,
}

impl RenderContext {
    pub fn props(&self) -> &Props {
        &self.props
    }

    /// Handle of the node the instance is attached to.
    pub fn node(&self) -> Handle {
        self.node
    }

    /// Function handle for an event handler named `name`.
    ///
    /// The first render binds `f`; later renders get the same handle back
    /// (and `f` is ignored), so rebinding it to an event is a no-op. After
    /// the handler runs, the instance commits and re-renders if dirty.
    pub fn handler(
        &self,
        rt: &mut Runtime,
        name: &str,
        f: impl Fn(&mut Runtime, &Props) -> Result<()> + 'static,
    ) -> Handle {
        if let Some(handle) = self.bound.borrow().get(name) {
            return *handle;
        }
        let (kind, props, reference) = (self.kind.clone(), self.props.clone(), self.instance);
        let callback: BoundCallback = Rc::new(move |rt: &mut Runtime| {
            f(rt, &props)?;
            match kind.upgrade() {
                Some(kind) => kind.refresh(rt, reference),
                None => Ok(()),
            }
        });
        let token = self.callbacks.borrow_mut().register(callback);
        let handle = rt.bind_callback(token);
        self.bound.borrow_mut().insert(name.to_string(), handle);
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::HostValue;
    use crate::guest;
    use serde_json::json;

    fn greeting() -> ComponentDefinition {
        let manifest = ObjectSchema::from_json_str(r#"{"name":"String","on_greet":"Callback"}"#).unwrap();
        ComponentDefinition::new("Greeting", manifest, |rt, ctx| {
            rt.reconcile_begin(ctx.node())?;
            let name = ctx.props().get("name")?;
            let text = format!("hello {}", name.as_str().unwrap_or_default());
            guest::enter(rt, ctx.node(), None, 0, Some(&text))?;
            Ok(())
        })
    }

    #[test]
    fn test_exports_follow_manifest() {
        let mut guest = GuestModule::new();
        guest.define(greeting());
        let module = guest.finish();
        for name in [
            "dispatch_bound_callback",
            "Greeting__get_props_manifest",
            "Greeting__new_component",
            "Greeting__attach_to_node",
            "Greeting__render_component",
            "Greeting__update_component",
            "Greeting__get_name",
            "Greeting__set_name",
            "Greeting__call_on_greet",
            "Greeting__set_on_greet",
        ] {
            assert!(module.contains(name), "missing {name}");
        }
        assert!(!module.contains("Greeting__get_on_greet"));
    }

    #[test]
    fn test_render_skips_clean_instance() {
        let renders = Rc::new(Cell::new(0));
        let count = renders.clone();
        let manifest = ObjectSchema::from_json_str(r#"{"n":"Int"}"#).unwrap();
        let mut guest = GuestModule::new();
        guest.define(ComponentDefinition::new("Tally", manifest, move |_, _| {
            count.set(count.get() + 1);
            Ok(())
        }));
        let mut rt = Runtime::with_module(guest.finish());

        let id = rt.instantiate("Tally", &HostValue::from(json!({ "n": 1 }))).unwrap();
        rt.attach(id, rt.document().root()).unwrap();
        assert_eq!(renders.get(), 1);

        rt.render(id).unwrap();
        assert_eq!(renders.get(), 1);

        rt.set_property(id, "n", &HostValue::from(2.0)).unwrap();
        rt.tick().unwrap();
        assert_eq!(renders.get(), 2);
    }

    #[test]
    fn test_saved_props_write_renders_next_frame() {
        let saved: Rc<RefCell<Option<Props>>> = Rc::default();
        let slot = saved.clone();
        let manifest = ObjectSchema::from_json_str(r#"{"n":"Int"}"#).unwrap();
        let mut guest = GuestModule::new();
        guest.define(ComponentDefinition::new("Label", manifest, move |rt, ctx| {
            slot.replace(Some(ctx.props().clone()));
            rt.reconcile_begin(ctx.node())?;
            let text = ctx.props().get("n")?.to_string();
            guest::enter(rt, ctx.node(), None, 0, Some(&text))?;
            Ok(())
        }));
        let mut rt = Runtime::with_module(guest.finish());
        let root = rt.document().root();
        let id = rt.instantiate("Label", &HostValue::from(json!({ "n": 1 }))).unwrap();
        rt.attach(id, root).unwrap();
        assert!(rt.render_requests().is_empty());
        assert_eq!(rt.document().text_content(root).unwrap(), "1");

        let props = saved.borrow().clone().unwrap();
        props.set("n", &json!(5)).unwrap();
        assert_eq!(rt.tick().unwrap(), 1);
        assert_eq!(rt.document().text_content(root).unwrap(), "5");
        assert_eq!(rt.tick().unwrap(), 0);
    }

    #[test]
    fn test_callback_prop_round_trip() {
        let mut guest = GuestModule::new();
        guest.define(greeting());
        let mut rt = Runtime::with_module(guest.finish());

        let hits = Rc::new(Cell::new(0));
        let seen = hits.clone();
        let on_greet = HostValue::function(move |_, _| {
            seen.set(seen.get() + 1);
            Ok(HostValue::Null)
        });
        let id = rt
            .instantiate("Greeting", &HostValue::object([("name", HostValue::from("ada")), ("on_greet", on_greet)]))
            .unwrap();
        rt.attach(id, rt.document().root()).unwrap();
        assert_eq!(rt.document().text_content(rt.document().root()).unwrap(), "hello ada");

        let callback = rt.get_property(id, "on_greet").unwrap();
        callback.as_callback().unwrap().invoke(&mut rt).unwrap();
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_unknown_token_is_fatal() {
        let mut rt = Runtime::with_module(GuestModule::new().finish());
        assert!(matches!(
            rt.call_export(DISPATCH_BOUND_CALLBACK, &[42]),
            Err(RuntimeError::ModuleFault(_))
        ));
    }
}
