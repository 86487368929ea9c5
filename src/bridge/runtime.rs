//! The runtime session.
//!
//! One `Runtime` owns everything a page of components shares: the handle
//! table, linear memory and string staging slot, loaded component kinds,
//! instances and their render queue, the frame scheduler, and the document
//! with its reconciler. Nothing lives in globals; dropping the runtime tears
//! it all down.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};

use super::component::{
    CallbackProperty, ComponentInstance, ComponentKind, InstanceId, Lifecycle, Property, PropertyExports,
    Resolver, SequenceProperty,
};
use super::handles::{Handle, HandleTable};
use super::host_value::{HostFunction, HostValue};
use super::manifest::{sanitize, sanitize_props};
use super::memory::LinearMemory;
use super::module::{ExportFn, Module, Word};
use crate::config::RuntimeConfig;
use crate::error::{Result, RuntimeError};
use crate::reactive::FrameScheduler;
use crate::reconciler::{Document, NodeId, Reconciler};
use crate::types::{ObjectSchema, ValueKind};

/// Renders requested from inside the module, keyed by kind name and the
/// instance reference its constructor returned.
///
/// Module state whose commit happens outside a host call (a debounced
/// commit on the frame scheduler, say) queues its instance here; the next
/// [`Runtime::tick`] turns the requests into renders. Cloning shares the queue.
#[derive(Clone, Default)]
pub struct RenderRequests {
    queue: Rc<RefCell<IndexSet<(Rc<str>, Word)>>>,
}

impl RenderRequests {
    pub fn request(&self, kind: &Rc<str>, reference: Word) {
        self.queue.borrow_mut().insert((kind.clone(), reference));
    }

    /// Drop a request the module has already served. Returns whether one was queued.
    pub fn withdraw(&self, kind: &str, reference: Word) -> bool {
        self.queue.borrow_mut().shift_remove(&(Rc::<str>::from(kind), reference))
    }

    pub fn len(&self) -> usize {
        self.queue.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }

    fn drain(&self) -> IndexSet<(Rc<str>, Word)> {
        std::mem::take(&mut *self.queue.borrow_mut())
    }
}

impl fmt::Debug for RenderRequests {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderRequests").field("pending", &self.len()).finish()
    }
}

/// Host side of a module session.
pub struct Runtime {
    config: RuntimeConfig,
    module: Rc<Module>,
    pub(crate) handles: HandleTable,
    pub(crate) memory: LinearMemory,
    /// Encoded string waiting for `load_string`.
    pub(crate) staged: Option<Vec<u8>>,
    /// Set while a string is being received instead of boxed.
    pub(crate) receiver: Option<Option<String>>,
    kinds: IndexMap<String, Rc<ComponentKind>>,
    instances: Vec<ComponentInstance>,
    render_queue: IndexSet<InstanceId>,
    requests: RenderRequests,
    scheduler: FrameScheduler,
    pub(crate) document: Document<HostFunction>,
    pub(crate) reconciler: Reconciler,
}

impl Runtime {
    pub fn new(module: Module, config: RuntimeConfig) -> Self {
        Self {
            handles: HandleTable::with_capacity(config.initial_handle_capacity),
            memory: LinearMemory::new(config.memory_pages),
            config,
            module: Rc::new(module),
            staged: None,
            receiver: None,
            kinds: IndexMap::new(),
            instances: Vec::new(),
            render_queue: IndexSet::new(),
            requests: RenderRequests::default(),
            scheduler: FrameScheduler::new(),
            document: Document::new(),
            reconciler: Reconciler::new(),
        }
    }

    /// Runtime with the default configuration.
    pub fn with_module(module: Module) -> Self {
        Self::new(module, RuntimeConfig::default())
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn handles(&self) -> &HandleTable {
        &self.handles
    }

    pub fn memory(&self) -> &LinearMemory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut LinearMemory {
        &mut self.memory
    }

    pub fn document(&self) -> &Document<HostFunction> {
        &self.document
    }

    pub fn document_mut(&mut self) -> &mut Document<HostFunction> {
        &mut self.document
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Scheduler driving debounced commits. Module state attaches here.
    pub fn scheduler(&self) -> &FrameScheduler {
        &self.scheduler
    }

    /// Queue the module raises renders on.
    pub fn render_requests(&self) -> &RenderRequests {
        &self.requests
    }

    /// Box a host value and return its handle.
    pub fn allocate(&mut self, value: HostValue) -> Handle {
        self.handles.insert(value)
    }

    /// Release a handle and return its value.
    pub fn take(&mut self, handle: Handle) -> Result<HostValue> {
        self.handles.release(handle)
    }

    // =========================================================================
    // Calls across the boundary
    // =========================================================================

    fn invoke(&mut self, entry: &ExportFn, args: &[Word]) -> Result<Word> {
        let entry = entry.clone();
        entry(self, args)
    }

    /// Call a module export by full name.
    pub fn call_export(&mut self, name: &str, args: &[Word]) -> Result<Word> {
        let entry = self
            .module
            .get(name)
            .ok_or_else(|| RuntimeError::MissingExport(name.to_string()))?;
        entry(self, args)
    }

    /// Call a host function value directly.
    pub fn call_host(&mut self, function: &HostFunction, args: &[HostValue]) -> Result<HostValue> {
        let function = function.clone();
        function(self, args)
    }

    /// Run `entry` with string-send redirected, returning what it sent.
    fn receive_string_from(&mut self, entry: &ExportFn) -> Result<Option<String>> {
        self.receiver = Some(None);
        let result = self.invoke(entry, &[]);
        let received = self.receiver.take().flatten();
        result?;
        Ok(received)
    }

    // =========================================================================
    // Component kinds
    // =========================================================================

    /// Resolve a component kind by name, caching it for later loads.
    ///
    /// Fails with [`RuntimeError::InvalidComponent`] when any entry point
    /// the kind needs is missing.
    pub fn load_component(&mut self, name: &str) -> Result<Rc<ComponentKind>> {
        if let Some(kind) = self.kinds.get(name) {
            return Ok(kind.clone());
        }

        let module = self.module.clone();
        let config = self.config.clone();
        let resolver = Resolver { kind: name, module: &module, config: &config };
        let lifecycle = Lifecycle::resolve(&resolver)?;
        let manifest_entry = resolver.require("get_props_manifest")?;

        let text = self
            .receive_string_from(&manifest_entry)?
            .ok_or_else(|| RuntimeError::InvalidManifest(format!("{name} sent no manifest")))?;
        let manifest = ObjectSchema::from_json_str(&text)?;

        let kind = Rc::new(ComponentKind::resolve(&resolver, manifest, lifecycle)?);
        tracing::debug!(kind = name, properties = kind.manifest().len(), "component kind loaded");
        self.kinds.insert(name.to_string(), kind.clone());
        Ok(kind)
    }

    pub fn loaded_kinds(&self) -> impl Iterator<Item = &str> {
        self.kinds.keys().map(String::as_str)
    }

    // =========================================================================
    // Instances
    // =========================================================================

    fn instance(&self, id: InstanceId) -> Result<&ComponentInstance> {
        self.instances.get(id.0).ok_or(RuntimeError::UnknownInstance(id.0))
    }

    pub fn instance_kind(&self, id: InstanceId) -> Result<Rc<ComponentKind>> {
        Ok(self.instance(id)?.kind.clone())
    }

    pub fn instance_node(&self, id: InstanceId) -> Result<Option<NodeId>> {
        Ok(self.instance(id)?.node)
    }

    /// Construct a component from raw props.
    ///
    /// The props are sanitized against the manifest first; whatever does not
    /// fit is dropped without error.
    pub fn instantiate(&mut self, kind: &str, props: &HostValue) -> Result<InstanceId> {
        let kind = self.load_component(kind)?;
        let sanitized = sanitize_props(props, kind.manifest());
        let props = self.handles.insert(sanitized);
        let reference = self.invoke(&kind.lifecycle.new_component, &[props])?;

        let id = InstanceId(self.instances.len());
        self.instances.push(ComponentInstance { kind, reference, node: None });
        tracing::debug!(instance = id.0, reference, "component constructed");
        Ok(id)
    }

    /// Attach an instance to a document node and render it.
    pub fn attach(&mut self, id: InstanceId, node: NodeId) -> Result<()> {
        if !self.document.contains(node) {
            return Err(RuntimeError::UnknownNode(node.index()));
        }
        let (entry, reference) = {
            let instance = self.instance(id)?;
            (instance.kind.lifecycle.attach_to_node.clone(), instance.reference)
        };
        let handle = self.handles.insert(HostValue::Node(node));
        self.invoke(&entry, &[reference, handle])?;
        self.instances[id.0].node = Some(node);
        self.render(id)
    }

    /// Update then render an instance right away.
    pub fn render(&mut self, id: InstanceId) -> Result<()> {
        let (update, render, reference) = {
            let instance = self.instance(id)?;
            let lifecycle = &instance.kind.lifecycle;
            (lifecycle.update_component.clone(), lifecycle.render_component.clone(), instance.reference)
        };
        self.invoke(&update, &[reference])?;
        self.invoke(&render, &[reference])?;
        Ok(())
    }

    /// Queue a render for the next frame. Repeated requests coalesce.
    pub fn schedule_render(&mut self, id: InstanceId) {
        self.render_queue.insert(id);
    }

    pub fn pending_renders(&self) -> usize {
        self.render_queue.len()
    }

    /// Run one frame: scheduled commits first, then queued renders in
    /// request order. Returns how many instances rendered.
    pub fn tick(&mut self) -> Result<usize> {
        let commits = self.scheduler.run_frame();
        for (kind, reference) in self.requests.drain() {
            let found = self
                .instances
                .iter()
                .position(|instance| instance.reference == reference && instance.kind.name() == &*kind);
            match found {
                Some(index) => {
                    self.render_queue.insert(InstanceId(index));
                }
                None => tracing::warn!(kind = %kind, reference, "render requested for unknown instance"),
            }
        }
        let queue = std::mem::take(&mut self.render_queue);
        let mut rendered = 0;
        for id in queue {
            if id.0 >= self.instances.len() {
                tracing::warn!(instance = id.0, "render queued for unknown instance");
                continue;
            }
            self.render(id)?;
            rendered += 1;
        }
        if commits > 0 || rendered > 0 {
            tracing::debug!(commits, rendered, "frame");
        }
        Ok(rendered)
    }

    // =========================================================================
    // Generated accessors
    // =========================================================================

    fn property_exports(&self, id: InstanceId, key: &str) -> Result<(Word, ValueKind, Rc<ComponentKind>)> {
        let instance = self.instance(id)?;
        let kind = instance.kind.property(key)?.0.clone();
        Ok((instance.reference, kind, instance.kind.clone()))
    }

    /// Read a property.
    ///
    /// Value kinds come back converted; sequence and callback kinds come back
    /// as views bound to this instance.
    pub fn get_property(&mut self, id: InstanceId, key: &str) -> Result<Property> {
        let (reference, kind, component) = self.property_exports(id, key)?;
        match kind {
            ValueKind::Iter(_) => Ok(Property::Sequence(SequenceProperty { instance: id, key: key.to_string() })),
            ValueKind::Callback => Ok(Property::Callback(CallbackProperty { instance: id, key: key.to_string() })),
            _ => {
                let getter = match component.property(key)?.1 {
                    PropertyExports::Value { get, .. } => get.clone(),
                    _ => return Err(RuntimeError::UnknownProperty(key.to_string())),
                };
                let handle = self.invoke(&getter, &[reference])?;
                Ok(Property::Value(self.handles.release(handle)?))
            }
        }
    }

    /// Write a property and schedule a render.
    ///
    /// Unknown keys and values that fail sanitization are dropped with no
    /// effect.
    pub fn set_property(&mut self, id: InstanceId, key: &str, value: &HostValue) -> Result<()> {
        let instance = self.instance(id)?;
        let Ok((kind, exports)) = instance.kind.property(key) else {
            tracing::debug!(instance = id.0, key, "write to unknown property dropped");
            return Ok(());
        };
        let Some(sanitized) = sanitize(value, kind) else {
            tracing::debug!(instance = id.0, key, %kind, "property write dropped by sanitizer");
            return Ok(());
        };
        let setter = exports.setter().clone();
        let reference = instance.reference;

        let handle = self.handles.insert(sanitized);
        self.invoke(&setter, &[reference, handle])?;
        self.schedule_render(id);
        Ok(())
    }

    pub(crate) fn sequence_get(&mut self, id: InstanceId, key: &str, index: u32) -> Result<HostValue> {
        let (reference, _, component) = self.property_exports(id, key)?;
        let getter = match component.property(key)?.1 {
            PropertyExports::Sequence { get_index, .. } => get_index.clone(),
            _ => return Err(RuntimeError::UnknownProperty(key.to_string())),
        };
        let handle = self.invoke(&getter, &[reference, index])?;
        self.handles.release(handle)
    }

    pub(crate) fn sequence_set(&mut self, id: InstanceId, key: &str, index: u32, value: HostValue) -> Result<()> {
        let (reference, kind, component) = self.property_exports(id, key)?;
        let ValueKind::Iter(item) = &kind else {
            return Err(RuntimeError::UnknownProperty(key.to_string()));
        };
        let Some(sanitized) = sanitize(&value, item) else {
            tracing::debug!(instance = id.0, key, index, "element write dropped by sanitizer");
            return Ok(());
        };
        let setter = match component.property(key)?.1 {
            PropertyExports::Sequence { set_index, .. } => set_index.clone(),
            _ => return Err(RuntimeError::UnknownProperty(key.to_string())),
        };
        let handle = self.handles.insert(sanitized);
        self.invoke(&setter, &[reference, index, handle])?;
        self.schedule_render(id);
        Ok(())
    }

    pub(crate) fn invoke_callback(&mut self, id: InstanceId, key: &str) -> Result<()> {
        let (reference, _, component) = self.property_exports(id, key)?;
        let call = match component.property(key)?.1 {
            PropertyExports::Callback { call, .. } => call.clone(),
            _ => return Err(RuntimeError::UnknownProperty(key.to_string())),
        };
        self.invoke(&call, &[reference])?;
        Ok(())
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Run the listener bound to `event` on `node`, if any.
    ///
    /// The listener receives the node as its only argument. Returns whether
    /// a listener ran.
    pub fn dispatch_event(&mut self, node: NodeId, event: &str) -> Result<bool> {
        let Some(listener) = self.document.listener(node, event)?.cloned() else {
            return Ok(false);
        };
        tracing::trace!(node = node.index(), event, "event dispatched");
        listener(self, &[HostValue::Node(node)])?;
        Ok(true)
    }
}
