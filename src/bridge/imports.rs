//! Host imports - the functions a module calls back into.
//!
//! Every import takes and returns [`Word`]s (or an `f64` for numbers).
//! Handles passed in are borrowed unless the import says it consumes them;
//! handles returned are owned by the caller, who must drop them. A node
//! always comes back as the same handle; each return counts as a reference
//! of its own and needs its own drop.

use super::handles::{Capability, Handle, NULL_HANDLE};
use super::host_value::HostValue;
use super::module::{Word, DISPATCH_BOUND_CALLBACK};
use super::runtime::Runtime;
use crate::error::{Result, RuntimeError};
use crate::reconciler::NodeId;

impl Runtime {
    fn read_str(&self, ptr: Word, len: Word) -> Result<String> {
        self.memory.read_str(ptr, len)
    }

    fn node_handle(&mut self, node: Option<NodeId>) -> Handle {
        node.map_or(NULL_HANDLE, |node| self.handles.insert(HostValue::Node(node)))
    }

    // =========================================================================
    // Strings and diagnostics
    // =========================================================================

    /// Box the string at `(ptr, len)`.
    ///
    /// While the host is receiving a string (a manifest, for instance) the
    /// text is captured instead and the null handle returned.
    pub fn send_string(&mut self, ptr: Word, len: Word) -> Result<Handle> {
        let text = self.read_str(ptr, len)?;
        if let Some(slot) = self.receiver.as_mut() {
            *slot = Some(text);
            return Ok(NULL_HANDLE);
        }
        Ok(self.handles.insert(HostValue::String(text)))
    }

    pub fn send_bool(&mut self, value: Word) -> Handle {
        self.handles.insert(HostValue::Boolean(value != 0))
    }

    pub fn send_number(&mut self, value: f64) -> Handle {
        self.handles.insert(HostValue::Number(value))
    }

    /// Stage the UTF-8 bytes of a string handle for [`Runtime::load_string`].
    ///
    /// Returns the byte length, or -1 if the handle is not a string.
    pub fn stage_string(&mut self, handle: Handle) -> Result<i32> {
        let bytes = match self.handles.get(handle)? {
            HostValue::String(s) => s.as_bytes().to_vec(),
            _ => return Ok(-1),
        };
        let len = i32::try_from(bytes.len()).map_err(|_| RuntimeError::MemoryOutOfBounds {
            ptr: 0,
            len: u32::MAX,
        })?;
        self.staged = Some(bytes);
        Ok(len)
    }

    /// Copy the staged string to `dest` and clear the staging slot.
    pub fn load_string(&mut self, dest: Word) -> Result<()> {
        let bytes = self.staged.take().ok_or(RuntimeError::NothingStaged)?;
        self.memory.write(dest, &bytes)
    }

    pub fn console_log(&mut self, ptr: Word, len: Word) -> Result<()> {
        let message = self.read_str(ptr, len)?;
        tracing::info!(target: "spark_bridge::module", "{message}");
        Ok(())
    }

    /// Abort the current call with a module fault.
    pub fn raise_error(&mut self, ptr: Word, len: Word) -> Result<()> {
        let message = self.read_str(ptr, len)?;
        tracing::error!(target: "spark_bridge::module", "{message}");
        Err(RuntimeError::ModuleFault(message))
    }

    pub fn alloc(&mut self, len: Word) -> Result<Word> {
        self.memory.alloc(len)
    }

    pub fn free(&mut self, ptr: Word) -> Result<()> {
        self.memory.free(ptr)
    }

    // =========================================================================
    // Handle introspection
    // =========================================================================

    /// Capability bits of a handle.
    pub fn type_of(&self, handle: Handle) -> Result<Word> {
        self.handles.capability(handle).map(|capability| Word::from(capability.bits()))
    }

    pub fn is_array(&self, handle: Handle) -> Result<bool> {
        Ok(self.handles.capability(handle)? == Capability::ARRAY)
    }

    pub fn is_function(&self, handle: Handle) -> Result<bool> {
        Ok(self.handles.capability(handle)? == Capability::FUNCTION)
    }

    /// 1 for true, 0 for false, -1 for anything that is not a boolean.
    pub fn as_bool(&self, handle: Handle) -> Result<i32> {
        Ok(match self.handles.get(handle)?.as_bool() {
            Some(true) => 1,
            Some(false) => 0,
            None => -1,
        })
    }

    /// Numeric value of a handle; NaN if it is not a number.
    pub fn as_number(&self, handle: Handle) -> Result<f64> {
        Ok(self.handles.get(handle)?.as_f64().unwrap_or(f64::NAN))
    }

    /// New handle to member `key` of an array or object, or null.
    pub fn get_member(&mut self, handle: Handle, ptr: Word, len: Word) -> Result<Handle> {
        let key = self.read_str(ptr, len)?;
        let value = self.handles.get(handle)?;
        if !value.capability().intersects(Capability::PROPERTY_BEARING) {
            return Ok(NULL_HANDLE);
        }
        let member = value.property(&key).cloned().unwrap_or_default();
        Ok(self.handles.insert(member))
    }

    /// Call a function handle with no arguments and box its result.
    pub fn call_function(&mut self, handle: Handle) -> Result<Handle> {
        let HostValue::Function(function) = self.handles.expect(handle, Capability::FUNCTION)?.clone() else {
            return Err(RuntimeError::WrongHandleKind { handle, expected: "function" });
        };
        let result = function(self, &[])?;
        Ok(self.handles.insert(result))
    }

    pub fn drop_handle(&mut self, handle: Handle) -> Result<()> {
        self.handles.release(handle).map(drop)
    }

    // =========================================================================
    // Building values
    // =========================================================================

    pub fn new_array(&mut self) -> Handle {
        self.handles.insert(HostValue::Array(Vec::new()))
    }

    /// Append the value of `item` to an array. Consumes `item`.
    pub fn array_push(&mut self, array: Handle, item: Handle) -> Result<()> {
        self.handles.expect(array, Capability::ARRAY)?;
        let value = self.handles.release(item)?;
        if let Some(HostValue::Array(items)) = self.handles.get_mut(array) {
            items.push(value);
        }
        Ok(())
    }

    pub fn new_object(&mut self) -> Handle {
        self.handles.insert(HostValue::Object(Default::default()))
    }

    /// Set member `key` of an object. Consumes `item`.
    pub fn object_set(&mut self, object: Handle, ptr: Word, len: Word, item: Handle) -> Result<()> {
        self.handles.expect(object, Capability::OBJECT)?;
        let key = self.read_str(ptr, len)?;
        let value = self.handles.release(item)?;
        if let Some(HostValue::Object(map)) = self.handles.get_mut(object) {
            map.insert(key, value);
        }
        Ok(())
    }

    /// Function handle that runs the module's bound-callback dispatcher
    /// with `token`.
    pub fn bind_callback(&mut self, token: Word) -> Handle {
        let function = HostValue::function(move |rt, _| {
            rt.call_export(DISPATCH_BOUND_CALLBACK, &[token])?;
            Ok(HostValue::Null)
        });
        self.handles.insert(function)
    }

    // =========================================================================
    // Document
    // =========================================================================

    pub fn create_element(&mut self, ptr: Word, len: Word) -> Result<Handle> {
        let tag = self.read_str(ptr, len)?;
        let node = self.document.create_element(&tag);
        Ok(self.handles.insert(HostValue::Node(node)))
    }

    pub fn create_text_node(&mut self, ptr: Word, len: Word) -> Result<Handle> {
        let text = self.read_str(ptr, len)?;
        let node = self.document.create_text_node(&text);
        Ok(self.handles.insert(HostValue::Node(node)))
    }

    pub fn append_child(&mut self, parent: Handle, child: Handle) -> Result<()> {
        let (parent, child) = (self.handles.node(parent)?, self.handles.node(child)?);
        self.document.append_child(parent, child)
    }

    /// Insert `child` before `reference`; the null handle appends.
    pub fn insert_before(&mut self, parent: Handle, child: Handle, reference: Handle) -> Result<()> {
        let parent = self.handles.node(parent)?;
        let child = self.handles.node(child)?;
        let reference = self.handles.optional_node(reference)?;
        self.document.insert_before(parent, child, reference)
    }

    pub fn remove_node(&mut self, node: Handle) -> Result<()> {
        let node = self.handles.node(node)?;
        self.document.remove(node)
    }

    pub fn first_child(&mut self, node: Handle) -> Result<Handle> {
        let child = self.document.first_child(self.handles.node(node)?)?;
        Ok(self.node_handle(child))
    }

    pub fn next_sibling(&mut self, node: Handle) -> Result<Handle> {
        let sibling = self.document.next_sibling(self.handles.node(node)?)?;
        Ok(self.node_handle(sibling))
    }

    pub fn set_text_content(&mut self, node: Handle, ptr: Word, len: Word) -> Result<()> {
        let node = self.handles.node(node)?;
        let text = self.read_str(ptr, len)?;
        self.document.set_text_content(node, &text)
    }

    pub fn set_style(&mut self, node: Handle, prop: (Word, Word), value: (Word, Word)) -> Result<()> {
        let node = self.handles.node(node)?;
        let prop = self.read_str(prop.0, prop.1)?;
        let value = self.read_str(value.0, value.1)?;
        self.document.set_style(node, &prop, &value)
    }

    /// Bind a function handle to `event` on `node`; the null handle unbinds.
    ///
    /// Rebinding the function already bound leaves the listener untouched.
    pub fn bind_event(&mut self, node: Handle, ptr: Word, len: Word, function: Handle) -> Result<()> {
        let node = self.handles.node(node)?;
        let event = self.read_str(ptr, len)?;
        let listener = match function {
            NULL_HANDLE => None,
            _ => match self.handles.expect(function, Capability::FUNCTION)? {
                HostValue::Function(f) => Some(f.clone()),
                _ => None,
            },
        };
        if self.reconciler.bind_event(&mut self.document, node, &event, listener)? {
            tracing::trace!(node = node.index(), event, "listener bound");
        }
        Ok(())
    }

    // =========================================================================
    // Reconciler
    // =========================================================================

    /// Start a render pass over the children of `parent`.
    pub fn reconcile_begin(&mut self, parent: Handle) -> Result<()> {
        let parent = self.handles.node(parent)?;
        self.reconciler.begin(parent);
        Ok(())
    }

    /// Visit `position` under `parent`, creating and placing its node as
    /// needed. A zero tag length means a text node; `text` is a string
    /// handle or null. Returns the node's handle.
    pub fn reconcile_enter(
        &mut self,
        parent: Handle,
        tag: (Word, Word),
        position: Word,
        text: Handle,
    ) -> Result<Handle> {
        let parent = self.handles.node(parent)?;
        let tag = self.optional_tag(tag)?;
        let text = self.optional_text(text)?;
        let node = self.reconciler.enter(
            &mut self.document,
            parent,
            tag.as_deref(),
            position as usize,
            text.as_deref(),
        )?;
        Ok(self.handles.insert(HostValue::Node(node)))
    }

    /// Visit `position` under `parent`, taking its node out of the document.
    pub fn reconcile_out(&mut self, parent: Handle, tag: (Word, Word), position: Word) -> Result<()> {
        let parent = self.handles.node(parent)?;
        let tag = self.optional_tag(tag)?;
        self.reconciler
            .out(&mut self.document, parent, tag.as_deref(), position as usize, None)?;
        Ok(())
    }

    pub fn reconcile_begin_group(&mut self, parent: Handle, group: Word) -> Result<()> {
        let parent = self.handles.node(parent)?;
        self.reconciler.begin_group(parent, group as usize);
        Ok(())
    }

    /// Close the open group under `parent`. Returns how many nodes it detached.
    pub fn reconcile_end_group(&mut self, parent: Handle) -> Result<Word> {
        let parent = self.handles.node(parent)?;
        let detached = self.reconciler.end_group(&mut self.document, parent)?;
        Ok(Word::try_from(detached).unwrap_or(Word::MAX))
    }

    fn optional_tag(&self, (ptr, len): (Word, Word)) -> Result<Option<String>> {
        if len == 0 {
            return Ok(None);
        }
        self.read_str(ptr, len).map(Some)
    }

    fn optional_text(&self, handle: Handle) -> Result<Option<String>> {
        if handle == NULL_HANDLE {
            return Ok(None);
        }
        match self.handles.expect(handle, Capability::STRING)? {
            HostValue::String(s) => Ok(Some(s.clone())),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::module::Module;
    use serde_json::json;

    fn runtime() -> Runtime {
        Runtime::with_module(Module::new())
    }

    fn write(rt: &mut Runtime, text: &str) -> (Word, Word) {
        let len = text.len() as Word;
        let ptr = rt.alloc(len).unwrap();
        rt.memory_mut().write(ptr, text.as_bytes()).unwrap();
        (ptr, len)
    }

    #[test]
    fn test_string_round_trip() {
        let mut rt = runtime();
        let (ptr, len) = write(&mut rt, "héllo");
        let handle = rt.send_string(ptr, len).unwrap();

        let staged = rt.stage_string(handle).unwrap();
        assert_eq!(staged, 6);
        let dest = rt.alloc(staged as Word).unwrap();
        rt.load_string(dest).unwrap();
        assert_eq!(rt.memory().read_str(dest, 6).unwrap(), "héllo");

        assert_eq!(rt.load_string(dest), Err(RuntimeError::NothingStaged));
    }

    #[test]
    fn test_stage_non_string() {
        let mut rt = runtime();
        let h = rt.send_number(3.0);
        assert_eq!(rt.stage_string(h).unwrap(), -1);
        assert_eq!(rt.stage_string(99), Err(RuntimeError::DanglingHandle(99)));
    }

    #[test]
    fn test_introspection() {
        let mut rt = runtime();
        let n = rt.send_number(2.5);
        let arr = rt.new_array();
        assert_eq!(rt.as_number(n).unwrap(), 2.5);
        assert!(rt.as_number(arr).unwrap().is_nan());
        let yes = rt.send_bool(1);
        assert_eq!(rt.as_bool(yes).unwrap(), 1);
        assert_eq!(rt.as_bool(n).unwrap(), -1);
        assert!(rt.is_array(arr).unwrap());
        assert!(!rt.is_function(arr).unwrap());
        assert_eq!(rt.type_of(n).unwrap(), Word::from(Capability::NUMBER.bits()));
    }

    #[test]
    fn test_build_object_and_read_back() {
        let mut rt = runtime();
        let object = rt.new_object();
        let list = rt.new_array();
        let item = rt.send_number(1.0);
        rt.array_push(list, item).unwrap();
        let (kp, kl) = write(&mut rt, "items");
        rt.object_set(object, kp, kl, list).unwrap();

        assert!(!rt.handles().contains(item));
        assert!(!rt.handles().contains(list));
        assert_eq!(rt.handles().get(object).unwrap().to_json(), json!({ "items": [1] }));

        let member = rt.get_member(object, kp, kl).unwrap();
        assert_eq!(rt.take(member).unwrap().to_json(), json!([1]));
        let (mp, ml) = write(&mut rt, "missing");
        assert_eq!(rt.get_member(object, mp, ml).unwrap(), NULL_HANDLE);
        let n = rt.send_number(1.0);
        assert_eq!(rt.get_member(n, kp, kl).unwrap(), NULL_HANDLE);
    }

    #[test]
    fn test_array_push_requires_array() {
        let mut rt = runtime();
        let n = rt.send_number(1.0);
        let item = rt.send_number(2.0);
        assert_eq!(
            rt.array_push(n, item),
            Err(RuntimeError::WrongHandleKind { handle: n, expected: "array" })
        );
        assert!(rt.handles().contains(item));
    }

    #[test]
    fn test_raise_error_is_fatal() {
        let mut rt = runtime();
        let (ptr, len) = write(&mut rt, "boom");
        assert_eq!(rt.raise_error(ptr, len), Err(RuntimeError::ModuleFault("boom".to_string())));
    }

    #[test]
    fn test_dom_imports() {
        let mut rt = runtime();
        let body = rt.allocate(HostValue::Node(rt.document().root()));
        let tag = write(&mut rt, "p");
        let p = rt.create_element(tag.0, tag.1).unwrap();
        let text = write(&mut rt, "hi");
        let t = rt.create_text_node(text.0, text.1).unwrap();

        rt.append_child(body, p).unwrap();
        rt.insert_before(body, t, p).unwrap();
        assert_eq!(rt.first_child(body).unwrap(), t);
        assert_eq!(rt.next_sibling(t).unwrap(), p);
        assert_eq!(rt.next_sibling(p).unwrap(), NULL_HANDLE);

        let prop = write(&mut rt, "color");
        let value = write(&mut rt, "red");
        rt.set_style(p, prop, value).unwrap();
        let p_node = rt.handles().node(p).unwrap();
        assert_eq!(rt.document().style(p_node, "color").unwrap(), Some("red"));

        rt.remove_node(t).unwrap();
        assert_eq!(rt.first_child(body).unwrap(), p);
    }

    #[test]
    fn test_shared_node_handle_survives_first_drop() {
        let mut rt = runtime();
        let root = rt.document().root();
        let body = rt.allocate(HostValue::Node(root));
        let li = write(&mut rt, "li");

        rt.reconcile_begin(body).unwrap();
        let entered = rt.reconcile_enter(body, li, 0, NULL_HANDLE).unwrap();
        let first = rt.first_child(body).unwrap();
        assert_eq!(first, entered);

        rt.drop_handle(entered).unwrap();
        let (sp, sl) = write(&mut rt, "x");
        let text = rt.send_string(sp, sl).unwrap();
        assert_ne!(text, first);
        assert_eq!(rt.handles().node(first).unwrap(), rt.document().children(root).unwrap()[0]);

        rt.drop_handle(first).unwrap();
        assert_eq!(rt.drop_handle(first), Err(RuntimeError::DanglingHandle(first)));
        assert_eq!(rt.handles().get(text).unwrap().to_json(), json!("x"));
    }

    #[test]
    fn test_reconcile_imports() {
        let mut rt = runtime();
        let body = rt.allocate(HostValue::Node(rt.document().root()));
        let li = write(&mut rt, "li");

        let render = |rt: &mut Runtime, count: Word| {
            rt.reconcile_begin(body).unwrap();
            rt.reconcile_begin_group(body, 0).unwrap();
            for i in 0..count {
                rt.reconcile_enter(body, li, i, NULL_HANDLE).unwrap();
            }
            rt.reconcile_end_group(body).unwrap()
        };

        assert_eq!(render(&mut rt, 3), 0);
        let root = rt.document().root();
        assert_eq!(rt.document().children(root).unwrap().len(), 3);
        assert_eq!(render(&mut rt, 1), 2);
        assert_eq!(rt.document().children(root).unwrap().len(), 1);
    }

    #[test]
    fn test_reconcile_text_node() {
        let mut rt = runtime();
        let body = rt.allocate(HostValue::Node(rt.document().root()));
        let (ptr, len) = write(&mut rt, "count: 1");
        let text = rt.send_string(ptr, len).unwrap();

        rt.reconcile_begin(body).unwrap();
        let node = rt.reconcile_enter(body, (0, 0), 0, text).unwrap();
        let node = rt.handles().node(node).unwrap();
        assert_eq!(rt.document().text_content(node).unwrap(), "count: 1");

        let n = rt.send_number(1.0);
        assert!(rt.reconcile_enter(body, (0, 0), 1, n).is_err());
    }

    #[test]
    fn test_bind_event_is_idempotent() {
        let mut rt = runtime();
        let root = rt.document().root();
        let body = rt.allocate(HostValue::Node(root));
        let click = write(&mut rt, "click");
        let f = rt.allocate(HostValue::function(|_, _| Ok(HostValue::Null)));

        rt.bind_event(body, click.0, click.1, f).unwrap();
        let before = rt.document().listener(root, "click").unwrap().cloned();
        rt.bind_event(body, click.0, click.1, f).unwrap();
        let after = rt.document().listener(root, "click").unwrap().cloned();
        assert!(std::rc::Rc::ptr_eq(&before.unwrap(), &after.unwrap()));

        rt.bind_event(body, click.0, click.1, NULL_HANDLE).unwrap();
        assert_eq!(rt.document().listener_count(root).unwrap(), 0);
    }

    #[test]
    fn test_bind_callback_dispatches_token() {
        let hits = std::rc::Rc::new(std::cell::Cell::new(0));
        let seen = hits.clone();
        let mut module = Module::new();
        module.export(DISPATCH_BOUND_CALLBACK, move |_, args| {
            seen.set(args[0]);
            Ok(0)
        });
        let mut rt = Runtime::with_module(module);

        let f = rt.bind_callback(7);
        let result = rt.call_function(f).unwrap();
        assert_eq!(result, NULL_HANDLE);
        assert_eq!(hits.get(), 7);
    }
}
