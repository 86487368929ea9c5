//! Reactive property bag.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::{Map, Value as Json};

use super::{CoerceContext, CommitCallback, CommitGuard, CommitState, Owner, PendingFrame};
use crate::error::{Result, RuntimeError};
use crate::types::{coerce, ObjectSchema, Value};

/// A typed property bag with staged writes and an explicit commit.
///
/// Cloning shares the object.
///
/// # Examples
///
/// ```
/// use std::rc::Rc;
/// use serde_json::json;
/// use spark_bridge::reactive::{CoerceContext, ReactiveObject};
/// use spark_bridge::types::ObjectSchema;
///
/// let schema = Rc::new(ObjectSchema::from_json_str(r#"{"count":"Int"}"#).unwrap());
/// let state = ReactiveObject::new(schema, &CoerceContext::detached()).unwrap();
/// state.commit().unwrap();
///
/// state.set("count", &json!("7")).unwrap();
/// assert_eq!(state.get_flat("count").unwrap(), json!(7));
/// assert!(state.commit().unwrap());
/// assert!(!state.commit().unwrap());
/// ```
#[derive(Clone)]
pub struct ReactiveObject {
    inner: Rc<ObjectInner>,
}

pub(crate) struct ObjectInner {
    schema: Rc<ObjectSchema>,
    committed: RefCell<IndexMap<String, Value>>,
    staged: RefCell<IndexMap<String, Value>>,
    on_commit: RefCell<Option<CommitCallback>>,
    never_committed: Cell<bool>,
    state: Cell<CommitState>,
    ctx: CoerceContext,
    frame: PendingFrame,
}

impl ReactiveObject {
    /// Object with every property at its default.
    pub fn new(schema: Rc<ObjectSchema>, ctx: &CoerceContext) -> Result<Self> {
        Self::from_raw(schema, &Json::Null, ctx)
    }

    /// Object whose properties are coerced from the fields of `raw`.
    ///
    /// Missing fields take their default; fields outside the schema are
    /// ignored. A non-object `raw` gives all defaults.
    pub fn from_raw(schema: Rc<ObjectSchema>, raw: &Json, ctx: &CoerceContext) -> Result<Self> {
        let object = Self {
            inner: Rc::new(ObjectInner {
                schema: schema.clone(),
                committed: RefCell::new(IndexMap::with_capacity(schema.len())),
                staged: RefCell::new(IndexMap::new()),
                on_commit: RefCell::new(None),
                never_committed: Cell::new(true),
                state: Cell::new(CommitState::Idle),
                ctx: ctx.clone(),
                frame: PendingFrame::default(),
            }),
        };

        let child_ctx = object.child_context();
        let fields = raw.as_object();
        let mut committed = IndexMap::with_capacity(schema.len());
        for (key, kind) in schema.iter() {
            let field = fields.and_then(|m| m.get(key)).unwrap_or(&Json::Null);
            committed.insert(key.to_string(), coerce(field, kind, &child_ctx)?);
        }
        *object.inner.committed.borrow_mut() = committed;
        Ok(object)
    }

    pub(crate) fn from_inner(inner: Rc<ObjectInner>) -> Self {
        Self { inner }
    }

    fn child_context(&self) -> CoerceContext {
        self.inner.ctx.child(Owner::Object(Rc::downgrade(&self.inner)))
    }

    pub fn schema(&self) -> &Rc<ObjectSchema> {
        &self.inner.schema
    }

    /// True if both handles refer to the same object.
    pub fn ptr_eq(&self, other: &ReactiveObject) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Bind the commit notification, replacing any previous one.
    pub fn set_on_commit(&self, callback: impl Fn() + 'static) {
        *self.inner.on_commit.borrow_mut() = Some(Rc::new(callback));
    }

    pub fn clear_on_commit(&self) {
        self.inner.on_commit.borrow_mut().take();
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Visible value: staged if present, else committed.
    pub fn get(&self, key: &str) -> Result<Value> {
        if let Some(value) = self.inner.staged.borrow().get(key) {
            return Ok(value.clone());
        }
        self.inner
            .committed
            .borrow()
            .get(key)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownProperty(key.to_string()))
    }

    /// Visible value, flattened.
    pub fn get_flat(&self, key: &str) -> Result<Json> {
        self.get(key).map(|value| value.flatten())
    }

    /// Number of keys with a pending change.
    pub fn staged_len(&self) -> usize {
        self.inner.staged.borrow().len()
    }

    pub fn is_staged(&self, key: &str) -> bool {
        self.inner.staged.borrow().contains_key(key)
    }

    /// Plain object of every visible property, in schema order.
    pub fn flatten(&self) -> Json {
        let keys: Vec<String> = self.inner.schema.iter().map(|(k, _)| k.to_string()).collect();
        let mut map = Map::with_capacity(keys.len());
        for key in keys {
            if let Ok(value) = self.get(&key) {
                map.insert(key, value.flatten());
            }
        }
        Json::Object(map)
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    /// Coerce `raw` against the property's kind and stage it.
    ///
    /// A value equal to the committed one discards any staged change for
    /// the key instead, so writing back the current value is a no-op.
    pub fn set(&self, key: &str, raw: &Json) -> Result<()> {
        let kind = self
            .inner
            .schema
            .get(key)
            .ok_or_else(|| RuntimeError::UnknownProperty(key.to_string()))?;
        let value = coerce(raw, kind, &self.child_context())?;

        let unchanged = self
            .inner
            .committed
            .borrow()
            .get(key)
            .is_some_and(|committed| committed.structurally_eq(&value));

        let touched = if unchanged {
            self.inner.staged.borrow_mut().shift_remove(key).is_some()
        } else {
            self.inner.staged.borrow_mut().insert(key.to_string(), value);
            true
        };

        if touched {
            self.schedule_commit();
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Commit
    // -------------------------------------------------------------------------

    /// Apply staged changes and commit reactive children.
    ///
    /// Returns true if anything changed. Fails with
    /// [`RuntimeError::ReentrantCommit`] when called from inside this
    /// object's own commit (including its notification callback).
    pub fn commit(&self) -> Result<bool> {
        self.commit_with(false)
    }

    /// Like [`commit`](Self::commit), but `force_redraw` fires the
    /// notification even when nothing changed.
    pub fn commit_with(&self, force_redraw: bool) -> Result<bool> {
        let _guard = CommitGuard::enter(&self.inner.state)?;

        let staged = std::mem::take(&mut *self.inner.staged.borrow_mut());
        let mut dirty = !staged.is_empty() || self.inner.never_committed.get();

        let children: Vec<Value> = {
            let mut committed = self.inner.committed.borrow_mut();
            for (key, value) in &staged {
                committed.insert(key.clone(), value.clone());
            }
            committed
                .iter()
                .filter(|(key, value)| value.is_reactive() && !staged.contains_key(*key))
                .map(|(_, value)| value.clone())
                .collect()
        };

        for child in children {
            dirty |= child.commit()?;
        }

        tracing::debug!(dirty, staged = staged.len(), "object commit");

        if dirty || force_redraw {
            let callback = self.inner.on_commit.borrow().clone();
            if let Some(callback) = callback {
                callback();
            }
        }
        self.inner.never_committed.set(false);
        Ok(dirty)
    }

    /// Debounce a commit into the next frame.
    ///
    /// Nested objects forward to their owner; only the root of a tree holds
    /// a pending frame.
    pub(crate) fn schedule_commit(&self) {
        if let Some(owner) = &self.inner.ctx.owner {
            owner.schedule_commit();
            return;
        }
        let Some(scheduler) = &self.inner.ctx.scheduler else {
            return;
        };
        let weak = Rc::downgrade(&self.inner);
        self.inner.frame.reschedule(scheduler, move || {
            let Some(inner) = weak.upgrade() else { return };
            inner.frame.clear();
            if let Err(err) = ReactiveObject::from_inner(inner).commit() {
                tracing::error!(error = %err, "scheduled object commit failed");
            }
        });
    }
}

impl fmt::Debug for ReactiveObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveObject")
            .field("value", &self.flatten())
            .field("staged", &self.staged_len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::FrameScheduler;
    use serde_json::json;

    fn schema(text: &str) -> Rc<ObjectSchema> {
        Rc::new(ObjectSchema::from_json_str(text).unwrap())
    }

    fn counter(object: &ReactiveObject) -> Rc<Cell<u32>> {
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        object.set_on_commit(move || c.set(c.get() + 1));
        count
    }

    #[test]
    fn test_defaults_and_raw_fields() {
        let object = ReactiveObject::from_raw(
            schema(r#"{"name":"String","width":"Length","align":"Alignment"}"#),
            &json!({ "name": 5, "extra": true }),
            &CoerceContext::detached(),
        )
        .unwrap();
        assert_eq!(object.flatten(), json!({ "name": "5", "width": "0px", "align": "stretch" }));
    }

    #[test]
    fn test_first_commit_is_dirty() {
        let object = ReactiveObject::new(schema(r#"{"n":"Int"}"#), &CoerceContext::detached()).unwrap();
        let count = counter(&object);
        assert!(object.commit().unwrap());
        assert!(!object.commit().unwrap());
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_reads_see_staged_value() {
        let object = ReactiveObject::new(schema(r#"{"n":"Int"}"#), &CoerceContext::detached()).unwrap();
        object.commit().unwrap();
        object.set("n", &json!(4)).unwrap();
        assert!(object.is_staged("n"));
        assert_eq!(object.get_flat("n").unwrap(), json!(4));
    }

    #[test]
    fn test_idempotent_write() {
        let object =
            ReactiveObject::from_raw(schema(r#"{"n":"Int"}"#), &json!({ "n": 1 }), &CoerceContext::detached())
                .unwrap();
        object.commit().unwrap();
        let count = counter(&object);

        object.set("n", &json!(1)).unwrap();
        assert_eq!(object.staged_len(), 0);

        object.set("n", &json!(2)).unwrap();
        object.set("n", &json!("1")).unwrap();
        assert_eq!(object.staged_len(), 0);

        assert!(!object.commit().unwrap());
        assert_eq!(count.get(), 0);
    }

    #[test]
    fn test_unknown_property() {
        let object = ReactiveObject::new(schema(r#"{"n":"Int"}"#), &CoerceContext::detached()).unwrap();
        assert_eq!(object.set("m", &json!(1)), Err(RuntimeError::UnknownProperty("m".into())));
        assert!(object.get("m").is_err());
    }

    #[test]
    fn test_deep_write_commits_through_root_once() {
        let object =
            ReactiveObject::new(schema(r#"{"a":{"b":{"c":"Int"}}}"#), &CoerceContext::detached()).unwrap();
        object.commit().unwrap();
        let count = counter(&object);

        let a = object.get("a").unwrap();
        let b = a.as_object().unwrap().get("b").unwrap();
        b.as_object().unwrap().set("c", &json!(9)).unwrap();

        assert!(object.commit().unwrap());
        assert_eq!(count.get(), 1);
        assert_eq!(object.flatten(), json!({ "a": { "b": { "c": 9 } } }));
        assert!(!object.commit().unwrap());
    }

    #[test]
    fn test_replaced_child_is_not_recommitted() {
        let object =
            ReactiveObject::new(schema(r#"{"inner":{"x":"Int"}}"#), &CoerceContext::detached()).unwrap();
        object.commit().unwrap();
        object.set("inner", &json!({ "x": 3 })).unwrap();
        assert!(object.commit().unwrap());

        // The replacement has never committed on its own
        let inner = object.get("inner").unwrap();
        assert!(inner.as_object().unwrap().commit().unwrap());
    }

    #[test]
    fn test_reentrant_commit_is_rejected() {
        let object = ReactiveObject::new(schema(r#"{"n":"Int"}"#), &CoerceContext::detached()).unwrap();
        let seen = Rc::new(RefCell::new(None));
        let (handle, slot) = (object.clone(), seen.clone());
        object.set_on_commit(move || {
            *slot.borrow_mut() = Some(handle.commit());
        });
        assert!(object.commit().unwrap());
        assert_eq!(*seen.borrow(), Some(Err(RuntimeError::ReentrantCommit)));
        object.clear_on_commit();
        // Guard released after the failed attempt
        assert!(object.commit().is_ok());
    }

    #[test]
    fn test_force_redraw_notifies_without_changes() {
        let object = ReactiveObject::new(schema(r#"{"n":"Int"}"#), &CoerceContext::detached()).unwrap();
        object.commit().unwrap();
        let count = counter(&object);
        assert!(!object.commit_with(true).unwrap());
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_scheduled_commit_debounces_to_root() {
        let scheduler = FrameScheduler::new();
        let object = ReactiveObject::new(
            schema(r#"{"n":"Int","child":{"label":"String"}}"#),
            &CoerceContext::scheduled(scheduler.clone()),
        )
        .unwrap();
        object.commit().unwrap();
        let count = counter(&object);

        object.set("n", &json!(1)).unwrap();
        object.set("n", &json!(2)).unwrap();
        let child = object.get("child").unwrap();
        child.as_object().unwrap().set("label", &json!("hi")).unwrap();
        assert_eq!(scheduler.pending(), 1);

        scheduler.run_frame();
        assert_eq!(count.get(), 1);
        assert_eq!(object.flatten(), json!({ "n": 2, "child": { "label": "hi" } }));
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn test_detached_object_never_schedules() {
        let scheduler = FrameScheduler::new();
        let object = ReactiveObject::new(schema(r#"{"n":"Int"}"#), &CoerceContext::detached()).unwrap();
        object.set("n", &json!(1)).unwrap();
        assert_eq!(scheduler.pending(), 0);
        assert_eq!(object.staged_len(), 1);
    }

    #[test]
    fn test_callback_property_is_fatal() {
        let result = ReactiveObject::new(schema(r#"{"onClick":"Callback"}"#), &CoerceContext::detached());
        assert!(matches!(result, Err(RuntimeError::UnsupportedKind(_))));
    }
}
