//! Reactive ordered collection.
//!
//! Queries run over the flattened visible elements (staged overlaid on
//! committed) and never touch state. Mutators first fold staged index
//! writes into the committed sequence, mark the whole collection dirty,
//! then mutate.

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use serde_json::Value as Json;

use super::{
    relative_index, CoerceContext, CommitCallback, CommitGuard, CommitState, Owner, PendingFrame,
};
use crate::error::Result;
use crate::types::{coerce, stringify, Value, ValueKind};

/// Index-addressable reactive sequence of one item kind.
///
/// Cloning shares the collection.
#[derive(Clone)]
pub struct ReactiveCollection {
    inner: Rc<CollectionInner>,
}

pub(crate) struct CollectionInner {
    item_kind: ValueKind,
    items: RefCell<Vec<Value>>,
    staged: RefCell<BTreeMap<usize, Value>>,
    fully_dirty: Cell<bool>,
    on_commit: RefCell<Option<CommitCallback>>,
    state: Cell<CommitState>,
    ctx: CoerceContext,
    frame: PendingFrame,
}

impl ReactiveCollection {
    pub fn new(item_kind: ValueKind, ctx: &CoerceContext) -> Self {
        Self {
            inner: Rc::new(CollectionInner {
                item_kind,
                items: RefCell::new(Vec::new()),
                staged: RefCell::new(BTreeMap::new()),
                fully_dirty: Cell::new(false),
                on_commit: RefCell::new(None),
                state: Cell::new(CommitState::Idle),
                ctx: ctx.clone(),
                frame: PendingFrame::default(),
            }),
        }
    }

    /// Collection with one coerced element per raw item.
    pub fn from_raw(item_kind: ValueKind, raw: &[Json], ctx: &CoerceContext) -> Result<Self> {
        let collection = Self::new(item_kind, ctx);
        let items = collection.coerce_all(raw)?;
        *collection.inner.items.borrow_mut() = items;
        Ok(collection)
    }

    pub(crate) fn from_inner(inner: Rc<CollectionInner>) -> Self {
        Self { inner }
    }

    fn coerce_all(&self, raw: &[Json]) -> Result<Vec<Value>> {
        let ctx = self.inner.ctx.child(Owner::Collection(Rc::downgrade(&self.inner)));
        raw.iter().map(|item| coerce(item, &self.inner.item_kind, &ctx)).collect()
    }

    fn coerce_one(&self, raw: &Json) -> Result<Value> {
        let ctx = self.inner.ctx.child(Owner::Collection(Rc::downgrade(&self.inner)));
        coerce(raw, &self.inner.item_kind, &ctx)
    }

    pub fn item_kind(&self) -> &ValueKind {
        &self.inner.item_kind
    }

    pub fn ptr_eq(&self, other: &ReactiveCollection) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn set_on_commit(&self, callback: impl Fn() + 'static) {
        *self.inner.on_commit.borrow_mut() = Some(Rc::new(callback));
    }

    pub fn clear_on_commit(&self) {
        self.inner.on_commit.borrow_mut().take();
    }

    pub fn len(&self) -> usize {
        self.inner.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn staged_len(&self) -> usize {
        self.inner.staged.borrow().len()
    }

    pub fn is_fully_dirty(&self) -> bool {
        self.inner.fully_dirty.get()
    }

    // =========================================================================
    // Element access
    // =========================================================================

    /// Visible element at `index`.
    pub fn get_value(&self, index: usize) -> Option<Value> {
        if let Some(value) = self.inner.staged.borrow().get(&index) {
            return Some(value.clone());
        }
        self.inner.items.borrow().get(index).cloned()
    }

    /// Visible element at `index`, flattened.
    pub fn get(&self, index: usize) -> Option<Json> {
        self.get_value(index).map(|value| value.flatten())
    }

    /// Element at a relative index (negative counts from the end).
    pub fn at(&self, index: isize) -> Option<Json> {
        let len = self.len();
        let resolved = if index < 0 { len.checked_sub(index.unsigned_abs())? } else { index as usize };
        self.get(resolved)
    }

    /// Visible elements as typed values.
    pub fn values(&self) -> Vec<Value> {
        let staged = self.inner.staged.borrow();
        self.inner
            .items
            .borrow()
            .iter()
            .enumerate()
            .map(|(i, item)| staged.get(&i).unwrap_or(item).clone())
            .collect()
    }

    /// Visible elements, flattened.
    pub fn to_vec(&self) -> Vec<Json> {
        self.values().iter().map(Value::flatten).collect()
    }

    pub fn iter(&self) -> std::vec::IntoIter<Json> {
        self.to_vec().into_iter()
    }

    pub fn flatten(&self) -> Json {
        Json::Array(self.to_vec())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn contains(&self, needle: &Json) -> bool {
        self.index_of(needle).is_some()
    }

    pub fn index_of(&self, needle: &Json) -> Option<usize> {
        self.iter().position(|item| item == *needle)
    }

    pub fn last_index_of(&self, needle: &Json) -> Option<usize> {
        self.to_vec().iter().rposition(|item| item == needle)
    }

    pub fn find(&self, mut predicate: impl FnMut(&Json) -> bool) -> Option<Json> {
        self.iter().find(|item| predicate(item))
    }

    pub fn find_index(&self, mut predicate: impl FnMut(&Json) -> bool) -> Option<usize> {
        self.iter().position(|item| predicate(&item))
    }

    pub fn find_last(&self, mut predicate: impl FnMut(&Json) -> bool) -> Option<Json> {
        self.iter().rev().find(|item| predicate(item))
    }

    pub fn find_last_index(&self, mut predicate: impl FnMut(&Json) -> bool) -> Option<usize> {
        self.to_vec().iter().rposition(|item| predicate(item))
    }

    pub fn any(&self, mut predicate: impl FnMut(&Json) -> bool) -> bool {
        self.iter().any(|item| predicate(&item))
    }

    pub fn all(&self, mut predicate: impl FnMut(&Json) -> bool) -> bool {
        self.iter().all(|item| predicate(&item))
    }

    pub fn filter(&self, mut predicate: impl FnMut(&Json) -> bool) -> Vec<Json> {
        self.iter().filter(|item| predicate(item)).collect()
    }

    pub fn map<T>(&self, f: impl FnMut(Json) -> T) -> Vec<T> {
        self.iter().map(f).collect()
    }

    pub fn fold<T>(&self, init: T, f: impl FnMut(T, Json) -> T) -> T {
        self.iter().fold(init, f)
    }

    pub fn fold_right<T>(&self, init: T, f: impl FnMut(T, Json) -> T) -> T {
        self.iter().rev().fold(init, f)
    }

    /// Elements in `start..end` with relative indices; `None` end means the length.
    pub fn slice(&self, start: isize, end: Option<isize>) -> Vec<Json> {
        let items = self.to_vec();
        let len = items.len();
        let start = relative_index(start, len);
        let end = end.map_or(len, |end| relative_index(end, len));
        if start >= end {
            return Vec::new();
        }
        items[start..end].to_vec()
    }

    /// Plain-text elements joined by `separator`.
    pub fn join(&self, separator: &str) -> String {
        self.map(|item| stringify(&item)).join(separator)
    }

    // =========================================================================
    // Mutators
    // =========================================================================

    /// Fold staged writes into the committed sequence and mark fully dirty.
    fn begin_mutation(&self) {
        let staged = std::mem::take(&mut *self.inner.staged.borrow_mut());
        let mut items = self.inner.items.borrow_mut();
        for (index, value) in staged {
            if let Some(slot) = items.get_mut(index) {
                *slot = value;
            }
        }
        self.inner.fully_dirty.set(true);
    }

    /// Append elements; returns the new length.
    pub fn push(&self, raw: &[Json]) -> Result<usize> {
        let values = self.coerce_all(raw)?;
        self.begin_mutation();
        let len = {
            let mut items = self.inner.items.borrow_mut();
            items.extend(values);
            items.len()
        };
        self.schedule_commit();
        Ok(len)
    }

    /// Remove and return the last element.
    pub fn pop(&self) -> Option<Json> {
        self.begin_mutation();
        let value = self.inner.items.borrow_mut().pop();
        self.schedule_commit();
        value.map(|v| v.flatten())
    }

    /// Remove and return the first element.
    pub fn shift(&self) -> Option<Json> {
        self.begin_mutation();
        let value = {
            let mut items = self.inner.items.borrow_mut();
            if items.is_empty() { None } else { Some(items.remove(0)) }
        };
        self.schedule_commit();
        value.map(|v| v.flatten())
    }

    /// Prepend elements; returns the new length.
    pub fn unshift(&self, raw: &[Json]) -> Result<usize> {
        let values = self.coerce_all(raw)?;
        self.begin_mutation();
        let len = {
            let mut items = self.inner.items.borrow_mut();
            items.splice(0..0, values);
            items.len()
        };
        self.schedule_commit();
        Ok(len)
    }

    /// Remove `delete_count` elements at `start` (relative) and insert
    /// `raw` in their place. A `None` count removes through the end.
    /// Returns the removed elements.
    pub fn splice(&self, start: isize, delete_count: Option<usize>, raw: &[Json]) -> Result<Vec<Json>> {
        let values = self.coerce_all(raw)?;
        self.begin_mutation();
        let removed: Vec<Value> = {
            let mut items = self.inner.items.borrow_mut();
            let len = items.len();
            let start = relative_index(start, len);
            let end = delete_count.map_or(len, |count| start.saturating_add(count).min(len));
            items.splice(start..end, values).collect()
        };
        self.schedule_commit();
        Ok(removed.iter().map(Value::flatten).collect())
    }

    /// Stable sort by a comparison over flattened elements.
    pub fn sort_by(&self, mut compare: impl FnMut(&Json, &Json) -> Ordering) {
        self.begin_mutation();
        {
            let mut items = self.inner.items.borrow_mut();
            let mut keyed: Vec<(Json, Value)> =
                items.drain(..).map(|value| (value.flatten(), value)).collect();
            keyed.sort_by(|a, b| compare(&a.0, &b.0));
            items.extend(keyed.into_iter().map(|(_, value)| value));
        }
        self.schedule_commit();
    }

    /// Sort by plain-text order of the elements.
    pub fn sort(&self) {
        self.sort_by(|a, b| stringify(a).cmp(&stringify(b)));
    }

    pub fn reverse(&self) {
        self.begin_mutation();
        self.inner.items.borrow_mut().reverse();
        self.schedule_commit();
    }

    /// Overwrite `start..end` (relative) with coercions of `raw`.
    pub fn fill(&self, raw: &Json, start: isize, end: Option<isize>) -> Result<()> {
        let len = self.len();
        let start = relative_index(start, len);
        let end = end.map_or(len, |end| relative_index(end, len));
        let values = (start..end.max(start))
            .map(|_| self.coerce_one(raw))
            .collect::<Result<Vec<_>>>()?;
        self.begin_mutation();
        {
            let mut items = self.inner.items.borrow_mut();
            for (slot, value) in items[start..end.max(start)].iter_mut().zip(values) {
                *slot = value;
            }
        }
        self.schedule_commit();
        Ok(())
    }

    /// Copy `start..end` (relative) to `target` (relative) within the sequence.
    pub fn copy_within(&self, target: isize, start: isize, end: Option<isize>) {
        self.begin_mutation();
        {
            let mut items = self.inner.items.borrow_mut();
            let len = items.len();
            let target = relative_index(target, len);
            let start = relative_index(start, len);
            let end = end.map_or(len, |end| relative_index(end, len));
            let count = end.saturating_sub(start).min(len - target);
            let source: Vec<Value> = items[start..start + count].to_vec();
            for (offset, value) in source.into_iter().enumerate() {
                items[target + offset] = value;
            }
        }
        self.schedule_commit();
    }

    /// Write one element.
    ///
    /// Writes past the end are ignored (returns false). A value equal to
    /// the committed element discards its staged write; a value equal to
    /// the visible element is a no-op.
    pub fn set(&self, index: usize, raw: &Json) -> Result<bool> {
        if index >= self.len() {
            return Ok(false);
        }
        let value = self.coerce_one(raw)?;

        let matches_committed = self.inner.items.borrow()[index].structurally_eq(&value);
        if matches_committed {
            if self.inner.staged.borrow_mut().remove(&index).is_some() {
                self.schedule_commit();
            }
            return Ok(true);
        }
        let matches_visible = self
            .inner
            .staged
            .borrow()
            .get(&index)
            .is_some_and(|staged| staged.structurally_eq(&value));
        if matches_visible {
            return Ok(true);
        }

        if self.inner.fully_dirty.get() {
            self.inner.items.borrow_mut()[index] = value;
        } else {
            self.inner.staged.borrow_mut().insert(index, value);
        }
        self.schedule_commit();
        Ok(true)
    }

    // =========================================================================
    // Commit
    // =========================================================================

    pub fn commit(&self) -> Result<bool> {
        self.commit_with(false)
    }

    /// Drain staged writes, commit reactive elements that were not just
    /// overwritten, and notify if anything changed.
    pub fn commit_with(&self, force_redraw: bool) -> Result<bool> {
        let _guard = CommitGuard::enter(&self.inner.state)?;

        let staged = std::mem::take(&mut *self.inner.staged.borrow_mut());
        let mut dirty = self.inner.fully_dirty.replace(false) || !staged.is_empty();

        let children: Vec<Value> = {
            let mut items = self.inner.items.borrow_mut();
            for (index, value) in &staged {
                if let Some(slot) = items.get_mut(*index) {
                    *slot = value.clone();
                }
            }
            items
                .iter()
                .enumerate()
                .filter(|(index, value)| value.is_reactive() && !staged.contains_key(index))
                .map(|(_, value)| value.clone())
                .collect()
        };

        for child in children {
            dirty |= child.commit()?;
        }

        tracing::debug!(dirty, staged = staged.len(), len = self.len(), "collection commit");

        if dirty || force_redraw {
            let callback = self.inner.on_commit.borrow().clone();
            if let Some(callback) = callback {
                callback();
            }
        }
        Ok(dirty)
    }

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
            if let Err(err) = ReactiveCollection::from_inner(inner).commit() {
                tracing::error!(error = %err, "scheduled collection commit failed");
            }
        });
    }
}

impl fmt::Debug for ReactiveCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveCollection")
            .field("kind", &self.inner.item_kind.to_string())
            .field("items", &self.to_vec())
            .field("staged", &self.staged_len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::FrameScheduler;
    use crate::types::ObjectSchema;
    use serde_json::json;

    fn ints(items: Json) -> ReactiveCollection {
        let Json::Array(items) = items else { panic!("expected array") };
        ReactiveCollection::from_raw(ValueKind::Int, &items, &CoerceContext::detached()).unwrap()
    }

    #[test]
    fn test_coerces_elements() {
        let c = ints(json!(["4", 2.9, true]));
        assert_eq!(c.to_vec(), vec![json!(4), json!(2), json!(0)]);
    }

    #[test]
    fn test_queries() {
        let c = ints(json!([1, 2, 3, 2]));
        assert!(c.contains(&json!(3)));
        assert_eq!(c.index_of(&json!(2)), Some(1));
        assert_eq!(c.last_index_of(&json!(2)), Some(3));
        assert_eq!(c.find(|v| v.as_i64() > Some(1)), Some(json!(2)));
        assert_eq!(c.find_last_index(|v| v == &json!(1)), Some(0));
        assert!(c.all(|v| v.is_number()));
        assert!(!c.any(|v| v.is_string()));
        assert_eq!(c.filter(|v| v != &json!(2)), vec![json!(1), json!(3)]);
        assert_eq!(c.fold(0, |acc, v| acc + v.as_i64().unwrap()), 8);
        assert_eq!(c.slice(1, Some(-1)), vec![json!(2), json!(3)]);
        assert_eq!(c.join("-"), "1-2-3-2");
        assert_eq!(c.at(-1), Some(json!(2)));
        assert_eq!(c.at(-5), None);
        // Queries leave state untouched
        assert!(!c.is_fully_dirty());
    }

    #[test]
    fn test_index_write_stages() {
        let c = ints(json!([1, 2, 3]));
        c.commit().unwrap();
        assert!(c.set(1, &json!(20)).unwrap());
        assert_eq!(c.staged_len(), 1);
        assert_eq!(c.get(1), Some(json!(20)));
        assert!(c.commit().unwrap());
        assert_eq!(c.to_vec(), vec![json!(1), json!(20), json!(3)]);
    }

    #[test]
    fn test_index_write_idempotent() {
        let c = ints(json!([1, 2, 3]));
        c.commit().unwrap();
        c.set(0, &json!(1)).unwrap();
        assert_eq!(c.staged_len(), 0);
        c.set(0, &json!(5)).unwrap();
        c.set(0, &json!(5)).unwrap();
        assert_eq!(c.staged_len(), 1);
        c.set(0, &json!("1")).unwrap();
        assert_eq!(c.staged_len(), 0);
        assert!(!c.commit().unwrap());
    }

    #[test]
    fn test_reentrant_commit_is_rejected() {
        let c = ints(json!([1, 2]));
        let seen = Rc::new(RefCell::new(None));
        let (handle, slot) = (c.clone(), seen.clone());
        c.set_on_commit(move || {
            *slot.borrow_mut() = Some(handle.commit());
        });
        c.push(&[json!(3)]).unwrap();
        assert!(c.commit().unwrap());
        assert_eq!(*seen.borrow(), Some(Err(crate::error::RuntimeError::ReentrantCommit)));

        c.clear_on_commit();
        c.set(0, &json!(9)).unwrap();
        assert!(c.commit().unwrap());
        assert_eq!(c.to_vec(), vec![json!(9), json!(2), json!(3)]);
    }

    #[test]
    fn test_write_past_end_is_ignored() {
        let c = ints(json!([1]));
        assert!(!c.set(3, &json!(9)).unwrap());
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn test_mutator_folds_staged_writes_first() {
        let c = ints(json!([1, 2, 3]));
        c.commit().unwrap();
        c.set(0, &json!(10)).unwrap();
        c.push(&[json!("4")]).unwrap();
        assert_eq!(c.staged_len(), 0);
        assert!(c.is_fully_dirty());
        assert_eq!(c.to_vec(), vec![json!(10), json!(2), json!(3), json!(4)]);

        // Fully dirty writes land directly
        c.set(1, &json!(7)).unwrap();
        assert_eq!(c.staged_len(), 0);
        assert!(c.commit().unwrap());
        assert!(!c.is_fully_dirty());
    }

    #[test]
    fn test_structural_mutators() {
        let c = ints(json!([3, 1, 2]));
        assert_eq!(c.pop(), Some(json!(2)));
        assert_eq!(c.shift(), Some(json!(3)));
        assert_eq!(c.unshift(&[json!(5), json!(6)]).unwrap(), 3);
        assert_eq!(c.to_vec(), vec![json!(5), json!(6), json!(1)]);

        let removed = c.splice(1, Some(1), &[json!(8), json!(9)]).unwrap();
        assert_eq!(removed, vec![json!(6)]);
        assert_eq!(c.to_vec(), vec![json!(5), json!(8), json!(9), json!(1)]);

        c.sort_by(|a, b| a.as_i64().cmp(&b.as_i64()));
        assert_eq!(c.to_vec(), vec![json!(1), json!(5), json!(8), json!(9)]);

        c.reverse();
        assert_eq!(c.to_vec(), vec![json!(9), json!(8), json!(5), json!(1)]);

        c.fill(&json!(0), 1, Some(3)).unwrap();
        assert_eq!(c.to_vec(), vec![json!(9), json!(0), json!(0), json!(1)]);

        c.copy_within(0, 3, None);
        assert_eq!(c.to_vec(), vec![json!(1), json!(0), json!(0), json!(1)]);
    }

    #[test]
    fn test_default_sort_is_textual() {
        let c = ints(json!([10, 9, 1]));
        c.sort();
        assert_eq!(c.to_vec(), vec![json!(1), json!(10), json!(9)]);
    }

    #[test]
    fn test_empty_pop_and_shift() {
        let c = ints(json!([]));
        assert_eq!(c.pop(), None);
        assert_eq!(c.shift(), None);
        assert!(c.is_fully_dirty());
    }

    #[test]
    fn test_nested_elements_commit() {
        let schema = Rc::new(ObjectSchema::from_json_str(r#"{"label":"String"}"#).unwrap());
        let kind = ValueKind::Object(schema);
        let c = ReactiveCollection::from_raw(kind, &[json!({ "label": "a" })], &CoerceContext::detached())
            .unwrap();
        c.commit().unwrap();
        assert!(!c.commit().unwrap());

        let first = c.get_value(0).unwrap();
        first.as_object().unwrap().set("label", &json!("b")).unwrap();
        assert!(c.commit().unwrap());
        assert_eq!(c.flatten(), json!([{ "label": "b" }]));
    }

    #[test]
    fn test_burst_of_mutations_schedules_once() {
        let scheduler = FrameScheduler::new();
        let c = ReactiveCollection::new(ValueKind::String, &CoerceContext::scheduled(scheduler.clone()));
        let count = Rc::new(Cell::new(0));
        let counter = count.clone();
        c.set_on_commit(move || counter.set(counter.get() + 1));

        c.push(&[json!("a")]).unwrap();
        c.push(&[json!("b")]).unwrap();
        c.set(0, &json!("z")).unwrap();
        assert_eq!(scheduler.pending(), 1);

        scheduler.run_frame();
        assert_eq!(count.get(), 1);
        assert_eq!(c.to_vec(), vec![json!("z"), json!("b")]);
    }
}
