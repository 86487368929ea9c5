//! Module-side helpers.
//!
//! What a compiled component module links against: wrappers over the host
//! imports that handle linear memory for it, value marshalling between
//! handles and plain JSON, and [`ComponentDefinition`], which emits the
//! whole export surface of a component kind from its manifest.
//!
//! ```
//! use serde_json::json;
//! use spark_bridge::guest::{self, GuestModule};
//! use spark_bridge::Runtime;
//!
//! let mut rt = Runtime::with_module(GuestModule::new().finish());
//! let handle = guest::send_json(&mut rt, &json!({ "a": [1, "x"] })).unwrap();
//! assert_eq!(rt.handles().get(handle).unwrap().to_json(), json!({ "a": [1, "x"] }));
//! ```

mod component;

pub use component::{ComponentDefinition, GuestModule, Props, RenderContext, RenderFn};

use serde_json::{Map, Value as Json};

use crate::bridge::{Capability, Handle, NULL_HANDLE, Runtime, Word};
use crate::error::{Result, RuntimeError};
use crate::types::{number_to_json, ValueKind};

// =============================================================================
// Strings
// =============================================================================

/// Copy `text` into a fresh buffer, run `f` with `(ptr, len)`, free the buffer.
pub fn with_str<T>(rt: &mut Runtime, text: &str, f: impl FnOnce(&mut Runtime, Word, Word) -> Result<T>) -> Result<T> {
    let len = Word::try_from(text.len()).map_err(|_| RuntimeError::MemoryOutOfBounds { ptr: 0, len: Word::MAX })?;
    let ptr = rt.alloc(len)?;
    rt.memory_mut().write(ptr, text.as_bytes())?;
    let result = f(rt, ptr, len);
    rt.free(ptr)?;
    result
}

/// Send a string to the host and return its handle.
pub fn send_str(rt: &mut Runtime, text: &str) -> Result<Handle> {
    with_str(rt, text, |rt, ptr, len| rt.send_string(ptr, len))
}

/// Read a string handle back through the stage/load protocol.
///
/// None if the handle is not a string.
pub fn receive_string(rt: &mut Runtime, handle: Handle) -> Result<Option<String>> {
    let Ok(len) = Word::try_from(rt.stage_string(handle)?) else {
        return Ok(None);
    };
    let ptr = rt.alloc(len)?;
    rt.load_string(ptr)?;
    let text = rt.memory().read_str(ptr, len);
    rt.free(ptr)?;
    text.map(Some)
}

pub fn log(rt: &mut Runtime, message: &str) -> Result<()> {
    with_str(rt, message, |rt, ptr, len| rt.console_log(ptr, len))
}

/// Abort the current host call.
pub fn raise(rt: &mut Runtime, message: &str) -> Result<()> {
    with_str(rt, message, |rt, ptr, len| rt.raise_error(ptr, len))
}

// =============================================================================
// Values
// =============================================================================

fn member(rt: &mut Runtime, handle: Handle, key: &str) -> Result<Handle> {
    with_str(rt, key, |rt, ptr, len| rt.get_member(handle, ptr, len))
}

/// Read a handle as plain JSON shaped by `kind`.
///
/// Sequences are read by index until the null sentinel; objects (and
/// brushes) by their declared keys. Functions and nodes read as null.
pub fn receive_value(rt: &mut Runtime, handle: Handle, kind: &ValueKind) -> Result<Json> {
    match kind {
        ValueKind::Iter(item) => {
            if !rt.is_array(handle)? {
                return receive_any(rt, handle);
            }
            let mut items = Vec::new();
            loop {
                let element = member(rt, handle, &items.len().to_string())?;
                if element == NULL_HANDLE {
                    break;
                }
                let value = receive_value(rt, element, item);
                rt.drop_handle(element)?;
                items.push(value?);
            }
            Ok(Json::Array(items))
        }
        ValueKind::Object(schema) => {
            let keys: Vec<(String, ValueKind)> =
                schema.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
            receive_fields(rt, handle, &keys)
        }
        ValueKind::Brush if rt.type_of(handle)? == Word::from(Capability::OBJECT.bits()) => {
            let channels: Vec<(String, ValueKind)> =
                ["r", "g", "b", "a"].iter().map(|k| (k.to_string(), ValueKind::Float)).collect();
            receive_fields(rt, handle, &channels)
        }
        _ => receive_any(rt, handle),
    }
}

fn receive_fields(rt: &mut Runtime, handle: Handle, fields: &[(String, ValueKind)]) -> Result<Json> {
    let mut map = Map::with_capacity(fields.len());
    for (key, kind) in fields {
        let field = member(rt, handle, key)?;
        if field == NULL_HANDLE {
            continue;
        }
        let value = receive_value(rt, field, kind);
        rt.drop_handle(field)?;
        map.insert(key.clone(), value?);
    }
    Ok(Json::Object(map))
}

/// Scalars by capability; arrays element by element.
fn receive_any(rt: &mut Runtime, handle: Handle) -> Result<Json> {
    let capability = Capability::from_bits_truncate(rt.type_of(handle)? as u16);
    if capability == Capability::NUMBER {
        Ok(number_to_json(rt.as_number(handle)?))
    } else if capability == Capability::BOOLEAN {
        Ok(Json::Bool(rt.as_bool(handle)? == 1))
    } else if capability == Capability::STRING {
        Ok(receive_string(rt, handle)?.map_or(Json::Null, Json::String))
    } else if capability == Capability::ARRAY {
        let mut items = Vec::new();
        loop {
            let element = member(rt, handle, &items.len().to_string())?;
            if element == NULL_HANDLE {
                break;
            }
            let value = receive_any(rt, element);
            rt.drop_handle(element)?;
            items.push(value?);
        }
        Ok(Json::Array(items))
    } else {
        Ok(Json::Null)
    }
}

/// Build a host value from plain JSON and return its handle.
pub fn send_json(rt: &mut Runtime, value: &Json) -> Result<Handle> {
    match value {
        Json::Null => Ok(NULL_HANDLE),
        Json::Bool(b) => Ok(rt.send_bool(Word::from(*b))),
        Json::Number(n) => Ok(rt.send_number(n.as_f64().unwrap_or(0.0))),
        Json::String(s) => send_str(rt, s),
        Json::Array(items) => {
            let array = rt.new_array();
            for item in items {
                let handle = send_json(rt, item)?;
                rt.array_push(array, handle)?;
            }
            Ok(array)
        }
        Json::Object(map) => {
            let object = rt.new_object();
            for (key, item) in map {
                let handle = send_json(rt, item)?;
                with_str(rt, key, |rt, ptr, len| rt.object_set(object, ptr, len, handle))?;
            }
            Ok(object)
        }
    }
}

// =============================================================================
// Document and reconciler
// =============================================================================

/// Visit `position` under `parent`. No tag means a text node.
pub fn enter(
    rt: &mut Runtime,
    parent: Handle,
    tag: Option<&str>,
    position: Word,
    text: Option<&str>,
) -> Result<Handle> {
    let text = match text {
        Some(text) => send_str(rt, text)?,
        None => NULL_HANDLE,
    };
    let node = match tag {
        Some(tag) => with_str(rt, tag, |rt, ptr, len| rt.reconcile_enter(parent, (ptr, len), position, text)),
        None => rt.reconcile_enter(parent, (0, 0), position, text),
    };
    if text != NULL_HANDLE {
        rt.drop_handle(text)?;
    }
    node
}

/// Visit `position` under `parent`, keeping its node out of the document.
pub fn out(rt: &mut Runtime, parent: Handle, tag: Option<&str>, position: Word) -> Result<()> {
    match tag {
        Some(tag) => with_str(rt, tag, |rt, ptr, len| rt.reconcile_out(parent, (ptr, len), position)),
        None => rt.reconcile_out(parent, (0, 0), position),
    }
}

pub fn bind_event(rt: &mut Runtime, node: Handle, event: &str, function: Handle) -> Result<()> {
    with_str(rt, event, |rt, ptr, len| rt.bind_event(node, ptr, len, function))
}

pub fn set_style(rt: &mut Runtime, node: Handle, property: &str, value: &str) -> Result<()> {
    with_str(rt, property, |rt, pptr, plen| {
        with_str(rt, value, |rt, vptr, vlen| rt.set_style(node, (pptr, plen), (vptr, vlen)))
    })
}
