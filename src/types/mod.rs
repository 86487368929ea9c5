//! Typed value layer.
//!
//! Every property value exchanged between the host and a component module
//! belongs to one [`ValueKind`]. Raw input (plain JSON) is coerced into that
//! kind; the reverse direction is [`Value::flatten`].
//!
//! Coercion is lenient and total for data kinds: bad input collapses to the
//! kind's default rather than failing.

mod brush;
mod kind;
mod length;
mod scalar;
mod value;

pub use brush::{Brush, BrushKind, Rgba};
pub use kind::{ObjectSchema, ValueKind};
pub use length::{Length, LengthUnit};
pub use scalar::{
    coerce_alignment, coerce_boolean, coerce_float, coerce_int, coerce_string, format_number,
    number_to_json, parse_float_prefix, parse_int_prefix, stringify, to_int32, Alignment,
};
pub use value::{coerce, default_value, Iterable, Value};
