mod schema;
#[allow(clippy::module_inception)]
mod value;
mod value_type;

pub use schema::{FieldSchema, TypeSchema};
pub use value::{PropertyKey, Value, ValueKey, MAX_VALUE_DEPTH};
pub use value_type::ValueType;
