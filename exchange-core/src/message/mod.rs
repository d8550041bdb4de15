//! Message model: a tagged, schema-validated payload (§3).
//!
//! A single concrete `Message` struct carrying a dynamic payload, because
//! the exchange core deals in messages whose shape is only known by name
//! at runtime (plugins register schemas after the crate is compiled).

pub mod schema;
pub mod types;

pub use schema::{FieldType, Schema, SchemaError};
pub use types::Message;
