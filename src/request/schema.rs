use jsonschema::JSONSchema;
use log::info;
use serde_json::Value;

use crate::request::MessageError;

static REQUEST_SCHEMA: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/schema/request.json"));

/// Compile the embedded request schema
pub fn load_schema() -> Result<JSONSchema, MessageError> {
    info!("Compiling request schema");
    let schema: Value = serde_json::from_str(REQUEST_SCHEMA).map_err(MessageError::Decode)?;
    JSONSchema::compile(&schema).map_err(|err| MessageError::Schema(err.to_string()))
}
