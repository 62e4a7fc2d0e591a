use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use jsonschema::JSONSchema;
use log::{info, warn};
use serde_json::Value;
use thiserror::Error;

use crate::request::JobRequest;

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("can't read message {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("message isn't valid JSON: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("message fails schema validation: {}", .0.join("; "))]
    Invalid(Vec<String>),

    #[error("can't deserialise message: {0}")]
    Deserialise(#[source] serde_json::Error),

    #[error("request schema doesn't compile: {0}")]
    Schema(String),

    #[error("request rejected: {0}")]
    Rejected(String),
}

/// A calculation request message on disk
pub struct Message<'a> {
    pub path: PathBuf,
    pub compiled_schema: &'a JSONSchema,
}

impl<'a> Message<'a> {
    /// Read, validate and deserialise the message
    ///
    /// Relative file paths in the request resolve against the message's directory.
    pub fn read(&self) -> Result<JobRequest, MessageError> {
        let json: Value = self.parse_untyped_json()?;

        match self.validate(&json) {
            Ok(_) => {
                info!("Message is valid");
                let base = self.path.parent().unwrap_or_else(|| Path::new("."));
                let request = self.parse_json(json)?.resolve(base);
                request.validate()?;
                Ok(request)
            }
            Err(err) => {
                warn!("Message fails validation");
                Err(err)
            }
        }
    }

    fn validate(&self, json: &Value) -> Result<(), MessageError> {
        info!("Validating raw message against JSON schema");
        self.compiled_schema
            .validate(json)
            .map_err(|errors| MessageError::Invalid(errors.map(|e| e.to_string()).collect()))
    }

    fn read_file(&self) -> Result<String, MessageError> {
        let path: &Path = self.path.as_path();
        info!("Reading message at {}", path.display());
        fs::read_to_string(path).map_err(|source| {
            warn!("Can't read calculation request at path {}: {}", path.display(), source);
            MessageError::Read { path: path.to_path_buf(), source }
        })
    }

    fn parse_json(&self, value: Value) -> Result<JobRequest, MessageError> {
        info!("Deserialising valid JSON into typed Rust object");
        serde_json::from_value::<JobRequest>(value).map_err(MessageError::Deserialise)
    }

    fn parse_untyped_json(&self) -> Result<Value, MessageError> {
        let json_string = self.read_file()?;
        serde_json::from_str::<Value>(&json_string).map_err(MessageError::Decode)
    }
}
