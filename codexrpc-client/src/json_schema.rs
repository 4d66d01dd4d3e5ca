//! JSON Schema (Draft 7) validation against generated app-server schemas
//!
//! `codex app-server generate-json-schema --out <dir>` writes one file per
//! message family (`ClientRequest.json`, `ServerNotification.json`, ...).
//! [`JsonSchemaValidator::from_dir`] compiles every `*.json` file in such a
//! directory, keyed by file stem, and routes each message to the schema for
//! its kind.
//!
//! ```rust,no_run
//! use codexrpc_client::{ClientBuilder, JsonSchemaValidator};
//! use std::sync::Arc;
//!
//! # async fn example() -> codexrpc_core::Result<()> {
//! let validator = JsonSchemaValidator::from_dir("schema/json")?;
//! let client = ClientBuilder::new()
//!     .with_schema_validator(Arc::new(validator))
//!     .connect()
//!     .await?;
//! # Ok(())
//! # }
//! ```

use crate::schema::{
    IncomingKind, SchemaValidator, CLIENT_NOTIFICATION_SCHEMA, CLIENT_REQUEST_SCHEMA,
};
use codexrpc_core::{Error, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// Compiled schemas keyed by name
pub struct JsonSchemaValidator {
    validators: BTreeMap<String, jsonschema::Validator>,
}

impl JsonSchemaValidator {
    /// Load every `*.json` file in `dir`
    ///
    /// # Errors
    ///
    /// Fails if the directory is missing or unreadable, or if a file is not
    /// JSON or not a valid Draft 7 schema.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(Error::Schema(format!(
                "Schema directory not found: {}",
                dir.display()
            )));
        }

        let entries = std::fs::read_dir(dir).map_err(|e| {
            Error::Schema(format!("Failed to read schema directory: {} ({})", dir.display(), e))
        })?;

        let mut schemas = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| Error::Schema(format!("Failed to read schema directory: {}", e)))?
                .path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };

            let schema = std::fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|text| serde_json::from_str::<Value>(&text).map_err(|e| e.to_string()))
                .map_err(|e| {
                    Error::Schema(format!("Failed to load schema: {} ({})", path.display(), e))
                })?;
            schemas.push((name.to_string(), schema));
        }

        let validator = Self::from_schemas(schemas)?;
        tracing::debug!(
            dir = %dir.display(),
            schemas = validator.validators.len(),
            "loaded app-server schemas"
        );
        Ok(validator)
    }

    /// Compile already-parsed schemas
    pub fn from_schemas<I, S>(schemas: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, Value)>,
        S: Into<String>,
    {
        let mut validators = BTreeMap::new();
        for (name, schema) in schemas {
            let name = name.into();
            let validator = jsonschema::draft7::new(&schema).map_err(|e| {
                Error::Schema(format!("Invalid schema {}: {}", name, e))
            })?;
            validators.insert(name, validator);
        }
        Ok(Self { validators })
    }

    /// Loaded schema names, sorted
    pub fn schema_names(&self) -> Vec<&str> {
        self.validators.keys().map(String::as_str).collect()
    }

    /// Check `message` against the schema called `schema`
    pub fn validate(&self, schema: &str, message: &Value) -> Result<()> {
        let validator = self.validators.get(schema).ok_or_else(|| {
            Error::Schema(format!(
                "Schema not found: {}. Available: {:?}",
                schema,
                self.schema_names()
            ))
        })?;

        match validator.iter_errors(message).next() {
            None => Ok(()),
            Some(e) => Err(Error::Schema(format!(
                "Schema validation failed for {}: {}",
                schema, e
            ))),
        }
    }
}

impl SchemaValidator for JsonSchemaValidator {
    fn validate_outgoing_request(&self, message: &Value) -> Result<()> {
        self.validate(CLIENT_REQUEST_SCHEMA, message)
    }

    fn validate_outgoing_notification(&self, message: &Value) -> Result<()> {
        self.validate(CLIENT_NOTIFICATION_SCHEMA, message)
    }

    fn validate_incoming(&self, message: &Value) -> Result<()> {
        match IncomingKind::of(message) {
            Some(kind) => self.validate(kind.schema_name(), message),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for JsonSchemaValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonSchemaValidator")
            .field("schemas", &self.schema_names())
            .finish()
    }
}
