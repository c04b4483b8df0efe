//! Partition key extraction.
//!
//! A record is turned into a [`PartitionKey`] by exactly one strategy:
//! delimited fields, JSON paths, or a compiled key expression. Missing
//! fields are skipped rather than treated as errors, so a record with none
//! of the configured fields yields the empty key.

pub mod expr;
mod fields;
mod json;

use std::borrow::Cow;

use crate::error::KeyError;

pub use expr::Program;
pub use fields::FieldKey;
pub use json::{JsonKey, render_value, resolve_path};

/// Key derived from a record.
#[derive(Debug, Clone, PartialEq)]
pub enum PartitionKey {
    Text(String),
    /// Only produced by expressions when integer bucket selection is active.
    Number(f64),
}

impl PartitionKey {
    /// Textual form of the key, used for hashing and error messages.
    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            PartitionKey::Text(text) => Cow::Borrowed(text),
            PartitionKey::Number(n) => Cow::Owned(expr::format_number(*n)),
        }
    }
}

/// Key expression bound to its evaluation options.
#[derive(Debug, Clone)]
pub struct ExpressionKey {
    program: Program,
    /// Parse each record as JSON and bind it as `this`.
    json: bool,
    /// Delimiter used to build `fields`.
    delimiter: String,
    /// Accept number results (integer bucket selection).
    allow_numbers: bool,
}

impl ExpressionKey {
    pub fn new(program: Program, json: bool, delimiter: String, allow_numbers: bool) -> Self {
        Self {
            program,
            json,
            delimiter,
            allow_numbers,
        }
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    fn extract(&self, record: &str) -> Result<PartitionKey, KeyError> {
        let document = if self.json {
            Some(json::parse_record(record)?)
        } else {
            None
        };

        let value = self
            .program
            .evaluate(record, &self.delimiter, document.as_ref())
            .map_err(|source| KeyError::Evaluate { source })?;

        match value {
            serde_json::Value::String(text) => Ok(PartitionKey::Text(text)),
            serde_json::Value::Number(n) if self.allow_numbers => {
                Ok(PartitionKey::Number(n.as_f64().unwrap_or(f64::NAN)))
            }
            other => Err(KeyError::InvalidKeyType {
                type_name: expr::type_name(&other),
                allowed: if self.allow_numbers {
                    "string or number"
                } else {
                    "string"
                },
            }),
        }
    }
}

/// Strategy for deriving a partition key from a record.
#[derive(Debug, Clone)]
pub enum KeyExtractor {
    Fields(FieldKey),
    Json(JsonKey),
    Expression(ExpressionKey),
}

impl KeyExtractor {
    /// Derive the partition key for one record (without its terminator).
    pub fn extract(&self, record: &str) -> Result<PartitionKey, KeyError> {
        match self {
            KeyExtractor::Fields(key) => Ok(PartitionKey::Text(key.extract(record))),
            KeyExtractor::Json(key) => key.extract(record).map(PartitionKey::Text),
            KeyExtractor::Expression(key) => key.extract(record),
        }
    }

    /// Short name of the strategy, for logs.
    pub fn mode(&self) -> &'static str {
        match self {
            KeyExtractor::Fields(_) => "fields",
            KeyExtractor::Json(_) => "json",
            KeyExtractor::Expression(_) => "expression",
        }
    }
}
