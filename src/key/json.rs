//! JSON path keys.

use serde_json::Value;
use snafu::ResultExt;
use std::borrow::Cow;

use crate::error::{KeyError, MalformedJsonSnafu};

/// Parse a record as a JSON document.
pub(crate) fn parse_record(record: &str) -> Result<Value, KeyError> {
    serde_json::from_str(record).context(MalformedJsonSnafu)
}

/// Follow a dotted path through a document.
///
/// Object members are looked up by name and array elements by numeric
/// segment. Anything else along the way makes the path missing.
pub fn resolve_path<'a, S: AsRef<str>>(document: &'a Value, path: &[S]) -> Option<&'a Value> {
    path.iter().try_fold(document, |value, segment| {
        let segment = segment.as_ref();
        match value {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
    })
}

/// Textual form of a resolved value: strings verbatim, everything else as
/// compact JSON.
pub fn render_value(value: &Value) -> Cow<'_, str> {
    match value {
        Value::String(s) => Cow::Borrowed(s),
        other => Cow::Owned(other.to_string()),
    }
}

/// Key built from dotted paths into a JSON record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonKey {
    delimiter: String,
    paths: Vec<Vec<String>>,
}

impl JsonKey {
    /// Create a key from dotted paths such as `user.id` or `items.0.sku`.
    pub fn new(delimiter: impl Into<String>, paths: &[String]) -> Self {
        Self {
            delimiter: delimiter.into(),
            paths: paths
                .iter()
                .map(|p| p.split('.').map(str::to_string).collect())
                .collect(),
        }
    }

    /// Join the values at the configured paths with the delimiter.
    ///
    /// A malformed record is an error; a missing path is skipped.
    pub fn extract(&self, record: &str) -> Result<String, KeyError> {
        let document = parse_record(record)?;

        let values: Vec<Cow<'_, str>> = self
            .paths
            .iter()
            .filter_map(|path| resolve_path(&document, path))
            .map(render_value)
            .collect();

        Ok(values.join(self.delimiter.as_str()))
    }
}
