//! Delimited-field keys.

/// Key built from 1-based delimited fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldKey {
    delimiter: String,
    /// 1-based field numbers, in the order they were configured.
    fields: Vec<usize>,
}

impl FieldKey {
    pub fn new(delimiter: impl Into<String>, fields: Vec<usize>) -> Self {
        Self {
            delimiter: delimiter.into(),
            fields,
        }
    }

    /// Join the configured fields with the delimiter.
    ///
    /// Fields past the end of the record are skipped. If none are present
    /// the key is empty.
    pub fn extract(&self, record: &str) -> String {
        let pieces: Vec<&str> = record.split(self.delimiter.as_str()).collect();

        let selected: Vec<&str> = self
            .fields
            .iter()
            .filter_map(|field| field.checked_sub(1).and_then(|i| pieces.get(i)))
            .copied()
            .collect();

        selected.join(self.delimiter.as_str())
    }
}
