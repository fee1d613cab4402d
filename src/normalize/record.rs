use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

/// Column holding epoch milliseconds. Always the first column.
pub const TIME_COLUMN: &str = "time";
/// Column holding the reporting host.
pub const HOST_COLUMN: &str = "hostname";
/// Column holding the sample value of a narrow series.
pub const VALUE_COLUMN: &str = "value";

/// Tag key/value pairs attached to a row.
pub type Tags = BTreeMap<String, String>;

/// A named series in the sink's column/points layout.
///
/// Every row has exactly `columns.len()` values and column names are unique.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricRecord {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(rename = "points")]
    pub rows: Vec<Vec<Value>>,
}

impl MetricRecord {
    /// Creates an empty record with a fixed column layout.
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
            rows: Vec::new(),
        }
    }

    /// Appends a positional row. Short rows are padded with null, long rows truncated.
    pub fn push_values(&mut self, mut values: Vec<Value>) {
        values.resize(self.columns.len(), Value::Null);
        self.rows.push(values);
    }

    /// Appends a row produced by a [`RowBuilder`], aligning it by column name.
    ///
    /// Columns unknown to the record are appended and existing rows are
    /// back-filled with null.
    pub fn push_row(&mut self, row: Row) {
        let Row { columns, values } = row;

        let mut aligned = vec![Value::Null; self.columns.len()];
        for (column, value) in columns.into_iter().zip(values) {
            match self.column_index(&column) {
                Some(idx) => aligned[idx] = value,
                None => {
                    self.columns.push(column);
                    for existing in &mut self.rows {
                        existing.push(Value::Null);
                    }
                    aligned.push(value);
                }
            }
        }

        self.rows.push(aligned);
    }

    /// Position of a column, if present.
    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    /// Value at `row` for the named column.
    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row)?.get(idx)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// One assembled row: column names aligned with values.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub columns: Vec<String>,
    pub values: Vec<Value>,
}

/// Builds a single row from base values and tags.
///
/// This is the only place the tag merge rule lives: a non-empty `hostname`
/// tag replaces the host slot, and any key colliding with an existing column
/// is prefixed with `_` until it is unique.
#[derive(Debug, Clone)]
pub struct RowBuilder {
    columns: Vec<String>,
    values: Vec<Value>,
    host_index: usize,
}

impl RowBuilder {
    /// Wide row starting with `time, hostname`.
    pub fn wide(time: u64, host: &str) -> Self {
        Self {
            columns: vec![TIME_COLUMN.to_string(), HOST_COLUMN.to_string()],
            values: vec![Value::from(time), Value::from(host)],
            host_index: 1,
        }
    }

    /// Narrow row starting with `time, value, hostname`.
    pub fn narrow(time: u64, value: Value, host: &str) -> Self {
        Self {
            columns: vec![
                TIME_COLUMN.to_string(),
                VALUE_COLUMN.to_string(),
                HOST_COLUMN.to_string(),
            ],
            values: vec![Value::from(time), value, Value::from(host)],
            host_index: 2,
        }
    }

    /// Adds a value column, renaming on collision.
    pub fn field(mut self, name: &str, value: Value) -> Self {
        self.push_column(name, value);
        self
    }

    /// Adds every entry of `fields` in iteration order.
    pub fn fields<'a, I>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a Value)>,
    {
        for (name, value) in fields {
            self.push_column(name, value.clone());
        }
        self
    }

    /// Merges a single tag.
    pub fn tag(mut self, key: &str, value: &str) -> Self {
        self.merge_tag(key, value);
        self
    }

    /// Merges every tag.
    pub fn tags(mut self, tags: &Tags) -> Self {
        for (key, value) in tags {
            self.merge_tag(key, value);
        }
        self
    }

    /// Current host slot value.
    pub fn host(&self) -> &str {
        self.values
            .get(self.host_index)
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    pub fn finish(self) -> Row {
        Row {
            columns: self.columns,
            values: self.values,
        }
    }

    /// Single-row record named `name`.
    pub fn into_record(self, name: impl Into<String>) -> MetricRecord {
        let Row { columns, values } = self.finish();
        MetricRecord {
            name: name.into(),
            columns,
            rows: vec![values],
        }
    }

    fn merge_tag(&mut self, key: &str, value: &str) {
        if key == HOST_COLUMN && !value.is_empty() {
            self.values[self.host_index] = Value::from(value);
            return;
        }
        self.push_column(key, Value::from(value));
    }

    fn push_column(&mut self, name: &str, value: Value) {
        let column = unique_column(&self.columns, name);
        self.columns.push(column);
        self.values.push(value);
    }
}

/// Returns `name`, prefixed with `_` as often as needed to avoid `existing`.
pub fn unique_column(existing: &[String], name: &str) -> String {
    let mut column = name.to_string();
    while existing.iter().any(|c| *c == column) {
        column.insert(0, '_');
    }
    column
}

/// Splits `"key:value"` agent tags into a map. A bare tag maps to an empty value.
pub fn explode_tags<'a, I>(raw: I) -> Tags
where
    I: IntoIterator<Item = &'a str>,
{
    let mut tags = Tags::new();
    for tag in raw {
        match tag.split_once(':') {
            Some((key, value)) => tags.insert(key.to_string(), value.to_string()),
            None => tags.insert(tag.to_string(), String::new()),
        };
    }
    tags
}
