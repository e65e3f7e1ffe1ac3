//! Tables and records decoded from Flux query results.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset};

use crate::value::Value;

/// Data types supported in InfluxDB annotated CSV.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataType {
    /// String data type.
    String,
    /// 64-bit floating point.
    Double,
    /// Boolean value.
    Bool,
    /// Signed 64-bit integer.
    Long,
    /// Unsigned 64-bit integer.
    UnsignedLong,
    /// Duration (Go-style, e.g., "1h30m").
    Duration,
    /// Base64-encoded binary data.
    Base64Binary,
    /// RFC3339 timestamp (with optional nanosecond precision).
    TimeRFC,
}

impl FromStr for DataType {
    /// The unrecognized annotation.
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input {
            "string" => Ok(Self::String),
            "double" => Ok(Self::Double),
            "boolean" => Ok(Self::Bool),
            "long" => Ok(Self::Long),
            "unsignedLong" => Ok(Self::UnsignedLong),
            "duration" => Ok(Self::Duration),
            "base64Binary" => Ok(Self::Base64Binary),
            "dateTime:RFC3339" | "dateTime:RFC3339Nano" => Ok(Self::TimeRFC),
            _ => Err(input.to_string()),
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DataType::String => "string",
            DataType::Double => "double",
            DataType::Bool => "boolean",
            DataType::Long => "long",
            DataType::UnsignedLong => "unsignedLong",
            DataType::Duration => "duration",
            DataType::Base64Binary => "base64Binary",
            DataType::TimeRFC => "dateTime:RFC3339",
        };
        write!(f, "{}", s)
    }
}

/// Metadata for a column in a Flux table.
#[derive(Clone, Debug, PartialEq)]
pub struct FluxColumn {
    /// Column name.
    pub name: String,
    /// Data type of the column.
    pub data_type: DataType,
    /// Whether this column is part of the group key.
    pub group: bool,
    /// Default value for missing entries.
    pub default_value: String,
}

impl Default for FluxColumn {
    fn default() -> Self {
        Self {
            name: String::new(),
            data_type: DataType::String,
            group: false,
            default_value: String::new(),
        }
    }
}

/// Column layout of one annotated CSV block.
#[derive(Clone, Debug)]
pub struct FluxTableMetadata {
    /// Position of the annotation block in the response.
    pub position: i64,
    /// Column definitions for this block.
    pub columns: Vec<FluxColumn>,
}

impl FluxTableMetadata {
    /// Create metadata with `column_count` default columns.
    pub fn new(position: i64, column_count: usize) -> Self {
        let columns = vec![FluxColumn::default(); column_count];
        Self { position, columns }
    }

    /// Get a column by name.
    pub fn column(&self, name: &str) -> Option<&FluxColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Names of the columns forming the group key.
    pub fn group_key(&self) -> impl Iterator<Item = &str> {
        self.columns
            .iter()
            .filter(|c| c.group)
            .map(|c| c.name.as_str())
    }
}

/// A single record (row) from a Flux query result.
#[derive(Clone, Debug, PartialEq)]
pub struct FluxRecord {
    /// Table index this record belongs to.
    pub table: i64,
    /// Column name to value mapping.
    pub values: BTreeMap<String, Value>,
}

impl FluxRecord {
    /// Create a new empty FluxRecord.
    pub fn new(table: i64) -> Self {
        Self {
            table,
            values: BTreeMap::new(),
        }
    }

    /// Get a value by column name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Get value as str.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(|v| v.as_string())
    }

    /// Get value as f64.
    pub fn get_double(&self, name: &str) -> Option<f64> {
        self.values.get(name).and_then(|v| v.as_double())
    }

    /// Get value as i64.
    pub fn get_long(&self, name: &str) -> Option<i64> {
        self.values.get(name).and_then(|v| v.as_long())
    }

    /// Get value as bool.
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.values.get(name).and_then(|v| v.as_bool())
    }

    /// Start of the queried range (`_start`).
    pub fn start(&self) -> Option<&DateTime<FixedOffset>> {
        self.values.get("_start").and_then(|v| v.as_time())
    }

    /// End of the queried range (`_stop`).
    pub fn stop(&self) -> Option<&DateTime<FixedOffset>> {
        self.values.get("_stop").and_then(|v| v.as_time())
    }

    /// Get the timestamp (`_time`).
    pub fn time(&self) -> Option<&DateTime<FixedOffset>> {
        self.values.get("_time").and_then(|v| v.as_time())
    }

    /// Get the measurement name (`_measurement`).
    pub fn measurement(&self) -> Option<&str> {
        self.get_str("_measurement")
    }

    /// Get the field name (`_field`).
    pub fn field(&self) -> Option<&str> {
        self.get_str("_field")
    }

    /// Get the field value (`_value`).
    pub fn value(&self) -> Option<&Value> {
        self.values.get("_value")
    }

    /// Tag columns: string columns other than `result`, `table` and the
    /// underscore-prefixed ones.
    pub fn tags(&self) -> BTreeMap<&str, &str> {
        self.values
            .iter()
            .filter(|(k, _)| !k.starts_with('_') && *k != "result" && *k != "table")
            .filter_map(|(k, v)| v.as_string().map(|s| (k.as_str(), s)))
            .collect()
    }
}

/// All records sharing one table index.
#[derive(Clone, Debug)]
pub struct FluxTable {
    /// Table index (`table` column).
    pub index: i64,
    /// Columns of the annotation block that introduced this table.
    pub columns: Vec<FluxColumn>,
    /// Records in the order the server sent them.
    pub records: Vec<FluxRecord>,
}

impl FluxTable {
    /// Create an empty table with the given layout.
    pub fn new(index: i64, columns: Vec<FluxColumn>) -> Self {
        Self {
            index,
            columns,
            records: Vec::new(),
        }
    }

    /// Names of the columns forming the group key.
    pub fn group_key(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.group)
            .map(|c| c.name.as_str())
            .collect()
    }

    /// Whether the table has no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
