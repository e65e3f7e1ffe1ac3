//! Async parser for InfluxDB annotated CSV format.
//!
//! This module provides a streaming parser for InfluxDB's annotated CSV format,
//! which is the format returned by the `/api/v2/query` endpoint.
//!
//! Every table in the response starts with an annotation block:
//!
//! ```text
//! #datatype,string,long,dateTime:RFC3339,double,string
//! #group,false,false,false,false,true
//! #default,_result,,,,
//! ,result,table,_time,_value,_field
//! ,,0,2019-01-30T12:28:36Z,980,pressure
//! ```
//!
//! Records are tagged with the value of their `table` column, so rows of
//! different tables may share one block or arrive in separate blocks.

use std::collections::BTreeMap;

use base64::Engine;
use chrono::DateTime;
use csv_async::{AsyncReaderBuilder, StringRecord, Trim};
use futures::StreamExt;
use go_parse_duration::parse_duration;
use ordered_float::OrderedFloat;
use tokio::io::AsyncRead;

use crate::error::{Error, Result};
use crate::table::{DataType, FluxRecord, FluxTableMetadata};
use crate::value::Value;

/// Internal state of the CSV parser.
#[derive(PartialEq)]
enum ParsingState {
    /// Normal data rows.
    Normal,
    /// Processing annotation rows.
    Annotation,
    /// Error state (InfluxDB returned an error in the CSV).
    Error,
}

/// Async streaming parser for InfluxDB annotated CSV.
///
/// This parser reads an async byte stream and yields `FluxRecord`s one at a time,
/// without loading the entire response into memory.
///
/// # Example
///
/// ```ignore
/// use influxdb_platform::parser::AnnotatedCsvParser;
///
/// let mut parser = AnnotatedCsvParser::new(body.as_bytes());
/// while let Some(record) = parser.next().await? {
///     let columns = &parser.metadata().unwrap().columns;
///     println!("{} columns: {:?}", columns.len(), record);
/// }
/// ```
pub struct AnnotatedCsvParser<R: AsyncRead + Unpin> {
    csv: csv_async::AsyncReader<R>,
    table_position: i64,
    table: Option<FluxTableMetadata>,
    parsing_state: ParsingState,
    data_type_annotation_found: bool,
}

impl<R: AsyncRead + Unpin + Send> AnnotatedCsvParser<R> {
    /// Create a new parser from an async reader.
    pub fn new(reader: R) -> Self {
        let csv = AsyncReaderBuilder::new()
            .has_headers(false) // We handle headers/annotations ourselves
            .trim(Trim::Fields)
            .flexible(true)
            .create_reader(reader);

        Self {
            csv,
            table_position: 0,
            table: None,
            parsing_state: ParsingState::Normal,
            data_type_annotation_found: false,
        }
    }

    /// Layout of the block the last returned record came from.
    pub fn metadata(&self) -> Option<&FluxTableMetadata> {
        self.table.as_ref()
    }

    /// Parse and return the next record.
    ///
    /// Returns:
    /// - `Ok(Some(record))` - Successfully parsed a record
    /// - `Ok(None)` - End of stream (EOF)
    /// - `Err(e)` - Decode, query or transport error
    pub async fn next(&mut self) -> Result<Option<FluxRecord>> {
        let mut records = self.csv.records();

        loop {
            let row = match records.next().await {
                Some(Ok(r)) => r,
                Some(Err(e)) if e.is_io_error() => return Err(Error::Transport(Box::new(e))),
                Some(Err(e)) => return Err(Error::decode(format!("CSV read error: {}", e), "")),
                None => return Ok(None), // EOF
            };

            // Skip empty rows or rows with only 1 column
            if row.len() <= 1 {
                continue;
            }

            let first = row.get(0).unwrap_or_default();

            // Annotation rows open a new block
            if first.starts_with('#') && self.parsing_state == ParsingState::Normal {
                self.table = Some(FluxTableMetadata::new(self.table_position, row.len() - 1));
                self.table_position += 1;
                self.parsing_state = ParsingState::Annotation;
                self.data_type_annotation_found = false;
            }

            let table = match &mut self.table {
                Some(t) => t,
                None => {
                    return Err(Error::decode(
                        "no annotations found before data",
                        fragment(&row),
                    ));
                }
            };

            if row.len() - 1 != table.columns.len() {
                return Err(Error::decode(
                    format!(
                        "column count mismatch: expected {}, got {}",
                        table.columns.len(),
                        row.len() - 1
                    ),
                    fragment(&row),
                ));
            }

            let cells = || row.iter().skip(1);

            match first {
                // Data row (first cell is empty)
                "" => match self.parsing_state {
                    ParsingState::Annotation => {
                        if !self.data_type_annotation_found {
                            return Err(Error::decode(
                                "#datatype annotation not found",
                                fragment(&row),
                            ));
                        }
                        if row.get(1) == Some("error") {
                            self.parsing_state = ParsingState::Error;
                        } else {
                            // Header row
                            for (col, name) in table.columns.iter_mut().zip(cells()) {
                                col.name = name.to_string();
                            }
                            self.parsing_state = ParsingState::Normal;
                        }
                    }
                    ParsingState::Error => {
                        let message = match row.get(1) {
                            Some(m) if !m.is_empty() => m.to_string(),
                            _ => "Unknown query error".to_string(),
                        };
                        let reference = row
                            .get(2)
                            .filter(|r| !r.is_empty())
                            .map(str::to_string);
                        return Err(Error::Query { message, reference });
                    }
                    ParsingState::Normal => {
                        let mut values = BTreeMap::new();
                        for (col, cell) in table.columns.iter().zip(cells()) {
                            let v = if cell.is_empty() { col.default_value.as_str() } else { cell };
                            let parsed = parse_value(v, col.data_type, &col.name)
                                .map_err(|message| Error::decode(message, fragment(&row)))?;
                            values.insert(col.name.clone(), parsed);
                        }
                        let index = values
                            .get("table")
                            .and_then(Value::as_long)
                            .unwrap_or(table.position);
                        return Ok(Some(FluxRecord {
                            table: index,
                            values,
                        }));
                    }
                },
                "#datatype" => {
                    self.data_type_annotation_found = true;
                    for (col, cell) in table.columns.iter_mut().zip(cells()) {
                        col.data_type = cell.parse().map_err(|dt| {
                            Error::decode(format!("unknown data type: {}", dt), fragment(&row))
                        })?;
                    }
                }
                "#group" => {
                    for (col, cell) in table.columns.iter_mut().zip(cells()) {
                        col.group = cell == "true";
                    }
                }
                "#default" => {
                    for (col, cell) in table.columns.iter_mut().zip(cells()) {
                        col.default_value = cell.to_string();
                    }
                }
                other => {
                    return Err(Error::decode(
                        format!("invalid first cell: {}", other),
                        fragment(&row),
                    ));
                }
            }
        }
    }
}

/// Raw text of a row, for error reporting.
fn fragment(row: &StringRecord) -> String {
    row.iter().collect::<Vec<_>>().join(",")
}

/// Parse a cell into a Value based on the column's data type.
fn parse_value(s: &str, data_type: DataType, column_name: &str) -> std::result::Result<Value, String> {
    // Empty cells are null for non-string types
    if s.is_empty() && data_type != DataType::String {
        return Ok(Value::Null);
    }

    match data_type {
        DataType::String => Ok(Value::String(s.to_string())),
        DataType::Double => {
            let v = s.parse::<f64>().map_err(|e| {
                format!("invalid double '{}' for column '{}': {}", s, column_name, e)
            })?;
            Ok(Value::Double(OrderedFloat::from(v)))
        }
        DataType::Bool => match s.to_lowercase().as_str() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(format!("invalid boolean '{}' for column '{}'", s, column_name)),
        },
        DataType::Long => {
            let v = s.parse::<i64>().map_err(|e| {
                format!("invalid long '{}' for column '{}': {}", s, column_name, e)
            })?;
            Ok(Value::Long(v))
        }
        DataType::UnsignedLong => {
            let v = s.parse::<u64>().map_err(|e| {
                format!("invalid unsignedLong '{}' for column '{}': {}", s, column_name, e)
            })?;
            Ok(Value::UnsignedLong(v))
        }
        DataType::Duration => {
            let nanos = parse_duration(s)
                .map_err(|_| format!("invalid duration '{}' for column '{}'", s, column_name))?;
            Ok(Value::Duration(chrono::Duration::nanoseconds(nanos)))
        }
        DataType::Base64Binary => {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(s)
                .map_err(|e| {
                    format!("invalid base64 '{}' for column '{}': {}", s, column_name, e)
                })?;
            Ok(Value::Base64Binary(bytes))
        }
        DataType::TimeRFC => {
            let t = DateTime::parse_from_rfc3339(s).map_err(|e| {
                format!(
                    "invalid RFC3339 timestamp '{}' for column '{}': {}",
                    s, column_name, e
                )
            })?;
            Ok(Value::TimeRFC(t))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn parse_all(csv: &str) -> Result<Vec<FluxRecord>> {
        let mut parser = AnnotatedCsvParser::new(csv.as_bytes());
        let mut out = Vec::new();
        while let Some(r) = parser.next().await? {
            out.push(r);
        }
        Ok(out)
    }

    #[test]
    fn test_parse_value_types() {
        assert_eq!(
            parse_value("hello", DataType::String, "c").unwrap(),
            Value::String("hello".to_string())
        );
        assert_eq!(
            parse_value("906.6666666666666", DataType::Double, "c").unwrap(),
            Value::Double(OrderedFloat(906.6666666666666))
        );
        assert_eq!(parse_value("-42", DataType::Long, "c").unwrap(), Value::Long(-42));
        assert_eq!(parse_value("true", DataType::Bool, "c").unwrap(), Value::Bool(true));
        assert_eq!(parse_value("", DataType::Long, "c").unwrap(), Value::Null);
        assert_eq!(
            parse_value("1h", DataType::Duration, "c").unwrap(),
            Value::Duration(chrono::Duration::hours(1))
        );
        assert_eq!(
            parse_value("AQID", DataType::Base64Binary, "c").unwrap(),
            Value::Base64Binary(vec![1, 2, 3])
        );
    }

    #[test]
    fn test_parse_value_rejects_garbage() {
        assert!(parse_value("abc", DataType::Double, "_value").is_err());
        assert!(parse_value("yes", DataType::Bool, "_value").is_err());
        assert!(parse_value("yesterday", DataType::TimeRFC, "_time").is_err());
    }

    #[tokio::test]
    async fn test_single_table() {
        let csv = "#datatype,string,long,dateTime:RFC3339,double,string\n\
                   #group,false,false,false,false,true\n\
                   #default,_result,,,,\n\
                   ,result,table,_time,_value,_field\n\
                   ,,0,2019-01-30T12:28:36Z,980,pressure\n\
                   ,,0,2019-01-30T12:28:46Z,860,pressure\n";
        let records = parse_all(csv).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get_str("result"), Some("_result"));
        assert_eq!(records[0].table, 0);
        assert_eq!(records[1].get_double("_value"), Some(860.0));
    }

    #[tokio::test]
    async fn test_table_column_overrides_block_position() {
        let csv = "#datatype,string,long,string,long\n\
                   #group,false,false,true,false\n\
                   #default,_result,,,\n\
                   ,result,table,_field,_value\n\
                   ,,4,wind_speed,10\n\
                   ,,7,pressure,980\n";
        let records = parse_all(csv).await.unwrap();
        assert_eq!(records[0].table, 4);
        assert_eq!(records[1].table, 7);
    }

    #[tokio::test]
    async fn test_empty_body() {
        assert!(parse_all("").await.unwrap().is_empty());
        assert!(parse_all("\r\n").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_error_table() {
        let csv = "#datatype,string,string\n\
                   #group,true,true\n\
                   #default,,\n\
                   ,error,reference\n\
                   ,failed to parse query,897\n";
        match parse_all(csv).await {
            Err(Error::Query { message, reference }) => {
                assert_eq!(message, "failed to parse query");
                assert_eq!(reference.as_deref(), Some("897"));
            }
            other => panic!("expected query error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_datatype_reports_row() {
        let csv = "#datatype,string,float32\n,result,_value\n";
        match parse_all(csv).await {
            Err(Error::Decode { message, fragment }) => {
                assert!(message.contains("float32"));
                assert_eq!(fragment, "#datatype,string,float32");
            }
            other => panic!("expected decode error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_bad_cell_reports_row() {
        let csv = "#datatype,string,long\n\
                   #group,false,false\n\
                   #default,_result,\n\
                   ,result,_value\n\
                   ,,twelve\n";
        match parse_all(csv).await {
            Err(Error::Decode { fragment, .. }) => assert_eq!(fragment, ",,twelve"),
            other => panic!("expected decode error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_data_without_annotations() {
        let err = parse_all(",result,table\n,,0\n").await.unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));
    }

    #[tokio::test]
    async fn test_column_mismatch() {
        let csv = "#datatype,string,long\n\
                   #group,false,false\n\
                   #default,_result,\n\
                   ,result,table\n\
                   ,,0,extra\n";
        match parse_all(csv).await {
            Err(Error::Decode { message, fragment }) => {
                assert!(message.contains("expected 2, got 3"));
                assert_eq!(fragment, ",,0,extra");
            }
            other => panic!("expected decode error, got {:?}", other),
        }
    }
}
