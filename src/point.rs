//! Points and their line protocol encoding.
//!
//! A [`Point`] can only be obtained through [`Point::new`], which checks every
//! invariant up front. Once built, a point always encodes to valid line protocol.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};

/// Value of a single field.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    /// Signed 64-bit integer, encoded with an `i` suffix.
    Integer(i64),
    /// 64-bit float. Must be finite.
    Float(f64),
    /// Boolean.
    Boolean(bool),
    /// String, encoded double-quoted.
    String(String),
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Integer(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::Integer(i64::from(v))
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Boolean(v)
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::String(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_string())
    }
}

/// Unit of the timestamp sent on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum WritePrecision {
    /// Seconds.
    Seconds,
    /// Milliseconds.
    Milliseconds,
    /// Microseconds.
    Microseconds,
    /// Nanoseconds.
    #[default]
    Nanoseconds,
}

impl WritePrecision {
    /// Value of the `precision` query parameter.
    pub fn as_str(&self) -> &'static str {
        match self {
            WritePrecision::Seconds => "s",
            WritePrecision::Milliseconds => "ms",
            WritePrecision::Microseconds => "us",
            WritePrecision::Nanoseconds => "ns",
        }
    }
}

impl std::fmt::Display for WritePrecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timestamp of a point together with the unit it is written in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PointTime {
    instant: DateTime<Utc>,
    precision: WritePrecision,
}

impl PointTime {
    /// Create a timestamp written with the given precision.
    pub fn new(instant: DateTime<Utc>, precision: WritePrecision) -> Self {
        Self { instant, precision }
    }

    /// The instant of the measurement.
    pub fn instant(&self) -> DateTime<Utc> {
        self.instant
    }

    /// The wire precision.
    pub fn precision(&self) -> WritePrecision {
        self.precision
    }

    /// Integer timestamp in the configured unit, truncated toward zero
    /// (pre-epoch instants included).
    ///
    /// Returns `None` when the instant does not fit in the unit's i64 range.
    pub fn encoded(&self) -> Option<i64> {
        match self.precision {
            WritePrecision::Nanoseconds => self.instant.timestamp_nanos_opt(),
            coarse => {
                let per_unit = match coarse {
                    WritePrecision::Seconds => 1_000_000_000,
                    WritePrecision::Milliseconds => 1_000_000,
                    _ => 1_000,
                };
                let secs = i128::from(self.instant.timestamp());
                let nanos = i128::from(self.instant.timestamp_subsec_nanos());
                i64::try_from((secs * 1_000_000_000 + nanos) / per_unit).ok()
            }
        }
    }
}

/// One timestamped measurement.
///
/// # Example
///
/// ```ignore
/// use influxdb_platform::{FieldValue, Point, PointTime, WritePrecision};
///
/// let point = Point::new(
///     "weather_outdoor",
///     [("home", "100"), ("sensor", "120")],
///     [("pressure", FieldValue::from(980)), ("battery_voltage", FieldValue::from(2.6))],
///     Some(PointTime::new(chrono::Utc::now(), WritePrecision::Seconds)),
/// )?;
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct Point {
    measurement: String,
    tags: BTreeMap<String, String>,
    fields: BTreeMap<String, FieldValue>,
    time: Option<PointTime>,
}

impl Point {
    /// Build a validated point.
    ///
    /// Fails with [`Error::Validation`] if the measurement is empty, there are
    /// no fields, a tag or field key is empty, a tag value is empty, a float
    /// field is not finite, a name or tag value contains a line break, or the
    /// timestamp does not fit its precision.
    /// Repeated keys keep the last value.
    pub fn new<M, T, TK, TV, F, FK, FV>(
        measurement: M,
        tags: T,
        fields: F,
        time: Option<PointTime>,
    ) -> Result<Self>
    where
        M: Into<String>,
        T: IntoIterator<Item = (TK, TV)>,
        TK: Into<String>,
        TV: Into<String>,
        F: IntoIterator<Item = (FK, FV)>,
        FK: Into<String>,
        FV: Into<FieldValue>,
    {
        let measurement = measurement.into();
        if measurement.is_empty() {
            return Err(Error::Validation("measurement name is empty".to_string()));
        }
        check_single_line("measurement", &measurement)?;

        let mut tag_map = BTreeMap::new();
        for (k, v) in tags {
            let (k, v) = (k.into(), v.into());
            if k.is_empty() {
                return Err(Error::Validation(format!(
                    "empty tag key in measurement '{}'",
                    measurement
                )));
            }
            if v.is_empty() {
                return Err(Error::Validation(format!("tag '{}' has an empty value", k)));
            }
            check_single_line("tag key", &k)?;
            check_single_line("tag value", &v)?;
            tag_map.insert(k, v);
        }

        let mut field_map = BTreeMap::new();
        for (k, v) in fields {
            let (k, v) = (k.into(), v.into());
            if k.is_empty() {
                return Err(Error::Validation(format!(
                    "empty field key in measurement '{}'",
                    measurement
                )));
            }
            check_single_line("field key", &k)?;
            if let FieldValue::Float(f) = v {
                if !f.is_finite() {
                    return Err(Error::Validation(format!(
                        "field '{}' is not a finite number: {}",
                        k, f
                    )));
                }
            }
            field_map.insert(k, v);
        }
        if field_map.is_empty() {
            return Err(Error::Validation(format!(
                "measurement '{}' has no fields",
                measurement
            )));
        }

        if let Some(t) = &time {
            if t.encoded().is_none() {
                return Err(Error::Validation(format!(
                    "timestamp {} out of range for precision {}",
                    t.instant, t.precision
                )));
            }
        }

        Ok(Self {
            measurement,
            tags: tag_map,
            fields: field_map,
            time,
        })
    }

    /// Measurement name.
    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    /// Tags, ordered by key.
    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    /// Fields, ordered by key.
    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    /// Timestamp, if the point carries one.
    pub fn time(&self) -> Option<&PointTime> {
        self.time.as_ref()
    }

    /// Precision the point is written with.
    ///
    /// Points without a timestamp use nanoseconds.
    pub fn precision(&self) -> WritePrecision {
        self.time.map(|t| t.precision).unwrap_or_default()
    }

    /// Encode as one line of line protocol (no trailing newline).
    pub fn to_line_protocol(&self) -> String {
        let mut line = String::with_capacity(64);
        escape_into(&mut line, &self.measurement, &[',', ' ']);

        for (k, v) in &self.tags {
            line.push(',');
            escape_into(&mut line, k, &[',', '=', ' ']);
            line.push('=');
            escape_into(&mut line, v, &[',', '=', ' ']);
        }

        let mut sep = ' ';
        for (k, v) in &self.fields {
            line.push(sep);
            sep = ',';
            escape_into(&mut line, k, &[',', '=', ' ']);
            line.push('=');
            match v {
                FieldValue::Integer(i) => {
                    let _ = write!(line, "{}i", i);
                }
                FieldValue::Float(f) => {
                    let _ = write!(line, "{}", f);
                }
                FieldValue::Boolean(b) => {
                    let _ = write!(line, "{}", b);
                }
                FieldValue::String(s) => {
                    line.push('"');
                    escape_into(&mut line, s, &['"', '\\']);
                    line.push('"');
                }
            }
        }

        // Checked in `new`.
        if let Some(ts) = self.time.and_then(|t| t.encoded()) {
            let _ = write!(line, " {}", ts);
        }

        line
    }
}

/// Line protocol has no escape for line breaks in names and tag values.
fn check_single_line(what: &str, s: &str) -> Result<()> {
    if s.contains(['\n', '\r']) {
        return Err(Error::Validation(format!(
            "{} {:?} contains a line break",
            what, s
        )));
    }
    Ok(())
}

fn escape_into(out: &mut String, s: &str, special: &[char]) {
    for c in s.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
}
