pub mod w3c;

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use thiserror::Error;

/// Errors produced while reading records from a log source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("missing or invalid header: {0}")]
    Header(String),
    #[error("malformed line {line}: {message}")]
    Line { line: u64, message: String },
}

/// Semantic type tag for a log field, guessed from the field name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Date,
    Time,
    Timestamp,
    Ip,
    Uri,
    Float64,
    Int64,
    Bool,
    String,
}

/// A field name paired with its guessed kind. Built once per file from the
/// header and immutable for the file's lifetime.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub kind: Kind,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let kind = guess_kind(&name);
        Self { name, kind }
    }
}

/// Guess the kind of a field from its (extended log format) name.
///
/// Mirrors the naming conventions of W3C extended log files: `date`/`time`
/// columns, `gmttime`, `time-taken` in fractional seconds, address fields
/// ending in `-ip`, counters ending in `-bytes`/`-port`/`-status`/`-count`,
/// the `cached` flag, and URI-carrying fields. Anything unrecognized is a
/// string.
pub fn guess_kind(name: &str) -> Kind {
    let name = name.to_ascii_lowercase();
    match name.as_str() {
        "date" => return Kind::Date,
        "time" => return Kind::Time,
        "gmttime" | "localtime" | "timestamp" => return Kind::Timestamp,
        "time-taken" => return Kind::Float64,
        "bytes" => return Kind::Int64,
        "cached" => return Kind::Bool,
        _ => {}
    }
    if name.ends_with("-ip") {
        Kind::Ip
    } else if name.ends_with("-bytes")
        || name.ends_with("-port")
        || name.ends_with("-status")
        || name.ends_with("-count")
    {
        Kind::Int64
    } else if name.ends_with("-cached") {
        Kind::Bool
    } else if name.ends_with("-time-taken") {
        Kind::Float64
    } else if name.contains("uri") || name.contains("referer") || name.contains("referrer") {
        Kind::Uri
    } else {
        Kind::String
    }
}

/// Wall-clock time of day with nanosecond precision, detached from any date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeOfDay {
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub nanosecond: u32,
}

const USECS_PER_HOUR: i64 = 3_600_000_000;
const USECS_PER_MINUTE: i64 = 60_000_000;
const USECS_PER_SEC: i64 = 1_000_000;
const NANOSECS_PER_USEC: i64 = 1_000;

impl TimeOfDay {
    pub fn new(hour: u8, minute: u8, second: u8, nanosecond: u32) -> Self {
        Self { hour, minute, second, nanosecond }
    }

    /// The zero value (exact midnight, no fraction) stands in for "not set".
    pub fn is_zero(&self) -> bool {
        self.hour == 0 && self.minute == 0 && self.second == 0 && self.nanosecond == 0
    }

    /// Microseconds elapsed since midnight.
    pub fn microseconds(&self) -> i64 {
        i64::from(self.hour) * USECS_PER_HOUR
            + i64::from(self.minute) * USECS_PER_MINUTE
            + i64::from(self.second) * USECS_PER_SEC
            + i64::from(self.nanosecond) / NANOSECS_PER_USEC
    }

    pub fn to_naive_time(&self) -> Option<NaiveTime> {
        NaiveTime::from_hms_nano_opt(
            u32::from(self.hour),
            u32::from(self.minute),
            u32::from(self.second),
            self.nanosecond,
        )
    }
}

/// A loosely typed value as produced by the log parser.
///
/// Text stays raw bytes: access logs are not reliably UTF-8 and the repair
/// chain needs the original byte sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    /// An explicit absent marker (`-` in extended log format).
    Empty,
    Date(NaiveDate),
    Time(TimeOfDay),
    Timestamp(DateTime<Utc>),
    Ip(IpAddr),
    Float(f64),
    Int(i64),
    Bool(bool),
    Text(Vec<u8>),
}

/// Parsed file header: the declared field names, in order.
#[derive(Debug, Clone)]
pub struct Header {
    names: Vec<String>,
    index: Arc<HashMap<String, usize>>,
}

impl Header {
    pub fn new(names: Vec<String>) -> Self {
        let index = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self { names, index: Arc::new(index) }
    }

    pub fn field_names(&self) -> &[String] {
        &self.names
    }

    /// Whether the file natively carries a GMT timestamp column.
    pub fn has_gmt_time(&self) -> bool {
        self.index.contains_key("gmttime")
    }

    pub(crate) fn index(&self) -> Arc<HashMap<String, usize>> {
        Arc::clone(&self.index)
    }
}

/// One parsed log line: values aligned with the header, plus the derived
/// `gmttime` when the header lacks one.
#[derive(Debug, Clone)]
pub struct Record {
    values: Vec<RawValue>,
    index: Arc<HashMap<String, usize>>,
    derived_gmt: Option<RawValue>,
}

impl Record {
    pub(crate) fn new(
        values: Vec<RawValue>,
        index: Arc<HashMap<String, usize>>,
        derived_gmt: Option<RawValue>,
    ) -> Self {
        Self { values, index, derived_gmt }
    }

    /// Look up a field value by name. The derived `gmttime` is visible here
    /// even though it never appeared in the file.
    pub fn get(&self, name: &str) -> Option<&RawValue> {
        if let Some(&pos) = self.index.get(name) {
            return self.values.get(pos);
        }
        if name == "gmttime" {
            return self.derived_gmt.as_ref();
        }
        None
    }
}

/// The seam between the pipeline and whatever parses raw log text.
///
/// A source hands over a header once, then yields records until exhaustion.
/// The pipeline never looks at raw log bytes itself.
pub trait RecordSource {
    fn header(&mut self) -> Result<Header, SourceError>;
    fn next_record(&mut self) -> Result<Option<Record>, SourceError>;
}
