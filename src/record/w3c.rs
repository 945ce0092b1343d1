use std::io::BufRead;
use std::net::IpAddr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use super::{guess_kind, Header, Kind, RawValue, Record, RecordSource, SourceError, TimeOfDay};

/// Record source for W3C extended log format files.
///
/// Directive lines start with `#`; the only one that matters is `#Fields:`,
/// which declares the column names. Value tokens are space-separated, may be
/// double-quoted when they contain spaces, and use `-` as the absent marker.
/// Text fields keep their raw bytes so charset repair can happen downstream.
pub struct W3cReader<R> {
    input: R,
    header: Option<Header>,
    kinds: Vec<Kind>,
    derive_gmt: bool,
    date_pos: Option<usize>,
    time_pos: Option<usize>,
    line_no: u64,
    buf: Vec<u8>,
}

impl<R: BufRead> W3cReader<R> {
    pub fn new(input: R) -> Self {
        Self {
            input,
            header: None,
            kinds: Vec::new(),
            derive_gmt: false,
            date_pos: None,
            time_pos: None,
            line_no: 0,
            buf: Vec::new(),
        }
    }

    fn read_line(&mut self) -> Result<Option<&[u8]>, SourceError> {
        self.buf.clear();
        let n = self.input.read_until(b'\n', &mut self.buf)?;
        if n == 0 {
            return Ok(None);
        }
        self.line_no += 1;
        while matches!(self.buf.last(), Some(b'\n') | Some(b'\r')) {
            self.buf.pop();
        }
        Ok(Some(&self.buf))
    }

    fn parse_fields_directive(line: &[u8]) -> Option<Vec<String>> {
        let text = std::str::from_utf8(line).ok()?;
        let rest = text.strip_prefix("#Fields:")?;
        let names: Vec<String> = rest.split_whitespace().map(str::to_string).collect();
        if names.is_empty() { None } else { Some(names) }
    }

    fn derive_gmt_value(&self, values: &[RawValue]) -> RawValue {
        let date = match self.date_pos.and_then(|pos| values.get(pos)) {
            Some(RawValue::Date(d)) => *d,
            _ => return RawValue::Empty,
        };
        let time = match self.time_pos.and_then(|pos| values.get(pos)) {
            Some(RawValue::Time(t)) => *t,
            _ => return RawValue::Empty,
        };
        match time.to_naive_time() {
            Some(t) => RawValue::Timestamp(date.and_time(t).and_utc()),
            None => RawValue::Empty,
        }
    }
}

impl<R: BufRead> RecordSource for W3cReader<R> {
    fn header(&mut self) -> Result<Header, SourceError> {
        if let Some(header) = &self.header {
            return Ok(header.clone());
        }
        loop {
            let Some(line) = self.read_line()? else {
                return Err(SourceError::Header("no #Fields directive found".into()));
            };
            if !line.starts_with(b"#") {
                return Err(SourceError::Header(
                    "data before the #Fields directive".into(),
                ));
            }
            if let Some(names) = Self::parse_fields_directive(line) {
                self.kinds = names.iter().map(|n| guess_kind(n)).collect();
                self.date_pos = names.iter().position(|n| n == "date");
                self.time_pos = names.iter().position(|n| n == "time");
                let header = Header::new(names);
                self.derive_gmt = !header.has_gmt_time();
                self.header = Some(header.clone());
                return Ok(header);
            }
        }
    }

    fn next_record(&mut self) -> Result<Option<Record>, SourceError> {
        if self.header.is_none() {
            self.header()?;
        }
        loop {
            let Some(line) = self.read_line()? else {
                return Ok(None);
            };
            if line.is_empty() || line.starts_with(b"#") {
                continue;
            }
            let tokens = tokenize(line);
            if tokens.len() != self.kinds.len() {
                return Err(SourceError::Line {
                    line: self.line_no,
                    message: format!(
                        "expected {} fields, got {}",
                        self.kinds.len(),
                        tokens.len()
                    ),
                });
            }
            let values: Vec<RawValue> = tokens
                .iter()
                .zip(self.kinds.iter())
                .map(|(token, kind)| parse_token(token, *kind))
                .collect();
            let derived = self.derive_gmt.then(|| self.derive_gmt_value(&values));
            let index = self
                .header
                .as_ref()
                .map(Header::index)
                .ok_or_else(|| SourceError::Header("header not parsed".into()))?;
            return Ok(Some(Record::new(values, index, derived)));
        }
    }
}

/// Split a line into field tokens, honoring double quotes. A doubled quote
/// inside a quoted token stands for a literal quote.
fn tokenize(line: &[u8]) -> Vec<Vec<u8>> {
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < line.len() {
        match line[i] {
            b' ' | b'\t' => i += 1,
            b'"' => {
                let mut token = Vec::new();
                i += 1;
                while i < line.len() {
                    if line[i] == b'"' {
                        if line.get(i + 1) == Some(&b'"') {
                            token.push(b'"');
                            i += 2;
                        } else {
                            i += 1;
                            break;
                        }
                    } else {
                        token.push(line[i]);
                        i += 1;
                    }
                }
                tokens.push(token);
            }
            _ => {
                let start = i;
                while i < line.len() && line[i] != b' ' && line[i] != b'\t' {
                    i += 1;
                }
                tokens.push(line[start..i].to_vec());
            }
        }
    }
    tokens
}

fn parse_token(token: &[u8], kind: Kind) -> RawValue {
    if token.is_empty() || token == b"-" {
        return RawValue::Empty;
    }
    match kind {
        Kind::Uri | Kind::String => return RawValue::Text(token.to_vec()),
        _ => {}
    }
    // Typed fields are plain ASCII in practice; anything else is unusable.
    let Ok(text) = std::str::from_utf8(token) else {
        return RawValue::Empty;
    };
    match kind {
        Kind::Date => parse_date(text),
        Kind::Time => parse_time(text),
        Kind::Timestamp => parse_timestamp(text),
        Kind::Ip => text
            .parse::<IpAddr>()
            .map(RawValue::Ip)
            .unwrap_or(RawValue::Empty),
        Kind::Float64 => text
            .parse::<f64>()
            .map(RawValue::Float)
            .unwrap_or(RawValue::Empty),
        Kind::Int64 => text
            .parse::<i64>()
            .map(RawValue::Int)
            .unwrap_or(RawValue::Empty),
        Kind::Bool => match text.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => RawValue::Bool(true),
            "0" | "false" | "no" => RawValue::Bool(false),
            _ => RawValue::Empty,
        },
        Kind::Uri | Kind::String => unreachable!("handled above"),
    }
}

fn parse_date(text: &str) -> RawValue {
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .map(RawValue::Date)
        .unwrap_or(RawValue::Empty)
}

fn parse_time(text: &str) -> RawValue {
    let (hms, frac) = match text.split_once('.') {
        Some((hms, frac)) => (hms, Some(frac)),
        None => (text, None),
    };
    let mut parts = hms.split(':');
    let (Some(h), Some(m), Some(s), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return RawValue::Empty;
    };
    let (Ok(hour), Ok(minute), Ok(second)) = (h.parse::<u8>(), m.parse::<u8>(), s.parse::<u8>())
    else {
        return RawValue::Empty;
    };
    if hour > 23 || minute > 59 || second > 59 {
        return RawValue::Empty;
    }
    let nanosecond = match frac {
        Some(frac) if !frac.is_empty() && frac.len() <= 9 => {
            let Ok(digits) = frac.parse::<u32>() else {
                return RawValue::Empty;
            };
            digits * 10u32.pow(9 - frac.len() as u32)
        }
        Some(_) => return RawValue::Empty,
        None => 0,
    };
    RawValue::Time(TimeOfDay::new(hour, minute, second, nanosecond))
}

fn parse_timestamp(text: &str) -> RawValue {
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return RawValue::Timestamp(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%d/%b/%Y:%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return RawValue::Timestamp(naive.and_utc());
        }
    }
    RawValue::Empty
}
