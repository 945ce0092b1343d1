use async_trait::async_trait;
use chrono::Datelike;
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgPool;
use sqlx::Postgres;

use super::{BulkSink, SinkError, SinkProvider};
use crate::ingest::batch::BatchCursor;
use crate::ingest::convert::FieldValue;
use crate::record::FieldSpec;

/// Acquires one pooled connection per file. The pool is sized to the
/// worker count, so acquisition blocks only when workers outnumber slots.
pub struct PgSinkProvider {
    pool: PgPool,
    table: String,
}

impl PgSinkProvider {
    pub fn new(pool: PgPool, table: impl Into<String>) -> Self {
        Self { pool, table: table.into() }
    }
}

#[async_trait]
impl SinkProvider for PgSinkProvider {
    type Sink = PgCopySink;

    async fn acquire(&self) -> Result<PgCopySink, SinkError> {
        let conn = self.pool.acquire().await?;
        Ok(PgCopySink { conn, table: self.table.clone() })
    }
}

/// Bulk-copy sink: every flush streams the whole cursor through one
/// `COPY ... FROM STDIN (FORMAT binary)` call.
pub struct PgCopySink {
    conn: PoolConnection<Postgres>,
    table: String,
}

#[async_trait]
impl BulkSink for PgCopySink {
    async fn flush(
        &mut self,
        columns: &[FieldSpec],
        batch: BatchCursor<'_>,
    ) -> Result<u64, SinkError> {
        let statement = copy_statement(&self.table, columns);
        let data = encode_batch(&batch);
        let mut copy = self.conn.copy_in_raw(&statement).await?;
        copy.send(data.as_slice()).await?;
        let rows = copy.finish().await?;
        Ok(rows)
    }

    /// Post-load storage reclamation. Rows copied by earlier flushes are
    /// already committed when this runs; a failure here is reported with
    /// that in mind (see the uploader's PostLoad handling).
    async fn finalize(&mut self) -> Result<(), SinkError> {
        sqlx::query("VACUUM")
            .execute(&mut *self.conn)
            .await
            .map_err(SinkError::PostLoad)?;
        Ok(())
    }
}

fn copy_statement(table: &str, columns: &[FieldSpec]) -> String {
    let cols: Vec<String> = columns
        .iter()
        .map(|spec| format!("\"{}\"", pg_identifier(&spec.name)))
        .collect();
    format!(
        "COPY \"{}\" ({}) FROM STDIN WITH (FORMAT binary)",
        table.replace('"', "\"\""),
        cols.join(", ")
    )
}

/// Normalize a log field name into a safe PostgreSQL identifier:
/// lower-cased, every run of non-alphanumeric characters collapsed to one
/// underscore. `cs(User-Agent)` becomes `cs_user_agent`.
pub fn pg_identifier(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }
    out
}

// Binary COPY framing: fixed signature, two reserved i32 fields, then one
// i16 field count per row and length-prefixed values (-1 length = NULL),
// closed by an i16 -1 trailer.
const COPY_SIGNATURE: &[u8] = b"PGCOPY\n\xff\r\n\0";

// 2000-01-01, the epoch of the binary date and timestamp encodings.
const PG_EPOCH_UNIX_SECS: i64 = 946_684_800;
const PG_EPOCH_DAYS_FROM_CE: i32 = 730_120;

// Address family tags used by the inet wire encoding.
const PG_AF_INET: u8 = 2;
const PG_AF_INET6: u8 = 3;

fn encode_batch(batch: &BatchCursor<'_>) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64 + batch.len() * 64);
    buf.extend_from_slice(COPY_SIGNATURE);
    buf.extend_from_slice(&0i32.to_be_bytes());
    buf.extend_from_slice(&0i32.to_be_bytes());
    for row in batch.iter() {
        buf.extend_from_slice(&(row.len() as i16).to_be_bytes());
        for value in row {
            encode_value(&mut buf, value);
        }
    }
    buf.extend_from_slice(&(-1i16).to_be_bytes());
    buf
}

fn encode_value(buf: &mut Vec<u8>, value: &FieldValue) {
    match value {
        FieldValue::Null(_) => buf.extend_from_slice(&(-1i32).to_be_bytes()),
        FieldValue::Id(id) => put_field(buf, id.as_bytes()),
        FieldValue::Date(date) => {
            let days = date.num_days_from_ce() - PG_EPOCH_DAYS_FROM_CE;
            put_field(buf, &days.to_be_bytes());
        }
        // Time-of-day needs nothing from the driver's type machinery: the
        // wire value is one big-endian i64 of microseconds since midnight.
        FieldValue::Time(time) => put_field(buf, &time.microseconds().to_be_bytes()),
        FieldValue::Timestamp(ts) => {
            let micros = (ts.timestamp() - PG_EPOCH_UNIX_SECS) * 1_000_000
                + i64::from(ts.timestamp_subsec_micros());
            put_field(buf, &micros.to_be_bytes());
        }
        FieldValue::Ip(addr) => {
            let (family, bits, octets): (u8, u8, Vec<u8>) = match addr {
                std::net::IpAddr::V4(v4) => (PG_AF_INET, 32, v4.octets().to_vec()),
                std::net::IpAddr::V6(v6) => (PG_AF_INET6, 128, v6.octets().to_vec()),
            };
            let len = 4 + octets.len();
            buf.extend_from_slice(&(len as i32).to_be_bytes());
            buf.push(family);
            buf.push(bits);
            buf.push(0); // inet, not cidr
            buf.push(octets.len() as u8);
            buf.extend_from_slice(&octets);
        }
        FieldValue::Float(v) => put_field(buf, &v.to_be_bytes()),
        FieldValue::Int(v) => put_field(buf, &v.to_be_bytes()),
        FieldValue::Bool(v) => put_field(buf, &[u8::from(*v)]),
        FieldValue::Text(s) => put_field(buf, s.as_bytes()),
    }
}

fn put_field(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as i32).to_be_bytes());
    buf.extend_from_slice(bytes);
}
