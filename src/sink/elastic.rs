use async_trait::async_trait;
use serde_json::{Map, Value};

use super::mapping::IndexOptions;
use super::{BulkSink, SinkError, SinkProvider};
use crate::ingest::batch::BatchCursor;
use crate::ingest::convert::FieldValue;
use crate::record::FieldSpec;

/// Queued actions per bulk request before the processor sends on its own.
pub const BULK_ACTION_THRESHOLD: usize = 1000;

/// Document type used for both the mapping and bulk actions.
pub const DOC_TYPE: &str = "accesslogs";

/// Connection settings for the Elasticsearch sink.
#[derive(Debug, Clone)]
pub struct EsConfig {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Thin Elasticsearch HTTP client.
#[derive(Clone)]
pub struct EsClient {
    http: reqwest::Client,
    config: EsConfig,
}

impl EsClient {
    pub fn new(config: EsConfig) -> Result<Self, SinkError> {
        let http = reqwest::Client::builder()
            .user_agent("logpump/0.1")
            .build()
            .map_err(SinkError::Http)?;
        Ok(Self { http, config })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.url.trim_end_matches('/'), path)
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match (&self.config.username, &self.config.password) {
            (Some(user), Some(pass)) if !user.is_empty() => {
                req.basic_auth(user, Some(pass))
            }
            _ => req,
        }
    }

    /// Probe the server and return its version string.
    pub async fn server_version(&self) -> Result<String, SinkError> {
        let response = self
            .authorized(self.http.get(self.endpoint("")))
            .send()
            .await?;
        let body: Value = check(response).await?.json().await?;
        Ok(body
            .pointer("/version/number")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string())
    }

    /// Create an index with the given settings and mappings.
    pub async fn create_index(
        &self,
        index: &str,
        options: &IndexOptions,
    ) -> Result<(), SinkError> {
        let response = self
            .authorized(self.http.put(self.endpoint(index)))
            .json(options)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn bulk(&self, body: String) -> Result<(), SinkError> {
        let response = self
            .authorized(self.http.post(self.endpoint("_bulk")))
            .header("content-type", "application/x-ndjson")
            .body(body)
            .send()
            .await?;
        let payload: Value = check(response).await?.json().await?;
        if payload.get("errors").and_then(Value::as_bool) == Some(true) {
            return Err(SinkError::BulkItems {
                reason: first_item_error(&payload),
            });
        }
        Ok(())
    }
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response, SinkError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(SinkError::Rejected { status, body })
}

fn first_item_error(payload: &Value) -> String {
    payload
        .get("items")
        .and_then(Value::as_array)
        .and_then(|items| {
            items.iter().find_map(|item| {
                item.get("index")
                    .and_then(|action| action.get("error"))
                    .map(Value::to_string)
            })
        })
        .unwrap_or_else(|| "unknown bulk failure".to_string())
}

/// Accumulates index actions as NDJSON and sends one `_bulk` request per
/// threshold crossing. Delivery is single-attempt: a failed request
/// surfaces immediately instead of being retried.
pub struct BulkProcessor {
    client: EsClient,
    index: String,
    body: String,
    pending: usize,
}

impl BulkProcessor {
    pub fn new(client: EsClient, index: impl Into<String>) -> Self {
        Self {
            client,
            index: index.into(),
            body: String::new(),
            pending: 0,
        }
    }

    pub fn pending(&self) -> usize {
        self.pending
    }

    pub async fn add(&mut self, doc: &Value) -> Result<(), SinkError> {
        let action = serde_json::json!({
            "index": { "_index": self.index, "_type": DOC_TYPE }
        });
        self.body.push_str(&serde_json::to_string(&action)?);
        self.body.push('\n');
        self.body.push_str(&serde_json::to_string(doc)?);
        self.body.push('\n');
        self.pending += 1;
        if self.pending >= BULK_ACTION_THRESHOLD {
            self.dispatch().await?;
        }
        Ok(())
    }

    /// Deliver whatever is queued, if anything.
    pub async fn flush(&mut self) -> Result<(), SinkError> {
        if self.pending == 0 {
            return Ok(());
        }
        self.dispatch().await
    }

    async fn dispatch(&mut self) -> Result<(), SinkError> {
        let body = std::mem::take(&mut self.body);
        self.pending = 0;
        self.client.bulk(body).await
    }
}

/// Provider handing out one bulk processor per file.
pub struct EsSinkProvider {
    client: EsClient,
    index: String,
}

impl EsSinkProvider {
    pub fn new(client: EsClient, index: impl Into<String>) -> Self {
        Self { client, index: index.into() }
    }
}

#[async_trait]
impl SinkProvider for EsSinkProvider {
    type Sink = EsBulkSink;

    async fn acquire(&self) -> Result<EsBulkSink, SinkError> {
        Ok(EsBulkSink {
            processor: BulkProcessor::new(self.client.clone(), self.index.clone()),
        })
    }
}

/// Bulk-request sink: each row becomes one index action; the processor
/// decides when requests actually go out.
pub struct EsBulkSink {
    processor: BulkProcessor,
}

#[async_trait]
impl BulkSink for EsBulkSink {
    async fn flush(
        &mut self,
        columns: &[FieldSpec],
        batch: BatchCursor<'_>,
    ) -> Result<u64, SinkError> {
        let mut queued = 0u64;
        for row in batch.iter() {
            let doc = document(columns, row);
            self.processor.add(&doc).await?;
            queued += 1;
        }
        Ok(queued)
    }

    async fn finalize(&mut self) -> Result<(), SinkError> {
        self.processor.flush().await
    }
}

/// Shape one row into the JSON document the index receives. Field names
/// keep their original spelling; the mapping is built from the same names.
pub fn document(columns: &[FieldSpec], row: &[FieldValue]) -> Value {
    let mut doc = Map::with_capacity(columns.len());
    for (spec, value) in columns.iter().zip(row.iter()) {
        doc.insert(spec.name.clone(), json_value(value));
    }
    Value::Object(doc)
}

fn json_value(value: &FieldValue) -> Value {
    match value {
        FieldValue::Null(_) => Value::Null,
        FieldValue::Id(id) => Value::String(id.to_string()),
        FieldValue::Date(date) => Value::String(date.format("%Y-%m-%d").to_string()),
        FieldValue::Time(t) => {
            if t.nanosecond == 0 {
                Value::String(format!("{:02}:{:02}:{:02}", t.hour, t.minute, t.second))
            } else {
                Value::String(format!(
                    "{:02}:{:02}:{:02}.{:03}",
                    t.hour,
                    t.minute,
                    t.second,
                    t.nanosecond / 1_000_000
                ))
            }
        }
        FieldValue::Timestamp(ts) => {
            Value::String(ts.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        }
        FieldValue::Ip(addr) => Value::String(addr.to_string()),
        FieldValue::Float(v) => serde_json::Number::from_f64(*v)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        FieldValue::Int(v) => Value::Number((*v).into()),
        FieldValue::Bool(v) => Value::Bool(*v),
        FieldValue::Text(s) => Value::String(s.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Kind, TimeOfDay};
    use chrono::{NaiveDate, TimeZone, Utc};

    #[test]
    fn document_maps_names_to_values() {
        let columns = vec![
            FieldSpec::new("sc-status"),
            FieldSpec::new("c-ip"),
            FieldSpec::new("cs-method"),
        ];
        let row = vec![
            FieldValue::Int(200),
            FieldValue::Ip("10.0.0.1".parse().unwrap()),
            FieldValue::Text("GET".to_string()),
        ];
        let doc = document(&columns, &row);
        assert_eq!(doc["sc-status"], 200);
        assert_eq!(doc["c-ip"], "10.0.0.1");
        assert_eq!(doc["cs-method"], "GET");
    }

    #[test]
    fn temporal_values_use_index_formats() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(json_value(&FieldValue::Date(date)), "2024-03-01");

        let time = TimeOfDay::new(8, 15, 42, 0);
        assert_eq!(json_value(&FieldValue::Time(time)), "08:15:42");

        let with_frac = TimeOfDay::new(8, 15, 42, 250_000_000);
        assert_eq!(json_value(&FieldValue::Time(with_frac)), "08:15:42.250");

        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 8, 15, 42).unwrap();
        assert_eq!(
            json_value(&FieldValue::Timestamp(ts)),
            "2024-03-01T08:15:42Z"
        );
    }

    #[test]
    fn nulls_and_numbers() {
        assert_eq!(json_value(&FieldValue::Null(Kind::Ip)), Value::Null);
        assert_eq!(json_value(&FieldValue::Float(f64::NAN)), Value::Null);
        assert_eq!(json_value(&FieldValue::Float(0.5)), 0.5);
        assert_eq!(json_value(&FieldValue::Bool(false)), false);
    }

    #[tokio::test]
    async fn processor_queues_without_sending_below_threshold() {
        let client = EsClient::new(EsConfig {
            url: "http://127.0.0.1:1".to_string(),
            username: None,
            password: None,
        })
        .unwrap();
        let mut processor = BulkProcessor::new(client, "accesslogs");
        for _ in 0..10 {
            processor.add(&serde_json::json!({"a": 1})).await.unwrap();
        }
        assert_eq!(processor.pending(), 10);
    }

    #[test]
    fn bulk_body_shape() {
        // Two lines per action: the action header and the document source.
        let action = serde_json::json!({
            "index": { "_index": "accesslogs", "_type": DOC_TYPE }
        });
        let rendered = serde_json::to_string(&action).unwrap();
        assert!(rendered.contains("\"_index\":\"accesslogs\""));
        assert!(rendered.contains("\"_type\":\"accesslogs\""));
    }
}
