pub mod elastic;
pub mod mapping;
pub mod postgres;

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

use crate::ingest::batch::BatchCursor;
use crate::record::FieldSpec;

/// Errors surfaced by a bulk sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("bulk copy failed: {0}")]
    Copy(#[from] sqlx::Error),
    #[error("post-load maintenance failed: {0}")]
    PostLoad(#[source] sqlx::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("failed to encode bulk payload: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("sink returned status {status}: {body}")]
    Rejected { status: StatusCode, body: String },
    #[error("bulk response reported item failures: {reason}")]
    BulkItems { reason: String },
}

/// One batched destination for converted rows.
///
/// `flush` hands over everything the cursor yields; how that maps to wire
/// calls is the sink's business (one COPY per flush for the relational
/// sink, threshold-batched bulk requests for the index sink). `finalize`
/// runs once after the trailing flush: remaining queued work is delivered
/// and any post-load maintenance happens here.
#[async_trait]
pub trait BulkSink: Send {
    async fn flush(
        &mut self,
        columns: &[FieldSpec],
        batch: BatchCursor<'_>,
    ) -> Result<u64, SinkError>;

    async fn finalize(&mut self) -> Result<(), SinkError>;
}

/// Hands out one sink per file. A worker acquires a sink after header
/// negotiation and holds it for the file's whole lifetime.
#[async_trait]
pub trait SinkProvider: Send + Sync {
    type Sink: BulkSink;

    async fn acquire(&self) -> Result<Self::Sink, SinkError>;
}
