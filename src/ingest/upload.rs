use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use thiserror::Error;
use uuid::Uuid;

use super::batch::{BatchError, RowBatch};
use super::convert::{convert, FieldValue};
use crate::record::w3c::W3cReader;
use crate::record::{FieldSpec, Header, RecordSource, SourceError};
use crate::sink::{BulkSink, SinkError, SinkProvider};

/// Per-file failure. Everything here is contained to the file that caused
/// it; the dispatcher logs it and moves on.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("cannot open '{path}': {source}")]
    Open { path: PathBuf, source: std::io::Error },
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Batch(#[from] BatchError),
    #[error("sink unavailable: {0}")]
    Acquire(SinkError),
    #[error("flush failed: {0}")]
    Flush(SinkError),
    #[error("{source}; {committed} rows were already committed")]
    PostLoad { committed: u64, source: SinkError },
}

/// Outcome of one successfully uploaded file.
#[derive(Debug, Clone)]
pub struct UploadReport {
    pub lines: u64,
    pub elapsed: Duration,
}

/// Column layout for a file: the synthetic `id` first, a derived `gmttime`
/// second when the file lacks one, then the declared fields in order.
pub fn field_specs(header: &Header) -> Vec<FieldSpec> {
    let mut specs = Vec::with_capacity(header.field_names().len() + 2);
    specs.push(FieldSpec::new("id"));
    if !header.has_gmt_time() {
        specs.push(FieldSpec::new("gmttime"));
    }
    for name in header.field_names() {
        specs.push(FieldSpec::new(name.clone()));
    }
    specs
}

/// Upload one W3C extended log file end to end.
pub async fn upload_file<P: SinkProvider>(
    path: &Path,
    provider: &P,
    batch_size: usize,
) -> Result<UploadReport, UploadError> {
    let file = File::open(path).map_err(|source| UploadError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let mut source = W3cReader::new(BufReader::new(file));
    upload_source(&mut source, provider, batch_size).await
}

/// Drive one record source into one sink: header negotiation, per-record
/// conversion, batch accumulation with flush-on-full, trailing flush, and
/// sink finalization. Rows flushed before a failure stay in the sink; no
/// compensating rollback is attempted.
pub async fn upload_source<R, P>(
    source: &mut R,
    provider: &P,
    batch_size: usize,
) -> Result<UploadReport, UploadError>
where
    R: RecordSource,
    P: SinkProvider,
{
    let start = Instant::now();
    let header = source.header()?;
    let specs = field_specs(&header);
    let mut sink = provider.acquire().await.map_err(UploadError::Acquire)?;
    let mut batch = RowBatch::new(batch_size, specs.len());
    let mut lines = 0u64;
    let mut committed = 0u64;

    while let Some(record) = source.next_record()? {
        if batch.is_full() {
            committed += flush_batch(&mut sink, &specs, &mut batch).await?;
        }
        let Some(mut row) = batch.checkout() else {
            return Err(UploadError::Batch(BatchError::RowOverflow { max: batch_size }));
        };
        lines += 1;
        for (i, spec) in specs.iter().enumerate() {
            let value = if i == 0 {
                // Fresh time-ordered identity per row, never reused.
                FieldValue::Id(Uuid::now_v7())
            } else {
                convert(spec.kind, record.get(&spec.name))
            };
            row.push(value)?;
        }
    }

    committed += flush_batch(&mut sink, &specs, &mut batch).await?;

    if let Err(err) = sink.finalize().await {
        return Err(match err {
            err @ SinkError::PostLoad(_) => UploadError::PostLoad { committed, source: err },
            other => UploadError::Flush(other),
        });
    }

    Ok(UploadReport { lines, elapsed: start.elapsed() })
}

async fn flush_batch<S: BulkSink>(
    sink: &mut S,
    specs: &[FieldSpec],
    batch: &mut RowBatch,
) -> Result<u64, UploadError> {
    if batch.is_empty() {
        return Ok(0);
    }
    let cursor = batch.cursor()?;
    let rows = sink.flush(specs, cursor).await.map_err(UploadError::Flush)?;
    batch.reset();
    Ok(rows)
}
