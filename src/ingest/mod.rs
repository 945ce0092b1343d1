pub mod batch;
pub mod convert;
pub mod dispatch;
pub mod upload;

pub use batch::{BatchCursor, BatchError, RowBatch};
pub use convert::{convert, FieldValue};
pub use dispatch::{run, RunSummary};
pub use upload::{upload_file, upload_source, UploadError, UploadReport};

/// Default number of rows buffered between flushes.
pub const DEFAULT_BATCH_SIZE: usize = 5000;
