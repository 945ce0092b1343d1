use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use logpump::ingest::batch::BatchCursor;
use logpump::ingest::convert::FieldValue;
use logpump::ingest::{self, upload_file};
use logpump::record::FieldSpec;
use logpump::sink::{BulkSink, SinkError, SinkProvider};

#[derive(Default)]
struct CaptureState {
    flush_sizes: Vec<usize>,
    rows: Vec<Vec<FieldValue>>,
    columns: Vec<String>,
    finalized: usize,
}

#[derive(Default)]
struct CaptureProvider {
    state: Arc<Mutex<CaptureState>>,
}

struct CaptureSink {
    state: Arc<Mutex<CaptureState>>,
}

#[async_trait]
impl SinkProvider for CaptureProvider {
    type Sink = CaptureSink;

    async fn acquire(&self) -> Result<CaptureSink, SinkError> {
        Ok(CaptureSink { state: Arc::clone(&self.state) })
    }
}

#[async_trait]
impl BulkSink for CaptureSink {
    async fn flush(
        &mut self,
        columns: &[FieldSpec],
        batch: BatchCursor<'_>,
    ) -> Result<u64, SinkError> {
        let mut state = self.state.lock().unwrap();
        if state.columns.is_empty() {
            state.columns = columns.iter().map(|spec| spec.name.clone()).collect();
        }
        state.flush_sizes.push(batch.len());
        for row in batch.iter() {
            state.rows.push(row.to_vec());
        }
        Ok(batch.len() as u64)
    }

    async fn finalize(&mut self) -> Result<(), SinkError> {
        self.state.lock().unwrap().finalized += 1;
        Ok(())
    }
}

fn write_file(dir: &tempfile::TempDir, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    path
}

#[tokio::test]
async fn large_file_flushes_in_batches() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("big.log");
    {
        let mut file = std::io::BufWriter::new(std::fs::File::create(&path).unwrap());
        writeln!(file, "#Version: 1.0").unwrap();
        writeln!(file, "#Fields: date time c-ip sc-status cs-uri-stem").unwrap();
        for i in 0..12_000 {
            writeln!(
                file,
                "2024-03-01 08:{:02}:{:02} 10.0.0.{} {} /page/{}",
                (i / 60) % 60,
                i % 60,
                i % 250 + 1,
                200 + (i % 3),
                i
            )
            .unwrap();
        }
    }

    let provider = CaptureProvider::default();
    let report = upload_file(&path, &provider, 5000).await.unwrap();

    assert_eq!(report.lines, 12_000);
    let state = provider.state.lock().unwrap();
    assert_eq!(state.flush_sizes, vec![5000, 5000, 2000]);
    assert_eq!(state.rows.len(), 12_000);
    assert_eq!(state.finalized, 1);
    // id first, derived gmttime second, then declared columns.
    assert_eq!(
        state.columns,
        vec!["id", "gmttime", "date", "time", "c-ip", "sc-status", "cs-uri-stem"]
    );
}

#[tokio::test]
async fn latin9_bytes_round_trip_to_accented_text() {
    let dir = tempfile::tempdir().unwrap();
    let mut content = b"#Fields: sc-status cs-method\n200 ".to_vec();
    content.extend_from_slice(b"caf\xe9\n");
    // Second line: invalid under UTF-8 and Latin-9 both.
    content.extend_from_slice(b"404 bad\x81token\n");
    let path = write_file(&dir, "charset.log", &content);

    let provider = CaptureProvider::default();
    let report = upload_file(&path, &provider, 100).await.unwrap();
    assert_eq!(report.lines, 2);

    let state = provider.state.lock().unwrap();
    // Columns: id, gmttime, sc-status, cs-method.
    let method_of = |row: &[FieldValue]| match &row[3] {
        FieldValue::Text(s) => s.clone(),
        other => panic!("unexpected value: {other:?}"),
    };
    assert_eq!(method_of(&state.rows[0]), "café");

    let repaired = method_of(&state.rows[1]);
    assert!(!repaired.is_empty());
    assert!(repaired.is_ascii());
    assert!(repaired.starts_with("bad"));
    assert!(repaired.ends_with("token"));
}

#[tokio::test]
async fn two_workers_share_four_files() {
    let dir = tempfile::tempdir().unwrap();
    let mut files = Vec::new();
    for (name, lines) in [("a.log", 10), ("b.log", 20), ("c.log", 30), ("d.log", 40)] {
        let mut content = String::from("#Fields: sc-status cs-method\n");
        for i in 0..lines {
            content.push_str(&format!("{} GET\n", 200 + i));
        }
        files.push(write_file(&dir, name, content.as_bytes()));
    }

    let provider = Arc::new(CaptureProvider::default());
    let summary = ingest::run(Arc::clone(&provider), files, 2, 1000).await;

    assert_eq!(summary.succeeded, 4);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.lines, 100);

    let state = provider.state.lock().unwrap();
    let mut sizes = state.flush_sizes.clone();
    sizes.sort_unstable();
    // Each file flushed exactly once with its own line count: all four
    // processed once each, none skipped or duplicated.
    assert_eq!(sizes, vec![10, 20, 30, 40]);
    assert_eq!(state.finalized, 4);
}

#[tokio::test]
async fn absent_fields_become_typed_nulls_and_empty_text() {
    let dir = tempfile::tempdir().unwrap();
    let content = b"#Fields: c-ip sc-status cs-method\n- - -\n";
    let path = write_file(&dir, "sparse.log", content);

    let provider = CaptureProvider::default();
    upload_file(&path, &provider, 10).await.unwrap();

    let state = provider.state.lock().unwrap();
    let row = &state.rows[0];
    // Columns: id, gmttime, c-ip, sc-status, cs-method.
    assert!(matches!(row[0], FieldValue::Id(_)));
    assert!(matches!(row[1], FieldValue::Null(_)));
    assert!(matches!(row[2], FieldValue::Null(_)));
    assert!(matches!(row[3], FieldValue::Null(_)));
    assert_eq!(row[4], FieldValue::Text(String::new()));
}
