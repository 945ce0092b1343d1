use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use super::upload::upload_file;
use crate::sink::SinkProvider;

/// Aggregated outcome of one run over a list of files.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub lines: u64,
}

impl RunSummary {
    pub fn merge(&mut self, other: RunSummary) {
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.lines += other.lines;
    }
}

/// Fan the filenames out to `workers` concurrent uploaders.
///
/// Each worker pulls from the shared queue and drives one file to
/// completion before taking the next, holding one sink resource at a time.
/// A failed file is logged and skipped; it never aborts another worker.
pub async fn run<P>(
    provider: Arc<P>,
    files: Vec<PathBuf>,
    workers: usize,
    batch_size: usize,
) -> RunSummary
where
    P: SinkProvider + 'static,
{
    let workers = workers.max(1).min(files.len().max(1));
    let queue = Arc::new(Mutex::new(VecDeque::from(files)));

    let mut handles = Vec::with_capacity(workers);
    for worker in 0..workers {
        let queue = Arc::clone(&queue);
        let provider = Arc::clone(&provider);
        handles.push(tokio::spawn(async move {
            let mut summary = RunSummary::default();
            loop {
                let next = queue.lock().pop_front();
                let Some(path) = next else { break };
                log::info!("worker {}: uploading {}", worker, path.display());
                match upload_file(&path, provider.as_ref(), batch_size).await {
                    Ok(report) => {
                        let secs = report.elapsed.as_secs_f64();
                        let rate = if secs > 0.0 {
                            (report.lines as f64 / secs) as u64
                        } else {
                            report.lines
                        };
                        log::info!(
                            "successfully uploaded {} ({} lines, {:.2} secs, {} lines/sec)",
                            path.display(),
                            report.lines,
                            secs,
                            rate
                        );
                        summary.succeeded += 1;
                        summary.lines += report.lines;
                    }
                    Err(err) => {
                        log::error!("error uploading '{}': {}", path.display(), err);
                        summary.failed += 1;
                    }
                }
            }
            summary
        }));
    }

    let mut total = RunSummary::default();
    for handle in handles {
        match handle.await {
            Ok(summary) => total.merge(summary),
            Err(err) => log::error!("worker task failed: {}", err),
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::testutil::CaptureProvider;
    use std::io::Write;

    fn write_log(dir: &tempfile::TempDir, name: &str, lines: usize) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "#Fields: sc-status cs-method").unwrap();
        for i in 0..lines {
            writeln!(file, "{} GET", 200 + i).unwrap();
        }
        path
    }

    #[tokio::test]
    async fn two_workers_process_four_files_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        // Distinct line counts so the captured flush sizes identify which
        // files were processed.
        let files = vec![
            write_log(&dir, "a.log", 1),
            write_log(&dir, "b.log", 2),
            write_log(&dir, "c.log", 3),
            write_log(&dir, "d.log", 4),
        ];

        let provider = Arc::new(CaptureProvider::new());
        let summary = run(Arc::clone(&provider), files, 2, 100).await;

        assert_eq!(summary.succeeded, 4);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.lines, 10);

        let mut sizes = provider.flush_sizes();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn missing_file_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let files = vec![
            write_log(&dir, "ok.log", 2),
            dir.path().join("does-not-exist.log"),
        ];

        let provider = Arc::new(CaptureProvider::new());
        let summary = run(Arc::clone(&provider), files, 1, 100).await;

        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.lines, 2);
    }

    #[tokio::test]
    async fn zero_workers_still_makes_progress() {
        let dir = tempfile::tempdir().unwrap();
        let files = vec![write_log(&dir, "one.log", 1)];
        let provider = Arc::new(CaptureProvider::new());
        let summary = run(provider, files, 0, 100).await;
        assert_eq!(summary.succeeded, 1);
    }
}
