//! Batch downloads over a client worker pool.
//!
//! The boss thread pulls request paths from a [`Workload`], queues them on a
//! [`WorkerPool`], and waits until every request has been completed. Each
//! worker fetches one path into a fresh local file and deletes the file again
//! unless the transfer delivered every announced byte.
//!
//! # Local Files
//!
//! A request for `/dir/file.html` is saved as `dir/file.html-000042` under the
//! output directory, the suffix being a per-[`Downloader`] sequence number so
//! repeated requests for the same path never collide.
use std::{
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::{Component, Path, PathBuf},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
};

use log::{info, warn};
use thiserror::Error;

use crate::{
    config::{ClientConfig, ConfigError},
    pool::{PoolError, WorkerPool},
    protocol::{GetFileClient, Status, TransferOutcome},
    workload::Workload,
};

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error("failed to open {path:?}: {source}")]
    Output { path: PathBuf, source: io::Error },
    #[error("work queue closed before all requests were queued")]
    QueueClosed,
}

#[derive(Debug, Clone)]
pub struct DownloadReport {
    pub path: String,
    pub local_path: PathBuf,
    pub outcome: TransferOutcome,
    /// Whether the local file was kept.
    pub saved: bool,
}

/// Fetches paths from one server into an output directory.
#[derive(Debug)]
pub struct Downloader {
    client: GetFileClient,
    output_dir: PathBuf,
    counter: AtomicUsize,
}

impl Downloader {
    pub fn new(client: GetFileClient, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            output_dir: output_dir.into(),
            counter: AtomicUsize::new(0),
        }
    }

    /// Local file for the next download of `request_path`.
    pub fn local_path(&self, request_path: &str) -> PathBuf {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);

        // Only plain components, so a request can never escape the output directory.
        let relative = Path::new(request_path)
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part),
                _ => None,
            })
            .collect::<PathBuf>();
        let name = match relative.as_os_str().is_empty() {
            true => "index".to_string(),
            false => relative.to_string_lossy().into_owned(),
        };

        self.output_dir.join(format!("{name}-{n:06}"))
    }

    pub fn download(&self, path: &str) -> Result<DownloadReport, DownloadError> {
        let local_path = self.local_path(path);
        let mut file = open_output(&local_path)?;

        info!(
            "Requesting {}:{}{path}",
            self.client.server(),
            self.client.port()
        );
        let outcome = self.client.get(path, &mut file);

        let flushed = match file.flush() {
            Ok(()) => true,
            Err(e) => {
                warn!("failed to flush {local_path:?}: {e}");
                false
            }
        };
        drop(file);

        let saved = flushed && outcome.is_complete();
        if !saved {
            if let Err(e) = fs::remove_file(&local_path) {
                warn!("unlink failed on {local_path:?}: {e}");
            }
        }

        info!("Status: {}", outcome.status);
        info!(
            "Received {} of {} bytes",
            outcome.bytes_received,
            outcome.content_length.unwrap_or(0)
        );

        Ok(DownloadReport {
            path: path.to_string(),
            local_path,
            outcome,
            saved,
        })
    }
}

fn open_output(path: &Path) -> Result<BufWriter<File>, DownloadError> {
    let output_err = |source| DownloadError::Output {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(output_err)?;
    }
    let file = File::create(path).map_err(output_err)?;
    Ok(BufWriter::new(file))
}

/// Tally of a finished batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub completed: usize,
    pub ok: usize,
    pub file_not_found: usize,
    pub error: usize,
    pub invalid: usize,
    /// Requests that never reached the network because the local file could
    /// not be created.
    pub local_failures: usize,
    pub bytes_received: u64,
}

impl BatchSummary {
    fn record(&mut self, outcome: &TransferOutcome) {
        match outcome.status {
            Status::Ok => self.ok += 1,
            Status::FileNotFound => self.file_not_found += 1,
            Status::Error => self.error += 1,
            Status::Invalid => self.invalid += 1,
        }
        self.bytes_received += outcome.bytes_received;
    }
}

/// Downloads `config.requests` paths from `workload` on `config.threads`
/// workers and waits for all of them.
pub fn run_batch(
    config: &ClientConfig,
    workload: &mut dyn Workload,
) -> Result<BatchSummary, DownloadError> {
    config.validate()?;

    let client = GetFileClient::new(config.server.clone(), config.port).with_timeout(config.timeout);
    let downloader = Arc::new(Downloader::new(client, &config.output_dir));
    let summary = Arc::new(Mutex::new(BatchSummary::default()));

    let pool = {
        let summary = Arc::clone(&summary);
        WorkerPool::new(config.threads, None, move |id, path: String| {
            let report = downloader.download(&path);
            let mut summary = summary.lock().unwrap_or_else(PoisonError::into_inner);
            match report {
                Ok(report) => summary.record(&report.outcome),
                Err(e) => {
                    warn!("worker {id}: {path}: {e}");
                    summary.local_failures += 1;
                }
            }
        })?
    };

    let mut submitted = 0;
    while submitted < config.requests {
        let Some(path) = workload.next_path() else {
            warn!("workload exhausted after {submitted} of {} requests", config.requests);
            break;
        };
        pool.submit(path).map_err(|_| DownloadError::QueueClosed)?;
        submitted += 1;
    }

    pool.wait_for(submitted);
    let completed = pool.completed();
    pool.shutdown()?;

    let mut summary = summary
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    summary.completed = completed;
    info!("completed {completed} requests: {summary:?}");
    Ok(summary)
}
