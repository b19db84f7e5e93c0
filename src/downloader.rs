//! Download orchestration: startup checks, worker scheduling, reassembly.
//!
//! [`run_download`] owns the whole lifecycle of one download: it loads the
//! proxy list, probes the remote size, plans the parts, spins up the bounded
//! worker set against the shared [`ProxyPool`], and finally concatenates the
//! verified part files into the output.
use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::future::join_all;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::observer::ProgressSink;
use crate::pool::{PoolError, ProxyPool};
use crate::probe::{self, ProbeError, RemoteInfo};
use crate::state::{self, part_file_name, plan_parts, LedgerError};
use crate::utils;
use crate::worker::{run_worker, DownloadContext};

/// Size probes are retried this many times before giving up.
const PROBE_ATTEMPTS: u32 = 3;

/// Everything [`run_download`] needs to know.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Source URL.
    pub url: String,
    /// Target path; when `None` the probed file name lands in the current
    /// working directory.
    pub output: Option<PathBuf>,
    /// Path to the proxy-list file, one proxy URL per line.
    pub proxies_file: PathBuf,
    /// Upper bound on concurrent workers; clamped to the proxy count and
    /// the part count.
    pub max_concurrent: usize,
    /// Part size in bytes.
    pub part_size: u64,
    /// Per-worker, per-part failures tolerated before rotating proxies.
    pub max_retries: u32,
    /// Overwrite a pre-existing output file instead of refusing.
    pub overwrite: bool,
}

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("failed to read proxy list file {}", .path.display())]
    ProxyList {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("proxy list file {} contains no proxies", .path.display())]
    NoProxies { path: PathBuf },
    #[error("could not determine remote file size after {attempts} attempts")]
    ProbeExhausted {
        attempts: u32,
        #[source]
        source: ProbeError,
    },
    #[error("remote resource reports a length of zero, nothing to download")]
    EmptyRemote,
    #[error("output file already exists: {}", .path.display())]
    OutputExists { path: PathBuf },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Outcome of a completed run.
#[derive(Debug)]
pub struct DownloadSummary {
    pub output_path: PathBuf,
    pub content_length: u64,
    pub parts: usize,
    pub proxy_errors: u64,
    /// False when the assembled file's size disagrees with the probed
    /// total. The file is kept either way.
    pub size_verified: bool,
}

/// Runs one download to completion.
///
/// `make_sink` is called once the probed total size and part count are
/// known, so the caller can build a correctly sized progress renderer.
pub async fn run_download(
    config: DownloadConfig,
    make_sink: impl FnOnce(u64, usize) -> Arc<dyn ProgressSink>,
) -> Result<DownloadSummary, DownloadError> {
    let proxies =
        utils::load_proxies(&config.proxies_file)
            .await
            .map_err(|source| DownloadError::ProxyList {
                path: config.proxies_file.clone(),
                source,
            })?;
    if proxies.is_empty() {
        return Err(DownloadError::NoProxies {
            path: config.proxies_file.clone(),
        });
    }
    tracing::info!(found = proxies.len(), "loaded proxy list");

    let mut max_concurrent = config.max_concurrent.max(1);
    if max_concurrent > proxies.len() {
        max_concurrent = proxies.len();
        tracing::warn!(
            reduced_to = max_concurrent,
            "maximum concurrent connections cannot exceed the number of available proxies"
        );
    }

    let pool = ProxyPool::new(&proxies);

    let info = probe_with_retries(&config.url).await?;
    if info.content_length == 0 {
        return Err(DownloadError::EmptyRemote);
    }

    let parts = plan_parts(info.content_length, config.part_size);
    tracing::info!(
        name = %info.filename,
        length = info.content_length,
        size_mb = info.content_length / (1024 * 1024),
        parts = parts.len(),
        "fetched file info"
    );

    if max_concurrent > parts.len() {
        max_concurrent = parts.len();
        tracing::warn!("adjusting maximum concurrent connections to number of parts");
    }

    let requested = config
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(&info.filename));
    let (output_path, work_dir, basename) = utils::prepare_output_path(&requested).await?;
    tracing::debug!(work_dir = %work_dir.display(), output = %output_path.display(), "resolved paths");

    if fs::try_exists(&output_path).await? && !config.overwrite {
        return Err(DownloadError::OutputExists { path: output_path });
    }

    let ledger_path = state::ensure_ledger(&work_dir, &basename, info.content_length).await?;

    let sink = make_sink(info.content_length, parts.len());
    let part_count = parts.len();
    let queue: VecDeque<_> = parts.iter().copied().collect();

    let ctx = Arc::new(DownloadContext {
        url: config.url.clone(),
        work_dir: work_dir.clone(),
        output_basename: basename.clone(),
        max_retries: config.max_retries,
        pool,
        parts: tokio::sync::Mutex::new(parts),
        queue: tokio::sync::Mutex::new(queue),
        sink,
    });

    let mut handles = Vec::with_capacity(max_concurrent);
    for worker_id in 0..max_concurrent {
        let ctx = Arc::clone(&ctx);
        handles.push(tokio::spawn(run_worker(ctx, worker_id)));
    }
    for result in join_all(handles).await {
        result??;
    }

    let proxy_errors = ctx.pool.error_count().await;
    tracing::debug!(errors = proxy_errors, "proxy pool error count");
    tracing::info!("all file parts downloaded, concatenating file");

    concatenate_parts(&output_path, &work_dir, &basename, part_count).await?;
    tracing::info!(path = %output_path.display(), "file ready");

    let size_verified = match fs::metadata(&output_path).await {
        Ok(meta) if meta.len() == info.content_length => true,
        Ok(meta) => {
            tracing::error!(
                size = meta.len(),
                expected = info.content_length,
                "file size verification failed"
            );
            false
        }
        Err(err) => {
            tracing::error!(%err, "could not read assembled file");
            false
        }
    };

    if let Err(err) = fs::remove_file(&ledger_path).await {
        tracing::error!(%err, "failed to delete info file");
    }

    Ok(DownloadSummary {
        output_path,
        content_length: info.content_length,
        parts: part_count,
        proxy_errors,
        size_verified,
    })
}

/// Probes the URL directly, without a proxy. Routing the probe through the
/// pool would subject size discovery to proxy rotation; the trade-off is
/// that the client's own address performs one HEAD per run.
async fn probe_with_retries(url: &str) -> Result<RemoteInfo, DownloadError> {
    let mut attempt = 0;
    loop {
        match probe::probe_remote(url, None).await {
            Ok(info) => return Ok(info),
            Err(err) => {
                attempt += 1;
                tracing::error!(%err, attempt, "error getting file content length");
                if attempt >= PROBE_ATTEMPTS {
                    return Err(DownloadError::ProbeExhausted {
                        attempts: PROBE_ATTEMPTS,
                        source: err,
                    });
                }
            }
        }
    }
}

/// Streams the part files, in ascending part number, into the output file.
///
/// Part files are deleted only after every one of them has been copied; any
/// error beforehand leaves them all in place so the next run can resume.
pub(crate) async fn concatenate_parts(
    output: &Path,
    work_dir: &Path,
    basename: &str,
    part_count: usize,
) -> io::Result<()> {
    let mut out = fs::File::create(output).await?;
    let mut part_paths = Vec::with_capacity(part_count);

    for number in 0..part_count {
        let path = work_dir.join(part_file_name(basename, number));
        let mut part = fs::File::open(&path).await?;
        tokio::io::copy(&mut part, &mut out).await?;
        part_paths.push(path);
    }
    out.flush().await?;

    for path in part_paths {
        if let Err(err) = fs::remove_file(&path).await {
            tracing::error!(path = %path.display(), %err, "failed to delete file part");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn concatenation_joins_parts_in_order_and_removes_them() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("out.bin");

        fs::write(dir.path().join("out.bin.0.part"), b"Hello")
            .await
            .unwrap();
        fs::write(dir.path().join("out.bin.1.part"), b", ")
            .await
            .unwrap();
        fs::write(dir.path().join("out.bin.2.part"), b"World")
            .await
            .unwrap();

        concatenate_parts(&output, dir.path(), "out.bin", 3)
            .await
            .unwrap();

        let contents = fs::read(&output).await.unwrap();
        assert_eq!(contents, b"Hello, World");
        for number in 0..3 {
            assert!(!dir
                .path()
                .join(part_file_name("out.bin", number))
                .exists());
        }
    }

    #[tokio::test]
    async fn missing_part_aborts_concatenation_and_keeps_the_rest() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("out.bin");

        fs::write(dir.path().join("out.bin.0.part"), b"keep")
            .await
            .unwrap();
        // part 1 intentionally absent
        fs::write(dir.path().join("out.bin.2.part"), b"keep")
            .await
            .unwrap();

        let err = concatenate_parts(&output, dir.path(), "out.bin", 3)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);

        assert!(dir.path().join("out.bin.0.part").exists());
        assert!(dir.path().join("out.bin.2.part").exists());
    }
}
