use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::RANGE;
use reqwest::{Client, Proxy, StatusCode};
use thiserror::Error;
use tokio::fs;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;

use crate::downloader::DownloadError;
use crate::observer::ProgressSink;
use crate::pool::ProxyPool;
use crate::state::{part_file_name, FilePart};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);
const KEEPALIVE: Duration = Duration::from_secs(30);

/// Failure of a single fetch attempt.
///
/// Variants that die mid-body carry the number of bytes already written (and
/// already reported to the sink) so the caller can refund them.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("server returned unexpected status: {0}")]
    UnexpectedStatus(StatusCode),
    #[error("failed to write part file: {source}")]
    Io {
        written: u64,
        #[source]
        source: std::io::Error,
    },
    #[error("connection dropped mid-body: {source}")]
    Stream {
        written: u64,
        #[source]
        source: reqwest::Error,
    },
}

impl FetchError {
    /// Bytes written to disk (and added to the sink) before the failure.
    pub fn bytes_written(&self) -> u64 {
        match self {
            FetchError::Io { written, .. } | FetchError::Stream { written, .. } => *written,
            _ => 0,
        }
    }
}

/// Downloads the byte range `start..=end` of `url` into `dest`, streaming
/// byte counts to `sink` as chunks arrive.
///
/// The destination is truncated first. Only `206 Partial Content` is
/// accepted; a `200` would silently deliver the whole file. TLS verification
/// is deliberately disabled, matching the probe: the proxies this tool is
/// pointed at rarely present honest certificates. The returned byte count is
/// not checked against the range length here; the caller stats the file and
/// decides whether a short body means a size mismatch or a dropped
/// connection.
pub async fn fetch_part(
    url: &str,
    proxy: Option<&str>,
    dest: &Path,
    start: u64,
    end: u64,
    sink: &dyn ProgressSink,
) -> Result<u64, FetchError> {
    let mut builder = Client::builder()
        .danger_accept_invalid_certs(true)
        .connect_timeout(CONNECT_TIMEOUT)
        .read_timeout(RESPONSE_TIMEOUT)
        .tcp_keepalive(KEEPALIVE);
    if let Some(proxy) = proxy {
        builder = builder.proxy(Proxy::all(proxy)?);
    }
    let client = builder.build()?;

    let file = fs::File::create(dest)
        .await
        .map_err(|source| FetchError::Io { written: 0, source })?;
    let mut writer = BufWriter::new(file);

    let mut response = client
        .get(url)
        .header(RANGE, format!("bytes={}-{}", start, end))
        .send()
        .await?;

    if response.status() != StatusCode::PARTIAL_CONTENT {
        return Err(FetchError::UnexpectedStatus(response.status()));
    }

    let mut written = 0u64;
    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                writer
                    .write_all(&chunk)
                    .await
                    .map_err(|source| FetchError::Io { written, source })?;
                written += chunk.len() as u64;
                sink.add(chunk.len() as i64);
            }
            Ok(None) => break,
            Err(source) => return Err(FetchError::Stream { written, source }),
        }
    }

    writer
        .flush()
        .await
        .map_err(|source| FetchError::Io { written, source })?;

    Ok(written)
}

/// Everything a worker needs, shared across the worker set.
pub(crate) struct DownloadContext {
    pub(crate) url: String,
    pub(crate) work_dir: PathBuf,
    pub(crate) output_basename: String,
    pub(crate) max_retries: u32,
    pub(crate) pool: ProxyPool,
    pub(crate) parts: Mutex<Vec<FilePart>>,
    pub(crate) queue: Mutex<VecDeque<FilePart>>,
    pub(crate) sink: Arc<dyn ProgressSink>,
}

impl DownloadContext {
    /// Flips the part's downloaded flag and emits the matching detail line.
    /// Flag write and sink update share one critical section so the line
    /// never reports a count the flags don't back.
    async fn mark_downloaded(&self, number: usize) {
        let proxy_errors = self.pool.error_count().await;
        let mut parts = self.parts.lock().await;

        if let Some(part) = parts.get_mut(number) {
            part.downloaded = true;
        }

        let done = parts.iter().filter(|part| part.downloaded).count();
        let total = parts.len();
        let percent = done as f64 / total as f64 * 100.0;
        self.sink.add_detail(&format!(
            "progress={:05.2}% parts={}/{} proxy_errors={}",
            percent, done, total, proxy_errors
        ));
    }
}

/// Decides whether the next attempt should rotate to a different proxy.
///
/// With a zero threshold the first failure still earns one retry on the same
/// proxy before failover kicks in.
fn failover_due(retries: u32, max_retries: u32) -> bool {
    if max_retries > 0 {
        retries >= max_retries
    } else {
        retries > 0
    }
}

/// Worker loop: drains parts from the shared queue until it is empty.
///
/// Worker identities are the stringified indices `0..max_concurrent`; the
/// proxy pool keys assignments by them.
pub(crate) async fn run_worker(
    ctx: Arc<DownloadContext>,
    worker_id: usize,
) -> Result<(), DownloadError> {
    let worker = worker_id.to_string();

    loop {
        let part = ctx.queue.lock().await.pop_front();
        let Some(part) = part else {
            return Ok(());
        };
        process_part(&ctx, &worker, part).await?;
    }
}

async fn process_part(
    ctx: &DownloadContext,
    worker: &str,
    part: FilePart,
) -> Result<(), DownloadError> {
    let part_path = ctx
        .work_dir
        .join(part_file_name(&ctx.output_basename, part.number));
    let part_size = part.len();

    // A part file left over from an earlier run is reused when its size is
    // exactly right; anything else is garbage.
    match fs::metadata(&part_path).await {
        Ok(meta) if meta.len() == part_size => {
            ctx.sink.add(part_size as i64);
            ctx.mark_downloaded(part.number).await;
            return Ok(());
        }
        Ok(_) => {
            if let Err(err) = fs::remove_file(&part_path).await {
                tracing::error!(path = %part_path.display(), %err, "failed to delete stale part file");
            }
        }
        Err(_) => {}
    }

    let mut retries = 0u32;
    loop {
        let proxy = if failover_due(retries, ctx.max_retries) {
            retries = 0;
            ctx.pool.fail(worker).await?
        } else {
            ctx.pool.assign(worker).await?
        };

        let written = match fetch_part(
            &ctx.url,
            Some(&proxy),
            &part_path,
            part.start,
            part.end,
            ctx.sink.as_ref(),
        )
        .await
        {
            Ok(written) => written,
            Err(err) => {
                tracing::debug!(worker, part = part.number, %err, "part download failed");
                let _ = fs::remove_file(&part_path).await;
                ctx.sink.add(-(err.bytes_written() as i64));
                retries += 1;
                continue;
            }
        };

        // The fetcher reports what it wrote; whether that is the whole part
        // is decided here, against the file itself.
        let size_on_disk = match fs::metadata(&part_path).await {
            Ok(meta) => meta.len(),
            Err(err) => {
                tracing::error!(worker, path = %part_path.display(), %err, "failed to stat downloaded part");
                ctx.sink.add(-(written as i64));
                retries += 1;
                continue;
            }
        };

        if size_on_disk != part_size {
            tracing::warn!(
                worker,
                part = part.number,
                size_on_disk,
                expected = part_size,
                "part has incorrect size, redownloading"
            );
            if let Err(err) = fs::remove_file(&part_path).await {
                tracing::error!(path = %part_path.display(), %err, "failed to delete part file");
            }
            ctx.sink.add(-(written as i64));
            retries += 1;
            continue;
        }

        // The worker always holds a proxy at this point, so release
        // cannot fail.
        let _ = ctx.pool.release(worker).await;
        ctx.mark_downloaded(part.number).await;
        return Ok(());
    }
}
