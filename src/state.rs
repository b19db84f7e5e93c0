//! Byte-range planning and the on-disk resume ledger.
//!
//! A download is divided into numbered [`FilePart`]s, each fetched into its
//! own `<output>.<N>.part` file. The ledger (`<output>.info.txt`) records the
//! probed total size so an interrupted run can detect whether the remote
//! resource changed before reusing part files.
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// One contiguous byte range of the remote file.
///
/// Ranges are inclusive on both ends; `end - start + 1` is the exact number
/// of bytes the part holds. Parts are numbered from 0 in ascending byte
/// order and part N starts where part N-1 ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilePart {
    /// Index of the part, starting at 0.
    pub number: usize,
    /// First byte of the range (0-based).
    pub start: u64,
    /// Last byte of the range, inclusive.
    pub end: u64,
    /// Whether the part file is complete on disk.
    pub downloaded: bool,
}

impl FilePart {
    /// Exact byte count of this part.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Divides `total` bytes into parts of `part_size` bytes; only the last part
/// may be shorter. A zero-length file yields no parts.
///
/// `part_size` must be strictly positive.
pub fn plan_parts(total: u64, part_size: u64) -> Vec<FilePart> {
    assert!(part_size > 0, "part size must be strictly positive");

    let mut parts = Vec::new();
    let mut start = 0u64;

    while start < total {
        let end = (start + part_size - 1).min(total - 1);
        parts.push(FilePart {
            number: parts.len(),
            start,
            end,
            downloaded: false,
        });
        start = end + 1;
    }

    parts
}

/// File name of part `number` for the given output base name.
pub fn part_file_name(basename: &str, number: usize) -> String {
    format!("{}.{}.part", basename, number)
}

#[derive(Error, Debug)]
pub enum LedgerError {
    /// The stored total disagrees with the freshly probed one. Reusing the
    /// part files would assemble a corrupt output.
    #[error(
        "file size on server has changed, link probably expired \
         (stored {stored}, probed {probed})"
    )]
    SizeDrift { stored: u64, probed: u64 },
    #[error("info file {} holds no parseable size", .path.display())]
    Corrupt { path: PathBuf },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Path of the info ledger for `basename` inside `work_dir`.
pub fn ledger_path(work_dir: &Path, basename: &str) -> PathBuf {
    work_dir.join(format!("{}.info.txt", basename))
}

/// Creates the info ledger recording `total`, or validates an existing one.
///
/// A pre-existing ledger signals an interrupted download: its stored size
/// must equal the probed size or the run refuses with
/// [`LedgerError::SizeDrift`]. Returns the ledger path either way; the
/// orchestrator deletes it once the assembled output has been verified.
pub async fn ensure_ledger(
    work_dir: &Path,
    basename: &str,
    total: u64,
) -> Result<PathBuf, LedgerError> {
    let path = ledger_path(work_dir, basename);

    match fs::read_to_string(&path).await {
        Ok(contents) => {
            let stored: u64 = contents
                .lines()
                .next()
                .unwrap_or("")
                .trim()
                .parse()
                .map_err(|_| LedgerError::Corrupt { path: path.clone() })?;

            if stored != total {
                return Err(LedgerError::SizeDrift {
                    stored,
                    probed: total,
                });
            }

            tracing::info!("resuming previous download");
            Ok(path)
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            let mut file = fs::File::create(&path).await?;
            file.write_all(total.to_string().as_bytes()).await?;
            file.flush().await?;
            Ok(path)
        }
        Err(err) => Err(err.into()),
    }
}
