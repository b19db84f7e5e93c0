//! proxy_downloader — ranged downloads through a rotating proxy pool
//!
//! `proxy_downloader` accelerates a single-file HTTP(S) download by splitting
//! the file into byte-range parts and fetching them concurrently, each part
//! routed through a different proxy from a rotating pool. Proxies that
//! misbehave are penalised to the back of the queue; proxies that deliver are
//! reused first. Interrupted runs resume from the part files left on disk.
//!
//! The library exposes the engine so the CLI stays thin glue; embedders can
//! drive the same primitives with their own progress renderer.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use proxy_downloader::downloader::{run_download, DownloadConfig};
//! use proxy_downloader::observer::NoopSink;
//!
//! # async {
//! let config = DownloadConfig {
//!     url: "https://example.com/big.iso".into(),
//!     output: None,
//!     proxies_file: "proxies.txt".into(),
//!     max_concurrent: 8,
//!     part_size: 10 * 1024 * 1024,
//!     max_retries: 2,
//!     overwrite: false,
//! };
//! let summary = run_download(config, |_total, _parts| Arc::new(NoopSink)).await?;
//! println!("saved {}", summary.output_path.display());
//! # Ok::<(), proxy_downloader::downloader::DownloadError>(())
//! # };
//! ```

pub mod downloader;
pub mod observer;
pub mod pool;
pub mod probe;
pub mod state;
pub mod utils;
pub mod worker;

pub use downloader::{run_download, DownloadConfig, DownloadError, DownloadSummary};
pub use observer::ProgressSink;
pub use pool::{PoolError, ProxyPool};
pub use probe::{probe_remote, RemoteInfo};
pub use state::{plan_parts, FilePart};
pub use worker::{fetch_part, FetchError};
