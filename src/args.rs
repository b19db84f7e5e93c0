use std::path::PathBuf;

use clap::{ArgAction, Parser};

/// Download a single file through a rotating pool of proxies.
///
/// The file is split into byte-range parts fetched concurrently, each part
/// routed through a different proxy, then reassembled into one output file.
#[derive(Parser, Debug)]
#[command(name = "mpdl", author, version, about, long_about = None, disable_version_flag = true)]
pub struct Args {
    /// URL of the file to download.
    #[arg(long)]
    pub url: Option<String>,

    /// Path to save the downloaded file.
    #[arg(long)]
    pub output: Option<String>,

    /// Path to a file containing a list of proxy addresses.
    #[arg(long = "proxy", default_value = "proxies.txt")]
    pub proxies_file: PathBuf,

    /// Maximum number of concurrent downloads.
    #[arg(long = "max", default_value_t = 30)]
    pub max_concurrent: usize,

    /// Size of each download part in megabytes (MB).
    #[arg(long = "part", default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    pub part_mib: u64,

    /// Number of retries for a part before switching to the next proxy.
    #[arg(long = "retry", default_value_t = 2)]
    pub max_retries: u32,

    /// Overwrite the output file if it already exists.
    #[arg(long)]
    pub overwrite: bool,

    /// Disable the progress bar and show logs instead.
    #[arg(long)]
    pub verbose: bool,

    /// Enable JSON formatted output for logs.
    #[arg(long = "json-output")]
    pub json_output: bool,

    /// Enable debug logging.
    #[arg(long)]
    pub debug: bool,

    /// Enable debug logging for proxy operations.
    #[arg(long = "debug-proxy")]
    pub debug_proxy: bool,

    /// Display the application version and exit.
    #[arg(short = 'v', long = "version", action = ArgAction::Version)]
    pub version: Option<bool>,
}
