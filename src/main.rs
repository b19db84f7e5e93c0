//! Command-line entrypoint for `mpdl`.
//!
//! Parses arguments, wires up logging and the progress renderer, and maps
//! the orchestrator's outcome to an exit code.
mod args;

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use args::Args;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use proxy_downloader::downloader::{run_download, DownloadConfig, DownloadError};
use proxy_downloader::observer::{ConsoleSink, LogSink, ProgressSink};
use tracing_subscriber::EnvFilter;

fn init_tracing(args: &Args) {
    let mut directives = String::from(if args.debug { "debug" } else { "info" });
    if args.debug_proxy {
        directives.push_str(",proxy=debug");
    } else {
        directives.push_str(",proxy=warn");
    }
    let filter = EnvFilter::new(directives);

    if args.json_output {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

fn download_bar(total: u64) -> ProgressBar {
    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::with_template(
            "Downloading: ┃{bar:40.cyan}┃ {bytes}/{total_bytes} ({bytes_per_sec}, {eta}) {msg}",
        )
        .unwrap()
        .progress_chars("━━ "),
    );
    bar
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_tracing(&args);

    let Some(url) = args
        .url
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(str::to_string)
    else {
        println!("Usage: mpdl --url <url>");
        println!("Available arguments can be checked with -h or --help");
        return;
    };

    tracing::debug!(part_size_mb = args.part_mib, "part size");
    tracing::debug!(max = args.max_concurrent, "max concurrent connections");
    tracing::debug!(retries = args.max_retries, "max retries per proxy");
    tracing::debug!(path = %args.proxies_file.display(), "proxy list file");

    let output = args
        .output
        .as_deref()
        .map(str::trim)
        .filter(|path| !path.is_empty())
        .map(PathBuf::from);

    let config = DownloadConfig {
        url,
        output,
        proxies_file: args.proxies_file.clone(),
        max_concurrent: args.max_concurrent,
        part_size: args.part_mib * 1024 * 1024,
        max_retries: args.max_retries,
        overwrite: args.overwrite,
    };

    // The bar can only be sized once the probe has run; the factory stores a
    // handle here so the final finish/abandon calls can reach it.
    let bar_cell: Arc<OnceLock<ProgressBar>> = Arc::new(OnceLock::new());
    let cell = Arc::clone(&bar_cell);
    let verbose = args.verbose;
    let make_sink = move |total: u64, _parts: usize| -> Arc<dyn ProgressSink> {
        if verbose {
            Arc::new(LogSink)
        } else {
            let bar = download_bar(total);
            let _ = cell.set(bar.clone());
            Arc::new(ConsoleSink { bar })
        }
    };

    match run_download(config, make_sink).await {
        Ok(_summary) => {
            if let Some(bar) = bar_cell.get() {
                bar.finish();
                println!();
            }
        }
        Err(DownloadError::OutputExists { path }) => {
            tracing::error!(
                path = %path.display(),
                "file already exists, use the --overwrite flag to overwrite it"
            );
        }
        Err(err) => {
            if let Some(bar) = bar_cell.get() {
                bar.abandon();
            }
            tracing::error!("{:#}", anyhow::Error::new(err));
            std::process::exit(1);
        }
    }
}
