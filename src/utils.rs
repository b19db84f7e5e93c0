use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;

/// Loads the proxy list: one proxy URL per line, blank lines skipped.
///
/// # Errors
///
/// Returns any I/O error from reading the file.
pub async fn load_proxies(path: &Path) -> io::Result<Vec<String>> {
    let contents = fs::read_to_string(path).await?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Resolves the user-supplied output path to an absolute file path, creating
/// its parent directory if needed.
///
/// Returns `(absolute_path, work_dir, basename)`; part files and the info
/// ledger live next to the output inside `work_dir`.
///
/// # Errors
///
/// Fails if the path has no file name component or the directory cannot be
/// created.
pub async fn prepare_output_path(user_path: &Path) -> io::Result<(PathBuf, PathBuf, String)> {
    let abs_path = std::path::absolute(user_path)?;

    let basename = abs_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("output path {} has no file name", abs_path.display()),
            )
        })?;

    let work_dir = abs_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("/"));

    fs::create_dir_all(&work_dir).await?;

    Ok((abs_path, work_dir, basename))
}
