//! Whole-file JSON persistence helpers shared by the token store and the
//! redirect cache.

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

/// Write `contents` to `path` atomically.
///
/// Writes to a sibling `.tmp` file, fsyncs, then renames over the target, so
/// readers never observe a partially written document.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }

    let tmp_path = tmp_path_for(path);
    {
        let mut file = File::create(&tmp_path).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
    }

    fs::rename(&tmp_path, path).await
}

/// Read a file, mapping "not found" to `Ok(None)`.
pub async fn read_optional(path: &Path) -> io::Result<Option<String>> {
    match fs::read_to_string(path).await {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
