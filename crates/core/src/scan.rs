use std::path::Path;

use walkdir::WalkDir;

use crate::upload::FileToRestore;
use crate::{Error, Result};

/// Regular files under `root`, sorted by relative path. Symlinks are not
/// followed.
pub fn scan_source(root: &Path) -> Result<Vec<FileToRestore>> {
    if !root.is_dir() {
        return Err(Error::InvalidConfig {
            message: format!("source must be an existing directory: {}", root.display()),
        });
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let rel = path.strip_prefix(root).map_err(|_| Error::InvalidConfig {
            message: "path strip_prefix failed".to_string(),
        })?;
        let rel = rel
            .components()
            .map(|c| {
                c.as_os_str().to_str().ok_or_else(|| Error::NonUtf8Path {
                    path: path.to_path_buf(),
                })
            })
            .collect::<Result<Vec<_>>>()?
            .join("/");

        let size = entry.metadata()?.len();
        files.push(FileToRestore::new(rel, size, path.to_path_buf()));
    }
    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(files)
}
