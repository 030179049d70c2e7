use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// A fresh, not yet created path under `root`, e.g. `<root>/build-<uuid>`
pub fn unique_dir(root: &Path, prefix: &str) -> PathBuf {
    root.join(format!("{}-{}", prefix, Uuid::new_v4()))
}

/// Remove a per-job directory
///
/// Already-absent paths are fine and other errors are logged, never returned:
/// cleanup must not turn a finished evaluation into a failed one.
pub async fn ensure_removed(path: &Path) {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed working directory"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove working directory"),
    }
}

/// Recursively copy `src` into `dst`
///
/// Symlinks are skipped so a submission cannot pull host files into its
/// build context. `.git` is left behind as well.
pub fn copy_tree(src: &Path, dst: &Path) -> io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let name = entry.file_name();
        let target = dst.join(&name);

        if file_type.is_symlink() {
            tracing::debug!(path = %entry.path().display(), "Skipping symlink");
        } else if file_type.is_dir() {
            if name == ".git" {
                continue;
            }
            copy_tree(&entry.path(), &target)?;
        } else if file_type.is_file() {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
