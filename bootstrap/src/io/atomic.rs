//! Whole-file replacement via temp file + rename.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Sibling temp path used while writing `path` (`outputs.json` → `outputs.json.tmp`).
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Atomically write `contents` to `path` (temp file + rename).
pub fn write_atomic(path: &Path, contents: impl AsRef<[u8]>) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = temp_path(path);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

/// Atomically copy `from` to `to`, preserving permissions.
pub fn copy_atomic(from: &Path, to: &Path) -> Result<()> {
    let tmp_path = temp_path(to);
    fs::copy(from, &tmp_path)
        .with_context(|| format!("copy {} to {}", from.display(), tmp_path.display()))?;
    fs::rename(&tmp_path, to).with_context(|| format!("replace {}", to.display()))?;
    Ok(())
}

/// Remove `path`, treating an already-missing file as success.
pub fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err).with_context(|| format!("remove {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_atomic_replaces_and_leaves_no_temp() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested").join("outputs.json");

        write_atomic(&path, "first").expect("write");
        write_atomic(&path, "second").expect("rewrite");

        assert_eq!(fs::read_to_string(&path).expect("read"), "second");
        assert!(!temp_path(&path).exists());
        assert_eq!(
            temp_path(&path).file_name().and_then(|n| n.to_str()),
            Some("outputs.json.tmp")
        );
    }

    #[test]
    fn remove_if_exists_tolerates_missing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("gone");
        assert!(!remove_if_exists(&path).expect("remove missing"));
        fs::write(&path, "x").expect("write");
        assert!(remove_if_exists(&path).expect("remove present"));
        assert!(!path.exists());
    }
}
