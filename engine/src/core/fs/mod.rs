//! Filesystem utilities.
//!
//! Crash-tolerant writes for settings and saved annotations: content goes to
//! a sibling temp file first and is renamed over the destination, so readers
//! never observe a half-written file.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::core::{CoreError, CoreResult};

// =============================================================================
// Naming
// =============================================================================

/// Turns an arbitrary name into a safe file stem.
///
/// Path separators, drive markers, control characters and other characters
/// that are invalid on common filesystems become `_`. Leading dots are
/// stripped so the result never names a hidden file or `..`.
pub fn sanitize_file_stem(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let cleaned = cleaned.trim_start_matches('.').trim();
    if cleaned.is_empty() {
        "video".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Creates `dir` (and parents) if it does not exist.
pub fn ensure_dir(dir: &Path) -> CoreResult<()> {
    std::fs::create_dir_all(dir).map_err(|e| {
        CoreError::Internal(format!(
            "Failed to create directory {}: {}",
            dir.display(),
            e
        ))
    })
}

// =============================================================================
// Atomic Writes
// =============================================================================

/// Write bytes atomically (temp file, fsync, rename).
pub fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> CoreResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_dir(parent)?;
    }

    let tmp_path = sibling_path(path, "tmp");
    {
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(bytes)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }

    replace_file(path, &tmp_path)
}

/// Write UTF-8 text atomically.
pub fn atomic_write_text(path: &Path, text: &str) -> CoreResult<()> {
    atomic_write_bytes(path, text.as_bytes())
}

/// Write a JSON file atomically with pretty formatting.
pub fn atomic_write_json_pretty<T: serde::Serialize>(path: &Path, value: &T) -> CoreResult<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    atomic_write_bytes(path, &bytes)
}

fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| suffix.to_string());
    path.with_file_name(format!("{file_name}.{suffix}"))
}

fn replace_file(dest: &Path, src_tmp: &Path) -> CoreResult<()> {
    if !dest.exists() {
        std::fs::rename(src_tmp, dest)?;
        return Ok(());
    }

    // Rename-over-existing is not reliable on Windows; swap through a backup.
    let bak = sibling_path(dest, "bak");
    if bak.exists() {
        let _ = std::fs::remove_file(&bak);
    }

    std::fs::rename(dest, &bak)?;
    match std::fs::rename(src_tmp, dest) {
        Ok(()) => {
            let _ = std::fs::remove_file(&bak);
            Ok(())
        }
        Err(e) => {
            let _ = std::fs::rename(&bak, dest);
            let _ = std::fs::remove_file(src_tmp);
            Err(CoreError::IoError(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write_creates_and_replaces() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("record.json");

        atomic_write_bytes(&path, b"one").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "one");

        atomic_write_text(&path, "two").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "two");

        assert!(!sibling_path(&path, "tmp").exists());
        assert!(!sibling_path(&path, "bak").exists());
    }

    #[test]
    fn test_atomic_write_json_pretty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("value.json");

        atomic_write_json_pretty(&path, &serde_json::json!({"fps": 1.0})).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("\n"));
        assert!(content.contains("\"fps\": 1.0"));
    }

    #[test]
    fn test_sanitize_file_stem() {
        assert_eq!(sanitize_file_stem("pov_01"), "pov_01");
        assert_eq!(sanitize_file_stem("a/b\\c:d"), "a_b_c_d");
        assert_eq!(sanitize_file_stem("..hidden"), "hidden");
        assert_eq!(sanitize_file_stem("  "), "video");
        assert_eq!(sanitize_file_stem("tab\there"), "tab_here");
        assert_eq!(sanitize_file_stem("clip 1 (final)"), "clip 1 (final)");
    }
}
