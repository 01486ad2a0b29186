//! Annotation Store
//!
//! Persists finished annotations in the outputs directory.
//! Each result becomes `{stem}_{YYYYmmdd_HHMMSS}.json` plus a `.txt`
//! rendering with a short header.

use std::fs;
use std::path::{Path, PathBuf};

use crate::core::fs::{atomic_write_json_pretty, atomic_write_text, ensure_dir, sanitize_file_stem};
use crate::core::{CoreError, CoreResult};

use super::AnnotationRecord;

// =============================================================================
// Constants
// =============================================================================

/// Timestamp format used in file names and records
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Current local time in `TIMESTAMP_FORMAT`
pub fn timestamp_now() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

// =============================================================================
// Annotation Store
// =============================================================================

/// Paths written by a save
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SavedAnnotation {
    pub json_path: PathBuf,
    pub txt_path: PathBuf,
}

/// A record read back from disk
#[derive(Clone, Debug, PartialEq)]
pub struct StoredAnnotation {
    pub path: PathBuf,
    pub record: AnnotationRecord,
}

/// Reads and writes annotation files in one directory
pub struct AnnotationStore {
    outputs_dir: PathBuf,
}

impl AnnotationStore {
    pub fn new(outputs_dir: impl Into<PathBuf>) -> Self {
        Self {
            outputs_dir: outputs_dir.into(),
        }
    }

    /// Returns the outputs directory path
    pub fn outputs_dir(&self) -> &Path {
        &self.outputs_dir
    }

    /// Saves a record as JSON and text (atomic write via temp file + rename)
    pub fn save(&self, record: &AnnotationRecord) -> CoreResult<SavedAnnotation> {
        ensure_dir(&self.outputs_dir)?;

        let base_name = self.unused_base_name(record);
        let json_path = self.outputs_dir.join(format!("{}.json", base_name));
        let txt_path = self.outputs_dir.join(format!("{}.txt", base_name));

        atomic_write_json_pretty(&json_path, record)?;
        atomic_write_text(&txt_path, &render_text(record))?;

        tracing::info!("Annotation saved: {}", json_path.display());
        Ok(SavedAnnotation {
            json_path,
            txt_path,
        })
    }

    /// Loads a saved JSON record
    pub fn load(&self, path: &Path) -> CoreResult<AnnotationRecord> {
        if !path.exists() {
            return Err(CoreError::FileNotFound(path.display().to_string()));
        }

        let content = fs::read_to_string(path)?;
        let record = serde_json::from_str(&content).map_err(|e| {
            CoreError::Internal(format!(
                "Failed to parse annotation file {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(record)
    }

    /// Lists saved records, newest first
    ///
    /// Unreadable files are skipped with a warning.
    pub fn list(&self) -> CoreResult<Vec<StoredAnnotation>> {
        if !self.outputs_dir.exists() {
            return Ok(Vec::new());
        }

        let mut stored = Vec::new();
        for entry in fs::read_dir(&self.outputs_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match self.load(&path) {
                Ok(record) => stored.push(StoredAnnotation { path, record }),
                Err(e) => tracing::warn!("Skipping {}: {}", path.display(), e),
            }
        }

        stored.sort_by(|a, b| {
            b.record
                .timestamp
                .cmp(&a.record.timestamp)
                .then_with(|| b.path.cmp(&a.path))
        });
        Ok(stored)
    }

    /// `{stem}_{timestamp}`, suffixed when a save in the same second exists
    fn unused_base_name(&self, record: &AnnotationRecord) -> String {
        let stem = Path::new(&record.video)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| record.video.clone());
        let base = format!("{}_{}", sanitize_file_stem(&stem), record.timestamp);

        let taken = |name: &str| self.outputs_dir.join(format!("{}.json", name)).exists();
        if !taken(&base) {
            return base;
        }
        (1..)
            .map(|n| format!("{}_{}", base, n))
            .find(|name| !taken(name))
            .unwrap_or(base)
    }
}

/// Human-readable rendering of a record
pub fn render_text(record: &AnnotationRecord) -> String {
    format!(
        "=== Video annotation: {} ===\n\
         Model: {}\n\
         FPS: {}\n\
         Resolution: {}\n\
         Processing time: {:.1} s\n\
         Tokens used: {}\n\
         Date: {}\n\
         \n--- Annotation ---\n{}",
        record.video,
        record.model,
        record.fps,
        record.resolution,
        record.processing_time,
        record.used_tokens,
        record.timestamp,
        record.annotation
    )
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::annotations::AnnotationResult;
    use crate::core::cost::EncodingParameters;
    use crate::core::Resolution;
    use tempfile::TempDir;

    fn record(video: &str, timestamp: &str) -> AnnotationRecord {
        let params = EncodingParameters::fixed(1.0, Resolution::square(448));
        let result = AnnotationResult {
            content: "00:00 opens door".to_string(),
            used_tokens: 6180,
            processing_time_seconds: 42.34,
            model: "qwen-vl-max-latest".to_string(),
            estimated_frames: 30,
        };
        AnnotationRecord::new(video, &params, &result, timestamp)
    }

    #[test]
    fn test_save_writes_json_and_text() {
        let dir = TempDir::new().unwrap();
        let store = AnnotationStore::new(dir.path().join("outputs"));

        let saved = store
            .save(&record("pov_kitchen.mp4", "20240501_120000"))
            .unwrap();

        assert_eq!(
            saved.json_path.file_name().unwrap(),
            "pov_kitchen_20240501_120000.json"
        );
        assert!(saved.txt_path.exists());

        let text = std::fs::read_to_string(&saved.txt_path).unwrap();
        assert!(text.starts_with("=== Video annotation: pov_kitchen.mp4 ==="));
        assert!(text.contains("Processing time: 42.3 s"));
        assert!(text.ends_with("--- Annotation ---\n00:00 opens door"));

        let loaded = store.load(&saved.json_path).unwrap();
        assert_eq!(loaded, record("pov_kitchen.mp4", "20240501_120000"));
    }

    #[test]
    fn test_save_same_second_does_not_overwrite() {
        let dir = TempDir::new().unwrap();
        let store = AnnotationStore::new(dir.path());

        let first = store.save(&record("a.mp4", "20240501_120000")).unwrap();
        let second = store.save(&record("a.mp4", "20240501_120000")).unwrap();

        assert_ne!(first.json_path, second.json_path);
        assert_eq!(
            second.json_path.file_name().unwrap(),
            "a_20240501_120000_1.json"
        );
    }

    #[test]
    fn test_save_sanitizes_remote_names() {
        let dir = TempDir::new().unwrap();
        let store = AnnotationStore::new(dir.path());

        let saved = store.save(&record("..", "20240501_120000")).unwrap();
        let name = saved.json_path.file_name().unwrap().to_string_lossy().to_string();
        assert!(!name.starts_with('.'));
        assert_eq!(saved.json_path.parent().unwrap(), dir.path());
    }

    #[test]
    fn test_list_newest_first() {
        let dir = TempDir::new().unwrap();
        let store = AnnotationStore::new(dir.path());

        store.save(&record("old.mp4", "20240101_090000")).unwrap();
        store.save(&record("new.mp4", "20240601_090000")).unwrap();
        store.save(&record("mid.mp4", "20240301_090000")).unwrap();
        std::fs::write(dir.path().join("broken.json"), "{").unwrap();

        let listed = store.list().unwrap();
        let videos: Vec<&str> = listed.iter().map(|s| s.record.video.as_str()).collect();
        assert_eq!(videos, vec!["new.mp4", "mid.mp4", "old.mp4"]);
    }

    #[test]
    fn test_list_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = AnnotationStore::new(dir.path().join("nothing"));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let store = AnnotationStore::new(dir.path());
        let err = store.load(&dir.path().join("none.json")).unwrap_err();
        assert!(matches!(err, CoreError::FileNotFound(_)));
    }

    #[test]
    fn test_timestamp_format() {
        let ts = timestamp_now();
        assert_eq!(ts.len(), 15);
        assert_eq!(&ts[8..9], "_");
    }
}
