//! Settings Persistence
//!
//! Annotator settings stored as JSON with:
//! - Atomic file writes (temp file + rename)
//! - Per-field defaults so partial files still load
//! - Clamping of out-of-range values on load and save
//!
//! Storage location: {data_dir}/clipscribe/settings.json

use std::fs;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::annotations::{
    Credentials, DashScopeConfig, DashScopeProvider, GenerationParams, PipelineConfig, Region,
};
use crate::core::cost::{TokenCostModel, MAX_FPS, MIN_FPS};
use crate::core::fs::atomic_write_json_pretty;
use crate::core::{CoreError, CoreResult};

/// Settings schema version for migration support
pub const SETTINGS_VERSION: u32 = 1;

/// Settings file name
pub const SETTINGS_FILE: &str = "settings.json";

/// Environment variable that overrides the stored API key
pub const API_KEY_ENV: &str = "DASHSCOPE_API_KEY";

/// Application directory name under the platform data dir
pub const APP_DIR_NAME: &str = "clipscribe";

// =============================================================================
// Annotator Settings
// =============================================================================

/// Persistent annotator configuration
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnnotatorSettings {
    /// Schema version for migrations
    #[serde(default = "default_version")]
    pub version: u32,

    /// DashScope API key (DASHSCOPE_API_KEY takes precedence)
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default)]
    pub region: Region,

    /// Overrides the region's endpoint
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling rate used when none is given
    #[serde(default = "default_fps")]
    pub fps: f64,

    /// Low for precise annotation (0.0 - 1.0)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum answer length (256 - 8192)
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_top_p")]
    pub top_p: f32,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Where annotations are saved (default: {data_dir}/outputs)
    #[serde(default)]
    pub outputs_dir: Option<PathBuf>,

    /// Where prompt files live (default: {data_dir}/prompts)
    #[serde(default)]
    pub prompts_dir: Option<PathBuf>,

    #[serde(default)]
    pub cost_model: TokenCostModel,
}

fn default_version() -> u32 {
    SETTINGS_VERSION
}

fn default_model() -> String {
    DashScopeProvider::DEFAULT_MODEL.to_string()
}

fn default_fps() -> f64 {
    1.0
}

fn default_temperature() -> f32 {
    0.3
}

fn default_max_tokens() -> u32 {
    4000
}

fn default_top_p() -> f32 {
    0.9
}

fn default_request_timeout_secs() -> u64 {
    DashScopeProvider::DEFAULT_TIMEOUT_SECS
}

impl Default for AnnotatorSettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            api_key: None,
            region: Region::default(),
            base_url: None,
            model: default_model(),
            fps: default_fps(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            top_p: default_top_p(),
            request_timeout_secs: default_request_timeout_secs(),
            outputs_dir: None,
            prompts_dir: None,
            cost_model: TokenCostModel::default(),
        }
    }
}

impl std::fmt::Debug for AnnotatorSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnnotatorSettings")
            .field("version", &self.version)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("region", &self.region)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("fps", &self.fps)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("top_p", &self.top_p)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("outputs_dir", &self.outputs_dir)
            .field("prompts_dir", &self.prompts_dir)
            .field("cost_model", &self.cost_model)
            .finish()
    }
}

impl AnnotatorSettings {
    /// Corrects bad values instead of failing, so old or hand-edited
    /// files still load.
    pub fn normalize(&mut self) {
        self.version = SETTINGS_VERSION;

        self.api_key = non_blank(self.api_key.take());
        self.base_url = non_blank(self.base_url.take()).map(|u| u.trim_end_matches('/').to_string());
        if self.model.trim().is_empty() {
            self.model = default_model();
        } else {
            self.model = self.model.trim().to_string();
        }

        self.fps = if self.fps.is_finite() {
            self.fps.clamp(MIN_FPS, MAX_FPS)
        } else {
            default_fps()
        };
        self.temperature = clamp_f32(self.temperature, 0.0, 1.0, default_temperature());
        self.max_tokens = self.max_tokens.clamp(256, 8192);
        self.top_p = clamp_f32(self.top_p, 0.01, 1.0, default_top_p());
        self.request_timeout_secs = self.request_timeout_secs.clamp(10, 3600);

        self.cost_model.normalize();
    }

    /// Replaces the stored key with `value` when it is non-blank
    pub fn apply_api_key_override(&mut self, value: Option<String>) {
        if let Some(key) = non_blank(value) {
            self.api_key = Some(key);
        }
    }

    /// Applies `DASHSCOPE_API_KEY` from the environment
    pub fn apply_env(&mut self) {
        self.apply_api_key_override(std::env::var(API_KEY_ENV).ok());
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.api_key.clone(), self.region)
    }

    pub fn generation_params(&self) -> GenerationParams {
        GenerationParams {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            top_p: self.top_p,
        }
    }

    /// Explicit configuration for an `AnnotationPipeline`
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            credentials: self.credentials(),
            generation: self.generation_params(),
            cost_model: self.cost_model,
        }
    }

    pub fn dashscope_config(&self) -> DashScopeConfig {
        let config = DashScopeConfig::default().with_timeout(self.request_timeout_secs);
        match &self.base_url {
            Some(url) => config.with_base_url(url),
            None => config,
        }
    }

    pub fn outputs_dir_in(&self, data_dir: &Path) -> PathBuf {
        self.outputs_dir
            .clone()
            .unwrap_or_else(|| data_dir.join("outputs"))
    }

    pub fn prompts_dir_in(&self, data_dir: &Path) -> PathBuf {
        self.prompts_dir
            .clone()
            .unwrap_or_else(|| data_dir.join("prompts"))
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn clamp_f32(value: f32, min: f32, max: f32, fallback: f32) -> f32 {
    if !value.is_finite() {
        return fallback;
    }
    value.clamp(min, max)
}

/// Platform data directory for the application
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

// =============================================================================
// Settings Manager
// =============================================================================

/// Loads and saves `AnnotatorSettings` under an advisory file lock
pub struct SettingsManager {
    settings_path: PathBuf,
}

impl SettingsManager {
    /// Create a settings manager for `{data_dir}/settings.json`
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            settings_path: data_dir.join(SETTINGS_FILE),
        }
    }

    /// Create a settings manager for an explicit file
    pub fn with_path(settings_path: PathBuf) -> Self {
        Self { settings_path }
    }

    /// Settings manager for the platform data directory
    pub fn default_location() -> Self {
        Self::new(default_data_dir())
    }

    pub fn settings_path(&self) -> &Path {
        &self.settings_path
    }

    /// Directory holding the settings file
    pub fn data_dir(&self) -> PathBuf {
        self.settings_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    fn lock_path(&self) -> PathBuf {
        let file_name = self
            .settings_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| SETTINGS_FILE.to_string());
        self.data_dir().join(format!("{}.lock", file_name))
    }

    fn with_lock<T>(&self, exclusive: bool, op: impl FnOnce() -> CoreResult<T>) -> CoreResult<T> {
        fs::create_dir_all(self.data_dir()).map_err(|e| {
            CoreError::Internal(format!("Failed to create settings directory: {}", e))
        })?;

        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(self.lock_path())?;

        if exclusive {
            fs2::FileExt::lock_exclusive(&lock_file)?;
        } else {
            fs2::FileExt::lock_shared(&lock_file)?;
        }

        let result = op();

        if let Err(e) = fs2::FileExt::unlock(&lock_file) {
            warn!("Failed to unlock settings lock file: {}", e);
        }

        result
    }

    /// Load settings from disk, returning defaults if the file is missing or corrupt
    pub fn load(&self) -> AnnotatorSettings {
        let result = self.with_lock(false, || {
            if !self.settings_path.exists() {
                info!("Settings file not found, using defaults");
                return Ok(AnnotatorSettings::default());
            }

            let content = fs::read_to_string(&self.settings_path)?;
            let mut settings = serde_json::from_str::<AnnotatorSettings>(&content)?;

            if settings.version < SETTINGS_VERSION {
                info!(
                    "Migrating settings from version {} to {}",
                    settings.version, SETTINGS_VERSION
                );
            }

            settings.normalize();
            Ok(settings)
        });

        match result {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Failed to load settings, using defaults: {}", e);
                AnnotatorSettings::default()
            }
        }
    }

    /// Save normalized settings (atomic write) and return what was written
    pub fn save(&self, settings: &AnnotatorSettings) -> CoreResult<AnnotatorSettings> {
        self.with_lock(true, || {
            let mut normalized = settings.clone();
            normalized.normalize();

            atomic_write_json_pretty(&self.settings_path, &normalized)?;
            info!("Settings saved to {}", self.settings_path.display());
            Ok(normalized)
        })
    }

    /// Delete the settings file and return defaults
    pub fn reset(&self) -> CoreResult<AnnotatorSettings> {
        self.with_lock(true, || {
            if self.settings_path.exists() {
                fs::remove_file(&self.settings_path)?;
                info!("Settings file deleted");
            }
            Ok(AnnotatorSettings::default())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // ------------------------------------------------------------
    // AnnotatorSettings
    // ------------------------------------------------------------

    #[test]
    fn test_default_settings() {
        let settings = AnnotatorSettings::default();
        assert_eq!(settings.model, "qwen-vl-max-latest");
        assert_eq!(settings.fps, 1.0);
        assert_eq!(settings.temperature, 0.3);
        assert_eq!(settings.max_tokens, 4000);
        assert_eq!(settings.top_p, 0.9);
        assert_eq!(settings.request_timeout_secs, 600);
        assert_eq!(settings.region, Region::Beijing);
        assert!(settings.api_key.is_none());
    }

    #[test]
    fn test_normalization_clamps_values() {
        let mut settings = AnnotatorSettings {
            fps: 30.0,
            temperature: 1.7,
            max_tokens: 100_000,
            top_p: 0.0,
            request_timeout_secs: 1,
            model: "   ".to_string(),
            api_key: Some("  ".to_string()),
            base_url: Some("http://proxy.local/".to_string()),
            ..Default::default()
        };
        settings.normalize();

        assert_eq!(settings.fps, MAX_FPS);
        assert_eq!(settings.temperature, 1.0);
        assert_eq!(settings.max_tokens, 8192);
        assert_eq!(settings.top_p, 0.01);
        assert_eq!(settings.request_timeout_secs, 10);
        assert_eq!(settings.model, "qwen-vl-max-latest");
        assert!(settings.api_key.is_none());
        assert_eq!(settings.base_url.as_deref(), Some("http://proxy.local"));
    }

    #[test]
    fn test_normalization_handles_nan_values() {
        let mut settings = AnnotatorSettings {
            fps: f64::NAN,
            temperature: f32::NAN,
            top_p: f32::INFINITY,
            ..Default::default()
        };
        settings.normalize();

        assert_eq!(settings.fps, 1.0);
        assert_eq!(settings.temperature, 0.3);
        assert_eq!(settings.top_p, 0.9);
    }

    #[test]
    fn test_api_key_override() {
        let mut settings = AnnotatorSettings {
            api_key: Some("sk-stored".to_string()),
            ..Default::default()
        };

        settings.apply_api_key_override(Some(" ".to_string()));
        assert_eq!(settings.api_key.as_deref(), Some("sk-stored"));

        settings.apply_api_key_override(Some("sk-env".to_string()));
        assert_eq!(settings.api_key.as_deref(), Some("sk-env"));
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let settings = AnnotatorSettings {
            api_key: Some("sk-secret-value".to_string()),
            ..Default::default()
        };
        assert!(!format!("{:?}", settings).contains("sk-secret"));
    }

    #[test]
    fn test_pipeline_config() {
        let settings = AnnotatorSettings {
            api_key: Some("sk-test".to_string()),
            region: Region::Singapore,
            temperature: 0.1,
            ..Default::default()
        };
        let config = settings.pipeline_config();

        assert_eq!(config.credentials.api_key(), Some("sk-test"));
        assert_eq!(config.credentials.region, Region::Singapore);
        assert_eq!(config.generation.temperature, 0.1);
        assert_eq!(config.generation.max_tokens, 4000);
        assert_eq!(config.cost_model, TokenCostModel::default());
    }

    #[test]
    fn test_directories_default_under_data_dir() {
        let settings = AnnotatorSettings::default();
        let data = Path::new("/data/clipscribe");
        assert_eq!(settings.outputs_dir_in(data), data.join("outputs"));
        assert_eq!(settings.prompts_dir_in(data), data.join("prompts"));

        let custom = AnnotatorSettings {
            outputs_dir: Some(PathBuf::from("/tmp/out")),
            ..Default::default()
        };
        assert_eq!(custom.outputs_dir_in(data), PathBuf::from("/tmp/out"));
    }

    #[test]
    fn test_settings_serialization_is_camel_case() {
        let json = serde_json::to_string(&AnnotatorSettings::default()).unwrap();
        assert!(json.contains("\"maxTokens\""));
        assert!(json.contains("\"requestTimeoutSecs\""));
        assert!(json.contains("\"costModel\""));
    }

    // ------------------------------------------------------------
    // SettingsManager
    // ------------------------------------------------------------

    #[test]
    fn test_load_nonexistent_returns_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let manager = SettingsManager::new(temp_dir.path().to_path_buf());
        assert_eq!(manager.load(), AnnotatorSettings::default());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let manager = SettingsManager::new(temp_dir.path().to_path_buf());

        let settings = AnnotatorSettings {
            api_key: Some("sk-test".to_string()),
            model: "qwen3-vl-plus".to_string(),
            fps: 2.0,
            ..Default::default()
        };
        let saved = manager.save(&settings).unwrap();
        let loaded = manager.load();

        assert_eq!(saved, loaded);
        assert_eq!(loaded.model, "qwen3-vl-plus");
        assert_eq!(loaded.fps, 2.0);
        assert!(!manager.settings_path().with_extension("json.tmp").exists());
    }

    #[test]
    fn test_invalid_json_returns_defaults() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join(SETTINGS_FILE), "invalid json {{{").unwrap();

        let manager = SettingsManager::new(temp_dir.path().to_path_buf());
        assert_eq!(manager.load(), AnnotatorSettings::default());
    }

    #[test]
    fn test_partial_json_uses_defaults_for_missing() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join(SETTINGS_FILE),
            r#"{"version": 1, "region": "singapore", "costModel": {"hardCeiling": 20000}}"#,
        )
        .unwrap();

        let manager = SettingsManager::new(temp_dir.path().to_path_buf());
        let settings = manager.load();

        assert_eq!(settings.region, Region::Singapore);
        assert_eq!(settings.max_tokens, 4000);
        assert_eq!(settings.cost_model.hard_ceiling, 20000);
        assert_eq!(settings.cost_model.patch_size, 32);
        // Recommended limit cannot exceed the ceiling
        assert_eq!(settings.cost_model.recommended_limit, 16384);
    }

    #[test]
    fn test_explicit_settings_path() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("conf").join("annotator.json");
        let manager = SettingsManager::with_path(path.clone());

        manager.save(&AnnotatorSettings::default()).unwrap();
        assert!(path.exists());
        assert_eq!(manager.data_dir(), temp_dir.path().join("conf"));
        assert!(temp_dir.path().join("conf").join("annotator.json.lock").exists());
    }

    #[test]
    fn test_reset_deletes_file() {
        let temp_dir = TempDir::new().unwrap();
        let manager = SettingsManager::new(temp_dir.path().to_path_buf());

        manager.save(&AnnotatorSettings::default()).unwrap();
        assert!(manager.settings_path().exists());

        let reset = manager.reset().unwrap();
        assert!(!manager.settings_path().exists());
        assert_eq!(reset, AnnotatorSettings::default());
    }

    #[test]
    fn test_concurrent_read_write() {
        use std::sync::Arc;
        use std::thread;

        let temp_dir = TempDir::new().unwrap();
        let manager = Arc::new(SettingsManager::new(temp_dir.path().to_path_buf()));
        manager.save(&AnnotatorSettings::default()).unwrap();

        let mut handles = vec![];
        for _ in 0..4 {
            let manager = Arc::clone(&manager);
            handles.push(thread::spawn(move || {
                for _ in 0..10 {
                    let _ = manager.load();
                }
            }));
        }
        for i in 0..3 {
            let manager = Arc::clone(&manager);
            handles.push(thread::spawn(move || {
                for j in 0..5 {
                    let settings = AnnotatorSettings {
                        max_tokens: 1000 + (i * 100 + j) as u32,
                        ..Default::default()
                    };
                    let _ = manager.save(&settings);
                }
            }));
        }
        for handle in handles {
            handle.join().expect("Thread should not panic");
        }

        let final_settings = manager.load();
        assert!(final_settings.max_tokens >= 1000);
    }
}
