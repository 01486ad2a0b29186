//! Prompt Library
//!
//! Loads the annotation task text sent alongside the video.

use std::path::{Path, PathBuf};

use crate::core::{CoreError, CoreResult};

/// File looked up in the prompts directory when no prompt is given
pub const DEFAULT_PROMPT_FILE: &str = "pov_annotation_prompt.txt";

/// Used when the default prompt file does not exist
pub const BUILTIN_PROMPT: &str =
    "Analyze this video and describe the actions that take place in it.";

/// Resolves prompts from files
pub struct PromptLibrary {
    prompts_dir: PathBuf,
}

impl PromptLibrary {
    pub fn new(prompts_dir: impl Into<PathBuf>) -> Self {
        Self {
            prompts_dir: prompts_dir.into(),
        }
    }

    pub fn default_prompt_path(&self) -> PathBuf {
        self.prompts_dir.join(DEFAULT_PROMPT_FILE)
    }

    /// Loads `explicit` if given, otherwise the default prompt
    ///
    /// A missing explicit file is an error. A missing default file falls
    /// back to the built-in prompt.
    pub fn load(&self, explicit: Option<&Path>) -> CoreResult<String> {
        match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(CoreError::FileNotFound(path.display().to_string()));
                }
                read_prompt(path)
            }
            None => {
                let path = self.default_prompt_path();
                if !path.exists() {
                    tracing::warn!(
                        "Prompt file not found: {}; using built-in prompt",
                        path.display()
                    );
                    return Ok(BUILTIN_PROMPT.to_string());
                }
                read_prompt(&path)
            }
        }
    }
}

fn read_prompt(path: &Path) -> CoreResult<String> {
    let content = std::fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Err(CoreError::ValidationError(format!(
            "Prompt file is empty: {}",
            path.display()
        )));
    }
    tracing::info!(
        "Prompt loaded from {} ({} characters)",
        path.display(),
        content.chars().count()
    );
    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_default_uses_builtin() {
        let dir = TempDir::new().unwrap();
        let library = PromptLibrary::new(dir.path());
        assert_eq!(library.load(None).unwrap(), BUILTIN_PROMPT);
    }

    #[test]
    fn test_default_file_is_read() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(DEFAULT_PROMPT_FILE), "List every hand action.").unwrap();

        let library = PromptLibrary::new(dir.path());
        assert_eq!(library.load(None).unwrap(), "List every hand action.");
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let dir = TempDir::new().unwrap();
        let library = PromptLibrary::new(dir.path());

        let err = library.load(Some(&dir.path().join("custom.txt"))).unwrap_err();
        assert!(matches!(err, CoreError::FileNotFound(_)));
    }

    #[test]
    fn test_empty_prompt_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blank.txt");
        std::fs::write(&path, "  \n").unwrap();

        let library = PromptLibrary::new(dir.path());
        assert!(library.load(Some(&path)).is_err());
    }
}
