//! Parameter Validation
//!
//! Hard limits block submission; soft limits only produce warnings.
//! The annotation pipeline calls this before any remote request.

use serde::{Deserialize, Serialize};

use super::model::{TokenCostModel, TokenEstimate, TokenStatus};
use crate::core::{Resolution, TimeSec};

/// Lowest accepted sampling rate
pub const MIN_FPS: f64 = 0.5;

/// Highest accepted sampling rate
pub const MAX_FPS: f64 = 8.0;

/// Smallest accepted frame side
pub const MIN_DIMENSION: u32 = 224;

/// Frame sides above this only warn
pub const RECOMMENDED_MAX_DIMENSION: u32 = 640;

/// Outcome of validating a parameter set
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterValidation {
    /// False when any hard limit is violated
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// Estimate the verdict was based on
    pub estimate: TokenEstimate,
}

impl TokenCostModel {
    /// Checks `(fps, resolution, duration)` against hard and soft limits
    pub fn validate(
        &self,
        fps: f64,
        resolution: Resolution,
        duration: TimeSec,
    ) -> ParameterValidation {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if !fps.is_finite() {
            errors.push("FPS must be a finite number".to_string());
        } else if fps < MIN_FPS {
            errors.push(format!("FPS {} is below the minimum of {}", fps, MIN_FPS));
        } else if fps > MAX_FPS {
            errors.push(format!("FPS {} exceeds the maximum of {}", fps, MAX_FPS));
        }

        if !duration.is_finite() || duration < 0.0 {
            errors.push(format!("Duration {} must be a non-negative number of seconds", duration));
        }

        if resolution.height < MIN_DIMENSION || resolution.width < MIN_DIMENSION {
            errors.push(format!(
                "Resolution {} is below the minimum of {} pixels per side",
                resolution, MIN_DIMENSION
            ));
        }

        let estimate = self.estimate(duration, fps, resolution);
        if estimate.total_tokens > self.hard_ceiling {
            errors.push(format!(
                "Estimated {} tokens exceed the hard limit of {}",
                estimate.total_tokens, self.hard_ceiling
            ));
        }

        if resolution.height > RECOMMENDED_MAX_DIMENSION
            || resolution.width > RECOMMENDED_MAX_DIMENSION
        {
            warnings.push(format!(
                "Resolution {} exceeds {} pixels per side; token cost grows quadratically",
                resolution, RECOMMENDED_MAX_DIMENSION
            ));
        }

        match estimate.status {
            TokenStatus::Optimal => {}
            TokenStatus::NearLimit => warnings.push(format!(
                "Estimated {} tokens is approaching the limit (above {})",
                estimate.total_tokens, self.near_limit
            )),
            TokenStatus::OverRecommended => warnings.push(format!(
                "Estimated {} tokens exceeds the recommended {}",
                estimate.total_tokens, self.recommended_limit
            )),
            TokenStatus::OverHard => warnings.push(format!(
                "Estimated {} tokens will be refused by the provider",
                estimate.total_tokens
            )),
        }

        ParameterValidation {
            is_valid: errors.is_empty(),
            errors,
            warnings,
            estimate,
        }
    }
}

/// Validates with the default cost model
pub fn validate(fps: f64, resolution: Resolution, duration: TimeSec) -> ParameterValidation {
    TokenCostModel::default().validate(fps, resolution, duration)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_fps_bounds() {
        let res = Resolution::square(448);

        let low = validate(0.4, res, 10.0);
        assert!(!low.is_valid);
        assert!(low.errors[0].contains("below the minimum"));

        assert!(validate(0.5, res, 10.0).is_valid);
        assert!(validate(8.0, res, 1.0).is_valid);

        let high = validate(8.5, res, 1.0);
        assert!(!high.is_valid);
        assert!(high.errors[0].contains("exceeds the maximum"));
    }

    #[test]
    fn test_validate_rejects_nan_fps() {
        let result = validate(f64::NAN, Resolution::square(448), 10.0);
        assert!(!result.is_valid);
    }

    #[test]
    fn test_validate_rejects_negative_or_nan_duration() {
        let res = Resolution::square(448);
        for duration in [-1.0, f64::NAN, f64::INFINITY] {
            let result = validate(1.0, res, duration);
            assert!(!result.is_valid, "{duration}");
            assert!(result.errors[0].contains("non-negative"));
        }
        assert!(validate(1.0, res, 0.0).is_valid);
    }

    #[test]
    fn test_validate_rejects_resolution_at_u32_limit() {
        let result = validate(1.0, Resolution::square(u32::MAX), 60.0);
        assert!(!result.is_valid);
        assert_eq!(result.estimate.status, TokenStatus::OverHard);
        assert!(result.estimate.tokens_per_frame > 0);
        assert!(result.errors.iter().any(|e| e.contains("hard limit")));
    }

    #[test]
    fn test_validate_rejects_small_resolution() {
        let result = validate(1.0, Resolution::square(200), 10.0);
        assert!(!result.is_valid);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("224"));

        assert!(!validate(1.0, Resolution::new(224, 223), 10.0).is_valid);
        assert!(validate(1.0, Resolution::new(224, 224), 10.0).is_valid);
    }

    #[test]
    fn test_validate_rejects_hard_ceiling() {
        let result = validate(8.0, Resolution::square(640), 600.0);
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains("hard limit")));
        assert_eq!(result.estimate.status, TokenStatus::OverHard);
    }

    #[test]
    fn test_validate_120s_8fps_640_is_invalid() {
        let result = validate(8.0, Resolution::square(640), 120.0);
        assert!(!result.is_valid);
        assert_eq!(result.estimate.total_tokens, 384_300);
        assert_eq!(result.errors.len(), 1);
    }

    #[test]
    fn test_validate_optimal_has_no_warnings() {
        let result = validate(2.0, Resolution::square(280), 30.0);
        assert!(result.is_valid);
        assert!(result.errors.is_empty());
        assert!(result.warnings.is_empty());
        assert_eq!(result.estimate.total_tokens, 5160);
    }

    #[test]
    fn test_validate_status_warnings_do_not_block() {
        // 60s @ 2fps @ 448: 120 * 196 + 300 = 23820 (over recommended)
        let result = validate(2.0, Resolution::square(448), 60.0);
        assert!(result.is_valid);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("recommended"));

        // 30s @ 2fps @ 448: 60 * 196 + 300 = 12060 (near limit)
        let result = validate(2.0, Resolution::square(448), 30.0);
        assert!(result.is_valid);
        assert!(result.warnings[0].contains("approaching"));
    }

    #[test]
    fn test_validate_large_resolution_warns() {
        let result = validate(0.5, Resolution::new(720, 1280), 4.0);
        assert!(result.is_valid);
        assert!(result.warnings.iter().any(|w| w.contains("640")));
    }
}
