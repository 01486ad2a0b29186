//! Token Cost Model
//!
//! Computes the token cost of a video request from its duration, sampling
//! rate and frame resolution. The remote visual tokenizer works on 32x32
//! patches, so every frame dimension is rounded up to a patch multiple
//! before the per-frame cost is derived.

use serde::{Deserialize, Serialize};

use crate::core::{Resolution, TimeSec};

// =============================================================================
// Constants
// =============================================================================

/// Tokenizer patch edge in pixels
pub const DEFAULT_PATCH_SIZE: u32 = 32;

/// Pixels folded into one visual token (32 x 32)
pub const DEFAULT_TOKENS_DIVISOR: u32 = 1024;

/// Fixed allowance for prompt and instruction tokens
pub const DEFAULT_PROMPT_ALLOWANCE: u64 = 300;

/// Provider's absolute ceiling; requests above it are refused
pub const DEFAULT_HARD_CEILING: u64 = 32_768;

/// Upper bound of the recommended range
pub const DEFAULT_RECOMMENDED_LIMIT: u64 = 16_384;

/// Above this the request is flagged as near the limit
pub const DEFAULT_NEAR_LIMIT: u64 = 8_192;

// =============================================================================
// Encoding Parameters
// =============================================================================

/// How frame dimensions are communicated to the remote model
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SizeMode {
    /// Height/width are sent as-is
    #[default]
    FixedDimensions,
    /// The model picks dimensions inside a pixel budget (long videos)
    #[serde(rename_all = "camelCase")]
    PixelBudget {
        min_pixels: u32,
        max_pixels: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total_pixels: Option<u32>,
    },
}

/// Encoding parameters for one request
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodingParameters {
    /// Frames sampled per second of video
    pub fps: f64,
    /// Frame resolution used for cost estimation (and sent in fixed mode)
    pub resolution: Resolution,
    /// Size mode
    #[serde(default)]
    pub mode: SizeMode,
}

impl EncodingParameters {
    /// Creates fixed-dimension parameters
    pub fn fixed(fps: f64, resolution: Resolution) -> Self {
        Self {
            fps,
            resolution,
            mode: SizeMode::FixedDimensions,
        }
    }

    /// Creates pixel-budget parameters
    pub fn pixel_budget(
        fps: f64,
        resolution: Resolution,
        min_pixels: u32,
        max_pixels: u32,
        total_pixels: Option<u32>,
    ) -> Self {
        Self {
            fps,
            resolution,
            mode: SizeMode::PixelBudget {
                min_pixels,
                max_pixels,
                total_pixels,
            },
        }
    }

    /// Estimates the token cost of these parameters for a video
    pub fn estimate(&self, model: &TokenCostModel, duration: TimeSec) -> TokenEstimate {
        model.estimate(duration, self.fps, self.resolution)
    }
}

// =============================================================================
// Token Estimate
// =============================================================================

/// Budget status of an estimate
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TokenStatus {
    Optimal,
    NearLimit,
    OverRecommended,
    /// Must not be sent
    OverHard,
}

impl TokenStatus {
    /// Optimal or near the limit
    pub fn is_recommended(&self) -> bool {
        matches!(self, TokenStatus::Optimal | TokenStatus::NearLimit)
    }

    /// Anything the provider will accept
    pub fn is_sendable(&self) -> bool {
        !matches!(self, TokenStatus::OverHard)
    }

    /// Human-readable label
    pub fn label(&self) -> &'static str {
        match self {
            TokenStatus::Optimal => "optimal",
            TokenStatus::NearLimit => "near limit",
            TokenStatus::OverRecommended => "over recommended",
            TokenStatus::OverHard => "over hard limit",
        }
    }
}

/// Token cost of a request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenEstimate {
    pub frame_count: u64,
    pub tokens_per_frame: u64,
    /// Visual tokens plus the prompt allowance
    pub total_tokens: u64,
    pub status: TokenStatus,
}

// =============================================================================
// Token Cost Model
// =============================================================================

/// Provider-specific cost constants
///
/// These drift with model versions, so they are configuration rather than
/// hard-coded law. Defaults match Qwen-VL on DashScope.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TokenCostModel {
    pub patch_size: u32,
    pub tokens_divisor: u32,
    pub prompt_allowance: u64,
    pub hard_ceiling: u64,
    pub recommended_limit: u64,
    pub near_limit: u64,
}

impl Default for TokenCostModel {
    fn default() -> Self {
        Self {
            patch_size: DEFAULT_PATCH_SIZE,
            tokens_divisor: DEFAULT_TOKENS_DIVISOR,
            prompt_allowance: DEFAULT_PROMPT_ALLOWANCE,
            hard_ceiling: DEFAULT_HARD_CEILING,
            recommended_limit: DEFAULT_RECOMMENDED_LIMIT,
            near_limit: DEFAULT_NEAR_LIMIT,
        }
    }
}

impl TokenCostModel {
    /// Computes the token estimate for `(duration, fps, resolution)`
    ///
    /// Preconditions: `duration >= 0`, `fps > 0`, both dimensions positive.
    /// Out-of-range products yield zero frames instead of an error.
    pub fn estimate(&self, duration: TimeSec, fps: f64, resolution: Resolution) -> TokenEstimate {
        let frame_count = frame_count(duration, fps);
        let tokens_per_frame = self.tokens_per_frame(resolution);
        let total_tokens = frame_count
            .saturating_mul(tokens_per_frame)
            .saturating_add(self.prompt_allowance);

        TokenEstimate {
            frame_count,
            tokens_per_frame,
            total_tokens,
            status: self.status_for(total_tokens),
        }
    }

    /// Visual tokens produced by one frame at `resolution`
    pub fn tokens_per_frame(&self, resolution: Resolution) -> u64 {
        resolution
            .aligned_pixels(self.patch_size)
            .div_ceil(self.tokens_divisor.max(1) as u64)
    }

    /// Classifies a total token count against the thresholds
    pub fn status_for(&self, total_tokens: u64) -> TokenStatus {
        if total_tokens > self.hard_ceiling {
            TokenStatus::OverHard
        } else if total_tokens > self.recommended_limit {
            TokenStatus::OverRecommended
        } else if total_tokens > self.near_limit {
            TokenStatus::NearLimit
        } else {
            TokenStatus::Optimal
        }
    }

    /// Repairs nonsensical values loaded from configuration
    pub fn normalize(&mut self) {
        let defaults = Self::default();
        if self.patch_size == 0 {
            self.patch_size = defaults.patch_size;
        }
        if self.tokens_divisor == 0 {
            self.tokens_divisor = defaults.tokens_divisor;
        }
        if self.hard_ceiling == 0 {
            self.hard_ceiling = defaults.hard_ceiling;
        }
        self.recommended_limit = self.recommended_limit.min(self.hard_ceiling);
        self.near_limit = self.near_limit.min(self.recommended_limit);
    }
}

fn frame_count(duration: TimeSec, fps: f64) -> u64 {
    let frames = (duration * fps).floor();
    if frames.is_finite() && frames > 0.0 {
        frames as u64
    } else {
        0
    }
}

/// Estimates token cost with the default cost model
pub fn estimate(duration: TimeSec, fps: f64, resolution: Resolution) -> TokenEstimate {
    TokenCostModel::default().estimate(duration, fps, resolution)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const FPS_LADDER: [f64; 11] = [0.5, 1.0, 1.5, 2.0, 2.5, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];

    fn aligned_sides() -> impl Iterator<Item = u32> {
        (224..=640).step_by(32)
    }

    // -------------------------------------------------------------------------
    // Concrete Scenarios
    // -------------------------------------------------------------------------

    #[test]
    fn test_estimate_30s_2fps_280() {
        let est = estimate(30.0, 2.0, Resolution::square(280));

        assert_eq!(est.frame_count, 60);
        assert_eq!(est.tokens_per_frame, 81); // 288*288/1024
        assert_eq!(est.total_tokens, 5160);
        assert_eq!(est.status, TokenStatus::Optimal);
    }

    #[test]
    fn test_estimate_120s_8fps_640() {
        let est = estimate(120.0, 8.0, Resolution::square(640));

        assert_eq!(est.frame_count, 960);
        assert_eq!(est.tokens_per_frame, 400);
        assert_eq!(est.total_tokens, 384_300);
        assert_eq!(est.status, TokenStatus::OverHard);
    }

    #[test]
    fn test_estimate_floors_frame_count() {
        let est = estimate(10.9, 1.0, Resolution::square(224));
        assert_eq!(est.frame_count, 10);
    }

    #[test]
    fn test_estimate_zero_duration_is_prompt_only() {
        let est = estimate(0.0, 2.0, Resolution::square(448));
        assert_eq!(est.frame_count, 0);
        assert_eq!(est.total_tokens, DEFAULT_PROMPT_ALLOWANCE);
        assert_eq!(est.status, TokenStatus::Optimal);
    }

    #[test]
    fn test_estimate_negative_inputs_clamp_to_zero_frames() {
        let est = estimate(-5.0, 2.0, Resolution::square(448));
        assert_eq!(est.frame_count, 0);
    }

    // -------------------------------------------------------------------------
    // Status Thresholds
    // -------------------------------------------------------------------------

    #[test]
    fn test_status_thresholds_are_strict() {
        let model = TokenCostModel::default();
        assert_eq!(model.status_for(8192), TokenStatus::Optimal);
        assert_eq!(model.status_for(8193), TokenStatus::NearLimit);
        assert_eq!(model.status_for(16_384), TokenStatus::NearLimit);
        assert_eq!(model.status_for(16_385), TokenStatus::OverRecommended);
        assert_eq!(model.status_for(32_768), TokenStatus::OverRecommended);
        assert_eq!(model.status_for(32_769), TokenStatus::OverHard);
    }

    #[test]
    fn test_status_predicates() {
        assert!(TokenStatus::Optimal.is_recommended());
        assert!(TokenStatus::NearLimit.is_recommended());
        assert!(!TokenStatus::OverRecommended.is_recommended());
        assert!(TokenStatus::OverRecommended.is_sendable());
        assert!(!TokenStatus::OverHard.is_sendable());
    }

    // -------------------------------------------------------------------------
    // Properties
    // -------------------------------------------------------------------------

    #[test]
    fn test_total_tokens_monotonic_in_fps() {
        for duration in [0.0, 1.0, 7.5, 30.0, 95.0] {
            for side in aligned_sides() {
                let res = Resolution::square(side);
                let totals: Vec<u64> = FPS_LADDER
                    .iter()
                    .map(|&fps| estimate(duration, fps, res).total_tokens)
                    .collect();
                assert!(totals.windows(2).all(|w| w[0] <= w[1]), "{duration}s {res}");
            }
        }
    }

    #[test]
    fn test_total_tokens_monotonic_in_height_and_width() {
        for duration in [0.0, 3.0, 30.0, 300.0] {
            for fps in FPS_LADDER {
                for fixed in aligned_sides() {
                    let by_height: Vec<u64> = aligned_sides()
                        .map(|h| estimate(duration, fps, Resolution::new(h, fixed)).total_tokens)
                        .collect();
                    let by_width: Vec<u64> = aligned_sides()
                        .map(|w| estimate(duration, fps, Resolution::new(fixed, w)).total_tokens)
                        .collect();
                    assert!(by_height.windows(2).all(|w| w[0] <= w[1]));
                    assert!(by_width.windows(2).all(|w| w[0] <= w[1]));
                }
            }
        }
    }

    #[test]
    fn test_rounding_idempotence() {
        let model = TokenCostModel::default();
        for h in [1, 31, 32, 33, 224, 250, 280, 640, 641] {
            for w in [1, 64, 100, 300, 639] {
                let once = Resolution::new(h, w).aligned(32);
                let twice = once.aligned(32);
                assert_eq!(once, twice);
                assert_eq!(model.tokens_per_frame(once), model.tokens_per_frame(twice));
                assert_eq!(
                    model.tokens_per_frame(Resolution::new(h, w)),
                    model.tokens_per_frame(once)
                );
            }
        }
    }

    // -------------------------------------------------------------------------
    // Configuration
    // -------------------------------------------------------------------------

    #[test]
    fn test_custom_model_changes_allowance() {
        let model = TokenCostModel {
            prompt_allowance: 0,
            ..TokenCostModel::default()
        };
        let est = model.estimate(30.0, 2.0, Resolution::square(280));
        assert_eq!(est.total_tokens, 4860);
    }

    #[test]
    fn test_normalize_repairs_zero_and_ordering() {
        let mut model = TokenCostModel {
            patch_size: 0,
            tokens_divisor: 0,
            prompt_allowance: 300,
            hard_ceiling: 10_000,
            recommended_limit: 20_000,
            near_limit: 30_000,
        };
        model.normalize();
        assert_eq!(model.patch_size, DEFAULT_PATCH_SIZE);
        assert_eq!(model.tokens_divisor, DEFAULT_TOKENS_DIVISOR);
        assert_eq!(model.recommended_limit, 10_000);
        assert_eq!(model.near_limit, 10_000);
    }

    #[test]
    fn test_cost_model_deserializes_partial_config() {
        let model: TokenCostModel = serde_json::from_str(r#"{"promptAllowance":500}"#).unwrap();
        assert_eq!(model.prompt_allowance, 500);
        assert_eq!(model.hard_ceiling, DEFAULT_HARD_CEILING);
    }

    #[test]
    fn test_size_mode_serialization() {
        let params =
            EncodingParameters::pixel_budget(1.0, Resolution::square(448), 3136, 401_408, None);
        let json = serde_json::to_string(&params).unwrap();
        assert!(json.contains("\"type\":\"pixelBudget\""));
        assert!(json.contains("\"minPixels\":3136"));
        assert!(!json.contains("totalPixels"));

        let parsed: EncodingParameters = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, params);
    }
}
