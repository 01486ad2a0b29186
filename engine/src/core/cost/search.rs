//! Parameter Search
//!
//! Exhaustive grid search over a fixed ladder of square resolutions and frame
//! rates. The grid is small (154 points) so every call evaluates all of it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::model::{EncodingParameters, TokenCostModel, TokenEstimate};
use crate::core::{Resolution, TimeSec};

// =============================================================================
// Candidate Space
// =============================================================================

/// Frame rates tried by the search, ascending
pub const FPS_CANDIDATES: [f64; 11] = [0.5, 1.0, 1.5, 2.0, 2.5, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];

/// Smallest square side tried by the search
pub const MIN_SEARCH_SIDE: u32 = 224;

/// Largest square side tried by the search
pub const MAX_SEARCH_SIDE: u32 = 640;

/// Side increment between candidates
pub const SEARCH_SIDE_STEP: u32 = 32;

/// Returned when no candidate fits
pub const FALLBACK_FPS: f64 = 1.0;

/// Returned when no candidate fits
pub const FALLBACK_RESOLUTION: Resolution = Resolution::square(224);

/// Square resolutions tried by the search, ascending
pub fn resolution_candidates() -> impl Iterator<Item = Resolution> {
    (MIN_SEARCH_SIDE..=MAX_SEARCH_SIDE)
        .step_by(SEARCH_SIDE_STEP as usize)
        .map(Resolution::square)
}

// =============================================================================
// Result Types
// =============================================================================

/// Which acceptance tier produced a search result
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SearchTier {
    /// Best-scoring candidate with an optimal or near-limit status
    Recommended,
    /// Cheapest candidate at or below the target
    WithinTarget,
    /// Fixed fallback, regardless of its estimate
    Fallback,
}

/// Output of a parameter search
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationResult {
    pub parameters: EncodingParameters,
    pub estimate: TokenEstimate,
    pub tier: SearchTier,
}

#[derive(Clone, Copy)]
struct Candidate {
    fps: f64,
    resolution: Resolution,
    estimate: TokenEstimate,
}

impl Candidate {
    fn into_result(self, tier: SearchTier) -> OptimizationResult {
        OptimizationResult {
            parameters: EncodingParameters::fixed(self.fps, self.resolution),
            estimate: self.estimate,
            tier,
        }
    }
}

// =============================================================================
// Search
// =============================================================================

impl TokenCostModel {
    /// Finds encoding parameters whose cost lands near `target_tokens`
    ///
    /// Never fails: when nothing fits, the fixed `1.0 fps @ 224x224` fallback
    /// is returned with its (possibly over-limit) estimate.
    pub fn search(
        &self,
        duration: TimeSec,
        target_tokens: u64,
        prefer_quality: bool,
    ) -> OptimizationResult {
        let mut best_recommended: Option<(f64, Candidate)> = None;
        let mut cheapest_within_target: Option<Candidate> = None;

        for resolution in resolution_candidates() {
            for fps in FPS_CANDIDATES {
                let estimate = self.estimate(duration, fps, resolution);
                if estimate.total_tokens > self.hard_ceiling {
                    continue;
                }
                let candidate = Candidate {
                    fps,
                    resolution,
                    estimate,
                };

                if estimate.status.is_recommended() {
                    let score = score(&candidate, target_tokens, prefer_quality);
                    // Strict comparison keeps the first minimum in enumeration order.
                    if best_recommended.is_none_or(|(best, _)| score < best) {
                        best_recommended = Some((score, candidate));
                    }
                }

                if estimate.total_tokens <= target_tokens
                    && cheapest_within_target
                        .is_none_or(|c| estimate.total_tokens < c.estimate.total_tokens)
                {
                    cheapest_within_target = Some(candidate);
                }
            }
        }

        if let Some((_, candidate)) = best_recommended {
            return candidate.into_result(SearchTier::Recommended);
        }
        if let Some(candidate) = cheapest_within_target {
            return candidate.into_result(SearchTier::WithinTarget);
        }

        Candidate {
            fps: FALLBACK_FPS,
            resolution: FALLBACK_RESOLUTION,
            estimate: self.estimate(duration, FALLBACK_FPS, FALLBACK_RESOLUTION),
        }
        .into_result(SearchTier::Fallback)
    }

    /// Runs the three canned searches behind the preset buttons
    pub fn recommended_presets(&self, duration: TimeSec) -> RecommendedPresets {
        let run = |preset: Preset| self.search(duration, preset.target_tokens(), preset.prefer_quality());
        RecommendedPresets {
            speed: run(Preset::Speed),
            balanced: run(Preset::Balanced),
            quality: run(Preset::Quality),
        }
    }
}

fn score(candidate: &Candidate, target_tokens: u64, prefer_quality: bool) -> f64 {
    let volume = candidate.resolution.pixels() as f64 * candidate.fps;
    let quality_term = if prefer_quality {
        1.0 / volume
    } else {
        volume / 1_000_000.0
    };
    let distance = (candidate.estimate.total_tokens as f64 - target_tokens as f64).abs();
    distance + quality_term * 1000.0
}

/// Searches with the default cost model
pub fn search(duration: TimeSec, target_tokens: u64, prefer_quality: bool) -> OptimizationResult {
    TokenCostModel::default().search(duration, target_tokens, prefer_quality)
}

/// Preset searches with the default cost model
pub fn recommended_presets(duration: TimeSec) -> RecommendedPresets {
    TokenCostModel::default().recommended_presets(duration)
}

// =============================================================================
// Presets
// =============================================================================

/// Canned search profiles
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    Speed,
    Balanced,
    Quality,
}

impl Preset {
    pub const ALL: [Preset; 3] = [Preset::Speed, Preset::Balanced, Preset::Quality];

    /// Target token budget for the preset
    pub fn target_tokens(&self) -> u64 {
        match self {
            Preset::Speed => 4000,
            Preset::Balanced => 8000,
            Preset::Quality => 12000,
        }
    }

    pub fn prefer_quality(&self) -> bool {
        matches!(self, Preset::Quality)
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Preset::Speed => write!(f, "speed"),
            Preset::Balanced => write!(f, "balanced"),
            Preset::Quality => write!(f, "quality"),
        }
    }
}

impl FromStr for Preset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "speed" | "fast" => Ok(Preset::Speed),
            "balanced" => Ok(Preset::Balanced),
            "quality" => Ok(Preset::Quality),
            _ => Err(format!("Unknown preset: {}", s)),
        }
    }
}

/// Results of the three preset searches
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendedPresets {
    pub speed: OptimizationResult,
    pub balanced: OptimizationResult,
    pub quality: OptimizationResult,
}

impl RecommendedPresets {
    pub fn get(&self, preset: Preset) -> &OptimizationResult {
        match preset {
            Preset::Speed => &self.speed,
            Preset::Balanced => &self.balanced,
            Preset::Quality => &self.quality,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
