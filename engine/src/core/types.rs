//! ClipScribe Core Type Definitions
//!
//! Defines fundamental types shared by the cost engine and the pipeline.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// =============================================================================
// ID Types
// =============================================================================

/// Annotation attempt unique identifier (ULID)
pub type AttemptId = String;

// =============================================================================
// Time Types
// =============================================================================

/// Time in seconds (floating point)
pub type TimeSec = f64;

// =============================================================================
// Resolution
// =============================================================================

/// Frame resolution in pixels
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    /// Frame height
    pub height: u32,
    /// Frame width
    pub width: u32,
}

impl Resolution {
    /// Creates a new resolution
    pub const fn new(height: u32, width: u32) -> Self {
        Self { height, width }
    }

    /// Creates a square resolution
    pub const fn square(side: u32) -> Self {
        Self {
            height: side,
            width: side,
        }
    }

    /// Rounds both dimensions up to the nearest multiple of `patch`
    ///
    /// Sides that would not fit in `u32` saturate at `u32::MAX`.
    pub fn aligned(&self, patch: u32) -> Self {
        let clamp = |side: u64| u32::try_from(side).unwrap_or(u32::MAX);
        Self {
            height: clamp(align_side(self.height, patch)),
            width: clamp(align_side(self.width, patch)),
        }
    }

    /// Pixel count after patch alignment, computed without overflow
    pub fn aligned_pixels(&self, patch: u32) -> u64 {
        align_side(self.height, patch).saturating_mul(align_side(self.width, patch))
    }

    /// Total pixel count
    pub fn pixels(&self) -> u64 {
        self.height as u64 * self.width as u64
    }
}

fn align_side(side: u32, patch: u32) -> u64 {
    if patch == 0 {
        return side as u64;
    }
    let patch = patch as u64;
    (side as u64).div_ceil(patch) * patch
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.height, self.width)
    }
}

impl FromStr for Resolution {
    type Err = String;

    /// Parses `HxW` (e.g. `448x448`) or a single side (`448`)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let parse_dim = |part: &str| -> Result<u32, String> {
            let value = part
                .trim()
                .parse::<u32>()
                .map_err(|_| format!("Invalid resolution component: '{}'", part))?;
            if value == 0 {
                return Err("Resolution components must be positive".to_string());
            }
            Ok(value)
        };

        match trimmed.split_once(['x', 'X']) {
            Some((h, w)) => Ok(Self::new(parse_dim(h)?, parse_dim(w)?)),
            None => Ok(Self::square(parse_dim(trimmed)?)),
        }
    }
}
