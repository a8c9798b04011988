//! Bitrate controller configuration

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Tuning knobs for the per-receiver bitrate controller.
///
/// Read once at construction time and passed in explicitly; hot paths never
/// consult process-wide state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BitrateConfig {
    /// Minimum relative change (percent) of the last reacted-to bandwidth
    /// estimate that triggers a new allocation
    pub bwe_change_threshold_pct: i64,
    /// Max height (pixels) of the candidate layers of a thumbnail source
    pub thumbnail_max_height: i32,
    /// Height threshold (pixels) defining the preferred layer of the
    /// on-stage source
    pub onstage_preferred_height: i32,
    /// Min frame rate (fps) admitted for on-stage layers above the preferred
    /// height
    pub onstage_preferred_frame_rate: f64,
    /// Whether the downlink bandwidth estimate is used at all; when false the
    /// effective cap is unbounded
    pub trust_bwe: bool,
}

impl Default for BitrateConfig {
    fn default() -> Self {
        Self {
            bwe_change_threshold_pct: 15,
            thumbnail_max_height: 180,
            onstage_preferred_height: 360,
            onstage_preferred_frame_rate: 30.0,
            trust_bwe: false,
        }
    }
}

impl BitrateConfig {
    pub fn validate(&self) -> Result<()> {
        if self.bwe_change_threshold_pct < 0 {
            return Err(Error::InvalidConfig(format!(
                "bwe_change_threshold_pct must be non-negative, got {}",
                self.bwe_change_threshold_pct
            )));
        }
        if self.thumbnail_max_height <= 0 {
            return Err(Error::InvalidConfig(format!(
                "thumbnail_max_height must be positive, got {}",
                self.thumbnail_max_height
            )));
        }
        if self.onstage_preferred_height <= 0 {
            return Err(Error::InvalidConfig(format!(
                "onstage_preferred_height must be positive, got {}",
                self.onstage_preferred_height
            )));
        }
        if !self.onstage_preferred_frame_rate.is_finite() || self.onstage_preferred_frame_rate <= 0.0
        {
            return Err(Error::InvalidConfig(format!(
                "onstage_preferred_frame_rate must be a positive finite value, got {}",
                self.onstage_preferred_frame_rate
            )));
        }
        Ok(())
    }
}
