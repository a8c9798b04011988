//! Per-source bitrate allocation state
//!
//! A [`SourceAllocation`] is the allocator's working record for one video
//! track of one endpoint: the ranked candidate layers that survived the
//! destination's viewport and policy filters, and the candidate currently
//! chosen for forwarding.

use crate::config::BitrateConfig;
use crate::track::{EncodingLayer, SourceTrack};
use crate::traits::Endpoint;
use crate::types::EndpointId;
use std::sync::Arc;

/// Bitrate of one candidate layer, sampled once per allocation cycle so the
/// whole cycle reasons about a consistent set of numbers.
#[derive(Debug, Clone)]
pub struct RateSnapshot {
    pub bps: u64,
    pub layer: Arc<EncodingLayer>,
}

impl RateSnapshot {
    fn capture(layer: &Arc<EncodingLayer>) -> Self {
        Self {
            bps: layer.last_stable_bitrate_bps(),
            layer: Arc::clone(layer),
        }
    }
}

/// Allocation record for one video track of one endpoint.
#[derive(Debug)]
pub struct SourceAllocation {
    endpoint_id: EndpointId,
    /// Whether the endpoint is inside the destination's last-N window
    fits_in_last_n: bool,
    /// Whether the endpoint is on stage at the destination
    selected: bool,
    /// Primary SSRC of the lowest layer, or -1 when there is nothing to
    /// forward
    target_ssrc: i64,
    track: Option<Arc<SourceTrack>>,
    /// Ranked candidate layers, ascending quality
    rates: Vec<RateSnapshot>,
    /// Index into `rates` that must be reached before lower-priority sources
    /// are upgraded past their own preferred quality
    preferred_idx: i32,
    /// Index into `rates` currently chosen; -1 means do not forward
    pub(crate) rates_idx: i32,
}

impl SourceAllocation {
    /// Build the candidate ladder for one track.
    ///
    /// Layers taller than the destination's viewport are never candidates.
    /// For the on-stage source the ladder keeps every temporal layer up to
    /// the preferred height plus the full-frame-rate variants above it; a
    /// thumbnail only keeps layers at or below the thumbnail height cap.
    pub(crate) fn new(
        config: &BitrateConfig,
        source: &dyn Endpoint,
        track: Option<Arc<SourceTrack>>,
        fits_in_last_n: bool,
        selected: bool,
        max_frame_height: i32,
    ) -> Self {
        let endpoint_id = source.id();

        // A source outside the last-N window (or with no track or an empty
        // ladder) keeps its track reference so the coordinator can still
        // steer an idle controller for it, but offers no candidates.
        let no_candidates = |track: Option<Arc<SourceTrack>>| Self {
            endpoint_id: source.id(),
            fits_in_last_n,
            selected,
            target_ssrc: -1,
            track,
            rates: Vec::new(),
            preferred_idx: -1,
            rates_idx: -1,
        };

        let Some(track) = track else {
            return no_candidates(None);
        };
        if !fits_in_last_n || track.encodings().is_empty() {
            return no_candidates(Some(track));
        }

        let encodings = track.encodings();

        let target_ssrc = i64::from(encodings[0].primary_ssrc());

        let mut rates = Vec::new();
        let mut preferred_idx = 0;
        for encoding in encodings {
            if encoding.height() > max_frame_height {
                continue;
            }
            if selected {
                // The on-stage source favors resolution over frame rate.
                if encoding.height() < config.onstage_preferred_height
                    || encoding.frame_rate() >= config.onstage_preferred_frame_rate
                {
                    rates.push(RateSnapshot::capture(encoding));
                }
                if encoding.height() <= config.onstage_preferred_height {
                    preferred_idx = rates.len() as i32 - 1;
                }
            } else if encoding.height() <= config.thumbnail_max_height {
                // A thumbnail keeps every temporal layer of the low
                // resolution stream.
                rates.push(RateSnapshot::capture(encoding));
            }
        }

        Self {
            endpoint_id,
            fits_in_last_n,
            selected,
            target_ssrc,
            track: Some(track),
            rates,
            preferred_idx,
            rates_idx: -1,
        }
    }

    /// Try to move one step up the candidate ladder without exceeding
    /// `max_bps`.
    ///
    /// An on-stage source that is not forwarded yet jumps straight to the
    /// highest candidate at or below its preferred index that fits. All
    /// other cases climb a single rung per call. The boost path admits a
    /// rate exactly equal to `max_bps` while the incremental path does not;
    /// this asymmetry is intentional.
    pub(crate) fn improve(&mut self, max_bps: u64) {
        if self.rates.is_empty() {
            return;
        }

        if self.rates_idx == -1 && self.selected {
            for i in (self.rates_idx + 1)..self.rates.len() as i32 {
                if i > self.preferred_idx || max_bps < self.rates[i as usize].bps {
                    break;
                }
                self.rates_idx = i;
            }
        } else if self.rates_idx + 1 < self.rates.len() as i32
            && self.rates[(self.rates_idx + 1) as usize].bps < max_bps
        {
            self.rates_idx += 1;
        }
    }

    /// Bitrate of the chosen candidate, 0 when not forwarding.
    #[must_use]
    pub fn target_bitrate(&self) -> u64 {
        if self.rates_idx != -1 {
            self.rates[self.rates_idx as usize].bps
        } else {
            0
        }
    }

    /// Bitrate of the best candidate, 0 when the ladder is empty.
    #[must_use]
    pub fn optimal_bitrate(&self) -> u64 {
        self.rates.last().map_or(0, |snapshot| snapshot.bps)
    }

    /// Quality index of the chosen candidate's layer, -1 when not
    /// forwarding.
    #[must_use]
    pub fn target_index(&self) -> i32 {
        if self.rates_idx != -1 {
            self.rates[self.rates_idx as usize].layer.index()
        } else {
            -1
        }
    }

    /// Quality index of the best candidate's layer, -1 when the ladder is
    /// empty.
    #[must_use]
    pub fn optimal_index(&self) -> i32 {
        self.rates
            .last()
            .map_or(-1, |snapshot| snapshot.layer.index())
    }

    #[must_use]
    pub fn endpoint_id(&self) -> &EndpointId {
        &self.endpoint_id
    }

    #[must_use]
    pub fn fits_in_last_n(&self) -> bool {
        self.fits_in_last_n
    }

    #[must_use]
    pub fn selected(&self) -> bool {
        self.selected
    }

    #[must_use]
    pub fn target_ssrc(&self) -> i64 {
        self.target_ssrc
    }

    #[must_use]
    pub fn track(&self) -> Option<&Arc<SourceTrack>> {
        self.track.as_ref()
    }

    #[must_use]
    pub fn rates(&self) -> &[RateSnapshot] {
        &self.rates
    }

    #[must_use]
    pub fn preferred_idx(&self) -> i32 {
        self.preferred_idx
    }

    #[must_use]
    pub fn rates_idx(&self) -> i32 {
        self.rates_idx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{simulcast_ladder, MockEndpoint};

    fn alloc(selected: bool, fits: bool) -> SourceAllocation {
        let config = BitrateConfig::default();
        let track = simulcast_ladder("alice", 100);
        let endpoint = MockEndpoint::new("alice");
        SourceAllocation::new(&config, &endpoint, Some(track), fits, selected, 720)
    }

    #[test]
    fn test_thumbnail_ladder_capped_at_thumbnail_height() {
        let allocation = alloc(false, true);
        // Only the three 180p temporal layers survive the thumbnail filter.
        assert_eq!(allocation.rates().len(), 3);
        assert_eq!(allocation.preferred_idx(), 0);
        assert_eq!(allocation.rates_idx(), -1);
        assert_eq!(allocation.optimal_index(), 2);
    }

    #[test]
    fn test_onstage_ladder_keeps_full_frame_rate_variants() {
        let allocation = alloc(true, true);
        // 180p@7.5/15/30 (below preferred height), 360p@30 and 720p@30
        // (full frame rate above it).
        assert_eq!(allocation.rates().len(), 5);
        assert_eq!(allocation.preferred_idx(), 3);
        assert_eq!(allocation.optimal_bitrate(), 2_500_000);
    }

    #[test]
    fn test_viewport_cap_filters_tall_layers() {
        let config = BitrateConfig::default();
        let track = simulcast_ladder("alice", 100);
        let endpoint = MockEndpoint::new("alice");
        let allocation =
            SourceAllocation::new(&config, &endpoint, Some(track), true, true, 360);
        // The 720p layer is gone.
        assert_eq!(allocation.rates().len(), 4);
        assert_eq!(allocation.optimal_bitrate(), 700_000);
    }

    #[test]
    fn test_outside_last_n_has_no_candidates() {
        let allocation = alloc(true, false);
        assert!(allocation.rates().is_empty());
        assert_eq!(allocation.target_ssrc(), -1);
        assert_eq!(allocation.target_index(), -1);
        assert_eq!(allocation.rates_idx(), -1);
    }

    #[test]
    fn test_selected_boost_jumps_to_preferred() {
        let mut allocation = alloc(true, true);
        allocation.improve(10_000_000);
        // Straight to the preferred index, not beyond it.
        assert_eq!(allocation.rates_idx(), 3);
        assert_eq!(allocation.target_bitrate(), 700_000);
    }

    #[test]
    fn test_selected_boost_admits_exact_fit() {
        let mut allocation = alloc(true, true);
        // Exactly the preferred layer's bitrate: the boost takes it.
        allocation.improve(700_000);
        assert_eq!(allocation.rates_idx(), 3);
    }

    #[test]
    fn test_incremental_step_rejects_exact_fit() {
        let mut allocation = alloc(false, true);
        allocation.improve(60_000);
        assert_eq!(allocation.rates_idx(), 0);
        // The next rung costs exactly 150k; the strict comparison refuses.
        allocation.improve(150_000);
        assert_eq!(allocation.rates_idx(), 0);
        allocation.improve(150_001);
        assert_eq!(allocation.rates_idx(), 1);
    }

    #[test]
    fn test_thumbnail_climbs_one_rung_per_call() {
        let mut allocation = alloc(false, true);
        allocation.improve(10_000_000);
        assert_eq!(allocation.rates_idx(), 0);
        allocation.improve(10_000_000);
        assert_eq!(allocation.rates_idx(), 1);
        allocation.improve(10_000_000);
        assert_eq!(allocation.rates_idx(), 2);
        // Top of the ladder.
        allocation.improve(10_000_000);
        assert_eq!(allocation.rates_idx(), 2);
    }

    #[test]
    fn test_improve_with_empty_ladder_is_noop() {
        let mut allocation = alloc(true, false);
        allocation.improve(u64::MAX);
        assert_eq!(allocation.rates_idx(), -1);
        assert_eq!(allocation.target_bitrate(), 0);
    }
}
