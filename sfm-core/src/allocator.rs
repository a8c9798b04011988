//! Bandwidth allocation over prioritized sources
//!
//! Two pure steps drive every allocation cycle. [`prioritize`] turns the
//! dominant-speaker-ordered conference into a ranked array of
//! [`SourceAllocation`]s: on-stage sources first, then pinned ones, then
//! whoever else still fits the destination's last-N window. [`allocate`]
//! then runs a multi-round greedy pass over that array, letting every source
//! climb its candidate ladder while the bandwidth cap holds, with a rollback
//! guard that keeps the number of forwarded sources from shrinking between
//! rounds.

use crate::allocation::SourceAllocation;
use crate::config::BitrateConfig;
use crate::traits::Endpoint;
use crate::types::EndpointId;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Rank the conference for this destination.
///
/// Returns the allocations in three concatenated priority bands, each
/// preserving the dominant-speaker order of `conference_endpoints`; one
/// allocation per video track. An expired destination yields an empty
/// result, which the caller treats as "stop forwarding everything".
pub fn prioritize(
    config: &BitrateConfig,
    dest: &dyn Endpoint,
    mut conference_endpoints: Vec<Arc<dyn Endpoint>>,
) -> Vec<SourceAllocation> {
    if dest.is_expired() {
        return Vec::new();
    }

    let dest_id = dest.id();
    let max_frame_height = dest.max_frame_height();

    // The destination itself never counts against the window.
    let conference_size = conference_endpoints.len() as i32;
    let last_n = dest.last_n();
    let last_n = if last_n < 0 {
        conference_size - 1
    } else {
        last_n.min(conference_size - 1)
    };

    let mut allocations = Vec::new();
    let mut endpoint_priority: i32 = 0;

    // Whoever is on stage needs to be visible first.
    consume_priority_band(
        config,
        &mut conference_endpoints,
        &dest.selected_endpoint_ids(),
        &dest_id,
        max_frame_height,
        last_n,
        &mut endpoint_priority,
        true,
        &mut allocations,
    );

    // Then the endpoints the user forced visible.
    consume_priority_band(
        config,
        &mut conference_endpoints,
        &dest.pinned_endpoint_ids(),
        &dest_id,
        max_frame_height,
        last_n,
        &mut endpoint_priority,
        false,
        &mut allocations,
    );

    // Finally everyone else, in speaker order, until the window closes.
    for source in &conference_endpoints {
        if source.is_expired() || source.id() == dest_id {
            continue;
        }

        let fits_in_last_n = endpoint_priority < last_n;
        let tracks = source.video_tracks();
        if !tracks.is_empty() {
            for track in tracks {
                allocations.push(SourceAllocation::new(
                    config,
                    source.as_ref(),
                    Some(track),
                    fits_in_last_n,
                    false,
                    max_frame_height,
                ));
            }
            endpoint_priority += 1;
        }
    }

    allocations
}

/// Emit allocations for the members of `wanted`, consuming them from the
/// endpoint list so later bands do not see them again. Stops emitting once
/// the last-N window is full, leaving the remainder for the final band.
#[allow(clippy::too_many_arguments)]
fn consume_priority_band(
    config: &BitrateConfig,
    conference_endpoints: &mut Vec<Arc<dyn Endpoint>>,
    wanted: &HashSet<EndpointId>,
    dest_id: &EndpointId,
    max_frame_height: i32,
    last_n: i32,
    endpoint_priority: &mut i32,
    selected: bool,
    allocations: &mut Vec<SourceAllocation>,
) {
    if wanted.is_empty() {
        return;
    }

    conference_endpoints.retain(|source| {
        if *endpoint_priority >= last_n {
            return true;
        }
        let source_id = source.id();
        if source.is_expired() || source_id == *dest_id || !wanted.contains(&source_id) {
            return true;
        }

        let tracks = source.video_tracks();
        if !tracks.is_empty() {
            for track in tracks {
                allocations.push(SourceAllocation::new(
                    config,
                    source.as_ref(),
                    Some(track),
                    true,
                    selected,
                    max_frame_height,
                ));
            }
            *endpoint_priority += 1;
        }
        false
    });
}

/// Distribute `max_bandwidth` over the prioritized allocations.
///
/// Every round walks the array in priority order and offers each source the
/// unallocated headroom plus its own current bitrate, so a source can trade
/// its current layer for a better one it can afford. Rounds repeat until the
/// headroom stops changing. A source that has not reached its preferred
/// quality cuts the round short, which keeps lower-priority sources from
/// being upgraded at its expense; a round that would forward fewer sources
/// than the previous one is rolled back wholesale, because a stable set of
/// visible participants beats marginally better bitrate on the survivors.
///
/// Returns the unallocated headroom.
pub fn allocate(mut max_bandwidth: u64, allocations: &mut [SourceAllocation]) -> u64 {
    if allocations.is_empty() {
        return max_bandwidth;
    }

    let mut old_max_bandwidth: u64 = 0;
    let mut old_state_len = 0usize;
    let mut old_state = vec![-1i32; allocations.len()];
    let mut new_state = vec![-1i32; allocations.len()];

    while old_max_bandwidth != max_bandwidth {
        old_max_bandwidth = max_bandwidth;
        old_state.copy_from_slice(&new_state);

        let mut new_state_len = 0usize;
        for (i, allocation) in allocations.iter_mut().enumerate() {
            if !allocation.fits_in_last_n() {
                // Prioritization sinks everything outside the window to the
                // tail, so the first such source ends the round.
                break;
            }

            // Loan the source its own bitrate back before improving, so an
            // upgrade replaces the current layer instead of stacking on it.
            max_bandwidth += allocation.target_bitrate();
            allocation.improve(max_bandwidth);
            max_bandwidth -= allocation.target_bitrate();

            new_state[i] = allocation.rates_idx;
            if allocation.rates_idx > -1 {
                new_state_len += 1;
            }

            if allocation.rates_idx < allocation.preferred_idx() {
                break;
            }
        }

        if old_state_len > new_state_len {
            // Revert the whole round rather than drop a participant that
            // was forwarded a round ago.
            debug!(
                old_forwarded = old_state_len,
                new_forwarded = new_state_len,
                "Allocation round rolled back"
            );
            for (allocation, &idx) in allocations.iter_mut().zip(old_state.iter()) {
                allocation.rates_idx = idx;
            }
            break;
        }

        old_state_len = new_state_len;
    }

    max_bandwidth
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{simulcast_ladder, MockEndpoint};

    fn endpoint(id: &str, ssrc_base: u32) -> Arc<dyn Endpoint> {
        Arc::new(MockEndpoint::new(id).with_track(simulcast_ladder(id, ssrc_base)))
    }

    fn ids(allocations: &[SourceAllocation]) -> Vec<&str> {
        allocations
            .iter()
            .map(|a| a.endpoint_id().as_str())
            .collect()
    }

    #[test]
    fn test_bands_selected_then_pinned_then_rest() {
        let dest = MockEndpoint::new("dest")
            .with_selected(["c"])
            .with_pinned(["e"]);
        let conference: Vec<Arc<dyn Endpoint>> = vec![
            endpoint("a", 100),
            endpoint("b", 200),
            endpoint("c", 300),
            endpoint("d", 400),
            endpoint("e", 500),
            Arc::new(MockEndpoint::new("dest")),
        ];

        let allocations = prioritize(&BitrateConfig::default(), &dest, conference);

        assert_eq!(ids(&allocations), vec!["c", "e", "a", "b", "d"]);
        assert!(allocations[0].selected());
        assert!(!allocations[1].selected());
        assert!(allocations.iter().all(SourceAllocation::fits_in_last_n));
    }

    #[test]
    fn test_destination_and_expired_are_skipped() {
        let dest = MockEndpoint::new("dest");
        let conference: Vec<Arc<dyn Endpoint>> = vec![
            endpoint("a", 100),
            Arc::new(
                MockEndpoint::new("gone")
                    .with_track(simulcast_ladder("gone", 200))
                    .expired(),
            ),
            Arc::new(MockEndpoint::new("dest")),
            endpoint("b", 300),
        ];

        let allocations = prioritize(&BitrateConfig::default(), &dest, conference);
        assert_eq!(ids(&allocations), vec!["a", "b"]);
    }

    #[test]
    fn test_expired_destination_yields_empty() {
        let dest = MockEndpoint::new("dest").expired();
        let conference: Vec<Arc<dyn Endpoint>> = vec![endpoint("a", 100)];
        assert!(prioritize(&BitrateConfig::default(), &dest, conference).is_empty());
    }

    #[test]
    fn test_last_n_window_closes_tail() {
        let dest = MockEndpoint::new("dest").with_last_n(2);
        let conference: Vec<Arc<dyn Endpoint>> = vec![
            endpoint("a", 100),
            endpoint("b", 200),
            endpoint("c", 300),
            endpoint("d", 400),
        ];

        let allocations = prioritize(&BitrateConfig::default(), &dest, conference);

        assert_eq!(ids(&allocations), vec!["a", "b", "c", "d"]);
        let fits: Vec<bool> = allocations
            .iter()
            .map(SourceAllocation::fits_in_last_n)
            .collect();
        assert_eq!(fits, vec![true, true, false, false]);
    }

    #[test]
    fn test_fits_in_last_n_is_a_prefix() {
        // Once one allocation falls outside the window, all later ones do.
        let dest = MockEndpoint::new("dest").with_last_n(1).with_pinned(["c"]);
        let conference: Vec<Arc<dyn Endpoint>> = vec![
            endpoint("a", 100),
            endpoint("b", 200),
            endpoint("c", 300),
        ];

        let allocations = prioritize(&BitrateConfig::default(), &dest, conference);
        let first_outside = allocations
            .iter()
            .position(|a| !a.fits_in_last_n())
            .unwrap_or(allocations.len());
        assert!(allocations[first_outside..]
            .iter()
            .all(|a| !a.fits_in_last_n()));
    }

    #[test]
    fn test_last_n_zero_sinks_everything() {
        let dest = MockEndpoint::new("dest").with_last_n(0).with_selected(["a"]);
        let conference: Vec<Arc<dyn Endpoint>> =
            vec![endpoint("a", 100), endpoint("b", 200)];

        let allocations = prioritize(&BitrateConfig::default(), &dest, conference);

        assert_eq!(allocations.len(), 2);
        assert!(allocations.iter().all(|a| !a.fits_in_last_n()));

        let mut allocations = allocations;
        allocate(u64::MAX, &mut allocations);
        assert!(allocations.iter().all(|a| a.rates_idx() == -1));
    }

    #[test]
    fn test_unbounded_cap_reaches_every_ladder_top() {
        let dest = MockEndpoint::new("dest").with_selected(["b"]);
        let conference: Vec<Arc<dyn Endpoint>> = vec![
            endpoint("a", 100),
            endpoint("b", 200),
            endpoint("c", 300),
            Arc::new(MockEndpoint::new("dest")),
        ];

        let mut allocations = prioritize(&BitrateConfig::default(), &dest, conference);
        allocate(u64::MAX, &mut allocations);

        for allocation in &allocations {
            assert_eq!(
                allocation.rates_idx(),
                allocation.rates().len() as i32 - 1
            );
            assert_eq!(allocation.target_index(), allocation.optimal_index());
        }
    }

    #[test]
    fn test_zero_cap_forwards_nothing() {
        let dest = MockEndpoint::new("dest").with_selected(["b"]);
        let conference: Vec<Arc<dyn Endpoint>> = vec![
            endpoint("a", 100),
            endpoint("b", 200),
            Arc::new(MockEndpoint::new("dest")),
        ];

        let mut allocations = prioritize(&BitrateConfig::default(), &dest, conference);
        let headroom = allocate(0, &mut allocations);

        assert_eq!(headroom, 0);
        assert!(allocations.iter().all(|a| a.rates_idx() == -1));
    }

    #[test]
    fn test_selected_boost_then_thumbnails_share_leftover() {
        // Conference [a, b, c, dest], b on stage, cap 900 kbps. The on-stage
        // source jumps to its preferred 360p layer (700k); the thumbnails
        // each claim their lowest rung from the 200k leftover and then stall
        // because the next rung (150k) never strictly undercuts what is
        // left.
        let dest = MockEndpoint::new("dest").with_selected(["b"]);
        let conference: Vec<Arc<dyn Endpoint>> = vec![
            endpoint("a", 100),
            endpoint("b", 200),
            endpoint("c", 300),
            Arc::new(MockEndpoint::new("dest")),
        ];

        let mut allocations = prioritize(&BitrateConfig::default(), &dest, conference);
        allocate(900_000, &mut allocations);

        assert_eq!(ids(&allocations), vec!["b", "a", "c"]);
        assert_eq!(allocations[0].target_bitrate(), 700_000);
        assert_eq!(allocations[1].target_bitrate(), 50_000);
        assert_eq!(allocations[2].target_bitrate(), 50_000);

        let total: u64 = allocations.iter().map(SourceAllocation::target_bitrate).sum();
        assert!(total <= 900_000);
    }

    #[test]
    fn test_forwarded_count_never_shrinks_across_rounds() {
        // Tight cap with two on-stage sources: the first one boosts to its
        // preferred quality, the second cannot afford its lowest rung. The
        // final forwarded count must match what the first round achieved.
        let dest = MockEndpoint::new("dest").with_selected(["p", "q"]);
        let conference: Vec<Arc<dyn Endpoint>> = vec![
            endpoint("p", 100),
            endpoint("q", 200),
            Arc::new(MockEndpoint::new("dest")),
        ];

        let mut allocations = prioritize(&BitrateConfig::default(), &dest, conference);
        allocate(740_000, &mut allocations);

        assert_eq!(allocations[0].target_bitrate(), 700_000);
        assert_eq!(allocations[1].rates_idx(), -1);
        let forwarded = allocations.iter().filter(|a| a.rates_idx() > -1).count();
        assert_eq!(forwarded, 1);
    }

    #[test]
    fn test_headroom_returned() {
        let dest = MockEndpoint::new("dest");
        let conference: Vec<Arc<dyn Endpoint>> =
            vec![endpoint("a", 100), Arc::new(MockEndpoint::new("dest"))];

        let mut allocations = prioritize(&BitrateConfig::default(), &dest, conference);
        // The thumbnail tops out at 300k; everything else comes back.
        let headroom = allocate(1_000_000, &mut allocations);
        assert_eq!(headroom, 700_000);
    }
}
