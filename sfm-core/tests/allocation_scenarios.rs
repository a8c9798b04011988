//! End-to-end allocation scenarios over the pure prioritize/allocate API

use sfm_core::test_support::{simulcast_ladder, MockEndpoint};
use sfm_core::{allocate, prioritize, BitrateConfig, Endpoint, SourceAllocation};
use std::sync::Arc;

fn source(id: &str, base_ssrc: u32) -> Arc<dyn Endpoint> {
    Arc::new(MockEndpoint::new(id).with_track(simulcast_ladder(id, base_ssrc)))
}

fn three_party_conference() -> Vec<Arc<dyn Endpoint>> {
    vec![
        source("a", 100),
        source("b", 200),
        source("c", 300),
        Arc::new(MockEndpoint::new("x")),
    ]
}

fn ids(allocations: &[SourceAllocation]) -> Vec<&str> {
    allocations
        .iter()
        .map(|allocation| allocation.endpoint_id().as_str())
        .collect()
}

#[test]
fn selected_source_first_and_everything_tops_out_unbounded() {
    // Conference [a, b, c], destination x, b on stage, no last-N limit.
    let dest = MockEndpoint::new("x").with_selected(["b"]);
    let mut allocations =
        prioritize(&BitrateConfig::default(), &dest, three_party_conference());

    assert_eq!(ids(&allocations), vec!["b", "a", "c"]);

    allocate(u64::MAX, &mut allocations);

    // The on-stage source reaches 720p30; the thumbnails top out at 180p30.
    assert_eq!(allocations[0].target_index(), 4);
    assert_eq!(allocations[1].target_index(), 2);
    assert_eq!(allocations[2].target_index(), 2);
    for allocation in &allocations {
        assert_eq!(allocation.target_index(), allocation.optimal_index());
    }
}

#[test]
fn capped_conference_boosts_the_stage_and_starves_thumbnails_fairly() {
    // Same conference under a 900 kbps cap. The on-stage source jumps to
    // its preferred 360p30 layer; the 200 kbps leftover lets each thumbnail
    // claim its lowest rung, and the strict headroom comparison keeps them
    // from climbing further.
    let dest = MockEndpoint::new("x").with_selected(["b"]);
    let mut allocations =
        prioritize(&BitrateConfig::default(), &dest, three_party_conference());

    allocate(900_000, &mut allocations);

    assert_eq!(allocations[0].target_index(), 3);
    assert_eq!(allocations[0].target_bitrate(), 700_000);
    assert_eq!(allocations[1].target_index(), 0);
    assert_eq!(allocations[2].target_index(), 0);

    let total: u64 = allocations
        .iter()
        .map(SourceAllocation::target_bitrate)
        .sum();
    assert!(total <= 900_000);
}

#[test]
fn chosen_index_always_inside_ladder() {
    for cap in [0, 100_000, 450_000, 900_000, 3_000_000, u64::MAX] {
        let dest = MockEndpoint::new("x").with_selected(["b"]);
        let mut allocations =
            prioritize(&BitrateConfig::default(), &dest, three_party_conference());
        allocate(cap, &mut allocations);

        for allocation in &allocations {
            let idx = allocation.rates_idx();
            assert!(idx >= -1);
            assert!(idx < allocation.rates().len() as i32);
        }
    }
}

#[test]
fn zero_cap_forwards_nobody() {
    let dest = MockEndpoint::new("x").with_selected(["b"]);
    let mut allocations =
        prioritize(&BitrateConfig::default(), &dest, three_party_conference());
    allocate(0, &mut allocations);

    assert!(allocations.iter().all(|a| a.rates_idx() == -1));
    assert!(allocations.iter().all(|a| a.target_bitrate() == 0));
}

#[test]
fn source_outside_window_never_forwarded_regardless_of_cap() {
    for cap in [0, 900_000, u64::MAX] {
        let dest = MockEndpoint::new("x").with_last_n(1);
        let conference: Vec<Arc<dyn Endpoint>> = vec![
            source("a", 100),
            source("b", 200),
            Arc::new(MockEndpoint::new("x")),
        ];
        let mut allocations = prioritize(&BitrateConfig::default(), &dest, conference);

        assert!(!allocations[1].fits_in_last_n());
        allocate(cap, &mut allocations);
        assert_eq!(allocations[1].rates_idx(), -1);
    }
}

#[test]
fn two_selected_sources_under_a_tight_cap_stay_stable() {
    // Cap just below the first stage source's preferred layer plus the
    // second's lowest rung: the second source never makes it in, and
    // repeated allocation rounds keep the forwarded count steady instead of
    // trading the first source away.
    let dest = MockEndpoint::new("x").with_selected(["p", "q"]);
    let conference: Vec<Arc<dyn Endpoint>> = vec![
        source("p", 100),
        source("q", 200),
        Arc::new(MockEndpoint::new("x")),
    ];
    let mut allocations = prioritize(&BitrateConfig::default(), &dest, conference);
    allocate(740_000, &mut allocations);

    let forwarded: Vec<&str> = allocations
        .iter()
        .filter(|a| a.rates_idx() > -1)
        .map(|a| a.endpoint_id().as_str())
        .collect();
    assert_eq!(forwarded, vec!["p"]);
    assert_eq!(allocations[0].target_bitrate(), 700_000);
}

#[test]
fn pinned_sources_rank_between_stage_and_rest() {
    let dest = MockEndpoint::new("x")
        .with_selected(["c"])
        .with_pinned(["b", "c"]);
    let mut conference = three_party_conference();
    conference.push(source("d", 400));

    let allocations = prioritize(&BitrateConfig::default(), &dest, conference);

    // c is consumed by the stage band, so the pinned band only emits b.
    assert_eq!(ids(&allocations), vec!["c", "b", "a", "d"]);
    assert!(allocations[0].selected());
    assert!(!allocations[1].selected());
}

#[test]
fn viewport_cap_limits_the_stage_source() {
    // A 360p viewport keeps even the on-stage source off the 720p layer.
    let dest = MockEndpoint::new("x")
        .with_selected(["b"])
        .with_max_frame_height(360);
    let mut allocations =
        prioritize(&BitrateConfig::default(), &dest, three_party_conference());
    allocate(u64::MAX, &mut allocations);

    assert_eq!(allocations[0].target_index(), 3);
    assert_eq!(allocations[0].target_bitrate(), 700_000);
}
