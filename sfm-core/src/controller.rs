//! The per-receiver bitrate controller
//!
//! One [`BitrateController`] is bound to a single destination participant.
//! It reacts to bandwidth estimates and membership changes by recomputing
//! the bitrate allocation, steers the per-source controllers to the chosen
//! quality indices, and publishes the active controller list for the pacer
//! and prober. The packet path (admission filter and pipeline adapters)
//! keeps flowing concurrently and never blocks on the allocation cycle.

use crate::allocator;
use crate::config::BitrateConfig;
use crate::error::Result;
use crate::filter::AdmissionFilter;
use crate::pipeline::{RtcpTransformer, RtpTransformer};
use crate::routing::RoutingTable;
use crate::time::now_ms;
use crate::traits::{
    BandwidthEstimator, ChangeNotifier, ConferenceContext, Endpoint, SourceController,
    SourceControllerFactory, Transport,
};
use crate::types::EndpointId;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// How long after the first media packet the bandwidth estimate is still
/// ignored, so the send rate can ramp up
const RAMP_UP_GRACE_MS: i64 = 10_000;

/// Non-owning view of the controller's shared state, handed to every source
/// controller at creation time.
#[derive(Clone)]
pub struct CoreHandle {
    first_media_ms: Arc<AtomicI64>,
    config: Arc<BitrateConfig>,
}

impl CoreHandle {
    /// Wall-clock milliseconds of the first media packet through this
    /// receiver, -1 while no media has flowed yet.
    #[must_use]
    pub fn first_media_ms(&self) -> i64 {
        self.first_media_ms.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn config(&self) -> &BitrateConfig {
        &self.config
    }
}

pub struct BitrateController {
    config: Arc<BitrateConfig>,
    dest: Arc<dyn Endpoint>,
    conference: Arc<dyn ConferenceContext>,
    transport: Arc<dyn Transport>,
    estimator: Option<Arc<dyn BandwidthEstimator>>,
    notifier: Arc<dyn ChangeNotifier>,
    factory: Arc<dyn SourceControllerFactory>,

    routes: Arc<RoutingTable>,
    filter: AdmissionFilter,
    rtp_transformer: Arc<RtpTransformer>,
    rtcp_transformer: Arc<RtcpTransformer>,

    /// Wall-clock ms of the first media packet, -1 until set; written once
    /// by the data plane
    first_media_ms: Arc<AtomicI64>,
    /// The last bandwidth estimate this controller reacted to
    last_bwe: AtomicI64,
    /// Endpoints forwarded by the latest successful cycle
    forwarded_endpoint_ids: RwLock<HashSet<EndpointId>>,
    /// Active controller list produced by the latest cycle
    simulcast_controllers: RwLock<Vec<Arc<dyn SourceController>>>,
    trust_bwe: bool,
}

impl BitrateController {
    pub fn new(
        config: BitrateConfig,
        dest: Arc<dyn Endpoint>,
        conference: Arc<dyn ConferenceContext>,
        transport: Arc<dyn Transport>,
        estimator: Option<Arc<dyn BandwidthEstimator>>,
        notifier: Arc<dyn ChangeNotifier>,
        factory: Arc<dyn SourceControllerFactory>,
    ) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let trust_bwe = config.trust_bwe;

        let routes = Arc::new(RoutingTable::new());
        let first_media_ms = Arc::new(AtomicI64::new(-1));
        let filter = AdmissionFilter::new(Arc::clone(&routes));
        let rtp_transformer = Arc::new(RtpTransformer::new(
            Arc::clone(&routes),
            Arc::clone(&first_media_ms),
        ));
        let rtcp_transformer = Arc::new(RtcpTransformer::new(Arc::clone(&routes)));

        debug!(
            dest = %dest.id(),
            trust_bwe,
            "Bitrate controller created"
        );

        Ok(Self {
            config,
            dest,
            conference,
            transport,
            estimator,
            notifier,
            factory,
            routes,
            filter,
            rtp_transformer,
            rtcp_transformer,
            first_media_ms,
            last_bwe: AtomicI64::new(-1),
            forwarded_endpoint_ids: RwLock::new(HashSet::new()),
            simulcast_controllers: RwLock::new(Vec::new()),
            trust_bwe,
        })
    }

    /// Recompute the bitrate allocation and steer the source controllers
    /// towards it.
    ///
    /// `conference_endpoints` is the dominant-speaker-ordered conference; it
    /// is fetched from the conference context when not supplied. `bwe_bps`
    /// is the current downlink estimate, or -1 when the caller has none.
    pub fn update(&self, conference_endpoints: Option<Vec<Arc<dyn Endpoint>>>, bwe_bps: i64) {
        let mut bwe_bps = bwe_bps;
        if bwe_bps > -1 {
            // Negligible changes in the estimate are ignored wholesale:
            // frequent resolution switches hurt the experience more than a
            // slightly stale allocation.
            let previous = self.last_bwe.load(Ordering::Relaxed);
            if !is_larger_than_bwe_threshold(
                previous,
                bwe_bps,
                self.config.bwe_change_threshold_pct,
            ) {
                trace!(
                    previous,
                    current = bwe_bps,
                    "Bandwidth change below threshold, keeping current allocation"
                );
                return;
            }
            self.last_bwe.store(bwe_bps, Ordering::Relaxed);
        }

        let conference_endpoints = conference_endpoints
            .unwrap_or_else(|| self.conference.endpoints_by_dominant_speaker());

        // Ignore the estimate until media has been flowing for a while; the
        // estimator ramps up slower than the conference does.
        let mut trust_bwe = self.trust_bwe;
        if trust_bwe {
            let first_media_ms = self.first_media_ms.load(Ordering::Acquire);
            if first_media_ms == -1 || now_ms() - first_media_ms < RAMP_UP_GRACE_MS {
                trust_bwe = false;
            }
        }

        if let Some(estimator) = &self.estimator {
            if bwe_bps == -1 && trust_bwe {
                bwe_bps = estimator
                    .latest_estimate()
                    .map_or(-1, |bps| i64::try_from(bps).unwrap_or(i64::MAX));
            }
        }

        // The estimate binds the cap only when an estimator is attached,
        // trusted, and the transport can repair losses; otherwise forward
        // everything the policy allows.
        let max_bandwidth = if bwe_bps < 0
            || !trust_bwe
            || self.estimator.is_none()
            || !self.transport.supports_retransmission()
        {
            u64::MAX
        } else {
            bwe_bps as u64
        };

        let mut allocations =
            allocator::prioritize(&self.config, self.dest.as_ref(), conference_endpoints);
        let headroom = allocator::allocate(max_bandwidth, &mut allocations);
        if max_bandwidth != u64::MAX {
            debug!(max_bandwidth, headroom, "Allocation cycle complete");
        }

        let old_forwarded = self.forwarded_endpoint_ids.read().clone();
        let mut new_forwarded: HashSet<EndpointId> = HashSet::new();
        let mut entering: HashSet<EndpointId> = HashSet::new();
        let mut conference_ids: HashSet<EndpointId> = HashSet::new();
        let mut active: Vec<Arc<dyn SourceController>> = Vec::new();
        let now = now_ms();

        if allocations.is_empty() {
            // Destination gone or nothing to rank: park every known source.
            for controller in self.routes.controllers() {
                controller.set_target_index(-1);
                controller.set_optimal_index(-1);
            }
        } else {
            let stream_hash = self.dest.id().stable_hash();
            for allocation in &allocations {
                conference_ids.insert(allocation.endpoint_id().clone());

                let target_index = allocation.target_index();
                let optimal_index = allocation.optimal_index();

                let controller = allocation.track().and_then(|track| {
                    self.routes.get_or_insert_with(track, || {
                        self.factory.create(self.core_handle(), Arc::clone(track))
                    })
                });

                if let Some(controller) = controller {
                    active.push(Arc::clone(&controller));
                    controller.set_target_index(target_index);
                    controller.set_optimal_index(optimal_index);

                    debug!(
                        "qot,{},{},{},{},{},{},{},{}",
                        now,
                        stream_hash,
                        allocation.endpoint_id().stable_hash(),
                        controller.current_index(),
                        target_index,
                        optimal_index,
                        allocation.target_bitrate(),
                        allocation.optimal_bitrate()
                    );
                }

                if target_index > -1 {
                    let id = allocation.endpoint_id().clone();
                    if !old_forwarded.contains(&id) {
                        entering.insert(id.clone());
                    }
                    new_forwarded.insert(id);
                }
            }
        }

        // The pacer and prober pick this list up.
        *self.simulcast_controllers.write() = active;

        if new_forwarded != old_forwarded {
            self.notifier
                .on_forwarded_endpoints_changed(&new_forwarded, &entering, &conference_ids);
        }
        *self.forwarded_endpoint_ids.write() = new_forwarded;
    }

    /// Per-packet admission decision for the destination.
    #[must_use]
    pub fn accept(&self, packet: &[u8]) -> bool {
        self.filter.accept(packet)
    }

    #[must_use]
    pub fn admission_filter(&self) -> AdmissionFilter {
        self.filter.clone()
    }

    #[must_use]
    pub fn rtp_transformer(&self) -> Arc<RtpTransformer> {
        Arc::clone(&self.rtp_transformer)
    }

    #[must_use]
    pub fn rtcp_transformer(&self) -> Arc<RtcpTransformer> {
        Arc::clone(&self.rtcp_transformer)
    }

    /// Endpoints forwarded by the latest cycle.
    #[must_use]
    pub fn forwarded_endpoints(&self) -> HashSet<EndpointId> {
        self.forwarded_endpoint_ids.read().clone()
    }

    /// The active controller list produced by the latest cycle.
    #[must_use]
    pub fn simulcast_controllers(&self) -> Vec<Arc<dyn SourceController>> {
        self.simulcast_controllers.read().clone()
    }

    /// The last bandwidth estimate this controller reacted to, -1 before the
    /// first one.
    #[must_use]
    pub fn last_bwe(&self) -> i64 {
        self.last_bwe.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn core_handle(&self) -> CoreHandle {
        CoreHandle {
            first_media_ms: Arc::clone(&self.first_media_ms),
            config: Arc::clone(&self.config),
        }
    }

    #[cfg(test)]
    pub(crate) fn set_first_media_ms(&self, ms: i64) {
        self.first_media_ms.store(ms, Ordering::Release);
    }
}

/// Whether the estimate moved enough, relative to the previous one, to be
/// worth a re-allocation. A previous value of -1 yields a zero threshold, so
/// the first real estimate always passes.
fn is_larger_than_bwe_threshold(previous: i64, current: i64, threshold_pct: i64) -> bool {
    (previous - current).abs() >= previous * threshold_pct / 100
}
