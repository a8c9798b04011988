//! Packet pipeline adapters
//!
//! Two thin adapters sit on the destination's packet path and delegate to
//! the routed [`SourceController`]s: one for media packets (batched, may
//! inject extra packets), one for control packets (single packet behind a
//! predicate). Both share the batch-to-batch transformer shape so the
//! surrounding pipeline can treat them uniformly.

use crate::routing::RoutingTable;
use crate::rtp;
use crate::time::now_ms;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// A batched packet rewriting stage. A `None` slot is a packet that was
/// consumed (dropped) by an earlier stage and stays untouched.
pub trait PacketTransformer: Send + Sync {
    /// Rewrite a batch flowing towards the destination.
    fn transform(&self, packets: Vec<Option<Bytes>>) -> Vec<Option<Bytes>>;

    /// Rewrite a batch flowing away from the destination.
    fn reverse_transform(&self, packets: Vec<Option<Bytes>>) -> Vec<Option<Bytes>>;

    /// Tear the stage down.
    fn close(&self);
}

/// Counters of the media adapter, aggregated since construction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineStats {
    /// Packets rewritten by a source controller
    pub packets_transformed: u64,
    /// Packets dropped for lack of a routed controller or consumed by one
    pub packets_dropped: u64,
    /// Non-media packets passed through untouched
    pub packets_passed: u64,
    /// Packets injected by controllers beyond the incoming batch
    pub extra_packets: u64,
}

#[derive(Debug, Default)]
struct PipelineStatsInner {
    packets_transformed: AtomicU64,
    packets_dropped: AtomicU64,
    packets_passed: AtomicU64,
    extra_packets: AtomicU64,
}

impl PipelineStatsInner {
    fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            packets_transformed: self.packets_transformed.load(Ordering::Relaxed),
            packets_dropped: self.packets_dropped.load(Ordering::Relaxed),
            packets_passed: self.packets_passed.load(Ordering::Relaxed),
            extra_packets: self.extra_packets.load(Ordering::Relaxed),
        }
    }
}

/// Media-packet adapter: routes each packet of a batch to its source
/// controller for rewriting.
pub struct RtpTransformer {
    routes: Arc<RoutingTable>,
    first_media_ms: Arc<AtomicI64>,
    stats: PipelineStatsInner,
}

impl RtpTransformer {
    pub(crate) fn new(routes: Arc<RoutingTable>, first_media_ms: Arc<AtomicI64>) -> Self {
        Self {
            routes,
            first_media_ms,
            stats: PipelineStatsInner::default(),
        }
    }

    #[must_use]
    pub fn stats(&self) -> PipelineStats {
        self.stats.snapshot()
    }
}

impl PacketTransformer for RtpTransformer {
    fn transform(&self, mut packets: Vec<Option<Bytes>>) -> Vec<Option<Bytes>> {
        if packets.is_empty() {
            return packets;
        }

        // First media through this adapter starts the ramp-up grace clock.
        let _ = self.first_media_ms.compare_exchange(
            -1,
            now_ms(),
            Ordering::AcqRel,
            Ordering::Relaxed,
        );

        let mut extras: Vec<Option<Bytes>> = Vec::new();
        for slot in &mut packets {
            let Some(packet) = slot.as_ref() else {
                continue;
            };
            if !rtp::is_rtp(packet) {
                self.stats.packets_passed.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            let Some(ssrc) = rtp::rtp_ssrc(packet) else {
                continue;
            };

            let Some(controller) = self.routes.lookup(ssrc) else {
                // No allocation, no forwarding.
                *slot = None;
                self.stats.packets_dropped.fetch_add(1, Ordering::Relaxed);
                continue;
            };

            let mut rewritten = controller.rtp_transform(packet.clone());
            if rewritten.is_empty() {
                *slot = None;
                self.stats.packets_dropped.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            self.stats
                .packets_transformed
                .fetch_add(1, Ordering::Relaxed);
            *slot = Some(rewritten.remove(0));
            if !rewritten.is_empty() {
                self.stats
                    .extra_packets
                    .fetch_add(rewritten.len() as u64, Ordering::Relaxed);
                extras.extend(rewritten.into_iter().map(Some));
            }
        }

        packets.extend(extras);
        packets
    }

    fn reverse_transform(&self, packets: Vec<Option<Bytes>>) -> Vec<Option<Bytes>> {
        packets
    }

    fn close(&self) {
        for controller in self.routes.controllers() {
            if let Err(e) = controller.close() {
                // One failing controller must not block the teardown of its
                // siblings.
                warn!(error = %e, "Source controller close failed");
            }
        }
    }
}

/// Control-packet adapter: rewrites RTCP packets owned by a routed
/// controller, passing everything else through untouched.
pub struct RtcpTransformer {
    routes: Arc<RoutingTable>,
}

impl RtcpTransformer {
    pub(crate) fn new(routes: Arc<RoutingTable>) -> Self {
        Self { routes }
    }

    fn transform_one(&self, packet: Bytes) -> Bytes {
        if !rtp::is_rtcp(&packet) {
            return packet;
        }
        let Some(ssrc) = rtp::rtcp_sender_ssrc(&packet) else {
            return packet;
        };
        match self.routes.lookup(ssrc) {
            Some(controller) => controller.rtcp_transform(packet),
            None => packet,
        }
    }
}

impl PacketTransformer for RtcpTransformer {
    fn transform(&self, mut packets: Vec<Option<Bytes>>) -> Vec<Option<Bytes>> {
        for slot in &mut packets {
            if let Some(packet) = slot.take() {
                *slot = Some(self.transform_one(packet));
            }
        }
        packets
    }

    fn reverse_transform(&self, packets: Vec<Option<Bytes>>) -> Vec<Option<Bytes>> {
        packets
    }

    fn close(&self) {}
}
