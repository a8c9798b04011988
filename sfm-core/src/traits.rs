//! Collaborator interfaces of the forwarding core
//!
//! The core owns the allocation decision and the SSRC routing; everything
//! else (conference membership, per-source rewriting, bandwidth estimation,
//! transport capabilities, signalling) is reached through the traits below.

use crate::controller::CoreHandle;
use crate::error::Result;
use crate::track::SourceTrack;
use crate::types::EndpointId;
use bytes::Bytes;
use std::collections::HashSet;
use std::sync::Arc;

/// A participant in the conference, as seen by this receiver's core.
pub trait Endpoint: Send + Sync {
    fn id(&self) -> EndpointId;

    /// Whether the endpoint has left the conference
    fn is_expired(&self) -> bool;

    /// Endpoints this participant has put on stage
    fn selected_endpoint_ids(&self) -> HashSet<EndpointId>;

    /// Endpoints this participant has forced visible
    fn pinned_endpoint_ids(&self) -> HashSet<EndpointId>;

    /// Upper bound on how many endpoints this participant is willing to
    /// receive at once; negative means unlimited
    fn last_n(&self) -> i32;

    /// Viewport cap in pixels for any stream forwarded to this participant
    fn max_frame_height(&self) -> i32;

    /// The video tracks this endpoint advertises
    fn video_tracks(&self) -> Vec<Arc<SourceTrack>>;
}

/// Conference-wide view, ordered by dominant-speaker recency.
pub trait ConferenceContext: Send + Sync {
    /// All endpoints of the conference, most recent dominant speaker first
    fn endpoints_by_dominant_speaker(&self) -> Vec<Arc<dyn Endpoint>>;
}

/// Downlink bandwidth estimation for the destination participant.
pub trait BandwidthEstimator: Send + Sync {
    fn latest_estimate(&self) -> Option<u64>;
}

/// Capabilities of the destination transport.
pub trait Transport: Send + Sync {
    fn supports_retransmission(&self) -> bool;
}

/// Sink for forwarded-set change notifications.
pub trait ChangeNotifier: Send + Sync {
    /// Fired when the set of forwarded endpoints changes. `new_endpoints` is
    /// the full new set, `entering_endpoints` the endpoints that were not
    /// forwarded before, `conference_endpoints` every endpoint the cycle
    /// considered.
    fn on_forwarded_endpoints_changed(
        &self,
        new_endpoints: &HashSet<EndpointId>,
        entering_endpoints: &HashSet<EndpointId>,
        conference_endpoints: &HashSet<EndpointId>,
    );
}

/// Per-source packet rewriter, steered by the core through quality indices.
///
/// One controller owns the whole SSRC family of a track (primary and
/// retransmission streams of every layer). The core drives it by setting the
/// target index (the layer to forward now) and the optimal index (the layer
/// it would forward with unlimited bandwidth); the controller performs
/// sequence-number and timestamp continuity rewriting on its own.
pub trait SourceController: Send + Sync {
    /// Per-packet admission decision for this source
    fn accept(&self, packet: &[u8]) -> bool;

    /// Rewrite one media packet; zero results drops it, additional results
    /// are injected into the outgoing batch
    fn rtp_transform(&self, packet: Bytes) -> Vec<Bytes>;

    /// Rewrite one control packet
    fn rtcp_transform(&self, packet: Bytes) -> Bytes;

    /// Quality index to forward now; -1 pauses forwarding
    fn set_target_index(&self, index: i32);

    /// Quality index to forward if bandwidth were unlimited; -1 when the
    /// source has no eligible layer
    fn set_optimal_index(&self, index: i32);

    /// Quality index currently flowing out of the rewriter
    fn current_index(&self) -> i32;

    fn source(&self) -> Arc<SourceTrack>;

    fn close(&self) -> Result<()>;
}

/// Creates [`SourceController`]s on behalf of the core.
///
/// The handle passed to `create` is a non-owning view of the core's shared
/// state; the core owns every controller it creates, so no reference cycle
/// forms.
pub trait SourceControllerFactory: Send + Sync {
    fn create(&self, core: CoreHandle, track: Arc<SourceTrack>) -> Arc<dyn SourceController>;
}
