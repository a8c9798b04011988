//! Bitrate allocation and packet admission core for a selective forwarding
//! middlebox
//!
//! One [`BitrateController`] instance serves one destination participant of
//! a multiparty video conference. Given the downlink bandwidth estimate and
//! the participant's intent (selected, pinned, last-N window), it decides
//! which incoming video sub-streams to forward and at which quality layer,
//! and admits or rejects every incoming media packet accordingly.
//!
//! ## Architecture
//!
//! - **[`prioritize`] / [`allocate`]**: rank the conference for this
//!   receiver and distribute the bandwidth cap over the resulting
//!   [`SourceAllocation`]s (a multi-round greedy pass with a rollback
//!   guard)
//! - **[`RoutingTable`]**: concurrent SSRC-to-controller map the data plane
//!   resolves packets against without blocking
//! - **[`AdmissionFilter`]**: stateless per-packet accept/reject gate
//! - **[`BitrateController`]**: owns the above, runs the update cycle,
//!   steers the per-source controllers and publishes the active list for
//!   the pacer
//! - **[`RtpTransformer`] / [`RtcpTransformer`]**: media and control packet
//!   adapters delegating rewriting to the routed controllers
//!
//! Per-source RTP rewriting, bandwidth estimation, conference membership
//! and signalling live behind collaborator traits ([`SourceController`],
//! [`BandwidthEstimator`], [`ConferenceContext`], ...); the core never
//! parses codecs and never blocks the packet path.

mod allocation;
mod allocator;
mod config;
mod controller;
mod error;
mod filter;
mod pipeline;
mod routing;
mod rtp;
pub mod test_support;
mod time;
mod track;
mod traits;
mod types;

pub use allocation::{RateSnapshot, SourceAllocation};
pub use allocator::{allocate, prioritize};
pub use config::BitrateConfig;
pub use controller::{BitrateController, CoreHandle};
pub use error::{Error, Result};
pub use filter::AdmissionFilter;
pub use pipeline::{PacketTransformer, PipelineStats, RtcpTransformer, RtpTransformer};
pub use routing::RoutingTable;
pub use track::{EncodingLayer, SourceTrack};
pub use traits::{
    BandwidthEstimator, ChangeNotifier, ConferenceContext, Endpoint, SourceController,
    SourceControllerFactory, Transport,
};
pub use types::EndpointId;
