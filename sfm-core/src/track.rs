//! Layered video source descriptors
//!
//! A sending endpoint publishes each camera as a [`SourceTrack`]: an ordered
//! ladder of [`EncodingLayer`]s (simulcast streams and/or SVC layers). Layers
//! are totally ordered by subjective quality index; a higher layer depends on
//! every lower layer for decoding.

use crate::types::EndpointId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One sub-stream of a layered video source.
#[derive(Debug)]
pub struct EncodingLayer {
    /// Subjective quality index, monotone with quality
    index: i32,
    /// Frame height in pixels
    height: i32,
    /// Frame rate in fps
    frame_rate: f64,
    /// SSRC of the media stream carrying this layer
    primary_ssrc: u32,
    /// SSRC of the retransmission stream, if negotiated
    rtx_ssrc: Option<u32>,
    /// Last stable bitrate in bps, maintained by the rate estimation
    /// machinery and sampled once per allocation cycle
    last_stable_bitrate_bps: AtomicU64,
}

impl EncodingLayer {
    pub fn new(
        index: i32,
        height: i32,
        frame_rate: f64,
        primary_ssrc: u32,
        rtx_ssrc: Option<u32>,
        last_stable_bitrate_bps: u64,
    ) -> Self {
        Self {
            index,
            height,
            frame_rate,
            primary_ssrc,
            rtx_ssrc,
            last_stable_bitrate_bps: AtomicU64::new(last_stable_bitrate_bps),
        }
    }

    #[must_use]
    pub fn index(&self) -> i32 {
        self.index
    }

    #[must_use]
    pub fn height(&self) -> i32 {
        self.height
    }

    #[must_use]
    pub fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    #[must_use]
    pub fn primary_ssrc(&self) -> u32 {
        self.primary_ssrc
    }

    #[must_use]
    pub fn rtx_ssrc(&self) -> Option<u32> {
        self.rtx_ssrc
    }

    #[must_use]
    pub fn last_stable_bitrate_bps(&self) -> u64 {
        self.last_stable_bitrate_bps.load(Ordering::Relaxed)
    }

    /// Update the stable bitrate of this layer. Called by the rate
    /// estimation machinery whenever a fresh measurement lands.
    pub fn set_last_stable_bitrate(&self, bps: u64) {
        self.last_stable_bitrate_bps.store(bps, Ordering::Relaxed);
    }
}

/// The full encoding ladder of one endpoint's camera, ordered by ascending
/// quality index.
#[derive(Debug)]
pub struct SourceTrack {
    owner: EndpointId,
    encodings: Vec<Arc<EncodingLayer>>,
}

impl SourceTrack {
    pub fn new(owner: EndpointId, encodings: Vec<Arc<EncodingLayer>>) -> Self {
        Self { owner, encodings }
    }

    #[must_use]
    pub fn owner(&self) -> &EndpointId {
        &self.owner
    }

    #[must_use]
    pub fn encodings(&self) -> &[Arc<EncodingLayer>] {
        &self.encodings
    }
}
