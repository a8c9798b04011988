//! Test fixtures and mock collaborators
//!
//! Shared by the unit tests, the integration suites and the benches:
//! in-memory implementations of every collaborator trait, packet builders
//! and a canonical simulcast ladder.

use crate::config::BitrateConfig;
use crate::controller::{BitrateController, CoreHandle};
use crate::error::{Error, Result};
use crate::track::{EncodingLayer, SourceTrack};
use crate::traits::{
    BandwidthEstimator, ChangeNotifier, ConferenceContext, Endpoint, SourceController,
    SourceControllerFactory, Transport,
};
use crate::types::EndpointId;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Build a media packet with the given SSRC (fixed RTP header, no payload
/// semantics).
#[must_use]
pub fn rtp_packet(ssrc: u32, sequence_number: u16) -> Bytes {
    let mut buf = vec![0u8; 20];
    buf[0] = 0x80; // version 2
    buf[1] = 96; // dynamic payload type
    buf[2..4].copy_from_slice(&sequence_number.to_be_bytes());
    buf[8..12].copy_from_slice(&ssrc.to_be_bytes());
    Bytes::from(buf)
}

/// Build a minimal receiver report with the given sender SSRC.
#[must_use]
pub fn rtcp_packet(sender_ssrc: u32) -> Bytes {
    let mut buf = vec![0u8; 8];
    buf[0] = 0x80; // version 2
    buf[1] = 201; // receiver report
    buf[2..4].copy_from_slice(&1u16.to_be_bytes()); // length
    buf[4..8].copy_from_slice(&sender_ssrc.to_be_bytes());
    Bytes::from(buf)
}

/// The canonical five-layer ladder used throughout the tests:
/// 180p at 7.5/15/30 fps, 360p30 and 720p30.
///
/// Layer `i` uses primary SSRC `base_ssrc + 2 * i` and retransmission SSRC
/// `base_ssrc + 2 * i + 1`.
#[must_use]
pub fn simulcast_ladder(owner: &str, base_ssrc: u32) -> Arc<SourceTrack> {
    let shape: [(i32, f64, u64); 5] = [
        (180, 7.5, 50_000),
        (180, 15.0, 150_000),
        (180, 30.0, 300_000),
        (360, 30.0, 700_000),
        (720, 30.0, 2_500_000),
    ];
    let encodings = shape
        .iter()
        .enumerate()
        .map(|(i, &(height, frame_rate, bps))| {
            let primary = base_ssrc + 2 * i as u32;
            Arc::new(EncodingLayer::new(
                i as i32,
                height,
                frame_rate,
                primary,
                Some(primary + 1),
                bps,
            ))
        })
        .collect();
    Arc::new(SourceTrack::new(owner.into(), encodings))
}

/// In-memory [`Endpoint`] with interior mutability so tests can reshape the
/// conference between update cycles.
pub struct MockEndpoint {
    id: EndpointId,
    expired: AtomicBool,
    selected: RwLock<HashSet<EndpointId>>,
    pinned: RwLock<HashSet<EndpointId>>,
    last_n: AtomicI32,
    max_frame_height: AtomicI32,
    tracks: RwLock<Vec<Arc<SourceTrack>>>,
}

impl MockEndpoint {
    #[must_use]
    pub fn new(id: &str) -> Self {
        Self {
            id: id.into(),
            expired: AtomicBool::new(false),
            selected: RwLock::new(HashSet::new()),
            pinned: RwLock::new(HashSet::new()),
            last_n: AtomicI32::new(-1),
            max_frame_height: AtomicI32::new(720),
            tracks: RwLock::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn with_track(self, track: Arc<SourceTrack>) -> Self {
        self.tracks.write().push(track);
        self
    }

    #[must_use]
    pub fn with_selected<'a>(self, ids: impl IntoIterator<Item = &'a str>) -> Self {
        *self.selected.write() = ids.into_iter().map(EndpointId::from).collect();
        self
    }

    #[must_use]
    pub fn with_pinned<'a>(self, ids: impl IntoIterator<Item = &'a str>) -> Self {
        *self.pinned.write() = ids.into_iter().map(EndpointId::from).collect();
        self
    }

    #[must_use]
    pub fn with_last_n(self, last_n: i32) -> Self {
        self.last_n.store(last_n, Ordering::Relaxed);
        self
    }

    #[must_use]
    pub fn with_max_frame_height(self, height: i32) -> Self {
        self.max_frame_height.store(height, Ordering::Relaxed);
        self
    }

    #[must_use]
    pub fn expired(self) -> Self {
        self.expired.store(true, Ordering::Relaxed);
        self
    }

    pub fn set_expired(&self, expired: bool) {
        self.expired.store(expired, Ordering::Relaxed);
    }

    pub fn set_selected<'a>(&self, ids: impl IntoIterator<Item = &'a str>) {
        *self.selected.write() = ids.into_iter().map(EndpointId::from).collect();
    }

    pub fn set_pinned<'a>(&self, ids: impl IntoIterator<Item = &'a str>) {
        *self.pinned.write() = ids.into_iter().map(EndpointId::from).collect();
    }

    pub fn set_last_n(&self, last_n: i32) {
        self.last_n.store(last_n, Ordering::Relaxed);
    }
}

impl Endpoint for MockEndpoint {
    fn id(&self) -> EndpointId {
        self.id.clone()
    }

    fn is_expired(&self) -> bool {
        self.expired.load(Ordering::Relaxed)
    }

    fn selected_endpoint_ids(&self) -> HashSet<EndpointId> {
        self.selected.read().clone()
    }

    fn pinned_endpoint_ids(&self) -> HashSet<EndpointId> {
        self.pinned.read().clone()
    }

    fn last_n(&self) -> i32 {
        self.last_n.load(Ordering::Relaxed)
    }

    fn max_frame_height(&self) -> i32 {
        self.max_frame_height.load(Ordering::Relaxed)
    }

    fn video_tracks(&self) -> Vec<Arc<SourceTrack>> {
        self.tracks.read().clone()
    }
}

/// Conference with a mutable dominant-speaker order.
pub struct MockConference {
    endpoints: RwLock<Vec<Arc<dyn Endpoint>>>,
}

impl MockConference {
    #[must_use]
    pub fn new() -> Self {
        Self {
            endpoints: RwLock::new(Vec::new()),
        }
    }

    pub fn add(&self, endpoint: Arc<dyn Endpoint>) {
        self.endpoints.write().push(endpoint);
    }

    pub fn insert(&self, index: usize, endpoint: Arc<dyn Endpoint>) {
        self.endpoints.write().insert(index, endpoint);
    }

    pub fn set_endpoints(&self, endpoints: Vec<Arc<dyn Endpoint>>) {
        *self.endpoints.write() = endpoints;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.endpoints.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.endpoints.read().is_empty()
    }
}

impl Default for MockConference {
    fn default() -> Self {
        Self::new()
    }
}

impl ConferenceContext for MockConference {
    fn endpoints_by_dominant_speaker(&self) -> Vec<Arc<dyn Endpoint>> {
        self.endpoints.read().clone()
    }
}

pub struct MockTransport {
    supports_retransmission: AtomicBool,
}

impl MockTransport {
    #[must_use]
    pub fn new() -> Self {
        Self {
            supports_retransmission: AtomicBool::new(true),
        }
    }

    pub fn set_supports_retransmission(&self, supported: bool) {
        self.supports_retransmission
            .store(supported, Ordering::Relaxed);
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MockTransport {
    fn supports_retransmission(&self) -> bool {
        self.supports_retransmission.load(Ordering::Relaxed)
    }
}

pub struct MockEstimator {
    estimate: RwLock<Option<u64>>,
}

impl MockEstimator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            estimate: RwLock::new(None),
        }
    }

    pub fn set_estimate(&self, estimate: Option<u64>) {
        *self.estimate.write() = estimate;
    }
}

impl Default for MockEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl BandwidthEstimator for MockEstimator {
    fn latest_estimate(&self) -> Option<u64> {
        *self.estimate.read()
    }
}

/// One forwarded-set change notification, as observed by the signalling
/// side.
#[derive(Debug, Clone)]
pub struct ForwardedChange {
    pub new_endpoints: HashSet<EndpointId>,
    pub entering_endpoints: HashSet<EndpointId>,
    pub conference_endpoints: HashSet<EndpointId>,
}

pub struct RecordingNotifier {
    events: Mutex<Vec<ForwardedChange>>,
}

impl RecordingNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn events(&self) -> Vec<ForwardedChange> {
        self.events.lock().clone()
    }
}

impl Default for RecordingNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeNotifier for RecordingNotifier {
    fn on_forwarded_endpoints_changed(
        &self,
        new_endpoints: &HashSet<EndpointId>,
        entering_endpoints: &HashSet<EndpointId>,
        conference_endpoints: &HashSet<EndpointId>,
    ) {
        self.events.lock().push(ForwardedChange {
            new_endpoints: new_endpoints.clone(),
            entering_endpoints: entering_endpoints.clone(),
            conference_endpoints: conference_endpoints.clone(),
        });
    }
}

/// Scriptable [`SourceController`] that records how the core steers it.
pub struct MockSourceController {
    track: Arc<SourceTrack>,
    target_index: AtomicI32,
    optimal_index: AtomicI32,
    current_index: AtomicI32,
    accepting: AtomicBool,
    consume_media: AtomicBool,
    extra_packets: AtomicUsize,
    fail_close: AtomicBool,
    close_calls: AtomicU64,
    rtcp_calls: AtomicU64,
}

impl MockSourceController {
    #[must_use]
    pub fn new(track: Arc<SourceTrack>) -> Self {
        Self {
            track,
            target_index: AtomicI32::new(-1),
            optimal_index: AtomicI32::new(-1),
            current_index: AtomicI32::new(-1),
            accepting: AtomicBool::new(true),
            consume_media: AtomicBool::new(false),
            extra_packets: AtomicUsize::new(0),
            fail_close: AtomicBool::new(false),
            close_calls: AtomicU64::new(0),
            rtcp_calls: AtomicU64::new(0),
        }
    }

    pub fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::Relaxed);
    }

    /// Make the media transform consume packets instead of forwarding them.
    pub fn set_consume_media(&self, consume: bool) {
        self.consume_media.store(consume, Ordering::Relaxed);
    }

    /// Make the media transform inject `count` extra packets per input.
    pub fn set_extra_packets(&self, count: usize) {
        self.extra_packets.store(count, Ordering::Relaxed);
    }

    pub fn fail_close(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::Relaxed);
    }

    pub fn set_current_index(&self, index: i32) {
        self.current_index.store(index, Ordering::Relaxed);
    }

    #[must_use]
    pub fn target_index(&self) -> i32 {
        self.target_index.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn optimal_index(&self) -> i32 {
        self.optimal_index.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn close_calls(&self) -> u64 {
        self.close_calls.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn rtcp_calls(&self) -> u64 {
        self.rtcp_calls.load(Ordering::Relaxed)
    }
}

impl SourceController for MockSourceController {
    fn accept(&self, _packet: &[u8]) -> bool {
        self.accepting.load(Ordering::Relaxed)
    }

    fn rtp_transform(&self, packet: Bytes) -> Vec<Bytes> {
        if self.consume_media.load(Ordering::Relaxed) {
            return Vec::new();
        }
        let extras = self.extra_packets.load(Ordering::Relaxed);
        let mut out = vec![packet.clone()];
        out.extend(std::iter::repeat_with(|| packet.clone()).take(extras));
        out
    }

    fn rtcp_transform(&self, packet: Bytes) -> Bytes {
        self.rtcp_calls.fetch_add(1, Ordering::Relaxed);
        packet
    }

    fn set_target_index(&self, index: i32) {
        self.target_index.store(index, Ordering::Relaxed);
    }

    fn set_optimal_index(&self, index: i32) {
        self.optimal_index.store(index, Ordering::Relaxed);
    }

    fn current_index(&self) -> i32 {
        self.current_index.load(Ordering::Relaxed)
    }

    fn source(&self) -> Arc<SourceTrack> {
        Arc::clone(&self.track)
    }

    fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::Relaxed);
        if self.fail_close.load(Ordering::Relaxed) {
            Err(Error::ControllerClose("scripted failure".to_string()))
        } else {
            Ok(())
        }
    }
}

/// Factory that hands out [`MockSourceController`]s and remembers them in
/// creation order.
pub struct MockControllerFactory {
    created: Mutex<Vec<Arc<MockSourceController>>>,
}

impl MockControllerFactory {
    #[must_use]
    pub fn new() -> Self {
        Self {
            created: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn created(&self) -> Vec<Arc<MockSourceController>> {
        self.created.lock().clone()
    }

    /// Target indices of every created controller, in creation order.
    #[must_use]
    pub fn target_indices(&self) -> Vec<i32> {
        self.created
            .lock()
            .iter()
            .map(|controller| controller.target_index())
            .collect()
    }
}

impl Default for MockControllerFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceControllerFactory for MockControllerFactory {
    fn create(&self, _core: CoreHandle, track: Arc<SourceTrack>) -> Arc<dyn SourceController> {
        let controller = Arc::new(MockSourceController::new(track));
        self.created.lock().push(Arc::clone(&controller));
        controller
    }
}

/// A fully wired controller plus handles on all of its mock collaborators.
///
/// The conference starts with just the destination endpoint in it; use
/// [`ControllerHarness::add_source`] to grow it.
pub struct ControllerHarness {
    pub controller: BitrateController,
    pub dest: Arc<MockEndpoint>,
    pub conference: Arc<MockConference>,
    pub transport: Arc<MockTransport>,
    pub estimator: Arc<MockEstimator>,
    pub notifier: Arc<RecordingNotifier>,
    pub factory: Arc<MockControllerFactory>,
}

impl ControllerHarness {
    /// Add a source endpoint carrying the canonical ladder, ahead of the
    /// destination in speaker order.
    pub fn add_source(&self, id: &str, base_ssrc: u32) -> Arc<MockEndpoint> {
        let endpoint = Arc::new(MockEndpoint::new(id).with_track(simulcast_ladder(id, base_ssrc)));
        let index = self.conference.len() - 1;
        self.conference.insert(index, Arc::clone(&endpoint) as Arc<dyn Endpoint>);
        endpoint
    }
}

/// Wire a [`BitrateController`] to fresh mocks.
#[must_use]
pub fn controller_harness(config: BitrateConfig) -> ControllerHarness {
    let dest = Arc::new(MockEndpoint::new("dest"));
    let conference = Arc::new(MockConference::new());
    conference.add(Arc::clone(&dest) as Arc<dyn Endpoint>);
    let transport = Arc::new(MockTransport::new());
    let estimator = Arc::new(MockEstimator::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let factory = Arc::new(MockControllerFactory::new());

    let controller = BitrateController::new(
        config,
        Arc::clone(&dest) as Arc<dyn Endpoint>,
        Arc::clone(&conference) as Arc<dyn ConferenceContext>,
        Arc::clone(&transport) as Arc<dyn Transport>,
        Some(Arc::clone(&estimator) as Arc<dyn BandwidthEstimator>),
        Arc::clone(&notifier) as Arc<dyn ChangeNotifier>,
        Arc::clone(&factory) as Arc<dyn SourceControllerFactory>,
    )
    .expect("harness config must be valid");

    ControllerHarness {
        controller,
        dest,
        conference,
        transport,
        estimator,
        notifier,
        factory,
    }
}
