//! Per-packet admission filter
//!
//! Stateless gate in front of the destination: a media packet is forwarded
//! only if its SSRC resolves to a routed source controller and that
//! controller accepts it. Unknown sources are dropped by default, so nothing
//! is forwarded without a prior allocation.

use crate::routing::RoutingTable;
use crate::rtp;
use std::sync::Arc;

#[derive(Clone)]
pub struct AdmissionFilter {
    routes: Arc<RoutingTable>,
}

impl AdmissionFilter {
    pub(crate) fn new(routes: Arc<RoutingTable>) -> Self {
        Self { routes }
    }

    /// Whether `packet` may be written towards the destination.
    #[must_use]
    pub fn accept(&self, packet: &[u8]) -> bool {
        let Some(ssrc) = rtp::rtp_ssrc(packet) else {
            return false;
        };
        match self.routes.lookup(ssrc) {
            Some(controller) => controller.accept(packet),
            None => false,
        }
    }
}
