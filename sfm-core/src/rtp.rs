//! Minimal RTP/RTCP header inspection (RFC 3550)
//!
//! The core never parses payloads; it only needs the protocol version, the
//! packet type split of RFC 5761, and the SSRC fields.

/// Fixed RTP header length (no CSRCs, no extension)
pub const RTP_HEADER_LEN: usize = 12;

/// Smallest RTCP packet carrying a sender SSRC
pub const RTCP_MIN_LEN: usize = 8;

const RTCP_PT_MIN: u8 = 200;
const RTCP_PT_MAX: u8 = 211;

fn version(buf: &[u8]) -> u8 {
    buf[0] >> 6
}

fn is_rtcp_packet_type(b: u8) -> bool {
    (RTCP_PT_MIN..=RTCP_PT_MAX).contains(&b)
}

/// Whether `buf` looks like a media (RTP) packet.
#[must_use]
pub fn is_rtp(buf: &[u8]) -> bool {
    buf.len() >= RTP_HEADER_LEN && version(buf) == 2 && !is_rtcp_packet_type(buf[1])
}

/// Whether `buf` looks like a control (RTCP) packet.
#[must_use]
pub fn is_rtcp(buf: &[u8]) -> bool {
    buf.len() >= RTCP_MIN_LEN && version(buf) == 2 && is_rtcp_packet_type(buf[1])
}

/// SSRC of a media packet (header offset 8, big-endian).
#[must_use]
pub fn rtp_ssrc(buf: &[u8]) -> Option<u32> {
    if buf.len() < RTP_HEADER_LEN {
        return None;
    }
    Some(u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]))
}

/// Sender SSRC of a control packet (header offset 4, big-endian).
#[must_use]
pub fn rtcp_sender_ssrc(buf: &[u8]) -> Option<u32> {
    if buf.len() < RTCP_MIN_LEN {
        return None;
    }
    Some(u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{rtcp_packet, rtp_packet};

    #[test]
    fn test_rtp_predicate_and_ssrc() {
        let pkt = rtp_packet(0xDEAD_BEEF, 7);
        assert!(is_rtp(&pkt));
        assert!(!is_rtcp(&pkt));
        assert_eq!(rtp_ssrc(&pkt), Some(0xDEAD_BEEF));
    }

    #[test]
    fn test_rtcp_predicate_and_sender_ssrc() {
        let pkt = rtcp_packet(0xCAFE_F00D);
        assert!(is_rtcp(&pkt));
        assert!(!is_rtp(&pkt));
        assert_eq!(rtcp_sender_ssrc(&pkt), Some(0xCAFE_F00D));
    }

    #[test]
    fn test_truncated_packets_rejected() {
        assert!(!is_rtp(&[0x80, 96, 0, 1]));
        assert!(!is_rtcp(&[0x80, 200]));
        assert_eq!(rtp_ssrc(&[0u8; 11]), None);
        assert_eq!(rtcp_sender_ssrc(&[0u8; 7]), None);
    }

    #[test]
    fn test_wrong_version_rejected() {
        let mut pkt = rtp_packet(1, 0).to_vec();
        pkt[0] = 0x40; // version 1
        assert!(!is_rtp(&pkt));
    }
}
