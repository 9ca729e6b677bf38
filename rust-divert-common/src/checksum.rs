//! Internet checksum engine.
//!
//! Implements the RFC 1071 one's-complement sum and the lazy repair pass that
//! recomputes IPv4 header and TCP/UDP checksums in place before a diverted
//! packet is handed to a consumer.

use crate::types::ChecksumFixup;

const IPV4_MIN_HEADER_LEN: usize = 20;
const IPV4_CHECKSUM_OFFSET: usize = 10;
const TCP_MIN_HEADER_LEN: usize = 20;
const TCP_CHECKSUM_OFFSET: usize = 16;
const UDP_HEADER_LEN: usize = 8;
const UDP_CHECKSUM_OFFSET: usize = 6;

const IPPROTO_TCP: u8 = 6;
const IPPROTO_UDP: u8 = 17;

/// Which checksum fields a repair pass actually rewrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairReport {
    pub ip: bool,
    pub tcp: bool,
    pub udp: bool,
}

impl RepairReport {
    pub fn any(&self) -> bool {
        self.ip || self.tcp || self.udp
    }
}

fn sum_words(data: &[u8], mut sum: u32) -> u32 {
    let mut chunks = data.chunks_exact(2);
    for word in &mut chunks {
        sum += u16::from_be_bytes([word[0], word[1]]) as u32;
    }
    // A trailing odd byte is padded with a zero on the right.
    if let [last] = chunks.remainder() {
        sum += (*last as u32) << 8;
    }
    sum
}

/// One's-complement 16-bit checksum of `pseudo` followed by `payload`.
///
/// The pseudo header is summed separately so an odd-length pseudo header
/// never shifts the alignment of the payload words.
pub fn checksum16(pseudo: &[u8], payload: &[u8]) -> u16 {
    let mut sum = sum_words(pseudo, 0);
    sum = sum_words(payload, sum);
    sum = (sum & 0xFFFF) + (sum >> 16);
    sum += sum >> 16;
    !(sum as u16)
}

/// Recompute the checksums selected by `fixup` in place.
///
/// Only IPv4 packets are touched. Each field is gated independently, and a
/// buffer too short for the relevant header leaves that field alone.
pub fn repair_checksums(packet: &mut [u8], fixup: ChecksumFixup) -> RepairReport {
    let mut report = RepairReport::default();

    if !fixup.any() || packet.len() < IPV4_MIN_HEADER_LEN || packet[0] >> 4 != 4 {
        return report;
    }

    let ip_header_len = ((packet[0] & 0x0F) as usize) * 4;
    if ip_header_len < IPV4_MIN_HEADER_LEN || packet.len() < ip_header_len {
        return report;
    }

    if fixup.ip {
        packet[IPV4_CHECKSUM_OFFSET] = 0;
        packet[IPV4_CHECKSUM_OFFSET + 1] = 0;
        let sum = checksum16(&[], &packet[..ip_header_len]);
        packet[IPV4_CHECKSUM_OFFSET..IPV4_CHECKSUM_OFFSET + 2].copy_from_slice(&sum.to_be_bytes());
        report.ip = true;
    }

    let total_len = u16::from_be_bytes([packet[2], packet[3]]) as usize;
    if total_len < ip_header_len || total_len > packet.len() {
        return report;
    }
    let trans_len = total_len - ip_header_len;

    let protocol = packet[9];
    let check_offset = match protocol {
        IPPROTO_TCP if fixup.tcp && trans_len >= TCP_MIN_HEADER_LEN => TCP_CHECKSUM_OFFSET,
        IPPROTO_UDP if fixup.udp && trans_len >= UDP_HEADER_LEN => UDP_CHECKSUM_OFFSET,
        _ => return report,
    };

    let mut pseudo = [0u8; 12];
    pseudo[0..4].copy_from_slice(&packet[12..16]);
    pseudo[4..8].copy_from_slice(&packet[16..20]);
    pseudo[9] = protocol;
    pseudo[10..12].copy_from_slice(&(trans_len as u16).to_be_bytes());

    let segment = &mut packet[ip_header_len..total_len];
    segment[check_offset] = 0;
    segment[check_offset + 1] = 0;
    let mut sum = checksum16(&pseudo, segment);
    if protocol == IPPROTO_UDP {
        if sum == 0 {
            sum = 0xFFFF;
        }
        report.udp = true;
    } else {
        report.tcp = true;
    }
    segment[check_offset..check_offset + 2].copy_from_slice(&sum.to_be_bytes());

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: ChecksumFixup = ChecksumFixup {
        ip: true,
        tcp: true,
        udp: true,
    };

    fn ipv4_header(protocol: u8, payload_len: usize) -> Vec<u8> {
        let total = (20 + payload_len) as u16;
        let mut buf = vec![
            0x45, 0x00, 0, 0, 0x1c, 0x46, 0x40, 0x00, 0x40, protocol, 0xaa, 0xbb, 192, 168, 0, 1,
            192, 168, 0, 199,
        ];
        buf[2..4].copy_from_slice(&total.to_be_bytes());
        buf
    }

    fn udp_packet(payload: &[u8]) -> Vec<u8> {
        let mut buf = ipv4_header(IPPROTO_UDP, 8 + payload.len());
        let udp_len = (8 + payload.len()) as u16;
        buf.extend_from_slice(&[0x30, 0x39, 0x00, 0x35]);
        buf.extend_from_slice(&udp_len.to_be_bytes());
        buf.extend_from_slice(&[0xde, 0xad]);
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn rfc1071_example() {
        // Worked example from RFC 1071 section 3.
        let data = [0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7];
        assert_eq!(checksum16(&[], &data), !0xddf2);
    }

    #[test]
    fn odd_byte_is_padded_on_the_right() {
        assert_eq!(checksum16(&[], &[0xab]), !0xab00);
        assert_eq!(checksum16(&[0x00, 0x01], &[0xab]), !0xab01);
    }

    #[test]
    fn ip_header_checksum_verifies_to_zero() {
        let mut pkt = ipv4_header(IPPROTO_TCP, 0);
        let report = repair_checksums(&mut pkt, ChecksumFixup { ip: true, tcp: false, udp: false });
        assert!(report.ip);
        assert_eq!(checksum16(&[], &pkt[..20]), 0);
    }

    #[test]
    fn repair_is_idempotent() {
        let mut once = udp_packet(b"hello world");
        repair_checksums(&mut once, ALL);
        let mut twice = once.clone();
        repair_checksums(&mut twice, ALL);
        assert_eq!(once, twice);
    }

    #[test]
    fn udp_zero_sum_is_sent_as_all_ones() {
        // Choose the last payload word so the segment sums to 0xFFFF, which
        // makes the complemented checksum exactly zero.
        let mut pkt = udp_packet(&[0x00, 0x00]);
        let n = pkt.len();
        let mut pseudo = [0u8; 12];
        pseudo[0..8].copy_from_slice(&pkt[12..20]);
        pseudo[9] = IPPROTO_UDP;
        pseudo[10..12].copy_from_slice(&10u16.to_be_bytes());
        pkt[26] = 0;
        pkt[27] = 0;
        let partial = !checksum16(&pseudo, &pkt[20..]);
        pkt[n - 2..].copy_from_slice(&(!partial).to_be_bytes());
        assert_eq!(checksum16(&pseudo, &pkt[20..]), 0);

        let report = repair_checksums(&mut pkt, ChecksumFixup { ip: false, tcp: false, udp: true });
        assert!(report.udp);
        assert_eq!(&pkt[26..28], &[0xFF, 0xFF]);
    }

    #[test]
    fn tcp_checksum_verifies_against_pseudo_header() {
        let mut pkt = ipv4_header(IPPROTO_TCP, 20);
        pkt.extend_from_slice(&[
            0x01, 0xbb, 0xc3, 0x50, 0, 0, 0, 1, 0, 0, 0, 0, 0x50, 0x02, 0xff, 0xff, 0x12, 0x34, 0,
            0,
        ]);
        let report = repair_checksums(&mut pkt, ChecksumFixup { ip: false, tcp: true, udp: false });
        assert_eq!(report, RepairReport { ip: false, tcp: true, udp: false });

        let mut pseudo = [0u8; 12];
        pseudo[0..8].copy_from_slice(&pkt[12..20]);
        pseudo[9] = IPPROTO_TCP;
        pseudo[10..12].copy_from_slice(&20u16.to_be_bytes());
        assert_eq!(checksum16(&pseudo, &pkt[20..]), 0);
    }

    #[test]
    fn gated_fields_are_left_alone() {
        let mut pkt = udp_packet(b"abc");
        let before = pkt.clone();
        let report = repair_checksums(&mut pkt, ChecksumFixup { ip: false, tcp: true, udp: false });
        assert!(!report.any());
        assert_eq!(pkt, before);
    }

    #[test]
    fn non_ipv4_and_short_buffers_are_noops() {
        let mut v6 = vec![0x60u8; 48];
        let before = v6.clone();
        assert!(!repair_checksums(&mut v6, ALL).any());
        assert_eq!(v6, before);

        let mut short = vec![0x45u8, 0, 0, 10];
        assert!(!repair_checksums(&mut short, ALL).any());
    }

    #[test]
    fn truncated_transport_keeps_ip_repair() {
        let mut pkt = udp_packet(b"payload");
        pkt.truncate(24);
        let report = repair_checksums(&mut pkt, ALL);
        assert!(report.ip);
        assert!(!report.udp);
    }
}
