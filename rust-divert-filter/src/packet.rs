//! Bounds-checked packet header parser.
//!
//! Each header is either absent or fully present. A header whose length
//! fields disagree with the buffer is treated as absent, which makes every
//! test against it mismatch; parsing itself never fails.

/* ---------------------------------------------------------------- *
 * Constants
 * ---------------------------------------------------------------- */

const IPV4_MIN_HLEN: usize = 20;
const IPV6_HLEN: usize = 40;
const ICMP_HLEN: usize = 8;
const TCP_MIN_HLEN: usize = 20;
const UDP_HLEN: usize = 8;

const PROTO_ICMP: u8 = 1;
const PROTO_TCP: u8 = 6;
const PROTO_UDP: u8 = 17;
const PROTO_ICMPV6: u8 = 58;

fn be16(buf: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([buf[offset], buf[offset + 1]])
}

fn be32(buf: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

/* ---------------------------------------------------------------- *
 * Header views
 * ---------------------------------------------------------------- */

/// IPv4 header fields in host order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Header {
    pub hdr_length: u8,
    pub tos: u8,
    pub length: u16,
    pub id: u16,
    pub df: bool,
    pub mf: bool,
    pub frag_off: u16,
    pub ttl: u8,
    pub protocol: u8,
    pub checksum: u16,
    pub src_addr: u32,
    pub dst_addr: u32,
}

impl Ipv4Header {
    fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < IPV4_MIN_HLEN || buf[0] >> 4 != 4 {
            return None;
        }
        let hdr_length = buf[0] & 0x0F;
        let length = be16(buf, 2);
        if hdr_length < 5 || hdr_length as usize * 4 > buf.len() || length as usize != buf.len() {
            return None;
        }
        let flags_frag = be16(buf, 6);
        Some(Self {
            hdr_length,
            tos: buf[1],
            length,
            id: be16(buf, 4),
            df: flags_frag & 0x4000 != 0,
            mf: flags_frag & 0x2000 != 0,
            frag_off: flags_frag & 0x1FFF,
            ttl: buf[8],
            protocol: buf[9],
            checksum: be16(buf, 10),
            src_addr: be32(buf, 12),
            dst_addr: be32(buf, 16),
        })
    }

    pub fn header_len(&self) -> usize {
        self.hdr_length as usize * 4
    }
}

/// IPv6 fixed header fields in host order. Addresses are kept as four
/// words with word 0 holding the last four octets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv6Header {
    pub traffic_class: u8,
    pub flow_label: u32,
    pub length: u16,
    pub next_hdr: u8,
    pub hop_limit: u8,
    pub src_addr: [u32; 4],
    pub dst_addr: [u32; 4],
}

impl Ipv6Header {
    fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < IPV6_HLEN || buf[0] >> 4 != 6 {
            return None;
        }
        let length = be16(buf, 4);
        if length as usize + IPV6_HLEN != buf.len() {
            return None;
        }
        Some(Self {
            traffic_class: ((buf[0] & 0x0F) << 4) | (buf[1] >> 4),
            flow_label: ((buf[1] as u32 & 0x0F) << 16) | (be16(buf, 2) as u32),
            length,
            next_hdr: buf[6],
            hop_limit: buf[7],
            src_addr: address_words(&buf[8..24]),
            dst_addr: address_words(&buf[24..40]),
        })
    }
}

fn address_words(octets: &[u8]) -> [u32; 4] {
    [
        be32(octets, 12),
        be32(octets, 8),
        be32(octets, 4),
        be32(octets, 0),
    ]
}

/// ICMP and ICMPv6 share the same leading layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IcmpHeader {
    pub icmp_type: u8,
    pub code: u8,
    pub checksum: u16,
    pub body: u32,
}

impl IcmpHeader {
    fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < ICMP_HLEN {
            return None;
        }
        Some(Self {
            icmp_type: buf[0],
            code: buf[1],
            checksum: be16(buf, 2),
            body: be32(buf, 4),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq_num: u32,
    pub ack_num: u32,
    pub hdr_length: u8,
    pub urg: bool,
    pub ack: bool,
    pub psh: bool,
    pub rst: bool,
    pub syn: bool,
    pub fin: bool,
    pub window: u16,
    pub checksum: u16,
    pub urg_ptr: u16,
}

impl TcpHeader {
    fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < TCP_MIN_HLEN {
            return None;
        }
        let hdr_length = buf[12] >> 4;
        if hdr_length < 5 || hdr_length as usize * 4 > buf.len() {
            return None;
        }
        let flags = buf[13];
        Some(Self {
            src_port: be16(buf, 0),
            dst_port: be16(buf, 2),
            seq_num: be32(buf, 4),
            ack_num: be32(buf, 8),
            hdr_length,
            urg: flags & 0x20 != 0,
            ack: flags & 0x10 != 0,
            psh: flags & 0x08 != 0,
            rst: flags & 0x04 != 0,
            syn: flags & 0x02 != 0,
            fin: flags & 0x01 != 0,
            window: be16(buf, 14),
            checksum: be16(buf, 16),
            urg_ptr: be16(buf, 18),
        })
    }

    pub fn header_len(&self) -> usize {
        self.hdr_length as usize * 4
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub length: u16,
    pub checksum: u16,
}

impl UdpHeader {
    fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < UDP_HLEN {
            return None;
        }
        Some(Self {
            src_port: be16(buf, 0),
            dst_port: be16(buf, 2),
            length: be16(buf, 4),
            checksum: be16(buf, 6),
        })
    }
}

/* ---------------------------------------------------------------- *
 * Parsed packet
 * ---------------------------------------------------------------- */

/// Headers found in one packet buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedPacket {
    pub ipv4: Option<Ipv4Header>,
    pub ipv6: Option<Ipv6Header>,
    pub icmp: Option<IcmpHeader>,
    pub icmpv6: Option<IcmpHeader>,
    pub tcp: Option<TcpHeader>,
    pub udp: Option<UdpHeader>,
    /// Total buffer length.
    pub total_len: usize,
    /// Length of the IP header, zero when no IP header is present.
    pub ip_header_len: usize,
}

impl ParsedPacket {
    pub fn parse(buf: &[u8]) -> Self {
        let mut packet = ParsedPacket {
            total_len: buf.len(),
            ..Default::default()
        };

        let protocol = match buf.first().map(|b| b >> 4) {
            Some(4) => match Ipv4Header::parse(buf) {
                Some(ip) => {
                    packet.ip_header_len = ip.header_len();
                    packet.ipv4 = Some(ip);
                    ip.protocol
                }
                None => return packet,
            },
            Some(6) => match Ipv6Header::parse(buf) {
                Some(ip) => {
                    packet.ip_header_len = IPV6_HLEN;
                    packet.ipv6 = Some(ip);
                    ip.next_hdr
                }
                None => return packet,
            },
            _ => return packet,
        };

        let transport = &buf[packet.ip_header_len..];
        match protocol {
            PROTO_ICMP if packet.ipv4.is_some() => packet.icmp = IcmpHeader::parse(transport),
            PROTO_ICMPV6 if packet.ipv6.is_some() => packet.icmpv6 = IcmpHeader::parse(transport),
            PROTO_TCP => packet.tcp = TcpHeader::parse(transport),
            PROTO_UDP => packet.udp = UdpHeader::parse(transport),
            _ => {}
        }

        packet
    }

    /// Bytes after the TCP header.
    pub fn tcp_payload_len(&self) -> Option<usize> {
        self.tcp
            .map(|tcp| self.total_len - self.ip_header_len - tcp.header_len())
    }

    /// Bytes after the UDP header.
    pub fn udp_payload_len(&self) -> Option<usize> {
        self.udp
            .map(|_| self.total_len - self.ip_header_len - UDP_HLEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ipv4_tcp(dst_port: u16, payload: usize) -> Vec<u8> {
        let total = (40 + payload) as u16;
        let mut pkt = vec![0x45, 0x10, 0, 0, 0x12, 0x34, 0x40, 0x00, 64, PROTO_TCP, 0, 0];
        pkt[2..4].copy_from_slice(&total.to_be_bytes());
        pkt.extend_from_slice(&[10, 0, 0, 1, 10, 0, 0, 2]);
        pkt.extend_from_slice(&[0xc3, 0x50]);
        pkt.extend_from_slice(&dst_port.to_be_bytes());
        pkt.extend_from_slice(&[0, 0, 0, 1, 0, 0, 0, 0, 0x50, 0x12, 0xff, 0xff, 0, 0, 0, 0]);
        pkt.resize(total as usize, 0xAA);
        pkt
    }

    #[test]
    fn parses_ipv4_tcp() {
        let pkt = ipv4_tcp(443, 5);
        let parsed = ParsedPacket::parse(&pkt);
        let ip = parsed.ipv4.unwrap();
        assert_eq!(ip.tos, 0x10);
        assert_eq!(ip.id, 0x1234);
        assert!(ip.df);
        assert!(!ip.mf);
        assert_eq!(ip.src_addr, 0x0a00_0001);
        let tcp = parsed.tcp.unwrap();
        assert_eq!(tcp.dst_port, 443);
        assert!(tcp.syn && tcp.ack && !tcp.fin);
        assert_eq!(parsed.tcp_payload_len(), Some(5));
        assert!(parsed.udp.is_none() && parsed.ipv6.is_none());
    }

    #[test]
    fn length_mismatch_means_no_headers() {
        let mut pkt = ipv4_tcp(80, 0);
        pkt.push(0);
        let parsed = ParsedPacket::parse(&pkt);
        assert!(parsed.ipv4.is_none());
        assert!(parsed.tcp.is_none());
    }

    #[test]
    fn bad_tcp_offset_keeps_ip() {
        let mut pkt = ipv4_tcp(80, 0);
        pkt[32] = 0x40; // data offset 4
        let parsed = ParsedPacket::parse(&pkt);
        assert!(parsed.ipv4.is_some());
        assert!(parsed.tcp.is_none());

        pkt[32] = 0xF0; // data offset 15, does not fit
        assert!(ParsedPacket::parse(&pkt).tcp.is_none());
    }

    #[test]
    fn parses_ipv6_words_and_flow_label() {
        let mut pkt = vec![0x6a, 0xbc, 0xde, 0xf0, 0, 8, PROTO_UDP, 32];
        pkt.extend_from_slice(&[0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]);
        pkt.extend_from_slice(&[0xfe, 0x80, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2]);
        pkt.extend_from_slice(&[0, 53, 0, 53, 0, 8, 0, 0]);
        let parsed = ParsedPacket::parse(&pkt);
        let ip = parsed.ipv6.unwrap();
        assert_eq!(ip.traffic_class, 0xab);
        assert_eq!(ip.flow_label, 0xc_def0);
        assert_eq!(ip.src_addr, [1, 0, 0, 0x2001_0db8]);
        assert_eq!(ip.dst_addr[3], 0xfe80_0000);
        assert_eq!(parsed.udp.unwrap().dst_port, 53);
        assert_eq!(parsed.udp_payload_len(), Some(0));
    }

    #[test]
    fn icmp_needs_matching_ip_version() {
        // IPv6 carrying protocol 1 is not ICMP.
        let mut pkt = vec![0x60, 0, 0, 0, 0, 8, PROTO_ICMP, 64];
        pkt.extend_from_slice(&[0u8; 32]);
        pkt.extend_from_slice(&[8, 0, 0, 0, 0, 0, 0, 0]);
        let parsed = ParsedPacket::parse(&pkt);
        assert!(parsed.ipv6.is_some());
        assert!(parsed.icmp.is_none());
        assert!(parsed.icmpv6.is_none());
    }

    #[test]
    fn garbage_is_empty() {
        assert_eq!(ParsedPacket::parse(&[]).ipv4, None);
        let parsed = ParsedPacket::parse(&[0x45, 0, 0, 4]);
        assert!(parsed.ipv4.is_none() && parsed.ipv6.is_none());
    }
}
