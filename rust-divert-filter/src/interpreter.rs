//! Filter interpreter.
//!
//! Walks a [`Program`] from node 0 over a [`ParsedPacket`]. Evaluation is
//! read-only and never fails; any irregularity ends in a mismatch.

use log::trace;
use rust_divert_common::rule::{Field, Target, Test, MAX_PROGRAM_LEN};
use rust_divert_common::types::{Direction, InterfaceId};

use crate::packet::ParsedPacket;
use crate::program::Program;

/// Capture metadata visible to meta fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketMeta {
    pub direction: Direction,
    pub if_idx: InterfaceId,
    pub sub_if_idx: InterfaceId,
}

/// Parse `packet` and evaluate `program` against it.
pub fn matches(
    program: &Program,
    packet: &[u8],
    direction: Direction,
    if_idx: InterfaceId,
    sub_if_idx: InterfaceId,
) -> bool {
    let parsed = ParsedPacket::parse(packet);
    let meta = PacketMeta {
        direction,
        if_idx,
        sub_if_idx,
    };
    evaluate(program, &parsed, &meta)
}

/// Evaluate `program` against an already parsed packet.
pub fn evaluate(program: &Program, packet: &ParsedPacket, meta: &PacketMeta) -> bool {
    let mut index: u16 = 0;
    // Forward-only branches bound the walk by the program length already.
    for _ in 0..=MAX_PROGRAM_LEN {
        let Some(node) = program.node(index) else {
            return false;
        };

        let matched = match extract(node.field, packet, meta) {
            Some(value) => compare(node.test, &value, &node.arg),
            None => false,
        };
        trace!("@{} {} -> {}", index, node, matched);

        match node.next(matched) {
            Target::Accept => return true,
            Target::Reject => return false,
            Target::Node(next) => index = next,
        }
    }
    trace!("Filter step limit exceeded");
    false
}

/// Apply `test` to a field value. Ordering treats the four words as one
/// 128-bit number with word 3 most significant.
pub fn compare(test: Test, value: &[u32; 4], arg: &[u32; 4]) -> bool {
    let lhs = wide(value);
    let rhs = wide(arg);
    match test {
        Test::Eq => lhs == rhs,
        Test::Neq => lhs != rhs,
        Test::Lt => lhs < rhs,
        Test::Leq => lhs <= rhs,
        Test::Gt => lhs > rhs,
        Test::Geq => lhs >= rhs,
    }
}

fn wide(words: &[u32; 4]) -> u128 {
    (words[3] as u128) << 96 | (words[2] as u128) << 64 | (words[1] as u128) << 32 | words[0] as u128
}

fn word(value: impl Into<u32>) -> [u32; 4] {
    [value.into(), 0, 0, 0]
}

/// Read `field` out of the packet. `None` means the header the field lives
/// in is absent.
pub fn extract(field: Field, packet: &ParsedPacket, meta: &PacketMeta) -> Option<[u32; 4]> {
    use Field::*;

    let ipv4 = packet.ipv4.as_ref();
    let ipv6 = packet.ipv6.as_ref();
    let icmp = packet.icmp.as_ref();
    let icmpv6 = packet.icmpv6.as_ref();
    let tcp = packet.tcp.as_ref();
    let udp = packet.udp.as_ref();

    let value = match field {
        Zero => word(0u32),
        Inbound => word(meta.direction == Direction::Inbound),
        Outbound => word(meta.direction == Direction::Outbound),
        IfIdx => word(meta.if_idx),
        SubIfIdx => word(meta.sub_if_idx),
        Ip => word(ipv4.is_some()),
        Ipv6 => word(ipv6.is_some()),
        Icmp => word(icmp.is_some()),
        Icmpv6 => word(icmpv6.is_some()),
        Tcp => word(tcp.is_some()),
        Udp => word(udp.is_some()),

        IpHdrLength => word(ipv4?.hdr_length),
        IpTos => word(ipv4?.tos),
        IpLength => word(ipv4?.length),
        IpId => word(ipv4?.id),
        IpDf => word(ipv4?.df),
        IpMf => word(ipv4?.mf),
        IpFragOff => word(ipv4?.frag_off),
        IpTtl => word(ipv4?.ttl),
        IpProtocol => word(ipv4?.protocol),
        IpChecksum => word(ipv4?.checksum),
        IpSrcAddr => word(ipv4?.src_addr),
        IpDstAddr => word(ipv4?.dst_addr),

        Ipv6TrafficClass => word(ipv6?.traffic_class),
        Ipv6FlowLabel => word(ipv6?.flow_label),
        Ipv6Length => word(ipv6?.length),
        Ipv6NextHdr => word(ipv6?.next_hdr),
        Ipv6HopLimit => word(ipv6?.hop_limit),
        Ipv6SrcAddr => ipv6?.src_addr,
        Ipv6DstAddr => ipv6?.dst_addr,

        IcmpType => word(icmp?.icmp_type),
        IcmpCode => word(icmp?.code),
        IcmpChecksum => word(icmp?.checksum),
        IcmpBody => word(icmp?.body),

        Icmpv6Type => word(icmpv6?.icmp_type),
        Icmpv6Code => word(icmpv6?.code),
        Icmpv6Checksum => word(icmpv6?.checksum),
        Icmpv6Body => word(icmpv6?.body),

        TcpSrcPort => word(tcp?.src_port),
        TcpDstPort => word(tcp?.dst_port),
        TcpSeqNum => word(tcp?.seq_num),
        TcpAckNum => word(tcp?.ack_num),
        TcpHdrLength => word(tcp?.hdr_length),
        TcpUrg => word(tcp?.urg),
        TcpAck => word(tcp?.ack),
        TcpPsh => word(tcp?.psh),
        TcpRst => word(tcp?.rst),
        TcpSyn => word(tcp?.syn),
        TcpFin => word(tcp?.fin),
        TcpWindow => word(tcp?.window),
        TcpChecksum => word(tcp?.checksum),
        TcpUrgPtr => word(tcp?.urg_ptr),
        TcpPayloadLength => word(packet.tcp_payload_len()? as u32),

        UdpSrcPort => word(udp?.src_port),
        UdpDstPort => word(udp?.dst_port),
        UdpLength => word(udp?.length),
        UdpChecksum => word(udp?.checksum),
        UdpPayloadLength => word(packet.udp_payload_len()? as u32),
    };
    Some(value)
}
