//! Raw packet builders shared by the integration tests.

#![allow(dead_code)]

use std::net::{Ipv4Addr, Ipv6Addr};

pub const PROTO_ICMP: u8 = 1;
pub const PROTO_TCP: u8 = 6;
pub const PROTO_UDP: u8 = 17;
pub const PROTO_ICMPV6: u8 = 58;

/// Builder for IPv4/IPv6 packets carrying TCP, UDP or ICMP.
#[derive(Debug, Clone)]
pub struct PacketBuilder {
    ip_version: u8,
    l4_proto: u8,
    src_ipv4: Ipv4Addr,
    dst_ipv4: Ipv4Addr,
    src_ipv6: Ipv6Addr,
    dst_ipv6: Ipv6Addr,
    src_port: u16,
    dst_port: u16,
    ttl: u8,
    tcp_flags: u8,
    payload: Vec<u8>,
}

impl PacketBuilder {
    pub fn ipv4(l4_proto: u8) -> Self {
        Self {
            ip_version: 4,
            l4_proto,
            src_ipv4: Ipv4Addr::new(10, 0, 0, 1),
            dst_ipv4: Ipv4Addr::new(93, 184, 216, 34),
            src_ipv6: Ipv6Addr::LOCALHOST,
            dst_ipv6: Ipv6Addr::LOCALHOST,
            src_port: 50000,
            dst_port: 443,
            ttl: 64,
            tcp_flags: 0x02,
            payload: Vec::new(),
        }
    }

    pub fn ipv6(l4_proto: u8) -> Self {
        Self {
            ip_version: 6,
            src_ipv6: "2001:db8::1".parse().unwrap(),
            dst_ipv6: "2001:db8::2".parse().unwrap(),
            ..Self::ipv4(l4_proto)
        }
    }

    pub fn src_v4(mut self, addr: Ipv4Addr) -> Self {
        self.src_ipv4 = addr;
        self
    }

    pub fn dst_v6(mut self, addr: Ipv6Addr) -> Self {
        self.dst_ipv6 = addr;
        self
    }

    pub fn dst_port(mut self, port: u16) -> Self {
        self.dst_port = port;
        self
    }

    pub fn ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn tcp_flags(mut self, flags: u8) -> Self {
        self.tcp_flags = flags;
        self
    }

    pub fn payload(mut self, payload: &[u8]) -> Self {
        self.payload = payload.to_vec();
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let l4 = self.build_l4();
        let mut pkt = Vec::new();
        match self.ip_version {
            4 => {
                let total_len = (20 + l4.len()) as u16;
                pkt.push(0x45);
                pkt.push(0x00);
                pkt.extend_from_slice(&total_len.to_be_bytes());
                pkt.extend_from_slice(&0x1c46u16.to_be_bytes());
                pkt.extend_from_slice(&0x4000u16.to_be_bytes());
                pkt.push(self.ttl);
                pkt.push(self.l4_proto);
                pkt.extend_from_slice(&0u16.to_be_bytes());
                pkt.extend_from_slice(&self.src_ipv4.octets());
                pkt.extend_from_slice(&self.dst_ipv4.octets());
            }
            _ => {
                pkt.extend_from_slice(&[0x60, 0x00, 0x00, 0x00]);
                pkt.extend_from_slice(&(l4.len() as u16).to_be_bytes());
                pkt.push(self.l4_proto);
                pkt.push(self.ttl);
                pkt.extend_from_slice(&self.src_ipv6.octets());
                pkt.extend_from_slice(&self.dst_ipv6.octets());
            }
        }
        pkt.extend_from_slice(&l4);
        pkt
    }

    fn build_l4(&self) -> Vec<u8> {
        let mut l4 = Vec::new();
        match self.l4_proto {
            PROTO_TCP => {
                l4.extend_from_slice(&self.src_port.to_be_bytes());
                l4.extend_from_slice(&self.dst_port.to_be_bytes());
                l4.extend_from_slice(&1u32.to_be_bytes());
                l4.extend_from_slice(&0u32.to_be_bytes());
                l4.push(0x50);
                l4.push(self.tcp_flags);
                l4.extend_from_slice(&65535u16.to_be_bytes());
                l4.extend_from_slice(&0u16.to_be_bytes());
                l4.extend_from_slice(&0u16.to_be_bytes());
            }
            PROTO_UDP => {
                l4.extend_from_slice(&self.src_port.to_be_bytes());
                l4.extend_from_slice(&self.dst_port.to_be_bytes());
                l4.extend_from_slice(&((8 + self.payload.len()) as u16).to_be_bytes());
                l4.extend_from_slice(&0u16.to_be_bytes());
            }
            PROTO_ICMP | PROTO_ICMPV6 => {
                // Echo request, id 1 seq 1.
                l4.extend_from_slice(&[8, 0, 0, 0, 0, 1, 0, 1]);
            }
            _ => {}
        }
        l4.extend_from_slice(&self.payload);
        l4
    }
}
