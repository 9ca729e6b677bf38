//! Filter rule wire format.
//!
//! A filter arrives as a flat list of fixed-size rule records. Each record is
//! one comparison step: a packet field, a test, a 128-bit argument and two
//! continuations. This module defines the enumerations those records refer
//! to and the little-endian encoding of the records themselves.

use crate::error::Error;
use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;

/* ---------------------------------------------------------------- *
 * Program limits and terminal sentinels
 * ---------------------------------------------------------------- */

/// Upper bound on the number of nodes in a program (exclusive).
pub const MAX_PROGRAM_LEN: u16 = 256;

/// Continuation value meaning "the packet matches".
pub const RESULT_ACCEPT: u16 = MAX_PROGRAM_LEN + 1;

/// Continuation value meaning "the packet does not match".
pub const RESULT_REJECT: u16 = MAX_PROGRAM_LEN + 2;

/// Size in bytes of one encoded rule record.
pub const RULE_RECORD_SIZE: usize = 24;

/* ---------------------------------------------------------------- *
 * Protocol tags
 * ---------------------------------------------------------------- */

/// Header a field is read from. A node tagged with a protocol only inspects
/// the packet when that header is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Protocol {
    None = 0,
    Ipv4 = 1,
    Ipv6 = 2,
    Icmp = 3,
    Icmpv6 = 4,
    Tcp = 5,
    Udp = 6,
}

/* ---------------------------------------------------------------- *
 * Fields
 * ---------------------------------------------------------------- */

/// Every packet property a rule can test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Field {
    Zero = 0,
    Inbound = 1,
    Outbound = 2,
    IfIdx = 3,
    SubIfIdx = 4,
    Ip = 5,
    Ipv6 = 6,
    Icmp = 7,
    Icmpv6 = 8,
    Tcp = 9,
    Udp = 10,
    IpHdrLength = 11,
    IpTos = 12,
    IpLength = 13,
    IpId = 14,
    IpDf = 15,
    IpMf = 16,
    IpFragOff = 17,
    IpTtl = 18,
    IpProtocol = 19,
    IpChecksum = 20,
    IpSrcAddr = 21,
    IpDstAddr = 22,
    Ipv6TrafficClass = 23,
    Ipv6FlowLabel = 24,
    Ipv6Length = 25,
    Ipv6NextHdr = 26,
    Ipv6HopLimit = 27,
    Ipv6SrcAddr = 28,
    Ipv6DstAddr = 29,
    IcmpType = 30,
    IcmpCode = 31,
    IcmpChecksum = 32,
    IcmpBody = 33,
    Icmpv6Type = 34,
    Icmpv6Code = 35,
    Icmpv6Checksum = 36,
    Icmpv6Body = 37,
    TcpSrcPort = 38,
    TcpDstPort = 39,
    TcpSeqNum = 40,
    TcpAckNum = 41,
    TcpHdrLength = 42,
    TcpUrg = 43,
    TcpAck = 44,
    TcpPsh = 45,
    TcpRst = 46,
    TcpSyn = 47,
    TcpFin = 48,
    TcpWindow = 49,
    TcpChecksum = 50,
    TcpUrgPtr = 51,
    TcpPayloadLength = 52,
    UdpSrcPort = 53,
    UdpDstPort = 54,
    UdpLength = 55,
    UdpChecksum = 56,
    UdpPayloadLength = 57,
}

/// Highest valid raw field value.
pub const FIELD_MAX: u8 = Field::UdpPayloadLength as u8;

const FIELDS: [Field; FIELD_MAX as usize + 1] = [
    Field::Zero,
    Field::Inbound,
    Field::Outbound,
    Field::IfIdx,
    Field::SubIfIdx,
    Field::Ip,
    Field::Ipv6,
    Field::Icmp,
    Field::Icmpv6,
    Field::Tcp,
    Field::Udp,
    Field::IpHdrLength,
    Field::IpTos,
    Field::IpLength,
    Field::IpId,
    Field::IpDf,
    Field::IpMf,
    Field::IpFragOff,
    Field::IpTtl,
    Field::IpProtocol,
    Field::IpChecksum,
    Field::IpSrcAddr,
    Field::IpDstAddr,
    Field::Ipv6TrafficClass,
    Field::Ipv6FlowLabel,
    Field::Ipv6Length,
    Field::Ipv6NextHdr,
    Field::Ipv6HopLimit,
    Field::Ipv6SrcAddr,
    Field::Ipv6DstAddr,
    Field::IcmpType,
    Field::IcmpCode,
    Field::IcmpChecksum,
    Field::IcmpBody,
    Field::Icmpv6Type,
    Field::Icmpv6Code,
    Field::Icmpv6Checksum,
    Field::Icmpv6Body,
    Field::TcpSrcPort,
    Field::TcpDstPort,
    Field::TcpSeqNum,
    Field::TcpAckNum,
    Field::TcpHdrLength,
    Field::TcpUrg,
    Field::TcpAck,
    Field::TcpPsh,
    Field::TcpRst,
    Field::TcpSyn,
    Field::TcpFin,
    Field::TcpWindow,
    Field::TcpChecksum,
    Field::TcpUrgPtr,
    Field::TcpPayloadLength,
    Field::UdpSrcPort,
    Field::UdpDstPort,
    Field::UdpLength,
    Field::UdpChecksum,
    Field::UdpPayloadLength,
];

impl Field {
    /// All fields in wire order.
    pub fn all() -> &'static [Field] {
        &FIELDS
    }

    /// Header the field is read from.
    pub fn protocol(self) -> Protocol {
        use Field::*;
        match self {
            Zero | Inbound | Outbound | IfIdx | SubIfIdx | Ip | Ipv6 | Icmp | Icmpv6 | Tcp
            | Udp => Protocol::None,
            IpHdrLength | IpTos | IpLength | IpId | IpDf | IpMf | IpFragOff | IpTtl
            | IpProtocol | IpChecksum | IpSrcAddr | IpDstAddr => Protocol::Ipv4,
            Ipv6TrafficClass | Ipv6FlowLabel | Ipv6Length | Ipv6NextHdr | Ipv6HopLimit
            | Ipv6SrcAddr | Ipv6DstAddr => Protocol::Ipv6,
            IcmpType | IcmpCode | IcmpChecksum | IcmpBody => Protocol::Icmp,
            Icmpv6Type | Icmpv6Code | Icmpv6Checksum | Icmpv6Body => Protocol::Icmpv6,
            TcpSrcPort | TcpDstPort | TcpSeqNum | TcpAckNum | TcpHdrLength | TcpUrg | TcpAck
            | TcpPsh | TcpRst | TcpSyn | TcpFin | TcpWindow | TcpChecksum | TcpUrgPtr
            | TcpPayloadLength => Protocol::Tcp,
            UdpSrcPort | UdpDstPort | UdpLength | UdpChecksum | UdpPayloadLength => {
                Protocol::Udp
            }
        }
    }

    /// Whether the field spans all four argument words.
    pub fn is_wide(self) -> bool {
        matches!(self, Field::Ipv6SrcAddr | Field::Ipv6DstAddr)
    }

    /// Largest value the first argument word may hold for this field.
    pub fn max_arg(self) -> u32 {
        use Field::*;
        match self {
            Zero | Inbound | Outbound | Ip | Ipv6 | Icmp | Icmpv6 | Tcp | Udp | IpDf | IpMf
            | TcpUrg | TcpAck | TcpPsh | TcpRst | TcpSyn | TcpFin => 1,
            IpHdrLength | TcpHdrLength => 0x0F,
            IpTtl | IpProtocol | Ipv6TrafficClass | Ipv6NextHdr | Ipv6HopLimit | IcmpType
            | IcmpCode | Icmpv6Type | Icmpv6Code => u8::MAX as u32,
            IpFragOff => 0x1FFF,
            IpTos | IpLength | IpId | IpChecksum | Ipv6Length | IcmpChecksum | Icmpv6Checksum
            | TcpSrcPort | TcpDstPort | TcpWindow | TcpChecksum | TcpUrgPtr
            | TcpPayloadLength | UdpSrcPort | UdpDstPort | UdpLength | UdpChecksum
            | UdpPayloadLength => u16::MAX as u32,
            Ipv6FlowLabel => 0x000F_FFFF,
            IfIdx | SubIfIdx | IpSrcAddr | IpDstAddr | Ipv6SrcAddr | Ipv6DstAddr | IcmpBody
            | Icmpv6Body | TcpSeqNum | TcpAckNum => u32::MAX,
        }
    }

    /// Name of the field in filter-expression notation.
    pub fn name(self) -> &'static str {
        use Field::*;
        match self {
            Zero => "zero",
            Inbound => "inbound",
            Outbound => "outbound",
            IfIdx => "ifIdx",
            SubIfIdx => "subIfIdx",
            Ip => "ip",
            Ipv6 => "ipv6",
            Icmp => "icmp",
            Icmpv6 => "icmpv6",
            Tcp => "tcp",
            Udp => "udp",
            IpHdrLength => "ip.HdrLength",
            IpTos => "ip.TOS",
            IpLength => "ip.Length",
            IpId => "ip.Id",
            IpDf => "ip.DF",
            IpMf => "ip.MF",
            IpFragOff => "ip.FragOff",
            IpTtl => "ip.TTL",
            IpProtocol => "ip.Protocol",
            IpChecksum => "ip.Checksum",
            IpSrcAddr => "ip.SrcAddr",
            IpDstAddr => "ip.DstAddr",
            Ipv6TrafficClass => "ipv6.TrafficClass",
            Ipv6FlowLabel => "ipv6.FlowLabel",
            Ipv6Length => "ipv6.Length",
            Ipv6NextHdr => "ipv6.NextHdr",
            Ipv6HopLimit => "ipv6.HopLimit",
            Ipv6SrcAddr => "ipv6.SrcAddr",
            Ipv6DstAddr => "ipv6.DstAddr",
            IcmpType => "icmp.Type",
            IcmpCode => "icmp.Code",
            IcmpChecksum => "icmp.Checksum",
            IcmpBody => "icmp.Body",
            Icmpv6Type => "icmpv6.Type",
            Icmpv6Code => "icmpv6.Code",
            Icmpv6Checksum => "icmpv6.Checksum",
            Icmpv6Body => "icmpv6.Body",
            TcpSrcPort => "tcp.SrcPort",
            TcpDstPort => "tcp.DstPort",
            TcpSeqNum => "tcp.SeqNum",
            TcpAckNum => "tcp.AckNum",
            TcpHdrLength => "tcp.HdrLength",
            TcpUrg => "tcp.Urg",
            TcpAck => "tcp.Ack",
            TcpPsh => "tcp.Psh",
            TcpRst => "tcp.Rst",
            TcpSyn => "tcp.Syn",
            TcpFin => "tcp.Fin",
            TcpWindow => "tcp.Window",
            TcpChecksum => "tcp.Checksum",
            TcpUrgPtr => "tcp.UrgPtr",
            TcpPayloadLength => "tcp.PayloadLength",
            UdpSrcPort => "udp.SrcPort",
            UdpDstPort => "udp.DstPort",
            UdpLength => "udp.Length",
            UdpChecksum => "udp.Checksum",
            UdpPayloadLength => "udp.PayloadLength",
        }
    }
}

impl TryFrom<u8> for Field {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        FIELDS
            .get(value as usize)
            .copied()
            .ok_or_else(|| Error::InvalidFilter(format!("unknown field {}", value)))
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/* ---------------------------------------------------------------- *
 * Tests
 * ---------------------------------------------------------------- */

/// Comparison applied between a field value and the rule argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Test {
    Eq = 0,
    Neq = 1,
    Lt = 2,
    Leq = 3,
    Gt = 4,
    Geq = 5,
}

impl Test {
    pub fn symbol(self) -> &'static str {
        match self {
            Test::Eq => "==",
            Test::Neq => "!=",
            Test::Lt => "<",
            Test::Leq => "<=",
            Test::Gt => ">",
            Test::Geq => ">=",
        }
    }
}

impl TryFrom<u8> for Test {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Test::Eq),
            1 => Ok(Test::Neq),
            2 => Ok(Test::Lt),
            3 => Ok(Test::Leq),
            4 => Ok(Test::Gt),
            5 => Ok(Test::Geq),
            other => Err(Error::InvalidFilter(format!("unknown test {}", other))),
        }
    }
}

/* ---------------------------------------------------------------- *
 * Continuations
 * ---------------------------------------------------------------- */

/// Where evaluation continues after a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    Accept,
    Reject,
    Node(u16),
}

impl Target {
    /// Interpret a raw continuation value. Anything that is not a sentinel
    /// is treated as a node index; range checks belong to the compiler.
    pub fn from_raw(raw: u16) -> Self {
        match raw {
            RESULT_ACCEPT => Target::Accept,
            RESULT_REJECT => Target::Reject,
            index => Target::Node(index),
        }
    }

    pub fn to_raw(self) -> u16 {
        match self {
            Target::Accept => RESULT_ACCEPT,
            Target::Reject => RESULT_REJECT,
            Target::Node(index) => index,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Accept => write!(f, "ACCEPT"),
            Target::Reject => write!(f, "REJECT"),
            Target::Node(index) => write!(f, "@{}", index),
        }
    }
}

/* ---------------------------------------------------------------- *
 * Raw records
 * ---------------------------------------------------------------- */

/// One undecoded rule exactly as it appears on the wire. Field and test are
/// kept raw so that out-of-range values reach the compiler's validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleRecord {
    pub field: u8,
    pub test: u8,
    pub on_match: u16,
    pub on_mismatch: u16,
    pub arg: [u32; 4],
}

impl RuleRecord {
    /// Build a record from typed parts.
    pub fn new(field: Field, test: Test, arg: u32, on_match: Target, on_mismatch: Target) -> Self {
        Self {
            field: field as u8,
            test: test as u8,
            on_match: on_match.to_raw(),
            on_mismatch: on_mismatch.to_raw(),
            arg: [arg, 0, 0, 0],
        }
    }

    /// Replace the argument with a full four-word value.
    pub fn with_wide_arg(mut self, arg: [u32; 4]) -> Self {
        self.arg = arg;
        self
    }

    /// Encode this record into `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.field);
        buf.put_u8(self.test);
        buf.put_u16_le(self.on_match);
        buf.put_u16_le(self.on_mismatch);
        buf.put_u16_le(0); // padding
        for word in self.arg {
            buf.put_u32_le(word);
        }
    }

    /// Decode a single record from `buf` **in-place**.
    pub fn decode(buf: &mut impl Buf) -> Result<Self, Error> {
        if buf.remaining() < RULE_RECORD_SIZE {
            return Err(Error::InvalidFilter(format!(
                "rule record requires {} bytes but only {} available",
                RULE_RECORD_SIZE,
                buf.remaining()
            )));
        }

        let field = buf.get_u8();
        let test = buf.get_u8();
        let on_match = buf.get_u16_le();
        let on_mismatch = buf.get_u16_le();
        buf.advance(2);
        let arg = [
            buf.get_u32_le(),
            buf.get_u32_le(),
            buf.get_u32_le(),
            buf.get_u32_le(),
        ];

        Ok(Self {
            field,
            test,
            on_match,
            on_mismatch,
            arg,
        })
    }
}

/// Encode a whole rule list.
pub fn encode_rules(rules: &[RuleRecord]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(rules.len() * RULE_RECORD_SIZE);
    for rule in rules {
        rule.encode(&mut buf);
    }
    buf
}

/// Decode a whole rule list. The byte length must be an exact multiple of
/// the record size.
pub fn decode_rules(mut bytes: &[u8]) -> Result<Vec<RuleRecord>, Error> {
    if bytes.len() % RULE_RECORD_SIZE != 0 {
        return Err(Error::InvalidFilter(format!(
            "rule list length {} is not a multiple of {}",
            bytes.len(),
            RULE_RECORD_SIZE
        )));
    }

    let mut rules = Vec::with_capacity(bytes.len() / RULE_RECORD_SIZE);
    while bytes.has_remaining() {
        rules.push(RuleRecord::decode(&mut bytes)?);
    }
    Ok(rules)
}
