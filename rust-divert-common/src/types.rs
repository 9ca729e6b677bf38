//! Common types shared between the capture side, the filter engine and the
//! consumer side of a diversion context.
//!
//! These types describe where a packet came from and how a context is
//! parameterised; none of them carry packet bytes.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Error;

/// Interface identifier type used for identifying network interfaces.
pub type InterfaceId = u32;

/// Default maximum number of packets held by a diversion queue.
pub const QUEUE_LEN_DEFAULT: u64 = 512;
/// Smallest permitted queue length.
pub const QUEUE_LEN_MIN: u64 = 1;
/// Largest permitted queue length.
pub const QUEUE_LEN_MAX: u64 = 8192;

/// Default aging sweep interval in milliseconds.
pub const QUEUE_TIME_DEFAULT: u64 = 512;
/// Smallest permitted aging sweep interval in milliseconds.
pub const QUEUE_TIME_MIN: u64 = 128;
/// Largest permitted aging sweep interval in milliseconds.
pub const QUEUE_TIME_MAX: u64 = 2048;

/// Default context priority.
pub const PRIORITY_DEFAULT: i16 = 0;
/// Lowest permitted context priority.
pub const PRIORITY_MIN: i16 = -1000;
/// Highest permitted context priority.
pub const PRIORITY_MAX: i16 = 1000;

/// Direction a packet was travelling when it was captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Direction {
    /// Leaving the local stack.
    Outbound = 0,
    /// Arriving at the local stack.
    Inbound = 1,
}

impl Direction {
    pub fn is_outbound(self) -> bool {
        self == Direction::Outbound
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Outbound => write!(f, "outbound"),
            Direction::Inbound => write!(f, "inbound"),
        }
    }
}

/// Capture metadata delivered alongside every diverted packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    /// Interface index the packet was captured on.
    pub if_idx: InterfaceId,
    /// Sub-interface index the packet was captured on.
    pub sub_if_idx: InterfaceId,
    /// Direction of travel.
    pub direction: Direction,
}

impl Address {
    pub fn new(direction: Direction, if_idx: InterfaceId, sub_if_idx: InterfaceId) -> Self {
        Self {
            if_idx,
            sub_if_idx,
            direction,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} if={}.{}", self.direction, self.if_idx, self.sub_if_idx)
    }
}

/// Hardware checksum offload state reported by the stack for an outbound
/// packet. `true` means the checksum was deferred to the NIC and has never
/// been computed in software.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumOffload {
    pub tcp: bool,
    pub udp: bool,
}

/// Which checksums must be recomputed before a queued packet is delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChecksumFixup {
    pub ip: bool,
    pub tcp: bool,
    pub udp: bool,
}

impl ChecksumFixup {
    /// Derive the lazy-repair flags at enqueue time. Outbound IPv4 headers
    /// have not been checksummed yet; transport checksums only need work when
    /// they were offloaded. Inbound packets were validated on receive.
    pub fn for_capture(direction: Direction, offload: ChecksumOffload) -> Self {
        match direction {
            Direction::Outbound => Self {
                ip: true,
                tcp: offload.tcp,
                udp: offload.udp,
            },
            Direction::Inbound => Self::default(),
        }
    }

    pub fn any(&self) -> bool {
        self.ip || self.tcp || self.udp
    }
}

/// Stack layer a context hooks into.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Layer {
    /// Packets addressed to or sent from the local host.
    #[default]
    Network = 0,
    /// Packets being forwarded through the host.
    NetworkForward = 1,
}

impl TryFrom<u64> for Layer {
    type Error = Error;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Layer::Network),
            1 => Ok(Layer::NetworkForward),
            other => Err(Error::InvalidParam(format!("unknown layer {}", other))),
        }
    }
}

/// Behaviour flags of a diversion context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Flags(u64);

impl Flags {
    /// Copy matching packets to the consumer but let the originals through.
    pub const SNIFF: Flags = Flags(0x1);
    /// Silently drop matching packets instead of queueing them.
    pub const DROP: Flags = Flags(0x2);
    /// Deliver packets without lazy checksum repair.
    pub const NO_CHECKSUM: Flags = Flags(0x400);
    /// Do not hook any layer; every packet is permitted.
    pub const PASSTHRU: Flags = Flags(0x10);

    const ALL: u64 = 0x1 | 0x2 | 0x400 | 0x10;

    pub const fn empty() -> Self {
        Flags(0)
    }

    /// Validate a raw flag word.
    pub fn from_bits(bits: u64) -> Result<Self, Error> {
        if bits & !Self::ALL != 0 {
            return Err(Error::InvalidParam(format!("unknown flag bits {:#x}", bits)));
        }
        Ok(Flags(bits))
    }

    pub fn bits(&self) -> u64 {
        self.0
    }

    pub fn contains(&self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

/// Tunable queue parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Param {
    /// Maximum number of queued packets.
    QueueLen,
    /// Aging sweep interval in milliseconds.
    QueueTime,
}

impl Param {
    /// Inclusive bounds of the parameter's value.
    pub fn bounds(self) -> (u64, u64) {
        match self {
            Param::QueueLen => (QUEUE_LEN_MIN, QUEUE_LEN_MAX),
            Param::QueueTime => (QUEUE_TIME_MIN, QUEUE_TIME_MAX),
        }
    }

    pub fn default_value(self) -> u64 {
        match self {
            Param::QueueLen => QUEUE_LEN_DEFAULT,
            Param::QueueTime => QUEUE_TIME_DEFAULT,
        }
    }

    /// Check `value` against the parameter's bounds.
    pub fn validate(self, value: u64) -> Result<u64, Error> {
        let (min, max) = self.bounds();
        if value < min || value > max {
            return Err(Error::InvalidParam(format!(
                "{:?} must be within [{}, {}], got {}",
                self, min, max, value
            )));
        }
        Ok(value)
    }
}

/// Check a priority against its bounds.
pub fn validate_priority(priority: i64) -> Result<i16, Error> {
    if priority < PRIORITY_MIN as i64 || priority > PRIORITY_MAX as i64 {
        return Err(Error::InvalidParam(format!(
            "priority must be within [{}, {}], got {}",
            PRIORITY_MIN, PRIORITY_MAX, priority
        )));
    }
    Ok(priority as i16)
}
