//! Packet filter engine for rust-divert.
//!
//! This crate compiles wire rule lists into forward-only programs, evaluates
//! them against raw IPv4/IPv6 packets, and statically analyzes which
//! directions and IP versions a program can ever match.

mod analyzer;
mod compiler;
mod interpreter;
mod packet;
mod program;

pub use analyzer::{analyze, reachable, Analysis};
pub use compiler::{compile, compile_records};
pub use interpreter::{compare, evaluate, extract, matches, PacketMeta};
pub use packet::{IcmpHeader, Ipv4Header, Ipv6Header, ParsedPacket, TcpHeader, UdpHeader};
pub use program::{Node, Program};
