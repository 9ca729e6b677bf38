//! rust-divert: user-space packet diversion core.
//!
//! A [`DivertContext`] owns a compiled filter, a bounded diversion queue and
//! the background tasks that age the queue and serve readers. Capture hooks
//! feed packets to [`DivertContext::classify`]; consumers pull diverted
//! packets with [`DivertContext::recv`].

mod context;
mod hooks;

pub use context::{CapturedPacket, ContextState, DivertContext, Verdict};
pub use hooks::{Hook, HookPlan};

pub use rust_divert_common::config::DivertConfig;
pub use rust_divert_common::types::{Address, ChecksumOffload, Direction, Flags, Layer, Param};
pub use rust_divert_common::{Error, Result};
pub use rust_divert_filter::Analysis;
pub use rust_divert_queue::Delivered;

/// Filter compiler, interpreter and analyzer.
pub use rust_divert_filter as filter;
