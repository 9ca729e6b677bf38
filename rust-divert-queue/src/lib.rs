//! Diversion queue for rust-divert.
//!
//! Buffers diverted packets between a producer that must never block and
//! pull-based consumers. The queue is bounded (drop-oldest), ages out
//! packets nobody reads with a two-generation sweep, and pairs pending
//! reads with packets in strict FIFO order.

mod packet;
mod queue;
mod service;
mod worker;

pub use packet::{Delivered, QueuedPacket};
pub use queue::{DiversionQueue, EnqueueStatus};
pub use worker::QueueTasks;
