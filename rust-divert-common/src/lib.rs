//! Common types and utilities for the rust-divert packet diversion core.
//!
//! This crate provides the pieces shared by the filter engine, the diversion
//! queue and the userspace tooling: the rule wire format, packet addressing
//! metadata, the Internet checksum engine, metrics and configuration.

pub mod checksum;
pub mod config;
pub mod error;
pub mod metrics;
pub mod rule;
pub mod types;

/// Reexport of common types
pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;
