//! Subcommand implementations for the divert CLI

pub mod analyze;
pub mod check;
pub mod encode;
pub mod replay;
