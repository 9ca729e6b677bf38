//! Check command implementation for the divert CLI

use anyhow::{Context, Result};
use log::debug;
use rust_divert::Direction;
use rust_divert_filter::{compile, matches};
use std::path::Path;

use crate::rules::load_wire;
use crate::utils::parse_hex;

/// Evaluate a rule list against one packet and print the outcome
pub fn handle_command(
    rules: &Path,
    packet: &str,
    outbound: bool,
    if_idx: u32,
    sub_if_idx: u32,
) -> Result<()> {
    let wire = load_wire(rules)?;
    let program = compile(&wire).context("Rule list does not compile")?;
    let packet = parse_hex(packet).context("Invalid packet")?;

    let direction = if outbound {
        Direction::Outbound
    } else {
        Direction::Inbound
    };
    debug!("Checking {} byte {} packet on if {}.{}", packet.len(), direction, if_idx, sub_if_idx);

    if matches(&program, &packet, direction, if_idx, sub_if_idx) {
        println!("match");
    } else {
        println!("no match");
    }
    Ok(())
}
