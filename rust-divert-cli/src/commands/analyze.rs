//! Analyze command implementation for the divert CLI

use anyhow::{bail, Context, Result};
use rust_divert::{HookPlan, Layer};
use rust_divert_filter::{analyze, compile};
use std::path::Path;

use crate::rules::load_wire;
use crate::utils::print_header;

fn parse_layer(name: &str) -> Result<Layer> {
    match name {
        "network" => Ok(Layer::Network),
        "network_forward" | "forward" => Ok(Layer::NetworkForward),
        other => bail!("unknown layer '{}', expected network or network_forward", other),
    }
}

/// Print the compiled program, its analysis and the resulting hooks
pub fn handle_command(rules: &Path, layer: &str) -> Result<()> {
    let layer = parse_layer(layer)?;
    let wire = load_wire(rules)?;
    let program = compile(&wire).context("Rule list does not compile")?;
    let analysis = analyze(&program);
    let plan = HookPlan::derive(layer, analysis, 0);

    print_header("Program");
    print!("{}", program);

    print_header("Analysis");
    println!("possibly inbound:  {}", analysis.possibly_inbound);
    println!("possibly outbound: {}", analysis.possibly_outbound);
    println!("possibly IPv4:     {}", analysis.possibly_ipv4);
    println!("possibly IPv6:     {}", analysis.possibly_ipv6);

    print_header("Hooks");
    if plan.is_empty() {
        println!("none (the filter can never match)");
    }
    for hook in &plan.hooks {
        println!("{}", hook);
    }
    Ok(())
}
