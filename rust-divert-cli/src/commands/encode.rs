//! Encode command implementation for the divert CLI

use anyhow::{Context, Result};
use log::info;
use rust_divert_common::rule::encode_rules;
use rust_divert_filter::compile;
use std::path::Path;

use crate::rules::parse_json;

/// Encode a JSON rule list into wire records
pub fn handle_command(rules: &Path, output: &Path) -> Result<()> {
    let text = std::fs::read_to_string(rules)
        .with_context(|| format!("Failed to read {}", rules.display()))?;
    let records = parse_json(&text)?;
    let encoded = encode_rules(&records);

    // Refuse to write a list the compiler would reject.
    let program = compile(&encoded).context("Rule list does not compile")?;

    std::fs::write(output, &encoded[..])
        .with_context(|| format!("Failed to write {}", output.display()))?;

    info!("Encoded {} rules into {}", program.len(), output.display());
    println!(
        "Encoded {} rules ({} bytes) to {}",
        program.len(),
        encoded.len(),
        output.display()
    );
    Ok(())
}
