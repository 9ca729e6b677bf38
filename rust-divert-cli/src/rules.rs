//! Rule list files.
//!
//! A rule file is either the raw wire format (`.bin`) or a JSON array:
//!
//! ```json
//! [{ "field": "tcp_dst_port", "test": "eq", "arg": 443,
//!    "on_match": "accept", "on_mismatch": "reject" }]
//! ```

use anyhow::{bail, Context, Result};
use log::debug;
use rust_divert_common::rule::{encode_rules, Field, RuleRecord, Target, Test};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;

/// Rule argument as written in JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgConfig {
    Word(u32),
    Wide([u32; 4]),
    /// An IPv4 or IPv6 address.
    Address(String),
}

impl Default for ArgConfig {
    fn default() -> Self {
        Self::Word(0)
    }
}

impl ArgConfig {
    pub fn to_words(&self) -> Result<[u32; 4]> {
        match self {
            Self::Word(word) => Ok([*word, 0, 0, 0]),
            Self::Wide(words) => Ok(*words),
            Self::Address(text) => match text.parse::<IpAddr>() {
                Ok(IpAddr::V4(addr)) => Ok([u32::from(addr), 0, 0, 0]),
                Ok(IpAddr::V6(addr)) => {
                    let octets = addr.octets();
                    let mut words = [0u32; 4];
                    // Word 0 holds the last four octets.
                    for (i, word) in words.iter_mut().enumerate() {
                        let at = 12 - 4 * i;
                        *word = u32::from_be_bytes([
                            octets[at],
                            octets[at + 1],
                            octets[at + 2],
                            octets[at + 3],
                        ]);
                    }
                    Ok(words)
                }
                Err(_) => bail!("invalid argument '{}': expected a number or an address", text),
            },
        }
    }
}

/// One rule as written in JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    pub field: Field,
    pub test: Test,
    #[serde(default)]
    pub arg: ArgConfig,
    pub on_match: Target,
    pub on_mismatch: Target,
}

impl RuleConfig {
    pub fn to_record(&self) -> Result<RuleRecord> {
        let arg = self.arg.to_words()?;
        Ok(RuleRecord::new(self.field, self.test, 0, self.on_match, self.on_mismatch)
            .with_wide_arg(arg))
    }
}

/// Parse a JSON rule list into wire records.
pub fn parse_json(text: &str) -> Result<Vec<RuleRecord>> {
    let rules: Vec<RuleConfig> = serde_json::from_str(text).context("Invalid JSON rule list")?;
    rules
        .iter()
        .enumerate()
        .map(|(i, rule)| rule.to_record().with_context(|| format!("rule {}", i)))
        .collect()
}

fn is_binary(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext == "bin")
}

/// Load a rule file and return the encoded wire bytes.
pub fn load_wire(path: &Path) -> Result<Vec<u8>> {
    if is_binary(path) {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        debug!("Loaded {} bytes of encoded rules from {}", bytes.len(), path.display());
        return Ok(bytes);
    }

    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let records = parse_json(&text)?;
    if records.is_empty() {
        bail!("{} contains no rules", path.display());
    }
    debug!("Loaded {} rules from {}", records.len(), path.display());
    Ok(encode_rules(&records).to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names_and_targets() {
        let records = parse_json(
            r#"[
                {"field": "outbound", "test": "eq", "arg": 1,
                 "on_match": {"node": 1}, "on_mismatch": "reject"},
                {"field": "tcp_dst_port", "test": "eq", "arg": 443,
                 "on_match": "accept", "on_mismatch": "reject"}
            ]"#,
        )
        .unwrap();
        assert_eq!(
            records[0],
            RuleRecord::new(Field::Outbound, Test::Eq, 1, Target::Node(1), Target::Reject)
        );
        assert_eq!(records[1].arg, [443, 0, 0, 0]);
    }

    #[test]
    fn addresses_become_words() {
        let v4 = ArgConfig::Address("10.0.0.1".to_string());
        assert_eq!(v4.to_words().unwrap(), [0x0a00_0001, 0, 0, 0]);

        let v6 = ArgConfig::Address("2001:db8::1".to_string());
        assert_eq!(v6.to_words().unwrap(), [1, 0, 0, 0x2001_0db8]);

        assert!(ArgConfig::Address("not-an-address".to_string()).to_words().is_err());
    }

    #[test]
    fn missing_arg_defaults_to_zero() {
        let records = parse_json(
            r#"[{"field": "zero", "test": "eq", "on_match": "accept", "on_mismatch": "accept"}]"#,
        )
        .unwrap();
        assert_eq!(records[0].arg, [0; 4]);
    }

    #[test]
    fn unknown_field_is_rejected() {
        let err = parse_json(
            r#"[{"field": "tcp.bogus", "test": "eq", "on_match": "accept", "on_mismatch": "reject"}]"#,
        );
        assert!(err.is_err());
    }
}
