//! Filter compiler.
//!
//! Turns an untrusted wire rule list into a [`Program`]. Any violation
//! rejects the whole list; nothing is retained from a failed compile.

use log::{debug, warn};
use rust_divert_common::rule::{
    decode_rules, Field, RuleRecord, Target, Test, MAX_PROGRAM_LEN, RULE_RECORD_SIZE,
};
use rust_divert_common::{Error, Result};

use crate::program::{Node, Program};

/// Compile a rule list supplied as raw wire bytes.
pub fn compile(rules: &[u8]) -> Result<Program> {
    if rules.len() % RULE_RECORD_SIZE != 0 {
        return reject(format!(
            "rule list length {} is not a multiple of {}",
            rules.len(),
            RULE_RECORD_SIZE
        ));
    }
    let count = rules.len() / RULE_RECORD_SIZE;
    if count >= MAX_PROGRAM_LEN as usize {
        return reject(format!(
            "{} rules exceed the program limit of {}",
            count,
            MAX_PROGRAM_LEN - 1
        ));
    }

    let records = decode_rules(rules)?;
    compile_records(&records)
}

/// Compile an already decoded rule list.
pub fn compile_records(records: &[RuleRecord]) -> Result<Program> {
    if records.is_empty() {
        return reject("empty rule list".to_string());
    }
    if records.len() >= MAX_PROGRAM_LEN as usize {
        return reject(format!(
            "{} rules exceed the program limit of {}",
            records.len(),
            MAX_PROGRAM_LEN - 1
        ));
    }

    let mut nodes = Vec::new();
    nodes
        .try_reserve_exact(records.len())
        .map_err(|e| Error::ResourceExhausted(format!("program arena: {}", e)))?;

    let count = records.len() as u16;
    for (index, record) in records.iter().enumerate() {
        match compile_node(index as u16, count, record) {
            Ok(node) => nodes.push(node),
            Err(e) => {
                warn!("Rejecting filter at rule {}: {}", index, e);
                return Err(e);
            }
        }
    }

    debug!("Compiled filter with {} nodes", nodes.len());
    Ok(Program::from_nodes(nodes))
}

fn reject<T>(reason: String) -> Result<T> {
    warn!("Rejecting filter: {}", reason);
    Err(Error::InvalidFilter(reason))
}

fn compile_node(index: u16, count: u16, record: &RuleRecord) -> Result<Node> {
    let field = Field::try_from(record.field)?;
    let test = Test::try_from(record.test)?;
    let on_match = check_target(index, count, record.on_match)?;
    let on_mismatch = check_target(index, count, record.on_mismatch)?;

    if !field.is_wide() && record.arg[1..].iter().any(|&word| word != 0) {
        return Err(Error::InvalidFilter(format!(
            "{} takes a 32-bit argument but upper words are set",
            field
        )));
    }
    if record.arg[0] > field.max_arg() {
        return Err(Error::InvalidFilter(format!(
            "argument {} out of range for {} (max {})",
            record.arg[0],
            field,
            field.max_arg()
        )));
    }

    Ok(Node {
        protocol: field.protocol(),
        field,
        test,
        arg: record.arg,
        on_match,
        on_mismatch,
    })
}

/// Branches must end evaluation or jump strictly forward inside the list.
fn check_target(index: u16, count: u16, raw: u16) -> Result<Target> {
    match Target::from_raw(raw) {
        Target::Node(next) if next <= index || next >= count => Err(Error::InvalidFilter(
            format!("rule {} branches to {} (must be in {}..{})", index, next, index + 1, count),
        )),
        target => Ok(target),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_divert_common::rule::{encode_rules, Protocol, RESULT_ACCEPT, RESULT_REJECT};

    fn rule(field: Field, test: Test, arg: u32, on_match: Target, on_mismatch: Target) -> RuleRecord {
        RuleRecord::new(field, test, arg, on_match, on_mismatch)
    }

    #[test]
    fn compiles_and_tags_protocols() {
        let rules = encode_rules(&[
            rule(Field::IpProtocol, Test::Eq, 6, Target::Node(1), Target::Reject),
            rule(Field::TcpDstPort, Test::Eq, 443, Target::Accept, Target::Reject),
        ]);
        let program = compile(&rules).unwrap();
        assert_eq!(program.len(), 2);
        assert_eq!(program.nodes()[0].protocol, Protocol::Ipv4);
        assert_eq!(program.nodes()[1].protocol, Protocol::Tcp);
        assert_eq!(program.nodes()[1].on_match, Target::Accept);
    }

    #[test]
    fn rejects_ragged_buffers() {
        let mut rules = encode_rules(&[rule(Field::Zero, Test::Eq, 0, Target::Accept, Target::Reject)]);
        rules.extend_from_slice(&[0, 0, 0]);
        assert!(matches!(compile(&rules), Err(Error::InvalidFilter(_))));
    }

    #[test]
    fn rejects_empty_and_oversized_lists() {
        assert!(compile(&[]).is_err());

        let ok = vec![rule(Field::Zero, Test::Eq, 0, Target::Accept, Target::Reject); 255];
        assert_eq!(compile(&encode_rules(&ok)).unwrap().len(), 255);

        let too_many = vec![rule(Field::Zero, Test::Eq, 0, Target::Accept, Target::Reject); 256];
        assert!(compile(&encode_rules(&too_many)).is_err());
    }

    #[test]
    fn rejects_unknown_field_and_test() {
        let mut bad_field = rule(Field::Zero, Test::Eq, 0, Target::Accept, Target::Reject);
        bad_field.field = 58;
        assert!(compile_records(&[bad_field]).is_err());

        let mut bad_test = rule(Field::Zero, Test::Eq, 0, Target::Accept, Target::Reject);
        bad_test.test = 6;
        assert!(compile_records(&[bad_test]).is_err());
    }

    #[test]
    fn branches_must_point_forward() {
        // Self loop.
        let self_loop = [rule(Field::Zero, Test::Eq, 0, Target::Node(0), Target::Reject)];
        assert!(compile_records(&self_loop).is_err());

        // Backward jump.
        let backward = [
            rule(Field::Zero, Test::Eq, 0, Target::Node(1), Target::Reject),
            rule(Field::Zero, Test::Eq, 0, Target::Accept, Target::Node(0)),
        ];
        assert!(compile_records(&backward).is_err());

        // Past the end.
        let past_end = [
            rule(Field::Zero, Test::Eq, 0, Target::Node(1), Target::Reject),
            rule(Field::Zero, Test::Eq, 0, Target::Node(2), Target::Reject),
        ];
        assert!(compile_records(&past_end).is_err());

        // Raw values between the last index and the sentinels.
        let mut gap = rule(Field::Zero, Test::Eq, 0, Target::Accept, Target::Reject);
        gap.on_mismatch = 256;
        assert!(compile_records(&[gap]).is_err());
        gap.on_mismatch = RESULT_REJECT + 1;
        assert!(compile_records(&[gap]).is_err());

        let last = [
            rule(Field::Zero, Test::Eq, 0, Target::Node(1), Target::Node(1)),
            rule(Field::Zero, Test::Eq, 0, Target::from_raw(RESULT_ACCEPT), Target::Reject),
        ];
        assert!(compile_records(&last).is_ok());
    }

    #[test]
    fn upper_words_only_for_ipv6_addresses() {
        let narrow = rule(Field::IpSrcAddr, Test::Eq, 1, Target::Accept, Target::Reject)
            .with_wide_arg([1, 1, 0, 0]);
        assert!(compile_records(&[narrow]).is_err());

        let wide = rule(Field::Ipv6SrcAddr, Test::Eq, 0, Target::Accept, Target::Reject)
            .with_wide_arg([1, 2, 3, 0x2001_0db8]);
        let program = compile_records(&[wide]).unwrap();
        assert_eq!(program.nodes()[0].arg, [1, 2, 3, 0x2001_0db8]);
    }

    #[test]
    fn argument_must_fit_field_width() {
        let cases = [
            (Field::TcpSyn, 1, 2),
            (Field::IpHdrLength, 0xF, 0x10),
            (Field::IpTtl, 0xFF, 0x100),
            (Field::IpFragOff, 0x1FFF, 0x2000),
            (Field::TcpDstPort, 0xFFFF, 0x1_0000),
            (Field::Ipv6FlowLabel, 0xF_FFFF, 0x10_0000),
        ];
        for (field, max, over) in cases {
            let ok = rule(field, Test::Eq, max, Target::Accept, Target::Reject);
            assert!(compile_records(&[ok]).is_ok(), "{} should accept {}", field, max);
            let bad = rule(field, Test::Eq, over, Target::Accept, Target::Reject);
            assert!(compile_records(&[bad]).is_err(), "{} should reject {}", field, over);
        }
    }
}
