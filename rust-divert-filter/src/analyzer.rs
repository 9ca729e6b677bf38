//! Static reachability analysis.
//!
//! Answers "can this program accept some packet whose `field` equals
//! `value`?" without enumerating packets. Nodes that test the queried field
//! follow one branch; every other node is unconstrained and may take either.

use log::debug;
use rust_divert_common::rule::{Field, Protocol, Target};
use std::fmt;

use crate::interpreter::compare;
use crate::program::Program;

/// Coarse properties of the packets a program can match.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Analysis {
    pub possibly_inbound: bool,
    pub possibly_outbound: bool,
    pub possibly_ipv4: bool,
    pub possibly_ipv6: bool,
}

impl Analysis {
    /// Nothing can match.
    pub fn none() -> Self {
        Self::default()
    }
}

impl fmt::Display for Analysis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "inbound={} outbound={} ipv4={} ipv6={}",
            self.possibly_inbound, self.possibly_outbound, self.possibly_ipv4, self.possibly_ipv6
        )
    }
}

/// Whether an accept is reachable from `start` when `field` is held at
/// `value`.
///
/// The program is a forward-only graph, so reachability is resolved back to
/// front in one pass and each node is visited once.
pub fn reachable(
    program: &Program,
    start: Target,
    protocol: Protocol,
    field: Field,
    value: u32,
) -> bool {
    let mut reach = vec![false; program.len()];
    let resolve = |reach: &[bool], target: Target| match target {
        Target::Accept => true,
        Target::Reject => false,
        Target::Node(index) => reach.get(index as usize).copied().unwrap_or(false),
    };

    for (index, node) in program.nodes().iter().enumerate().rev() {
        let accepts = if node.protocol == protocol && node.field == field {
            let taken = compare(node.test, &[value, 0, 0, 0], &node.arg);
            resolve(&reach, node.next(taken))
        } else {
            resolve(&reach, node.on_match) || resolve(&reach, node.on_mismatch)
        };
        reach[index] = accepts;
    }

    resolve(&reach, start)
}

fn reachable_from_root(program: &Program, field: Field, value: u32) -> bool {
    reachable(program, Target::Node(0), field.protocol(), field, value)
}

/// Derive the four hook predicates for `program`.
pub fn analyze(program: &Program) -> Analysis {
    if !reachable_from_root(program, Field::Zero, 0) {
        debug!("Filter can never match");
        return Analysis::none();
    }

    let pinned = |field: Field, other: Field| {
        reachable_from_root(program, field, 1) && reachable_from_root(program, other, 0)
    };

    let analysis = Analysis {
        possibly_inbound: pinned(Field::Inbound, Field::Outbound),
        possibly_outbound: pinned(Field::Outbound, Field::Inbound),
        possibly_ipv4: pinned(Field::Ip, Field::Ipv6),
        possibly_ipv6: pinned(Field::Ipv6, Field::Ip),
    };
    debug!("Filter analysis: {}", analysis);
    analysis
}
