//! Compiled filter programs.
//!
//! A program is an arena of nodes addressed by index. Every branch either
//! terminates or jumps strictly forward, so a program is an acyclic graph
//! and evaluation visits each node at most once.

use rust_divert_common::rule::{Field, Protocol, RuleRecord, Target, Test};
use std::fmt;

/// One validated comparison step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Node {
    pub protocol: Protocol,
    pub field: Field,
    pub test: Test,
    pub arg: [u32; 4],
    pub on_match: Target,
    pub on_mismatch: Target,
}

impl Node {
    /// Continuation taken for a given test outcome.
    pub fn next(&self, matched: bool) -> Target {
        if matched {
            self.on_match
        } else {
            self.on_mismatch
        }
    }

    /// Wire record equivalent to this node.
    pub fn to_record(&self) -> RuleRecord {
        RuleRecord {
            field: self.field as u8,
            test: self.test as u8,
            on_match: self.on_match.to_raw(),
            on_mismatch: self.on_mismatch.to_raw(),
            arg: self.arg,
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ", self.field, self.test.symbol())?;
        if self.field.is_wide() {
            write!(
                f,
                "{:08x}:{:08x}:{:08x}:{:08x}",
                self.arg[3], self.arg[2], self.arg[1], self.arg[0]
            )?;
        } else {
            write!(f, "{}", self.arg[0])?;
        }
        write!(f, " ? {} : {}", self.on_match, self.on_mismatch)
    }
}

/// Immutable compiled filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    nodes: Vec<Node>,
}

impl Program {
    /// Wrap an already validated node list. Only the compiler builds
    /// programs, so the forward-branch invariant holds for every instance.
    pub(crate) fn from_nodes(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, index: u16) -> Option<&Node> {
        self.nodes.get(index as usize)
    }

    /// Re-encode the program as a wire rule list.
    pub fn to_records(&self) -> Vec<RuleRecord> {
        self.nodes.iter().map(Node::to_record).collect()
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, node) in self.nodes.iter().enumerate() {
            writeln!(f, "@{:<3} {}", i, node)?;
        }
        Ok(())
    }
}
