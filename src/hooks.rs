//! Capture hooks a started filter needs.

use rust_divert_common::types::{Layer, PRIORITY_MAX};
use rust_divert_filter::Analysis;
use std::fmt;

/// A single capture point in the host stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    InboundIpv4,
    OutboundIpv4,
    InboundIpv6,
    OutboundIpv6,
    ForwardIpv4,
    ForwardIpv6,
}

impl Hook {
    pub fn is_ipv4(self) -> bool {
        matches!(self, Hook::InboundIpv4 | Hook::OutboundIpv4 | Hook::ForwardIpv4)
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Hook::InboundIpv4 => "network (inbound IPv4)",
            Hook::OutboundIpv4 => "network (outbound IPv4)",
            Hook::InboundIpv6 => "network (inbound IPv6)",
            Hook::OutboundIpv6 => "network (outbound IPv6)",
            Hook::ForwardIpv4 => "network (forward IPv4)",
            Hook::ForwardIpv6 => "network (forward IPv6)",
        };
        write!(f, "{}", name)
    }
}

/// Hooks to install for a filter, plus the analysis they were derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookPlan {
    pub layer: Layer,
    pub analysis: Analysis,
    pub hooks: Vec<Hook>,
    /// Ordering weight among contexts at the same hook; higher runs first.
    pub weight: u16,
}

impl HookPlan {
    /// Derive the hooks for `layer` from an analysis.
    pub fn derive(layer: Layer, analysis: Analysis, priority: i16) -> Self {
        let mut hooks = Vec::with_capacity(4);
        match layer {
            Layer::Network => {
                let pairs = [
                    (analysis.possibly_inbound, analysis.possibly_ipv4, Hook::InboundIpv4),
                    (analysis.possibly_outbound, analysis.possibly_ipv4, Hook::OutboundIpv4),
                    (analysis.possibly_inbound, analysis.possibly_ipv6, Hook::InboundIpv6),
                    (analysis.possibly_outbound, analysis.possibly_ipv6, Hook::OutboundIpv6),
                ];
                hooks.extend(
                    pairs
                        .iter()
                        .filter(|(direction, version, _)| *direction && *version)
                        .map(|(_, _, hook)| *hook),
                );
            }
            Layer::NetworkForward => {
                if analysis.possibly_ipv4 {
                    hooks.push(Hook::ForwardIpv4);
                }
                if analysis.possibly_ipv6 {
                    hooks.push(Hook::ForwardIpv6);
                }
            }
        }

        Self {
            layer,
            analysis,
            hooks,
            weight: (PRIORITY_MAX as i32 - priority as i32) as u16,
        }
    }

    /// A plan that installs nothing.
    pub fn empty(layer: Layer, priority: i16) -> Self {
        Self::derive(layer, Analysis::none(), priority)
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn contains(&self, hook: Hook) -> bool {
        self.hooks.contains(&hook)
    }
}

impl fmt::Display for HookPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hooks.is_empty() {
            return write!(f, "no hooks");
        }
        let names: Vec<String> = self.hooks.iter().map(|h| h.to_string()).collect();
        write!(f, "{} (weight {})", names.join(", "), self.weight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analysis(inbound: bool, outbound: bool, ipv4: bool, ipv6: bool) -> Analysis {
        Analysis {
            possibly_inbound: inbound,
            possibly_outbound: outbound,
            possibly_ipv4: ipv4,
            possibly_ipv6: ipv6,
        }
    }

    #[test]
    fn network_layer_pairs_direction_and_version() {
        let plan = HookPlan::derive(Layer::Network, analysis(false, true, true, false), 0);
        assert_eq!(plan.hooks, vec![Hook::OutboundIpv4]);

        let plan = HookPlan::derive(Layer::Network, analysis(true, true, true, true), 0);
        assert_eq!(plan.hooks.len(), 4);
    }

    #[test]
    fn forward_layer_ignores_direction() {
        let plan = HookPlan::derive(Layer::NetworkForward, analysis(false, false, false, true), 0);
        assert_eq!(plan.hooks, vec![Hook::ForwardIpv6]);
        assert!(!plan.hooks[0].is_ipv4());
    }

    #[test]
    fn nothing_possible_means_no_hooks() {
        let plan = HookPlan::empty(Layer::Network, 0);
        assert!(plan.is_empty());
        assert_eq!(plan.to_string(), "no hooks");
    }

    #[test]
    fn weight_inverts_priority() {
        assert_eq!(HookPlan::empty(Layer::Network, 1000).weight, 0);
        assert_eq!(HookPlan::empty(Layer::Network, 0).weight, 1000);
        assert_eq!(HookPlan::empty(Layer::Network, -1000).weight, 2000);
    }
}
