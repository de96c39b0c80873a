// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Offload descriptor table and name lookup.
// Author: Lukas Bower

//! Offload descriptor registry.
//!
//! The offload configurator emits an ordered table of named policies. The node
//! only consumes the TCP keepalive entry, but the table may also carry ARP and
//! packet-filter policies destined for the offload engine.

use log::warn;

use crate::keepalive::KeepaliveConfig;

/// ARP offload settings forwarded untouched to the offload engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArpOffloadConfig {
    /// Answer ARP requests for the host address while the host sleeps.
    pub peer_auto_reply: bool,
    /// Seconds an ARP cache entry for a peer remains valid.
    pub peer_age_s: u32,
}

/// Direction a packet filter applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterDirection {
    /// Inbound frames only.
    Inbound,
    /// Outbound frames only.
    Outbound,
}

/// Packet filter settings forwarded untouched to the offload engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PacketFilterConfig {
    /// Ports whose traffic is allowed to wake the host.
    pub wake_ports: Vec<u16>,
    /// Traffic direction the filter watches.
    pub direction: FilterDirection,
}

/// Policy blob attached to a descriptor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OffloadPolicy {
    /// TCP keepalive offload.
    Keepalive(KeepaliveConfig),
    /// ARP offload.
    Arp(ArpOffloadConfig),
    /// Wake packet filter.
    PacketFilter(PacketFilterConfig),
}

/// Named offload entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OffloadDescriptor {
    name: String,
    config: Option<OffloadPolicy>,
}

impl OffloadDescriptor {
    /// Construct a descriptor.
    #[must_use]
    pub fn new(name: impl Into<String>, config: Option<OffloadPolicy>) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    /// Descriptor name as configured.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attached policy blob, if any.
    #[must_use]
    pub fn config(&self) -> Option<&OffloadPolicy> {
        self.config.as_ref()
    }

    /// Keepalive policy when this descriptor carries one.
    #[must_use]
    pub fn keepalive(&self) -> Option<&KeepaliveConfig> {
        match self.config.as_ref() {
            Some(OffloadPolicy::Keepalive(config)) => Some(config),
            _ => None,
        }
    }
}

/// Comparison applied between the requested and the stored descriptor names.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum NameMatch {
    /// Names must be identical.
    #[default]
    Exact,
    /// Stored name only has to start with the requested name (legacy configurator behaviour).
    Prefix,
}

impl NameMatch {
    fn matches(self, stored: &str, requested: &str) -> bool {
        match self {
            Self::Exact => stored == requested,
            Self::Prefix => stored.as_bytes().starts_with(requested.as_bytes()),
        }
    }
}

/// Source of the descriptor table.
pub trait OffloadProvider {
    /// Ordered descriptor table; never mutated by the node.
    fn descriptors(&self) -> &[OffloadDescriptor];
}

impl OffloadProvider for [OffloadDescriptor] {
    fn descriptors(&self) -> &[OffloadDescriptor] {
        self
    }
}

impl OffloadProvider for Vec<OffloadDescriptor> {
    fn descriptors(&self) -> &[OffloadDescriptor] {
        self
    }
}

/// Return the first descriptor whose name matches `name`.
///
/// A missing entry is reported as a warning and `None`; it is never an error here.
pub fn find_descriptor<'a>(
    list: &'a [OffloadDescriptor],
    name: &str,
    mode: NameMatch,
) -> Option<&'a OffloadDescriptor> {
    let found = list
        .iter()
        .find(|descriptor| mode.matches(descriptor.name(), name));
    if found.is_none() {
        warn!("[tko][offload] unable to find {name} offloads configuration");
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keepalive::RawPortBinding;

    fn table() -> Vec<OffloadDescriptor> {
        vec![
            OffloadDescriptor::new(
                "ARP",
                Some(OffloadPolicy::Arp(ArpOffloadConfig {
                    peer_auto_reply: true,
                    peer_age_s: 1200,
                })),
            ),
            OffloadDescriptor::new(
                "TKOX",
                Some(OffloadPolicy::PacketFilter(PacketFilterConfig {
                    wake_ports: vec![80],
                    direction: FilterDirection::Inbound,
                })),
            ),
            OffloadDescriptor::new(
                "TKO",
                Some(OffloadPolicy::Keepalive(
                    KeepaliveConfig::new(20, 3, 3)
                        .with_port(RawPortBinding::new("10.0.2.2", 3360, 3353)),
                )),
            ),
        ]
    }

    #[test]
    fn exact_lookup_finds_present_name() {
        let list = table();
        let found = find_descriptor(&list, "TKO", NameMatch::Exact).expect("TKO present");
        assert_eq!(found.name(), "TKO");
        assert!(found.keepalive().is_some());
    }

    #[test]
    fn absent_name_is_not_found() {
        let list = table();
        assert!(find_descriptor(&list, "NOPE", NameMatch::Exact).is_none());
        assert!(find_descriptor(&[], "TKO", NameMatch::Exact).is_none());
    }

    #[test]
    fn prefix_mode_reproduces_legacy_match() {
        let list = table();
        let found = find_descriptor(&list, "TKO", NameMatch::Prefix).expect("prefix match");
        assert_eq!(found.name(), "TKOX");
        assert!(find_descriptor(&list, "TKOXY", NameMatch::Prefix).is_none());
    }

    #[test]
    fn lookup_is_idempotent() {
        let list = table();
        let first = find_descriptor(&list, "ARP", NameMatch::Exact);
        let second = find_descriptor(&list, "ARP", NameMatch::Exact);
        assert!(core::ptr::eq(first.unwrap(), second.unwrap()));
    }

    #[test]
    fn keepalive_accessor_ignores_other_policies() {
        let list = table();
        assert!(list[0].keepalive().is_none());
        assert!(OffloadDescriptor::new("TKO", None).keepalive().is_none());
    }
}
