// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: TCP keepalive offload policy and per-slot port bindings.
// Author: Lukas Bower

//! TCP keepalive offload (TKO) policy model.
//!
//! Configurator output describes each keepalive slot with sentinel values
//! (`0.0.0.0`, zero ports) for unused entries. The raw entries are kept as
//! provided; [`KeepaliveConfig::bindings`] converts them into
//! `Option<Result<PortBinding, InvalidAddress>>` so the establisher never
//! inspects sentinels. A malformed address keeps its slot active.

use core::fmt;
use core::time::Duration;
use std::net::Ipv4Addr;

use heapless::Vec as HeaplessVec;
use log::warn;
use thiserror::Error;
use tko_net_constants::{MAX_TKO, NULL_IP_ADDRESS};

/// Port binding exactly as emitted by the offload configurator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawPortBinding {
    /// Remote server address in dotted-quad notation, or [`NULL_IP_ADDRESS`].
    pub remote_ip: String,
    /// Remote server port; zero marks the slot unused.
    pub remote_port: u16,
    /// Local port to bind; zero marks the slot unused.
    pub local_port: u16,
}

impl RawPortBinding {
    /// Construct a raw binding.
    #[must_use]
    pub fn new(remote_ip: impl Into<String>, remote_port: u16, local_port: u16) -> Self {
        Self {
            remote_ip: remote_ip.into(),
            remote_port,
            local_port,
        }
    }

    /// Unused slot as emitted by the configurator.
    #[must_use]
    pub fn unused() -> Self {
        Self::new(NULL_IP_ADDRESS, 0, 0)
    }

    /// A slot is active when both ports are set and the address is not the sentinel.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.remote_port > 0 && self.local_port > 0 && self.remote_ip != NULL_IP_ADDRESS
    }
}

/// Active keepalive endpoint for one slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PortBinding {
    /// Remote TCP server address.
    pub remote_ip: Ipv4Addr,
    /// Remote TCP server port.
    pub remote_port: u16,
    /// Local port bound before connecting.
    pub local_port: u16,
}

impl PortBinding {
    /// Convert a configurator entry. Unused slots are `None`; an active slot whose
    /// address is not a usable IPv4 address stays active and yields the error.
    pub fn from_raw(raw: &RawPortBinding) -> Option<Result<Self, InvalidAddress>> {
        if !raw.is_active() {
            return None;
        }
        let binding = match raw.remote_ip.trim().parse::<Ipv4Addr>() {
            Ok(remote_ip) if !remote_ip.is_unspecified() => Ok(Self {
                remote_ip,
                remote_port: raw.remote_port,
                local_port: raw.local_port,
            }),
            _ => Err(InvalidAddress {
                address: raw.remote_ip.clone(),
            }),
        };
        Some(binding)
    }
}

/// Active keepalive entry whose remote address cannot be connected to.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("keepalive remote address '{address}' is not a usable IPv4 address")]
pub struct InvalidAddress {
    /// Address text as configured.
    pub address: String,
}

impl fmt::Display for PortBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} (local port {})",
            self.remote_ip, self.remote_port, self.local_port
        )
    }
}

/// Selects who generates keepalive probes for an established connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum KeepaliveMode {
    /// The host TCP stack is programmed with the policy timing and sends probes itself.
    Host,
    /// Probes are generated by the offload engine while the host stack is suspended.
    #[default]
    Offloaded,
}

impl KeepaliveMode {
    /// Map the legacy "enable host keepalive" switch onto a mode.
    #[must_use]
    pub const fn from_host_enabled(enabled: bool) -> Self {
        if enabled {
            Self::Host
        } else {
            Self::Offloaded
        }
    }
}

/// Policy blob carried by the `TKO` offload descriptor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeepaliveConfig {
    interval_s: u16,
    retry_interval_s: u16,
    retry_count: u16,
    ports: HeaplessVec<RawPortBinding, MAX_TKO>,
}

impl KeepaliveConfig {
    /// Construct a policy with the supplied timing and no port entries.
    #[must_use]
    pub fn new(interval_s: u16, retry_interval_s: u16, retry_count: u16) -> Self {
        Self {
            interval_s,
            retry_interval_s,
            retry_count,
            ports: HeaplessVec::new(),
        }
    }

    /// Append a configurator entry. Returns the entry back when all slots are taken.
    pub fn push_port(&mut self, port: RawPortBinding) -> Result<(), RawPortBinding> {
        self.ports.push(port)
    }

    /// Builder form of [`Self::push_port`]; entries beyond capacity are dropped with a warning.
    #[must_use]
    pub fn with_port(mut self, port: RawPortBinding) -> Self {
        if let Err(port) = self.push_port(port) {
            warn!(
                "[tko][config] keepalive table full ({MAX_TKO} slots); dropping entry for {}",
                port.remote_ip
            );
        }
        self
    }

    /// Configurator entries in slot order.
    #[must_use]
    pub fn raw_ports(&self) -> &[RawPortBinding] {
        &self.ports
    }

    /// Per-slot bindings; unused and trailing slots are `None`.
    #[must_use]
    pub fn bindings(&self) -> [Option<Result<PortBinding, InvalidAddress>>; MAX_TKO] {
        core::array::from_fn(|slot| self.ports.get(slot).and_then(PortBinding::from_raw))
    }

    /// Number of slots holding an active binding, usable or not.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.ports.iter().filter(|raw| raw.is_active()).count()
    }

    /// Idle time before the first keepalive probe.
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.interval_s))
    }

    /// Delay between unanswered probes.
    #[must_use]
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.retry_interval_s))
    }

    /// Unanswered probes tolerated before the peer is declared dead.
    #[must_use]
    pub fn retry_count(&self) -> u16 {
        self.retry_count
    }

    /// Time after which a silent peer is abandoned.
    #[must_use]
    pub fn dead_peer_timeout(&self) -> Duration {
        self.interval() + self.retry_interval() * u32::from(self.retry_count)
    }
}
