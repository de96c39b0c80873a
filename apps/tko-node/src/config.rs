// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Load and validate the node's TOML configuration.
// Author: Lukas Bower

//! Node configuration.
//!
//! The on-disk format is TOML with `[wifi]`, `[power]`, `[keepalive]`,
//! `[[offload]]` and `[sim]` sections. Every section except `[wifi]` falls back
//! to the compiled-in defaults when omitted.

use std::collections::BTreeSet;
use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use tko_net_constants::{
    MAX_PASSPHRASE_LEN, MAX_SSID_LEN, MAX_TKO, MAX_WIFI_RETRY_COUNT,
    NETWORK_INACTIVE_INTERVAL_MS, NETWORK_INACTIVE_WINDOW_MS, NETWORK_SUSPEND_DELAY_MS,
    NULL_IP_ADDRESS, TKO_DEFAULT_INTERVAL_S, TKO_DEFAULT_RETRY_COUNT,
    TKO_DEFAULT_RETRY_INTERVAL_S, TKO_DESCRIPTOR_NAME,
};

use crate::idle::SuspendWindow;
use crate::keepalive::{KeepaliveConfig, KeepaliveMode, RawPortBinding};
use crate::net::{SIM_PEER_IP, SIM_STATION_IP};
use crate::offload::{
    ArpOffloadConfig, FilterDirection, NameMatch, OffloadDescriptor, OffloadPolicy,
    PacketFilterConfig,
};
use crate::platform::WaitLimit;
use crate::startup::EstablishOptions;
use crate::wifi::{AssociationParameters, SecurityMode};

const MIN_PSK_LEN: usize = 8;
const MAX_PSK_LEN: usize = MAX_PASSPHRASE_LEN - 1;

/// Fully validated node configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    /// Access point credentials and retry bound.
    pub wifi: AssociationParameters,
    /// Suspend/settle timing for the idle task.
    pub power: SuspendWindow,
    /// Keepalive establishment options.
    pub keepalive: EstablishOptions,
    /// Offload descriptor table in configurator order.
    pub offloads: Vec<OffloadDescriptor>,
    /// Host simulation parameters.
    pub sim: SimSettings,
}

/// Shape of the simulated radio and keepalive server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimSettings {
    /// Address handed to the station on association.
    pub station_ip: Ipv4Addr,
    /// Keepalive server address.
    pub peer_ip: Ipv4Addr,
    /// Ports the keepalive server accepts on.
    pub listen_ports: Vec<u16>,
    /// Association attempts the simulated access point rejects before accepting.
    pub join_failures: u8,
    /// Virtual time a connect may take.
    pub connect_timeout: Duration,
    /// Period of server-originated traffic, if any.
    pub peer_send_interval: Option<Duration>,
}

impl Default for SimSettings {
    fn default() -> Self {
        Self {
            station_ip: Ipv4Addr::from(SIM_STATION_IP),
            peer_ip: Ipv4Addr::from(SIM_PEER_IP),
            listen_ports: vec![3360],
            join_failures: 0,
            connect_timeout: Duration::from_secs(3),
            peer_send_interval: None,
        }
    }
}

impl NodeConfig {
    /// Compiled-in configuration used when no file is supplied.
    pub fn builtin() -> Result<Self> {
        let wifi = AssociationParameters::new("tko-lab", "tko-passphrase", SecurityMode::Wpa2AesPsk)
            .map_err(|err| anyhow!("builtin wifi credentials: {err}"))?;
        let keepalive = KeepaliveConfig::new(
            TKO_DEFAULT_INTERVAL_S,
            TKO_DEFAULT_RETRY_INTERVAL_S,
            TKO_DEFAULT_RETRY_COUNT,
        )
        .with_port(RawPortBinding::new("10.0.2.2", 3360, 3353))
        .with_port(RawPortBinding::unused())
        .with_port(RawPortBinding::unused())
        .with_port(RawPortBinding::unused());
        let config = Self {
            wifi,
            power: SuspendWindow::default(),
            keepalive: EstablishOptions::default(),
            offloads: vec![
                OffloadDescriptor::new(
                    "ARP",
                    Some(OffloadPolicy::Arp(ArpOffloadConfig {
                        peer_auto_reply: true,
                        peer_age_s: 1200,
                    })),
                ),
                OffloadDescriptor::new(
                    TKO_DESCRIPTOR_NAME,
                    Some(OffloadPolicy::Keepalive(keepalive)),
                ),
            ],
            sim: SimSettings::default(),
        };
        validate_config(&config)?;
        Ok(config)
    }

    /// Keepalive descriptor's active port count, for diagnostics.
    #[must_use]
    pub fn active_keepalive_ports(&self) -> usize {
        self.offloads
            .iter()
            .filter_map(OffloadDescriptor::keepalive)
            .map(KeepaliveConfig::active_count)
            .sum()
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NodeToml {
    wifi: WifiTomlSection,
    #[serde(default)]
    power: PowerTomlSection,
    #[serde(default)]
    keepalive: KeepaliveTomlSection,
    #[serde(default)]
    offload: Vec<OffloadTomlSection>,
    #[serde(default)]
    sim: SimTomlSection,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WifiTomlSection {
    ssid: String,
    #[serde(default)]
    passphrase: String,
    security: String,
    #[serde(default = "default_max_attempts")]
    max_attempts: u8,
}

fn default_max_attempts() -> u8 {
    MAX_WIFI_RETRY_COUNT
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, default)]
struct PowerTomlSection {
    inactivity_interval_ms: u64,
    inactivity_window_ms: u64,
    settle_delay_ms: u64,
    max_wait_ms: u64,
}

impl Default for PowerTomlSection {
    fn default() -> Self {
        Self {
            inactivity_interval_ms: NETWORK_INACTIVE_INTERVAL_MS,
            inactivity_window_ms: NETWORK_INACTIVE_WINDOW_MS,
            settle_delay_ms: NETWORK_SUSPEND_DELAY_MS,
            max_wait_ms: 0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, default)]
struct KeepaliveTomlSection {
    mode: String,
    descriptor_match: String,
}

impl Default for KeepaliveTomlSection {
    fn default() -> Self {
        Self {
            mode: "offloaded".to_owned(),
            descriptor_match: "exact".to_owned(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct OffloadTomlSection {
    name: String,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    interval_s: Option<u16>,
    #[serde(default)]
    retry_interval_s: Option<u16>,
    #[serde(default)]
    retry_count: Option<u16>,
    #[serde(default)]
    ports: Vec<PortTomlEntry>,
    #[serde(default)]
    peer_auto_reply: Option<bool>,
    #[serde(default)]
    peer_age_s: Option<u32>,
    #[serde(default)]
    wake_ports: Vec<u16>,
    #[serde(default)]
    direction: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PortTomlEntry {
    #[serde(default = "default_remote_ip")]
    remote_ip: String,
    #[serde(default)]
    remote_port: u16,
    #[serde(default)]
    local_port: u16,
}

fn default_remote_ip() -> String {
    NULL_IP_ADDRESS.to_owned()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, default)]
struct SimTomlSection {
    station_ip: String,
    peer_ip: String,
    listen_ports: Vec<u16>,
    join_failures: u8,
    connect_timeout_ms: u64,
    peer_send_interval_ms: u64,
}

impl Default for SimTomlSection {
    fn default() -> Self {
        let defaults = SimSettings::default();
        Self {
            station_ip: defaults.station_ip.to_string(),
            peer_ip: defaults.peer_ip.to_string(),
            listen_ports: defaults.listen_ports,
            join_failures: defaults.join_failures,
            connect_timeout_ms: 3000,
            peer_send_interval_ms: 0,
        }
    }
}

/// Load and validate the node configuration from disk.
pub fn load_config(path: &Path) -> Result<NodeConfig> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read node config {}", path.display()))?;
    parse_config(&text).with_context(|| format!("invalid node config {}", path.display()))
}

/// Parse and validate configuration text.
pub fn parse_config(text: &str) -> Result<NodeConfig> {
    let parsed: NodeToml = toml::from_str(text).context("invalid node config TOML")?;
    let config = NodeConfig {
        wifi: wifi_from_toml(parsed.wifi)?,
        power: SuspendWindow {
            inactivity_interval: Duration::from_millis(parsed.power.inactivity_interval_ms),
            inactivity_window: Duration::from_millis(parsed.power.inactivity_window_ms),
            settle_delay: Duration::from_millis(parsed.power.settle_delay_ms),
            max_wait: WaitLimit::from_millis(parsed.power.max_wait_ms),
        },
        keepalive: EstablishOptions {
            mode: parse_mode(&parsed.keepalive.mode)?,
            name_match: parse_name_match(&parsed.keepalive.descriptor_match)?,
        },
        offloads: parsed
            .offload
            .into_iter()
            .map(offload_from_toml)
            .collect::<Result<Vec<_>>>()?,
        sim: SimSettings {
            station_ip: parse_ipv4("sim.station_ip", &parsed.sim.station_ip)?,
            peer_ip: parse_ipv4("sim.peer_ip", &parsed.sim.peer_ip)?,
            listen_ports: parsed.sim.listen_ports,
            join_failures: parsed.sim.join_failures,
            connect_timeout: Duration::from_millis(parsed.sim.connect_timeout_ms),
            peer_send_interval: (parsed.sim.peer_send_interval_ms > 0)
                .then(|| Duration::from_millis(parsed.sim.peer_send_interval_ms)),
        },
    };
    validate_config(&config)?;
    Ok(config)
}

fn wifi_from_toml(section: WifiTomlSection) -> Result<AssociationParameters> {
    let security = SecurityMode::from_label(section.security.trim())
        .ok_or_else(|| anyhow!("wifi.security '{}' is not recognised", section.security))?;
    if section.ssid.is_empty() || section.ssid.len() > MAX_SSID_LEN {
        return Err(anyhow!("wifi.ssid must be 1..={MAX_SSID_LEN} bytes"));
    }
    if security.requires_passphrase() {
        let len = section.passphrase.len();
        if !(MIN_PSK_LEN..=MAX_PSK_LEN).contains(&len) {
            return Err(anyhow!(
                "wifi.passphrase must be {MIN_PSK_LEN}..={MAX_PSK_LEN} bytes for {}",
                security.label()
            ));
        }
    } else if !section.passphrase.is_empty() {
        return Err(anyhow!("wifi.passphrase must be empty for open networks"));
    }
    if section.max_attempts == 0 {
        return Err(anyhow!("wifi.max_attempts must be >= 1"));
    }
    let params = AssociationParameters::new(&section.ssid, &section.passphrase, security)
        .map_err(|err| anyhow!("wifi credentials rejected: {err}"))?;
    Ok(params.with_max_attempts(section.max_attempts))
}

fn parse_mode(value: &str) -> Result<KeepaliveMode> {
    match value.trim() {
        "offloaded" => Ok(KeepaliveMode::Offloaded),
        "host" => Ok(KeepaliveMode::Host),
        other => Err(anyhow!(
            "keepalive.mode '{other}' must be 'offloaded' or 'host'"
        )),
    }
}

fn parse_name_match(value: &str) -> Result<NameMatch> {
    match value.trim() {
        "exact" => Ok(NameMatch::Exact),
        "prefix" => Ok(NameMatch::Prefix),
        other => Err(anyhow!(
            "keepalive.descriptor_match '{other}' must be 'exact' or 'prefix'"
        )),
    }
}

fn parse_ipv4(label: &str, value: &str) -> Result<Ipv4Addr> {
    value
        .trim()
        .parse::<Ipv4Addr>()
        .with_context(|| format!("{label} '{value}' is not an IPv4 address"))
}

fn offload_from_toml(section: OffloadTomlSection) -> Result<OffloadDescriptor> {
    let name = section.name;
    let label = format!("offload '{name}'");
    let policy = match section.kind.as_deref().map(str::trim) {
        None | Some("none") => None,
        Some("keepalive") => {
            if section.ports.len() > MAX_TKO {
                return Err(anyhow!(
                    "{label} lists {} ports; at most {MAX_TKO} are supported",
                    section.ports.len()
                ));
            }
            let mut config = KeepaliveConfig::new(
                section.interval_s.unwrap_or(TKO_DEFAULT_INTERVAL_S),
                section.retry_interval_s.unwrap_or(TKO_DEFAULT_RETRY_INTERVAL_S),
                section.retry_count.unwrap_or(TKO_DEFAULT_RETRY_COUNT),
            );
            for port in section.ports {
                let raw = RawPortBinding::new(port.remote_ip, port.remote_port, port.local_port);
                config
                    .push_port(raw)
                    .map_err(|_| anyhow!("{label} keepalive table is full"))?;
            }
            Some(OffloadPolicy::Keepalive(config))
        }
        Some("arp") => Some(OffloadPolicy::Arp(ArpOffloadConfig {
            peer_auto_reply: section.peer_auto_reply.unwrap_or(true),
            peer_age_s: section.peer_age_s.unwrap_or(1200),
        })),
        Some("packet-filter") => {
            let direction = match section.direction.as_deref().map(str::trim) {
                None | Some("inbound") => FilterDirection::Inbound,
                Some("outbound") => FilterDirection::Outbound,
                Some(other) => {
                    return Err(anyhow!(
                        "{label} direction '{other}' must be 'inbound' or 'outbound'"
                    ))
                }
            };
            Some(OffloadPolicy::PacketFilter(PacketFilterConfig {
                wake_ports: section.wake_ports,
                direction,
            }))
        }
        Some(other) => return Err(anyhow!("{label} has unknown kind '{other}'")),
    };
    Ok(OffloadDescriptor::new(name, policy))
}

fn validate_config(config: &NodeConfig) -> Result<()> {
    if config.power.inactivity_interval.is_zero() {
        return Err(anyhow!("power.inactivity_interval_ms must be >= 1"));
    }
    if config.power.inactivity_window.is_zero() {
        return Err(anyhow!("power.inactivity_window_ms must be >= 1"));
    }
    let mut names = BTreeSet::new();
    for descriptor in &config.offloads {
        if descriptor.name().trim().is_empty() {
            return Err(anyhow!("offload name must not be empty"));
        }
        if !names.insert(descriptor.name()) {
            return Err(anyhow!("offload '{}' is defined twice", descriptor.name()));
        }
        if let Some(keepalive) = descriptor.keepalive() {
            if keepalive.interval().is_zero() {
                return Err(anyhow!(
                    "offload '{}' interval_s must be >= 1",
                    descriptor.name()
                ));
            }
            for (slot, binding) in keepalive.bindings().iter().enumerate() {
                if let Some(Err(err)) = binding {
                    return Err(anyhow!(
                        "offload '{}' ports[{slot}]: {err}",
                        descriptor.name()
                    ));
                }
            }
        }
    }
    if config.sim.connect_timeout.is_zero() {
        return Err(anyhow!("sim.connect_timeout_ms must be >= 1"));
    }
    if config.sim.listen_ports.contains(&0) {
        return Err(anyhow!("sim.listen_ports must not contain port 0"));
    }
    Ok(())
}
