// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Defines the tko-net-constants library and public module surface.
// Author: Lukas Bower

#![no_std]
#![deny(unsafe_code)]
#![deny(missing_docs)]

//! Shared networking constants for the TCP keepalive offload node.

/// Name of the offload descriptor carrying the TCP keepalive policy.
pub const TKO_DESCRIPTOR_NAME: &str = "TKO";
/// Maximum number of keepalive connections the offload engine can track.
pub const MAX_TKO: usize = 4;
/// Sentinel address marking an unused keepalive slot in configurator output.
pub const NULL_IP_ADDRESS: &str = "0.0.0.0";

/// Number of back-to-back association attempts before giving up.
pub const MAX_WIFI_RETRY_COUNT: u8 = 5;
/// Longest SSID accepted by the connection manager (bytes).
pub const MAX_SSID_LEN: usize = 32;
/// Longest passphrase accepted by the connection manager (bytes).
pub const MAX_PASSPHRASE_LEN: usize = 64;

/// Idle time required before the network stack may be suspended (milliseconds).
pub const NETWORK_INACTIVE_INTERVAL_MS: u64 = 300;
/// Window over which inactivity is re-checked while waiting to suspend (milliseconds).
pub const NETWORK_INACTIVE_WINDOW_MS: u64 = 200;
/// Settle delay applied after every resume before suspending again (milliseconds).
pub const NETWORK_SUSPEND_DELAY_MS: u64 = 100;

/// Default keepalive probe interval (seconds).
pub const TKO_DEFAULT_INTERVAL_S: u16 = 20;
/// Default interval between unanswered keepalive retries (seconds).
pub const TKO_DEFAULT_RETRY_INTERVAL_S: u16 = 3;
/// Default number of unanswered keepalive retries before the peer is declared dead.
pub const TKO_DEFAULT_RETRY_COUNT: u16 = 3;
