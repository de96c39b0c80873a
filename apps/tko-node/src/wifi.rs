// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Wireless association client with bounded back-to-back retries.
// Author: Lukas Bower

//! Network association client.

use core::fmt;
use std::net::IpAddr;

use heapless::String as HeaplessString;
use log::{error, info, warn};
use thiserror::Error;
use tko_net_constants::{MAX_PASSPHRASE_LEN, MAX_SSID_LEN, MAX_WIFI_RETRY_COUNT};

use crate::error::{AssociationError, DriverStatus};
use crate::net::diag::NET_DIAG;
use crate::platform::{InterfaceHandle, InterfaceKind, WirelessManager};

/// Security modes understood by the connection manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SecurityMode {
    /// Open network without a passphrase.
    Open,
    /// WPA personal with AES.
    WpaAesPsk,
    /// WPA2 personal with AES.
    Wpa2AesPsk,
    /// WPA3 SAE.
    Wpa3Sae,
    /// WPA2/WPA3 transition mode.
    Wpa2Wpa3Mixed,
}

impl SecurityMode {
    /// Whether the mode authenticates with a passphrase.
    #[must_use]
    pub const fn requires_passphrase(self) -> bool {
        !matches!(self, Self::Open)
    }

    /// Configuration spelling of the mode.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::WpaAesPsk => "wpa-aes-psk",
            Self::Wpa2AesPsk => "wpa2-aes-psk",
            Self::Wpa3Sae => "wpa3-sae",
            Self::Wpa2Wpa3Mixed => "wpa2-wpa3-mixed",
        }
    }

    /// Parse the configuration spelling.
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        [
            Self::Open,
            Self::WpaAesPsk,
            Self::Wpa2AesPsk,
            Self::Wpa3Sae,
            Self::Wpa2Wpa3Mixed,
        ]
        .into_iter()
        .find(|mode| mode.label() == label)
    }
}

/// Credentials and retry bound used to join the access point.
#[derive(Clone, PartialEq, Eq)]
pub struct AssociationParameters {
    ssid: HeaplessString<MAX_SSID_LEN>,
    passphrase: HeaplessString<MAX_PASSPHRASE_LEN>,
    security: SecurityMode,
    max_attempts: u8,
}

/// Rejected association parameters.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CredentialError {
    /// SSID is empty or longer than the radio accepts.
    #[error("ssid must be 1..={} bytes", MAX_SSID_LEN)]
    InvalidSsid,
    /// Passphrase does not fit the radio's buffer.
    #[error("passphrase exceeds {} bytes", MAX_PASSPHRASE_LEN)]
    PassphraseTooLong,
}

impl AssociationParameters {
    /// Construct parameters using the default retry bound.
    pub fn new(
        ssid: &str,
        passphrase: &str,
        security: SecurityMode,
    ) -> Result<Self, CredentialError> {
        if ssid.is_empty() {
            return Err(CredentialError::InvalidSsid);
        }
        let ssid = HeaplessString::try_from(ssid).map_err(|_| CredentialError::InvalidSsid)?;
        let passphrase = HeaplessString::try_from(passphrase)
            .map_err(|_| CredentialError::PassphraseTooLong)?;
        Ok(Self {
            ssid,
            passphrase,
            security,
            max_attempts: MAX_WIFI_RETRY_COUNT,
        })
    }

    /// Override the number of association attempts (at least one).
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u8) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Network name.
    #[must_use]
    pub fn ssid(&self) -> &str {
        self.ssid.as_str()
    }

    /// Shared secret.
    #[must_use]
    pub fn passphrase(&self) -> &str {
        self.passphrase.as_str()
    }

    /// Security mode.
    #[must_use]
    pub fn security(&self) -> SecurityMode {
        self.security
    }

    /// Attempts performed before reporting failure.
    #[must_use]
    pub fn max_attempts(&self) -> u8 {
        self.max_attempts
    }
}

impl fmt::Debug for AssociationParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssociationParameters")
            .field("ssid", &self.ssid.as_str())
            .field("passphrase", &"<redacted>")
            .field("security", &self.security)
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

/// Successful association.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Association {
    /// Address assigned to the station interface.
    pub address: IpAddr,
    /// Interface the node is associated on.
    pub interface: InterfaceHandle,
    /// Join attempts it took, including the successful one.
    pub attempts: u8,
}

/// Drives the connection manager through initialisation and bounded join retries.
pub struct AssociationClient<W> {
    manager: W,
    params: AssociationParameters,
    initialised: bool,
}

impl<W: WirelessManager> AssociationClient<W> {
    /// Create a client around `manager`.
    pub fn new(manager: W, params: AssociationParameters) -> Self {
        Self {
            manager,
            params,
            initialised: false,
        }
    }

    /// Parameters the client joins with.
    #[must_use]
    pub fn params(&self) -> &AssociationParameters {
        &self.params
    }

    /// Borrow the underlying manager.
    #[must_use]
    pub fn manager(&self) -> &W {
        &self.manager
    }

    /// Join the configured network.
    ///
    /// The connection manager is initialised on the first call only; a failed
    /// initialisation returns immediately without any join attempt. Join attempts
    /// run back to back with no backoff.
    pub fn connect_to_network(&mut self) -> Result<Association, AssociationError> {
        if !self.initialised {
            self.manager.init(InterfaceKind::Station).map_err(|status| {
                error!("[tko][wifi] connection manager init failed: {status}");
                AssociationError::Init(status)
            })?;
            self.initialised = true;
            info!("[tko][wifi] Wi-Fi initialisation is successful");
        }

        info!("[tko][wifi] join to AP: {}", self.params.ssid());
        let max_attempts = self.params.max_attempts();
        let mut last = DriverStatus::from_raw(0);
        for attempt in 1..=max_attempts {
            NET_DIAG.record_association_attempt();
            match self.manager.connect(&self.params) {
                Ok(address) => {
                    info!(
                        "[tko][wifi] successfully joined wifi network {} (attempt {attempt}/{max_attempts})",
                        self.params.ssid()
                    );
                    if let IpAddr::V4(v4) = address {
                        info!("[tko][wifi] assigned IP address: {v4}");
                    }
                    return Ok(Association {
                        address,
                        interface: self.manager.station_interface(),
                        attempts: attempt,
                    });
                }
                Err(status) => {
                    last = status;
                    warn!(
                        "[tko][wifi] failed to join {} (attempt {attempt}/{max_attempts}, status {status}){}",
                        self.params.ssid(),
                        retry_note(attempt, max_attempts)
                    );
                }
            }
        }

        error!(
            "[tko][wifi] giving up on {} after {max_attempts} attempts",
            self.params.ssid()
        );
        Err(AssociationError::Exhausted {
            attempts: max_attempts,
            last,
        })
    }
}

fn retry_note(attempt: u8, max_attempts: u8) -> &'static str {
    if attempt < max_attempts {
        "; retrying"
    } else {
        ""
    }
}
