// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Status codes and typed errors surfaced by the keepalive node core.
// Author: Lukas Bower

//! Status codes and error taxonomy for association, connection establishment and startup.

use core::fmt;

use thiserror::Error;

/// Numeric result code reported by an external collaborator (radio, socket layer, power layer).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DriverStatus(u32);

impl DriverStatus {
    /// Wrap a raw collaborator result code.
    #[must_use]
    pub const fn from_raw(code: u32) -> Self {
        Self(code)
    }

    /// Raw numeric code.
    #[must_use]
    pub const fn code(self) -> u32 {
        self.0
    }
}

impl fmt::Display for DriverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

/// Failures raised while establishing the configured keepalive connections.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EstablishError {
    /// The socket subsystem refused to initialise; the node cannot continue.
    #[error("socket subsystem initialisation failed: {0}")]
    SocketInit(DriverStatus),
    /// No offload descriptor matched the requested name.
    #[error("offload descriptor {name} not found")]
    DescriptorMissing {
        /// Descriptor name that was looked up.
        name: String,
    },
    /// The descriptor exists but carries no keepalive policy blob.
    #[error("offload descriptor {name} carries no keepalive policy")]
    PolicyMissing {
        /// Descriptor name that was looked up.
        name: String,
    },
}

impl EstablishError {
    /// Fatal errors stop startup; configuration gaps only leave the node without sockets.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::SocketInit(_))
    }

    /// Indicates the configuration-missing class of failures.
    #[must_use]
    pub fn is_configuration_missing(&self) -> bool {
        matches!(
            self,
            Self::DescriptorMissing { .. } | Self::PolicyMissing { .. }
        )
    }

    /// Status code equivalent used at compatibility boundaries.
    #[must_use]
    pub fn status(&self) -> DriverStatus {
        match self {
            Self::SocketInit(status) => *status,
            Self::DescriptorMissing { .. } | Self::PolicyMissing { .. } => {
                STATUS_CONFIGURATION_MISSING
            }
        }
    }
}

/// Status reported at the boundary when the keepalive configuration is absent.
pub const STATUS_CONFIGURATION_MISSING: DriverStatus = DriverStatus::from_raw(0x0400_0000);

/// Failures raised by the wireless association client.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AssociationError {
    /// The connection manager could not be initialised; no join was attempted.
    #[error("connection manager initialisation failed: {0}")]
    Init(DriverStatus),
    /// Every association attempt failed.
    #[error("association failed after {attempts} attempts (last status {last})")]
    Exhausted {
        /// Number of join attempts performed.
        attempts: u8,
        /// Status returned by the final attempt.
        last: DriverStatus,
    },
}

impl AssociationError {
    /// Status of the failure that ended the association run.
    #[must_use]
    pub fn status(&self) -> DriverStatus {
        match self {
            Self::Init(status) => *status,
            Self::Exhausted { last, .. } => *last,
        }
    }
}

/// Errors that abort the startup sequence before the idle loop is started.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StartupError {
    /// The node never joined the wireless network.
    #[error("network association failed: {0}")]
    Association(#[from] AssociationError),
    /// Connection establishment hit a fatal error.
    #[error("connection establishment failed: {0}")]
    Establish(#[from] EstablishError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_status_renders_hex() {
        assert_eq!(DriverStatus::from_raw(0x2a).to_string(), "0x0000002a");
    }

    #[test]
    fn only_socket_init_is_fatal() {
        assert!(EstablishError::SocketInit(DriverStatus::from_raw(1)).is_fatal());
        let missing = EstablishError::DescriptorMissing {
            name: "TKO".into(),
        };
        assert!(!missing.is_fatal());
        assert!(missing.is_configuration_missing());
        assert_eq!(missing.status(), STATUS_CONFIGURATION_MISSING);
    }

    #[test]
    fn exhausted_association_reports_last_status() {
        let err = AssociationError::Exhausted {
            attempts: 5,
            last: DriverStatus::from_raw(0x0102),
        };
        assert_eq!(err.status().code(), 0x0102);
        assert!(err.to_string().contains("5 attempts"));
    }
}
