// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Collaborator contracts consumed by the keepalive node core.
// Author: Lukas Bower

//! Platform abstraction over the radio, socket layer and power-management layer.
//!
//! The node core only drives these traits; target firmware and the host
//! simulation provide the implementations.

use core::fmt;
use core::time::Duration;
use std::net::IpAddr;

use crate::error::DriverStatus;
use crate::keepalive::{KeepaliveConfig, KeepaliveMode, PortBinding};
use crate::wifi::AssociationParameters;

/// Network interface roles exposed by the radio.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InterfaceKind {
    /// Station (client) interface.
    Station,
    /// Soft access point interface.
    AccessPoint,
}

/// Opaque reference to a network interface owned by the platform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct InterfaceHandle {
    kind: InterfaceKind,
    index: u8,
}

impl InterfaceHandle {
    /// Construct a handle.
    #[must_use]
    pub const fn new(kind: InterfaceKind, index: u8) -> Self {
        Self { kind, index }
    }

    /// Default station interface.
    #[must_use]
    pub const fn station() -> Self {
        Self::new(InterfaceKind::Station, 0)
    }

    /// Interface role.
    #[must_use]
    pub const fn kind(&self) -> InterfaceKind {
        self.kind
    }

    /// Platform index of the interface.
    #[must_use]
    pub const fn index(&self) -> u8 {
        self.index
    }
}

impl fmt::Display for InterfaceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.kind {
            InterfaceKind::Station => "sta",
            InterfaceKind::AccessPoint => "ap",
        };
        write!(f, "{prefix}{}", self.index)
    }
}

/// Socket layer surface used to open keepalive connections.
pub trait SocketSubsystem {
    /// Opaque per-connection handle kept in the connection table.
    type Handle;

    /// Initialise the socket layer. Must succeed before any connect.
    fn init(&mut self) -> Result<(), DriverStatus>;

    /// Create a socket, bind `binding.local_port`, connect to the remote endpoint and,
    /// in [`KeepaliveMode::Host`], program host keepalive from `policy`. Blocks until the
    /// connect succeeds or fails.
    fn create_and_connect(
        &mut self,
        interface: &InterfaceHandle,
        binding: &PortBinding,
        policy: &KeepaliveConfig,
        mode: KeepaliveMode,
    ) -> Result<Self::Handle, DriverStatus>;
}

/// Wireless connection manager.
pub trait WirelessManager {
    /// Bring up the connection manager for the given interface role.
    fn init(&mut self, kind: InterfaceKind) -> Result<(), DriverStatus>;

    /// Join the access point described by `params`, returning the assigned address.
    fn connect(&mut self, params: &AssociationParameters) -> Result<IpAddr, DriverStatus>;

    /// Interface the manager associates on.
    fn station_interface(&self) -> InterfaceHandle {
        InterfaceHandle::station()
    }
}

/// Upper bound on a single suspend-and-wait call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitLimit {
    /// Block until activity resumes the stack.
    Forever,
    /// Give up after the supplied duration.
    Bounded(Duration),
}

impl WaitLimit {
    /// Maps a zero duration onto [`WaitLimit::Forever`].
    #[must_use]
    pub fn from_millis(ms: u64) -> Self {
        if ms == 0 {
            Self::Forever
        } else {
            Self::Bounded(Duration::from_millis(ms))
        }
    }

    /// Whether `elapsed` has reached the limit.
    #[must_use]
    pub fn expired(&self, elapsed: Duration) -> bool {
        match self {
            Self::Forever => false,
            Self::Bounded(limit) => elapsed >= *limit,
        }
    }
}

/// Result of a suspend-and-wait call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SuspendOutcome {
    /// The stack was suspended and resumed on traffic after `suspended_for`.
    Resumed {
        /// Time the stack spent suspended.
        suspended_for: Duration,
    },
    /// The wait limit elapsed while suspended.
    TimedOut,
    /// Traffic never stopped long enough to suspend before the wait limit elapsed.
    Busy,
    /// The power layer rejected the request.
    Failed(DriverStatus),
    /// The wait was abandoned because the node is shutting down.
    Cancelled,
}

/// Power/offload layer able to suspend the network stack until traffic resumes it.
pub trait NetSuspender {
    /// Suspend `interface` once it has been idle for `inactivity_interval`, re-checking
    /// every `inactivity_window`, and block until activity resumes it or `max_wait`
    /// elapses.
    fn suspend_and_wait(
        &mut self,
        interface: &InterfaceHandle,
        max_wait: WaitLimit,
        inactivity_interval: Duration,
        inactivity_window: Duration,
    ) -> SuspendOutcome;
}

/// Delay primitive used for the post-resume settle period.
pub trait SettleTimer {
    /// Block the calling task for `delay`.
    fn settle(&mut self, delay: Duration);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_wait_means_forever() {
        assert_eq!(WaitLimit::from_millis(0), WaitLimit::Forever);
        assert!(!WaitLimit::Forever.expired(Duration::from_secs(u64::MAX / 4)));
        let bounded = WaitLimit::from_millis(250);
        assert!(!bounded.expired(Duration::from_millis(249)));
        assert!(bounded.expired(Duration::from_millis(250)));
    }

    #[test]
    fn interface_handle_renders_role() {
        assert_eq!(InterfaceHandle::station().to_string(), "sta0");
        assert_eq!(
            InterfaceHandle::new(InterfaceKind::AccessPoint, 1).to_string(),
            "ap1"
        );
    }
}
