// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Library surface of the TCP keepalive offload node.
// Author: Lukas Bower
#![deny(unsafe_code)]
#![deny(deprecated)]
#![warn(missing_docs)]

//! TCP keepalive offload node.
//!
//! The node joins a wireless network, opens the keepalive connections listed in
//! the `TKO` offload descriptor, and then parks its network stack in a
//! suspend/resume loop driven by the power layer. Radio, sockets and power
//! management are reached only through the traits in [`platform`]; the
//! `host-sim` feature supplies smoltcp-backed implementations of all of them.

pub mod config;
pub mod error;
#[cfg(feature = "host-sim")]
pub mod host;
pub mod idle;
pub mod keepalive;
pub mod net;
pub mod offload;
pub mod platform;
pub mod startup;
pub mod wifi;

pub use config::{load_config, parse_config, NodeConfig, SimSettings};
pub use error::{AssociationError, DriverStatus, EstablishError, StartupError};
pub use idle::{
    spawn_idle_forever, spawn_idle_task, IdleLoop, IdleState, IdleTask, SuspendWindow,
};
pub use keepalive::{
    InvalidAddress, KeepaliveConfig, KeepaliveMode, PortBinding, RawPortBinding,
};
pub use net::{ConnectionEstablisher, ConnectionTable, EstablishReport};
pub use offload::{find_descriptor, NameMatch, OffloadDescriptor, OffloadPolicy, OffloadProvider};
pub use startup::{bring_up, EstablishOptions, NodeContext};
pub use wifi::{Association, AssociationClient, AssociationParameters, SecurityMode};
