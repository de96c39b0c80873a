// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Keepalive connection plumbing and the simulated network segment.
// Author: Lukas Bower

//! Networking subsystem: connection table, establishment, diagnostics and the
//! host simulation of the wireless segment.

pub mod diag;
pub mod establish;
#[cfg(feature = "host-sim")]
pub mod stack;
pub mod table;
#[cfg(feature = "host-sim")]
pub mod wire;

pub use diag::{NetDiag, NetDiagSnapshot, NET_DIAG};
pub use establish::{
    ConnectionEstablisher, EstablishReport, STATUS_INVALID_ADDRESS, STATUS_SLOT_OCCUPIED,
};
pub use table::{ConnectionTable, SlotError};

/// Largest Ethernet frame carried by the simulated segment.
pub const MAX_FRAME_LEN: usize = 1536;

/// MTU advertised to the TCP/IP stack.
pub const SIM_MTU: usize = 1514;

/// Default IPv4 address assigned to the station on the simulated segment.
pub const SIM_STATION_IP: [u8; 4] = [10, 0, 2, 15];
/// Default address of the keepalive server on the simulated segment.
pub const SIM_PEER_IP: [u8; 4] = [10, 0, 2, 2];
/// Prefix length of the simulated segment.
pub const SIM_PREFIX: u8 = 24;
