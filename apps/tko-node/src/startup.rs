// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Startup sequencing from association through keepalive connection setup.
// Author: Lukas Bower

//! Node bring-up.
//!
//! Association must succeed before any socket work; establishment runs exactly
//! once and its table is frozen before the idle task is handed a reference.

use std::sync::Arc;

use log::{info, warn};

use crate::error::StartupError;
use crate::keepalive::KeepaliveMode;
use crate::net::{ConnectionEstablisher, ConnectionTable, EstablishReport};
use crate::offload::{NameMatch, OffloadProvider};
use crate::platform::{InterfaceHandle, SocketSubsystem, WirelessManager};
use crate::wifi::{Association, AssociationClient};

/// State produced by a successful bring-up.
#[derive(Debug)]
pub struct NodeContext<H> {
    /// Association the connections run over.
    pub association: Association,
    /// Keepalive connections, read-only from here on.
    pub connections: Arc<ConnectionTable<H>>,
    /// Per-slot outcome; `None` when the keepalive configuration was missing.
    pub report: Option<EstablishReport>,
}

impl<H> NodeContext<H> {
    /// Interface the node associated on.
    #[must_use]
    pub fn interface(&self) -> InterfaceHandle {
        self.association.interface
    }
}

/// Options controlling connection establishment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EstablishOptions {
    /// Who generates keepalive probes.
    pub mode: KeepaliveMode,
    /// Descriptor name comparison.
    pub name_match: NameMatch,
}

/// Join the network, then open every configured keepalive connection.
///
/// Association failure aborts before any socket is touched. A missing keepalive
/// configuration leaves the table empty but is not an error; socket subsystem
/// failure is.
pub fn bring_up<W, S, P>(
    wifi: &mut AssociationClient<W>,
    sockets: &mut S,
    offloads: &P,
    options: EstablishOptions,
) -> Result<NodeContext<S::Handle>, StartupError>
where
    W: WirelessManager,
    S: SocketSubsystem,
    P: OffloadProvider + ?Sized,
{
    let association = wifi.connect_to_network()?;

    let mut table = ConnectionTable::new();
    let report = {
        let mut establisher =
            ConnectionEstablisher::new(sockets, offloads, association.interface, options.mode)
                .with_name_match(options.name_match);
        match establisher.establish_all_connections(&mut table) {
            Ok(report) => Some(report),
            Err(err) if err.is_configuration_missing() => {
                warn!("[tko][startup] {err}; continuing without keepalive connections");
                None
            }
            Err(err) => return Err(err.into()),
        }
    };

    if let Some(report) = &report {
        if let Err(status) = report.status() {
            warn!(
                "[tko][startup] {} of {} keepalive connections failed (last status {status})",
                report.failed.len(),
                report.attempted()
            );
        }
    }
    info!(
        "[tko][startup] node up on {} with {} keepalive connection(s)",
        association.interface,
        table.occupied_count()
    );

    Ok(NodeContext {
        association,
        connections: Arc::new(table),
        report,
    })
}
