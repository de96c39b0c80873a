// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Open the configured keepalive connections, tolerating per-slot failure.
// Author: Lukas Bower

//! Keepalive connection establishment.
//!
//! Establishment resolves the `TKO` offload descriptor, walks its slots in
//! order and opens one connection per active binding. A failing slot never
//! stops the walk; the outcome of every slot is reported back.

use std::collections::{BTreeMap, BTreeSet};

use log::{error, info, warn};
use tko_net_constants::{MAX_TKO, TKO_DESCRIPTOR_NAME};

use super::diag::NET_DIAG;
use super::table::ConnectionTable;
use crate::error::{DriverStatus, EstablishError};
use crate::keepalive::KeepaliveMode;
use crate::offload::{find_descriptor, NameMatch, OffloadProvider};
use crate::platform::{InterfaceHandle, SocketSubsystem};

/// Per-slot outcome of an establishment run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EstablishReport {
    /// Slots whose connection was opened and stored in the table.
    pub succeeded: BTreeSet<usize>,
    /// Slots whose connect failed, with the collaborator status.
    pub failed: BTreeMap<usize, DriverStatus>,
    /// Slots skipped because the binding is unused.
    pub skipped: BTreeSet<usize>,
}

impl EstablishReport {
    /// Boundary status: `Ok` when every active binding connected, otherwise the
    /// status of the last failing slot in slot order.
    pub fn status(&self) -> Result<(), DriverStatus> {
        match self.failed.last_key_value() {
            Some((_, status)) => Err(*status),
            None => Ok(()),
        }
    }

    /// Number of connect attempts made.
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    /// Whether every active binding connected.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Drives socket creation for each configured keepalive slot.
pub struct ConnectionEstablisher<'a, S, P: ?Sized> {
    sockets: &'a mut S,
    offloads: &'a P,
    interface: InterfaceHandle,
    mode: KeepaliveMode,
    name_match: NameMatch,
}

impl<'a, S, P> ConnectionEstablisher<'a, S, P>
where
    S: SocketSubsystem,
    P: OffloadProvider + ?Sized,
{
    /// Establisher using exact descriptor name matching.
    pub fn new(
        sockets: &'a mut S,
        offloads: &'a P,
        interface: InterfaceHandle,
        mode: KeepaliveMode,
    ) -> Self {
        Self {
            sockets,
            offloads,
            interface,
            mode,
            name_match: NameMatch::Exact,
        }
    }

    /// Select how the descriptor name is compared.
    #[must_use]
    pub fn with_name_match(mut self, name_match: NameMatch) -> Self {
        self.name_match = name_match;
        self
    }

    /// Open a connection for every active keepalive slot, storing handles in `table`.
    pub fn establish_all_connections(
        &mut self,
        table: &mut ConnectionTable<S::Handle>,
    ) -> Result<EstablishReport, EstablishError> {
        self.sockets.init().map_err(|status| {
            error!("[tko][socket] socket subsystem init failed: {status}");
            EstablishError::SocketInit(status)
        })?;

        let offloads = self.offloads;
        let descriptor = find_descriptor(
            offloads.descriptors(),
            TKO_DESCRIPTOR_NAME,
            self.name_match,
        )
        .ok_or_else(|| EstablishError::DescriptorMissing {
            name: TKO_DESCRIPTOR_NAME.to_owned(),
        })?;
        let policy = descriptor.keepalive().ok_or_else(|| {
            warn!("[tko][socket] descriptor {} has no keepalive policy", descriptor.name());
            EstablishError::PolicyMissing {
                name: descriptor.name().to_owned(),
            }
        })?;

        let mut report = EstablishReport::default();
        for (slot, binding) in policy.bindings().iter().enumerate() {
            let binding = match binding {
                None => {
                    info!("[tko][socket] skipping unused keepalive slot {slot}");
                    NET_DIAG.record_binding_skipped();
                    report.skipped.insert(slot);
                    continue;
                }
                Some(Err(err)) => {
                    NET_DIAG.record_connect_attempt();
                    NET_DIAG.record_connect_failure();
                    error!("[tko][socket] slot {slot}: {err}, status {STATUS_INVALID_ADDRESS}");
                    report.failed.insert(slot, STATUS_INVALID_ADDRESS);
                    continue;
                }
                Some(Ok(binding)) => binding,
            };

            NET_DIAG.record_connect_attempt();
            match self
                .sockets
                .create_and_connect(&self.interface, binding, policy, self.mode)
            {
                Ok(handle) => match table.populate(slot, handle) {
                    Ok(()) => {
                        NET_DIAG.record_connect_success();
                        info!(
                            "[tko][socket] slot {slot}: connected to {binding} on {}",
                            self.interface
                        );
                        report.succeeded.insert(slot);
                    }
                    Err(err) => {
                        NET_DIAG.record_connect_failure();
                        error!("[tko][socket] slot {slot}: {err}; dropping new connection to {binding}");
                        report.failed.insert(slot, STATUS_SLOT_OCCUPIED);
                    }
                },
                Err(status) => {
                    NET_DIAG.record_connect_failure();
                    error!(
                        "[tko][socket] slot {slot}: failed to connect to {binding}, status {status}"
                    );
                    report.failed.insert(slot, status);
                }
            }
        }

        info!(
            "[tko][socket] established {}/{} keepalive connections ({} of {MAX_TKO} slots unused)",
            report.succeeded.len(),
            report.attempted(),
            report.skipped.len()
        );
        Ok(report)
    }
}

/// Status reported for a slot that already held a handle.
pub const STATUS_SLOT_OCCUPIED: DriverStatus = DriverStatus::from_raw(0x0400_0001);
/// Status reported for an active slot whose remote address is not IPv4.
pub const STATUS_INVALID_ADDRESS: DriverStatus = DriverStatus::from_raw(0x0400_0002);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keepalive::{KeepaliveConfig, PortBinding, RawPortBinding};
    use crate::offload::{OffloadDescriptor, OffloadPolicy};

    #[derive(Default)]
    struct FakeSockets {
        init_status: Option<DriverStatus>,
        refuse_local_ports: Vec<u16>,
        calls: Vec<PortBinding>,
        modes: Vec<KeepaliveMode>,
    }

    impl SocketSubsystem for FakeSockets {
        type Handle = u16;

        fn init(&mut self) -> Result<(), DriverStatus> {
            self.init_status.map_or(Ok(()), Err)
        }

        fn create_and_connect(
            &mut self,
            _interface: &InterfaceHandle,
            binding: &PortBinding,
            _policy: &KeepaliveConfig,
            mode: KeepaliveMode,
        ) -> Result<u16, DriverStatus> {
            self.calls.push(*binding);
            self.modes.push(mode);
            if self.refuse_local_ports.contains(&binding.local_port) {
                Err(DriverStatus::from_raw(u32::from(binding.local_port)))
            } else {
                Ok(binding.local_port)
            }
        }
    }

    fn offloads(config: KeepaliveConfig) -> Vec<OffloadDescriptor> {
        vec![OffloadDescriptor::new(
            "TKO",
            Some(OffloadPolicy::Keepalive(config)),
        )]
    }

    fn run(
        sockets: &mut FakeSockets,
        table_source: &[OffloadDescriptor],
        table: &mut ConnectionTable<u16>,
    ) -> Result<EstablishReport, EstablishError> {
        ConnectionEstablisher::new(
            sockets,
            table_source,
            InterfaceHandle::station(),
            KeepaliveMode::Offloaded,
        )
        .establish_all_connections(table)
    }

    #[test]
    fn connects_only_active_slots() {
        let config = KeepaliveConfig::new(20, 3, 3)
            .with_port(RawPortBinding::new("10.0.2.2", 3360, 3353))
            .with_port(RawPortBinding::unused())
            .with_port(RawPortBinding::new("10.0.2.2", 3361, 3354))
            .with_port(RawPortBinding::new("10.0.2.2", 3362, 0));
        let mut sockets = FakeSockets::default();
        let mut table = ConnectionTable::new();
        let report = run(&mut sockets, &offloads(config), &mut table).unwrap();

        assert_eq!(sockets.calls.len(), 2);
        assert_eq!(table.get(0), Some(&3353));
        assert_eq!(table.get(2), Some(&3354));
        assert!(!table.is_populated(1));
        assert!(!table.is_populated(3));
        assert_eq!(report.skipped, BTreeSet::from([1, 3]));
        assert_eq!(report.status(), Ok(()));
    }

    #[test]
    fn failure_does_not_stop_later_slots() {
        let config = KeepaliveConfig::new(20, 3, 3)
            .with_port(RawPortBinding::new("10.0.2.2", 3360, 3353))
            .with_port(RawPortBinding::new("10.0.2.2", 3361, 3354));
        let mut sockets = FakeSockets {
            refuse_local_ports: vec![3353],
            ..FakeSockets::default()
        };
        let mut table = ConnectionTable::new();
        let report = run(&mut sockets, &offloads(config), &mut table).unwrap();

        assert!(!table.is_populated(0));
        assert_eq!(table.get(1), Some(&3354));
        assert_eq!(report.status(), Err(DriverStatus::from_raw(3353)));
        assert!(!report.is_complete());
        assert_eq!(report.attempted(), 2);
    }

    #[test]
    fn last_failing_slot_wins_status() {
        let config = KeepaliveConfig::new(20, 3, 3)
            .with_port(RawPortBinding::new("10.0.2.2", 1, 11))
            .with_port(RawPortBinding::new("10.0.2.2", 2, 12))
            .with_port(RawPortBinding::new("10.0.2.2", 3, 13));
        let mut sockets = FakeSockets {
            refuse_local_ports: vec![11, 12],
            ..FakeSockets::default()
        };
        let mut table = ConnectionTable::new();
        let report = run(&mut sockets, &offloads(config), &mut table).unwrap();
        assert_eq!(report.status(), Err(DriverStatus::from_raw(12)));
        assert_eq!(report.succeeded, BTreeSet::from([2]));
    }

    #[test]
    fn socket_init_failure_is_fatal() {
        let config = KeepaliveConfig::new(20, 3, 3)
            .with_port(RawPortBinding::new("10.0.2.2", 3360, 3353));
        let mut sockets = FakeSockets {
            init_status: Some(DriverStatus::from_raw(9)),
            ..FakeSockets::default()
        };
        let mut table = ConnectionTable::new();
        let err = run(&mut sockets, &offloads(config), &mut table).unwrap_err();
        assert_eq!(err, EstablishError::SocketInit(DriverStatus::from_raw(9)));
        assert!(err.is_fatal());
        assert!(sockets.calls.is_empty());
    }

    #[test]
    fn missing_descriptor_opens_nothing() {
        let mut sockets = FakeSockets::default();
        let mut table = ConnectionTable::new();
        let list = vec![OffloadDescriptor::new("ARP", None)];
        let err = run(&mut sockets, &list, &mut table).unwrap_err();
        assert!(err.is_configuration_missing());
        assert!(sockets.calls.is_empty());
        assert!(table.is_empty());
    }

    #[test]
    fn descriptor_without_policy_is_configuration_missing() {
        let mut sockets = FakeSockets::default();
        let mut table = ConnectionTable::new();
        let list = vec![OffloadDescriptor::new("TKO", None)];
        let err = run(&mut sockets, &list, &mut table).unwrap_err();
        assert_eq!(err, EstablishError::PolicyMissing { name: "TKO".into() });
    }

    #[test]
    fn keepalive_mode_is_forwarded() {
        let config = KeepaliveConfig::new(20, 3, 3)
            .with_port(RawPortBinding::new("10.0.2.2", 3360, 3353));
        let list = offloads(config);
        let mut sockets = FakeSockets::default();
        let mut table = ConnectionTable::new();
        ConnectionEstablisher::new(
            &mut sockets,
            list.as_slice(),
            InterfaceHandle::station(),
            KeepaliveMode::Host,
        )
        .establish_all_connections(&mut table)
        .unwrap();
        assert_eq!(sockets.modes, vec![KeepaliveMode::Host]);
    }

    #[test]
    fn occupied_slot_is_reported_as_failure() {
        let config = KeepaliveConfig::new(20, 3, 3)
            .with_port(RawPortBinding::new("10.0.2.2", 3360, 3353));
        let mut sockets = FakeSockets::default();
        let mut table = ConnectionTable::new();
        table.populate(0, 1).unwrap();
        let report = run(&mut sockets, &offloads(config), &mut table).unwrap();
        assert_eq!(report.status(), Err(STATUS_SLOT_OCCUPIED));
        assert_eq!(table.get(0), Some(&1));
    }

    #[test]
    fn malformed_address_is_a_failed_slot() {
        let config = KeepaliveConfig::new(20, 3, 3)
            .with_port(RawPortBinding::new("10.0.2.256", 3360, 3353))
            .with_port(RawPortBinding::new("10.0.2.2", 3361, 3354));
        let mut sockets = FakeSockets::default();
        let mut table = ConnectionTable::new();
        let report = run(&mut sockets, &offloads(config), &mut table).unwrap();

        assert_eq!(sockets.calls.len(), 1);
        assert!(!table.is_populated(0));
        assert_eq!(table.get(1), Some(&3354));
        assert_eq!(report.skipped, BTreeSet::from([2, 3]));
        assert_eq!(report.failed.get(&0), Some(&STATUS_INVALID_ADDRESS));
        assert_eq!(report.status(), Err(STATUS_INVALID_ADDRESS));
        assert_eq!(report.attempted(), 2);
    }
}
