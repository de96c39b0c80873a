// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Host-side stand-ins for the radio, power layer and delay primitive.
// Author: Lukas Bower

//! Host simulation of the node's collaborators.
//!
//! [`SimWifi`] plays the access point, [`SimSuspender`] plays the power/offload
//! layer watching the simulated segment for traffic, and [`SimSettle`]
//! implements the settle delay in virtual or wall-clock time.

use core::time::Duration;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use log::{debug, info, warn};
use smoltcp::iface::SocketHandle;

use crate::config::SimSettings;
use crate::error::DriverStatus;
use crate::net::stack::{SharedNetwork, SimNetwork, SimNetworkConfig};
use crate::net::ConnectionTable;
use crate::platform::{
    InterfaceHandle, InterfaceKind, NetSuspender, SettleTimer, SuspendOutcome, WaitLimit,
    WirelessManager,
};
use crate::wifi::AssociationParameters;

/// Access point not found.
pub const STATUS_NO_SUCH_NETWORK: DriverStatus = DriverStatus::from_raw(0x0300_0001);
/// Authentication rejected by the access point.
pub const STATUS_AUTH_FAILED: DriverStatus = DriverStatus::from_raw(0x0300_0002);
/// Transient join failure.
pub const STATUS_JOIN_FAILED: DriverStatus = DriverStatus::from_raw(0x0300_0003);

/// Build the shared segment described by `settings`.
#[must_use]
pub fn build_network(settings: &SimSettings) -> SharedNetwork {
    Arc::new(spin::Mutex::new(SimNetwork::new(SimNetworkConfig {
        station_ip: settings.station_ip,
        peer_ip: settings.peer_ip,
        listen_ports: settings.listen_ports.clone(),
        connect_timeout: settings.connect_timeout,
        peer_send_interval: settings.peer_send_interval,
    })))
}

/// Simulated access point and connection manager.
#[derive(Debug)]
pub struct SimWifi {
    access_point: AssociationParameters,
    station_ip: Ipv4Addr,
    join_failures: u8,
    init_status: Option<DriverStatus>,
    joins: u32,
}

impl SimWifi {
    /// Access point accepting `access_point` credentials and assigning `station_ip`.
    #[must_use]
    pub fn new(access_point: AssociationParameters, station_ip: Ipv4Addr) -> Self {
        Self {
            access_point,
            station_ip,
            join_failures: 0,
            init_status: None,
            joins: 0,
        }
    }

    /// Reject the next `failures` join attempts before accepting.
    #[must_use]
    pub fn with_join_failures(mut self, failures: u8) -> Self {
        self.join_failures = failures;
        self
    }

    /// Make connection manager initialisation fail.
    #[must_use]
    pub fn failing_init(mut self, status: DriverStatus) -> Self {
        self.init_status = Some(status);
        self
    }

    /// Join attempts seen so far.
    #[must_use]
    pub fn joins(&self) -> u32 {
        self.joins
    }
}

impl WirelessManager for SimWifi {
    fn init(&mut self, kind: InterfaceKind) -> Result<(), DriverStatus> {
        if let Some(status) = self.init_status {
            return Err(status);
        }
        debug!("[tko][sim] connection manager ready ({kind:?})");
        Ok(())
    }

    fn connect(&mut self, params: &AssociationParameters) -> Result<IpAddr, DriverStatus> {
        self.joins += 1;
        if params.ssid() != self.access_point.ssid() {
            return Err(STATUS_NO_SUCH_NETWORK);
        }
        if params.security() != self.access_point.security()
            || params.passphrase() != self.access_point.passphrase()
        {
            return Err(STATUS_AUTH_FAILED);
        }
        if self.join_failures > 0 {
            self.join_failures -= 1;
            return Err(STATUS_JOIN_FAILED);
        }
        Ok(IpAddr::V4(self.station_ip))
    }
}

/// How simulated waits relate to wall-clock time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Pacing {
    /// Virtual time only; waits return as fast as the host can step the segment.
    #[default]
    Virtual,
    /// Sleep for each simulated step.
    Realtime,
}

impl Pacing {
    fn pace(self, step: Duration) {
        if self == Self::Realtime {
            thread::sleep(step);
        }
    }
}

/// Power layer stand-in: suspends the station once the segment has been idle for
/// the inactivity interval and resumes it on the first frame afterwards.
pub struct SimSuspender {
    network: SharedNetwork,
    connections: Arc<ConnectionTable<SocketHandle>>,
    running: Option<Arc<AtomicBool>>,
    pacing: Pacing,
}

impl SimSuspender {
    /// Suspender over `network` reporting offloads from `connections`.
    #[must_use]
    pub fn new(network: SharedNetwork, connections: Arc<ConnectionTable<SocketHandle>>) -> Self {
        Self {
            network,
            connections,
            running: None,
            pacing: Pacing::Virtual,
        }
    }

    /// Abandon waits once `running` is cleared.
    #[must_use]
    pub fn with_running_flag(mut self, running: Arc<AtomicBool>) -> Self {
        self.running = Some(running);
        self
    }

    /// Pace each inactivity window in wall-clock time.
    #[must_use]
    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    fn cancelled(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| !running.load(Ordering::Relaxed))
    }

    fn step(&self, window: Duration) -> u64 {
        let frames = self.network.lock().step(window);
        self.pacing.pace(window);
        frames
    }

    fn offloaded_sockets(&self) -> usize {
        let network = self.network.lock();
        self.connections
            .iter_occupied()
            .filter(|(_, handle)| network.socket_state(**handle).is_some())
            .count()
    }
}

impl NetSuspender for SimSuspender {
    fn suspend_and_wait(
        &mut self,
        interface: &InterfaceHandle,
        max_wait: WaitLimit,
        inactivity_interval: Duration,
        inactivity_window: Duration,
    ) -> SuspendOutcome {
        if inactivity_window.is_zero() {
            warn!("[tko][sim] refusing suspend with a zero inactivity window");
            return SuspendOutcome::Failed(DriverStatus::from_raw(0x0300_0010));
        }

        let mut elapsed = Duration::ZERO;
        let mut idle = Duration::ZERO;
        while idle < inactivity_interval {
            if self.cancelled() {
                return SuspendOutcome::Cancelled;
            }
            if self.step(inactivity_window) > 0 {
                idle = Duration::ZERO;
            } else {
                idle += inactivity_window;
            }
            elapsed += inactivity_window;
            if idle < inactivity_interval && max_wait.expired(elapsed) {
                return SuspendOutcome::Busy;
            }
        }

        info!(
            "[tko][sim] {interface} suspended with {} keepalive socket(s) offloaded",
            self.offloaded_sockets()
        );

        let mut suspended_for = Duration::ZERO;
        loop {
            if self.cancelled() {
                return SuspendOutcome::Cancelled;
            }
            let frames = self.step(inactivity_window);
            elapsed += inactivity_window;
            suspended_for += inactivity_window;
            if frames > 0 {
                debug!("[tko][sim] {interface} woken by {frames} frame(s)");
                return SuspendOutcome::Resumed { suspended_for };
            }
            if max_wait.expired(elapsed) {
                return SuspendOutcome::TimedOut;
            }
        }
    }
}

/// Settle delay that keeps the simulated segment running for the delay.
pub struct SimSettle {
    network: SharedNetwork,
    pacing: Pacing,
}

impl SimSettle {
    /// Settle timer that keeps `network` running.
    #[must_use]
    pub fn new(network: SharedNetwork, pacing: Pacing) -> Self {
        Self { network, pacing }
    }
}

impl SettleTimer for SimSettle {
    fn settle(&mut self, delay: Duration) {
        let _ = self.network.lock().step(delay);
        self.pacing.pace(delay);
    }
}
