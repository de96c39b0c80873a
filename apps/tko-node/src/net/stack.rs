// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Two-node smoltcp segment standing in for the wireless link and keepalive server.
// Author: Lukas Bower

//! Simulated station and keepalive server sharing one Ethernet segment.
//!
//! The station interface is the node under test; the peer interface plays the
//! keepalive server and listens on the configured ports. Connects run a real
//! TCP handshake: ports the peer does not listen on are refused with RST, and
//! addresses nobody answers ARP for fail after the connect timeout.

use core::time::Duration;
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::sync::Arc;

use log::{debug, info, warn};
use smoltcp::iface::{Config as IfaceConfig, Interface, SocketHandle, SocketSet};
use smoltcp::socket::tcp;
use smoltcp::time::{Duration as SmolDuration, Instant};
use smoltcp::wire::{EthernetAddress, HardwareAddress, IpAddress, IpCidr};

use super::diag::NET_DIAG;
use super::wire::{NetworkClock, WireCounters, WirePhy, WireSnapshot};
use super::{SIM_PEER_IP, SIM_PREFIX, SIM_STATION_IP};
use crate::error::DriverStatus;
use crate::keepalive::{KeepaliveConfig, KeepaliveMode, PortBinding};
use crate::platform::{InterfaceHandle, SocketSubsystem};

/// Peer answered the SYN with RST.
pub const STATUS_CONNECTION_REFUSED: DriverStatus = DriverStatus::from_raw(0x0200_0001);
/// No answer before the connect timeout.
pub const STATUS_CONNECT_TIMEOUT: DriverStatus = DriverStatus::from_raw(0x0200_0002);
/// Local port already bound by a live keepalive socket.
pub const STATUS_ADDRESS_IN_USE: DriverStatus = DriverStatus::from_raw(0x0200_0003);
/// The stack rejected the endpoint pair.
pub const STATUS_UNADDRESSABLE: DriverStatus = DriverStatus::from_raw(0x0200_0004);
/// Socket layer failed to initialise.
pub const STATUS_SOCKET_INIT_FAILED: DriverStatus = DriverStatus::from_raw(0x0200_0005);

const SOCKET_BUFFER_LEN: usize = 1024;
const CONNECT_STEP_MS: u64 = 10;
const POLL_ROUNDS: usize = 8;
const PEER_PAYLOAD: &[u8] = b"tko-ping";

/// Shape of the simulated segment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimNetworkConfig {
    /// Address assigned to the station on association.
    pub station_ip: Ipv4Addr,
    /// Address of the keepalive server.
    pub peer_ip: Ipv4Addr,
    /// Ports the keepalive server accepts connections on.
    pub listen_ports: Vec<u16>,
    /// Virtual time a connect may take before it is abandoned.
    pub connect_timeout: Duration,
    /// When set, the server pushes a small payload on every accepted connection at this period.
    pub peer_send_interval: Option<Duration>,
}

impl Default for SimNetworkConfig {
    fn default() -> Self {
        Self {
            station_ip: Ipv4Addr::from(SIM_STATION_IP),
            peer_ip: Ipv4Addr::from(SIM_PEER_IP),
            listen_ports: Vec::new(),
            connect_timeout: Duration::from_secs(3),
            peer_send_interval: None,
        }
    }
}

struct Endpoint {
    device: WirePhy,
    iface: Interface,
    sockets: SocketSet<'static>,
}

impl Endpoint {
    fn new(mut device: WirePhy, mac: [u8; 6], ip: Ipv4Addr, seed: u64, now: Instant) -> Self {
        let mut config = IfaceConfig::new(HardwareAddress::Ethernet(EthernetAddress(mac)));
        config.random_seed = seed;
        let mut iface = Interface::new(config, &mut device, now);
        iface.update_ip_addrs(|addrs| {
            let _ = addrs.push(IpCidr::new(IpAddress::Ipv4(ip), SIM_PREFIX));
        });
        Self {
            device,
            iface,
            sockets: SocketSet::new(Vec::new()),
        }
    }

    fn poll(&mut self, now: Instant) {
        let _ = self.iface.poll(now, &mut self.device, &mut self.sockets);
    }
}

fn tcp_socket() -> tcp::Socket<'static> {
    tcp::Socket::new(
        tcp::SocketBuffer::new(vec![0; SOCKET_BUFFER_LEN]),
        tcp::SocketBuffer::new(vec![0; SOCKET_BUFFER_LEN]),
    )
}

fn smol_duration(duration: Duration) -> SmolDuration {
    SmolDuration::from_millis(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}

/// Station and keepalive server on a shared simulated segment.
pub struct SimNetwork {
    clock: NetworkClock,
    station: Endpoint,
    peer: Endpoint,
    station_counters: Arc<WireCounters>,
    config: SimNetworkConfig,
    listeners: Vec<(u16, SocketHandle)>,
    accepted: BTreeSet<SocketHandle>,
    bound_ports: BTreeSet<u16>,
    station_sockets: BTreeSet<SocketHandle>,
    next_peer_send_ms: Option<u64>,
}

impl SimNetwork {
    /// Bring up both interfaces and arm the server's listeners.
    #[must_use]
    pub fn new(config: SimNetworkConfig) -> Self {
        let clock = NetworkClock::new();
        let (station_phy, peer_phy) = WirePhy::pair();
        let station_counters = station_phy.counters();
        let station = Endpoint::new(
            station_phy,
            [0x02, 0x00, 0x00, 0x00, 0x00, 0x0f],
            config.station_ip,
            0x5a5a_5a5a_1234_5678,
            clock.now(),
        );
        let peer = Endpoint::new(
            peer_phy,
            [0x02, 0x00, 0x00, 0x00, 0x00, 0x02],
            config.peer_ip,
            0x1234_5678_a5a5_a5a5,
            clock.now(),
        );
        let next_peer_send_ms = config
            .peer_send_interval
            .map(|interval| u64::try_from(interval.as_millis()).unwrap_or(u64::MAX));
        let mut network = Self {
            clock,
            station,
            peer,
            station_counters,
            config,
            listeners: Vec::new(),
            accepted: BTreeSet::new(),
            bound_ports: BTreeSet::new(),
            station_sockets: BTreeSet::new(),
            next_peer_send_ms,
        };
        network.rearm_listeners();
        info!(
            "[tko][sim] segment up: station {} server {} listening on {:?}",
            network.config.station_ip, network.config.peer_ip, network.config.listen_ports
        );
        network
    }

    /// Shape of the segment.
    #[must_use]
    pub fn config(&self) -> &SimNetworkConfig {
        &self.config
    }

    /// Virtual milliseconds elapsed.
    #[must_use]
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Station frame counters.
    #[must_use]
    pub fn station_activity(&self) -> WireSnapshot {
        self.station_counters.snapshot()
    }

    /// Keepalive sockets currently open on the station.
    #[must_use]
    pub fn open_station_sockets(&self) -> usize {
        self.station_sockets
            .iter()
            .filter(|handle| self.station.sockets.get::<tcp::Socket>(**handle).is_open())
            .count()
    }

    /// TCP state of a station socket handed out by [`Self::connect`].
    #[must_use]
    pub fn socket_state(&self, handle: SocketHandle) -> Option<tcp::State> {
        self.station_sockets
            .contains(&handle)
            .then(|| self.station.sockets.get::<tcp::Socket>(handle).state())
    }

    /// Advance virtual time by `delta` and let both interfaces exchange frames.
    /// Returns the number of frames the station moved during the step.
    pub fn step(&mut self, delta: Duration) -> u64 {
        let before = self.station_counters.snapshot();
        let now = self
            .clock
            .advance(u64::try_from(delta.as_millis()).unwrap_or(u64::MAX));
        self.peer_traffic();
        for _ in 0..POLL_ROUNDS {
            let mark = self.station_counters.snapshot().total();
            self.station.poll(now);
            self.peer.poll(now);
            self.station.poll(now);
            if self.station_counters.snapshot().total() == mark {
                break;
            }
        }
        self.drain_station();
        self.rearm_listeners();

        let after = self.station_counters.snapshot();
        let tx = after.tx_frames - before.tx_frames;
        let rx = after.rx_frames - before.rx_frames;
        NET_DIAG.record_frames_tx(tx);
        NET_DIAG.record_frames_rx(rx);
        tx + rx
    }

    /// Open a keepalive connection from the station and block (in virtual time)
    /// until the handshake completes, is refused or times out.
    pub fn connect(
        &mut self,
        binding: &PortBinding,
        policy: &KeepaliveConfig,
        mode: KeepaliveMode,
    ) -> Result<SocketHandle, DriverStatus> {
        if self.bound_ports.contains(&binding.local_port) {
            warn!(
                "[tko][sim] local port {} already bound",
                binding.local_port
            );
            return Err(STATUS_ADDRESS_IN_USE);
        }

        let mut socket = tcp_socket();
        if mode == KeepaliveMode::Host {
            socket.set_keep_alive(Some(smol_duration(policy.interval())));
            socket.set_timeout(Some(smol_duration(policy.dead_peer_timeout())));
        }
        let remote = (IpAddress::Ipv4(binding.remote_ip), binding.remote_port);
        if let Err(err) = socket.connect(self.station.iface.context(), remote, binding.local_port) {
            warn!("[tko][sim] connect to {binding} rejected by stack: {err}");
            return Err(STATUS_UNADDRESSABLE);
        }
        let handle = self.station.sockets.add(socket);

        let started = self.clock.now_ms();
        let timeout_ms = u64::try_from(self.config.connect_timeout.as_millis()).unwrap_or(u64::MAX);
        let outcome = loop {
            let _ = self.step(Duration::from_millis(CONNECT_STEP_MS));
            match self.station.sockets.get::<tcp::Socket>(handle).state() {
                tcp::State::Established => break Ok(()),
                tcp::State::Closed => break Err(STATUS_CONNECTION_REFUSED),
                state => {
                    if self.clock.now_ms().saturating_sub(started) >= timeout_ms {
                        debug!("[tko][sim] connect to {binding} stuck in {state}");
                        break Err(STATUS_CONNECT_TIMEOUT);
                    }
                }
            }
        };

        match outcome {
            Ok(()) => {
                self.bound_ports.insert(binding.local_port);
                self.station_sockets.insert(handle);
                Ok(handle)
            }
            Err(status) => {
                self.station.sockets.get_mut::<tcp::Socket>(handle).abort();
                self.station.poll(self.clock.now());
                let _ = self.station.sockets.remove(handle);
                Err(status)
            }
        }
    }

    fn rearm_listeners(&mut self) {
        let ports = self.config.listen_ports.clone();
        for port in ports {
            let waiting = self
                .listeners
                .iter()
                .any(|(listen_port, handle)| {
                    *listen_port == port
                        && self.peer.sockets.get::<tcp::Socket>(*handle).state()
                            == tcp::State::Listen
                });
            if waiting {
                continue;
            }
            let mut socket = tcp_socket();
            if let Err(err) = socket.listen(port) {
                warn!("[tko][sim] server cannot listen on {port}: {err}");
                continue;
            }
            let handle = self.peer.sockets.add(socket);
            self.listeners.retain(|(listen_port, old)| {
                if *listen_port == port {
                    self.accepted.insert(*old);
                    false
                } else {
                    true
                }
            });
            self.listeners.push((port, handle));
        }
    }

    fn peer_traffic(&mut self) {
        let (Some(interval), Some(due)) = (self.config.peer_send_interval, self.next_peer_send_ms)
        else {
            return;
        };
        let now = self.clock.now_ms();
        if now < due {
            return;
        }
        for handle in &self.accepted {
            let socket = self.peer.sockets.get_mut::<tcp::Socket>(*handle);
            if socket.may_send() {
                let _ = socket.send_slice(PEER_PAYLOAD);
            }
            if socket.can_recv() {
                let mut sink = [0u8; 64];
                let _ = socket.recv_slice(&mut sink);
            }
        }
        let period = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX).max(1);
        self.next_peer_send_ms = Some(now.saturating_add(period));
    }

    fn drain_station(&mut self) {
        let mut sink = [0u8; 256];
        for handle in &self.station_sockets {
            let socket = self.station.sockets.get_mut::<tcp::Socket>(*handle);
            while socket.can_recv() {
                match socket.recv_slice(&mut sink) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        }
    }
}

/// Shared handle to the simulated segment.
pub type SharedNetwork = Arc<spin::Mutex<SimNetwork>>;

/// [`SocketSubsystem`] backed by the simulated segment.
pub struct SimSockets {
    network: SharedNetwork,
    fail_init: Option<DriverStatus>,
    initialised: bool,
}

impl SimSockets {
    /// Socket layer over `network`; [`SocketSubsystem::init`] must run first.
    #[must_use]
    pub fn new(network: SharedNetwork) -> Self {
        Self {
            network,
            fail_init: None,
            initialised: false,
        }
    }

    /// Make [`SocketSubsystem::init`] fail with `status`.
    #[must_use]
    pub fn failing_init(mut self, status: DriverStatus) -> Self {
        self.fail_init = Some(status);
        self
    }
}

impl SocketSubsystem for SimSockets {
    type Handle = SocketHandle;

    fn init(&mut self) -> Result<(), DriverStatus> {
        if let Some(status) = self.fail_init {
            return Err(status);
        }
        self.initialised = true;
        Ok(())
    }

    fn create_and_connect(
        &mut self,
        interface: &InterfaceHandle,
        binding: &PortBinding,
        policy: &KeepaliveConfig,
        mode: KeepaliveMode,
    ) -> Result<SocketHandle, DriverStatus> {
        if !self.initialised {
            return Err(STATUS_SOCKET_INIT_FAILED);
        }
        debug!("[tko][sim] {interface}: connecting to {binding} ({mode:?} keepalive)");
        self.network.lock().connect(binding, policy, mode)
    }
}
