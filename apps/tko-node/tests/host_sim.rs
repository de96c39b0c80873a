// Author: Lukas Bower
// Purpose: End-to-end bring-up and suspend/resume cycles over the simulated segment.
#![cfg(feature = "host-sim")]

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use tko_node::host::{build_network, Pacing, SimSettle, SimSuspender, SimWifi};
use tko_node::net::stack::{
    SharedNetwork, SimSockets, STATUS_CONNECTION_REFUSED, STATUS_SOCKET_INIT_FAILED,
};
use tko_node::net::ConnectionTable;
use tko_node::platform::{InterfaceHandle, NetSuspender, SuspendOutcome, WaitLimit};
use tko_node::{
    bring_up, spawn_idle_task, AssociationClient, AssociationParameters, EstablishError,
    EstablishOptions, IdleLoop, KeepaliveConfig, KeepaliveMode, NameMatch, NodeContext,
    OffloadDescriptor, OffloadPolicy, RawPortBinding, SecurityMode, SimSettings, StartupError,
    SuspendWindow,
};

fn settings(peer_send_interval: Option<Duration>) -> SimSettings {
    SimSettings {
        listen_ports: vec![3360, 3361],
        peer_send_interval,
        ..SimSettings::default()
    }
}

fn keepalive_table(interval_s: u16) -> Vec<OffloadDescriptor> {
    let keepalive = KeepaliveConfig::new(interval_s, 1, 3)
        .with_port(RawPortBinding::new("10.0.2.2", 3360, 3353))
        .with_port(RawPortBinding::unused())
        .with_port(RawPortBinding::new("10.0.2.2", 4000, 3355))
        .with_port(RawPortBinding::new("10.0.2.2", 3361, 3356));
    vec![OffloadDescriptor::new(
        "TKO",
        Some(OffloadPolicy::Keepalive(keepalive)),
    )]
}

fn bring_up_sim(
    network: &SharedNetwork,
    table: &[OffloadDescriptor],
    mode: KeepaliveMode,
) -> NodeContext<smoltcp::iface::SocketHandle> {
    let params =
        AssociationParameters::new("tko-lab", "tko-passphrase", SecurityMode::Wpa2AesPsk)
            .expect("credentials");
    let radio = SimWifi::new(params.clone(), Ipv4Addr::new(10, 0, 2, 15)).with_join_failures(1);
    let mut wifi = AssociationClient::new(radio, params);
    let mut sockets = SimSockets::new(Arc::clone(network));
    bring_up(
        &mut wifi,
        &mut sockets,
        table,
        EstablishOptions {
            mode,
            name_match: NameMatch::Exact,
        },
    )
    .expect("bring-up")
}

#[test]
fn establishes_listening_ports_and_reports_refusal() {
    let network = build_network(&settings(None));
    let context = bring_up_sim(&network, &keepalive_table(20), KeepaliveMode::Offloaded);

    assert_eq!(context.association.attempts, 2);
    assert!(context.connections.is_populated(0));
    assert!(!context.connections.is_populated(1));
    assert!(!context.connections.is_populated(2));
    assert!(context.connections.is_populated(3));

    let report = context.report.expect("report");
    assert_eq!(report.failed.get(&2), Some(&STATUS_CONNECTION_REFUSED));
    assert_eq!(report.status(), Err(STATUS_CONNECTION_REFUSED));
    assert_eq!(network.lock().open_station_sockets(), 2);
}

#[test]
fn quiet_segment_times_out_under_bounded_wait() {
    let network = build_network(&settings(None));
    let mut suspender = SimSuspender::new(network, Arc::new(ConnectionTable::new()));
    let outcome = suspender.suspend_and_wait(
        &InterfaceHandle::station(),
        WaitLimit::Bounded(Duration::from_secs(2)),
        Duration::from_millis(300),
        Duration::from_millis(200),
    );
    assert_eq!(outcome, SuspendOutcome::TimedOut);
}

#[test]
fn server_traffic_resumes_suspended_stack() {
    let network = build_network(&settings(Some(Duration::from_secs(2))));
    let context = bring_up_sim(&network, &keepalive_table(20), KeepaliveMode::Offloaded);
    let mut suspender = SimSuspender::new(Arc::clone(&network), Arc::clone(&context.connections));
    let outcome = suspender.suspend_and_wait(
        &context.interface(),
        WaitLimit::Bounded(Duration::from_secs(10)),
        Duration::from_millis(300),
        Duration::from_millis(200),
    );
    assert!(
        matches!(outcome, SuspendOutcome::Resumed { .. }),
        "unexpected outcome {outcome:?}"
    );
}

#[test]
fn host_keepalive_probe_resumes_suspended_stack() {
    let network = build_network(&settings(None));
    let context = bring_up_sim(&network, &keepalive_table(1), KeepaliveMode::Host);
    let mut suspender = SimSuspender::new(Arc::clone(&network), Arc::clone(&context.connections));
    let outcome = suspender.suspend_and_wait(
        &context.interface(),
        WaitLimit::Bounded(Duration::from_secs(10)),
        Duration::from_millis(300),
        Duration::from_millis(100),
    );
    assert!(
        matches!(outcome, SuspendOutcome::Resumed { .. }),
        "unexpected outcome {outcome:?}"
    );
}

#[test]
fn idle_task_cycles_over_simulated_segment() {
    let network = build_network(&settings(Some(Duration::from_secs(1))));
    let context = bring_up_sim(&network, &keepalive_table(20), KeepaliveMode::Offloaded);
    let suspender = SimSuspender::new(Arc::clone(&network), Arc::clone(&context.connections));
    let window = SuspendWindow {
        max_wait: WaitLimit::Bounded(Duration::from_secs(5)),
        ..SuspendWindow::default()
    };
    let idle = IdleLoop::new(
        suspender,
        SimSettle::new(Arc::clone(&network), Pacing::Virtual),
        context.interface(),
        window,
    );
    let started_ms = network.lock().now_ms();
    let task = spawn_idle_task(idle, Some(3)).expect("spawn idle task");
    assert_eq!(task.join(), 3);
    assert!(network.lock().now_ms() > started_ms);
    assert_eq!(network.lock().open_station_sockets(), 2);
}

#[test]
fn socket_layer_failure_is_fatal_over_simulation() {
    let network = build_network(&settings(None));
    let params =
        AssociationParameters::new("tko-lab", "tko-passphrase", SecurityMode::Wpa2AesPsk)
            .expect("credentials");
    let radio = SimWifi::new(params.clone(), Ipv4Addr::new(10, 0, 2, 15));
    let mut wifi = AssociationClient::new(radio, params);
    let mut sockets = SimSockets::new(Arc::clone(&network)).failing_init(STATUS_SOCKET_INIT_FAILED);
    let err = bring_up(
        &mut wifi,
        &mut sockets,
        &keepalive_table(20),
        EstablishOptions::default(),
    )
    .unwrap_err();
    assert_eq!(
        err,
        StartupError::Establish(EstablishError::SocketInit(STATUS_SOCKET_INIT_FAILED))
    );
    assert_eq!(network.lock().open_station_sockets(), 0);
}
