// Author: Lukas Bower
// Purpose: Load node configuration files from disk.

use std::fs;
use std::path::Path;
use std::time::Duration;

use tempfile::tempdir;
use tko_node::platform::WaitLimit;
use tko_node::{load_config, KeepaliveMode, OffloadPolicy};

#[test]
fn bundled_sample_loads() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tko-node.toml");
    let config = load_config(&path).expect("sample config");
    assert_eq!(config.wifi.ssid(), "tko-lab");
    assert_eq!(config.keepalive.mode, KeepaliveMode::Host);
    assert_eq!(config.power.max_wait, WaitLimit::Forever);
    assert_eq!(config.active_keepalive_ports(), 3);
    assert_eq!(config.sim.join_failures, 2);
    assert!(matches!(
        config.offloads[2].config(),
        Some(OffloadPolicy::PacketFilter(_))
    ));
}

#[test]
fn minimal_file_uses_defaults() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("node.toml");
    fs::write(
        &path,
        "[wifi]\nssid = \"cafe\"\nsecurity = \"open\"\n",
    )
    .expect("write config");
    let config = load_config(&path).expect("minimal config");
    assert!(config.offloads.is_empty());
    assert_eq!(config.power.inactivity_interval, Duration::from_millis(300));
    assert_eq!(config.power.inactivity_window, Duration::from_millis(200));
    assert_eq!(config.power.settle_delay, Duration::from_millis(100));
    assert_eq!(config.keepalive.mode, KeepaliveMode::Offloaded);
}

#[test]
fn missing_file_reports_path() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("absent.toml");
    let err = load_config(&path).unwrap_err();
    assert!(format!("{err:#}").contains("absent.toml"));
}

#[test]
fn malformed_toml_is_rejected_with_context() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("broken.toml");
    fs::write(&path, "[wifi\nssid = 1").expect("write config");
    let err = load_config(&path).unwrap_err();
    let rendered = format!("{err:#}");
    assert!(rendered.contains("broken.toml"));
    assert!(rendered.contains("TOML"));
}

#[test]
fn unparsable_sim_address_is_rejected() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("node.toml");
    fs::write(
        &path,
        "[wifi]\nssid = \"cafe\"\nsecurity = \"open\"\n\n[sim]\npeer_ip = \"10.0.2\"\n",
    )
    .expect("write config");
    let err = load_config(&path).unwrap_err();
    assert!(format!("{err:#}").contains("sim.peer_ip"));
}
