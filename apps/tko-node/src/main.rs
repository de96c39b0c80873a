// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Run the keepalive node against the host network simulation.
// Author: Lukas Bower
#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use env_logger::Env;
use log::{info, warn, LevelFilter};

use tko_node::host::{build_network, Pacing, SimSettle, SimSuspender, SimWifi};
use tko_node::idle::{spawn_idle_forever, spawn_idle_task_with_flag};
use tko_node::net::diag;
use tko_node::net::stack::SimSockets;
use tko_node::{bring_up, load_config, AssociationClient, IdleLoop, NodeConfig};

/// TCP keepalive offload node (host simulation).
#[derive(Debug, Parser)]
#[command(author = "Lukas Bower", version, about = "TCP keepalive offload node", long_about = None)]
struct Cli {
    /// Node configuration file; compiled-in defaults are used when omitted.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(long)]
    verbose: bool,

    /// Stop after this many suspend/resume cycles; without it the idle loop never returns.
    #[arg(long, value_name = "N")]
    max_wakeups: Option<u64>,

    /// Pace the simulated segment in wall-clock time.
    #[arg(long)]
    realtime: bool,
}

fn init_logging(verbose: bool) {
    let default_level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let mut builder =
        env_logger::Builder::from_env(Env::default().default_filter_or(default_level.as_str()));
    builder.format_timestamp_millis();
    let _ = builder.try_init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match cli.config.as_deref() {
        Some(path) => load_config(path)?,
        None => NodeConfig::builtin().context("builtin configuration")?,
    };
    let pacing = if cli.realtime {
        Pacing::Realtime
    } else {
        Pacing::Virtual
    };

    let network = build_network(&config.sim);
    let radio = SimWifi::new(config.wifi.clone(), config.sim.station_ip)
        .with_join_failures(config.sim.join_failures);
    let mut wifi = AssociationClient::new(radio, config.wifi.clone());
    let mut sockets = SimSockets::new(Arc::clone(&network));

    let context = bring_up(&mut wifi, &mut sockets, &config.offloads, config.keepalive)
        .context("node bring-up failed")?;
    if let Some(report) = &context.report {
        if let Err(status) = report.status() {
            warn!("keepalive establishment incomplete (status {status})");
        }
    }

    let Some(max_wakeups) = cli.max_wakeups else {
        let suspender = SimSuspender::new(Arc::clone(&network), Arc::clone(&context.connections))
            .with_pacing(pacing);
        let idle = IdleLoop::new(
            suspender,
            SimSettle::new(Arc::clone(&network), pacing),
            context.interface(),
            config.power,
        );
        let handle = spawn_idle_forever(idle).context("failed to spawn network idle task")?;
        if handle.join().is_err() {
            return Err(anyhow!("network idle task panicked"));
        }
        return Ok(());
    };

    let running = Arc::new(AtomicBool::new(true));
    let suspender = SimSuspender::new(Arc::clone(&network), Arc::clone(&context.connections))
        .with_running_flag(Arc::clone(&running))
        .with_pacing(pacing);
    let idle = IdleLoop::new(
        suspender,
        SimSettle::new(Arc::clone(&network), pacing),
        context.interface(),
        config.power,
    );
    let task = spawn_idle_task_with_flag(idle, Some(max_wakeups), running)
        .context("failed to spawn network idle task")?;
    let cycles = task.join();

    let snapshot = diag::snapshot();
    info!(
        "idle task finished after {cycles} cycles: {} resumes, {} timeouts, {} station frames",
        snapshot.resumes,
        snapshot.suspend_timeouts,
        snapshot.frames_tx + snapshot.frames_rx
    );
    Ok(())
}
