//! `cccc` — runs the peer mailbox/delivery/handoff orchestrator loop against
//! a pair of tmux-hosted CLI agents.

mod cli;
mod settings;

use std::collections::HashMap;
use std::time::Duration;

use cccc_core::bridge::BridgeSupervisor;
use cccc_core::handoff::FilterConfig;
use cccc_core::orchestrator::{Orchestrator, OrchestratorConfig};
use cccc_core::types::Peer;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let args = cli::Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "cccc=info,cccc_core=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(home = %args.home.display(), "starting cccc orchestrator");

    let profiles = settings::load_profiles(&args.settings_dir());

    let mut panes = HashMap::new();
    if let Some(pane) = &args.pane_peer_a {
        panes.insert(Peer::PeerA, pane.clone());
    }
    if let Some(pane) = &args.pane_peer_b {
        panes.insert(Peer::PeerB, pane.clone());
    }

    let mut foreman = profiles.foreman.clone();
    foreman.allowed = foreman.allowed || args.foreman_allowed;

    let mut delivery = profiles.cli.delivery;
    delivery.require_ack = delivery.require_ack || args.require_ack;

    let cfg = OrchestratorConfig {
        home: args.home.clone(),
        state_dir: args.state_dir(),
        commands_path: args.commands_path(),
        session_name: args.session.clone(),
        panes,
        profiles: profiles.cli,
        delivery,
        keepalive: profiles.keepalive,
        foreman,
        handoff_filter: FilterConfig::default(),
        tick_interval: Duration::from_millis(args.tick_ms),
    };

    let mut orchestrator = Orchestrator::new(cfg)?;

    for (name, bridge_config) in &profiles.bridges {
        if bridge_config.autostart {
            orchestrator.add_bridge(BridgeSupervisor::new(
                name.clone(),
                bridge_config.clone(),
                format!("cccc-bridge-{name}"),
                vec![],
                args.state_dir(),
            ));
        }
    }

    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("received ctrl-c, shutting down");
        shutdown_signal.cancel();
    });

    orchestrator.run(shutdown).await?;
    Ok(())
}
