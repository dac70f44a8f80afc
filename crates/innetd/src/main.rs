//! innetd — in-network computing hop daemon.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;

use innet_core::config::{HopConfig, KernelKind};
use innet_services::{
    ChainHop, HopRelay, HopStats, IterationKernel, PowerIterationKernel, RelaySettings,
    ScriptedKernel,
};

mod status;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = HopConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = HopConfig::load().context("failed to load config")?;
    config.validate().context("invalid config")?;
    let next_hop = config.network.next_hop.context("next_hop is not set")?;

    tracing::info!(
        listen = %config.network.listen_addr,
        next_hop = %next_hop,
        leader = config.compute.leader,
        mode = ?config.compute.mode,
        kernel = ?config.compute.kernel,
        max_rounds = config.compute.max_rounds,
        "innetd starting"
    );

    let socket = Arc::new(
        UdpSocket::bind(config.network.listen_addr)
            .await
            .context("failed to bind hop socket")?,
    );
    let listen_addr = socket.local_addr()?;

    let stats = HopStats::new();
    let settings = RelaySettings {
        next_hop,
        mode: config.compute.mode,
        leader: config.compute.leader,
        assembly_timeout: Duration::from_secs(config.compute.assembly_timeout_secs),
    };

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let max_rounds = config.compute.max_rounds;
    let relay_task = match config.compute.kernel {
        KernelKind::Scripted => {
            let mut kernel = ScriptedKernel::new(config.compute.scripted_total_rounds);
            if config.compute.converge_after > 0 {
                kernel = kernel.converging_after(config.compute.converge_after);
            }
            spawn_relay(socket, settings, kernel, max_rounds, &stats, &shutdown_tx)
        }
        KernelKind::PowerIteration => spawn_relay(
            socket,
            settings,
            PowerIterationKernel::default(),
            max_rounds,
            &stats,
            &shutdown_tx,
        ),
    };

    let stats_printer = {
        let stats = stats.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(10));
            loop {
                interval.tick().await;
                let s = stats.snapshot();
                tracing::info!(
                    received = s.datagrams_received,
                    forwarded = s.chunks_forwarded,
                    computed = s.messages_computed,
                    fast_forwarded = s.messages_fast_forwarded,
                    dropped = s.dropped_format
                        + s.dropped_sequence
                        + s.dropped_state
                        + s.dropped_kernel
                        + s.dropped_orphan,
                    "hop stats"
                );
            }
        })
    };

    // Status HTTP endpoint
    let status_port = config.network.status_port;
    if status_port != 0 {
        let state = status::StatusState {
            hop: status::HopInfo {
                role: if config.compute.leader { "leader" } else { "follower" },
                mode: config.compute.mode,
                kernel: config.compute.kernel,
                max_rounds,
                listen_addr,
                next_hop,
            },
            stats: stats.clone(),
        };
        tokio::spawn(async move {
            if let Err(e) = status::serve(state, status_port).await {
                tracing::error!(error = %e, "status server failed");
            }
        });
    }

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv() => tracing::info!("shutting down"),
        r = relay_task         => tracing::error!("hop relay exited: {:?}", r),
        r = stats_printer      => tracing::error!("stats printer exited: {:?}", r),
    }

    Ok(())
}

fn spawn_relay<K: IterationKernel>(
    socket: Arc<UdpSocket>,
    settings: RelaySettings,
    kernel: K,
    max_rounds: u32,
    stats: &HopStats,
    shutdown: &broadcast::Sender<()>,
) -> tokio::task::JoinHandle<Result<()>> {
    let hop = Arc::new(ChainHop::new(kernel, max_rounds));
    tokio::spawn(HopRelay::new(socket, settings, hop, stats.clone(), shutdown.subscribe()).run())
}
