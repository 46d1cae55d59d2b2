//! AVRoute core entry point.
//!
//! Loads the configuration, builds the routing graph and runs the cost
//! distribution protocol against the network until Ctrl-C.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config / build_graph      -- plant, tie lines, timings
//!  └─ start services
//!       ├─ UdpPeerLink          (message port, inbound in the select loop)
//!       ├─ run_outbound         (Tokio task draining the OutboundQueue)
//!       ├─ discovery            (UDP listener + broadcaster threads)
//!       └─ protocol loop        (messages, engine events, timers)
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use avroute_core::{CoreMessage, PeerId};
use avroute_node::application::cost_distribution::CostDistributionHandler;
use avroute_node::application::cost_table::TableKind;
use avroute_node::application::diagnostics;
use avroute_node::bootstrap::build_graph;
use avroute_node::infrastructure::network::discovery::{
    start_discovery, DiscoveryEvent, DiscoverySettings,
};
use avroute_node::infrastructure::network::peer_link::{
    run_outbound, OutboundQueue, PeerTransport, UdpPeerLink,
};
use avroute_node::infrastructure::storage::config::{load_config, load_config_from};

/// Upper bound on how long the loop sleeps when no timer is armed.
const IDLE_TICK: Duration = Duration::from_secs(1);

/// AVRoute core process.
#[derive(Debug, Parser)]
#[command(
    name = "avroute-node",
    about = "Multi-room AV routing core with inter-core cost distribution",
    version
)]
struct Cli {
    /// Configuration file; defaults to the platform config directory.
    #[arg(long, env = "AVROUTE_CONFIG")]
    config: Option<PathBuf>,

    /// Overrides the core name announced to peers.
    #[arg(long, env = "AVROUTE_NAME")]
    name: Option<String>,

    /// Overrides the UDP message port.
    #[arg(long, env = "AVROUTE_MESSAGE_PORT")]
    message_port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config_from(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => load_config().context("loading config")?,
    };
    if let Some(name) = cli.name {
        config.core.name = name;
    }
    if let Some(port) = cli.message_port {
        config.network.message_port = port;
    }

    // Level from the config file unless `RUST_LOG` is set.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.core.log_level)),
        )
        .init();

    info!(name = %config.core.name, "AVRoute core starting");

    let graph = build_graph(&config).context("building routing graph")?;

    // ── Peer link ─────────────────────────────────────────────────────────────
    let session = Uuid::new_v4();
    let bind = SocketAddr::new(config.network.bind_address, config.network.message_port);
    let link = Arc::new(UdpPeerLink::bind(bind, session).await?);
    let local = PeerId::new(link.local_addr()?, session);

    let (queue, outbound_rx) = OutboundQueue::new();
    let outbound = tokio::spawn(run_outbound(Arc::clone(&link), outbound_rx));

    // ── Protocol handler ──────────────────────────────────────────────────────
    let mut events = graph.subscribe();
    let handler = CostDistributionHandler::new(
        local,
        config.core.name.clone(),
        Arc::clone(&graph),
        Arc::new(queue),
        config.protocol.timings(),
        config.tie_lines(),
    );
    handler.start(Instant::now());
    debug!("connections:\n{}", diagnostics::connections_table(&graph));
    debug!("sources:\n{}", diagnostics::sources_table(&graph));
    debug!("destinations:\n{}", diagnostics::destinations_table(&graph));

    // Shutdown flag for the discovery threads.
    let running = Arc::new(AtomicBool::new(true));

    // ── Discovery ─────────────────────────────────────────────────────────────
    let mut discovery_rx = match start_discovery(
        DiscoverySettings {
            core_name: config.core.name.clone(),
            session,
            discovery_port: config.network.discovery_port,
            message_port: config.network.message_port,
            announce_interval: Duration::from_secs(config.network.announce_interval_secs),
            broadcast_address: config.network.broadcast_address,
        },
        Arc::clone(&running),
    ) {
        Ok(rx) => Some(rx),
        Err(e) => {
            error!("failed to start discovery: {e}");
            None
        }
    };

    info!("AVRoute core ready.  Press Ctrl-C to exit.");

    // ── Protocol loop ─────────────────────────────────────────────────────────
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        let wake = handler
            .next_deadline()
            .unwrap_or_else(|| Instant::now() + IDLE_TICK);
        tokio::select! {
            signal = &mut shutdown => {
                if let Err(e) = signal {
                    error!("failed to listen for Ctrl-C: {e}");
                }
                info!("shutdown signal received");
                break;
            }
            inbound = link.recv() => match inbound {
                Ok((peer, message)) => handler.handle_message(peer, message, Instant::now()),
                Err(e) => debug!("peer link: {e}"),
            },
            Some(event) = next_discovery(&mut discovery_rx) => {
                handler.handle_message(event.peer, CoreMessage::Announce(event.announce), Instant::now());
            }
            event = events.recv() => match event {
                Ok(event) => handler.handle_routing_event(&event, Instant::now()),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "engine events lagged; refreshing local entries");
                    handler.handle_routing_event(&avroute_core::RoutingEvent::SourcesChanged, Instant::now());
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = tokio::time::sleep_until(wake.into()) => {
                handler.process_timers(Instant::now());
            }
        }
    }

    // ── Shutdown ──────────────────────────────────────────────────────────────
    running.store(false, Ordering::Relaxed);
    debug!("peers:\n{}", diagnostics::peers_table(&handler));
    debug!("source costs:\n{}", diagnostics::cost_table(&handler, TableKind::Sources));
    handler.shutdown();
    // Placeholders registered in the graph keep queue clones alive, so the
    // pump never drains on its own; give it a moment to flush the disconnects.
    if tokio::time::timeout(Duration::from_millis(500), outbound).await.is_err() {
        debug!("outbound pump still running at exit");
    }

    info!("AVRoute core stopped");
    Ok(())
}

/// Next announce, or never when discovery is not running.
async fn next_discovery(rx: &mut Option<mpsc::Receiver<DiscoveryEvent>>) -> Option<DiscoveryEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
