//! Ember mesh daemon.
//!
//! Runs a mesh node over the UDP-broadcast reference transport: loads or
//! creates the identity, starts the mesh service, and logs mesh events until
//! interrupted.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use mesh_identity::{load_or_create_identity, FileKeyStore};
use mesh_service::{MeshEvent, MeshService, ServiceConfig};

mod config;
mod logging;
mod udp;

use config::DaemonConfig;
use logging::EmberLogFormatter;
use udp::UdpTransport;

/// Encrypted mesh messaging node
#[derive(Parser, Debug)]
#[command(name = "ember-mesh", version, about = "Encrypted mesh messaging node")]
struct Args {
    /// Path to the YAML config file
    #[arg(long, default_value = "ember.yaml")]
    config: PathBuf,

    /// Nickname announced to the mesh (overrides config)
    #[arg(long)]
    nickname: Option<String>,

    /// UDP port for the reference transport (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .event_format(EmberLogFormatter::new())
        .with_env_filter(
            EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut config = DaemonConfig::load_from_file(&args.config)?;
    if let Some(nickname) = args.nickname {
        config.nickname = nickname;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    let key_store = FileKeyStore::new(config.data_dir.join("identity.key"));
    let identity = load_or_create_identity(&key_store).await?;
    info!("Local peer {}", identity.fingerprint());

    let (transport, transport_events) = UdpTransport::bind(config.port).await?;
    let service_config = ServiceConfig {
        nickname: config.nickname.clone(),
        announce_interval: Duration::from_secs(config.announce_interval_secs),
        maintenance_interval: Duration::from_secs(30),
        message_ttl: config.message_ttl,
    };

    let (service, mut mesh_events) = MeshService::new(identity, Arc::new(transport), service_config);
    service.start(transport_events).await?;

    let event_logger = tokio::spawn(async move {
        while let Some(event) = mesh_events.recv().await {
            match event {
                MeshEvent::PeerAnnounced { peer_id, nickname } => {
                    info!("Peer {} announced as '{}'", peer_id, nickname);
                }
                MeshEvent::MessageReceived {
                    peer_id, content, ..
                } => {
                    info!("<{}> {}", peer_id, content);
                }
                MeshEvent::PrivateMessageReceived {
                    peer_id, content, ..
                } => {
                    info!("[private] <{}> {}", peer_id, content);
                }
                MeshEvent::SessionEstablished { peer_id } => {
                    info!("Encrypted session established with {}", peer_id);
                }
                MeshEvent::PeerLeft { peer_id } => {
                    info!("Peer {} left", peer_id);
                }
                other => debug!("Mesh event: {:?}", other),
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    service.send_leave().await;
    service.stop().await;
    event_logger.abort();
    Ok(())
}
