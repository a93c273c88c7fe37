use anyhow::Context;
use distributed_backup::multicast::channel::ChannelSet;
use distributed_backup::peer::config::{MulticastConfig, PeerConfig};
use distributed_backup::peer::handlers::admin_router;
use distributed_backup::peer::service::Peer;
use std::net::{SocketAddr, SocketAddrV4};
use std::path::PathBuf;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        // .with_max_level(tracing::Level::DEBUG)
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 3 {
        eprintln!(
            "Usage: {} --id <peer id> [--version <v>] [--mc <group:port>] [--mdb <group:port>] \
             [--mdr <group:port>] [--admin <addr:port>] [--storage <dir>] [--capacity <bytes>]",
            args[0]
        );
        eprintln!("Example: {} --id 1 --admin 127.0.0.1:7001", args[0]);
        eprintln!(
            "Example: {} --id 2 --admin 127.0.0.1:7002 --mc 224.0.0.1:8001 --capacity 500000",
            args[0]
        );

        std::process::exit(1);
    }

    let mut config = PeerConfig::default();
    let mut groups = MulticastConfig::default();
    let mut admin_addr: SocketAddr = "127.0.0.1:7000".parse()?;
    let mut peer_id: Option<String> = None;

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1);
        match (args[i].as_str(), value) {
            ("--id", Some(v)) => peer_id = Some(v.clone()),
            ("--version", Some(v)) => config.protocol_version = v.clone(),
            ("--mc", Some(v)) => groups.control = v.parse::<SocketAddrV4>().context("--mc")?,
            ("--mdb", Some(v)) => groups.backup = v.parse::<SocketAddrV4>().context("--mdb")?,
            ("--mdr", Some(v)) => groups.restore = v.parse::<SocketAddrV4>().context("--mdr")?,
            ("--admin", Some(v)) => admin_addr = v.parse::<SocketAddr>().context("--admin")?,
            ("--storage", Some(v)) => config.storage_root = PathBuf::from(v),
            ("--capacity", Some(v)) => config.capacity = v.parse::<u64>().context("--capacity")?,
            (flag, _) => {
                tracing::warn!("Ignoring argument {}", flag);
                i += 1;
                continue;
            }
        }
        i += 2;
    }

    config.peer_id = peer_id.context("--id is required")?;

    tracing::info!("Starting peer {} (protocol {})", config.peer_id, config.protocol_version);
    tracing::info!(
        "Channels: MC={} MDB={} MDR={}",
        groups.control,
        groups.backup,
        groups.restore
    );

    // 1. Multicast channels:
    let channels = ChannelSet::bind(&groups)?;

    // 2. Peer (storage, coordination, dispatch):
    let peer = Peer::new(config, channels);
    peer.start().await;

    // 3. Admin HTTP surface:
    let app = admin_router(peer.clone());

    tracing::info!("Admin interface listening on {}", admin_addr);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(admin_addr).await?;
    axum::serve(listener, app).await?;

    peer.shutdown().await;

    Ok(())
}
