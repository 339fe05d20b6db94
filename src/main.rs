mod clock;
mod config;
mod constants;
mod error;
mod measurements;
mod message;
mod network;
mod node;
mod p2p;
mod routing;
mod transport;
mod vector_clock;

use std::sync::Arc;

use clap::Parser;
use tokio::net::UdpSocket;

use crate::clock::ScalarClock;
use crate::config::{read_peers, Cli, Topology};
use crate::error::Result;
use crate::measurements::CsvMeasurements;
use crate::node::{spawn_mesh, SensorNode};
use crate::vector_clock::VectorClock;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Print Sensor Mesh banner
    constants::print_banner();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        log::error!("❌ {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let channel = cli.channel_settings()?;
    let settings = cli.node_settings()?;

    let addrs = read_peers(&cli.peers)?;
    let topology = Topology::select(&addrs, cli.id)?;
    let source = CsvMeasurements::open(&cli.measurements)?;

    let socket = Arc::new(UdpSocket::bind(topology.me).await?);
    log::info!(
        "🌐 Node {} listening on {} with {} peers (loss={} delay={}s)",
        cli.id,
        socket.local_addr()?,
        topology.peers.len(),
        channel.loss_rate,
        channel.avg_delay
    );

    let mesh = spawn_mesh(socket, channel, &topology.peers, settings.retry_interval);

    let scalar = ScalarClock::new();
    log::info!("🕰️ Scalar clock jitter {:+.4}", scalar.jitter());
    let vector = VectorClock::new(&topology.me.to_string(), topology.identities());

    SensorNode::new(settings, scalar, vector, mesh, Box::new(source))
        .run()
        .await;
    Ok(())
}
