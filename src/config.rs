//! Command line and peer-list configuration.

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;

use crate::constants::*;
use crate::error::{MeshError, Result};
use crate::transport::ChannelSettings;

#[derive(Debug, Clone, Parser)]
#[command(name = "sensor-node", version = VERSION, about = TAGLINE)]
pub struct Cli {
    /// CSV file with sensor readings (header row first)
    #[arg(long, default_value = DEFAULT_MEASUREMENTS_FILE)]
    pub measurements: PathBuf,

    /// File listing every node as host:port, one per line
    #[arg(long, default_value = DEFAULT_PEERS_FILE)]
    pub peers: PathBuf,

    /// Zero-based index of this node in the peer list
    #[arg(long)]
    pub id: usize,

    /// Probability in [0, 1] that an outgoing datagram is dropped
    #[arg(long, default_value_t = DEFAULT_LOSS_RATE)]
    pub loss_rate: f64,

    /// Mean send delay in seconds, at most one hour
    #[arg(long, default_value_t = DEFAULT_AVG_DELAY_SECS)]
    pub avg_delay: f64,

    #[arg(long, default_value_t = DEFAULT_SEND_INTERVAL_MS)]
    pub send_interval_ms: u64,

    #[arg(long, default_value_t = DEFAULT_RETRY_INTERVAL_MS)]
    pub retry_interval_ms: u64,

    #[arg(long, default_value_t = DEFAULT_BATCH_INTERVAL_MS)]
    pub batch_interval_ms: u64,

    #[arg(long, default_value_t = DEFAULT_DRAIN_INTERVAL_MS)]
    pub drain_interval_ms: u64,
}

impl Cli {
    pub fn channel_settings(&self) -> Result<ChannelSettings> {
        ChannelSettings::new(self.loss_rate, self.avg_delay)
    }

    pub fn node_settings(&self) -> Result<NodeSettings> {
        NodeSettings::new(
            Duration::from_millis(self.send_interval_ms),
            Duration::from_millis(self.retry_interval_ms),
            Duration::from_millis(self.batch_interval_ms),
            Duration::from_millis(self.drain_interval_ms),
        )
    }
}

/// Timer periods driving a node. All strictly positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeSettings {
    pub send_interval: Duration,
    pub retry_interval: Duration,
    pub batch_interval: Duration,
    pub drain_interval: Duration,
}

impl NodeSettings {
    pub fn new(
        send_interval: Duration,
        retry_interval: Duration,
        batch_interval: Duration,
        drain_interval: Duration,
    ) -> Result<Self> {
        for (name, value) in [
            ("send interval", send_interval),
            ("retry interval", retry_interval),
            ("batch interval", batch_interval),
            ("drain interval", drain_interval),
        ] {
            if value.is_zero() {
                return Err(MeshError::Config(format!("{} must be positive", name)));
            }
        }
        Ok(NodeSettings {
            send_interval,
            retry_interval,
            batch_interval,
            drain_interval,
        })
    }
}

impl Default for NodeSettings {
    fn default() -> Self {
        NodeSettings {
            send_interval: Duration::from_millis(DEFAULT_SEND_INTERVAL_MS),
            retry_interval: Duration::from_millis(DEFAULT_RETRY_INTERVAL_MS),
            batch_interval: Duration::from_millis(DEFAULT_BATCH_INTERVAL_MS),
            drain_interval: Duration::from_millis(DEFAULT_DRAIN_INTERVAL_MS),
        }
    }
}

// -----------------------------------------------------------------------------
// Peer list
// -----------------------------------------------------------------------------

/// Parses one `host:port` per line. Blank lines are skipped; names are
/// resolved and the first address wins.
pub fn parse_peers(text: &str) -> Result<Vec<SocketAddr>> {
    let mut out = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let addr = line
            .to_socket_addrs()
            .map_err(|e| MeshError::Config(format!("line {}: {:?}: {}", lineno + 1, line, e)))?
            .next()
            .ok_or_else(|| {
                MeshError::Config(format!("line {}: {:?} resolves to nothing", lineno + 1, line))
            })?;
        out.push(addr);
    }
    Ok(out)
}

pub fn read_peers(path: impl AsRef<Path>) -> Result<Vec<SocketAddr>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .map_err(|e| MeshError::Config(format!("cannot read peers {}: {}", path.display(), e)))?;
    let peers = parse_peers(&text)?;
    log::info!("📒 Loaded {} addresses from {}", peers.len(), path.display());
    Ok(peers)
}

/// This node's address and everybody else's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub me: SocketAddr,
    pub peers: Vec<SocketAddr>,
}

impl Topology {
    pub fn select(addrs: &[SocketAddr], id: usize) -> Result<Self> {
        let me = *addrs.get(id).ok_or_else(|| {
            MeshError::Config(format!("id {} out of range for {} addresses", id, addrs.len()))
        })?;
        let peers = addrs
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != id)
            .map(|(_, a)| *a)
            .collect();
        Ok(Topology { me, peers })
    }

    /// Every address in the mesh, this node included, as clock keys.
    pub fn identities(&self) -> Vec<String> {
        std::iter::once(self.me)
            .chain(self.peers.iter().copied())
            .map(|a| a.to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["sensor-node", "--id", "2"]).unwrap();
        assert_eq!(cli.id, 2);
        assert_eq!(cli.measurements, PathBuf::from("mjerenja.csv"));
        assert_eq!(cli.peers, PathBuf::from("clients.csv"));
        assert_eq!(cli.loss_rate, 0.1);
        assert_eq!(cli.node_settings().unwrap(), NodeSettings::default());
    }

    #[test]
    fn test_cli_requires_id() {
        assert!(Cli::try_parse_from(["sensor-node"]).is_err());
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::try_parse_from([
            "sensor-node",
            "--id",
            "0",
            "--loss-rate",
            "0.5",
            "--avg-delay",
            "0.01",
            "--retry-interval-ms",
            "200",
        ])
        .unwrap();
        let channel = cli.channel_settings().unwrap();
        assert_eq!(channel.loss_rate, 0.5);
        assert_eq!(cli.node_settings().unwrap().retry_interval, Duration::from_millis(200));
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let cli = Cli::try_parse_from(["sensor-node", "--id", "0", "--loss-rate", "1.5"]).unwrap();
        assert!(cli.channel_settings().is_err());

        let cli =
            Cli::try_parse_from(["sensor-node", "--id", "0", "--batch-interval-ms", "0"]).unwrap();
        assert!(matches!(cli.node_settings(), Err(MeshError::Config(_))));
    }

    #[test]
    fn test_parse_peers_skips_blank_lines() {
        let peers = parse_peers("127.0.0.1:9000\n\n  127.0.0.1:9001  \n").unwrap();
        assert_eq!(
            peers,
            vec![
                "127.0.0.1:9000".parse::<SocketAddr>().unwrap(),
                "127.0.0.1:9001".parse::<SocketAddr>().unwrap(),
            ]
        );
    }

    #[test]
    fn test_parse_peers_rejects_garbage() {
        assert!(parse_peers("127.0.0.1:9000\nnot an address\n").is_err());
    }

    #[test]
    fn test_read_peers_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "127.0.0.1:7000").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "127.0.0.1:7001").unwrap();

        let peers = read_peers(file.path()).unwrap();
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[1].port(), 7001);
    }

    #[test]
    fn test_read_peers_missing_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = read_peers(dir.path().join("clients.csv"));
        assert!(matches!(result, Err(MeshError::Config(_))));
    }

    #[test]
    fn test_topology_select() {
        let addrs = parse_peers("127.0.0.1:1\n127.0.0.1:2\n127.0.0.1:3").unwrap();
        let topo = Topology::select(&addrs, 1).unwrap();
        assert_eq!(topo.me, addrs[1]);
        assert_eq!(topo.peers, vec![addrs[0], addrs[2]]);
        assert_eq!(topo.identities().len(), 3);
        assert_eq!(topo.identities()[0], "127.0.0.1:2");

        assert!(matches!(Topology::select(&addrs, 3), Err(MeshError::Config(_))));
    }
}
