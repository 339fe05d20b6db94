//! Tunable defaults for Sensor Mesh nodes
//!
//! Every value here is only a default: the CLI overrides all of them.

/// Network name shown in the banner
pub const NETWORK_NAME: &str = "Sensor Mesh";

/// Node version
pub const VERSION: &str = "0.1.0-alpha";

/// Project tagline
pub const TAGLINE: &str = "Measurements over a lossy wire, ordered by logical clocks";

// ═══════════════════════════════════════════════════════════════
// Fault injection
// ═══════════════════════════════════════════════════════════════

/// Probability that a datagram is silently dropped
pub const DEFAULT_LOSS_RATE: f64 = 0.1;

/// Mean of the exponential send delay, in seconds
pub const DEFAULT_AVG_DELAY_SECS: f64 = 1.0;

/// Largest accepted mean delay (one hour)
pub const MAX_AVG_DELAY_SECS: f64 = 3_600.0;

// ═══════════════════════════════════════════════════════════════
// Timers (milliseconds)
// ═══════════════════════════════════════════════════════════════

/// How often the node stamps and sends a measurement
pub const DEFAULT_SEND_INTERVAL_MS: u64 = 1_000;

/// How often a session resends everything still unacknowledged
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 1_500;

/// How often the buffered messages are averaged, sorted and cleared
pub const DEFAULT_BATCH_INTERVAL_MS: u64 = 5_000;

/// How often the node polls its sessions for delivered payloads
pub const DEFAULT_DRAIN_INTERVAL_MS: u64 = 10;

// ═══════════════════════════════════════════════════════════════
// Wire
// ═══════════════════════════════════════════════════════════════

/// Largest UDP payload over IPv4
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Bytes of a packet shown in drop/delay log lines
pub const LOG_PREVIEW_BYTES: usize = 20;

// ═══════════════════════════════════════════════════════════════
// Clocks
// ═══════════════════════════════════════════════════════════════

/// Scalar clock skew is drawn uniformly from [-MAX_JITTER, MAX_JITTER]
pub const MAX_JITTER: f64 = 0.2;

/// Seconds over which the skew exponent grows by one
pub const DRIFT_HORIZON_SECS: f64 = 1_000.0;

// ═══════════════════════════════════════════════════════════════
// Measurements
// ═══════════════════════════════════════════════════════════════

/// CSV column holding the CO reading
pub const MEASUREMENT_COLUMN: usize = 3;

/// The measurement row cycles once per this many seconds
pub const MEASUREMENT_WINDOW: u64 = 100;

pub const DEFAULT_MEASUREMENTS_FILE: &str = "mjerenja.csv";
pub const DEFAULT_PEERS_FILE: &str = "clients.csv";

// ═══════════════════════════════════════════════════════════════
// Display functions
// ═══════════════════════════════════════════════════════════════

/// Print the startup banner
pub fn print_banner() {
    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║                     SENSOR MESH NODE                       ║");
    println!("║                                                            ║");
    println!("║  FaultyChannel • PeerSession • Scalar + Vector clocks      ║");
    println!("╚════════════════════════════════════════════════════════════╝");
    println!();
    println!("  {} v{}", NETWORK_NAME, VERSION);
    println!("  {}", TAGLINE);
    println!();
}

// Timer relationships the defaults rely on
const _: () = assert!(DEFAULT_RETRY_INTERVAL_MS > DEFAULT_SEND_INTERVAL_MS);
const _: () = assert!(DEFAULT_BATCH_INTERVAL_MS > DEFAULT_RETRY_INTERVAL_MS);
const _: () = assert!(DEFAULT_DRAIN_INTERVAL_MS < DEFAULT_SEND_INTERVAL_MS);
const _: () = assert!(MEASUREMENT_WINDOW > 0);
