// =============================================================================
// SENSOR MESH — transport.rs
// Fault-injecting datagram channel
// =============================================================================
//
// FaultyChannel wraps the node's single UDP socket:
//   1. with probability `loss_rate` a datagram is dropped and reported as sent
//   2. otherwise it is held back for an exponential delay (mean `avg_delay`)
//   3. then written to the socket in one `send_to`
//
// The channel never retries. Reliability lives in p2p.rs.
// =============================================================================

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::time::sleep;

use crate::constants::{LOG_PREVIEW_BYTES, MAX_AVG_DELAY_SECS};
use crate::error::{MeshError, Result};

// -----------------------------------------------------------------------------
// ChannelSettings
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelSettings {
    /// 0.0 = never drop, 1.0 = drop everything
    pub loss_rate: f64,
    /// Mean injected delay, seconds
    pub avg_delay: f64,
}

impl ChannelSettings {
    pub fn new(loss_rate: f64, avg_delay: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&loss_rate) {
            return Err(MeshError::Config(format!(
                "loss rate must be within [0, 1], got {}",
                loss_rate
            )));
        }
        if !avg_delay.is_finite() || !(0.0..=MAX_AVG_DELAY_SECS).contains(&avg_delay) {
            return Err(MeshError::Config(format!(
                "average delay must be within [0, {}] seconds, got {}",
                MAX_AVG_DELAY_SECS, avg_delay
            )));
        }
        Ok(ChannelSettings { loss_rate, avg_delay })
    }

    /// No loss, no delay.
    #[cfg(test)]
    pub fn perfect() -> Self {
        ChannelSettings { loss_rate: 0.0, avg_delay: 0.0 }
    }
}

/// Draws a delay from an exponential distribution with the given mean
/// (inverse transform of one uniform sample).
pub fn exponential_delay<R: Rng + ?Sized>(rng: &mut R, mean_secs: f64) -> Duration {
    if mean_secs <= 0.0 {
        return Duration::ZERO;
    }
    let u: f64 = rng.gen();
    let secs = -mean_secs * (1.0 - u).ln();
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX)
}

fn preview(datagram: &[u8]) -> String {
    let end = datagram.len().min(LOG_PREVIEW_BYTES);
    String::from_utf8_lossy(&datagram[..end]).into_owned()
}

// -----------------------------------------------------------------------------
// FaultyChannel
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Simulated loss: nothing touched the socket.
    Dropped,
    /// Bytes written by the socket.
    Sent(usize),
}

#[derive(Debug, Default)]
struct ChannelCounters {
    sent: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
}

/// Cheap to clone; every clone shares the socket and the counters.
#[derive(Debug, Clone)]
pub struct FaultyChannel {
    socket: Arc<UdpSocket>,
    settings: ChannelSettings,
    counters: Arc<ChannelCounters>,
}

impl FaultyChannel {
    pub fn new(socket: Arc<UdpSocket>, settings: ChannelSettings) -> Self {
        FaultyChannel {
            socket,
            settings,
            counters: Arc::new(ChannelCounters::default()),
        }
    }

    /// `None` means the datagram is lost.
    fn plan(&self) -> Option<Duration> {
        let mut rng = rand::thread_rng();
        if rng.gen::<f64>() < self.settings.loss_rate {
            return None;
        }
        Some(exponential_delay(&mut rng, self.settings.avg_delay))
    }

    /// Sends one datagram subject to simulated loss and delay.
    ///
    /// Safe to call from many tasks at once: each call is a single
    /// `send_to`, so datagrams never interleave.
    pub async fn send(&self, datagram: &[u8], dest: SocketAddr) -> Result<SendOutcome> {
        let delay = match self.plan() {
            Some(delay) => delay,
            None => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                log::debug!("🕳️ Fake dropping {}... to {}", preview(datagram), dest);
                return Ok(SendOutcome::Dropped);
            }
        };

        if !delay.is_zero() {
            log::debug!("⏳ Delay for {}... to {} is {:?}", preview(datagram), dest, delay);
            sleep(delay).await;
        }

        match self.socket.send_to(datagram, dest).await {
            Ok(n) => {
                self.counters.sent.fetch_add(1, Ordering::Relaxed);
                Ok(SendOutcome::Sent(n))
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                Err(e.into())
            }
        }
    }

    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            loss_rate: self.settings.loss_rate,
            avg_delay: self.settings.avg_delay,
            sent: self.counters.sent.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelStats {
    pub loss_rate: f64,
    pub avg_delay: f64,
    pub sent: u64,
    pub dropped: u64,
    pub failed: u64,
}

impl ChannelStats {
    pub fn observed_loss(&self) -> f64 {
        let total = self.sent + self.dropped;
        if total == 0 {
            0.0
        } else {
            self.dropped as f64 / total as f64
        }
    }
}

impl std::fmt::Display for ChannelStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Channel [loss={:.2} delay={:.2}s]\n  \
             Sent: {:>6}  Dropped: {:>6}  Failed: {:>4}  Observed loss: {:.1}%",
            self.loss_rate,
            self.avg_delay,
            self.sent,
            self.dropped,
            self.failed,
            self.observed_loss() * 100.0,
        )
    }
}
