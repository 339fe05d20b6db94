// =============================================================================
// SENSOR MESH — node.rs
// The per-node event loop
// =============================================================================
//
// Three timers drive a node:
//   send   stamp a fresh measurement with both clocks, mail it to one peer
//   drain  pull whatever the sessions delivered, fold its clocks into ours
//   batch  average, sort two ways, print, clear
//
// Every handler runs on the loop task, so the batch needs no lock.
// =============================================================================

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use tokio::net::UdpSocket;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::clock::ScalarClock;
use crate::config::NodeSettings;
use crate::measurements::MeasurementSource;
use crate::message::{BatchReport, Message, MessageBatch};
use crate::p2p::{PeerSession, SessionHandle};
use crate::routing::Router;
use crate::transport::{ChannelSettings, FaultyChannel};
use crate::vector_clock::{CausalOrder, VectorClock};

/// Sessions in `peers` order plus the channel they all send through.
pub struct Mesh {
    pub sessions: Vec<SessionHandle>,
    pub channel: FaultyChannel,
}

/// Starts one session per peer and the router feeding them, all sharing
/// `socket`.
pub fn spawn_mesh(
    socket: Arc<UdpSocket>,
    settings: ChannelSettings,
    peers: &[SocketAddr],
    retry_interval: Duration,
) -> Mesh {
    let channel = FaultyChannel::new(Arc::clone(&socket), settings);
    let mut routes = HashMap::new();
    let mut sessions = Vec::with_capacity(peers.len());

    for &peer in peers {
        let (handle, route) = PeerSession::spawn(peer, channel.clone(), retry_interval);
        routes.insert(peer, route);
        sessions.push(handle);
    }

    tokio::spawn(Router::new(routes).run(socket));
    Mesh { sessions, channel }
}

pub struct SensorNode {
    settings: NodeSettings,
    scalar: ScalarClock,
    vector: VectorClock,
    sessions: Vec<SessionHandle>,
    channel: FaultyChannel,
    source: Box<dyn MeasurementSource>,
    batch: MessageBatch,
}

impl SensorNode {
    pub fn new(
        settings: NodeSettings,
        scalar: ScalarClock,
        vector: VectorClock,
        mesh: Mesh,
        source: Box<dyn MeasurementSource>,
    ) -> Self {
        SensorNode {
            settings,
            scalar,
            vector,
            sessions: mesh.sessions,
            channel: mesh.channel,
            source,
            batch: MessageBatch::new(),
        }
    }

    pub fn id(&self) -> &str {
        self.vector.local()
    }

    #[cfg(test)]
    pub fn scalar_clock(&self) -> &ScalarClock {
        &self.scalar
    }

    #[cfg(test)]
    pub fn vector_clock(&self) -> &VectorClock {
        &self.vector
    }

    #[cfg(test)]
    pub fn sessions(&self) -> &[SessionHandle] {
        &self.sessions
    }

    #[cfg(test)]
    pub fn batch_len(&self) -> usize {
        self.batch.len()
    }

    /// Stamps one measurement, keeps a copy in the batch and hands it to a
    /// randomly chosen peer. Returns the message when one was produced.
    pub fn on_send_tick(&mut self) -> Option<Message> {
        let value = match self.source.next_value() {
            Ok(value) => value,
            Err(e) => {
                log::warn!("[{}] ⚠️ Measurement skipped: {}", self.id(), e);
                return None;
            }
        };

        let message = Message {
            scalar: self.scalar.now(),
            vector: self.vector.advance_local(),
            value,
        };
        self.batch.push(message.clone());

        let Some(session) = self.sessions.choose(&mut rand::thread_rng()) else {
            log::warn!("[{}] no peers configured, message kept locally", self.id());
            return Some(message);
        };

        match message.to_bytes() {
            Ok(payload) => {
                if let Err(e) = session.send(payload) {
                    log::warn!("[{}] ⚠️ {}", self.id(), e);
                } else {
                    log::info!(
                        "[{}] 📤 {} -> {} at {} {}",
                        self.id(),
                        value,
                        session.peer(),
                        message.scalar,
                        message.vector
                    );
                }
            }
            Err(e) => log::warn!("[{}] could not encode message: {}", self.id(), e),
        }
        Some(message)
    }

    /// Consumes every payload already delivered by the sessions without
    /// waiting. Returns how many messages were accepted.
    pub fn drain_inbound(&mut self) -> usize {
        let mut accepted = 0;
        for session in &mut self.sessions {
            while let Some(payload) = session.try_recv() {
                let message = match Message::from_bytes(&payload) {
                    Ok(message) => message,
                    Err(e) => {
                        log::warn!(
                            "[{}] undecodable message from {} dropped: {}",
                            self.vector.local(),
                            session.peer(),
                            e
                        );
                        continue;
                    }
                };

                if message.vector.causal_order(&self.vector.now()) == CausalOrder::Concurrent {
                    log::debug!(
                        "[{}] {} from {} is concurrent with local history",
                        self.vector.local(),
                        message.vector,
                        session.peer()
                    );
                }
                let scalar = self.scalar.synchronize(&message.scalar);
                let vector = self.vector.merge(&message.vector);
                log::info!(
                    "[{}] 📥 {} from {}, clocks now {} {}",
                    self.vector.local(),
                    message.value,
                    session.peer(),
                    scalar,
                    vector
                );
                self.batch.push(message);
                accepted += 1;
            }
        }
        accepted
    }

    pub fn on_batch_tick(&mut self) -> BatchReport {
        let report = self.batch.drain_report();
        log::info!("[{}] 📊 Batch report\n{}", self.id(), report);
        if !report.orderings_agree() {
            log::info!("[{}] scalar and vector orderings disagree this batch", self.id());
        }
        log::info!(
            "[{}] 🕰️ Scalar correction {:+.3}s\n{}",
            self.id(),
            self.scalar.correction(),
            self.channel.stats()
        );
        report
    }

    pub async fn run(mut self) {
        log::info!(
            "[{}] 🚀 Node loop started ({} peers, send {:?}, batch {:?})",
            self.id(),
            self.sessions.len(),
            self.settings.send_interval,
            self.settings.batch_interval
        );

        let mut send = ticker(self.settings.send_interval);
        let mut drain = ticker(self.settings.drain_interval);
        let mut batch = ticker(self.settings.batch_interval);

        loop {
            tokio::select! {
                _ = send.tick() => {
                    self.on_send_tick();
                }
                _ = drain.tick() => {
                    self.drain_inbound();
                }
                _ = batch.tick() => {
                    self.drain_inbound();
                    self.on_batch_tick();
                    for session in &self.sessions {
                        log::debug!("{}", session.stats().await);
                    }
                }
            }
        }
    }
}

/// First tick one full period from now.
fn ticker(period: Duration) -> tokio::time::Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}
