// =============================================================================
// SENSOR MESH — p2p.rs
// Per-peer acknowledgment / retry sessions
// =============================================================================
//
// One PeerSession per remote peer. It is a single task that waits on three
// event sources at once:
//   outbound  payloads from the node, wrapped as REQUEST and tracked
//   inbound   raw datagrams handed over by the Router (ACK or REQUEST)
//   retry     fixed-interval tick resending every tracked REQUEST
//
// Every transmission is spawned, so a delayed send never holds up the loop.
// Retries have no backoff and no limit: a REQUEST stays pending until its ACK
// arrives. Duplicate REQUESTs are delivered again; callers must tolerate that.
// =============================================================================

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::error::{MeshError, Result};
use crate::network::{Packet, PacketKind};
use crate::routing::RouteSender;
use crate::transport::{FaultyChannel, SendOutcome};

// -----------------------------------------------------------------------------
// PendingSet — unacknowledged REQUESTs for one peer
// -----------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct PendingSet {
    last_id: u64,
    entries: BTreeMap<u64, Bytes>,
    requests_sent: u64,
    retransmissions: u64,
    acks_received: u64,
    duplicate_acks: u64,
}

impl PendingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns the next sequence id (starting at 1), encodes the REQUEST and
    /// tracks it until acknowledged. Returns the id and the encoded datagram.
    pub fn enqueue(&mut self, payload: Bytes) -> Result<(u64, Bytes)> {
        let id = self.last_id + 1;
        let datagram = Packet::request(id, payload).to_json()?;
        self.last_id = id;
        self.entries.insert(id, datagram.clone());
        self.requests_sent += 1;
        Ok((id, datagram))
    }

    /// Returns `true` only for the first ACK of a tracked id.
    pub fn acknowledge(&mut self, id: u64) -> bool {
        if self.entries.remove(&id).is_some() {
            self.acks_received += 1;
            true
        } else {
            self.duplicate_acks += 1;
            false
        }
    }

    /// Everything still pending, in id order, counted as retransmitted.
    pub fn due(&mut self) -> Vec<(u64, Bytes)> {
        self.retransmissions += self.entries.len() as u64;
        self.entries.iter().map(|(id, d)| (*id, d.clone())).collect()
    }

    #[cfg(test)]
    pub fn contains(&self, id: u64) -> bool {
        self.entries.contains_key(&id)
    }

    #[cfg(test)]
    pub fn ids(&self) -> Vec<u64> {
        self.entries.keys().copied().collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self, peer: SocketAddr) -> SessionStats {
        SessionStats {
            peer,
            pending: self.entries.len(),
            last_id: self.last_id,
            requests_sent: self.requests_sent,
            retransmissions: self.retransmissions,
            acks_received: self.acks_received,
            duplicate_acks: self.duplicate_acks,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    pub peer: SocketAddr,
    pub pending: usize,
    pub last_id: u64,
    pub requests_sent: u64,
    pub retransmissions: u64,
    pub acks_received: u64,
    pub duplicate_acks: u64,
}

impl std::fmt::Display for SessionStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Session [{}]\n  \
             Pending: {:>4}  Last id: {:>6}  Sent: {:>6}\n  \
             Resent: {:>6}  Acked: {:>6}  Dup acks: {:>4}",
            self.peer,
            self.pending,
            self.last_id,
            self.requests_sent,
            self.retransmissions,
            self.acks_received,
            self.duplicate_acks,
        )
    }
}

// -----------------------------------------------------------------------------
// SessionHandle — the node's side of a session
// -----------------------------------------------------------------------------

pub struct SessionHandle {
    peer: SocketAddr,
    outbound: UnboundedSender<Bytes>,
    delivered: UnboundedReceiver<Bytes>,
    pending: Arc<Mutex<PendingSet>>,
}

impl SessionHandle {
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Queues a payload for reliable delivery. Never blocks.
    pub fn send(&self, payload: Bytes) -> Result<()> {
        self.outbound
            .send(payload)
            .map_err(|_| MeshError::SessionClosed(self.peer))
    }

    /// Next delivered payload, if one is already waiting.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.delivered.try_recv().ok()
    }

    #[cfg(test)]
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.delivered.recv().await
    }

    #[cfg(test)]
    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }

    #[cfg(test)]
    pub async fn pending_ids(&self) -> Vec<u64> {
        self.pending.lock().await.ids()
    }

    pub async fn stats(&self) -> SessionStats {
        self.pending.lock().await.stats(self.peer)
    }
}

// -----------------------------------------------------------------------------
// PeerSession
// -----------------------------------------------------------------------------

pub struct PeerSession {
    peer: SocketAddr,
    channel: FaultyChannel,
    pending: Arc<Mutex<PendingSet>>,
    outbound: UnboundedReceiver<Bytes>,
    inbound: UnboundedReceiver<Bytes>,
    delivered: UnboundedSender<Bytes>,
    retry_interval: Duration,
}

impl PeerSession {
    /// Builds a session plus the handle for the node and the route for the
    /// Router. Nothing runs until [`PeerSession::run`] is polled.
    pub fn new(
        peer: SocketAddr,
        channel: FaultyChannel,
        retry_interval: Duration,
    ) -> (PeerSession, SessionHandle, RouteSender) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (delivered_tx, delivered_rx) = mpsc::unbounded_channel();
        let pending = Arc::new(Mutex::new(PendingSet::new()));

        let session = PeerSession {
            peer,
            channel,
            pending: Arc::clone(&pending),
            outbound: outbound_rx,
            inbound: inbound_rx,
            delivered: delivered_tx,
            retry_interval,
        };
        let handle = SessionHandle {
            peer,
            outbound: outbound_tx,
            delivered: delivered_rx,
            pending,
        };
        (session, handle, inbound_tx)
    }

    /// [`PeerSession::new`] followed by `tokio::spawn(session.run())`.
    pub fn spawn(
        peer: SocketAddr,
        channel: FaultyChannel,
        retry_interval: Duration,
    ) -> (SessionHandle, RouteSender) {
        let (session, handle, route) = Self::new(peer, channel, retry_interval);
        tokio::spawn(session.run());
        (handle, route)
    }

    pub async fn run(mut self) {
        log::info!(
            "[{}] 🔄 Session started (retry every {:?})",
            self.peer,
            self.retry_interval
        );

        let mut retry = interval_at(Instant::now() + self.retry_interval, self.retry_interval);
        retry.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                Some(payload) = self.outbound.recv() => self.on_outbound(payload).await,
                Some(datagram) = self.inbound.recv() => self.on_datagram(datagram).await,
                _ = retry.tick() => self.on_retry_tick().await,
            }
        }
    }

    async fn on_outbound(&self, payload: Bytes) {
        let enqueued = self.pending.lock().await.enqueue(payload);
        match enqueued {
            Ok((id, datagram)) => self.transmit(id, datagram, "send"),
            Err(e) => log::warn!("[{}] could not encode request: {}", self.peer, e),
        }
    }

    async fn on_datagram(&self, datagram: Bytes) {
        let packet = match Packet::from_json(&datagram) {
            Ok(packet) => packet,
            Err(e) => {
                log::warn!(
                    "[{}] malformed packet dropped ({}): {}",
                    self.peer,
                    e,
                    String::from_utf8_lossy(&datagram)
                );
                return;
            }
        };

        match packet.kind {
            PacketKind::Ack => {
                if self.pending.lock().await.acknowledge(packet.id) {
                    log::debug!("[{}] ✅ Got ACK for {}", self.peer, packet.id);
                } else {
                    log::debug!("[{}] late or duplicate ACK for {}", self.peer, packet.id);
                }
            }
            PacketKind::Request => {
                log::debug!("[{}] 📥 Got REQ {}", self.peer, packet.id);
                match Packet::ack(packet.id).to_json() {
                    Ok(ack) => self.transmit(packet.id, ack, "ack"),
                    Err(e) => log::warn!("[{}] could not encode ack: {}", self.peer, e),
                }
                if self.delivered.send(packet.payload).is_err() {
                    log::warn!(
                        "[{}] application queue closed, payload {} discarded",
                        self.peer,
                        packet.id
                    );
                }
            }
        }
    }

    async fn on_retry_tick(&self) {
        let due = self.pending.lock().await.due();
        if due.is_empty() {
            return;
        }

        let ids: Vec<u64> = due.iter().map(|(id, _)| *id).collect();
        log::info!("[{}] 🔁 Missing {} acks for packets {:?}", self.peer, ids.len(), ids);

        for (id, datagram) in due {
            self.transmit(id, datagram, "resend");
        }
    }

    /// Fire-and-forget. Failures are only logged; the retry tick covers them.
    fn transmit(&self, id: u64, datagram: Bytes, what: &'static str) {
        let channel = self.channel.clone();
        let peer = self.peer;
        tokio::spawn(async move {
            match channel.send(&datagram, peer).await {
                Ok(SendOutcome::Sent(n)) => {
                    log::debug!("[{}] {} packet {} ({} bytes)", peer, what, id, n)
                }
                Ok(SendOutcome::Dropped) => {}
                Err(e) => log::warn!("[{}] {} packet {} failed: {}", peer, what, id, e),
            }
        });
    }
}
