use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc::UnboundedSender;

use crate::constants::MAX_DATAGRAM_SIZE;

/// Inbound queue of one PeerSession, keyed by the peer's address.
pub type RouteSender = UnboundedSender<Bytes>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Delivered,
    /// Source address is not part of the topology.
    Unrouted,
    /// The session behind the route has gone away.
    Closed,
}

/// Demultiplexes the shared socket into per-peer inbound queues.
///
/// Handoff is an unbounded `send`, so a slow session never stalls the
/// socket reader.
pub struct Router {
    routes: HashMap<SocketAddr, RouteSender>,
}

impl Router {
    pub fn new(routes: HashMap<SocketAddr, RouteSender>) -> Self {
        Router { routes }
    }

    pub fn dispatch(&self, from: SocketAddr, datagram: Bytes) -> Dispatch {
        let Some(route) = self.routes.get(&from) else {
            log::warn!("🚫 Router: {} missing from routes, {} bytes discarded", from, datagram.len());
            return Dispatch::Unrouted;
        };

        if route.send(datagram).is_err() {
            log::warn!("Router: session for {} is closed, datagram discarded", from);
            return Dispatch::Closed;
        }

        Dispatch::Delivered
    }

    /// Reads the socket forever. Read errors are logged and skipped.
    pub async fn run(self, socket: Arc<UdpSocket>) {
        log::info!(
            "📡 Router started on {:?} with {} routes",
            socket.local_addr().ok(),
            self.routes.len()
        );

        let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            match socket.recv_from(&mut buffer).await {
                Ok((n, from)) => {
                    log::debug!("Router received {} bytes from {}", n, from);
                    self.dispatch(from, Bytes::copy_from_slice(&buffer[..n]));
                }
                Err(e) => log::warn!("Router read error: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_dispatch_to_known_peer() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let router = Router::new(HashMap::from([(addr(9001), tx)]));

        assert_eq!(router.dispatch(addr(9001), Bytes::from_static(b"a")), Dispatch::Delivered);
        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"a"));
    }

    #[test]
    fn test_unknown_source_is_discarded() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let router = Router::new(HashMap::from([(addr(9001), tx)]));

        assert_eq!(router.dispatch(addr(9999), Bytes::from_static(b"a")), Dispatch::Unrouted);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_same_ip_different_port_is_a_different_peer() {
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let router = Router::new(HashMap::from([(addr(9001), tx1), (addr(9002), tx2)]));

        router.dispatch(addr(9002), Bytes::from_static(b"two"));
        assert!(rx1.try_recv().is_err());
        assert_eq!(rx2.try_recv().unwrap(), Bytes::from_static(b"two"));
    }

    #[test]
    fn test_closed_session_does_not_stop_routing() {
        let (tx1, rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let router = Router::new(HashMap::from([(addr(9001), tx1), (addr(9002), tx2)]));
        drop(rx1);

        assert_eq!(router.dispatch(addr(9001), Bytes::from_static(b"x")), Dispatch::Closed);
        assert_eq!(router.dispatch(addr(9002), Bytes::from_static(b"y")), Dispatch::Delivered);
        assert_eq!(rx2.try_recv().unwrap(), Bytes::from_static(b"y"));
    }

    #[tokio::test]
    async fn test_run_routes_real_datagrams() {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let stranger = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let router = Router::new(HashMap::from([(peer.local_addr().unwrap(), tx)]));
        tokio::spawn(router.run(socket.clone()));

        let dest = socket.local_addr().unwrap();
        stranger.send_to(b"ignored", dest).await.unwrap();
        peer.send_to(b"routed", dest).await.unwrap();

        let got = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert_eq!(got, Bytes::from_static(b"routed"));
    }
}
