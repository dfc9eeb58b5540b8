//! Loopback bridge exposing a [`Dialer`] as a plain TCP endpoint.
//!
//! Drivers that can only connect to a socket address are pointed at the
//! bridge; every connection they make is carried to the target through
//! exactly one `Dialer::dial` call.
//!
//! The listener is on loopback but not private: until the accept limit is
//! reached, any local process can connect and reach the target through the
//! tunnel. Bridges started with a limit stop listening once that many
//! connections were accepted.

use crate::services::transport::Dialer;
use crate::utils::error::{Result, TunnelError};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};

/// Traffic statistics counter
#[derive(Debug, Clone)]
pub struct TrafficCounter {
    bytes_sent: Arc<AtomicU64>,
    bytes_received: Arc<AtomicU64>,
    connections: Arc<AtomicU64>,
}

impl Default for TrafficCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl TrafficCounter {
    pub fn new() -> Self {
        Self {
            bytes_sent: Arc::new(AtomicU64::new(0)),
            bytes_received: Arc::new(AtomicU64::new(0)),
            connections: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn add_sent(&self, bytes: u64) {
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_received(&self, bytes: u64) {
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_connection(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    /// (bytes sent, bytes received)
    pub fn get_stats(&self) -> (u64, u64) {
        (
            self.bytes_sent.load(Ordering::Relaxed),
            self.bytes_received.load(Ordering::Relaxed),
        )
    }

    pub fn connections(&self) -> u64 {
        self.connections.load(Ordering::Relaxed)
    }
}

/// Handle for a running loopback bridge
pub struct LocalBridge {
    pub id: uuid::Uuid,
    local_addr: SocketAddr,
    target: String,
    pub traffic_counter: TrafficCounter,
    task: Option<JoinHandle<()>>,
}

impl LocalBridge {
    /// Listen on an ephemeral loopback port and carry every accepted
    /// connection to `target` through `dialer`.
    pub async fn start(dialer: Arc<dyn Dialer>, target: &str) -> Result<Self> {
        Self::start_with_limit(dialer, target, None).await
    }

    /// Like [`start`](Self::start), but close the listener after
    /// `max_connections` accepted connections. Connections already
    /// accepted keep running.
    pub async fn start_with_limit(
        dialer: Arc<dyn Dialer>,
        target: &str,
        max_connections: Option<u64>,
    ) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await.map_err(|e| {
            TunnelError::Connect(format!("Failed to bind loopback bridge: {}", e))
        })?;
        let local_addr = listener.local_addr()?;

        let id = uuid::Uuid::new_v4();
        let traffic_counter = TrafficCounter::new();

        tracing::info!("Bridge {} listening on {} → {}", id, local_addr, target);

        let task = tokio::spawn(Self::accept_loop(
            listener,
            dialer,
            target.to_string(),
            traffic_counter.clone(),
            max_connections,
        ));

        Ok(Self {
            id,
            local_addr,
            target: target.to_string(),
            traffic_counter,
            task: Some(task),
        })
    }

    async fn accept_loop(
        listener: TcpListener,
        dialer: Arc<dyn Dialer>,
        target: String,
        traffic_counter: TrafficCounter,
        max_connections: Option<u64>,
    ) {
        let mut listener = Some(listener);
        // Dropping the set (on stop or loop exit) aborts every pump
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                accepted = accept_next(listener.as_ref()), if listener.is_some() => match accepted {
                    Ok((local_stream, peer_addr)) => {
                        tracing::debug!("Bridge accepted connection from {}", peer_addr);
                        traffic_counter.add_connection();
                        connections.spawn(Self::handle_connection(
                            local_stream,
                            peer_addr,
                            dialer.clone(),
                            target.clone(),
                            traffic_counter.clone(),
                        ));
                        if max_connections.is_some_and(|max| traffic_counter.connections() >= max) {
                            tracing::debug!("Bridge to {} reached its connection limit, listener closed", target);
                            listener = None;
                        }
                    }
                    Err(e) => {
                        tracing::error!("Accept error: {}", e);
                        break;
                    }
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                else => break,
            }
        }
    }

    async fn handle_connection(
        mut local_stream: TcpStream,
        peer_addr: SocketAddr,
        dialer: Arc<dyn Dialer>,
        target: String,
        traffic_counter: TrafficCounter,
    ) {
        // On dial failure the accepted socket is dropped, so the driver sees
        // the connection close instead of waiting.
        let mut remote = match dialer.dial(&target).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!("Bridge could not reach {} for {}: {}", target, peer_addr, e);
                return;
            }
        };

        match tokio::io::copy_bidirectional(&mut local_stream, &mut remote).await {
            Ok((sent, received)) => {
                traffic_counter.add_sent(sent);
                traffic_counter.add_received(received);
                tracing::debug!(
                    "Connection from {} completed ({} bytes sent, {} received)",
                    peer_addr,
                    sent,
                    received
                );
            }
            Err(e) => {
                tracing::debug!("Connection from {} ended: {}", peer_addr, e);
            }
        }
    }

    /// Loopback address drivers should connect to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn get_traffic_stats(&self) -> (u64, u64) {
        self.traffic_counter.get_stats()
    }

    /// Stop accepting and drop every bridged connection
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let (sent, received) = self.get_traffic_stats();
            tracing::info!(
                "Stopped bridge {} ({} connection(s), {} bytes sent, {} received)",
                self.id,
                self.traffic_counter.connections(),
                sent,
                received
            );
        }
    }

    /// Check if bridge is still running
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

async fn accept_next(listener: Option<&TcpListener>) -> std::io::Result<(TcpStream, SocketAddr)> {
    match listener {
        Some(listener) => listener.accept().await,
        None => std::future::pending().await,
    }
}

impl Drop for LocalBridge {
    fn drop(&mut self) {
        self.stop();
    }
}
