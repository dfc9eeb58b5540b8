//! Named network transports the database layer can route connections through.
//!
//! A [`Dialer`] turns an address into a byte stream. The
//! [`TransportRegistry`] maps transport names (as used in a [`Dsn`]) to
//! dialers. Register every transport once at startup, before the first DSN
//! naming it is opened.
//!
//! [`Dsn`]: crate::models::Dsn

use crate::utils::error::{Result, TunnelError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::RwLock;

/// Transport name used for the bastion tunnel
pub const DEFAULT_TRANSPORT: &str = "mysql+tcp";

pub trait DialStreamIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> DialStreamIo for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// A live byte-stream connection handed out by a [`Dialer`]
pub type DialStream = Box<dyn DialStreamIo>;

/// Connection factory behind a transport name.
///
/// Implementations must allow concurrent calls; every call yields an
/// independent stream.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Open a new stream to `address` (`host:port`)
    async fn dial(&self, address: &str) -> Result<DialStream>;

    /// Whether the dialer can no longer produce streams
    fn is_closed(&self) -> bool {
        false
    }
}

/// Registry of named transports.
///
/// Cloning shares the underlying table. Registering a name again replaces
/// the previous dialer (last write wins).
#[derive(Clone, Default)]
pub struct TransportRegistry {
    dialers: Arc<RwLock<HashMap<String, Arc<dyn Dialer>>>>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `dialer` under `name`, returning the dialer it replaced
    pub async fn register(
        &self,
        name: &str,
        dialer: Arc<dyn Dialer>,
    ) -> Result<Option<Arc<dyn Dialer>>> {
        if name.trim().is_empty() {
            return Err(TunnelError::Config(
                "transport name must not be empty".to_string(),
            ));
        }

        let previous = self.dialers.write().await.insert(name.to_string(), dialer);
        if previous.is_some() {
            tracing::debug!("Transport '{}' re-registered, previous dialer replaced", name);
        } else {
            tracing::debug!("Transport '{}' registered", name);
        }
        Ok(previous)
    }

    pub async fn unregister(&self, name: &str) -> Option<Arc<dyn Dialer>> {
        self.dialers.write().await.remove(name)
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Dialer>> {
        self.dialers.read().await.get(name).cloned()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.dialers.read().await.contains_key(name)
    }

    /// Dial `address` through the transport registered as `name`
    pub async fn dial(&self, name: &str, address: &str) -> Result<DialStream> {
        let dialer = self
            .get(name)
            .await
            .ok_or_else(|| TunnelError::Dial(format!("unknown transport '{}'", name)))?;
        dialer.dial(address).await
    }
}

impl fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = match self.dialers.try_read() {
            Ok(dialers) => dialers.keys().cloned().collect(),
            Err(_) => vec!["<locked>".to_string()],
        };
        f.debug_struct("TransportRegistry")
            .field("transports", &names)
            .finish()
    }
}
