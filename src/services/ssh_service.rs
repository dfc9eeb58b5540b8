use crate::models::config::unbracket_host;
use crate::models::dsn::split_host_port;
use crate::models::host_key::fingerprints_match;
use crate::models::{AuthMethod, HostKeyPolicy, TunnelConfig};
use crate::services::config_service::ConfigService;
use crate::services::known_hosts::{KnownHostStatus, KnownHostsStore};
use crate::services::transport::{DialStream, Dialer};
use crate::utils::error::{Result, TunnelError};
use async_trait::async_trait;
use russh::client::{self, AuthResult, Handle};
use russh::keys::{PrivateKeyWithHashAlg, PublicKey};
use russh::Disconnect;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

/// SSH client session handle
pub type SshSession = Handle<SshClientHandler>;

/// Host key verification strategy, built from a [`HostKeyPolicy`]
#[derive(Debug, Clone)]
pub enum HostKeyVerifier {
    AcceptAny,
    TrustOnFirstUse(KnownHostsStore),
    Fingerprint(String),
}

impl HostKeyVerifier {
    pub fn from_policy(policy: &HostKeyPolicy) -> Result<Self> {
        Ok(match policy {
            HostKeyPolicy::AcceptAny => Self::AcceptAny,
            HostKeyPolicy::TrustOnFirstUse { known_hosts } => {
                let path = match known_hosts {
                    Some(path) => path.clone(),
                    None => ConfigService::default_known_hosts_path()?,
                };
                Self::TrustOnFirstUse(KnownHostsStore::new(path))
            }
            HostKeyPolicy::Fingerprint { fingerprint } => Self::Fingerprint(fingerprint.clone()),
        })
    }

    /// Decide whether `fingerprint` is acceptable for `host:port`.
    ///
    /// The error carries the rejection reason.
    pub fn verify(&self, host: &str, port: u16, fingerprint: &str) -> std::result::Result<(), String> {
        match self {
            Self::AcceptAny => {
                tracing::warn!(
                    "Host key verification disabled - accepting {} for {}:{} without verification",
                    fingerprint,
                    host,
                    port
                );
                Ok(())
            }
            Self::Fingerprint(expected) => {
                if fingerprints_match(expected, fingerprint) {
                    tracing::info!("Server key verified successfully");
                    Ok(())
                } else {
                    tracing::error!("Server key mismatch!");
                    tracing::error!("Expected: {}", expected);
                    tracing::error!("Received: {}", fingerprint);
                    Err(format!("expected {}, got {}", expected, fingerprint))
                }
            }
            Self::TrustOnFirstUse(store) => match store.check(host, port, fingerprint) {
                Ok(KnownHostStatus::Trusted) => {
                    tracing::info!("Server key matches known host entry");
                    Ok(())
                }
                Ok(KnownHostStatus::Unknown) => {
                    tracing::warn!("First connection to {}:{}", host, port);
                    tracing::warn!("Server key fingerprint: {}", fingerprint);
                    tracing::warn!("Trusting it from now on ({:?})", store.path());
                    store
                        .record(host, port, fingerprint)
                        .map_err(|e| format!("could not record fingerprint: {}", e))
                }
                Ok(KnownHostStatus::Mismatch { expected }) => {
                    tracing::error!("Server key for {}:{} changed!", host, port);
                    tracing::error!("Known: {}", expected);
                    tracing::error!("Received: {}", fingerprint);
                    Err(format!(
                        "fingerprint {} does not match known {} in {}",
                        fingerprint,
                        expected,
                        store.path().display()
                    ))
                }
                Err(e) => Err(format!("could not read known hosts: {}", e)),
            },
        }
    }
}

/// What the handler saw during key exchange
#[derive(Debug, Default)]
struct HandshakeReport {
    fingerprint: Option<String>,
    rejection: Option<String>,
}

/// SSH client handler performing host key verification
pub struct SshClientHandler {
    host: String,
    port: u16,
    verifier: HostKeyVerifier,
    report: Arc<StdMutex<HandshakeReport>>,
}

impl SshClientHandler {
    pub fn new(host: impl Into<String>, port: u16, verifier: HostKeyVerifier) -> Self {
        Self {
            host: host.into(),
            port,
            verifier,
            report: Arc::new(StdMutex::new(HandshakeReport::default())),
        }
    }

    /// Calculate SHA256 fingerprint of a public key
    pub fn calculate_fingerprint(key: &PublicKey) -> String {
        use russh::keys::ssh_key::HashAlg;
        key.fingerprint(HashAlg::Sha256).to_string()
    }

    fn report(&self) -> Arc<StdMutex<HandshakeReport>> {
        self.report.clone()
    }
}

impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> impl std::future::Future<Output = std::result::Result<bool, Self::Error>> + Send {
        let fingerprint = Self::calculate_fingerprint(server_public_key);
        tracing::info!("Server key fingerprint: {}", fingerprint);

        let outcome = self.verifier.verify(&self.host, self.port, &fingerprint);
        if let Ok(mut report) = self.report.lock() {
            report.fingerprint = Some(fingerprint);
            if let Err(reason) = &outcome {
                report.rejection = Some(reason.clone());
            }
        }

        async move { Ok(outcome.is_ok()) }
    }
}

/// One authenticated SSH connection to a bastion host.
///
/// Every [`dial`](Self::dial) opens a `direct-tcpip` channel multiplexed over
/// that connection. [`close`](Self::close) tears the connection down and
/// with it every channel still open.
pub struct SecureTunnel {
    id: Uuid,
    target: String,
    fingerprint: Option<String>,
    session: Mutex<Option<Arc<SshSession>>>,
    closed: AtomicBool,
    dial_timeout: Duration,
    dialed: AtomicU64,
}

impl SecureTunnel {
    /// Connect to the bastion and authenticate
    pub async fn open(config: &TunnelConfig) -> Result<Self> {
        config.validate()?;

        let target = config.address();
        let methods = config.auth_methods();
        let verifier = HostKeyVerifier::from_policy(&config.host_key)?;
        if config.host_key.is_insecure() {
            tracing::warn!("Host key policy 'accept-any' is insecure and should only be used for testing!");
        }

        tracing::info!(
            "Connecting to {} as {} (host key policy: {})",
            target,
            config.user,
            config.host_key.name()
        );

        let client_config = client::Config {
            keepalive_interval: config.keepalive_interval(),
            keepalive_max: 3,
            ..<client::Config as Default>::default()
        };

        let handler = SshClientHandler::new(config.host.clone(), config.port, verifier);
        let report = handler.report();

        let connect = client::connect(
            Arc::new(client_config),
            (unbracket_host(&config.host), config.port),
            handler,
        );
        let mut session = match tokio::time::timeout(config.connect_timeout(), connect).await {
            Err(_) => {
                return Err(TunnelError::Connect(format!(
                    "timed out after {:?} connecting to {}",
                    config.connect_timeout(),
                    target
                )))
            }
            Ok(Err(e)) => {
                let rejection = report.lock().ok().and_then(|mut r| r.rejection.take());
                return Err(match rejection {
                    Some(reason) => TunnelError::HostKeyRejected {
                        host: target,
                        reason,
                    },
                    None => TunnelError::Connect(format!("{}: {}", target, e)),
                });
            }
            Ok(Ok(session)) => session,
        };

        if let Err(e) = Self::authenticate(&mut session, &config.user, &methods).await {
            // Release the transport before reporting
            let _ = session
                .disconnect(Disconnect::ByApplication, "", "English")
                .await;
            return Err(e);
        }

        let fingerprint = report.lock().ok().and_then(|r| r.fingerprint.clone());
        let tunnel = Self {
            id: Uuid::new_v4(),
            target,
            fingerprint,
            session: Mutex::new(Some(Arc::new(session))),
            closed: AtomicBool::new(false),
            dial_timeout: config.dial_timeout(),
            dialed: AtomicU64::new(0),
        };
        tracing::info!("Tunnel {} to {} established", tunnel.id, tunnel.target);
        Ok(tunnel)
    }

    /// Try each method in order; the first accepted one wins
    async fn authenticate(session: &mut SshSession, user: &str, methods: &[AuthMethod]) -> Result<()> {
        let mut failures = Vec::new();

        for method in methods {
            tracing::debug!("Trying {} authentication for {}", method.name(), user);

            let result = match method {
                AuthMethod::Password(password) => {
                    session.authenticate_password(user, password.as_str()).await
                }
                AuthMethod::PublicKey {
                    private_key_path,
                    passphrase,
                } => {
                    let key = match russh::keys::load_secret_key(private_key_path, passphrase.as_deref()) {
                        Ok(key) => key,
                        Err(e) => {
                            tracing::warn!("Failed to load key {:?}: {}", private_key_path, e);
                            failures.push(format!("publickey (key not loaded: {})", e));
                            continue;
                        }
                    };
                    let key_with_alg = PrivateKeyWithHashAlg::new(Arc::new(key), None);
                    session.authenticate_publickey(user, key_with_alg).await
                }
            };

            match result {
                Ok(AuthResult::Success) => {
                    tracing::info!("Successfully authenticated with {}", method.name());
                    return Ok(());
                }
                Ok(_) => {
                    tracing::debug!("{} authentication rejected", method.name());
                    failures.push(method.name().to_string());
                }
                Err(e) => {
                    return Err(TunnelError::Connect(format!(
                        "{} authentication aborted: {}",
                        method.name(),
                        e
                    )));
                }
            }
        }

        Err(TunnelError::Authentication(format!(
            "bastion rejected {} for user {}",
            failures.join(", "),
            user
        )))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// `host:port` of the bastion
    pub fn target(&self) -> &str {
        &self.target
    }

    /// SHA256 fingerprint the bastion presented
    pub fn host_fingerprint(&self) -> Option<&str> {
        self.fingerprint.as_deref()
    }

    /// Number of channels opened so far
    pub fn channels_dialed(&self) -> u64 {
        self.dialed.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return true;
        }
        match self.session.try_lock() {
            Ok(guard) => guard.as_ref().map_or(true, |session| session.is_closed()),
            // Someone holds the lock; the flag above is authoritative
            Err(_) => false,
        }
    }

    async fn live_session(&self) -> Result<Arc<SshSession>> {
        let guard = self.session.lock().await;
        match guard.as_ref() {
            None => Err(TunnelError::Dial(format!("tunnel to {} is closed", self.target))),
            Some(session) if session.is_closed() => Err(TunnelError::Dial(format!(
                "session to {} was closed by the peer",
                self.target
            ))),
            Some(session) => Ok(session.clone()),
        }
    }

    /// Open a channel to `address` as seen from the bastion.
    ///
    /// Safe to call concurrently; the session lock is released before the
    /// channel handshake starts.
    pub async fn dial(&self, address: &str) -> Result<DialStream> {
        let (host, port) = split_host_port(address).ok_or_else(|| {
            TunnelError::Dial(format!("invalid address '{}', expected host:port", address))
        })?;

        let session = self.live_session().await?;

        let open = session.channel_open_direct_tcpip(host, port as u32, "127.0.0.1", 0);
        let channel = tokio::time::timeout(self.dial_timeout, open)
            .await
            .map_err(|_| {
                TunnelError::Dial(format!(
                    "timed out after {:?} opening channel to {}",
                    self.dial_timeout, address
                ))
            })?
            .map_err(|e| {
                TunnelError::Dial(format!("bastion {} could not reach {}: {}", self.target, address, e))
            })?;

        let count = self.dialed.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!("Tunnel {} opened channel #{} to {}", self.id, count, address);

        Ok(Box::new(channel.into_stream()))
    }

    /// Disconnect from the bastion.
    ///
    /// Returns `Ok(true)` when this call closed the session and `Ok(false)`
    /// when it was already closed.
    pub async fn close(&self) -> Result<bool> {
        let session = {
            let mut guard = self.session.lock().await;
            self.closed.store(true, Ordering::Release);
            guard.take()
        };

        let Some(session) = session else {
            tracing::debug!("Tunnel {} already closed", self.id);
            return Ok(false);
        };

        let result = session
            .disconnect(Disconnect::ByApplication, "", "English")
            .await;

        tracing::info!(
            "Closed tunnel {} to {} after {} channel(s)",
            self.id,
            self.target,
            self.channels_dialed()
        );

        match result {
            Ok(()) => Ok(true),
            // Peer already hung up; nothing left to release
            Err(_) if session.is_closed() => Ok(true),
            Err(e) => Err(TunnelError::Connect(format!("Disconnect failed: {}", e))),
        }
    }
}

#[async_trait]
impl Dialer for SecureTunnel {
    async fn dial(&self, address: &str) -> Result<DialStream> {
        SecureTunnel::dial(self, address).await
    }

    fn is_closed(&self) -> bool {
        SecureTunnel::is_closed(self)
    }
}

impl Drop for SecureTunnel {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::Acquire) {
            tracing::warn!("Tunnel {} dropped without close(), session released on drop", self.id);
        }
    }
}
