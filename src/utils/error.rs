use thiserror::Error;

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Host key rejected for {host}: {reason}")]
    HostKeyRejected { host: String, reason: String },

    #[error("Dial failed: {0}")]
    Dial(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, TunnelError>;

impl TunnelError {
    /// True for failures that happen while reaching the bastion or the
    /// database, including a rejected host key during the handshake.
    pub fn is_connect_failure(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::HostKeyRejected { .. })
    }

    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }

    pub fn is_dial_failure(&self) -> bool {
        matches!(self, Self::Dial(_))
    }
}
