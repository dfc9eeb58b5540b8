pub mod auth;
pub mod config;
pub mod dsn;
pub mod host_key;
pub mod record;

// Re-export main types
pub use auth::AuthMethod;
pub use config::{AppConfig, MysqlConfig, TunnelConfig};
pub use dsn::Dsn;
pub use host_key::HostKeyPolicy;
pub use record::{QueryOutcome, Record, RowError};
