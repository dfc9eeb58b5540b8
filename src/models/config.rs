use super::{AuthMethod, HostKeyPolicy};
use crate::utils::error::{Result, TunnelError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Whole configuration file: one `[ssh]` and one `[mysql]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub ssh: TunnelConfig,
    pub mysql: MysqlConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        self.ssh.validate()?;
        self.mysql.validate()
    }
}

/// Bastion host and the credentials used to log into it
#[derive(Clone, Serialize, Deserialize)]
pub struct TunnelConfig {
    pub host: String,

    /// SSH port (default: 22)
    #[serde(default = "default_ssh_port")]
    pub port: u16,

    pub user: String,

    #[serde(default, alias = "pwd")]
    pub password: Option<String>,

    /// Private key for public key authentication, tried before the password
    #[serde(default)]
    pub private_key: Option<PathBuf>,

    #[serde(default)]
    pub passphrase: Option<String>,

    #[serde(default)]
    pub host_key: HostKeyPolicy,

    #[serde(default = "default_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Upper bound for opening one channel through the bastion
    #[serde(default = "default_timeout_secs")]
    pub dial_timeout_secs: u64,

    /// 0 disables keepalives
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_interval_secs: u64,
}

/// Database reachable from the bastion
#[derive(Clone, Serialize, Deserialize)]
pub struct MysqlConfig {
    pub host: String,

    #[serde(default = "default_mysql_port")]
    pub port: u16,

    pub user: String,

    #[serde(default, alias = "pwd")]
    pub password: String,

    pub database: String,

    #[serde(default = "default_charset")]
    pub charset: String,

    #[serde(default = "default_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_ssh_port() -> u16 {
    22
}

fn default_mysql_port() -> u16 {
    3306
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_keepalive_secs() -> u64 {
    30
}

fn default_charset() -> String {
    "utf8mb4".to_string()
}

impl TunnelConfig {
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_ssh_port(),
            user: user.into(),
            password: None,
            private_key: None,
            passphrase: None,
            host_key: HostKeyPolicy::default(),
            connect_timeout_secs: default_timeout_secs(),
            dial_timeout_secs: default_timeout_secs(),
            keepalive_interval_secs: default_keepalive_secs(),
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_host_key(mut self, policy: HostKeyPolicy) -> Self {
        self.host_key = policy;
        self
    }

    /// `host:port` of the bastion
    pub fn address(&self) -> String {
        format_host_port(&self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }

    pub fn keepalive_interval(&self) -> Option<Duration> {
        (self.keepalive_interval_secs > 0).then(|| Duration::from_secs(self.keepalive_interval_secs))
    }

    /// Authentication methods in the order they are offered.
    ///
    /// An empty password counts as no password.
    pub fn auth_methods(&self) -> Vec<AuthMethod> {
        let mut methods = Vec::new();
        if let Some(path) = &self.private_key {
            methods.push(AuthMethod::public_key(path.clone(), self.passphrase.clone()));
        }
        if let Some(password) = self.password.as_ref().filter(|p| !p.is_empty()) {
            methods.push(AuthMethod::Password(password.clone()));
        }
        methods
    }

    pub fn validate(&self) -> Result<()> {
        validate_host("ssh.host", &self.host)?;
        if self.user.trim().is_empty() {
            return Err(TunnelError::Config("ssh.user must not be empty".to_string()));
        }
        if self.port == 0 {
            return Err(TunnelError::Config("ssh.port must not be 0".to_string()));
        }
        if self.auth_methods().is_empty() {
            return Err(TunnelError::Config(
                "ssh needs a password or a private_key".to_string(),
            ));
        }
        validate_timeout("ssh.connect_timeout_secs", self.connect_timeout_secs)?;
        validate_timeout("ssh.dial_timeout_secs", self.dial_timeout_secs)?;
        if let HostKeyPolicy::Fingerprint { fingerprint } = &self.host_key {
            if fingerprint.trim().is_empty() {
                return Err(TunnelError::Config(
                    "ssh.host_key.fingerprint must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}

impl MysqlConfig {
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: default_mysql_port(),
            user: user.into(),
            password: password.into(),
            database: database.into(),
            charset: default_charset(),
            connect_timeout_secs: default_timeout_secs(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// `host:port` of the database, as seen from the bastion
    pub fn address(&self) -> String {
        format_host_port(&self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        validate_host("mysql.host", &self.host)?;
        if self.port == 0 {
            return Err(TunnelError::Config("mysql.port must not be 0".to_string()));
        }
        if self.user.trim().is_empty() {
            return Err(TunnelError::Config("mysql.user must not be empty".to_string()));
        }
        if self.database.trim().is_empty() {
            return Err(TunnelError::Config(
                "mysql.database must not be empty".to_string(),
            ));
        }
        validate_timeout("mysql.connect_timeout_secs", self.connect_timeout_secs)
    }
}

impl fmt::Debug for TunnelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("private_key", &self.private_key)
            .field("host_key", &self.host_key)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for MysqlConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MysqlConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("database", &self.database)
            .field("charset", &self.charset)
            .finish_non_exhaustive()
    }
}

/// Join host and port, bracketing IPv6 literals
pub fn format_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Host without the brackets of an `[v6]` literal
pub fn unbracket_host(host: &str) -> &str {
    host.strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host)
}

/// Timeouts are whole seconds and must be at least 1
fn validate_timeout(field: &str, secs: u64) -> Result<()> {
    if secs == 0 {
        return Err(TunnelError::Config(format!("{} must be at least 1", field)));
    }
    Ok(())
}

/// Validate host address (IP or hostname)
fn validate_host(field: &str, host: &str) -> Result<()> {
    if host.trim().is_empty() {
        return Err(TunnelError::Config(format!("{} must not be empty", field)));
    }

    if unbracket_host(host).parse::<IpAddr>().is_ok() {
        return Ok(());
    }

    let is_valid_hostname = host
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_')
        && !host.starts_with('-')
        && !host.ends_with('-');

    if is_valid_hostname {
        Ok(())
    } else {
        Err(TunnelError::Config(format!("{} is not a valid host: {}", field, host)))
    }
}
