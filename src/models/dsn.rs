//! Data source descriptor naming the transport a database connection uses.
//!
//! Shape: `user:password@transport(host:port)/database?key=value&...`

use super::config::{format_host_port, MysqlConfig};
use crate::utils::error::{Result, TunnelError};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, PartialEq, Eq)]
pub struct Dsn {
    pub user: String,
    pub password: Option<String>,
    pub transport: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    /// Options in the order they appear
    pub params: Vec<(String, String)>,
}

impl Dsn {
    /// DSN for a database reached through `transport`, with the default
    /// connection options.
    pub fn for_mysql(config: &MysqlConfig, transport: &str) -> Self {
        Self {
            user: config.user.clone(),
            password: Some(config.password.clone()),
            transport: transport.to_string(),
            host: config.host.clone(),
            port: config.port,
            database: config.database.clone(),
            params: vec![
                ("charset".to_string(), config.charset.clone()),
                ("parseTime".to_string(), "true".to_string()),
                ("loc".to_string(), "Local".to_string()),
                ("allowNativePasswords".to_string(), "true".to_string()),
            ],
        }
    }

    pub fn address(&self) -> String {
        format_host_port(&self.host, self.port)
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Rendering safe for logs
    pub fn redacted(&self) -> String {
        let mut masked = self.clone();
        if masked.password.is_some() {
            masked.password = Some("***".to_string());
        }
        masked.to_string()
    }
}

impl fmt::Display for Dsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.password {
            Some(password) => write!(f, "{}:{}@", self.user, password)?,
            None => write!(f, "{}@", self.user)?,
        }
        write!(f, "{}({})/{}", self.transport, self.address(), self.database)?;
        for (i, (key, value)) in self.params.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            write!(f, "{}{}={}", sep, key, value)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Dsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Dsn").field(&self.redacted()).finish()
    }
}

impl FromStr for Dsn {
    type Err = TunnelError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: &str| TunnelError::Config(format!("invalid DSN: {}", reason));

        // The database name cannot contain '/', so the last one separates it.
        let (head, tail) = s.rsplit_once('/').ok_or_else(|| invalid("missing /database"))?;
        let (database, query) = match tail.split_once('?') {
            Some((db, query)) => (db, Some(query)),
            None => (tail, None),
        };

        // Passwords may contain '@'; the last one ends the credentials.
        let (credentials, endpoint) = head
            .rsplit_once('@')
            .ok_or_else(|| invalid("missing user@"))?;
        let (user, password) = match credentials.split_once(':') {
            Some((user, password)) => (user, Some(password.to_string())),
            None => (credentials, None),
        };
        if user.is_empty() {
            return Err(invalid("empty user"));
        }

        let open = endpoint.find('(').ok_or_else(|| invalid("missing transport(address)"))?;
        if !endpoint.ends_with(')') {
            return Err(invalid("unterminated address"));
        }
        let transport = &endpoint[..open];
        let address = &endpoint[open + 1..endpoint.len() - 1];
        if transport.is_empty() {
            return Err(invalid("empty transport name"));
        }

        let (host, port) = split_host_port(address).ok_or_else(|| invalid("address must be host:port"))?;

        let mut params = Vec::new();
        if let Some(query) = query {
            for pair in query.split('&').filter(|p| !p.is_empty()) {
                let (key, value) = pair.split_once('=').ok_or_else(|| invalid("option without ="))?;
                params.push((key.to_string(), value.to_string()));
            }
        }

        Ok(Self {
            user: user.to_string(),
            password,
            transport: transport.to_string(),
            host,
            port,
            database: database.to_string(),
            params,
        })
    }
}

/// Split `host:port` or `[v6]:port`
pub fn split_host_port(address: &str) -> Option<(String, u16)> {
    let (host, port) = address.rsplit_once(':')?;
    let port = port.parse::<u16>().ok()?;
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    if host.is_empty() || (host.contains(':') && !address.starts_with('[')) {
        return None;
    }
    Some((host.to_string(), port))
}
