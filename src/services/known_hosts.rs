use crate::models::host_key::fingerprints_match;
use crate::utils::error::{Result, TunnelError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// A bastion fingerprint recorded on first connection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KnownHost {
    pub host: String,
    pub port: u16,
    pub fingerprint: String,
    #[serde(default = "Utc::now")]
    pub first_seen: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct KnownHostsFile {
    #[serde(default)]
    hosts: Vec<KnownHost>,
}

/// Result of checking a presented fingerprint against the store
#[derive(Debug, Clone, PartialEq)]
pub enum KnownHostStatus {
    /// Stored fingerprint matches
    Trusted,
    /// Host never seen before
    Unknown,
    /// Stored fingerprint differs from the presented one
    Mismatch { expected: String },
}

/// TOML-backed fingerprint store for trust-on-first-use verification
#[derive(Debug, Clone)]
pub struct KnownHostsStore {
    path: PathBuf,
}

impl KnownHostsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all entries; a missing file is an empty store
    pub fn load(&self) -> Result<Vec<KnownHost>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.path)?;
        let file: KnownHostsFile = toml::from_str(&content).map_err(|e| {
            TunnelError::Config(format!(
                "Failed to parse known hosts {}: {}",
                self.path.display(),
                e
            ))
        })?;
        Ok(file.hosts)
    }

    pub fn lookup(&self, host: &str, port: u16) -> Result<Option<KnownHost>> {
        Ok(self
            .load()?
            .into_iter()
            .find(|entry| entry.host == host && entry.port == port))
    }

    pub fn check(&self, host: &str, port: u16, fingerprint: &str) -> Result<KnownHostStatus> {
        Ok(match self.lookup(host, port)? {
            None => KnownHostStatus::Unknown,
            Some(entry) if fingerprints_match(&entry.fingerprint, fingerprint) => {
                KnownHostStatus::Trusted
            }
            Some(entry) => KnownHostStatus::Mismatch {
                expected: entry.fingerprint,
            },
        })
    }

    /// Record (or replace) the fingerprint for `host:port`
    pub fn record(&self, host: &str, port: u16, fingerprint: &str) -> Result<()> {
        let mut hosts = self.load()?;
        hosts.retain(|entry| !(entry.host == host && entry.port == port));
        hosts.push(KnownHost {
            host: host.to_string(),
            port,
            fingerprint: fingerprint.to_string(),
            first_seen: Utc::now(),
        });

        let content = toml::to_string_pretty(&KnownHostsFile { hosts }).map_err(|e| {
            TunnelError::Config(format!("Failed to serialize known hosts: {}", e))
        })?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        // Write then rename
        let tmp = self.path.with_extension("toml.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)?;

        tracing::info!("Recorded fingerprint for {}:{} in {:?}", host, port, self.path);
        Ok(())
    }
}
