use crate::models::{AppConfig, HostKeyPolicy};
use crate::utils::error::{Result, TunnelError};
use directories::{BaseDirs, ProjectDirs};
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "config.toml";
const KNOWN_HOSTS_FILE_NAME: &str = "known_hosts.toml";

/// Service for loading the tool's configuration file
pub struct ConfigService;

impl ConfigService {
    /// `config.toml` in the current working directory
    pub fn default_config_path() -> PathBuf {
        std::env::current_dir()
            .map(|dir| dir.join(CONFIG_FILE_NAME))
            .unwrap_or_else(|_| PathBuf::from(CONFIG_FILE_NAME))
    }

    /// Get default per-user config directory
    pub fn config_dir() -> Result<PathBuf> {
        ProjectDirs::from("", "", "mysql-via-ssh")
            .map(|dirs| dirs.config_dir().to_path_buf())
            .ok_or_else(|| TunnelError::Config("Failed to get config directory".to_string()))
    }

    /// Default location of the trust-on-first-use fingerprint store
    pub fn default_known_hosts_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join(KNOWN_HOSTS_FILE_NAME))
    }

    /// Load, resolve and validate a configuration file
    pub fn load(path: &Path) -> Result<AppConfig> {
        let content = fs::read_to_string(path).map_err(|e| {
            TunnelError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let config = Self::parse(&content)
            .map_err(|e| TunnelError::Config(format!("{}: {}", path.display(), e)))?;

        tracing::info!(
            "Loaded config from {:?} (bastion {}, database {})",
            path,
            config.ssh.address(),
            config.mysql.address()
        );
        Ok(config)
    }

    /// Parse configuration text, expand `~/` paths and validate
    pub fn parse(content: &str) -> Result<AppConfig> {
        let mut config: AppConfig = toml::from_str(content)?;

        config.ssh.private_key = config.ssh.private_key.take().map(|p| expand_home(&p));
        if let HostKeyPolicy::TrustOnFirstUse {
            known_hosts: Some(path),
        } = &mut config.ssh.host_key
        {
            *path = expand_home(path);
        }

        config.validate()?;
        Ok(config)
    }
}

/// Expand a leading `~/` to the user's home directory
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}
