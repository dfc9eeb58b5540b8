use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How the bastion's host key is verified during the handshake.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "policy", rename_all = "kebab-case")]
pub enum HostKeyPolicy {
    /// Accept any host key. Insecure; must be opted into explicitly.
    AcceptAny,
    /// Record the fingerprint on first connection and require it afterwards.
    TrustOnFirstUse {
        /// Fingerprint store; defaults to the per-user config directory
        #[serde(default)]
        known_hosts: Option<PathBuf>,
    },
    /// Require one fixed SHA256 fingerprint.
    Fingerprint { fingerprint: String },
}

impl Default for HostKeyPolicy {
    fn default() -> Self {
        Self::TrustOnFirstUse { known_hosts: None }
    }
}

impl HostKeyPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AcceptAny => "accept-any",
            Self::TrustOnFirstUse { .. } => "trust-on-first-use",
            Self::Fingerprint { .. } => "fingerprint",
        }
    }

    pub fn is_insecure(&self) -> bool {
        matches!(self, Self::AcceptAny)
    }
}

/// Normalize a SHA256 fingerprint for comparison.
///
/// `SHA256:abc`, `sha256:abc` and `abc` all compare equal; trailing base64
/// padding is ignored.
pub fn normalize_fingerprint(fingerprint: &str) -> String {
    let trimmed = fingerprint.trim();
    let body = match trimmed.split_once(':') {
        Some((alg, rest)) if alg.eq_ignore_ascii_case("sha256") => rest,
        _ => trimmed,
    };
    body.trim_end_matches('=').to_string()
}

pub fn fingerprints_match(a: &str, b: &str) -> bool {
    normalize_fingerprint(a) == normalize_fingerprint(b)
}
