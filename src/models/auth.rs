use std::fmt;
use std::path::PathBuf;

/// SSH authentication method offered to the bastion.
///
/// Built from a [`TunnelConfig`](super::TunnelConfig); methods are tried in
/// the order the config yields them and the first accepted one wins.
#[derive(Clone, PartialEq)]
pub enum AuthMethod {
    /// Password authentication
    Password(String),
    /// Public key authentication
    PublicKey {
        private_key_path: PathBuf,
        passphrase: Option<String>,
    },
}

impl AuthMethod {
    pub fn is_password(&self) -> bool {
        matches!(self, Self::Password(_))
    }

    pub fn is_public_key(&self) -> bool {
        matches!(self, Self::PublicKey { .. })
    }

    pub fn public_key(path: impl Into<PathBuf>, passphrase: Option<String>) -> Self {
        Self::PublicKey {
            private_key_path: path.into(),
            passphrase,
        }
    }

    /// Method name as used in the SSH protocol
    pub fn name(&self) -> &'static str {
        match self {
            Self::Password(_) => "password",
            Self::PublicKey { .. } => "publickey",
        }
    }
}

// Secrets never reach logs through Debug.
impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password(_) => f.write_str("Password(***)"),
            Self::PublicKey {
                private_key_path,
                passphrase,
            } => f
                .debug_struct("PublicKey")
                .field("private_key_path", private_key_path)
                .field("passphrase", &passphrase.as_ref().map(|_| "***"))
                .finish(),
        }
    }
}
