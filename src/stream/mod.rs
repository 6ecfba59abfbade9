//! Stream sessions: subscription-driven, self-healing typed streams

pub mod codec;
pub mod dialect;
pub mod session;

pub use codec::{decode_json, CodecError, DecodeFn};
pub use dialect::{Dialect, Envelope};
pub use session::{SessionController, SessionState, StreamSession};

use secrecy::SecretString;

/// API credentials for private channels
///
/// The secret is never printed by `Debug`.
#[derive(Clone, Debug)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: SecretString,
}

impl Credentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: SecretString::new(client_secret.into()),
        }
    }

    /// Read credentials from two environment variables
    ///
    /// Returns `None` if either is unset or empty.
    pub fn from_env(id_var: &str, secret_var: &str) -> Option<Self> {
        let id = std::env::var(id_var).ok().filter(|v| !v.is_empty())?;
        let secret = std::env::var(secret_var).ok().filter(|v| !v.is_empty())?;
        Some(Self::new(id, secret))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_secret() {
        let creds = Credentials::new("client", "hunter2");
        let text = format!("{creds:?}");
        assert!(text.contains("client"));
        assert!(!text.contains("hunter2"));
    }
}
