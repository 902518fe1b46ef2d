//! API credentials.

use crate::error::{VenueError, VenueResult};
use std::fmt;

#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
    /// Required by Bitget, unused by Binance.
    pub passphrase: Option<String>,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            passphrase: None,
        }
    }

    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }

    /// Read credentials from the named environment variables.
    pub fn from_env(
        key_var: &str,
        secret_var: &str,
        passphrase_var: Option<&str>,
    ) -> VenueResult<Self> {
        let mut creds = Self::new(read_var(key_var)?, read_var(secret_var)?);
        if let Some(var) = passphrase_var {
            creds.passphrase = Some(read_var(var)?);
        }
        Ok(creds)
    }
}

fn read_var(name: &str) -> VenueResult<String> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(VenueError::MissingCredential(name.to_string())),
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
