use anyhow::Result;
use serde::{Deserialize, Serialize};
#[cfg(test)]
use std::sync::Mutex;

/// Access/refresh token pair. Plain data; the session manager owns all mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl Credentials {
    pub fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none()
    }
}

/// Persistence for the credential pair across process runs.
pub trait TokenStore: Send + Sync {
    fn load(&self) -> Result<Credentials>;
    fn persist(&self, creds: &Credentials) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// Keeps credentials for the lifetime of the process only.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    inner: Mutex<Credentials>,
}

#[cfg(test)]
impl MemoryTokenStore {
    pub fn with(creds: Credentials) -> Self {
        Self {
            inner: Mutex::new(creds),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Credentials> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<Credentials> {
        Ok(self.lock().clone())
    }

    fn persist(&self, creds: &Credentials) -> Result<()> {
        *self.lock() = creds.clone();
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.lock() = Credentials::default();
        Ok(())
    }
}
