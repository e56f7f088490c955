//! Authenticated session manager.
//!
//! Every outbound call carries the current access token. A 401 triggers exactly one refresh
//! exchange and, only if that succeeds, exactly one replay of the original request. Anything
//! else is returned to the caller untouched.

use super::credentials::{Credentials, TokenStore};
use super::error::{detail_from_body, ApiError};
use super::transport::{ApiRequest, ApiResponse, Transport};
use serde::Deserialize;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

pub(crate) const LOGIN_PATH: &str = "api/auth/login/";
pub(crate) const REFRESH_PATH: &str = "api/auth/refresh/";

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub access: String,
    #[serde(default)]
    pub refresh: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    #[serde(default)]
    access: Option<String>,
    #[serde(default)]
    refresh: Option<String>,
}

pub struct SessionManager {
    transport: Arc<dyn Transport>,
    credentials: Mutex<Credentials>,
    store: Arc<dyn TokenStore>,
}

impl SessionManager {
    /// Build a manager seeded from the persisted credentials. An unreadable store starts the
    /// session logged out.
    pub fn new(transport: Arc<dyn Transport>, store: Arc<dyn TokenStore>) -> Self {
        let initial = store.load().unwrap_or_else(|e| {
            warn!("could not load stored credentials: {e:#}");
            Credentials::default()
        });
        Self {
            transport,
            credentials: Mutex::new(initial),
            store,
        }
    }

    fn creds(&self) -> MutexGuard<'_, Credentials> {
        self.credentials.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn credentials(&self) -> Credentials {
        self.creds().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.creds().access_token.is_some()
    }

    fn access_token(&self) -> Option<String> {
        self.creds().access_token.clone()
    }

    fn replace(&self, next: Credentials) {
        *self.creds() = next.clone();
        if let Err(e) = self.store.persist(&next) {
            warn!("could not persist credentials: {e:#}");
        }
    }

    fn clear(&self) {
        *self.creds() = Credentials::default();
        if let Err(e) = self.store.clear() {
            warn!("could not clear stored credentials: {e:#}");
        }
    }

    /// Send `request` with the current credential, recovering a single authorization failure.
    pub async fn call(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let token = self.access_token();
        let first = self.transport.send(request, token.as_deref()).await?;
        if !first.is_unauthorized() {
            return classify(first);
        }

        debug!(path = %request.path, "access token rejected, refreshing");
        if !self.refresh().await? {
            self.clear();
            return Err(unauthorized(&first));
        }

        let token = self.access_token();
        let retried = self.transport.send(request, token.as_deref()).await?;
        if retried.is_unauthorized() {
            warn!(path = %request.path, "request rejected again after refresh, clearing session");
            self.clear();
            return Err(unauthorized(&retried));
        }
        classify(retried)
    }

    /// One refresh exchange. `Ok(false)` means the service refused it; transport failures
    /// propagate and leave the credentials as they were.
    async fn refresh(&self) -> Result<bool, ApiError> {
        let Some(refresh_token) = self.creds().refresh_token.clone() else {
            debug!("no refresh token available");
            return Ok(false);
        };

        let request = ApiRequest::post(
            REFRESH_PATH,
            serde_json::json!({ "refresh": refresh_token }),
        );
        let resp = self.transport.send(&request, None).await?;
        if !resp.is_success() {
            info!(status = resp.status, "refresh rejected");
            return Ok(false);
        }

        let parsed: RefreshResponse = match resp.json(REFRESH_PATH) {
            Ok(p) => p,
            Err(e) => {
                warn!("unreadable refresh response: {e}");
                return Ok(false);
            }
        };
        let Some(access) = parsed.access else {
            return Ok(false);
        };

        let mut next = self.credentials();
        next.access_token = Some(access);
        if let Some(rotated) = parsed.refresh {
            next.refresh_token = Some(rotated);
        }
        self.replace(next);
        info!("access token refreshed");
        Ok(true)
    }

    /// Exchange username/password for a fresh credential pair.
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResponse, ApiError> {
        let request = ApiRequest::post(
            LOGIN_PATH,
            serde_json::json!({ "username": username, "password": password }),
        );
        let resp = self.transport.send(&request, None).await?;
        if resp.is_unauthorized() {
            return Err(unauthorized(&resp));
        }
        let resp = classify(resp)?;
        let login: LoginResponse = resp.json(LOGIN_PATH)?;
        self.replace(Credentials {
            access_token: Some(login.access.clone()),
            refresh_token: login.refresh.clone(),
        });
        info!(username, "logged in");
        Ok(login)
    }

    pub fn logout(&self) {
        self.clear();
        info!("logged out");
    }
}

fn unauthorized(resp: &ApiResponse) -> ApiError {
    ApiError::Unauthorized {
        detail: detail_from_body(&resp.body).unwrap_or_else(|| "Unauthorized".to_string()),
    }
}

fn classify(resp: ApiResponse) -> Result<ApiResponse, ApiError> {
    if resp.is_success() {
        Ok(resp)
    } else if resp.is_unauthorized() {
        Err(unauthorized(&resp))
    } else {
        Err(ApiError::Remote {
            status: resp.status,
            body: resp.body,
        })
    }
}
