use thiserror::Error;

/// Failures surfaced by the session manager and the season client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Credentials exhausted after the single refresh attempt.
    #[error("unauthorized: {detail}")]
    Unauthorized { detail: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("remote error (HTTP {status}): {body}")]
    Remote { status: u16, body: String },

    #[error("malformed response from {path}: {message}")]
    Decode { path: String, message: String },
}

/// Pull the `detail` field out of a JSON error body, if there is one.
pub(crate) fn detail_from_body(body: &str) -> Option<String> {
    let v: serde_json::Value = serde_json::from_str(body).ok()?;
    v.get("detail")
        .and_then(|d| d.as_str())
        .map(|d| d.to_string())
}
