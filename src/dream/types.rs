use crate::dream::error::{classify_remote_failure, RemoteErrorBody, SdkError};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

/// Public profile snapshot of another user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    /// Whether this user lets senders see `seen_at` read receipts.
    #[serde(default)]
    pub read_receipts_enabled: bool,
}

impl Profile {
    /// Placeholder used until the real profile row is fetched.
    pub fn unknown(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: String::new(),
            display_name: None,
            avatar_url: None,
            read_receipts_enabled: false,
        }
    }

    pub fn label(&self) -> &str {
        match self.display_name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => &self.username,
        }
    }
}

/// Shared HTTP response handling for every call to the remote store.
///
/// On non-2xx the error body is decoded and classified; the raw body is
/// logged and never surfaced in the returned error's user text.
pub async fn handle_http_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    operation_name: &str,
) -> anyhow::Result<T> {
    use anyhow::Context;

    let status = response.status();
    let body_bytes = response.bytes().await.context("failed to read response body")?;
    let body_str = String::from_utf8_lossy(&body_bytes);
    debug!("[HTTP] {} response body: {}", operation_name, body_str);

    if !status.is_success() {
        error!(
            "[HTTP] {} failed, status: {}, body: {}",
            operation_name, status, body_str
        );
        let remote: RemoteErrorBody = serde_json::from_slice(&body_bytes).unwrap_or_default();
        return Err(classify_remote_failure(status.as_u16(), &remote).into());
    }
    debug!("[HTTP] {} succeeded, status: {}", operation_name, status);

    // Empty bodies (204, `Prefer: return=minimal`) decode as JSON null.
    let bytes: &[u8] = if body_bytes.is_empty() { b"null" } else { &body_bytes };
    serde_json::from_slice::<T>(bytes).map_err(|e| {
        error!(
            "[HTTP] {} decode failed: {:?}\nraw body: {}",
            operation_name, e, body_str
        );
        SdkError::Decode(format!("{operation_name}: {e}")).into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_prefers_display_name() {
        let mut p = Profile::unknown("u1");
        p.username = "luna".into();
        assert_eq!(p.label(), "luna");
        p.display_name = Some("Luna L.".into());
        assert_eq!(p.label(), "Luna L.");
        p.display_name = Some(String::new());
        assert_eq!(p.label(), "luna");
    }

    #[test]
    fn profile_defaults_missing_columns() {
        let p: Profile = serde_json::from_str(r#"{"id":"u2"}"#).unwrap();
        assert_eq!(p, Profile::unknown("u2"));
    }
}
