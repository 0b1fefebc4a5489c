//! Password sign-in against the store's auth endpoint, plus the local
//! credential checks that run before any request.

use crate::dream::error::{ConflictKind, SdkError};
use crate::dream::rest::{eq, Filter, RestClient};
use crate::dream::types::{handle_http_response, Profile};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use uuid::Uuid;

const MIN_PASSWORD_CHARS: usize = 6;
const USERNAME_CHARS: std::ops::RangeInclusive<usize> = 3..=20;

#[derive(Debug, Serialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    pub user: AuthUser,
}

pub fn validate_credentials(email: &str, password: &str) -> Result<(), SdkError> {
    let email = email.trim();
    if email.is_empty() || password.is_empty() {
        return Err(SdkError::validation("Email and password are required"));
    }
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => {}
        _ => return Err(SdkError::validation("Enter a valid email address")),
    }
    if password.chars().count() < MIN_PASSWORD_CHARS {
        return Err(SdkError::validation(format!(
            "Password must be at least {MIN_PASSWORD_CHARS} characters"
        )));
    }
    Ok(())
}

/// Normalize a username: lowercase letters, digits and underscores only.
pub fn validate_username(username: &str) -> Result<String, SdkError> {
    let name = username.trim().to_lowercase();
    if !USERNAME_CHARS.contains(&name.chars().count()) {
        return Err(SdkError::validation(format!(
            "Username must be {} to {} characters",
            USERNAME_CHARS.start(),
            USERNAME_CHARS.end()
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(SdkError::validation(
            "Username can only contain letters, numbers and underscores",
        ));
    }
    Ok(name)
}

/// Fail with a username conflict if someone else already has `username`.
pub async fn ensure_username_available(rest: &RestClient, username: &str) -> Result<String> {
    let name = validate_username(username)?;
    let filters: Vec<Filter> = vec![eq("username", &name), ("limit", "1".into())];
    let taken: Vec<Profile> = rest
        .select("profiles", &filters)
        .await
        .context("failed to check username")?;
    if !taken.is_empty() {
        return Err(SdkError::Conflict {
            kind: ConflictKind::UsernameTaken,
            detail: format!("username {name} is taken"),
        }
        .into());
    }
    Ok(name)
}

/// Sign in with email and password.
pub async fn sign_in_async(
    api_base_url: &str,
    anon_key: &str,
    email: &str,
    password: &str,
) -> Result<Session> {
    validate_credentials(email, password)?;

    let client = reqwest::Client::new();
    let operation_id = Uuid::new_v4().to_string();
    let url = format!(
        "{}/auth/v1/token?grant_type=password",
        api_base_url.trim_end_matches('/')
    );

    info!("[Auth] 🔐 signing in");
    debug!("[Auth] url={} operationID={}", url, operation_id);

    let response = client
        .post(&url)
        .header("apikey", anon_key)
        .header("operationID", &operation_id)
        .json(&SignInRequest {
            email: email.trim().to_string(),
            password: password.to_string(),
        })
        .send()
        .await
        .context("sign-in request failed")?;

    // Wrong credentials come back as 400 invalid_grant.
    let status = response.status().as_u16();
    if status == 400 || status == 401 {
        let body = response.text().await.unwrap_or_default();
        error!("[Auth] sign-in rejected, status: {}, body: {}", status, body);
        return Err(SdkError::Unauthorized {
            code: "invalid_grant".into(),
            detail: "invalid login credentials".into(),
        }
        .into());
    }

    let session: Session = handle_http_response(response, "sign in").await?;
    info!("[Auth] ✅ signed in as {}", session.user.id);
    Ok(session)
}
