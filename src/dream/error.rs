//! Error taxonomy shared by every remote and local operation.
//!
//! Plumbing code returns `anyhow::Result`; leaf failures are raised as
//! [`SdkError`] so that callers can recover the class with [`ErrorKind::of`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why an entitlement check refused an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuotaReason {
    DailyLimitReached,
    VisualLimitReached,
    TrialExpired,
    PlanInsufficient,
}

/// What a uniqueness conflict was about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictKind {
    UsernameTaken,
    DuplicateReport,
    TrialAlreadyUsed,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SdkError {
    /// Caught before any network call.
    #[error("validation failed: {0}")]
    Validation(String),
    /// Rejected by authentication or a row-level policy.
    #[error("unauthorized (code={code}): {detail}")]
    Unauthorized { code: String, detail: String },
    #[error("quota exceeded: {0:?}")]
    Quota(QuotaReason),
    #[error("network error: {0}")]
    Network(String),
    #[error("conflict ({kind:?}): {detail}")]
    Conflict { kind: ConflictKind, detail: String },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unexpected payload: {0}")]
    Decode(String),
    #[error("local storage error: {0}")]
    Storage(String),
}

impl SdkError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SdkError::Validation(_) => ErrorKind::Validation,
            SdkError::Unauthorized { .. } => ErrorKind::Unauthorized,
            SdkError::Quota(_) => ErrorKind::Quota,
            SdkError::Network(_) => ErrorKind::Network,
            SdkError::Conflict { .. } => ErrorKind::Conflict,
            SdkError::NotFound(_) => ErrorKind::NotFound,
            SdkError::Decode(_) => ErrorKind::Decode,
            SdkError::Storage(_) => ErrorKind::Storage,
        }
    }
}

/// Broad class of a failure, used for user-facing handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Validation,
    Unauthorized,
    Quota,
    Network,
    Conflict,
    NotFound,
    Decode,
    Storage,
}

impl ErrorKind {
    /// Classify an `anyhow` error by looking for an [`SdkError`] in its chain.
    ///
    /// Anything unrecognised (reqwest, io, sqlx…) is treated as a transient
    /// network failure.
    pub fn of(err: &anyhow::Error) -> Self {
        err.chain()
            .find_map(|cause| cause.downcast_ref::<SdkError>())
            .map(SdkError::kind)
            .unwrap_or(ErrorKind::Network)
    }
}

/// Whether `err` carries a uniqueness conflict of `kind`.
pub fn is_conflict(err: &anyhow::Error, kind: ConflictKind) -> bool {
    err.chain().any(|c| {
        matches!(c.downcast_ref::<SdkError>(), Some(SdkError::Conflict { kind: k, .. }) if *k == kind)
    })
}

/// A repeated insert hit a unique constraint without a more specific subject.
pub fn is_duplicate(err: &anyhow::Error) -> bool {
    is_conflict(err, ConflictKind::Other)
}

/// Error body returned by the remote store on non-2xx responses.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteErrorBody {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub hint: Option<String>,
}

/// Map an HTTP status plus the decoded error body onto the taxonomy.
pub fn classify_remote_failure(status: u16, body: &RemoteErrorBody) -> SdkError {
    let code = body.code.clone().unwrap_or_default();
    let message = body.message.clone().unwrap_or_default();
    let detail = if message.is_empty() {
        format!("HTTP {status}")
    } else {
        message.clone()
    };

    if code == "23505" || status == 409 {
        return SdkError::Conflict {
            kind: conflict_kind(&message, body.details.as_deref()),
            detail,
        };
    }
    if code == "42501" || status == 401 || status == 403 {
        return SdkError::Unauthorized { code, detail };
    }
    if status == 429 {
        return SdkError::Quota(QuotaReason::DailyLimitReached);
    }
    if let Some(reason) = quota_reason(&message) {
        return SdkError::Quota(reason);
    }
    if status == 404 {
        return SdkError::NotFound(detail);
    }
    SdkError::Network(detail)
}

fn conflict_kind(message: &str, details: Option<&str>) -> ConflictKind {
    let haystack = format!("{} {}", message, details.unwrap_or_default()).to_lowercase();
    if haystack.contains("username") {
        ConflictKind::UsernameTaken
    } else if haystack.contains("report") {
        ConflictKind::DuplicateReport
    } else if haystack.contains("trial") {
        ConflictKind::TrialAlreadyUsed
    } else {
        ConflictKind::Other
    }
}

/// Stored procedures raise plain exceptions; their message names the limit.
fn quota_reason(message: &str) -> Option<QuotaReason> {
    let m = message.to_lowercase();
    if m.contains("trial") && m.contains("expired") {
        Some(QuotaReason::TrialExpired)
    } else if m.contains("visual") && m.contains("limit") {
        Some(QuotaReason::VisualLimitReached)
    } else if m.contains("daily") && m.contains("limit") {
        Some(QuotaReason::DailyLimitReached)
    } else if m.contains("plan") && (m.contains("upgrade") || m.contains("insufficient")) {
        Some(QuotaReason::PlanInsufficient)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    fn body(code: &str, message: &str) -> RemoteErrorBody {
        RemoteErrorBody {
            code: Some(code.to_string()),
            message: Some(message.to_string()),
            details: None,
            hint: None,
        }
    }

    #[test]
    fn classifies_policy_rejection_as_unauthorized() {
        let err = classify_remote_failure(
            403,
            &body("42501", "new row violates row-level security policy"),
        );
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
    }

    #[test]
    fn classifies_unique_violation_by_subject() {
        let err = classify_remote_failure(
            409,
            &body("23505", "duplicate key value violates unique constraint \"profiles_username_key\""),
        );
        match err {
            SdkError::Conflict { kind, .. } => assert_eq!(kind, ConflictKind::UsernameTaken),
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn classifies_raised_limit_as_quota() {
        let err = classify_remote_failure(400, &body("P0001", "Daily limit reached for plan"));
        assert_eq!(err, SdkError::Quota(QuotaReason::DailyLimitReached));

        let err = classify_remote_failure(400, &body("P0001", "Trial expired"));
        assert_eq!(err, SdkError::Quota(QuotaReason::TrialExpired));
    }

    #[test]
    fn unknown_failures_are_network() {
        let err = classify_remote_failure(502, &RemoteErrorBody::default());
        assert_eq!(err.kind(), ErrorKind::Network);
        assert_eq!(err.to_string(), "network error: HTTP 502");
    }

    #[test]
    fn recovers_kind_through_context_layers() {
        let result: anyhow::Result<()> = Err(SdkError::validation("empty dream text").into());
        let err = result.context("submitting dream").unwrap_err();
        assert_eq!(ErrorKind::of(&err), ErrorKind::Validation);

        let plain = anyhow::anyhow!("socket closed");
        assert_eq!(ErrorKind::of(&plain), ErrorKind::Network);
    }

    #[test]
    fn conflict_kind_matching() {
        let err = anyhow::Error::from(SdkError::Conflict {
            kind: ConflictKind::DuplicateReport,
            detail: "dup".into(),
        })
        .context("report");
        assert!(is_conflict(&err, ConflictKind::DuplicateReport));
        assert!(!is_conflict(&err, ConflictKind::UsernameTaken));
    }
}
