//! Subscription reads and the entitlement stored procedures.

use crate::dream::error::{ConflictKind, QuotaReason, SdkError};
use crate::dream::feed::models::AnalysisType;
use crate::dream::rest::{eq, Filter, RestClient};
use crate::dream::subscription::models::PlanSnapshot;
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

/// Answer of `check_analysis_quota`.
#[derive(Debug, Clone, Deserialize)]
pub struct QuotaCheck {
    pub allowed: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

impl QuotaCheck {
    pub fn into_result(self) -> Result<(), SdkError> {
        if self.allowed {
            return Ok(());
        }
        let reason = match self.reason.as_deref() {
            Some("trial_expired") => QuotaReason::TrialExpired,
            Some("visual_limit") => QuotaReason::VisualLimitReached,
            Some("plan_insufficient") => QuotaReason::PlanInsufficient,
            _ => QuotaReason::DailyLimitReached,
        };
        Err(SdkError::Quota(reason))
    }
}

pub struct SubscriptionApi {
    rest: RestClient,
    user_id: String,
}

impl SubscriptionApi {
    pub fn new(rest: RestClient, user_id: String) -> Self {
        Self { rest, user_id }
    }

    /// Current plan; users without a subscription row are on the free tier.
    pub async fn fetch_plan(&self) -> Result<PlanSnapshot> {
        let filters: Vec<Filter> = vec![eq("user_id", &self.user_id), ("limit", "1".into())];
        let rows: Vec<PlanSnapshot> = self
            .rest
            .select("subscriptions", &filters)
            .await
            .context("failed to fetch subscription")?;
        let mut plan = rows.into_iter().next().unwrap_or_default();
        plan.is_developer = self.is_developer().await.unwrap_or_else(|e| {
            warn!("[Plan] developer check failed, assuming no: {:#}", e);
            false
        });
        debug!("[Plan] tier={} developer={}", plan.tier.as_str(), plan.is_developer);
        Ok(plan)
    }

    /// Ask the server to downgrade an expired trial. Returns whether it had expired.
    pub async fn check_trial_expiration(&self) -> Result<bool> {
        self.rest
            .rpc("check_trial_expiration", &json!({ "p_user_id": self.user_id }))
            .await
            .context("trial expiration check failed")
    }

    /// Fails with [`SdkError::Quota`] when the user may not run `analysis` now.
    pub async fn check_analysis_quota(&self, analysis: AnalysisType) -> Result<()> {
        let check: QuotaCheck = self
            .rest
            .rpc(
                "check_analysis_quota",
                &json!({ "p_user_id": self.user_id, "p_analysis_type": analysis.as_str() }),
            )
            .await
            .context("analysis quota check failed")?;
        check.into_result()?;
        Ok(())
    }

    pub async fn is_developer(&self) -> Result<bool> {
        self.rest
            .rpc("is_developer", &json!({ "p_user_id": self.user_id }))
            .await
            .context("developer check failed")
    }

    /// Start the one-time trial. A second attempt is a conflict.
    pub async fn start_trial(&self) -> Result<PlanSnapshot> {
        let current = self.fetch_plan().await?;
        ensure_trial_available(&current)?;
        let _: serde_json::Value = self
            .rest
            .rpc("start_trial", &json!({ "p_user_id": self.user_id }))
            .await
            .context("failed to start trial")?;
        info!("[Plan] ✅ trial started for {}", self.user_id);
        self.fetch_plan().await
    }
}

/// The trial is one-time: any recorded start blocks another.
pub fn ensure_trial_available(plan: &PlanSnapshot) -> Result<(), SdkError> {
    if plan.trial_used() {
        return Err(SdkError::Conflict {
            kind: ConflictKind::TrialAlreadyUsed,
            detail: "trial already used".into(),
        });
    }
    Ok(())
}
