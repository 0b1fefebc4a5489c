//! Dream submission and owner-side edits.
//!
//! A submission is checked locally, cleared by the entitlement procedure,
//! stored as a `pending` row and then handed to the analysis webhook in the
//! background. The row's status is what the feed reports afterwards; the
//! webhook's own answer is only logged.

use crate::dream::carousel::check_primary_image;
use crate::dream::error::{QuotaReason, SdkError};
use crate::dream::feed::models::{AnalysisType, Visibility, IMAGE_SLOTS};
use crate::dream::notice::Language;
use crate::dream::rest::{eq, Filter, RestClient};
use crate::dream::subscription::{PlanSnapshot, PlanTier, SubscriptionApi};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const MIN_DREAM_CHARS: usize = 10;
const MAX_DREAM_CHARS: usize = 5000;

#[derive(Debug, Clone)]
pub struct DreamDraft {
    pub text: String,
    pub analysis_type: AnalysisType,
    pub visibility: Visibility,
    pub language: Language,
}

impl DreamDraft {
    pub fn new(text: impl Into<String>, analysis_type: AnalysisType) -> Self {
        Self {
            text: text.into(),
            analysis_type,
            visibility: Visibility::Private,
            language: Language::En,
        }
    }
}

pub fn validate_dream_text(text: &str) -> Result<String, SdkError> {
    let text = text.trim();
    let len = text.chars().count();
    if len < MIN_DREAM_CHARS {
        return Err(SdkError::validation(format!(
            "Describe your dream in at least {MIN_DREAM_CHARS} characters"
        )));
    }
    if len > MAX_DREAM_CHARS {
        return Err(SdkError::validation(format!(
            "Dreams are limited to {MAX_DREAM_CHARS} characters"
        )));
    }
    Ok(text.to_string())
}

/// Body posted to the analysis webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookPayload {
    pub dream_id: String,
    pub user_id: String,
    pub dream_text: String,
    pub plan_type: PlanTier,
    pub visualizations_per_analysis: u8,
    pub language: Language,
    pub analysis_type: AnalysisType,
}

/// Tier the submission runs under. Developer accounts are not metered.
fn submission_tier(plan: &PlanSnapshot, now: DateTime<Utc>) -> PlanTier {
    if plan.is_developer {
        PlanTier::Premium
    } else {
        plan.effective_tier(now)
    }
}

/// Reject analyses the plan does not include before asking the server.
pub fn check_plan_allows(plan: &PlanSnapshot, analysis: AnalysisType, now: DateTime<Utc>) -> Result<PlanTier, SdkError> {
    let tier = submission_tier(plan, now);
    if tier.allows(analysis) {
        return Ok(tier);
    }
    if plan.tier == PlanTier::Trial && tier == PlanTier::Free {
        return Err(SdkError::Quota(QuotaReason::TrialExpired));
    }
    Err(SdkError::Quota(QuotaReason::PlanInsufficient))
}

#[derive(Debug, Deserialize)]
struct InsertedDream {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ImageRow {
    #[serde(default)]
    image_url: Option<String>,
    #[serde(default)]
    image_url_2: Option<String>,
    #[serde(default)]
    image_url_3: Option<String>,
}

impl ImageRow {
    fn slots(self) -> [Option<String>; IMAGE_SLOTS] {
        [self.image_url, self.image_url_2, self.image_url_3]
            .map(|slot| slot.filter(|url| !url.trim().is_empty()))
    }
}

/// Owner-side writes on `dreams` rows.
pub struct DreamApi {
    rest: RestClient,
    user_id: String,
}

impl DreamApi {
    pub fn new(rest: RestClient, user_id: String) -> Self {
        Self { rest, user_id }
    }

    /// Store a new entry as `pending` and return its id.
    pub async fn insert_pending(&self, text: &str, draft: &DreamDraft) -> Result<String> {
        let mut rows: Vec<InsertedDream> = self
            .rest
            .insert(
                "dreams",
                &json!({
                    "user_id": self.user_id,
                    "dream_text": text,
                    "status": "pending",
                    "analysis_type": draft.analysis_type.as_str(),
                    "is_public": draft.visibility == Visibility::Public,
                }),
            )
            .await
            .context("failed to save dream")?;
        let row = rows
            .pop()
            .ok_or_else(|| SdkError::Decode("insert returned no row".into()))?;
        Ok(row.id)
    }

    fn own_row(&self, dream_id: &str) -> Vec<Filter> {
        vec![eq("id", dream_id), eq("user_id", &self.user_id)]
    }

    pub async fn set_visibility(&self, dream_id: &str, visibility: Visibility) -> Result<()> {
        let rows: Vec<serde_json::Value> = self
            .rest
            .update(
                "dreams",
                &self.own_row(dream_id),
                &json!({ "is_public": visibility == Visibility::Public }),
            )
            .await
            .context("failed to change visibility")?;
        if rows.is_empty() {
            return Err(SdkError::NotFound(format!("dream {dream_id}")).into());
        }
        debug!("[Dream] {} is now {:?}", dream_id, visibility);
        Ok(())
    }

    async fn image_slots(&self, dream_id: &str) -> Result<[Option<String>; IMAGE_SLOTS]> {
        let mut filters = self.own_row(dream_id);
        filters.push(("select", "image_url,image_url_2,image_url_3".into()));
        let mut rows: Vec<ImageRow> = self
            .rest
            .select("dreams", &filters)
            .await
            .context("failed to load dream images")?;
        let row = rows
            .pop()
            .ok_or_else(|| SdkError::NotFound(format!("dream {dream_id}")))?;
        Ok(row.slots())
    }

    /// Make raw slot `slot` the cover image. Needs a paid or trial tier.
    pub async fn set_primary_image(&self, dream_id: &str, slot: usize, tier: PlanTier) -> Result<()> {
        if !tier.can_set_primary_image() {
            return Err(SdkError::Quota(QuotaReason::PlanInsufficient).into());
        }
        let slots = self.image_slots(dream_id).await?;
        check_primary_image(&slots, slot, tier)?;
        let _: Vec<serde_json::Value> = self
            .rest
            .update(
                "dreams",
                &self.own_row(dream_id),
                &json!({ "primary_image_index": slot }),
            )
            .await
            .context("failed to set cover image")?;
        info!("[Dream] 🖼️ cover of {} set to slot {}", dream_id, slot);
        Ok(())
    }

    pub async fn delete(&self, dream_id: &str) -> Result<()> {
        self.rest
            .delete("dreams", &self.own_row(dream_id))
            .await
            .context("failed to delete dream")?;
        info!("[Dream] 🗑️ deleted {}", dream_id);
        Ok(())
    }
}

/// A stored submission. `webhook` finishes once the analysis request is out.
pub struct Submission {
    pub dream_id: String,
    pub webhook: JoinHandle<()>,
}

pub struct DreamSubmitter {
    dreams: DreamApi,
    subscriptions: SubscriptionApi,
    http: reqwest::Client,
    webhook_url: String,
    user_id: String,
}

impl DreamSubmitter {
    pub fn new(rest: RestClient, user_id: String, webhook_url: String) -> Self {
        Self {
            dreams: DreamApi::new(rest.clone(), user_id.clone()),
            subscriptions: SubscriptionApi::new(rest, user_id.clone()),
            http: reqwest::Client::new(),
            webhook_url,
            user_id,
        }
    }

    pub fn dreams(&self) -> &DreamApi {
        &self.dreams
    }

    pub async fn submit(&self, draft: DreamDraft) -> Result<Submission> {
        let text = validate_dream_text(&draft.text)?;

        let plan = self.subscriptions.fetch_plan().await?;
        let tier = check_plan_allows(&plan, draft.analysis_type, Utc::now())?;
        if !plan.is_developer {
            self.subscriptions.check_analysis_quota(draft.analysis_type).await?;
        }

        let dream_id = self.dreams.insert_pending(&text, &draft).await?;
        info!(
            "[Dream] ✨ saved {} ({}, tier {})",
            dream_id,
            draft.analysis_type.as_str(),
            tier.as_str()
        );

        let payload = WebhookPayload {
            dream_id: dream_id.clone(),
            user_id: self.user_id.clone(),
            dream_text: text,
            plan_type: tier,
            visualizations_per_analysis: tier.visualizations_per_analysis(draft.analysis_type),
            language: draft.language,
            analysis_type: draft.analysis_type,
        };
        let webhook = tokio::spawn(post_webhook(
            self.http.clone(),
            self.webhook_url.clone(),
            payload,
        ));
        Ok(Submission { dream_id, webhook })
    }
}

async fn post_webhook(http: reqwest::Client, url: String, payload: WebhookPayload) {
    debug!("[Dream] webhook for {} -> {}", payload.dream_id, url);
    match http.post(&url).json(&payload).send().await {
        Ok(response) if response.status().is_success() => {
            info!("[Dream] analysis requested for {}", payload.dream_id);
        }
        Ok(response) => {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(
                "[Dream] webhook for {} answered {}: {}",
                payload.dream_id, status, body
            );
        }
        Err(e) => error!("[Dream] webhook for {} failed: {}", payload.dream_id, e),
    }
}
