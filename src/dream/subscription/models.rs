//! Plan tiers and the subscription snapshot.

use crate::dream::feed::models::AnalysisType;
use crate::dream::serialization::null_as_default;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub const TRIAL_DAYS: i64 = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    #[default]
    Free,
    Trial,
    Standard,
    Premium,
}

impl PlanTier {
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "free" => Some(Self::Free),
            "trial" => Some(Self::Trial),
            "standard" => Some(Self::Standard),
            "premium" => Some(Self::Premium),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Trial => "trial",
            Self::Standard => "standard",
            Self::Premium => "premium",
        }
    }

    /// Every non-free tier may pick a cover image.
    pub fn can_set_primary_image(self) -> bool {
        !matches!(self, Self::Free)
    }

    pub fn allows(self, analysis: AnalysisType) -> bool {
        match self {
            Self::Free => analysis == AnalysisType::Basic,
            Self::Trial | Self::Standard => analysis != AnalysisType::AdvancedVisual,
            Self::Premium => true,
        }
    }

    /// Images generated per analysis; zero for text-only analyses.
    pub fn visualizations_per_analysis(self, analysis: AnalysisType) -> u8 {
        if !analysis.is_visual() {
            return 0;
        }
        match self {
            Self::Free => 0,
            Self::Trial | Self::Standard => 1,
            Self::Premium => 3,
        }
    }
}

/// Server-authoritative plan state as last read by the client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSnapshot {
    #[serde(rename = "plan_type", default)]
    pub tier: PlanTier,
    #[serde(default)]
    pub trial_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub trial_ends_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub daily_analysis_count: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub visual_analysis_count: u32,
    #[serde(skip_deserializing, default)]
    pub is_developer: bool,
}

impl PlanSnapshot {
    /// End of the trial window, derived from the start when the row lacks it.
    pub fn trial_end(&self) -> Option<DateTime<Utc>> {
        self.trial_ends_at
            .or_else(|| self.trial_started_at.map(|s| s + Duration::days(TRIAL_DAYS)))
    }

    /// The tier in force at `now`; an expired trial counts as free.
    pub fn effective_tier(&self, now: DateTime<Utc>) -> PlanTier {
        match (self.tier, self.trial_end()) {
            (PlanTier::Trial, Some(end)) if now >= end => PlanTier::Free,
            (tier, _) => tier,
        }
    }

    /// Whole days left in an active trial, rounded up.
    pub fn trial_days_remaining(&self, now: DateTime<Utc>) -> Option<i64> {
        if self.tier != PlanTier::Trial {
            return None;
        }
        let left = self.trial_end()? - now;
        if left <= Duration::zero() {
            return Some(0);
        }
        let day = Duration::days(1).num_seconds();
        Some((left.num_seconds() + day - 1) / day)
    }

    /// Whether a trial was ever started on this account.
    pub fn trial_used(&self) -> bool {
        self.trial_started_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn trial_window_is_three_days() {
        let plan = PlanSnapshot {
            tier: PlanTier::Trial,
            trial_started_at: Some(t("2025-06-01T00:00:00Z")),
            ..Default::default()
        };
        assert_eq!(plan.trial_end(), Some(t("2025-06-04T00:00:00Z")));
        assert_eq!(plan.trial_days_remaining(t("2025-06-01T12:00:00Z")), Some(3));
        assert_eq!(plan.trial_days_remaining(t("2025-06-03T00:00:00Z")), Some(1));
        assert_eq!(plan.effective_tier(t("2025-06-03T23:59:59Z")), PlanTier::Trial);
        assert_eq!(plan.effective_tier(t("2025-06-04T00:00:00Z")), PlanTier::Free);
        assert_eq!(plan.trial_days_remaining(t("2025-06-05T00:00:00Z")), Some(0));
    }

    #[test]
    fn decodes_subscription_row() {
        let plan: PlanSnapshot = serde_json::from_value(serde_json::json!({
            "plan_type": "premium",
            "daily_analysis_count": 2,
            "visual_analysis_count": null,
        }))
        .unwrap();
        assert_eq!(plan.tier, PlanTier::Premium);
        assert_eq!(plan.visual_analysis_count, 0);
        assert!(!plan.trial_used());
    }

    #[test]
    fn visualizations_follow_tier_and_analysis() {
        assert_eq!(PlanTier::Premium.visualizations_per_analysis(AnalysisType::Advanced), 0);
        assert_eq!(PlanTier::Premium.visualizations_per_analysis(AnalysisType::AdvancedVisual), 3);
        assert_eq!(PlanTier::Trial.visualizations_per_analysis(AnalysisType::BasicVisual), 1);
        assert!(!PlanTier::Free.allows(AnalysisType::Advanced));
        assert!(!PlanTier::Standard.allows(AnalysisType::AdvancedVisual));
        assert!(PlanTier::Premium.allows(AnalysisType::AdvancedVisual));
    }
}
