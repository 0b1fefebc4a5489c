//! Subscription tiers and entitlement checks.

pub mod api;
pub mod models;

pub use api::{QuotaCheck, SubscriptionApi};
pub use models::{PlanSnapshot, PlanTier, TRIAL_DAYS};
