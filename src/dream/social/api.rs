//! Social HTTP API: follows, blocks and reports.

use crate::dream::error::{is_conflict, is_duplicate, ConflictKind, SdkError};
use crate::dream::rest::{eq, Filter, RestClient};
use crate::dream::social::models::{Block, Follow, NewReport, ReportTarget, SocialGraph};
use anyhow::{Context, Result};
use serde_json::json;
use tracing::{debug, info};

pub struct SocialApi {
    rest: RestClient,
    user_id: String,
}

impl SocialApi {
    pub fn new(rest: RestClient, user_id: String) -> Self {
        Self { rest, user_id }
    }

    pub async fn load_graph(&self) -> Result<SocialGraph> {
        let me = &self.user_id;
        let follow_filters: Vec<Filter> = vec![(
            "or",
            format!("(follower_id.eq.{me},following_id.eq.{me})"),
        )];
        let follows: Vec<Follow> = self
            .rest
            .select("follows", &follow_filters)
            .await
            .context("failed to load follows")?;

        let block_filters: Vec<Filter> = vec![(
            "or",
            format!("(blocker_id.eq.{me},blocked_id.eq.{me})"),
        )];
        let blocks: Vec<Block> = self
            .rest
            .select("blocks", &block_filters)
            .await
            .context("failed to load blocks")?;

        let graph = SocialGraph::from_edges(me, &follows, &blocks);
        debug!(
            "[Social] following={} followers={} blocked={} blocked_by={}",
            graph.following.len(),
            graph.followers.len(),
            graph.blocked.len(),
            graph.blocked_by.len()
        );
        Ok(graph)
    }

    /// Follow `user_id`; following twice is not an error.
    pub async fn follow(&self, user_id: &str) -> Result<()> {
        if user_id == self.user_id {
            return Err(SdkError::validation("You can't follow yourself").into());
        }
        let result: Result<Vec<serde_json::Value>> = self
            .rest
            .insert(
                "follows",
                &json!({ "follower_id": self.user_id, "following_id": user_id }),
            )
            .await;
        follow_outcome(result.map(drop), user_id)
    }

    pub async fn unfollow(&self, user_id: &str) -> Result<()> {
        self.rest
            .delete(
                "follows",
                &[eq("follower_id", &self.user_id), eq("following_id", user_id)],
            )
            .await
            .context("failed to unfollow user")
    }

    /// Block `user_id` and drop follows in both directions.
    pub async fn block(&self, user_id: &str) -> Result<()> {
        if user_id == self.user_id {
            return Err(SdkError::validation("You can't block yourself").into());
        }
        let result: Result<Vec<serde_json::Value>> = self
            .rest
            .insert(
                "blocks",
                &json!({ "blocker_id": self.user_id, "blocked_id": user_id }),
            )
            .await;
        if let Err(e) = result {
            if !is_duplicate(&e) {
                return Err(e.context("failed to block user"));
            }
        }
        self.unfollow(user_id).await?;
        self.rest
            .delete(
                "follows",
                &[eq("follower_id", user_id), eq("following_id", &self.user_id)],
            )
            .await
            .context("failed to remove follower")?;
        info!("[Social] 🚫 blocked {}", user_id);
        Ok(())
    }

    pub async fn unblock(&self, user_id: &str) -> Result<()> {
        self.rest
            .delete(
                "blocks",
                &[eq("blocker_id", &self.user_id), eq("blocked_id", user_id)],
            )
            .await
            .context("failed to unblock user")
    }

    /// File a report. Reporting the same target twice is a conflict.
    pub async fn report(&self, target: ReportTarget, target_id: &str, reason: &str) -> Result<()> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(SdkError::validation("Please give a reason").into());
        }
        let report = NewReport {
            reporter_id: self.user_id.clone(),
            target_type: target,
            target_id: target_id.to_string(),
            reason: reason.to_string(),
        };
        let result: Result<Vec<serde_json::Value>> = self.rest.insert("reports", &report).await;
        report_outcome(result.map(drop), target, target_id)
    }
}

/// A follow that already exists counts as done.
fn follow_outcome(inserted: Result<()>, user_id: &str) -> Result<()> {
    match inserted {
        Ok(()) => {
            info!("[Social] ➕ following {}", user_id);
            Ok(())
        }
        Err(e) if is_duplicate(&e) => {
            debug!("[Social] already following {}", user_id);
            Ok(())
        }
        Err(e) => Err(e.context("failed to follow user")),
    }
}

/// Any uniqueness hit on a report means the target was reported before.
fn report_outcome(inserted: Result<()>, target: ReportTarget, target_id: &str) -> Result<()> {
    match inserted {
        Ok(()) => {
            info!("[Social] report filed for {:?} {}", target, target_id);
            Ok(())
        }
        Err(e) if is_duplicate(&e) || is_conflict(&e, ConflictKind::DuplicateReport) => {
            Err(SdkError::Conflict {
                kind: ConflictKind::DuplicateReport,
                detail: format!("{target_id} already reported"),
            }
            .into())
        }
        Err(e) => Err(e.context("failed to file report")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dream::error::{classify_remote_failure, ErrorKind, RemoteErrorBody};

    fn api() -> SocialApi {
        let rest = RestClient::new("http://127.0.0.1:9", "anon", "token").unwrap();
        SocialApi::new(rest, "me".into())
    }

    #[tokio::test]
    async fn self_edges_and_blank_reports_fail_validation() {
        let api = api();
        for err in [
            api.follow("me").await.unwrap_err(),
            api.block("me").await.unwrap_err(),
            api.report(ReportTarget::User, "luna", "  ").await.unwrap_err(),
        ] {
            assert_eq!(ErrorKind::of(&err), ErrorKind::Validation);
        }
    }

    /// What the store answers when a unique index rejects the insert.
    fn unique_violation() -> anyhow::Error {
        let body = RemoteErrorBody {
            code: Some("23505".into()),
            message: Some("duplicate key value violates unique constraint".into()),
            details: None,
            hint: None,
        };
        anyhow::Error::from(classify_remote_failure(409, &body)).context("POST follows failed")
    }

    #[test]
    fn following_twice_succeeds() {
        assert!(follow_outcome(Err(unique_violation()), "luna").is_ok());
        assert!(follow_outcome(Ok(()), "luna").is_ok());

        let err = follow_outcome(Err(anyhow::anyhow!("connection reset")), "luna").unwrap_err();
        assert_eq!(ErrorKind::of(&err), ErrorKind::Network);
    }

    #[test]
    fn reporting_twice_is_a_duplicate_report() {
        let err = report_outcome(Err(unique_violation()), ReportTarget::Dream, "d1").unwrap_err();
        assert!(is_conflict(&err, ConflictKind::DuplicateReport));

        let named = RemoteErrorBody {
            code: Some("23505".into()),
            message: Some("duplicate key violates \"reports_reporter_target_key\"".into()),
            details: None,
            hint: None,
        };
        let err = report_outcome(
            Err(classify_remote_failure(409, &named).into()),
            ReportTarget::User,
            "luna",
        )
        .unwrap_err();
        assert!(is_conflict(&err, ConflictKind::DuplicateReport));

        assert!(report_outcome(Ok(()), ReportTarget::User, "luna").is_ok());
    }
}
