//! Follow, block and report edges.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Follow {
    pub follower_id: String,
    pub following_id: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub blocker_id: String,
    pub blocked_id: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportTarget {
    User,
    Dream,
    Message,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewReport {
    pub reporter_id: String,
    pub target_type: ReportTarget,
    pub target_id: String,
    pub reason: String,
}

/// The viewer's edges, loaded once and patched after each mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SocialGraph {
    pub user_id: String,
    pub following: HashSet<String>,
    pub followers: HashSet<String>,
    /// Users the viewer blocked.
    pub blocked: HashSet<String>,
    /// Users who blocked the viewer.
    pub blocked_by: HashSet<String>,
}

impl SocialGraph {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Default::default()
        }
    }

    pub fn from_edges(user_id: &str, follows: &[Follow], blocks: &[Block]) -> Self {
        let mut graph = Self::new(user_id);
        for f in follows {
            if f.follower_id == user_id {
                graph.following.insert(f.following_id.clone());
            }
            if f.following_id == user_id {
                graph.followers.insert(f.follower_id.clone());
            }
        }
        for b in blocks {
            if b.blocker_id == user_id {
                graph.blocked.insert(b.blocked_id.clone());
            }
            if b.blocked_id == user_id {
                graph.blocked_by.insert(b.blocker_id.clone());
            }
        }
        graph
    }

    pub fn is_following(&self, other: &str) -> bool {
        self.following.contains(other)
    }

    /// False when either side blocked the other.
    pub fn is_visible(&self, other: &str) -> bool {
        !self.blocked.contains(other) && !self.blocked_by.contains(other)
    }

    /// Everyone hidden from the viewer by a block in either direction.
    pub fn hidden_users(&self) -> HashSet<String> {
        self.blocked.union(&self.blocked_by).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn follow(a: &str, b: &str) -> Follow {
        Follow {
            follower_id: a.into(),
            following_id: b.into(),
            created_at: None,
        }
    }

    fn block(a: &str, b: &str) -> Block {
        Block {
            blocker_id: a.into(),
            blocked_id: b.into(),
            created_at: None,
        }
    }

    #[test]
    fn blocks_hide_in_both_directions() {
        let graph = SocialGraph::from_edges(
            "me",
            &[follow("me", "luna"), follow("sol", "me")],
            &[block("me", "troll"), block("stalker", "me")],
        );
        assert!(graph.is_following("luna"));
        assert!(!graph.is_following("sol"));
        assert!(graph.followers.contains("sol"));
        assert!(!graph.is_visible("troll"));
        assert!(!graph.is_visible("stalker"));
        assert!(graph.is_visible("luna"));
        assert_eq!(graph.hidden_users().len(), 2);
    }
}
