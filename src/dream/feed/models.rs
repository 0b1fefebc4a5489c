//! Dream entries and their boundary mapping from raw rows.

use crate::dream::carousel::ordered_images;
use crate::dream::error::SdkError;
use crate::dream::notice::Language;
use crate::dream::serialization::{embedded_count, null_as_default};
use crate::dream::types::Profile;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

/// Non-terminal entries untouched for longer than this are reported as failed.
pub fn default_stale_after() -> Duration {
    Duration::minutes(15)
}

pub const IMAGE_SLOTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DreamStatus {
    Pending,
    Processing,
    Completed,
    /// Explicitly failed, or stuck in a non-terminal state too long.
    Failed,
}

impl DreamStatus {
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" | "error" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisType {
    Basic,
    Advanced,
    BasicVisual,
    AdvancedVisual,
}

impl AnalysisType {
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "basic" => Some(Self::Basic),
            "advanced" => Some(Self::Advanced),
            "basic_visual" => Some(Self::BasicVisual),
            "advanced_visual" => Some(Self::AdvancedVisual),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Advanced => "advanced",
            Self::BasicVisual => "basic_visual",
            Self::AdvancedVisual => "advanced_visual",
        }
    }

    pub fn is_visual(self) -> bool {
        matches!(self, Self::BasicVisual | Self::AdvancedVisual)
    }
}

/// Text with optional per-language variants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LocalizedText {
    pub primary: String,
    pub variants: HashMap<Language, String>,
}

impl LocalizedText {
    pub fn new(primary: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            variants: HashMap::new(),
        }
    }

    pub fn with_variant(mut self, lang: Language, text: Option<String>) -> Self {
        if let Some(text) = text.filter(|t| !t.trim().is_empty()) {
            self.variants.insert(lang, text);
        }
        self
    }

    /// Text for `lang`, falling back to the primary text.
    pub fn get(&self, lang: Language) -> &str {
        self.variants
            .get(&lang)
            .map(String::as_str)
            .unwrap_or(&self.primary)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DreamEntry {
    pub id: String,
    pub user_id: String,
    pub author: Option<Profile>,
    pub text: LocalizedText,
    pub analysis: Option<LocalizedText>,
    pub image_slots: [Option<String>; IMAGE_SLOTS],
    pub visibility: Visibility,
    pub status: DreamStatus,
    pub analysis_type: AnalysisType,
    /// Raw slot index of the cover image; always points at an occupied slot.
    pub primary_image_index: Option<usize>,
    pub created_at: DateTime<Utc>,
    pub like_count: u32,
    pub comment_count: u32,
}

impl DreamEntry {
    /// Images in display order: compacted, cover image first.
    pub fn images(&self) -> Vec<String> {
        ordered_images(&self.image_slots, self.primary_image_index)
    }

    pub fn is_public(&self) -> bool {
        self.visibility == Visibility::Public
    }

    /// Case-insensitive substring match over the text and the analysis.
    /// `needle` must already be lowercase.
    pub fn matches_search(&self, needle: &str) -> bool {
        if needle.is_empty() {
            return true;
        }
        self.text.primary.to_lowercase().contains(needle)
            || self
                .analysis
                .as_ref()
                .is_some_and(|a| a.primary.to_lowercase().contains(needle))
    }
}

/// A `dreams` row as returned by the store, with embedded author and counts.
#[derive(Debug, Clone, Deserialize)]
pub struct RawDreamRow {
    pub id: String,
    pub user_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub dream_text: String,
    #[serde(default)]
    pub dream_text_es: Option<String>,
    #[serde(default)]
    pub analysis_text: Option<String>,
    #[serde(default)]
    pub analysis_text_es: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub image_url_2: Option<String>,
    #[serde(default)]
    pub image_url_3: Option<String>,
    #[serde(default)]
    pub is_public: bool,
    pub status: String,
    #[serde(default)]
    pub analysis_type: Option<String>,
    #[serde(default)]
    pub primary_image_index: Option<i64>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "embedded_count")]
    pub likes: u32,
    #[serde(default, deserialize_with = "embedded_count")]
    pub comments: u32,
    #[serde(default)]
    pub profiles: Option<Profile>,
}

impl RawDreamRow {
    /// Map into a [`DreamEntry`].
    ///
    /// Unknown status or analysis tags are rejected. A primary index that
    /// does not point at an occupied slot is dropped.
    pub fn into_entry(self, now: DateTime<Utc>, stale_after: Duration) -> Result<DreamEntry, SdkError> {
        let mut status = DreamStatus::parse(&self.status)
            .ok_or_else(|| SdkError::Decode(format!("dream {}: unknown status {:?}", self.id, self.status)))?;
        let last_change = self.updated_at.unwrap_or(self.created_at);
        if !status.is_terminal() && now - last_change > stale_after {
            status = DreamStatus::Failed;
        }

        let analysis_type = match self.analysis_type.as_deref() {
            None => AnalysisType::Basic,
            Some(tag) => AnalysisType::parse(tag).ok_or_else(|| {
                SdkError::Decode(format!("dream {}: unknown analysis type {:?}", self.id, tag))
            })?,
        };

        let image_slots = [self.image_url, self.image_url_2, self.image_url_3]
            .map(|slot| slot.filter(|url| !url.trim().is_empty()));

        let primary_image_index = match self.primary_image_index {
            None => None,
            Some(i) => match usize::try_from(i).ok().filter(|&i| i < IMAGE_SLOTS) {
                Some(i) if image_slots[i].is_some() => Some(i),
                _ => {
                    warn!(
                        "[Feed] dream {} has primary image index {} without an image, ignoring",
                        self.id, i
                    );
                    None
                }
            },
        };

        let analysis = self.analysis_text.filter(|t| !t.trim().is_empty()).map(|t| {
            LocalizedText::new(t).with_variant(Language::Es, self.analysis_text_es)
        });

        Ok(DreamEntry {
            id: self.id,
            user_id: self.user_id,
            author: self.profiles,
            text: LocalizedText::new(self.dream_text).with_variant(Language::Es, self.dream_text_es),
            analysis,
            image_slots,
            visibility: if self.is_public {
                Visibility::Public
            } else {
                Visibility::Private
            },
            status,
            analysis_type,
            primary_image_index,
            created_at: self.created_at,
            like_count: self.likes,
            comment_count: self.comments,
        })
    }
}

/// A comment on a dream entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub dream_id: String,
    pub user_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::dream::message::models::fixtures::at;

    /// A completed public entry by `author`, created `secs` after the base time.
    pub fn entry(id: &str, author: &str, text: &str, secs: i64) -> DreamEntry {
        DreamEntry {
            id: id.to_string(),
            user_id: author.to_string(),
            author: None,
            text: LocalizedText::new(text),
            analysis: None,
            image_slots: [None, None, None],
            visibility: Visibility::Public,
            status: DreamStatus::Completed,
            analysis_type: AnalysisType::Basic,
            primary_image_index: None,
            created_at: at(secs),
            like_count: 0,
            comment_count: 0,
        }
    }
}
