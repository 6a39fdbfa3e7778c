//! Structured story summary extracted from a conversation.
//!
//! The extraction model is asked for a bare JSON object, but compliance is
//! advisory. Parsing here locates the outermost `{ ... }` span, decodes it
//! strictly, and either accepts the whole object or rejects it. A rejected
//! extraction is replaced by [`StoryInfo::default`], never merged with a
//! previous snapshot.

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Keys of the StoryInfo object, in the order the extraction prompt lists them.
pub const STORY_FIELDS: [&str; 11] = [
    "title",
    "setting",
    "main_character",
    "side_character",
    "goal",
    "conflict",
    "climax",
    "helpers",
    "villains",
    "ending",
    "theme",
];

/// Why a model response could not be turned into a [`StoryInfo`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoryParseError {
    #[error("no JSON object found in model output")]
    NoObject,

    #[error("malformed story JSON: {0}")]
    Malformed(String),
}

/// Fixed-schema story summary. Every field is always present; unknown
/// details are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoryInfo {
    #[serde(deserialize_with = "null_as_empty")]
    pub title: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub setting: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub main_character: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub side_character: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub goal: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub conflict: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub climax: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub helpers: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub villains: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub ending: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub theme: String,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl StoryInfo {
    /// Parse a model response, rejecting anything that is not a clean object.
    pub fn parse(raw: &str) -> Result<Self, StoryParseError> {
        let json = extract_json_object(raw).ok_or(StoryParseError::NoObject)?;
        serde_json::from_str(json).map_err(|e| StoryParseError::Malformed(e.to_string()))
    }

    /// Parse a model response, falling back to the all-empty default.
    pub fn from_model_output(raw: &str) -> Self {
        match Self::parse(raw) {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!(error = %e, "Story extraction rejected, resetting story info");
                Self::default()
            }
        }
    }

    /// Look up a field by its JSON key.
    pub fn get(&self, key: &str) -> Option<&str> {
        let value = match key {
            "title" => &self.title,
            "setting" => &self.setting,
            "main_character" => &self.main_character,
            "side_character" => &self.side_character,
            "goal" => &self.goal,
            "conflict" => &self.conflict,
            "climax" => &self.climax,
            "helpers" => &self.helpers,
            "villains" => &self.villains,
            "ending" => &self.ending,
            "theme" => &self.theme,
            _ => return None,
        };
        Some(value.as_str())
    }

    /// `(key, value)` pairs in schema order.
    pub fn fields(&self) -> impl Iterator<Item = (&'static str, &str)> {
        STORY_FIELDS
            .iter()
            .map(move |key| (*key, self.get(key).unwrap_or_default()))
    }

    /// True when no field has been filled in.
    pub fn is_empty(&self) -> bool {
        self.fields().all(|(_, v)| v.is_empty())
    }
}

/// Slice from the first `{` to the last `}` inclusive.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}
