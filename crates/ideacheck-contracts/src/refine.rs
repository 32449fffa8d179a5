use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::cards::{Annotation, Card};

/// The previously accepted response a revision starts from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseResponse {
    #[serde(
        default,
        deserialize_with = "lenient_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub ai_response: Option<String>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub cards: Vec<Card>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionRequest {
    #[serde(default)]
    pub original_idea: String,
    #[serde(
        default,
        deserialize_with = "lenient_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub notes_text: Option<String>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub annotations: Vec<Annotation>,
    #[serde(
        default,
        deserialize_with = "lenient_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub base: Option<BaseResponse>,
}

impl RevisionRequest {
    /// Trimmed idea text, or the client-facing message when it is blank.
    pub fn validated_idea(&self) -> Result<&str, String> {
        let idea = self.original_idea.trim();
        if idea.is_empty() {
            return Err("originalIdea is required".to_string());
        }
        Ok(idea)
    }

    pub fn base_cards(&self) -> &[Card] {
        self.base
            .as_ref()
            .map(|base| base.cards.as_slice())
            .unwrap_or(&[])
    }

    pub fn expected_ids(&self) -> Vec<String> {
        self.base_cards().iter().map(|card| card.id.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionResult {
    pub ai_response: String,
    pub modified_idea: String,
    pub cards: Vec<Card>,
}

/// Reply shape of the refine endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefineEnvelope {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_response: Option<RevisionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RefineEnvelope {
    pub fn success(result: RevisionResult) -> Self {
        Self {
            ok: true,
            api_response: Some(result),
            saved_to: None,
            warning: None,
            raw: None,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>, raw: Option<Value>) -> Self {
        Self {
            ok: false,
            api_response: None,
            saved_to: None,
            warning: None,
            raw,
            error: Some(error.into()),
        }
    }

    pub fn with_saved_to(mut self, path: Option<&Path>) -> Self {
        self.saved_to = path.map(|value| value.to_string_lossy().to_string());
        self
    }
}

/// Anything but an array reads as empty; elements that do not decode are
/// skipped.
fn lenient_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let Value::Array(items) = Value::deserialize(deserializer)? else {
        return Ok(Vec::new());
    };
    Ok(items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect())
}

fn lenient_option<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}
