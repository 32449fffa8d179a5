//! Decoding of model output into a typed, partially-trusted intermediate.
//!
//! Every field of a [`CandidateCard`] is optional: a value of the wrong type
//! decodes to `None` instead of failing the card, and the merge step fills
//! the gaps from the base card.

use ideacheck_contracts::cards::{Card, CardDetail, CardType, Category};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("model output is empty")]
    Empty,
    #[error("no JSON object found in output")]
    NoJsonObject,
    #[error("invalid JSON in output: {0}")]
    Invalid(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CandidateDetail {
    #[serde(default, deserialize_with = "lenient")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub summary: Option<String>,
    #[serde(default, deserialize_with = "lenient_points")]
    pub points: Option<Vec<String>>,
    #[serde(default, deserialize_with = "lenient")]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CandidateCard {
    #[serde(default, deserialize_with = "lenient")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub label: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub value: Option<String>,
    #[serde(default, rename = "type", deserialize_with = "lenient")]
    pub card_type: Option<CardType>,
    #[serde(default, deserialize_with = "lenient")]
    pub category: Option<Category>,
    #[serde(default, deserialize_with = "lenient")]
    pub subcategory: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub detail: Option<CandidateDetail>,
    #[serde(default, deserialize_with = "lenient")]
    pub author: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub quote: Option<String>,
}

impl CandidateCard {
    /// Converts to a [`Card`] when every required field decoded.
    pub fn into_card(self) -> Option<Card> {
        let detail = self.detail?;
        Some(Card {
            id: self.id?,
            label: self.label?,
            value: self.value?,
            card_type: self.card_type?,
            category: self.category?,
            subcategory: self.subcategory?,
            detail: CardDetail {
                title: detail.title?,
                summary: detail.summary?,
                points: detail.points?,
                source: detail.source?,
            },
            author: self.author,
            quote: self.quote,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateResponse {
    #[serde(default)]
    pub ai_response: Option<Value>,
    #[serde(default)]
    pub modified_idea: Option<Value>,
    #[serde(default, deserialize_with = "lenient_cards")]
    pub cards: Option<Vec<CandidateCard>>,
}

impl CandidateResponse {
    pub fn from_value(value: &Value) -> Self {
        if !value.is_object() {
            return Self::default();
        }
        serde_json::from_value(value.clone()).unwrap_or_default()
    }

    pub fn ai_response_text(&self) -> String {
        text_of(self.ai_response.as_ref())
    }

    pub fn modified_idea_text(&self) -> String {
        text_of(self.modified_idea.as_ref())
    }

    /// Card ids in output order; a card without a usable id shows up as `None`.
    pub fn card_ids(&self) -> Vec<Option<String>> {
        self.cards
            .as_deref()
            .unwrap_or(&[])
            .iter()
            .map(|card| card.id.clone())
            .collect()
    }
}

/// Parsed model output: the raw JSON value plus its typed reading.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedOutput {
    pub raw: Value,
    pub candidate: CandidateResponse,
}

pub fn decode_output(text: &str) -> Result<DecodedOutput, DecodeError> {
    let raw = parse_json_lenient(text)?;
    let candidate = CandidateResponse::from_value(&raw);
    Ok(DecodedOutput { raw, candidate })
}

/// Parses model text as JSON, tolerating code fences and prose around the
/// object.
pub fn parse_json_lenient(text: &str) -> Result<Value, DecodeError> {
    let cleaned = strip_code_fences(text);
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return Err(DecodeError::Empty);
    }
    if let Ok(parsed) = serde_json::from_str::<Value>(cleaned) {
        return Ok(parsed);
    }
    match (cleaned.find('{'), cleaned.rfind('}')) {
        (Some(start), Some(end)) if end > start => {
            Ok(serde_json::from_str::<Value>(&cleaned[start..=end])?)
        }
        _ => Err(DecodeError::NoJsonObject),
    }
}

/// Drops every ```` ``` ```` marker, including a `json` tag and whitespace
/// right after it.
fn strip_code_fences(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find("```") {
        out.push_str(&rest[..pos]);
        let mut after = &rest[pos + 3..];
        if after
            .get(..4)
            .map(|tag| tag.eq_ignore_ascii_case("json"))
            .unwrap_or(false)
        {
            after = &after[4..];
        }
        rest = after.trim_start();
    }
    out.push_str(rest);
    out
}

fn text_of(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other @ (Value::Object(_) | Value::Array(_))) => {
            serde_json::to_string_pretty(other).unwrap_or_default()
        }
        Some(other) => other.to_string(),
    }
}

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

fn lenient_points<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Value::Array(items) = Value::deserialize(deserializer)? else {
        return Ok(None);
    };
    let points = items
        .into_iter()
        .filter_map(|item| match item {
            Value::String(text) => Some(text),
            Value::Number(number) => Some(number.to_string()),
            Value::Bool(flag) => Some(flag.to_string()),
            _ => None,
        })
        .filter(|text| !text.is_empty())
        .collect();
    Ok(Some(points))
}

fn lenient_cards<'de, D>(deserializer: D) -> Result<Option<Vec<CandidateCard>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Value::Array(items) = Value::deserialize(deserializer)? else {
        return Ok(None);
    };
    Ok(Some(
        items
            .into_iter()
            .map(|item| serde_json::from_value(item).unwrap_or_default())
            .collect(),
    ))
}
