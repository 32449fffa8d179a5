use ideacheck_contracts::cards::CardType;
use serde_json::{json, Value};

pub const AI_RESPONSE_MAX_LENGTH: u64 = 500;

/// Strict JSON schema for a refine reply. Known base ids pin both the card
/// count and the allowed id values.
pub fn response_schema(expected_ids: &[String]) -> Value {
    let card_types: Vec<&str> = CardType::ALL.iter().map(|kind| kind.as_str()).collect();
    let id_schema = if expected_ids.is_empty() {
        json!({ "type": "string" })
    } else {
        json!({ "type": "string", "enum": expected_ids })
    };

    let mut cards = json!({
        "type": "array",
        "items": {
            "type": "object",
            "additionalProperties": false,
            "required": ["id", "label", "value", "type", "category", "subcategory", "detail"],
            "properties": {
                "id": id_schema,
                "label": { "type": "string" },
                "value": { "type": "string" },
                "type": { "type": "string", "enum": card_types },
                "category": { "type": "string", "enum": ["market", "idea"] },
                "subcategory": { "type": "string" },
                "detail": {
                    "type": "object",
                    "additionalProperties": false,
                    "required": ["title", "summary", "points", "source"],
                    "properties": {
                        "title": { "type": "string" },
                        "summary": { "type": "string" },
                        "points": { "type": "array", "items": { "type": "string" } },
                        "source": { "type": "string" }
                    }
                },
                "author": { "type": "string" },
                "quote": { "type": "string" }
            }
        }
    });
    if !expected_ids.is_empty() {
        cards["minItems"] = json!(expected_ids.len());
        cards["maxItems"] = json!(expected_ids.len());
    }

    json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["aiResponse", "modifiedIdea", "cards"],
        "properties": {
            "aiResponse": { "type": "string", "maxLength": AI_RESPONSE_MAX_LENGTH },
            "modifiedIdea": { "type": "string" },
            "cards": cards
        }
    })
}
