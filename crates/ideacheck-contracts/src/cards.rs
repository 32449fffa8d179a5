use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CardType {
    Metric,
    Image,
    Testimonial,
    ChartBar,
    ChartRing,
    ChartProgress,
}

impl CardType {
    pub const ALL: [CardType; 6] = [
        CardType::Metric,
        CardType::Image,
        CardType::Testimonial,
        CardType::ChartBar,
        CardType::ChartRing,
        CardType::ChartProgress,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CardType::Metric => "metric",
            CardType::Image => "image",
            CardType::Testimonial => "testimonial",
            CardType::ChartBar => "chart-bar",
            CardType::ChartRing => "chart-ring",
            CardType::ChartProgress => "chart-progress",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Market,
    Idea,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Market => "market",
            Category::Idea => "idea",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardDetail {
    pub title: String,
    pub summary: String,
    pub points: Vec<String>,
    pub source: String,
}

/// One insight card. `id` is the identity key; a revision keeps the id set of
/// its base untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    pub id: String,
    pub label: String,
    pub value: String,
    #[serde(rename = "type")]
    pub card_type: CardType,
    pub category: Category,
    pub subcategory: String,
    pub detail: CardDetail,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote: Option<String>,
}

/// A user note pinned to a text selection on a card. Read-only context for a
/// revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub card_id: String,
    #[serde(default)]
    pub card_label: String,
    #[serde(default)]
    pub card_value: String,
    #[serde(default)]
    pub selected_text: String,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{Card, CardType, Category};

    #[test]
    fn card_round_trips_wire_names() -> anyhow::Result<()> {
        let raw = json!({
            "id": "tam",
            "label": "TAM",
            "value": "$4.2B",
            "type": "chart-ring",
            "category": "market",
            "subcategory": "Market Sizing",
            "detail": {
                "title": "Total addressable market",
                "summary": "US travel agencies",
                "points": ["Gen Z share rising"],
                "source": "Synthesis"
            }
        });
        let card: Card = serde_json::from_value(raw.clone())?;
        assert_eq!(card.card_type, CardType::ChartRing);
        assert_eq!(card.category, Category::Market);
        assert_eq!(card.author, None);

        let back = serde_json::to_value(&card)?;
        assert_eq!(back, raw);
        Ok(())
    }

    #[test]
    fn unknown_card_type_is_rejected() {
        let parsed = serde_json::from_value::<CardType>(json!("chart-pie"));
        assert!(parsed.is_err());
    }

    #[test]
    fn type_names_match_serde() -> anyhow::Result<()> {
        for card_type in CardType::ALL {
            assert_eq!(serde_json::to_value(card_type)?, json!(card_type.as_str()));
        }
        assert_eq!(serde_json::to_value(Category::Idea)?, json!("idea"));
        Ok(())
    }
}
