use std::collections::{HashMap, HashSet};

use ideacheck_contracts::cards::{Card, CardDetail};
use ideacheck_contracts::text::{same_text, same_text_list, strip_known_prefixes};
use indexmap::IndexMap;

use crate::decode::CandidateCard;

/// Base cards keyed by id in base order. A repeated id keeps its first card.
pub fn index_base_cards(cards: &[Card]) -> IndexMap<String, Card> {
    let mut by_id = IndexMap::new();
    for card in cards {
        by_id.entry(card.id.clone()).or_insert_with(|| card.clone());
    }
    by_id
}

/// True when `returned` holds exactly the `expected` ids, in any order, each
/// once.
pub fn same_id_set(expected: &[String], returned: &[Option<String>]) -> bool {
    if expected.len() != returned.len() {
        return false;
    }
    let mut seen = HashSet::new();
    for id in returned {
        let Some(id) = id else {
            return false;
        };
        if !seen.insert(id.as_str()) {
            return false;
        }
    }
    expected.iter().all(|id| seen.contains(id.as_str()))
}

/// Field-by-field merge: anything the model left out or mistyped comes from
/// the base card. The id always comes from the base.
pub fn sanitize_against_base(incoming: Option<&CandidateCard>, base: &Card) -> Card {
    let Some(incoming) = incoming else {
        return base.clone();
    };
    let detail = incoming.detail.as_ref();
    let pick = |value: Option<&String>, fallback: &String| value.unwrap_or(fallback).clone();
    Card {
        id: base.id.clone(),
        label: pick(incoming.label.as_ref(), &base.label),
        value: pick(incoming.value.as_ref(), &base.value),
        card_type: incoming.card_type.unwrap_or(base.card_type),
        category: incoming.category.unwrap_or(base.category),
        subcategory: pick(incoming.subcategory.as_ref(), &base.subcategory),
        detail: CardDetail {
            title: pick(
                detail.and_then(|d| d.title.as_ref()),
                &base.detail.title,
            ),
            summary: pick(
                detail.and_then(|d| d.summary.as_ref()),
                &base.detail.summary,
            ),
            points: detail
                .and_then(|d| d.points.clone())
                .unwrap_or_else(|| base.detail.points.clone()),
            source: pick(
                detail.and_then(|d| d.source.as_ref()),
                &base.detail.source,
            ),
        },
        author: incoming.author.clone().or_else(|| base.author.clone()),
        quote: incoming.quote.clone().or_else(|| base.quote.clone()),
    }
}

pub fn strip_card_prefixes(card: Card) -> Card {
    Card {
        label: strip_known_prefixes(&card.label),
        value: strip_known_prefixes(&card.value),
        detail: CardDetail {
            title: strip_known_prefixes(&card.detail.title),
            summary: strip_known_prefixes(&card.detail.summary),
            points: card
                .detail
                .points
                .iter()
                .map(|point| strip_known_prefixes(point))
                .collect(),
            source: strip_known_prefixes(&card.detail.source),
        },
        author: card.author.as_deref().map(strip_known_prefixes),
        quote: card.quote.as_deref().map(strip_known_prefixes),
        ..card
    }
}

/// One card per base id, in base order: the model's card (last occurrence
/// wins) merged over the base, or the base card untouched when the model
/// dropped it. Never adds, drops or duplicates an id.
pub fn reconcile_cards(
    base_by_id: &IndexMap<String, Card>,
    candidates: &[CandidateCard],
) -> Vec<Card> {
    let mut incoming: HashMap<&str, &CandidateCard> = HashMap::new();
    for candidate in candidates {
        if let Some(id) = candidate.id.as_deref() {
            incoming.insert(id, candidate);
        }
    }
    base_by_id
        .iter()
        .map(|(id, base)| {
            strip_card_prefixes(sanitize_against_base(incoming.get(id.as_str()).copied(), base))
        })
        .collect()
}

/// Cards for a request without a base set: only complete cards survive, and a
/// repeated id keeps its first card.
pub fn cards_without_base(candidates: &[CandidateCard]) -> (Vec<Card>, usize) {
    let mut seen = HashSet::new();
    let mut cards = Vec::new();
    let mut dropped = 0;
    for candidate in candidates {
        match candidate.clone().into_card() {
            Some(card) if seen.insert(card.id.clone()) => cards.push(strip_card_prefixes(card)),
            _ => dropped += 1,
        }
    }
    (cards, dropped)
}

/// How many of label, value, detail.title, detail.summary and detail.points
/// still read the same as the base.
pub fn count_unchanged_fields(card: &Card, base: &Card) -> usize {
    [
        same_text(&card.label, &base.label),
        same_text(&card.value, &base.value),
        same_text(&card.detail.title, &base.detail.title),
        same_text(&card.detail.summary, &base.detail.summary),
        same_text_list(&card.detail.points, &base.detail.points),
    ]
    .into_iter()
    .filter(|unchanged| *unchanged)
    .count()
}

pub fn total_unchanged_fields(cards: &[Card], base_by_id: &IndexMap<String, Card>) -> usize {
    cards
        .iter()
        .filter_map(|card| {
            base_by_id
                .get(&card.id)
                .map(|base| count_unchanged_fields(card, base))
        })
        .sum()
}
