use ideacheck_contracts::cards::{Annotation, Card};
use ideacheck_contracts::refine::{BaseResponse, RevisionRequest};
use ideacheck_contracts::text::truncate_marked;
use serde::Serialize;

pub const BASE_TEXT_MAX_CHARS: usize = 14_000;
pub const BASE_JSON_MAX_CHARS: usize = 14_000;
pub const NOTES_MAX_CHARS: usize = 7_000;
pub const REPAIR_PAYLOAD_MAX_CHARS: usize = 12_000;
const EVIDENCE_POINTS_SHOWN: usize = 5;

pub const SUBCATEGORIES: [&str; 7] = [
    "Problem & Demand",
    "Market & Competition",
    "Feasibility & Risk",
    "Product & Strategy",
    "Market Readiness & Validation",
    "SWOT",
    "Market Sizing",
];

pub const SOURCES: [&str; 3] = ["IBISWorld report (Jan 2026)", "Prior context", "Synthesis"];

pub fn pretty_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

pub fn format_base_cards(cards: &[Card]) -> String {
    if cards.is_empty() {
        return "(no base cards provided)".to_string();
    }
    cards
        .iter()
        .map(|card| {
            let evidence = card
                .detail
                .points
                .iter()
                .take(EVIDENCE_POINTS_SHOWN)
                .map(String::as_str)
                .collect::<Vec<&str>>()
                .join(" | ");
            format!(
                "- [{} / {}] {}: {}\n  Summary: {}\n  Evidence: {}\n  Source: {}",
                card.category.as_str(),
                card.subcategory,
                card.label,
                card.value,
                card.detail.summary,
                evidence,
                card.detail.source
            )
        })
        .collect::<Vec<String>>()
        .join("\n")
}

pub fn format_user_notes(notes_text: Option<&str>, annotations: &[Annotation]) -> String {
    let notes = notes_text.map(str::trim).unwrap_or_default();
    let mut lines = vec![
        "User notes (verbatim):".to_string(),
        (if notes.is_empty() { "(none)" } else { notes }).to_string(),
        String::new(),
        "User annotations (verbatim, structured):".to_string(),
    ];
    if annotations.is_empty() {
        lines.push("(none)".to_string());
    }
    for annotation in annotations {
        let note = if annotation.note.is_empty() {
            "(empty)"
        } else {
            annotation.note.as_str()
        };
        lines.push(format!(
            "- Card: {} ({})\n  Selected: \"{}\"\n  Note: {}",
            annotation.card_label, annotation.card_value, annotation.selected_text, note
        ));
    }
    lines.join("\n")
}

/// The main revision instruction.
pub fn build_refine_prompt(request: &RevisionRequest, idea: &str) -> String {
    let base_cards = request.base_cards();
    let base_text = truncate_marked(&format_base_cards(base_cards), BASE_TEXT_MAX_CHARS);
    let base_json = truncate_marked(
        &pretty_json(request.base.as_ref().unwrap_or(&BaseResponse::default())),
        BASE_JSON_MAX_CHARS,
    );
    let notes = truncate_marked(
        &format_user_notes(request.notes_text.as_deref(), &request.annotations),
        NOTES_MAX_CHARS,
    );
    let expected_ids = request.expected_ids();
    let id_list = if expected_ids.is_empty() {
        "(none)".to_string()
    } else {
        expected_ids.join(", ")
    };
    let subcategories = SUBCATEGORIES
        .iter()
        .map(|value| format!("\"{value}\""))
        .collect::<Vec<String>>()
        .join(" | ");
    let sources = SOURCES
        .iter()
        .map(|value| format!("\"{value}\""))
        .collect::<Vec<String>>()
        .join(", ");

    format!(
        "Revise the idea after reconsideration.\n\
Using the original report, your prior analysis and the user's notes and annotations, re-examine the assumptions and adapt the idea without bringing in any new external data. \
Aim for the strongest version of the idea the evidence supports rather than defending the original, and answer every heading the original analysis answered.\n\
\n\
Base material (original report plus prior analysis; add no new external facts):\n\
{base_text}\n\
\n\
Current ApiResponse JSON (the authoritative card set you must update):\n\
{base_json}\n\
\n\
User feedback (notes and annotations):\n\
{notes}\n\
\n\
Original idea (user input):\n\
{idea}\n\
\n\
Output format (strict):\n\
Return one JSON object with the required keys \"aiResponse\", \"modifiedIdea\" and \"cards\".\n\
\n\
aiResponse: at most 3 sentences in total; no headings, numbering or bullets; no new external facts; summarize the revised idea and its fit.\n\
\n\
modifiedIdea: a revised version of the original idea that can go straight back into the input box. It must differ meaningfully from the original text, stay within 1-3 sentences and add no new external facts.\n\
\n\
Every card must have this shape:\n\
ApiCard = {{\n  id: string;\n  label: string;\n  value: string;\n  type: \"metric\" | \"image\" | \"testimonial\" | \"chart-bar\" | \"chart-ring\" | \"chart-progress\";\n  category: \"market\" | \"idea\";\n  subcategory: string;\n  detail: {{ title: string; summary: string; points: string[]; source: string; }};\n  author?: string;\n  quote?: string;\n}}\n\
\n\
Card rules:\n\
- Update every card to reflect the revised idea and the updated assumptions, covering all topics.\n\
- Introduce no new external facts; only re-interpret or re-weight the base material and user notes.\n\
- detail.source must be one of: {sources}.\n\
- subcategory must be exactly one of: {subcategories}.\n\
- Rewrite every user-facing text field of every card: label, value, detail.title, detail.summary and each item of detail.points.\n\
- Do not copy sentences or bullet points from the current ApiResponse JSON; no text field may equal the field of the same card id there.\n\
- id, type, category and subcategory may stay the same.\n\
- Return exactly {count} cards with exactly the same ids as the current ApiResponse JSON, updated in place. Do not add or remove cards.\n\
- Required card ids: {id_list}\n\
- The output must be strictly parseable JSON: no markdown, no extra keys.",
        count = expected_ids.len(),
    )
}

pub fn build_json_repair_prompt(invalid_output: &str) -> String {
    format!(
        "Fix the following output into a single STRICT JSON object that matches the required schema. \
Return ONLY JSON.\n\nInvalid output:\n{invalid_output}"
    )
}

pub fn build_id_repair_prompt(expected_ids: &[String], previous: &str) -> String {
    format!(
        "You returned the wrong card set. You MUST return exactly {} cards with the exact same ids as the existing ApiResponse JSON. \
Return ONLY a single JSON object with keys aiResponse, modifiedIdea and cards.\n\n\
Required ids: {}\n\n\
Here is your previous (incorrect) output; fix it without adding new external facts:\n{}",
        expected_ids.len(),
        expected_ids.join(", "),
        truncate_marked(previous, REPAIR_PAYLOAD_MAX_CHARS)
    )
}

pub fn build_rewrite_prompt(current: &str) -> String {
    format!(
        "Rewrite the following JSON so that every card's text content is substantially different from before. \
Keep EXACTLY the same card ids/count. Return ONLY JSON with keys aiResponse, modifiedIdea, cards. \
Do NOT introduce any new external facts. \
Critical: label/value/detail.title/detail.summary/detail.points must all be rewritten for every card.\n\n\
Current (insufficiently rewritten) JSON:\n{}",
        truncate_marked(current, REPAIR_PAYLOAD_MAX_CHARS)
    )
}
