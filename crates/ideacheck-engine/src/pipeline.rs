//! The refine repair chain as a small state machine.
//!
//! | stage           | next                                             |
//! |-----------------|--------------------------------------------------|
//! | `Initial`       | `JsonRepair`, `IdRepair`, `RewriteRepair`, `Done` |
//! | `JsonRepair`    | `IdRepair`, `RewriteRepair`, `Done` (degraded)    |
//! | `IdRepair`      | `RewriteRepair`, `Done`                           |
//! | `RewriteRepair` | `Done`                                            |
//!
//! Only `Initial` can fail the request. Corrective stages keep the most
//! recent structurally valid result when their call fails; with nothing
//! valid yet, the run degrades to the base cards.

use std::time::{Duration, Instant};

use ideacheck_contracts::cards::Card;
use ideacheck_contracts::events::{EventLog, RefineEvent};
use ideacheck_contracts::persist::save_result;
use ideacheck_contracts::refine::{RevisionRequest, RevisionResult};
use ideacheck_contracts::text::{excerpt, limit_sentences, same_text, strip_known_prefixes};
use indexmap::IndexMap;
use serde_json::Value;
use tracing::{info, info_span, warn};
use uuid::Uuid;

use crate::client::{
    extract_output_text, generate_with_fallback, GenerationCall, GenerationService,
    OpenAiResponsesClient, OutputFormat, ServiceError, ServiceReply,
};
use crate::config::RefineConfig;
use crate::decode::{decode_output, CandidateResponse, DecodedOutput};
use crate::error::RefineError;
use crate::merge::{
    cards_without_base, index_base_cards, reconcile_cards, same_id_set, total_unchanged_fields,
};
use crate::prompt::{
    build_id_repair_prompt, build_json_repair_prompt, build_refine_prompt, build_rewrite_prompt,
    pretty_json,
};
use crate::schema::response_schema;

pub const MAX_SUMMARY_SENTENCES: usize = 3;
pub const RAW_EXCERPT_MAX_CHARS: usize = 4_000;
pub const DEGRADED_WARNING: &str = "Model did not return valid JSON; cards left unchanged.";
pub const MISSING_CARDS_MESSAGE: &str = "Model JSON missing required 'cards' array";

#[derive(Debug, Clone, PartialEq)]
pub struct RefineOutcome {
    pub request_id: String,
    pub result: RevisionResult,
    pub warnings: Vec<String>,
    /// Start of the model text, kept when the result is degraded.
    pub raw_excerpt: Option<String>,
    pub degraded: bool,
    pub service_calls: usize,
    pub saved_to: Option<std::path::PathBuf>,
}

#[derive(Debug)]
enum Stage {
    Initial,
    JsonRepair { output_text: String },
    IdRepair { decoded: DecodedOutput },
    RewriteRepair { accepted: RevisionResult },
    Done(Finished),
}

impl Stage {
    fn name(&self) -> &'static str {
        match self {
            Stage::Initial => "initial",
            Stage::JsonRepair { .. } => "json_repair",
            Stage::IdRepair { .. } => "id_repair",
            Stage::RewriteRepair { .. } => "rewrite_repair",
            Stage::Done(_) => "done",
        }
    }
}

#[derive(Debug)]
struct Finished {
    result: RevisionResult,
    degraded: bool,
    raw_excerpt: Option<String>,
}

impl Finished {
    fn accepted(result: RevisionResult) -> Self {
        Self {
            result,
            degraded: false,
            raw_excerpt: None,
        }
    }
}

pub struct Reconciler<S> {
    config: RefineConfig,
    service: S,
    events: Option<EventLog>,
}

impl Reconciler<OpenAiResponsesClient> {
    pub fn from_config(config: RefineConfig) -> Self {
        let service = OpenAiResponsesClient::new(&config);
        Self::new(config, service)
    }
}

impl<S: GenerationService> Reconciler<S> {
    pub fn new(config: RefineConfig, service: S) -> Self {
        let events = config.events_path.as_ref().map(EventLog::new);
        Self {
            config,
            service,
            events,
        }
    }

    pub fn config(&self) -> &RefineConfig {
        &self.config
    }

    /// Runs one revision. Returns a structurally valid result, or a
    /// configuration, input or upstream error.
    pub fn refine(&self, request: &RevisionRequest) -> Result<RefineOutcome, RefineError> {
        if self.config.api_key.is_none() {
            return Err(RefineError::MissingCredential);
        }
        let idea = request
            .validated_idea()
            .map_err(RefineError::InvalidInput)?
            .to_string();

        let request_id = Uuid::new_v4().to_string();
        let span = info_span!("refine", request_id = %request_id);
        let _entered = span.enter();

        let base_by_id = index_base_cards(request.base_cards());
        let expected_ids: Vec<String> = base_by_id.keys().cloned().collect();
        let mut run = Run {
            config: &self.config,
            service: &self.service,
            request,
            idea,
            schema: response_schema(&expected_ids),
            expected_ids,
            base_by_id,
            deadline: self.config.deadline.map(|budget| Instant::now() + budget),
            events: self.events.as_ref(),
            request_id: &request_id,
            service_calls: 0,
            warnings: Vec::new(),
        };
        run.emit(RefineEvent::RefineStarted {
            model: self.config.model.clone(),
            expected_cards: run.expected_ids.len(),
        });

        let finished = run.drive()?;
        let saved_to = self
            .config
            .save
            .as_ref()
            .and_then(|target| save_result(target, &finished.result));
        if self.config.save.is_some() && saved_to.is_none() {
            warn!("could not persist refined result");
        }

        run.emit(RefineEvent::RefineFinished {
            degraded: finished.degraded,
            service_calls: run.service_calls,
            cards: finished.result.cards.len(),
        });
        info!(
            degraded = finished.degraded,
            service_calls = run.service_calls,
            "refine finished"
        );
        let service_calls = run.service_calls;
        let warnings = run.warnings;
        Ok(RefineOutcome {
            request_id,
            result: finished.result,
            warnings,
            raw_excerpt: finished.raw_excerpt,
            degraded: finished.degraded,
            service_calls,
            saved_to,
        })
    }
}

/// State for a single refine; dropped once it returns.
struct Run<'a, S: ?Sized> {
    config: &'a RefineConfig,
    service: &'a S,
    request: &'a RevisionRequest,
    idea: String,
    expected_ids: Vec<String>,
    base_by_id: IndexMap<String, Card>,
    schema: Value,
    deadline: Option<Instant>,
    events: Option<&'a EventLog>,
    request_id: &'a str,
    service_calls: usize,
    warnings: Vec<String>,
}

impl<'a, S: GenerationService + ?Sized> Run<'a, S> {
    fn drive(&mut self) -> Result<Finished, RefineError> {
        let mut stage = Stage::Initial;
        loop {
            info!(stage = stage.name(), "refine stage");
            self.emit(RefineEvent::Stage {
                stage: stage.name().to_string(),
            });
            stage = match stage {
                Stage::Initial => self.initial()?,
                Stage::JsonRepair { output_text } => self.json_repair(output_text)?,
                Stage::IdRepair { decoded } => self.id_repair(decoded),
                Stage::RewriteRepair { accepted } => self.rewrite_repair(accepted),
                Stage::Done(finished) => return Ok(finished),
            };
        }
    }

    fn initial(&mut self) -> Result<Stage, RefineError> {
        let prompt = build_refine_prompt(self.request, &self.idea);
        let Some(timeout) = self.call_timeout() else {
            return Err(RefineError::upstream("refine deadline exceeded before the first call"));
        };
        let reply = self
            .call(prompt, timeout)
            .map_err(|err| RefineError::upstream(format!("OpenAI request failed: {err}")))?;
        if !reply.is_success() {
            return Err(RefineError::Upstream {
                status: Some(reply.status),
                message: format!("OpenAI API error: {}", reply.status),
                raw: Some(body_as_value(&reply.body)),
            });
        }
        let envelope: Value = serde_json::from_str(&reply.body).map_err(|_| RefineError::Upstream {
            status: Some(reply.status),
            message: "Failed to parse OpenAI JSON response".to_string(),
            raw: Some(Value::String(reply.body.clone())),
        })?;
        let output_text = extract_output_text(&envelope).trim().to_string();
        if output_text.is_empty() {
            return Err(RefineError::Upstream {
                status: Some(reply.status),
                message: "No output text returned from model".to_string(),
                raw: Some(envelope),
            });
        }

        match decode_output(&output_text) {
            Ok(decoded) => self.route_decoded(decoded),
            Err(err) => {
                warn!(error = %err, "model output is not JSON; asking for a reformat");
                Ok(Stage::JsonRepair { output_text })
            }
        }
    }

    fn json_repair(&mut self, output_text: String) -> Result<Stage, RefineError> {
        let repaired = self
            .corrective_text(build_json_repair_prompt(&output_text), "json_repair")
            .and_then(|text| match decode_output(&text) {
                Ok(decoded) => Some(decoded),
                Err(err) => {
                    warn!(error = %err, "reformatted output is still not JSON");
                    None
                }
            });
        match repaired {
            Some(decoded) => self.route_decoded(decoded),
            None => Ok(Stage::Done(self.degraded(&output_text))),
        }
    }

    fn id_repair(&mut self, decoded: DecodedOutput) -> Stage {
        let prompt = build_id_repair_prompt(&self.expected_ids, &pretty_json(&decoded.raw));
        let corrected = self
            .corrective_text(prompt, "id_repair")
            .and_then(|text| decode_output(&text).ok())
            .filter(|candidate| candidate.candidate.cards.is_some());
        let candidate = match corrected {
            Some(corrected) => corrected.candidate,
            None => decoded.candidate,
        };
        if !same_id_set(&self.expected_ids, &candidate.card_ids()) {
            warn!("card ids still differ after repair; merging onto base cards");
            self.push_warning(
                "Model returned a different card set; cards it omitted were kept from the base.",
            );
        }
        let accepted = self.accept(&candidate);
        self.route_accepted(accepted)
    }

    fn rewrite_repair(&mut self, accepted: RevisionResult) -> Stage {
        let rewritten = self
            .corrective_text(build_rewrite_prompt(&pretty_json(&accepted)), "rewrite_repair")
            .and_then(|text| decode_output(&text).ok())
            .map(|decoded| decoded.candidate)
            .filter(|candidate| {
                candidate.cards.is_some()
                    && same_id_set(&self.expected_ids, &candidate.card_ids())
            });
        match rewritten {
            Some(candidate) => Stage::Done(Finished::accepted(self.accept(&candidate))),
            None => {
                warn!("rewrite pass not usable; keeping previous result");
                Stage::Done(Finished::accepted(accepted))
            }
        }
    }

    fn route_decoded(&mut self, decoded: DecodedOutput) -> Result<Stage, RefineError> {
        if decoded.candidate.cards.is_none() {
            return Err(RefineError::MalformedOutput {
                message: MISSING_CARDS_MESSAGE.to_string(),
                raw: Some(decoded.raw),
            });
        }
        if !self.expected_ids.is_empty()
            && !same_id_set(&self.expected_ids, &decoded.candidate.card_ids())
        {
            return Ok(Stage::IdRepair { decoded });
        }
        let accepted = self.accept(&decoded.candidate);
        Ok(self.route_accepted(accepted))
    }

    fn route_accepted(&mut self, accepted: RevisionResult) -> Stage {
        if self.expected_ids.is_empty() {
            return Stage::Done(Finished::accepted(accepted));
        }
        let unchanged = total_unchanged_fields(&accepted.cards, &self.base_by_id);
        if unchanged > 0 {
            info!(unchanged, "cards still echo base text; requesting a rewrite");
            return Stage::RewriteRepair { accepted };
        }
        Stage::Done(Finished::accepted(accepted))
    }

    /// Sanitizes cards and normalizes the two text fields of a candidate.
    fn accept(&mut self, candidate: &CandidateResponse) -> RevisionResult {
        let incoming = candidate.cards.as_deref().unwrap_or(&[]);
        let cards = if self.base_by_id.is_empty() {
            let (cards, dropped) = cards_without_base(incoming);
            if dropped > 0 {
                warn!(dropped, "dropped incomplete or duplicate cards");
                self.push_warning(&format!(
                    "{dropped} incomplete or duplicate card(s) were dropped."
                ));
            }
            cards
        } else {
            reconcile_cards(&self.base_by_id, incoming)
        };
        RevisionResult {
            ai_response: limit_sentences(&candidate.ai_response_text(), MAX_SUMMARY_SENTENCES),
            modified_idea: normalize_modified_idea(&candidate.modified_idea_text(), &self.idea),
            cards,
        }
    }

    fn degraded(&mut self, output_text: &str) -> Finished {
        warn!("model output unusable after repair; returning base cards");
        self.push_warning(DEGRADED_WARNING);
        Finished {
            result: RevisionResult {
                ai_response: limit_sentences(output_text, MAX_SUMMARY_SENTENCES),
                modified_idea: self.idea.clone(),
                cards: self.base_by_id.values().cloned().collect(),
            },
            degraded: true,
            raw_excerpt: Some(excerpt(output_text, RAW_EXCERPT_MAX_CHARS)),
        }
    }

    /// A corrective round-trip. Every failure is swallowed into `None`.
    fn corrective_text(&mut self, prompt: String, stage: &str) -> Option<String> {
        let Some(timeout) = self.call_timeout() else {
            warn!(stage, "refine deadline reached; skipping corrective call");
            return None;
        };
        let reply = match self.call(prompt, timeout) {
            Ok(reply) => reply,
            Err(err) => {
                warn!(stage, error = %err, "corrective call failed");
                return None;
            }
        };
        if !reply.is_success() {
            warn!(stage, status = reply.status, "corrective call rejected");
            return None;
        }
        let envelope: Value = serde_json::from_str(&reply.body).ok()?;
        let text = extract_output_text(&envelope).trim().to_string();
        if text.is_empty() {
            warn!(stage, "corrective call returned no text");
            return None;
        }
        Some(text)
    }

    fn call(&mut self, prompt: String, timeout: Duration) -> Result<ServiceReply, ServiceError> {
        let call = GenerationCall {
            timeout,
            ..GenerationCall::new(
                self.config,
                prompt,
                OutputFormat::JsonSchema(self.schema.clone()),
            )
        };
        self.service_calls += 1;
        let started = Instant::now();
        let outcome = generate_with_fallback(self.service, &call, || self.call_timeout());
        self.emit(RefineEvent::ServiceCall {
            call: self.service_calls,
            format: call.format.label().to_string(),
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            status: outcome.as_ref().ok().map(|reply| reply.status),
            error: outcome.as_ref().err().map(ToString::to_string),
        });
        outcome
    }

    /// Per-call timeout capped by what is left of the overall deadline;
    /// `None` once the deadline has passed.
    fn call_timeout(&self) -> Option<Duration> {
        let Some(deadline) = self.deadline else {
            return Some(self.config.call_timeout);
        };
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return None;
        }
        Some(remaining.min(self.config.call_timeout))
    }

    fn push_warning(&mut self, message: &str) {
        if !self.warnings.iter().any(|existing| existing == message) {
            self.warnings.push(message.to_string());
        }
    }

    fn emit(&self, event: RefineEvent) {
        let Some(events) = self.events else {
            return;
        };
        if let Err(err) = events.record(self.request_id, &event) {
            warn!(error = %err, path = %events.path().display(), "failed to append refine event");
        }
    }
}

/// Strips echo prefixes from the model's idea. A blank idea, or one that
/// only restates the original, collapses to the original idea.
pub fn normalize_modified_idea(candidate: &str, original_idea: &str) -> String {
    let original = strip_known_prefixes(original_idea.trim()).trim().to_string();
    let fallback = if original.is_empty() {
        original_idea.trim().to_string()
    } else {
        original
    };
    let stripped = strip_known_prefixes(candidate.trim()).trim().to_string();
    if stripped.is_empty() || same_text(&stripped, original_idea) {
        return fallback;
    }
    stripped
}

fn body_as_value(body: &str) -> Value {
    serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.to_string()))
}
