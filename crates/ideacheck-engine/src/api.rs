use ideacheck_contracts::refine::{RefineEnvelope, RevisionRequest};
use serde_json::Value;
use tracing::warn;

use crate::client::GenerationService;
use crate::error::RefineError;
use crate::pipeline::Reconciler;

pub const INVALID_BODY_MESSAGE: &str = "Invalid JSON body";

/// Maps a raw request body to the HTTP status and reply envelope.
///
/// The credential is checked before the body is looked at, so a server
/// without a key answers 500 even to garbage input.
pub fn handle_refine_body<S: GenerationService>(
    reconciler: &Reconciler<S>,
    body: &str,
) -> (u16, RefineEnvelope) {
    if reconciler.config().api_key.is_none() {
        return error_reply(&RefineError::MissingCredential);
    }
    let request = match parse_request(body) {
        Ok(request) => request,
        Err(err) => return error_reply(&err),
    };
    match reconciler.refine(&request) {
        Ok(outcome) => {
            let mut envelope =
                RefineEnvelope::success(outcome.result).with_saved_to(outcome.saved_to.as_deref());
            if !outcome.warnings.is_empty() {
                envelope.warning = Some(outcome.warnings.join(" "));
            }
            envelope.raw = outcome.raw_excerpt.map(Value::String);
            (200, envelope)
        }
        Err(err) => error_reply(&err),
    }
}

pub fn parse_request(body: &str) -> Result<RevisionRequest, RefineError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|_| RefineError::InvalidInput(INVALID_BODY_MESSAGE.to_string()))?;
    if !value.get("originalIdea").is_some_and(Value::is_string) {
        return Err(RefineError::InvalidInput(
            "originalIdea is required".to_string(),
        ));
    }
    serde_json::from_value(value).map_err(|err| {
        warn!(error = %err, "refine body has the wrong shape");
        RefineError::InvalidInput(INVALID_BODY_MESSAGE.to_string())
    })
}

fn error_reply(err: &RefineError) -> (u16, RefineEnvelope) {
    let status = err.status_code();
    if status >= 500 {
        warn!(status, error = %err, "refine failed");
    }
    (status, RefineEnvelope::failure(err.to_string(), err.raw().cloned()))
}
