use serde_json::Value;
use thiserror::Error;

/// Failures that cross the reconciler boundary. Format violations in model
/// output are repaired internally and never show up here.
#[derive(Debug, Error)]
pub enum RefineError {
    #[error("Missing OPENAI_API_KEY on server")]
    MissingCredential,

    #[error("{0}")]
    InvalidInput(String),

    #[error("{message}")]
    Upstream {
        status: Option<u16>,
        message: String,
        raw: Option<Value>,
    },

    #[error("{message}")]
    MalformedOutput { message: String, raw: Option<Value> },
}

impl RefineError {
    pub fn upstream(message: impl Into<String>) -> Self {
        RefineError::Upstream {
            status: None,
            message: message.into(),
            raw: None,
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            RefineError::MissingCredential => 500,
            RefineError::InvalidInput(_) => 400,
            RefineError::Upstream { .. } | RefineError::MalformedOutput { .. } => 502,
        }
    }

    /// Diagnostic payload to echo back to the caller, when one exists.
    pub fn raw(&self) -> Option<&Value> {
        match self {
            RefineError::Upstream { raw, .. } | RefineError::MalformedOutput { raw, .. } => {
                raw.as_ref()
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::RefineError;

    #[test]
    fn status_codes_follow_error_class() {
        assert_eq!(RefineError::MissingCredential.status_code(), 500);
        assert_eq!(
            RefineError::InvalidInput("originalIdea is required".to_string()).status_code(),
            400
        );
        assert_eq!(RefineError::upstream("down").status_code(), 502);
        let malformed = RefineError::MalformedOutput {
            message: "Model JSON missing required 'cards' array".to_string(),
            raw: Some(json!({"aiResponse": "x"})),
        };
        assert_eq!(malformed.status_code(), 502);
        assert_eq!(malformed.raw(), Some(&json!({"aiResponse": "x"})));
        assert_eq!(
            malformed.to_string(),
            "Model JSON missing required 'cards' array"
        );
    }
}
