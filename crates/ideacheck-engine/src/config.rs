use std::env;
use std::path::PathBuf;
use std::time::Duration;

use ideacheck_contracts::persist::SaveTarget;

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_MAX_OUTPUT_TOKENS: u64 = 6000;
pub const DEFAULT_TEMPERATURE: f64 = 0.2;
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(240);
pub const DEFAULT_OUT_DIR: &str = "data/refined";

/// Everything the reconciler needs from its environment, resolved up front.
#[derive(Debug, Clone, PartialEq)]
pub struct RefineConfig {
    pub api_key: Option<String>,
    pub api_base: String,
    pub model: String,
    pub max_output_tokens: u64,
    pub temperature: f64,
    pub call_timeout: Duration,
    /// Overall wall-clock budget for one refine, across every service call.
    pub deadline: Option<Duration>,
    pub save: Option<SaveTarget>,
    pub events_path: Option<PathBuf>,
}

impl Default for RefineConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            deadline: None,
            save: None,
            events_path: None,
        }
    }
}

impl RefineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from any key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |keys: &[&str]| first_non_empty(&lookup, keys);
        let defaults = Self::default();

        let save = if get(&["SAVE_REFINED_RESPONSE"]).as_deref() == Some("1") {
            Some(match get(&["REFINE_OUT_PATH"]) {
                Some(path) => SaveTarget::File(PathBuf::from(path)),
                None => SaveTarget::Directory(PathBuf::from(
                    get(&["REFINE_OUT_DIR"]).unwrap_or_else(|| DEFAULT_OUT_DIR.to_string()),
                )),
            })
        } else {
            None
        };

        Self {
            api_key: get(&["OPENAI_API_KEY", "OPENAI_API_KEY_BACKUP"]),
            api_base: normalize_api_base(
                get(&["OPENAI_API_BASE", "OPENAI_BASE_URL"]).as_deref(),
            ),
            model: get(&["OPENAI_MODEL"]).unwrap_or(defaults.model),
            max_output_tokens: get(&["OPENAI_MAX_OUTPUT_TOKENS"])
                .and_then(|raw| raw.parse::<u64>().ok())
                .filter(|value| *value > 0)
                .unwrap_or(defaults.max_output_tokens),
            temperature: get(&["OPENAI_TEMPERATURE"])
                .and_then(|raw| raw.parse::<f64>().ok())
                .filter(|value| value.is_finite() && *value >= 0.0)
                .unwrap_or(defaults.temperature),
            call_timeout: get(&["OPENAI_TIMEOUT_MS"])
                .and_then(|raw| raw.parse::<u64>().ok())
                .filter(|value| *value > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.call_timeout),
            deadline: get(&["REFINE_DEADLINE_MS"])
                .and_then(|raw| raw.parse::<u64>().ok())
                .filter(|value| *value > 0)
                .map(Duration::from_millis),
            save,
            events_path: get(&["REFINE_EVENTS_PATH"]).map(PathBuf::from),
        }
    }

    pub fn responses_endpoint(&self) -> String {
        format!("{}/responses", self.api_base)
    }
}

fn first_non_empty<F>(lookup: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    for key in keys {
        if let Some(value) = lookup(key) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

/// Trailing slashes are dropped and `/v1` is appended to bare hosts.
pub fn normalize_api_base(raw: Option<&str>) -> String {
    let raw = raw
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_API_BASE);
    let mut base = raw.trim_end_matches('/').to_string();
    if let Ok(parsed) = reqwest::Url::parse(&base) {
        if parsed.path().trim().is_empty() || parsed.path() == "/" {
            base = format!("{base}/v1");
        }
    }
    base.trim_end_matches('/').to_string()
}
