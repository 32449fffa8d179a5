use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;

/// One line of the refine event log. The variant name becomes `type`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RefineEvent {
    RefineStarted {
        model: String,
        expected_cards: usize,
    },
    Stage {
        stage: String,
    },
    ServiceCall {
        call: usize,
        /// Output format requested first; a schema rejection may retry once
        /// inside the same call.
        format: String,
        elapsed_ms: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<u16>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    RefineFinished {
        degraded: bool,
        service_calls: usize,
        cards: usize,
    },
}

/// Append-only JSONL log shared by every request of a process. Each line
/// carries `type`, `run_id` and `ts`; the file is opened on first write and
/// appends are serialized behind one lock.
#[derive(Debug)]
pub struct EventLog {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, run_id: &str, event: &RefineEvent) -> anyhow::Result<Value> {
        let mut line = serde_json::to_value(event)?;
        if let Value::Object(map) = &mut line {
            map.insert("run_id".to_string(), Value::String(run_id.to_string()));
            map.insert("ts".to_string(), Value::String(now_utc_iso()));
        }
        let text = serde_json::to_string(&line)?;

        let mut slot = self
            .file
            .lock()
            .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?;
        if slot.is_none() {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            *slot = Some(OpenOptions::new().create(true).append(true).open(&self.path)?);
        }
        if let Some(file) = slot.as_mut() {
            writeln!(file, "{text}")?;
        }
        Ok(line)
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc;
    use std::thread;

    use chrono::DateTime;
    use serde_json::{json, Value};

    use super::{EventLog, RefineEvent};

    #[test]
    fn records_tagged_lines() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("logs").join("refine.jsonl");
        let log = EventLog::new(&path);

        let first = log.record(
            "req-1",
            &RefineEvent::Stage {
                stage: "initial".to_string(),
            },
        )?;
        log.record(
            "req-1",
            &RefineEvent::ServiceCall {
                call: 1,
                format: "json_schema".to_string(),
                elapsed_ms: 12,
                status: Some(200),
                error: None,
            },
        )?;

        let content = fs::read_to_string(&path)?;
        let lines: Vec<Value> = content
            .lines()
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()?;
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], first);
        assert_eq!(lines[0]["type"], json!("stage"));
        assert_eq!(lines[0]["run_id"], json!("req-1"));
        assert_eq!(lines[0]["stage"], json!("initial"));
        DateTime::parse_from_rfc3339(lines[0]["ts"].as_str().unwrap_or(""))?;
        assert_eq!(lines[1]["type"], json!("service_call"));
        assert_eq!(lines[1]["status"], json!(200));
        assert_eq!(lines[1]["format"], json!("json_schema"));
        assert!(lines[1].get("error").is_none());
        Ok(())
    }

    #[test]
    fn concurrent_requests_never_split_lines() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let log = Arc::new(EventLog::new(temp.path().join("events.jsonl")));

        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let log = Arc::clone(&log);
                thread::spawn(move || {
                    for _ in 0..25 {
                        let event = RefineEvent::RefineFinished {
                            degraded: false,
                            service_calls: worker,
                            cards: 7,
                        };
                        if log.record(&format!("req-{worker}"), &event).is_err() {
                            return false;
                        }
                    }
                    true
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap_or(false));
        }

        let content = fs::read_to_string(log.path())?;
        assert_eq!(content.lines().count(), 100);
        for line in content.lines() {
            let parsed: Value = serde_json::from_str(line)?;
            assert_eq!(parsed["type"], json!("refine_finished"));
        }
        Ok(())
    }
}
