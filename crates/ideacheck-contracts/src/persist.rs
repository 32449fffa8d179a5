use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};

use crate::refine::RevisionResult;

/// Where a finished revision gets written when persistence is switched on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveTarget {
    /// A fresh timestamped file inside this directory per revision.
    Directory(PathBuf),
    /// One fixed file, overwritten each time.
    File(PathBuf),
}

impl SaveTarget {
    pub fn resolve(&self) -> PathBuf {
        match self {
            SaveTarget::Directory(dir) => dir.join(format!(
                "apiResponse.refined.{}.json",
                file_safe_timestamp()
            )),
            SaveTarget::File(path) => path.clone(),
        }
    }
}

pub fn write_result(path: &Path, result: &RevisionResult) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(result)?)?;
    Ok(())
}

/// Writes `result` to the resolved target and returns the path, or `None`
/// when the filesystem refuses. Callers treat persistence as optional.
pub fn save_result(target: &SaveTarget, result: &RevisionResult) -> Option<PathBuf> {
    let path = target.resolve();
    write_result(&path, result).ok()?;
    Some(path)
}

fn file_safe_timestamp() -> String {
    Utc::now()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-")
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{save_result, SaveTarget};
    use crate::refine::RevisionResult;

    fn sample() -> RevisionResult {
        RevisionResult {
            ai_response: "Narrower wedge.".to_string(),
            modified_idea: "Group-trip planner for Gen Z".to_string(),
            cards: Vec::new(),
        }
    }

    #[test]
    fn directory_target_writes_timestamped_file() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let target = SaveTarget::Directory(temp.path().join("refined"));
        let path = save_result(&target, &sample()).ok_or_else(|| anyhow::anyhow!("not saved"))?;

        let name = path
            .file_name()
            .and_then(|value| value.to_str())
            .unwrap_or_default()
            .to_string();
        assert!(name.starts_with("apiResponse.refined."));
        assert!(name.ends_with(".json"));
        assert!(!name.contains(':'));

        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(parsed["modifiedIdea"], json!("Group-trip planner for Gen Z"));
        Ok(())
    }

    #[test]
    fn unwritable_target_is_reported_as_none() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let blocker = temp.path().join("blocker");
        std::fs::write(&blocker, "file, not a dir")?;
        let target = SaveTarget::File(blocker.join("out.json"));
        assert_eq!(save_result(&target, &sample()), None);
        Ok(())
    }
}
