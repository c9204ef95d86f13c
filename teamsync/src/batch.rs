use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

/// A recorded `sync-replace new` run. Plans replay without review unless
/// `force: false` is given.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ReplayPlan {
    #[serde(default)]
    pub team: Option<String>,
    #[serde(default)]
    pub repo: Option<String>,
    #[serde(default = "default_file_pattern")]
    pub file_pattern: String,
    pub start: String,
    #[serde(default)]
    pub end: Option<String>,
    /// Inline text; omit (with no `replacement_file`) to delete matches.
    #[serde(default)]
    pub replacement: Option<String>,
    #[serde(default)]
    pub replacement_file: Option<String>,
    #[serde(default)]
    pub inline: bool,
    #[serde(default)]
    pub exclude_start: bool,
    #[serde(default)]
    pub exclude_end: bool,
    #[serde(default = "default_force")]
    pub force: bool,
}

fn default_file_pattern() -> String {
    "**/*".to_string()
}

fn default_force() -> bool {
    true
}

impl ReplayPlan {
    /// Replacement text, reading `replacement_file` relative to the plan.
    pub fn replacement_text(&self, plan_path: &Path) -> Result<Option<String>> {
        match (&self.replacement, &self.replacement_file) {
            (Some(_), Some(_)) => bail!("plan sets both replacement and replacement_file"),
            (Some(text), None) => Ok(Some(text.clone())),
            (None, Some(file)) => {
                let base = plan_path.parent().unwrap_or_else(|| Path::new("."));
                let path = base.join(file);
                let text = fs::read_to_string(&path)
                    .with_context(|| format!("reading replacement {}", path.display()))?;
                Ok(Some(text))
            }
            (None, None) => Ok(None),
        }
    }
}

pub fn load_plan(path: &Path) -> Result<ReplayPlan> {
    let data = fs::read(path).with_context(|| format!("reading plan {}", path.display()))?;
    let plan: ReplayPlan = if path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
    {
        serde_json::from_slice(&data)
            .with_context(|| format!("parsing plan {}", path.display()))?
    } else {
        serde_yaml::from_slice(&data)
            .with_context(|| format!("parsing plan {}", path.display()))?
    };
    if plan.team.is_some() && plan.repo.is_some() {
        bail!("plan {} names both a team and a repo", path.display());
    }
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn yaml_plan_defaults_to_forced_replay() {
        let temp = tempdir().expect("temp dir");
        let path = temp.path().join("bump.yaml");
        fs::write(
            &path,
            "team: platform\nfile_pattern: '**/Dockerfile'\nstart: 'FROM node:16'\n\
             replacement: 'FROM node:20'\ninline: true\n",
        )
        .expect("write plan");

        let plan = load_plan(&path).expect("plan");
        assert!(plan.force);
        assert!(plan.inline);
        assert_eq!(plan.team.as_deref(), Some("platform"));
        assert_eq!(plan.end, None);
        assert_eq!(
            plan.replacement_text(&path).expect("replacement").as_deref(),
            Some("FROM node:20")
        );
    }

    #[test]
    fn json_plan_reads_replacement_file() {
        let temp = tempdir().expect("temp dir");
        fs::write(temp.path().join("block.txt"), "a\nb\n").expect("write");
        let path = temp.path().join("plan.json");
        fs::write(
            &path,
            r##"{"repo": "acme/api", "start": "# BEGIN", "end": "# END",
                "replacement_file": "block.txt", "force": false}"##,
        )
        .expect("write plan");

        let plan = load_plan(&path).expect("plan");
        assert!(!plan.force);
        assert_eq!(plan.file_pattern, "**/*");
        assert_eq!(
            plan.replacement_text(&path).expect("replacement").as_deref(),
            Some("a\nb\n")
        );
    }

    #[test]
    fn conflicting_targets_are_rejected() {
        let temp = tempdir().expect("temp dir");
        let path = temp.path().join("plan.yml");
        fs::write(&path, "team: a\nrepo: acme/b\nstart: x\n").expect("write plan");
        assert!(load_plan(&path).is_err());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let temp = tempdir().expect("temp dir");
        let path = temp.path().join("plan.yml");
        fs::write(&path, "start: x\nregex: true\n").expect("write plan");
        assert!(load_plan(&path).is_err());
    }
}
