//! Skill definitions loaded from `SKILL.md` files.
//!
//! A skill lives in `<skills_dir>/<name>/SKILL.md`: YAML frontmatter with the
//! skill's identity, followed by markdown containing fenced ```` ```yaml ````
//! blocks. Blocks are classified by shape rather than by heading:
//!
//! | Block shape | Meaning |
//! |---|---|
//! | list, first item has `command_template` | steps |
//! | list, first item has `label`, `type` or `param_type` | parameters |
//! | map with `requires_approval` | safety |
//! | map with `prompt_template` | analysis |
//!
//! Blocks that are not valid YAML are ignored. An unparseable frontmatter or a
//! steps block whose entries do not deserialize makes the whole file invalid,
//! so a skill never loads with its steps silently missing.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use opschain_types::{SkillAnalysis, SkillDefinition, SkillInfo, SkillParam, SkillSafety, StepDefinition};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::store::{StoreError, is_safe_id};

/// File name of a skill definition inside its directory.
pub const SKILL_FILE_NAME: &str = "SKILL.md";

static YAML_BLOCK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```yaml\n(.*?)```").expect("yaml block pattern compiles"));

/// Read-only access to skill definitions.
pub trait SkillCatalog: Send + Sync {
    /// Load one skill by name. Definitions are read fresh on every call.
    fn get(&self, name: &str) -> Result<Option<SkillDefinition>, StoreError>;

    /// Summaries of every loadable skill, ordered by name.
    fn list(&self) -> Result<Vec<SkillInfo>, StoreError>;
}

/// Catalog backed by a directory of skill folders.
pub struct SkillDirectoryCatalog {
    root: PathBuf,
}

impl SkillDirectoryCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn load(&self, path: &Path, fallback_name: &str) -> Result<SkillDefinition, StoreError> {
        let content = fs::read_to_string(path)?;
        parse_skill_document(fallback_name, &content).map_err(|message| StoreError::InvalidRecord {
            path: path.to_path_buf(),
            message,
        })
    }
}

impl SkillCatalog for SkillDirectoryCatalog {
    fn get(&self, name: &str) -> Result<Option<SkillDefinition>, StoreError> {
        if !is_safe_id(name) {
            return Ok(None);
        }
        let path = self.root.join(name).join(SKILL_FILE_NAME);
        match self.load(&path, name) {
            Ok(skill) => Ok(Some(skill)),
            Err(StoreError::Io(error)) if error.kind() == ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error),
        }
    }

    fn list(&self) -> Result<Vec<SkillInfo>, StoreError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(StoreError::Io(error)),
        };

        let mut dirs: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| path.join(SKILL_FILE_NAME).is_file())
            .collect();
        dirs.sort();

        let mut skills = Vec::with_capacity(dirs.len());
        for dir in dirs {
            let fallback_name = dir.file_name().map(|name| name.to_string_lossy().to_string()).unwrap_or_default();
            let path = dir.join(SKILL_FILE_NAME);
            match self.load(&path, &fallback_name) {
                Ok(skill) => skills.push(skill.info()),
                Err(error) => warn!(path = %path.display(), %error, "failed to parse skill"),
            }
        }
        Ok(skills)
    }
}

#[derive(Debug, Default, Deserialize)]
struct Frontmatter {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    metadata: IndexMap<String, Value>,
}

/// Split a document into its YAML frontmatter and markdown body.
fn split_frontmatter(content: &str) -> (Option<&str>, &str) {
    let Some(rest) = content.strip_prefix("---\n").or_else(|| content.strip_prefix("---\r\n")) else {
        return (None, content);
    };
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            return (Some(&rest[..offset]), &rest[offset + line.len()..]);
        }
        offset += line.len();
    }
    (None, content)
}

/// Parse a `SKILL.md` document. `fallback_name` is used when the frontmatter has no name.
pub fn parse_skill_document(fallback_name: &str, content: &str) -> Result<SkillDefinition, String> {
    let (header, body) = split_frontmatter(content);
    let frontmatter: Frontmatter = match header {
        Some(header) if !header.trim().is_empty() => {
            serde_yaml::from_str(header).map_err(|error| format!("invalid frontmatter: {error}"))?
        }
        _ => Frontmatter::default(),
    };

    let mut skill = SkillDefinition::new(frontmatter.name.unwrap_or_else(|| fallback_name.to_string()), Vec::new());
    skill.description = frontmatter.description.unwrap_or_default();
    if let Some(product) = frontmatter.metadata.get("product").and_then(scalar_text) {
        skill.product = product;
    }
    if let Some(version) = frontmatter.metadata.get("version").and_then(scalar_text) {
        skill.version = version;
    }
    skill.author = frontmatter.metadata.get("author").and_then(scalar_text);
    skill.tags = frontmatter
        .metadata
        .get("tags")
        .and_then(|tags| serde_json::from_value(tags.clone()).ok())
        .unwrap_or_default();
    skill.metadata = frontmatter.metadata;

    for block in YAML_BLOCK.captures_iter(body).filter_map(|captures| captures.get(1)) {
        let parsed: Value = match serde_yaml::from_str(block.as_str()) {
            Ok(parsed) => parsed,
            Err(error) => {
                debug!(skill = %skill.name, %error, "ignoring unparseable yaml block");
                continue;
            }
        };
        apply_block(&mut skill, parsed)?;
    }
    Ok(skill)
}

fn apply_block(skill: &mut SkillDefinition, block: Value) -> Result<(), String> {
    let name = skill.name.clone();
    match &block {
        Value::Array(items) => {
            let Some(Value::Object(first)) = items.first() else {
                return Ok(());
            };
            if first.contains_key("command_template") {
                skill.steps =
                    serde_json::from_value::<Vec<StepDefinition>>(block).map_err(|error| format!("invalid steps block: {error}"))?;
            } else if ["label", "param_type", "type"].iter().any(|key| first.contains_key(*key)) {
                match serde_json::from_value::<Vec<SkillParam>>(block) {
                    Ok(parameters) => skill.parameters = parameters,
                    Err(error) => debug!(skill = %name, %error, "ignoring malformed parameters block"),
                }
            }
        }
        Value::Object(map) if map.contains_key("requires_approval") => match serde_json::from_value::<SkillSafety>(block) {
            Ok(safety) => skill.safety = safety,
            Err(error) => debug!(skill = %name, %error, "ignoring malformed safety block"),
        },
        Value::Object(map) if map.contains_key("prompt_template") => match serde_json::from_value::<SkillAnalysis>(block) {
            Ok(analysis) => skill.analysis = analysis,
            Err(error) => debug!(skill = %name, %error, "ignoring malformed analysis block"),
        },
        _ => {}
    }
    Ok(())
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

/// In-memory catalog useful for tests.
#[derive(Default)]
pub struct InMemorySkillCatalog {
    skills: Mutex<BTreeMap<String, SkillDefinition>>,
}

impl InMemorySkillCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, skill: SkillDefinition) {
        self.skills.lock().expect("skill catalog lock poisoned").insert(skill.name.clone(), skill);
    }

    pub fn with_skill(self, skill: SkillDefinition) -> Self {
        self.insert(skill);
        self
    }
}

impl SkillCatalog for InMemorySkillCatalog {
    fn get(&self, name: &str) -> Result<Option<SkillDefinition>, StoreError> {
        Ok(self.skills.lock().expect("skill catalog lock poisoned").get(name).cloned())
    }

    fn list(&self) -> Result<Vec<SkillInfo>, StoreError> {
        Ok(self.skills.lock().expect("skill catalog lock poisoned").values().map(SkillDefinition::info).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opschain_types::{StepTarget, TransportKind};
    use tempfile::tempdir;

    const POOL_STATUS: &str = r#"---
name: pool-status
description: Show pool member health
metadata:
  product: bigip
  version: "2.1"
  author: netops
  tags: [ltm, pools]
---
# pool-status

## Parameters

```yaml
- name: pool_name
  label: Pool
  type: string
  required: true
```

## Steps

```yaml
- name: show_pool
  label: Show pool
  transport: icontrol_rest
  command_template: GET /mgmt/tm/ltm/pool/{{pool_name}}/members
- name: tmsh_check
  transport: ssh
  command_template: tmsh show ltm pool {{pool_name}}
  timeout: 45
  continue_on_fail: true
  target: replica
```

## Safety

```yaml
requires_approval: false
max_duration: 120
destructive: false
rollback_enabled: false
```

## Analysis

```yaml
enabled: true
model: claude-sonnet-4-20250514
prompt_template: |
  Summarise pool health.
  {{output}}
```
"#;

    #[test]
    fn parses_frontmatter_and_classified_blocks() {
        let skill = parse_skill_document("fallback", POOL_STATUS).unwrap();
        assert_eq!(skill.name, "pool-status");
        assert_eq!(skill.product, "bigip");
        assert_eq!(skill.version, "2.1");
        assert_eq!(skill.author.as_deref(), Some("netops"));
        assert_eq!(skill.tags, vec!["ltm", "pools"]);
        assert_eq!(skill.metadata.keys().next().map(String::as_str), Some("product"));

        assert_eq!(skill.parameters.len(), 1);
        assert_eq!(skill.parameters[0].param_type, "string");

        assert_eq!(skill.steps.len(), 2);
        assert_eq!(skill.steps[0].transport, TransportKind::IcontrolRest);
        assert_eq!(skill.steps[0].timeout, 30);
        assert_eq!(skill.steps[1].timeout, 45);
        assert!(skill.steps[1].continue_on_fail);
        assert_eq!(skill.steps[1].target, StepTarget::Replica);

        assert!(!skill.safety.requires_approval);
        assert_eq!(skill.safety.max_duration, 120);
        assert!(skill.analysis.is_active());
        assert!(skill.analysis.prompt_template.contains("{{output}}"));
    }

    #[test]
    fn missing_frontmatter_name_uses_directory_name() {
        let content = "# bare\n\n```yaml\n- name: one\n  command_template: uptime\n```\n";
        let skill = parse_skill_document("bare-skill", content).unwrap();
        assert_eq!(skill.name, "bare-skill");
        assert_eq!(skill.product, "unknown");
        assert_eq!(skill.steps.len(), 1);
        assert_eq!(skill.steps[0].transport, TransportKind::Ssh);
    }

    #[test]
    fn broken_blocks_are_ignored() {
        let content = "---\nname: odd\n---\n```yaml\n- name: [unclosed\n```\n```yaml\nrequires_approval: true\n```\n";
        let skill = parse_skill_document("odd", content).unwrap();
        assert!(skill.steps.is_empty());
        assert!(skill.safety.requires_approval);
    }

    #[test]
    fn blank_step_fields_keep_the_step() {
        let content = "---\nname: blank\n---\n```yaml\n- name: show\n  label:\n  transport: ssh\n  command_template: tmsh show sys version\n  target:\n```\n";
        let skill = parse_skill_document("blank", content).unwrap();
        assert_eq!(skill.steps.len(), 1);
        assert_eq!(skill.steps[0].display_label(), "show");
        assert_eq!(skill.steps[0].target, StepTarget::Device);
        assert_eq!(skill.steps[0].timeout, 30);
    }

    #[test]
    fn malformed_steps_block_rejects_the_skill() {
        let content = "---\nname: bad\n---\n```yaml\n- name: show\n  command_template: uptime\n  timeout: soon\n```\n";
        let err = parse_skill_document("bad", content).unwrap_err();
        assert!(err.starts_with("invalid steps block"), "{err}");

        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("bad")).unwrap();
        fs::write(dir.path().join("bad").join(SKILL_FILE_NAME), content).unwrap();
        let catalog = SkillDirectoryCatalog::new(dir.path());
        assert!(matches!(catalog.get("bad"), Err(StoreError::InvalidRecord { .. })));
        assert!(catalog.list().unwrap().is_empty());
    }

    #[test]
    fn directory_catalog_lists_and_loads() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("pool-status")).unwrap();
        fs::write(dir.path().join("pool-status").join(SKILL_FILE_NAME), POOL_STATUS).unwrap();
        fs::create_dir_all(dir.path().join("broken")).unwrap();
        fs::write(dir.path().join("broken").join(SKILL_FILE_NAME), "---\nname: [\n---\n").unwrap();
        fs::create_dir_all(dir.path().join("empty-dir")).unwrap();

        let catalog = SkillDirectoryCatalog::new(dir.path());
        let listed = catalog.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "pool-status");
        assert_eq!(listed[0].transports, vec!["icontrol_rest", "ssh"]);

        assert!(catalog.get("pool-status").unwrap().is_some());
        assert!(catalog.get("missing").unwrap().is_none());
        assert!(catalog.get("../pool-status").unwrap().is_none());
        assert!(catalog.get("broken").is_err());
    }
}
