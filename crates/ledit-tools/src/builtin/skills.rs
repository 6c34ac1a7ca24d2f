// SPDX-License-Identifier: Apache-2.0
//! Skill playbooks: markdown files with a YAML-ish front-matter header.
//!
//! ```markdown
//! ---
//! id: deploy
//! name: Deployment checklist
//! description: How we ship this service
//! ---
//! 1. Run the tests ...
//! ```
//!
//! `list_skills` surfaces id/name/description; `activate_skill` loads the
//! body into the conversation.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::tool::{Tool, ToolCall, ToolCategory, ToolErrorKind, ToolOutput};

/// One discovered skill file.
#[derive(Debug, Clone)]
pub struct Skill {
    pub id: String,
    pub name: String,
    pub description: String,
    pub body: String,
    pub path: PathBuf,
}

/// Loads skills from a directory of markdown files.
#[derive(Debug, Clone)]
pub struct SkillLibrary {
    dir: Option<PathBuf>,
}

impl SkillLibrary {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    /// Scan the skills directory.  Missing directory → empty list.
    pub fn list(&self) -> Vec<Skill> {
        let Some(dir) = &self.dir else {
            return Vec::new();
        };
        let Ok(entries) = std::fs::read_dir(dir) else {
            return Vec::new();
        };
        let mut skills: Vec<Skill> = entries
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "md")
                    .unwrap_or(false)
            })
            .filter_map(|e| {
                let path = e.path();
                let text = std::fs::read_to_string(&path).ok()?;
                let (meta, body) = parse_front_matter(&text);
                let stem = path.file_stem()?.to_string_lossy().into_owned();
                let id = meta.get("id").cloned().unwrap_or(stem);
                Some(Skill {
                    name: meta.get("name").cloned().unwrap_or_else(|| id.clone()),
                    description: meta.get("description").cloned().unwrap_or_default(),
                    body: body.to_string(),
                    id,
                    path,
                })
            })
            .collect();
        skills.sort_by(|a, b| a.id.cmp(&b.id));
        skills
    }

    pub fn find(&self, id: &str) -> Option<Skill> {
        self.list().into_iter().find(|s| s.id == id)
    }
}

/// Split leading `---` front-matter into a key→value map and the body.
/// Content without front-matter returns an empty map and the full text.
pub fn parse_front_matter(text: &str) -> (HashMap<String, String>, &str) {
    let mut map = HashMap::new();
    let Some(rest) = text.strip_prefix("---") else {
        return (map, text);
    };
    let Some(end) = rest.find("\n---") else {
        return (map, text);
    };
    for line in rest[..end].lines() {
        if let Some((key, value)) = line.split_once(':') {
            let key = key.trim();
            if !key.is_empty() {
                map.insert(key.to_string(), value.trim().to_string());
            }
        }
    }
    let body = rest[end + 4..].trim_start_matches('\n');
    (map, body)
}

pub struct ListSkillsTool {
    pub library: SkillLibrary,
}

#[async_trait]
impl Tool for ListSkillsTool {
    fn name(&self) -> &str {
        "list_skills"
    }

    fn description(&self) -> &str {
        "List the available skill playbooks (id, name, description).\n\
         Activate one with activate_skill to load its instructions."
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {}, "additionalProperties": false })
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Planning
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let skills = self.library.list();
        if skills.is_empty() {
            return ToolOutput::ok(&call.id, "(no skills installed)");
        }
        let lines: Vec<String> = skills
            .iter()
            .map(|s| format!("{} — {} — {}", s.id, s.name, s.description))
            .collect();
        ToolOutput::ok(&call.id, lines.join("\n"))
    }
}

pub struct ActivateSkillTool {
    pub library: SkillLibrary,
}

#[async_trait]
impl Tool for ActivateSkillTool {
    fn name(&self) -> &str {
        "activate_skill"
    }

    fn description(&self) -> &str {
        "Load a named skill playbook into context.  'skill_id' comes from\n\
         list_skills; the returned text is the playbook to follow."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "skill_id": { "type": "string", "description": "Skill id from list_skills" }
            },
            "required": ["skill_id"],
            "additionalProperties": false
        })
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Planning
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let skill_id = match call.str_arg(&["skill_id", "id"]) {
            Some(s) => s,
            None => {
                return ToolOutput::err_kind(
                    &call.id,
                    ToolErrorKind::InvalidArgs,
                    "missing required parameter 'skill_id'",
                )
            }
        };
        match self.library.find(&skill_id) {
            Some(skill) => {
                debug!(skill = %skill.id, "activated skill");
                ToolOutput::ok(
                    &call.id,
                    format!("[skill: {}]\n{}", skill.name, skill.body),
                )
            }
            None => ToolOutput::err_kind(
                &call.id,
                ToolErrorKind::SkillNotFound,
                format!(
                    "skill '{skill_id}' not found; run list_skills to see what is installed"
                ),
            ),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn setup() -> (tempfile::TempDir, SkillLibrary) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("deploy.md"),
            "---\nid: deploy\nname: Deploy checklist\ndescription: ship it safely\n---\n1. tag\n2. push\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.md"), "no front matter here").unwrap();
        let lib = SkillLibrary::new(Some(dir.path().to_path_buf()));
        (dir, lib)
    }

    #[test]
    fn front_matter_parses_to_map_and_body() {
        let (meta, body) = parse_front_matter("---\nid: x\nname: The X\n---\nbody text");
        assert_eq!(meta["id"], "x");
        assert_eq!(meta["name"], "The X");
        assert_eq!(body, "body text");
    }

    #[test]
    fn no_front_matter_returns_full_text() {
        let (meta, body) = parse_front_matter("plain content");
        assert!(meta.is_empty());
        assert_eq!(body, "plain content");
    }

    #[test]
    fn value_with_colon_is_preserved() {
        let (meta, _) = parse_front_matter("---\ndescription: usage: run it\n---\nb");
        assert_eq!(meta["description"], "usage: run it");
    }

    #[test]
    fn library_lists_skills_with_stem_fallback_id() {
        let (_dir, lib) = setup();
        let skills = lib.list();
        assert_eq!(skills.len(), 2);
        assert_eq!(skills[0].id, "deploy");
        assert_eq!(skills[1].id, "notes"); // falls back to file stem
    }

    #[test]
    fn missing_dir_lists_empty() {
        let lib = SkillLibrary::new(Some(PathBuf::from("/nonexistent/skills")));
        assert!(lib.list().is_empty());
        let lib = SkillLibrary::new(None);
        assert!(lib.list().is_empty());
    }

    #[tokio::test]
    async fn activate_returns_body() {
        let (_dir, lib) = setup();
        let tool = ActivateSkillTool { library: lib };
        let out = tool
            .execute(&ToolCall {
                id: "a".into(),
                name: "activate_skill".into(),
                args: json!({"skill_id": "deploy"}),
            })
            .await;
        assert!(!out.is_error);
        assert!(out.content.contains("1. tag"));
        assert!(out.content.contains("Deploy checklist"));
    }

    #[tokio::test]
    async fn unknown_skill_is_skill_not_found() {
        let (_dir, lib) = setup();
        let tool = ActivateSkillTool { library: lib };
        let out = tool
            .execute(&ToolCall {
                id: "a".into(),
                name: "activate_skill".into(),
                args: json!({"skill_id": "ghost"}),
            })
            .await;
        assert!(out.is_error);
        assert_eq!(out.error_kind, Some(ToolErrorKind::SkillNotFound));
    }

    #[tokio::test]
    async fn list_tool_renders_lines() {
        let (_dir, lib) = setup();
        let tool = ListSkillsTool { library: lib };
        let out = tool
            .execute(&ToolCall {
                id: "l".into(),
                name: "list_skills".into(),
                args: json!({}),
            })
            .await;
        assert!(out.content.contains("deploy — Deploy checklist — ship it safely"));
    }
}
