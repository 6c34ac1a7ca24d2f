// SPDX-License-Identifier: Apache-2.0
//! Workspace base-context scan: project types, interesting files, and
//! build/test suggestions derived from marker files.
//!
//! The result is cached at `.ledit/base_context.json` and skipped entirely
//! when `LEDIT_BASE_CONTEXT_DISABLE` is set.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::WalkDir;

/// Directories never descended into during the scan.
const IGNORE_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "vendor",
    "dist",
    "build",
    ".cache",
    ".venv",
    "target",
    "out",
    ".next",
];

/// At most this many files are recorded.
const FILE_CAP: usize = 200;

/// Project marker files and the (type, build, test) they imply.
const MARKERS: &[(&str, &str, &str, &str)] = &[
    ("go.mod", "go", "go build ./...", "go test ./..."),
    ("package.json", "node", "npm run build", "npm test"),
    ("pyproject.toml", "python", "", "pytest"),
    ("requirements.txt", "python", "", "pytest"),
    ("Cargo.toml", "rust", "cargo build", "cargo test"),
    ("pom.xml", "java", "mvn compile", "mvn test"),
    ("build.gradle", "java", "gradle build", "gradle test"),
];

/// Filename suffixes/prefixes that mark test files.
const TEST_SUFFIXES: &[&str] = &[
    "_test.go",
    ".test.ts",
    ".test.tsx",
    ".spec.ts",
    ".spec.tsx",
    ".test.js",
    ".test.jsx",
    ".spec.js",
    ".spec.jsx",
    "_test.py",
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BaseContext {
    pub repo_root: String,
    pub project_types: Vec<String>,
    /// category → relative paths (source / config / docs / other)
    pub files: BTreeMap<String, Vec<String>>,
    pub entrypoints: Vec<String>,
    pub tests_present: bool,
    pub build_suggestions: Vec<String>,
    pub test_suggestions: Vec<String>,
}

impl BaseContext {
    /// Compact one-paragraph description for planning prompts.
    pub fn summary(&self) -> String {
        let file_count: usize = self.files.values().map(|v| v.len()).sum();
        format!(
            "project types: {}; {} files; entrypoints: {}; tests present: {}; build: {}; test: {}",
            join_or(&self.project_types, "unknown"),
            file_count,
            join_or(&self.entrypoints, "none found"),
            self.tests_present,
            join_or(&self.build_suggestions, "none"),
            join_or(&self.test_suggestions, "none"),
        )
    }
}

fn join_or(items: &[String], fallback: &str) -> String {
    if items.is_empty() {
        fallback.to_string()
    } else {
        items.join(", ")
    }
}

/// Scan the workspace.
pub fn scan(root: &Path) -> BaseContext {
    let mut ctx = BaseContext {
        repo_root: root.to_string_lossy().into_owned(),
        ..Default::default()
    };

    for (marker, ptype, build, test) in MARKERS {
        if root.join(marker).exists() {
            if !ctx.project_types.contains(&ptype.to_string()) {
                ctx.project_types.push(ptype.to_string());
            }
            if !build.is_empty() && !ctx.build_suggestions.contains(&build.to_string()) {
                ctx.build_suggestions.push(build.to_string());
            }
            if !test.is_empty() && !ctx.test_suggestions.contains(&test.to_string()) {
                ctx.test_suggestions.push(test.to_string());
            }
        }
    }

    let mut count = 0usize;
    for entry in WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| {
            let name = e.file_name().to_string_lossy();
            !(e.file_type().is_dir() && IGNORE_DIRS.contains(&name.as_ref()))
        })
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        if count >= FILE_CAP {
            break;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .into_owned();
        let name = entry.file_name().to_string_lossy().into_owned();

        if is_test_file(&name) {
            ctx.tests_present = true;
        }
        if matches!(
            rel.as_str(),
            "main.go" | "src/main.rs" | "index.js" | "index.ts" | "main.py" | "app.py"
        ) {
            ctx.entrypoints.push(rel.clone());
        }

        let category = categorize(&name);
        ctx.files.entry(category.to_string()).or_default().push(rel);
        count += 1;
    }

    for paths in ctx.files.values_mut() {
        paths.sort();
    }
    debug!(
        types = ?ctx.project_types,
        files = count,
        "scanned workspace base context"
    );
    ctx
}

/// Load the cached context, or scan and cache.  Returns an empty context
/// when the scan is disabled by environment.
pub fn load_or_scan(root: &Path, disabled: bool) -> BaseContext {
    if disabled {
        return BaseContext {
            repo_root: root.to_string_lossy().into_owned(),
            ..Default::default()
        };
    }
    let cache_path = root.join(".ledit").join("base_context.json");
    if let Ok(text) = std::fs::read_to_string(&cache_path) {
        if let Ok(ctx) = serde_json::from_str::<BaseContext>(&text) {
            return ctx;
        }
    }
    let ctx = scan(root);
    if let Ok(json) = serde_json::to_string_pretty(&ctx) {
        let _ = std::fs::create_dir_all(cache_path.parent().unwrap_or(root));
        let _ = std::fs::write(&cache_path, json);
    }
    ctx
}

fn is_test_file(name: &str) -> bool {
    TEST_SUFFIXES.iter().any(|s| name.ends_with(s)) || name.starts_with("test_")
}

fn categorize(name: &str) -> &'static str {
    let ext = name.rsplit('.').next().unwrap_or("");
    match ext {
        "go" | "rs" | "py" | "js" | "jsx" | "ts" | "tsx" | "java" | "c" | "h" | "cpp" => "source",
        "json" | "yaml" | "yml" | "toml" | "ini" | "env" => "config",
        "md" | "rst" | "txt" => "docs",
        _ => "other",
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("go.mod"), "module example.com/x\n").unwrap();
        std::fs::write(dir.path().join("main.go"), "package main\n").unwrap();
        std::fs::write(dir.path().join("main_test.go"), "package main\n").unwrap();
        std::fs::write(dir.path().join("README.md"), "# x\n").unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules/dep")).unwrap();
        std::fs::write(dir.path().join("node_modules/dep/index.js"), "x").unwrap();
        dir
    }

    #[test]
    fn detects_go_project_with_suggestions() {
        let dir = fixture();
        let ctx = scan(dir.path());
        assert_eq!(ctx.project_types, vec!["go"]);
        assert_eq!(ctx.build_suggestions, vec!["go build ./..."]);
        assert_eq!(ctx.test_suggestions, vec!["go test ./..."]);
    }

    #[test]
    fn detects_tests_and_entrypoints() {
        let dir = fixture();
        let ctx = scan(dir.path());
        assert!(ctx.tests_present);
        assert_eq!(ctx.entrypoints, vec!["main.go"]);
    }

    #[test]
    fn ignores_node_modules() {
        let dir = fixture();
        let ctx = scan(dir.path());
        let all: Vec<&String> = ctx.files.values().flatten().collect();
        assert!(all.iter().all(|p| !p.contains("node_modules")));
    }

    #[test]
    fn categorizes_files() {
        let dir = fixture();
        let ctx = scan(dir.path());
        assert!(ctx.files["source"].iter().any(|p| p == "main.go"));
        assert!(ctx.files["docs"].iter().any(|p| p == "README.md"));
    }

    #[test]
    fn file_cap_is_enforced() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..300 {
            std::fs::write(dir.path().join(format!("f{i}.txt")), "x").unwrap();
        }
        let ctx = scan(dir.path());
        let total: usize = ctx.files.values().map(|v| v.len()).sum();
        assert_eq!(total, FILE_CAP);
    }

    #[test]
    fn disabled_scan_returns_empty() {
        let dir = fixture();
        let ctx = load_or_scan(dir.path(), true);
        assert!(ctx.project_types.is_empty());
        assert!(!dir.path().join(".ledit/base_context.json").exists());
    }

    #[test]
    fn load_or_scan_writes_cache() {
        let dir = fixture();
        let first = load_or_scan(dir.path(), false);
        assert!(dir.path().join(".ledit/base_context.json").exists());
        // second load comes from the cache and matches
        let second = load_or_scan(dir.path(), false);
        assert_eq!(first.project_types, second.project_types);
    }

    #[test]
    fn python_project_gets_pytest_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pyproject.toml"), "[tool]\n").unwrap();
        let ctx = scan(dir.path());
        assert_eq!(ctx.project_types, vec!["python"]);
        assert!(ctx.build_suggestions.is_empty());
        assert_eq!(ctx.test_suggestions, vec!["pytest"]);
    }
}
