// SPDX-License-Identifier: Apache-2.0
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::schema::Config;

/// Load configuration.
///
/// Resolution order:
/// 1. `explicit` path when given (error if unreadable)
/// 2. `~/.ledit/config.yaml` when present
/// 3. built-in defaults
///
/// After loading, the LEDIT_SKIP_PROMPT environment variable forces
/// `agent.skip_prompt = true` regardless of what the file says.
pub fn load(explicit: Option<&Path>) -> anyhow::Result<Config> {
    let mut config = match explicit {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            serde_yaml::from_str(&text)
                .with_context(|| format!("failed to parse config file {}", path.display()))?
        }
        None => match default_config_path() {
            Some(path) if path.exists() => {
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read config file {}", path.display()))?;
                debug!(path = %path.display(), "loaded config");
                serde_yaml::from_str(&text)
                    .with_context(|| format!("failed to parse config file {}", path.display()))?
            }
            _ => Config::default(),
        },
    };

    if std::env::var("LEDIT_SKIP_PROMPT").map(|v| !v.is_empty()).unwrap_or(false) {
        config.agent.skip_prompt = true;
    }
    Ok(config)
}

fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".ledit").join("config.yaml"))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
