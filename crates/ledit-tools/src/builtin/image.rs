// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::debug;

use ledit_model::{CompletionRequest, Message, ModelProvider, ResponseEvent, TokenUsage};

use crate::tool::{Tool, ToolCall, ToolCategory, ToolErrorKind, ToolOutput};
use crate::workspace::Workspace;

/// What kind of analysis the vision call should perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageMode {
    /// UI screenshots: layout, widgets, visible errors.
    UiScreenshot,
    /// General content: describe what the image shows.
    Content,
}

/// Analyze an image file with a vision-capable model.
///
/// Registered twice — once per mode — under the names
/// `analyze_ui_screenshot` and `analyze_image_content`.  The vision call's
/// token usage is charged on the tool output so the session can account for
/// it separately from conversation usage.
pub struct AnalyzeImageTool {
    pub workspace: Workspace,
    pub vision: Arc<dyn ModelProvider>,
    pub mode: ImageMode,
}

#[async_trait]
impl Tool for AnalyzeImageTool {
    fn name(&self) -> &str {
        match self.mode {
            ImageMode::UiScreenshot => "analyze_ui_screenshot",
            ImageMode::Content => "analyze_image_content",
        }
    }

    fn description(&self) -> &str {
        match self.mode {
            ImageMode::UiScreenshot => {
                "Analyze a UI screenshot: layout, visible components, text, and\n\
                 any error states.  'image_path' is required; 'prompt' focuses\n\
                 the analysis on a specific question."
            }
            ImageMode::Content => {
                "Describe the content of an image file.  'image_path' is\n\
                 required; 'prompt' focuses the analysis on a specific question."
            }
        }
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "image_path": {
                    "type": "string",
                    "description": "Path to the image, relative to the workspace root"
                },
                "prompt": {
                    "type": "string",
                    "description": "Optional question to focus the analysis"
                }
            },
            "required": ["image_path"],
            "additionalProperties": false
        })
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Vision
    }
    fn estimated_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs(15)
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let raw_path = match call.str_arg(&["image_path", "path"]) {
            Some(p) => p,
            None => {
                return ToolOutput::err_kind(
                    &call.id,
                    ToolErrorKind::InvalidArgs,
                    "missing required parameter 'image_path'",
                )
            }
        };
        let path = match self.workspace.resolve(&raw_path) {
            Ok(p) => p,
            Err(kind) => {
                return ToolOutput::err_kind(
                    &call.id,
                    kind,
                    format!("'{raw_path}' is outside the workspace"),
                )
            }
        };
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return ToolOutput::err_kind(
                    &call.id,
                    ToolErrorKind::NotFound,
                    format!("image not found: {raw_path}"),
                )
            }
            Err(e) => {
                return ToolOutput::err_kind(
                    &call.id,
                    ToolErrorKind::IoError,
                    format!("read error: {e}"),
                )
            }
        };

        let mime = mime_for_extension(&raw_path);
        let data_url = format!(
            "data:{mime};base64,{}",
            base64::engine::general_purpose::STANDARD.encode(&bytes)
        );

        let system = match self.mode {
            ImageMode::UiScreenshot => {
                "You analyze UI screenshots for a coding agent. Describe layout, \
                 visible components, text labels, and any error states concisely."
            }
            ImageMode::Content => {
                "You describe image content for a coding agent. Be concise and factual."
            }
        };
        let prompt = call
            .str_arg(&["prompt"])
            .unwrap_or_else(|| "Describe this image.".to_string());

        let mut user = Message::user(prompt);
        user.images.push(data_url);

        debug!(path = %path.display(), mode = ?self.mode, "image analysis");

        let req = CompletionRequest {
            messages: vec![Message::system(system), user],
            tools: vec![],
            stream: false,
        };
        let mut stream = match self.vision.complete(req).await {
            Ok(s) => s,
            Err(e) => {
                return ToolOutput::err_kind(
                    &call.id,
                    ToolErrorKind::NetworkError,
                    format!("vision call failed: {e}"),
                )
            }
        };

        let mut text = String::new();
        let mut usage = TokenUsage::default();
        while let Some(event) = stream.next().await {
            match event {
                Ok(ResponseEvent::TextDelta(t)) => text.push_str(&t),
                Ok(ResponseEvent::Usage(u)) => usage = u,
                Ok(ResponseEvent::Done) => break,
                Ok(_) => {}
                Err(e) => {
                    return ToolOutput::err_kind(
                        &call.id,
                        ToolErrorKind::NetworkError,
                        format!("vision stream error: {e}"),
                    )
                }
            }
        }

        ToolOutput::ok(&call.id, text).with_usage(usage)
    }
}

fn mime_for_extension(path: &str) -> &'static str {
    match path.rsplit('.').next().unwrap_or("").to_lowercase().as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        _ => "application/octet-stream",
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use ledit_model::ScriptedMockProvider;

    fn setup(reply: &str) -> (tempfile::TempDir, AnalyzeImageTool) {
        let dir = tempfile::tempdir().unwrap();
        // 1×1 PNG header bytes are irrelevant — the mock never decodes them
        std::fs::write(dir.path().join("shot.png"), [0x89, 0x50, 0x4e, 0x47]).unwrap();
        let tool = AnalyzeImageTool {
            workspace: Workspace::new(dir.path()),
            vision: Arc::new(ScriptedMockProvider::always_text(reply)),
            mode: ImageMode::UiScreenshot,
        };
        (dir, tool)
    }

    fn call(args: serde_json::Value) -> ToolCall {
        ToolCall {
            id: "i".into(),
            name: "analyze_ui_screenshot".into(),
            args,
        }
    }

    #[tokio::test]
    async fn analyzes_image_and_charges_usage() {
        let (_dir, tool) = setup("a login form with two fields");
        let out = tool.execute(&call(json!({"image_path": "shot.png"}))).await;
        assert!(!out.is_error, "{}", out.content);
        assert!(out.content.contains("login form"));
        let usage = out.usage.expect("vision usage charged");
        assert!(usage.total_tokens > 0);
    }

    #[tokio::test]
    async fn sends_data_url_to_provider() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("x.png"), [1, 2, 3]).unwrap();
        let provider = Arc::new(ScriptedMockProvider::always_text("ok"));
        let tool = AnalyzeImageTool {
            workspace: Workspace::new(dir.path()),
            vision: provider.clone(),
            mode: ImageMode::Content,
        };
        tool.execute(&call(json!({"image_path": "x.png"}))).await;
        let req = provider.last_request.lock().unwrap().clone().unwrap();
        assert!(req.messages[1].images[0].starts_with("data:image/png;base64,"));
    }

    #[tokio::test]
    async fn missing_image_is_not_found() {
        let (_dir, tool) = setup("x");
        let out = tool.execute(&call(json!({"image_path": "nope.png"}))).await;
        assert_eq!(out.error_kind, Some(ToolErrorKind::NotFound));
    }

    #[tokio::test]
    async fn names_follow_mode() {
        let (_dir, tool) = setup("x");
        assert_eq!(tool.name(), "analyze_ui_screenshot");
    }
}
