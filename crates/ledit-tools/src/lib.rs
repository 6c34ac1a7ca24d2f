// SPDX-License-Identifier: Apache-2.0
pub mod builtin;
pub mod events;
pub mod guard;
pub mod policy;
pub mod registry;
pub mod tool;
pub mod workspace;

pub use events::{TodoItem, TodoStatus, ToolEvent};
pub use policy::{ApprovalPolicy, ToolPolicy};
pub use registry::ToolRegistry;
pub use tool::{OutputCategory, Tool, ToolCall, ToolCategory, ToolErrorKind, ToolOutput};
pub use workspace::Workspace;

pub use builtin::create::CreateTool;
pub use builtin::edit_file::EditFileTool;
pub use builtin::git::GitTool;
pub use builtin::history_tools::{RollbackChangesTool, ViewHistoryTool};
pub use builtin::image::{AnalyzeImageTool, ImageMode};
pub use builtin::read_file::ReadFileTool;
pub use builtin::search_files::SearchFilesTool;
pub use builtin::shell_command::ShellCommandTool;
pub use builtin::skills::{ActivateSkillTool, ListSkillsTool, SkillLibrary};
pub use builtin::todo::{TodoReadTool, TodoWriteTool};
pub use builtin::validate_build::ValidateBuildTool;
pub use builtin::web::{FetchUrlTool, WebSearchTool};
pub use builtin::write_file::WriteFileTool;
