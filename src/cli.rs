// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use clap::Parser;

/// ledit — an autonomous AI coding agent for the terminal.
#[derive(Debug, Parser)]
#[command(name = "ledit", version, about)]
pub struct Cli {
    /// The task to perform, in natural language.
    #[arg(value_name = "INTENT", trailing_var_arg = true)]
    pub intent: Vec<String>,

    /// Config file path (default: ~/.ledit/config.yaml)
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Workspace root (default: current directory)
    #[arg(long, short = 'w')]
    pub workspace: Option<PathBuf>,

    /// Provider override (e.g. mock)
    #[arg(long)]
    pub provider: Option<String>,

    /// Model override
    #[arg(long, short = 'm')]
    pub model: Option<String>,

    /// Resume from a saved session state file
    #[arg(long)]
    pub resume: Option<PathBuf>,

    /// Name this session (stored in the state file)
    #[arg(long)]
    pub session_name: Option<String>,

    /// Skip all interactive prompts
    #[arg(long)]
    pub skip_prompt: bool,

    /// Print the loaded configuration and exit
    #[arg(long)]
    pub show_config: bool,

    /// Increase log verbosity (-v, -vv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    pub fn intent_text(&self) -> String {
        self.intent.join(" ")
    }
}
