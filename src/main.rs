// SPDX-License-Identifier: Apache-2.0
mod cli;

use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::Cli;
use ledit_core::{Agent, AsyncOutputBuffer};
use ledit_model::{MockProvider, ModelProvider};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = ledit_config::load(cli.config.as_deref())?;
    if let Some(provider) = &cli.provider {
        config.model.provider = provider.clone();
    }
    if let Some(model) = &cli.model {
        config.model.name = model.clone();
    }
    if cli.skip_prompt {
        config.agent.skip_prompt = true;
    }

    if cli.show_config {
        println!("{}", serde_yaml::to_string(&config)?);
        return Ok(());
    }

    let intent = cli.intent_text();
    if intent.trim().is_empty() {
        bail!("no intent given; try: ledit \"fix the failing test in parser.rs\"");
    }

    let workspace = match cli.workspace {
        Some(w) => w,
        None => std::env::current_dir().context("cannot determine current directory")?,
    };

    let provider = build_provider(&config)?;
    let mut agent = Agent::new(config, provider, workspace)?;

    // FIFO output path for streamed tool/sub-agent lines; blocking sender,
    // so nothing is dropped or reordered under load.
    let (output, drain) = AsyncOutputBuffer::new(256);
    let printer = drain.spawn_stdout_printer();
    agent.set_output(output);

    if let Some(path) = &cli.resume {
        agent.load_state_file(path)?;
    }
    if let Some(name) = &cli.session_name {
        agent.set_session_name(name);
    }

    // Ctrl-C stops the loop before the next model call rather than killing
    // the process mid-write; a second Ctrl-C aborts outright.
    let interrupt = agent.interrupt_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.store(true, std::sync::atomic::Ordering::Relaxed);
        }
    });

    let result = agent.execute(&intent).await;
    let summary = agent.summary();

    // Dropping the agent releases every sender clone of the output buffer,
    // which lets the printer drain and finish.
    drop(agent);
    let _ = printer.await;

    match result {
        Ok(answer) => {
            println!("{answer}");
            println!("{summary}");
            Ok(())
        }
        Err(e) => {
            eprintln!("{summary}");
            Err(e)
        }
    }
}

/// Instantiate the configured model provider.
///
/// Concrete HTTP clients plug in here; this build ships the deterministic
/// mock provider (useful for drills and tests) and reports anything else as
/// unconfigured rather than failing mid-session.
fn build_provider(config: &ledit_config::Config) -> anyhow::Result<Arc<dyn ModelProvider>> {
    match config.model.provider.as_str() {
        "mock" => Ok(Arc::new(MockProvider)),
        other => bail!(
            "provider '{other}' has no HTTP client in this build; \
             set model.provider to one that is compiled in (mock), or \
             install a provider-enabled build"
        ),
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    // CI environments get plain output without ANSI cursor control.
    let ci = ["LEDIT_CI_MODE", "CI", "GITHUB_ACTIONS"]
        .iter()
        .any(|v| std::env::var(v).map(|s| !s.is_empty()).unwrap_or(false));
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_ansi(!ci)
        .with_writer(std::io::stderr)
        .init();
}
