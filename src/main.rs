mod app;
mod cli;

#[cfg(feature = "tui")]
mod tui;

use anyhow::Context;
use chatstream::{config, paths};
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Streamed text goes to stdout; keep logs out of its way.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = cli::Args::parse();

    // Resolve and create dirs early.
    let config_dir = paths::config_dir()?;
    let state_dir = paths::state_dir()?;

    let cfg = config::Config::load_optional(config_dir.join("config.toml"))?;
    tracing::debug!(?config_dir, ?state_dir, ?cfg, "resolved config");

    let http = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")?;

    let conv = app::build_conversation(
        &http,
        cfg.as_ref(),
        args.model.clone(),
        &state_dir,
        args.no_history,
    )?;

    match args.cmd {
        Some(cli::Command::Chat) => return app::run_chat(&conv).await,
        Some(cli::Command::Key { secret }) => return app::cmd_key(&conv, &secret),
        Some(cli::Command::History) => return app::cmd_history(&conv),
        Some(cli::Command::New) => return app::cmd_new(&conv),
        #[cfg(feature = "tui")]
        Some(cli::Command::Tui) => {
            return tui::run_tui(std::sync::Arc::new(conv)).await;
        }
        None => {}
    }

    let prompt = args.prompt.join(" ");
    if prompt.trim().is_empty() {
        anyhow::bail!("No prompt provided. Try: chatstream \"Hello\" or `chatstream chat`");
    }

    app::run_prompt(&conv, &prompt).await
}
