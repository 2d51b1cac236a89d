use clap::{Parser, Subcommand};

/// Streaming chat client for OpenAI-compatible APIs
#[derive(Debug, Parser)]
#[command(name = "chatstream")]
#[command(version)]
#[command(about = "Streaming chat client for OpenAI-compatible APIs", long_about = None)]
pub struct Args {
    /// Model name (default: config/model or "gpt-4.1")
    #[arg(short = 'm', long = "model")]
    pub model: Option<String>,

    /// Keep the transcript in memory only; saved history is neither read nor written
    #[arg(long = "no-history")]
    pub no_history: bool,

    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// Prompt text (positional) (used when no subcommand is given)
    #[arg(value_name = "PROMPT")]
    pub prompt: Vec<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Chat interactively on stdin (/new, /key <secret>, /quit)
    Chat,

    /// Save the API key used as bearer credential
    Key {
        /// The secret, e.g. "sk-..."
        secret: String,
    },

    /// Print the saved transcript
    History,

    /// Start a new conversation (clears saved history)
    New,

    /// Run an interactive terminal chat UI
    #[cfg(feature = "tui")]
    Tui,
}
