use anyhow::{anyhow, Context};
use chatstream::config::Config;
use chatstream::store::{
    CredentialStore, FileCredentialStore, FileHistoryStore, HistoryStore, MemoryHistoryStore,
};
use chatstream::stream::{SessionOutcome, StreamSink};
use chatstream::{paths, ChatClient, Conversation, PreconditionError, Submitted, Transcript, Turn};
use std::io::Write;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, BufReader};

pub const GREETING: &str =
    "Hi! Set your OpenAI API key to start (/key <secret>). I stream responses as they arrive.";
pub const NEW_CHAT: &str = "New chat started. How can I help?";
const WORKING: &str = "\u{2026}";

pub fn build_conversation(
    http: &reqwest::Client,
    cfg: Option<&Config>,
    model_override: Option<String>,
    state_dir: &Path,
    no_history: bool,
) -> anyhow::Result<Conversation> {
    let default_cfg = Config::default();
    let mut client = ChatClient::from_config(http.clone(), cfg.unwrap_or(&default_cfg))?;
    if let Some(model) = model_override {
        client = client.with_model(model);
    }

    let history: Box<dyn HistoryStore> = if no_history {
        Box::new(MemoryHistoryStore::default())
    } else {
        Box::new(FileHistoryStore::new(paths::history_path(state_dir)))
    };
    let credentials: Box<dyn CredentialStore> =
        Box::new(FileCredentialStore::with_env(paths::credential_path(state_dir)));

    Ok(Conversation::new(client, history, credentials))
}

pub fn cmd_key(conv: &Conversation, secret: &str) -> anyhow::Result<()> {
    if secret.trim().is_empty() {
        anyhow::bail!("API key is empty");
    }
    conv.set_credential(secret)?;
    println!("API key saved.");
    Ok(())
}

pub fn cmd_history(conv: &Conversation) -> anyhow::Result<()> {
    let transcript = conv.transcript();
    if transcript.is_empty() {
        println!("(no history)");
        return Ok(());
    }
    print_transcript(&transcript);
    Ok(())
}

pub fn cmd_new(conv: &Conversation) -> anyhow::Result<()> {
    conv.new_conversation();
    println!("{NEW_CHAT}");
    Ok(())
}

/// One-shot: stream the answer to stdout, fail the process on any error.
pub async fn run_prompt(conv: &Conversation, prompt: &str) -> anyhow::Result<()> {
    let mut sink = TerminalSink::plain();
    let outcome = match conv.submit(prompt, &mut sink).await {
        Ok(Submitted::Finished(outcome)) => outcome,
        Ok(Submitted::Ignored) => anyhow::bail!("another exchange is in flight"),
        Err(PreconditionError::MissingCredential) => {
            anyhow::bail!("No API key found. Set OPENAI_API_KEY or run `chatstream key <SECRET>`.")
        }
        Err(e) => return Err(anyhow!(e)),
    };
    println!();

    match outcome.error {
        None => Ok(()),
        Some(e) => Err(anyhow!(e)).context("streaming failed"),
    }
}

/// Line-oriented chat loop on stdin.
pub async fn run_chat(conv: &Conversation) -> anyhow::Result<()> {
    let transcript = conv.transcript();
    if transcript.is_empty() {
        println!("assistant: {GREETING}");
    } else {
        print_transcript(&transcript);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush().ok();

        let Some(line) = lines.next_line().await.context("failed to read stdin")? else {
            println!();
            return Ok(());
        };
        let msg = line.trim();

        if msg.is_empty() {
            continue;
        }
        if msg == "/quit" {
            return Ok(());
        }
        if msg == "/new" {
            conv.new_conversation();
            println!("assistant: {NEW_CHAT}");
            continue;
        }
        if let Some(rest) = msg.strip_prefix("/key ") {
            match conv.set_credential(rest) {
                Ok(()) => println!("(API key saved)"),
                Err(e) => println!("(failed to save API key: {e:#})"),
            }
            continue;
        }

        let mut sink = TerminalSink::interactive();
        match conv.submit(msg, &mut sink).await {
            Ok(_) => {}
            Err(PreconditionError::MissingCredential) => {
                println!("(no API key set; use /key <secret> or OPENAI_API_KEY)");
            }
            Err(e) => println!("({e})"),
        }
    }
}

fn print_transcript(transcript: &Transcript) {
    for Turn { role, content, .. } in transcript.turns() {
        println!("{}: {content}", role.as_str());
        println!();
    }
}

/// Writes deltas to stdout as they arrive.
struct TerminalSink {
    interactive: bool,
    indicator: bool,
    out: std::io::Stdout,
}

impl TerminalSink {
    fn plain() -> Self {
        Self {
            interactive: false,
            indicator: false,
            out: std::io::stdout(),
        }
    }

    fn interactive() -> Self {
        Self {
            interactive: true,
            indicator: false,
            out: std::io::stdout(),
        }
    }

    fn clear_indicator(&mut self) {
        if self.indicator {
            write!(self.out, "\x08 \x08").ok();
            self.indicator = false;
        }
    }
}

impl StreamSink for TerminalSink {
    fn on_user_turn_appended(&mut self, _turn: &Turn) {
        if self.interactive {
            write!(self.out, "assistant: {WORKING}").ok();
            self.out.flush().ok();
            self.indicator = true;
        }
    }

    fn on_first_content(&mut self) {
        self.clear_indicator();
    }

    fn on_delta(&mut self, fragment: &str) {
        write!(self.out, "{fragment}").ok();
        self.out.flush().ok();
    }

    fn on_session_outcome(&mut self, outcome: &SessionOutcome) {
        if !self.interactive {
            return;
        }
        self.clear_indicator();
        if let Some(e) = &outcome.error {
            if !outcome.full_text.is_empty() {
                writeln!(self.out).ok();
            }
            write!(self.out, "\u{26a0}\u{fe0f} Error: {e}").ok();
        }
        writeln!(self.out).ok();
        writeln!(self.out).ok();
        self.out.flush().ok();
    }
}
