#![cfg(feature = "tui")]

use crate::app::{GREETING, NEW_CHAT};
use anyhow::Context;
use chatstream::stream::{ChannelSink, SinkEvent};
use chatstream::{Conversation, Phase, Turn};
use crossterm::event::{Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Modifier, Style};
use ratatui::text::{Line, Text};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};
use ratatui::Terminal;
use std::io;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;

const WORKING: &str = "\u{2026}";

#[derive(Debug, Clone)]
struct ChatLine {
    role: &'static str,
    text: String,
}

impl ChatLine {
    fn from_turn(t: &Turn) -> Self {
        Self {
            role: t.role.as_str(),
            text: t.content.clone(),
        }
    }

    fn system(text: impl Into<String>) -> Self {
        Self {
            role: "system",
            text: text.into(),
        }
    }
}

type Events = UnboundedReceiverStream<SinkEvent>;

pub async fn run_tui(conv: Arc<Conversation>) -> anyhow::Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).context("enter alt screen")?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;

    let (ev_tx, mut ev_rx) = mpsc::unbounded_channel::<Event>();
    std::thread::spawn(move || {
        while let Ok(ev) = crossterm::event::read() {
            if ev_tx.send(ev).is_err() {
                break;
            }
        }
    });

    let mut input = String::new();
    let mut lines: Vec<ChatLine> = conv.transcript().turns().iter().map(ChatLine::from_turn).collect();
    if lines.is_empty() {
        lines.push(ChatLine {
            role: "assistant",
            text: GREETING.to_string(),
        });
    }
    lines.push(ChatLine::system("Enter sends. Commands: /quit, /new, /key <secret>"));

    let (note_tx, mut note_rx) = mpsc::unbounded_channel::<String>();
    let mut active: Option<Events> = None;
    let mut ticker = tokio::time::interval(std::time::Duration::from_millis(33));

    let res = loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = draw(&mut terminal, conv.model(), &lines, &input) {
                    break Err(e);
                }
            }
            Some(ev) = ev_rx.recv() => {
                if let Event::Key(key) = ev {
                    if handle_key(key, &mut input, &mut lines, &conv, &mut active, &note_tx) {
                        break Ok(());
                    }
                }
            }
            ev = next_event(&mut active), if active.is_some() => {
                match ev {
                    Some(ev) => apply_event(&mut lines, ev),
                    None => active = None,
                }
            }
            Some(note) = note_rx.recv() => lines.push(ChatLine::system(note)),
        }
    };

    disable_raw_mode().ok();
    execute!(terminal.backend_mut(), LeaveAlternateScreen).ok();
    terminal.show_cursor().ok();

    res
}

async fn next_event(active: &mut Option<Events>) -> Option<SinkEvent> {
    match active {
        Some(events) => events.next().await,
        None => None,
    }
}

fn apply_event(lines: &mut Vec<ChatLine>, ev: SinkEvent) {
    match ev {
        SinkEvent::UserTurn(turn) => {
            lines.push(ChatLine::from_turn(&turn));
            lines.push(ChatLine {
                role: "assistant",
                text: WORKING.to_string(),
            });
        }
        SinkEvent::FirstContent => {
            if let Some(last) = lines.last_mut() {
                last.text.clear();
            }
        }
        SinkEvent::Delta(t) => {
            if let Some(last) = lines.last_mut() {
                if last.role == "assistant" {
                    last.text.push_str(&t);
                }
            }
        }
        SinkEvent::Outcome(outcome) => {
            let Some(e) = outcome.error else {
                return;
            };
            if let Some(last) = lines.last_mut() {
                let msg = format!("\u{26a0}\u{fe0f} Error: {e}");
                if outcome.full_text.is_empty() {
                    last.text = msg;
                } else {
                    last.text.push_str("\n\n");
                    last.text.push_str(&msg);
                }
            }
        }
    }
}

/// Returns true when the UI should exit.
fn handle_key(
    key: KeyEvent,
    input: &mut String,
    lines: &mut Vec<ChatLine>,
    conv: &Arc<Conversation>,
    active: &mut Option<Events>,
    notes: &mpsc::UnboundedSender<String>,
) -> bool {
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return true;
    }

    match key.code {
        KeyCode::Esc => return true,
        KeyCode::Char(c) => input.push(c),
        KeyCode::Backspace => {
            input.pop();
        }
        KeyCode::Enter => {
            let msg = input.trim().to_string();
            input.clear();
            if msg.is_empty() {
                return false;
            }

            if msg == "/quit" {
                return true;
            }
            if msg == "/new" {
                if conv.new_conversation() {
                    lines.clear();
                    lines.push(ChatLine {
                        role: "assistant",
                        text: NEW_CHAT.to_string(),
                    });
                } else {
                    lines.push(ChatLine::system("(streaming in progress; wait for completion)"));
                }
                return false;
            }
            if let Some(rest) = msg.strip_prefix("/key ") {
                let note = match conv.set_credential(rest) {
                    Ok(()) => "API key saved".to_string(),
                    Err(e) => format!("failed to save API key: {e:#}"),
                };
                lines.push(ChatLine::system(note));
                return false;
            }

            if busy(active, conv) {
                lines.push(ChatLine::system("(streaming in progress; wait for completion)"));
                return false;
            }
            if !conv.has_credential() {
                lines.push(ChatLine::system("no API key set; use /key <secret> or OPENAI_API_KEY"));
                return false;
            }

            let (sink, events) = ChannelSink::pair();
            *active = Some(events);
            spawn_submit(Arc::clone(conv), msg, sink, notes.clone());
        }
        _ => {}
    }

    false
}

/// An exchange counts as running until its event stream has been drained,
/// which can be after the conversation itself went back to idle.
fn busy(active: &Option<Events>, conv: &Conversation) -> bool {
    active.is_some() || conv.phase() == Phase::Sending
}

// Logging would draw over the alternate screen, so a refusal comes back as a
// chat line instead.
fn spawn_submit(
    conv: Arc<Conversation>,
    msg: String,
    mut sink: ChannelSink,
    notes: mpsc::UnboundedSender<String>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = conv.submit(&msg, &mut sink).await {
            let _ = notes.send(format!("message not sent: {e}"));
        }
    })
}

fn draw(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    model: &str,
    lines: &[ChatLine],
    input: &str,
) -> anyhow::Result<()> {
    terminal.draw(|f| {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(1), Constraint::Length(3)])
            .split(f.area());

        let mut text = Text::default();
        for l in lines {
            let role = format!("{}: ", l.role);
            let style = match l.role {
                "user" => Style::default().add_modifier(Modifier::BOLD),
                "system" => Style::default().add_modifier(Modifier::DIM),
                _ => Style::default(),
            };
            text.lines.push(Line::styled(role, style));
            text.lines.extend(Text::from(l.text.clone()).lines);
            text.lines.push(Line::from(""));
        }

        // Keep the newest lines in view while streaming.
        let height = chunks[0].height.saturating_sub(2) as usize;
        let scroll = text.lines.len().saturating_sub(height) as u16;

        let chat = Paragraph::new(text)
            .block(Block::default().borders(Borders::ALL).title(format!("chatstream · model: {model}")))
            .scroll((scroll, 0))
            .wrap(Wrap { trim: false });

        let input_w = Paragraph::new(input.to_string())
            .block(Block::default().borders(Borders::ALL).title("input"));

        f.render_widget(chat, chunks[0]);
        f.render_widget(input_w, chunks[1]);

        let x = chunks[1].x + 1 + input.chars().count() as u16;
        let y = chunks[1].y + 1;
        f.set_cursor_position((x.min(chunks[1].x + chunks[1].width.saturating_sub(2)), y));
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatstream::store::{MemoryCredentialStore, MemoryHistoryStore};
    use chatstream::ChatClient;

    fn conversation(key: Option<&str>) -> Arc<Conversation> {
        // Nothing here reaches the network.
        let client = ChatClient::new(reqwest::Client::new(), "http://127.0.0.1:9/v1").unwrap();
        Arc::new(Conversation::new(
            client,
            Box::new(MemoryHistoryStore::default()),
            Box::new(MemoryCredentialStore::new(key.map(str::to_string))),
        ))
    }

    fn enter() -> KeyEvent {
        KeyEvent::new(KeyCode::Enter, KeyModifiers::NONE)
    }

    #[test]
    fn enter_is_refused_while_previous_events_are_pending() {
        let conv = conversation(Some("sk-test"));
        let (_sink, events) = ChannelSink::pair();
        let mut active = Some(events);
        let (notes, _rx) = mpsc::unbounded_channel();
        let mut input = "hello".to_string();
        let mut lines = Vec::new();

        // The conversation is already idle, but the stream is not drained.
        assert_eq!(conv.phase(), Phase::Idle);
        assert!(busy(&active, &conv));

        let quit = handle_key(enter(), &mut input, &mut lines, &conv, &mut active, &notes);
        assert!(!quit);
        assert!(input.is_empty());
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].role, "system");
        assert!(lines[0].text.contains("streaming in progress"));
        assert!(conv.transcript().is_empty());
    }

    #[test]
    fn not_busy_once_events_are_drained() {
        let conv = conversation(Some("sk-test"));
        assert!(!busy(&None, &conv));
    }

    #[tokio::test]
    async fn refused_submit_is_reported_as_a_note() {
        let conv = conversation(None);
        let (sink, _events) = ChannelSink::pair();
        let (notes, mut rx) = mpsc::unbounded_channel();

        spawn_submit(Arc::clone(&conv), "hello".into(), sink, notes)
            .await
            .unwrap();

        assert_eq!(rx.recv().await.as_deref(), Some("message not sent: no API key set"));
        assert!(conv.transcript().is_empty());
    }
}
