use serde::Deserialize;

/// Payload that marks the end of a chat completion stream.
pub const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A non-empty fragment of assistant text.
    Content(String),
    /// The `[DONE]` sentinel; nothing useful follows.
    Terminal,
    /// Heartbeats, role-only deltas, unparseable payloads.
    Ignorable,
}

#[derive(Debug, Deserialize)]
struct ChunkPayload {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    delta: Option<Delta>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

/// Classify one `data:` payload.
///
/// Malformed JSON is not an error here: it simply carries no content.
pub fn extract(payload: &str) -> StreamEvent {
    if payload == DONE_SENTINEL {
        return StreamEvent::Terminal;
    }

    let parsed: ChunkPayload = match serde_json::from_str(payload) {
        Ok(p) => p,
        Err(e) => {
            tracing::debug!(error = %e, "skipping non-JSON frame");
            return StreamEvent::Ignorable;
        }
    };

    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta)
        .and_then(|d| d.content)
        .filter(|s| !s.is_empty())
        .map(StreamEvent::Content)
        .unwrap_or(StreamEvent::Ignorable)
}
