use super::decoder::{DecodeError, Frame, FrameDecoder};
use super::delta::{extract, StreamEvent};
use super::sink::StreamSink;
use crate::client::ChatClient;
use futures_core::Stream;
use thiserror::Error;
use tokio_stream::StreamExt;

/// Why a session failed. Messages are kept as text so the outcome can be
/// cloned to any number of sinks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Non-success status; `detail` is the response body or reason phrase.
    #[error("HTTP {status}: {detail}")]
    Http { status: u16, detail: String },

    /// The request never produced a response (connect, TLS, bad header).
    #[error("request failed: {0}")]
    Request(String),

    /// The transport broke while the body was streaming.
    #[error("network stream error: {0}")]
    Read(String),

    #[error("failed to decode response stream: {0}")]
    Decode(String),
}

impl From<DecodeError> for SessionError {
    fn from(e: DecodeError) -> Self {
        SessionError::Decode(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Completed,
    Failed,
}

/// Terminal result of one exchange, produced exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub status: SessionStatus,
    /// Every delta emitted so far, concatenated. Kept on failure too.
    pub full_text: String,
    pub error: Option<SessionError>,
}

impl SessionOutcome {
    pub fn completed(full_text: String) -> Self {
        Self {
            status: SessionStatus::Completed,
            full_text,
            error: None,
        }
    }

    pub fn failed(full_text: String, error: SessionError) -> Self {
        Self {
            status: SessionStatus::Failed,
            full_text,
            error: Some(error),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == SessionStatus::Completed
    }
}

/// One request/response exchange. Consumed by [`StreamSession::start`], so it
/// cannot run twice.
#[derive(Debug)]
pub struct StreamSession {
    client: ChatClient,
}

impl StreamSession {
    pub fn new(client: ChatClient) -> Self {
        Self { client }
    }

    /// Issue the request and stream the reply into `sink`.
    ///
    /// Never returns an error: every failure is folded into the outcome, which
    /// is also handed to `sink.on_session_outcome`.
    pub async fn start(
        self,
        credential: &str,
        user_text: &str,
        sink: &mut (dyn StreamSink + Send),
    ) -> SessionOutcome {
        let outcome = match self.client.open(credential, user_text).await {
            Ok(resp) => drive(resp.bytes_stream(), sink).await,
            Err(e) => SessionOutcome::failed(String::new(), e),
        };

        match &outcome.error {
            None => tracing::info!(chars = outcome.full_text.len(), "session completed"),
            Some(e) => tracing::info!(error = %e, "session failed"),
        }

        sink.on_session_outcome(&outcome);
        outcome
    }
}

enum Flow {
    Continue,
    Terminal,
}

#[derive(Default)]
struct Progress {
    full_text: String,
    seen_content: bool,
}

impl Progress {
    fn apply(
        &mut self,
        frames: Vec<Result<Frame, DecodeError>>,
        sink: &mut (dyn StreamSink + Send),
    ) -> Result<Flow, SessionError> {
        for frame in frames {
            let Frame::Data(payload) = frame? else {
                continue;
            };
            match extract(&payload) {
                StreamEvent::Content(fragment) => {
                    if !self.seen_content {
                        self.seen_content = true;
                        sink.on_first_content();
                    }
                    sink.on_delta(&fragment);
                    self.full_text.push_str(&fragment);
                }
                StreamEvent::Terminal => return Ok(Flow::Terminal),
                StreamEvent::Ignorable => {}
            }
        }
        Ok(Flow::Continue)
    }
}

/// Decode a response body into deltas for `sink`.
///
/// Reading stops as soon as the `[DONE]` sentinel is seen and the body
/// stream is dropped, which releases the connection. A body that simply ends
/// without the sentinel still completes. Does not call
/// `on_session_outcome`; that is left to the owner of the exchange.
pub async fn drive<S, B, E>(body: S, sink: &mut (dyn StreamSink + Send)) -> SessionOutcome
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut body = Box::pin(body);
    let mut decoder = FrameDecoder::new();
    let mut progress = Progress::default();

    while let Some(item) = body.next().await {
        let chunk = match item {
            Ok(c) => c,
            Err(e) => {
                let err = SessionError::Read(e.to_string());
                return SessionOutcome::failed(progress.full_text, err);
            }
        };

        match progress.apply(decoder.push(chunk.as_ref()), sink) {
            Ok(Flow::Continue) => {}
            Ok(Flow::Terminal) => {
                tracing::debug!("received [DONE]; releasing response body");
                drop(body);
                return SessionOutcome::completed(progress.full_text);
            }
            Err(err) => return SessionOutcome::failed(progress.full_text, err),
        }
    }

    tracing::debug!("response body ended without [DONE]");
    match progress.apply(decoder.finish(), sink) {
        Ok(_) => SessionOutcome::completed(progress.full_text),
        Err(err) => SessionOutcome::failed(progress.full_text, err),
    }
}
