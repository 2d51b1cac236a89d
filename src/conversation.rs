//! Single-flight chat controller.
//!
//! `Conversation` owns the transcript, the stores and the idle/sending flag.
//! All of them sit behind one mutex that is only held between await points,
//! so a second `submit` racing the first sees `Sending` and is dropped.

use crate::client::ChatClient;
use crate::store::{CredentialStore, HistoryStore};
use crate::stream::{SessionOutcome, StreamSession, StreamSink};
use crate::transcript::{Transcript, Turn};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Sending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PreconditionError {
    #[error("no API key set")]
    MissingCredential,
    #[error("message is empty")]
    EmptyInput,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Submitted {
    /// Another exchange was in flight; nothing changed.
    Ignored,
    Finished(SessionOutcome),
}

struct State {
    phase: Phase,
    transcript: Transcript,
    history: Box<dyn HistoryStore>,
    credentials: Box<dyn CredentialStore>,
}

impl State {
    fn persist(&mut self) {
        if let Err(e) = self.history.save(self.transcript.turns()) {
            tracing::warn!(error = %format!("{e:#}"), "failed to save history");
        }
    }
}

pub struct Conversation {
    client: ChatClient,
    state: Mutex<State>,
}

impl Conversation {
    /// Build the controller and load whatever history the store has.
    pub fn new(
        client: ChatClient,
        history: Box<dyn HistoryStore>,
        credentials: Box<dyn CredentialStore>,
    ) -> Self {
        let turns = history.load().unwrap_or_else(|e| {
            tracing::warn!(error = %format!("{e:#}"), "failed to load history; starting empty");
            Vec::new()
        });
        tracing::debug!(turns = turns.len(), "loaded history");

        Self {
            client,
            state: Mutex::new(State {
                phase: Phase::Idle,
                transcript: Transcript::from_turns(turns),
                history,
                credentials,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn model(&self) -> &str {
        self.client.model()
    }

    pub fn phase(&self) -> Phase {
        self.lock().phase
    }

    pub fn transcript(&self) -> Transcript {
        self.lock().transcript.clone()
    }

    pub fn has_credential(&self) -> bool {
        matches!(self.lock().credentials.get(), Ok(Some(_)))
    }

    pub fn set_credential(&self, secret: &str) -> anyhow::Result<()> {
        self.lock().credentials.set(secret)
    }

    /// Run one exchange for `text`.
    ///
    /// The user turn is committed before the request goes out. The assistant
    /// turn is committed only when the stream completes; a failed stream
    /// leaves just the user turn behind.
    pub async fn submit(
        &self,
        text: &str,
        sink: &mut (dyn StreamSink + Send),
    ) -> Result<Submitted, PreconditionError> {
        let (credential, user_turn) = {
            let mut st = self.lock();
            if st.phase == Phase::Sending {
                tracing::debug!("submit ignored: exchange already in flight");
                return Ok(Submitted::Ignored);
            }

            let credential = match st.credentials.get() {
                Ok(Some(c)) if !c.is_empty() => c,
                Ok(_) => return Err(PreconditionError::MissingCredential),
                Err(e) => {
                    tracing::warn!(error = %format!("{e:#}"), "failed to read API key");
                    return Err(PreconditionError::MissingCredential);
                }
            };

            let text = text.trim();
            if text.is_empty() {
                return Err(PreconditionError::EmptyInput);
            }

            st.phase = Phase::Sending;
            let turn = Turn::user(text);
            st.transcript.push(turn.clone());
            st.persist();
            (credential, turn)
        };

        let flight = InFlight::new(self);
        sink.on_user_turn_appended(&user_turn);

        let outcome = StreamSession::new(self.client.clone())
            .start(&credential, &user_turn.content, sink)
            .await;

        flight.finish(&outcome);
        Ok(Submitted::Finished(outcome))
    }

    /// Clear the transcript and the history store. Refused while sending.
    pub fn new_conversation(&self) -> bool {
        let mut st = self.lock();
        if st.phase == Phase::Sending {
            tracing::debug!("new conversation ignored: exchange in flight");
            return false;
        }
        st.transcript.clear();
        if let Err(e) = st.history.clear() {
            tracing::warn!(error = %format!("{e:#}"), "failed to clear history");
        }
        true
    }
}

/// Returns the controller to `Idle` even if the submitting future is dropped
/// mid-stream.
struct InFlight<'a> {
    conv: &'a Conversation,
    armed: bool,
}

impl<'a> InFlight<'a> {
    fn new(conv: &'a Conversation) -> Self {
        Self { conv, armed: true }
    }

    fn finish(mut self, outcome: &SessionOutcome) {
        let mut st = self.conv.lock();
        if outcome.is_completed() {
            st.transcript.push(Turn::assistant(outcome.full_text.clone()));
            st.persist();
        }
        st.phase = Phase::Idle;
        self.armed = false;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.armed {
            tracing::warn!("exchange cancelled before completion");
            self.conv.lock().phase = Phase::Idle;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryCredentialStore, MemoryHistoryStore};
    use crate::stream::RecordingSink;
    use crate::transcript::Role;

    fn conversation(key: Option<&str>, history: MemoryHistoryStore) -> Conversation {
        // Port 9 (discard) is never contacted by these tests.
        let client = ChatClient::new(reqwest::Client::new(), "http://127.0.0.1:9/v1").unwrap();
        Conversation::new(
            client,
            Box::new(history),
            Box::new(MemoryCredentialStore::new(key.map(str::to_string))),
        )
    }

    #[tokio::test]
    async fn missing_credential_refuses_without_touching_transcript() {
        let conv = conversation(None, MemoryHistoryStore::default());
        let mut sink = RecordingSink::new();

        let res = conv.submit("Hello", &mut sink).await;
        assert_eq!(res, Err(PreconditionError::MissingCredential));
        assert!(conv.transcript().is_empty());
        assert_eq!(conv.phase(), Phase::Idle);
        assert!(sink.events.is_empty());
    }

    #[tokio::test]
    async fn blank_input_is_refused() {
        let conv = conversation(Some("sk"), MemoryHistoryStore::default());
        let mut sink = RecordingSink::new();

        let res = conv.submit("  \n\t ", &mut sink).await;
        assert_eq!(res, Err(PreconditionError::EmptyInput));
        assert!(conv.transcript().is_empty());
        assert_eq!(conv.phase(), Phase::Idle);
    }

    #[test]
    fn loads_existing_history() {
        let mut history = MemoryHistoryStore::default();
        history.save(&[Turn::user("q"), Turn::assistant("a")]).unwrap();
        let conv = conversation(Some("sk"), history);

        let roles: Vec<_> = conv.transcript().turns().iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant]);
    }

    #[test]
    fn new_conversation_while_idle_clears() {
        let mut history = MemoryHistoryStore::default();
        history.save(&[Turn::user("q")]).unwrap();
        let conv = conversation(Some("sk"), history);

        assert!(conv.new_conversation());
        assert!(conv.transcript().is_empty());
        assert_eq!(conv.phase(), Phase::Idle);
    }

    #[test]
    fn new_conversation_while_sending_is_noop() {
        let mut history = MemoryHistoryStore::default();
        history.save(&[Turn::user("q")]).unwrap();
        let conv = conversation(Some("sk"), history);
        conv.lock().phase = Phase::Sending;

        assert!(!conv.new_conversation());
        assert_eq!(conv.transcript().len(), 1);
        assert_eq!(conv.phase(), Phase::Sending);
    }

    #[tokio::test]
    async fn submit_while_sending_is_ignored() {
        let conv = conversation(Some("sk"), MemoryHistoryStore::default());
        conv.lock().phase = Phase::Sending;
        let mut sink = RecordingSink::new();

        let res = conv.submit("Hello", &mut sink).await;
        assert_eq!(res, Ok(Submitted::Ignored));
        assert!(conv.transcript().is_empty());
        assert_eq!(conv.phase(), Phase::Sending);
        assert!(sink.events.is_empty());
    }

    #[test]
    fn set_credential_enables_submit() {
        let conv = conversation(None, MemoryHistoryStore::default());
        assert!(!conv.has_credential());
        conv.set_credential(" sk-new ").unwrap();
        assert!(conv.has_credential());
    }
}
