use super::session::SessionOutcome;
use crate::transcript::Turn;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Receiver of everything a consumer renders during one exchange.
///
/// Calls arrive in this order: `on_user_turn_appended`, at most one
/// `on_first_content`, zero or more `on_delta`, exactly one
/// `on_session_outcome`.
pub trait StreamSink {
    fn on_user_turn_appended(&mut self, _turn: &Turn) {}

    /// Fired once, right before the first non-empty delta.
    fn on_first_content(&mut self) {}

    fn on_delta(&mut self, fragment: &str);

    fn on_session_outcome(&mut self, _outcome: &SessionOutcome) {}
}

#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    UserTurn(Turn),
    FirstContent,
    Delta(String),
    Outcome(SessionOutcome),
}

/// Forwards sink callbacks over an unbounded channel so they can be consumed
/// as a stream from another task.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SinkEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<SinkEvent>) -> Self {
        Self { tx }
    }

    /// Sink plus the stream of its events. The stream ends once every clone
    /// of the sink is dropped.
    pub fn pair() -> (Self, UnboundedReceiverStream<SinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), UnboundedReceiverStream::new(rx))
    }

    fn send(&self, ev: SinkEvent) {
        // Receiver gone means nobody is rendering anymore.
        let _ = self.tx.send(ev);
    }
}

impl StreamSink for ChannelSink {
    fn on_user_turn_appended(&mut self, turn: &Turn) {
        self.send(SinkEvent::UserTurn(turn.clone()));
    }

    fn on_first_content(&mut self) {
        self.send(SinkEvent::FirstContent);
    }

    fn on_delta(&mut self, fragment: &str) {
        self.send(SinkEvent::Delta(fragment.to_string()));
    }

    fn on_session_outcome(&mut self, outcome: &SessionOutcome) {
        self.send(SinkEvent::Outcome(outcome.clone()));
    }
}

/// Records every callback; handy for tests and for callers that only want the
/// final picture.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordingSink {
    pub events: Vec<SinkEvent>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deltas(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|e| match e {
                SinkEvent::Delta(d) => Some(d.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl StreamSink for RecordingSink {
    fn on_user_turn_appended(&mut self, turn: &Turn) {
        self.events.push(SinkEvent::UserTurn(turn.clone()));
    }

    fn on_first_content(&mut self) {
        self.events.push(SinkEvent::FirstContent);
    }

    fn on_delta(&mut self, fragment: &str) {
        self.events.push(SinkEvent::Delta(fragment.to_string()));
    }

    fn on_session_outcome(&mut self, outcome: &SessionOutcome) {
        self.events.push(SinkEvent::Outcome(outcome.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn channel_sink_preserves_order_and_ends_on_drop() {
        let (mut sink, mut events) = ChannelSink::pair();
        sink.on_first_content();
        sink.on_delta("a");
        sink.on_delta("b");
        sink.on_session_outcome(&SessionOutcome::completed("ab".into()));
        drop(sink);

        let mut got = Vec::new();
        while let Some(ev) = events.next().await {
            got.push(ev);
        }
        assert_eq!(
            got,
            vec![
                SinkEvent::FirstContent,
                SinkEvent::Delta("a".into()),
                SinkEvent::Delta("b".into()),
                SinkEvent::Outcome(SessionOutcome::completed("ab".into())),
            ]
        );
    }
}
