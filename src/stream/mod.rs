//! Incremental decoding of a streamed chat completion.

pub mod decoder;
pub mod delta;
pub mod session;
pub mod sink;

pub use decoder::{DecodeError, Frame, FrameDecoder};
pub use delta::{extract, StreamEvent, DONE_SENTINEL};
pub use session::{drive, SessionError, SessionOutcome, SessionStatus, StreamSession};
pub use sink::{ChannelSink, RecordingSink, SinkEvent, StreamSink};
