//! Streaming chat client for OpenAI-compatible Chat Completions endpoints.
//!
//! [`stream`] turns a `text/event-stream` response body into text deltas;
//! [`conversation::Conversation`] runs one exchange at a time on top of it and
//! keeps the transcript.

pub mod client;
pub mod config;
pub mod conversation;
pub mod paths;
pub mod store;
pub mod stream;
pub mod transcript;

pub use client::ChatClient;
pub use conversation::{Conversation, Phase, PreconditionError, Submitted};
pub use transcript::{Role, Transcript, Turn};
