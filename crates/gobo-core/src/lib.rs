#![deny(missing_docs)]
//! Gobo core library.
//!
//! Conversation history, multi-modal request assembly and response relay
//! shared by every chat front-end.

/// Request payload assembly from history and new input.
pub mod assembler;
/// Configuration management.
pub mod config;
/// Turns, attachments and the per-conversation history store.
pub mod conversation;
/// Model client interface and the Gemini provider.
pub mod llm;
/// Response relay state machine.
pub mod relay;
/// Chat service tying the store, assembler and relay together.
pub mod service;
/// Utility functions.
pub mod utils;

/// Test doubles for the relay and model client.
#[cfg(test)]
pub mod testing;

pub use assembler::{assemble, ContentBlock, InputError, Part, UserInput};
pub use conversation::{Attachment, ConversationStore, Role, Source, Turn, TurnPhase};
pub use relay::{PendingTurn, ResponseRelay, TurnPresenter};
pub use llm::{GeminiClient, ModelClient};
pub use service::{ChatService, Task, TaskProfile};
