pub mod chat;
pub mod config;
pub mod constants;
pub mod llm_interaction;
pub mod markdown;
pub mod transcript;
pub mod web_server;

pub use chat::ChatSession;
pub use llm_interaction::{CompletionClient, RemoteErrorKind, RemoteServiceError};
pub use transcript::{Role, Transcript, TranscriptError, Turn};
