pub mod chat_api;
pub mod client;
pub mod config;
pub mod connectivity;
pub mod logging;
pub mod shell;
pub mod speech;
pub mod state;
pub mod store;

// Re-export main types for convenience
pub use chat_api::{ChatEndpoint, ChatReply, ChatRequest, HttpChatEndpoint};
pub use client::{ConversationClient, MicAction, MicState, RenderSink, SpeechSettings};
pub use config::Config;
pub use connectivity::Connectivity;
pub use shell::{CacheStorage, OfflineShell, ShellError};
pub use speech::{Capability, SpeechRecognizer, SpeechSynthesizer, Voice};
pub use state::{History, Message, Role};
pub use store::{FileStore, KeyValueStore, MemoryStore};
