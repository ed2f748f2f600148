//! Conversation state types
//!
//! These types don't depend on any UI framework. The history is the only
//! piece of persisted client state and is always written as a whole.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::store::KeyValueStore;

/// Key under which the serialized history lives in the store
pub const HISTORY_KEY: &str = "jarvis.conversation.v1";

/// A chat message in the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// The role of a chat message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Ordered, append-only message sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct History {
    messages: Vec<Message>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the persisted history. A missing or unreadable value starts a
    /// new conversation.
    pub fn load(store: &dyn KeyValueStore) -> Self {
        let raw = match store.get(HISTORY_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Self::new(),
            Err(e) => {
                warn!(error = %e, "could not read stored history, starting fresh");
                return Self::new();
            }
        };

        match serde_json::from_str::<Vec<Message>>(&raw) {
            Ok(messages) => Self { messages },
            Err(e) => {
                warn!(error = %e, "stored history is not valid JSON, starting fresh");
                Self::new()
            }
        }
    }

    /// Overwrite the stored history with the full sequence.
    pub fn persist(&self, store: &dyn KeyValueStore) -> Result<()> {
        let serialized = serde_json::to_string(&self.messages)?;
        store.set(HISTORY_KEY, &serialized)
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_message_wire_format() {
        let json = serde_json::to_string(&Message::assistant("hi")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"hi"}"#);
    }

    #[test]
    fn test_load_absent_is_empty() {
        let store = MemoryStore::new();
        assert!(History::load(&store).is_empty());
    }

    #[test]
    fn test_load_corrupt_is_empty() {
        let store = MemoryStore::new();
        store.set(HISTORY_KEY, "{not json").unwrap();
        assert!(History::load(&store).is_empty());
    }

    #[test]
    fn test_persist_then_load_twice_is_identical() {
        let store = MemoryStore::new();
        let mut history = History::new();
        history.push(Message::user("hello"));
        history.push(Message::assistant("hello"));
        history.push(Message::user("hello"));
        history.persist(&store).unwrap();

        let first = History::load(&store);
        let second = History::load(&store);
        assert_eq!(first, second);
        assert_eq!(first, history);
    }
}
