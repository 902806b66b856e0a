use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{Message, UserId};

#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum PersistenceError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("stored message is corrupt: {reason}")]
    Corrupted { reason: String },
}

/// Durable message storage owned by the host app.
///
/// Implementations decide the on-disk format; the core only needs these
/// operations.
#[async_trait::async_trait]
pub trait Persisting: Send + Sync + 'static {
    /// Every message exchanged with `peer`, oldest first.
    async fn load_messages(&self, peer: UserId) -> Result<Vec<Message>, PersistenceError>;

    async fn save_message(&self, message: &Message) -> Result<(), PersistenceError>;

    async fn delete_all_messages(&self) -> Result<(), PersistenceError>;

    /// Pushes buffered writes to durable storage.
    async fn flush(&self) -> Result<(), PersistenceError> {
        Ok(())
    }
}

#[async_trait::async_trait]
impl<P: Persisting + ?Sized> Persisting for std::sync::Arc<P> {
    async fn load_messages(&self, peer: UserId) -> Result<Vec<Message>, PersistenceError> {
        (**self).load_messages(peer).await
    }

    async fn save_message(&self, message: &Message) -> Result<(), PersistenceError> {
        (**self).save_message(message).await
    }

    async fn delete_all_messages(&self) -> Result<(), PersistenceError> {
        (**self).delete_all_messages().await
    }

    async fn flush(&self) -> Result<(), PersistenceError> {
        (**self).flush().await
    }
}

/// Keeps messages in memory. Used by tests and by shells without storage.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    messages: Mutex<Vec<Message>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_messages(messages: impl IntoIterator<Item = Message>) -> Self {
        Self {
            messages: Mutex::new(messages.into_iter().collect()),
        }
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl Persisting for MemoryPersistence {
    async fn load_messages(&self, peer: UserId) -> Result<Vec<Message>, PersistenceError> {
        let mut found: Vec<Message> = self
            .messages
            .lock()
            .iter()
            .filter(|m| m.from == peer || m.to == peer)
            .cloned()
            .collect();
        found.sort_by_key(|m| m.created_at);
        Ok(found)
    }

    async fn save_message(&self, message: &Message) -> Result<(), PersistenceError> {
        self.messages.lock().push(message.clone());
        Ok(())
    }

    async fn delete_all_messages(&self) -> Result<(), PersistenceError> {
        self.messages.lock().clear();
        Ok(())
    }
}
