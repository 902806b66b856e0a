//! One open conversation with a peer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::api_client::ApiClient;
use crate::capabilities::{PersistenceError, Persisting};
use crate::event::DeliveryBus;
use crate::message_list::MessageList;
use crate::model::{GitHubUser, Message};
use crate::CoreError;

struct Inner<A, P> {
    peer: GitHubUser,
    api: A,
    persistence: P,
    messages: MessageList,
    history_loaded: AtomicBool,
}

/// Owns the message list for a peer and keeps it fed from storage, from
/// local sends and from the delivery bus.
///
/// Dropping the conversation stops listening for deliveries.
pub struct Conversation<A, P> {
    inner: Arc<Inner<A, P>>,
    listener: JoinHandle<()>,
}

impl<A: ApiClient, P: Persisting> Conversation<A, P> {
    /// Starts listening on `bus` for messages from `peer`. The listener runs
    /// on `runtime`, so this can be called from any thread.
    pub fn start(
        peer: GitHubUser,
        api: A,
        persistence: P,
        bus: &DeliveryBus,
        runtime: &Handle,
    ) -> Self {
        let mut deliveries = bus.subscribe_from(peer.id);
        let inner = Arc::new(Inner {
            peer,
            api,
            persistence,
            messages: MessageList::new(),
            history_loaded: AtomicBool::new(false),
        });

        let listener = runtime.spawn({
            let inner = Arc::clone(&inner);
            async move {
                while let Some(message) = deliveries.recv().await {
                    let row = inner.messages.append(message);
                    debug!(peer = %inner.peer.id, row, "message received");
                }
            }
        });

        Self { inner, listener }
    }

    pub fn peer(&self) -> &GitHubUser {
        &self.inner.peer
    }

    pub fn title(&self) -> String {
        self.inner.peer.display_name()
    }

    pub fn messages(&self) -> &MessageList {
        &self.inner.messages
    }

    /// Appends the stored history once. Later calls return `Ok(0)`; a failed
    /// load can be retried.
    #[instrument(skip(self), fields(peer = %self.inner.peer.id))]
    pub async fn load_messages(&self) -> Result<usize, PersistenceError> {
        if self.inner.history_loaded.swap(true, Ordering::SeqCst) {
            return Ok(0);
        }
        match self.inner.persistence.load_messages(self.inner.peer.id).await {
            Ok(history) => Ok(self.inner.messages.append_all(history).len()),
            Err(e) => {
                self.inner.history_loaded.store(false, Ordering::SeqCst);
                warn!(error = %e, "loading stored messages failed");
                Err(e)
            }
        }
    }

    /// Sends `text` to the peer. The message shows up in the list right
    /// away and stays there even if sending or saving fails. Empty text is
    /// ignored and yields `Ok(None)`.
    #[instrument(skip(self, text), fields(peer = %self.inner.peer.id))]
    pub async fn send_message(&self, text: &str) -> Result<Option<Message>, CoreError> {
        if text.is_empty() {
            return Ok(None);
        }
        let message = Message::outgoing(self.inner.peer.id, text);
        self.inner.messages.append(message.clone());

        let sent = self.inner.api.send_message(&message).await;
        let saved = self.inner.persistence.save_message(&message).await;
        if let Err(e) = &sent {
            warn!(error = %e, "sending message failed");
        }
        if let Err(e) = &saved {
            warn!(error = %e, "saving message failed");
        }
        sent?;
        saved?;
        Ok(Some(message))
    }
}

impl<A, P> Drop for Conversation<A, P> {
    fn drop(&mut self) {
        self.listener.abort();
    }
}
