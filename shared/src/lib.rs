//! Data-access core for a GitHub direct-messaging client.
//!
//! The host shell supplies an [`capabilities::HttpClient`], a
//! [`capabilities::Persisting`] store and a [`capabilities::Dispatcher`] for
//! its UI thread; everything else lives here: request classification and
//! typed decode, the paged user list, per-conversation message lists and the
//! avatar cache.

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod api_client;
pub mod app;
pub mod capabilities;
pub mod conversation;
pub mod event;
pub mod http_cache;
pub mod image_cache;
pub mod message_list;
pub mod model;
pub mod network;
pub mod pagination;
pub mod row_sync;
pub mod user_list;

#[cfg(test)]
pub(crate) mod testing;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use api_client::{ApiClient, ApiConfig, GitHubApiClient};
pub use app::{App, CoreConfig};
pub use capabilities::{
    Dispatcher, HttpClient, HttpError, Immediate, MainLoop, MainQueue, MemoryPersistence,
    PersistenceError, Persisting, TokioDispatcher,
};
pub use conversation::Conversation;
pub use event::{DeliveryBus, DeliveryEvent};
pub use image_cache::{ImageCache, ImageCacheConfig, ImageCacheError, MediaImage};
pub use message_list::MessageList;
pub use model::{GitHubUser, Message, MessageKind, UnixTimeMs, UserId};
pub use network::{Entity, Network, NetworkConfig, NetworkError};
pub use pagination::{Cursor, PageLoad, PageSource, PaginatedLoader, PaginationConfig};
pub use row_sync::RowSyncTracker;
pub use user_list::UserList;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Network,
    Timeout,
    NotFound,
    RateLimited,
    Server,
    Validation,
    Deserialization,
    ImageData,
    Storage,
    Configuration,
    Internal,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Network => "NETWORK_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::NotFound => "NOT_FOUND",
            Self::RateLimited => "RATE_LIMITED",
            Self::Server => "SERVER_ERROR",
            Self::Validation => "VALIDATION_ERROR",
            Self::Deserialization => "DESERIALIZATION_ERROR",
            Self::ImageData => "IMAGE_DATA_ERROR",
            Self::Storage => "STORAGE_ERROR",
            Self::Configuration => "CONFIG_ERROR",
            Self::Internal => "INTERNAL_ERROR",
        }
    }

    /// Whether calling again unchanged has a chance of succeeding.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Network | Self::Timeout | Self::RateLimited | Self::Server | Self::Storage
        )
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("failed to parse config: {0}")]
    Parse(String),
}

impl ConfigError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Any error the core can produce.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error(transparent)]
    Http(#[from] HttpError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Image(#[from] ImageCacheError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("no async runtime: {0}")]
    Runtime(String),
}

impl CoreError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Http(e) => http_kind(e),
            CoreError::Network(e) | CoreError::Image(ImageCacheError::Network(e)) => network_kind(e),
            CoreError::Image(ImageCacheError::Data { .. }) => ErrorKind::ImageData,
            CoreError::Image(ImageCacheError::Interrupted) => ErrorKind::Internal,
            CoreError::Persistence(_) => ErrorKind::Storage,
            CoreError::Config(_) => ErrorKind::Configuration,
            CoreError::Runtime(_) => ErrorKind::Internal,
        }
    }

    #[must_use]
    pub fn code(&self) -> &'static str {
        self.kind().code()
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

fn http_kind(error: &HttpError) -> ErrorKind {
    match error {
        HttpError::Timeout { .. } => ErrorKind::Timeout,
        HttpError::Connection { .. } | HttpError::Io { .. } | HttpError::TooManyRedirects => {
            ErrorKind::Network
        }
        HttpError::ResponseTooLarge { .. } => ErrorKind::Server,
        HttpError::InvalidUrl { .. }
        | HttpError::InvalidHeader { .. }
        | HttpError::TooManyHeaders { .. }
        | HttpError::InvalidRequest { .. } => ErrorKind::Validation,
    }
}

fn network_kind(error: &NetworkError) -> ErrorKind {
    match error {
        NetworkError::InvalidRequest(_) => ErrorKind::Validation,
        NetworkError::Transport(e) => http_kind(e),
        NetworkError::MalformedResponse | NetworkError::EmptyBody => ErrorKind::Server,
        NetworkError::Status(404) => ErrorKind::NotFound,
        NetworkError::Status(403 | 429) => ErrorKind::RateLimited,
        NetworkError::Status(code) if *code >= 500 => ErrorKind::Server,
        NetworkError::Status(_) => ErrorKind::Validation,
        NetworkError::Decode(_) => ErrorKind::Deserialization,
    }
}
