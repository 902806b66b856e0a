//! Request execution, response classification and typed JSON decode.
//!
//! Every request goes through [`Network`], which turns whatever the
//! [`HttpClient`] produced into either a body or a [`NetworkError`]. The
//! classification order is fixed: transport failure, then a response that is
//! not HTTP, then a non-2xx status, then a missing body. Typed calls decode the
//! body afterwards and report decode problems separately so callers can tell
//! "server unreachable" apart from "server returned the wrong shape".

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::capabilities::{
    CachePolicy, Dispatcher, HttpClient, HttpError, HttpRequest, RawResponse, DEFAULT_TIMEOUT_MS,
    MAX_RESPONSE_BODY_SIZE, MAX_TIMEOUT_MS,
};
use crate::http_cache::{ResponseCache, DEFAULT_CACHE_CAPACITY_BYTES};
use crate::ConfigError;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NetworkError {
    /// The request could not be built, e.g. a malformed URL.
    #[error("invalid request: {0}")]
    InvalidRequest(#[source] HttpError),

    /// The exchange failed below HTTP: DNS, connect, TLS, timeout, I/O.
    #[error("transport error: {0}")]
    Transport(#[source] HttpError),

    #[error("response is not an HTTP response")]
    MalformedResponse,

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("response body is empty")]
    EmptyBody,

    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl NetworkError {
    /// True for failures that never reached a server response.
    pub fn is_transport(&self) -> bool {
        matches!(self, NetworkError::Transport(_))
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            NetworkError::Status(code) => Some(*code),
            _ => None,
        }
    }
}

/// A value that can be decoded from a JSON document or an array of them.
pub trait Entity: DeserializeOwned + Send + 'static {
    fn from_json(data: &[u8]) -> Result<Self, NetworkError> {
        serde_json::from_slice(data).map_err(|e| NetworkError::Decode(e.to_string()))
    }

    fn list_from_json(data: &[u8]) -> Result<Vec<Self>, NetworkError> {
        serde_json::from_slice(data).map_err(|e| NetworkError::Decode(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Applied to requests that still carry the default timeout.
    pub timeout_ms: u64,
    /// Byte budget of the in-memory response cache; 0 disables it.
    pub cache_capacity_bytes: usize,
    pub max_response_bytes: usize,
    pub user_agent: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            cache_capacity_bytes: DEFAULT_CACHE_CAPACITY_BYTES,
            max_response_bytes: MAX_RESPONSE_BODY_SIZE,
            user_agent: concat!("dm-core/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl NetworkConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ms == 0 || self.timeout_ms > MAX_TIMEOUT_MS {
            return Err(ConfigError::invalid(
                "timeout_ms",
                format!("must be between 1 and {MAX_TIMEOUT_MS}"),
            ));
        }
        if self.max_response_bytes == 0 || self.max_response_bytes > MAX_RESPONSE_BODY_SIZE {
            return Err(ConfigError::invalid(
                "max_response_bytes",
                format!("must be between 1 and {MAX_RESPONSE_BODY_SIZE}"),
            ));
        }
        if self.user_agent.trim().is_empty() {
            return Err(ConfigError::invalid("user_agent", "cannot be empty"));
        }
        Ok(())
    }
}

struct Inner<C> {
    client: C,
    config: NetworkConfig,
    cache: Option<ResponseCache>,
}

/// Cheap to clone; clones share the client and the response cache.
pub struct Network<C> {
    inner: Arc<Inner<C>>,
}

impl<C> Clone for Network<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: HttpClient> Network<C> {
    pub fn new(client: C, config: NetworkConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let cache = (config.cache_capacity_bytes > 0)
            .then(|| ResponseCache::new(config.cache_capacity_bytes));
        Ok(Self {
            inner: Arc::new(Inner {
                client,
                config,
                cache,
            }),
        })
    }

    pub fn with_defaults(client: C) -> Self {
        let config = NetworkConfig::default();
        let cache = Some(ResponseCache::new(config.cache_capacity_bytes));
        Self {
            inner: Arc::new(Inner {
                client,
                config,
                cache,
            }),
        }
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.inner.config
    }

    pub fn cache(&self) -> Option<&ResponseCache> {
        self.inner.cache.as_ref()
    }

    /// Fetches the raw body of a successful response.
    #[instrument(
        skip(self, request),
        fields(method = request.method().as_str(), url = %request.url(), request_id = request.request_id())
    )]
    pub async fn send_raw(&self, request: &HttpRequest) -> Result<Bytes, NetworkError> {
        let cache = self.inner.cache.as_ref().filter(|_| request.is_cacheable());
        let url = request.url().as_str();

        if let Some(cache) = cache {
            if request.cache_policy() == CachePolicy::UseCache {
                if let Some(body) = cache.get(url) {
                    debug!(size = body.len(), "served from response cache");
                    return Ok(body);
                }
            }
        }

        let request = self.prepare(request)?;
        let started = Instant::now();
        let outcome = self.inner.client.execute(&request).await;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let response = match outcome {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, elapsed_ms, "request failed in transport");
                return Err(NetworkError::Transport(e));
            }
        };

        let body = classify(&response, request.max_response_size()).map_err(|e| {
            warn!(error = %e, elapsed_ms, "request rejected");
            e
        })?;

        if let Some(cache) = cache {
            cache.store(url, &response);
        }
        debug!(size = body.len(), elapsed_ms, "request succeeded");
        Ok(body)
    }

    /// Fetches and decodes a single entity.
    pub async fn send_typed<T: Entity>(&self, request: &HttpRequest) -> Result<T, NetworkError> {
        let body = self.send_raw(request).await?;
        T::from_json(&body)
    }

    /// Fetches and decodes a JSON array of entities.
    pub async fn send_typed_list<T: Entity>(
        &self,
        request: &HttpRequest,
    ) -> Result<Vec<T>, NetworkError> {
        let body = self.send_raw(request).await?;
        T::list_from_json(&body)
    }

    /// Runs [`Self::send_raw`] on the current Tokio runtime and delivers the
    /// result on `context`, exactly once.
    pub fn send_raw_on<D, F>(&self, request: HttpRequest, context: D, completion: F)
    where
        D: Dispatcher + 'static,
        F: FnOnce(Result<Bytes, NetworkError>) + Send + 'static,
    {
        let network = self.clone();
        tokio::spawn(async move {
            let result = network.send_raw(&request).await;
            context.dispatch(Box::new(move || completion(result)));
        });
    }

    pub fn send_typed_on<T, D, F>(&self, request: HttpRequest, context: D, completion: F)
    where
        T: Entity,
        D: Dispatcher + 'static,
        F: FnOnce(Result<T, NetworkError>) + Send + 'static,
    {
        let network = self.clone();
        tokio::spawn(async move {
            let result = network.send_typed::<T>(&request).await;
            context.dispatch(Box::new(move || completion(result)));
        });
    }

    pub fn send_typed_list_on<T, D, F>(&self, request: HttpRequest, context: D, completion: F)
    where
        T: Entity,
        D: Dispatcher + 'static,
        F: FnOnce(Result<Vec<T>, NetworkError>) + Send + 'static,
    {
        let network = self.clone();
        tokio::spawn(async move {
            let result = network.send_typed_list::<T>(&request).await;
            context.dispatch(Box::new(move || completion(result)));
        });
    }

    /// Applies network-wide defaults the request did not override.
    fn prepare(&self, request: &HttpRequest) -> Result<HttpRequest, NetworkError> {
        let config = &self.inner.config;
        let mut prepared = request
            .clone()
            .with_max_response_size(request.max_response_size().min(config.max_response_bytes));

        if request.headers().get("user-agent").is_none() {
            prepared = prepared
                .with_header("User-Agent", config.user_agent.as_str())
                .map_err(NetworkError::InvalidRequest)?;
        }

        if request.timeout().as_millis() == u128::from(DEFAULT_TIMEOUT_MS)
            && config.timeout_ms != DEFAULT_TIMEOUT_MS
        {
            prepared = prepared
                .with_timeout(std::time::Duration::from_millis(config.timeout_ms))
                .map_err(NetworkError::InvalidRequest)?;
        }

        Ok(prepared)
    }
}

fn classify(response: &RawResponse, max_size: usize) -> Result<Bytes, NetworkError> {
    let Some(status) = response.status else {
        return Err(NetworkError::MalformedResponse);
    };
    if !(200..300).contains(&status) {
        return Err(NetworkError::Status(status));
    }
    let body = match &response.body {
        Some(body) if !body.is_empty() => body.clone(),
        _ => return Err(NetworkError::EmptyBody),
    };
    if body.len() > max_size {
        return Err(NetworkError::Transport(HttpError::ResponseTooLarge {
            size: body.len(),
            max: max_size,
        }));
    }
    Ok(body)
}

/// Convenience for callers that hold a shared network behind a trait object.
pub type SharedNetwork = Network<Arc<dyn HttpClient>>;
