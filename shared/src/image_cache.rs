//! URL → decoded image, fetched through [`Network`] and decoded off the
//! async workers.
//!
//! Concurrent `get`s for the same URL share one transport request and one
//! decode when `coalesce_requests` is on. Decoded images are kept in a small
//! LRU; the encoded bytes additionally live in the transport's response
//! cache.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::io::Cursor;
use std::num::NonZeroUsize;
use std::sync::Arc;

use bytes::Bytes;
use image::{GenericImageView, ImageReader, Limits};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{oneshot, Semaphore};
use tracing::{debug, instrument, warn};

use crate::capabilities::{Dispatcher, HttpClient, HttpRequest};
use crate::network::{Network, NetworkError};
use crate::ConfigError;

pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;
pub const MAX_IMAGE_DIMENSION: u32 = 4096;
pub const MAX_IMAGE_ALLOC: u64 = 100 * 1024 * 1024;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ImageCacheError {
    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error("image data is unusable: {reason}")]
    Data { reason: String },

    #[error("image fetch ended before producing a result")]
    Interrupted,
}

impl ImageCacheError {
    fn data(reason: impl Into<String>) -> Self {
        ImageCacheError::Data {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageCacheConfig {
    pub max_input_bytes: usize,
    pub max_dimension: u32,
    pub max_alloc_bytes: u64,
    pub max_concurrent_decodes: usize,
    /// Number of decoded images kept in memory.
    pub decoded_capacity: usize,
    /// Share one fetch between concurrent requests for the same URL.
    pub coalesce_requests: bool,
}

impl Default for ImageCacheConfig {
    fn default() -> Self {
        Self {
            max_input_bytes: MAX_IMAGE_BYTES,
            max_dimension: MAX_IMAGE_DIMENSION,
            max_alloc_bytes: MAX_IMAGE_ALLOC,
            max_concurrent_decodes: 4,
            decoded_capacity: 128,
            coalesce_requests: true,
        }
    }
}

impl ImageCacheConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_input_bytes == 0 {
            return Err(ConfigError::invalid("max_input_bytes", "must be positive"));
        }
        if self.max_dimension == 0 {
            return Err(ConfigError::invalid("max_dimension", "must be positive"));
        }
        if self.max_concurrent_decodes == 0 {
            return Err(ConfigError::invalid(
                "max_concurrent_decodes",
                "must be at least 1",
            ));
        }
        if self.decoded_capacity == 0 {
            return Err(ConfigError::invalid("decoded_capacity", "must be at least 1"));
        }
        Ok(())
    }
}

/// A decoded image as RGBA8 pixels, ready to hand to a renderer.
#[derive(Clone, PartialEq, Eq)]
pub struct MediaImage {
    width: u32,
    height: u32,
    rgba: Bytes,
}

impl MediaImage {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn rgba(&self) -> &[u8] {
        &self.rgba
    }
}

impl std::fmt::Debug for MediaImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.rgba.len())
            .finish()
    }
}

pub type ImageResult = Result<Arc<MediaImage>, ImageCacheError>;

struct Inner<C> {
    network: Network<C>,
    config: ImageCacheConfig,
    decode_permits: Arc<Semaphore>,
    decoded: Mutex<LruCache<String, Arc<MediaImage>>>,
    waiters: Mutex<HashMap<String, Vec<oneshot::Sender<ImageResult>>>>,
    main: Arc<dyn Dispatcher>,
}

/// Cheap to clone; clones share the caches and the in-flight table.
pub struct ImageCache<C> {
    inner: Arc<Inner<C>>,
}

impl<C> Clone for ImageCache<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Fails every remaining waiter of a flight if the fetch task ends without
/// answering them.
struct FlightGuard<C> {
    inner: Arc<Inner<C>>,
    url: String,
}

impl<C> Drop for FlightGuard<C> {
    fn drop(&mut self) {
        if let Some(orphans) = self.inner.waiters.lock().remove(&self.url) {
            warn!(url = %self.url, waiters = orphans.len(), "image fetch abandoned");
        }
    }
}

impl<C: HttpClient> ImageCache<C> {
    /// `main` is where [`Self::fetch`] completions run.
    pub fn new<D>(network: Network<C>, config: ImageCacheConfig, main: D) -> Result<Self, ConfigError>
    where
        D: Dispatcher + 'static,
    {
        config.validate()?;
        let capacity = NonZeroUsize::new(config.decoded_capacity)
            .ok_or_else(|| ConfigError::invalid("decoded_capacity", "must be at least 1"))?;
        Ok(Self {
            inner: Arc::new(Inner {
                network,
                decode_permits: Arc::new(Semaphore::new(config.max_concurrent_decodes)),
                decoded: Mutex::new(LruCache::new(capacity)),
                waiters: Mutex::new(HashMap::new()),
                main: Arc::new(main),
                config,
            }),
        })
    }

    pub fn config(&self) -> &ImageCacheConfig {
        &self.inner.config
    }

    /// Returns the image at `url`, from memory when possible.
    #[instrument(skip(self))]
    pub async fn get(&self, url: &str) -> ImageResult {
        if let Some(image) = self.cached(url) {
            debug!("decoded image cache hit");
            return Ok(image);
        }
        if !self.inner.config.coalesce_requests {
            return load(&self.inner, url).await;
        }

        let (tx, rx) = oneshot::channel();
        let leader = match self.inner.waiters.lock().entry(url.to_string()) {
            Entry::Occupied(mut flight) => {
                flight.get_mut().push(tx);
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(vec![tx]);
                true
            }
        };

        if leader {
            let guard = FlightGuard {
                inner: Arc::clone(&self.inner),
                url: url.to_string(),
            };
            tokio::spawn(async move {
                let result = load(&guard.inner, &guard.url).await;
                let waiters = guard.inner.waiters.lock().remove(&guard.url).unwrap_or_default();
                debug!(url = %guard.url, waiters = waiters.len(), "image fetch finished");
                for waiter in waiters {
                    let _ = waiter.send(result.clone());
                }
            });
        } else {
            debug!("joined in-flight image fetch");
        }

        rx.await.unwrap_or(Err(ImageCacheError::Interrupted))
    }

    /// Like [`Self::get`], but `completion` always runs on the main
    /// dispatcher, whatever thread called this.
    pub fn fetch<F>(&self, url: impl Into<String>, completion: F)
    where
        F: FnOnce(ImageResult) + Send + 'static,
    {
        let cache = self.clone();
        let url = url.into();
        tokio::spawn(async move {
            let result = cache.get(&url).await;
            cache
                .inner
                .main
                .dispatch(Box::new(move || completion(result)));
        });
    }

    pub fn cached(&self, url: &str) -> Option<Arc<MediaImage>> {
        self.inner.decoded.lock().get(url).cloned()
    }

    /// Number of callers currently waiting on a fetch of `url`.
    pub fn waiting_on(&self, url: &str) -> usize {
        self.inner.waiters.lock().get(url).map_or(0, Vec::len)
    }

    pub fn clear(&self) {
        self.inner.decoded.lock().clear();
        if let Some(cache) = self.inner.network.cache() {
            cache.clear();
        }
    }
}

async fn load<C: HttpClient>(inner: &Inner<C>, url: &str) -> ImageResult {
    let request = HttpRequest::get(url).map_err(NetworkError::InvalidRequest)?;
    let bytes = inner.network.send_raw(&request).await?;

    let _permit = Arc::clone(&inner.decode_permits)
        .acquire_owned()
        .await
        .map_err(|_| ImageCacheError::Interrupted)?;
    let config = inner.config.clone();
    let image = tokio::task::spawn_blocking(move || decode_image(&config, &bytes))
        .await
        .map_err(|_| ImageCacheError::Interrupted)?
        .map_err(|e| {
            warn!(url, error = %e, "image decode failed");
            e
        })?;

    let image = Arc::new(image);
    inner.decoded.lock().put(url.to_string(), Arc::clone(&image));
    Ok(image)
}

fn decode_image(config: &ImageCacheConfig, raw: &[u8]) -> Result<MediaImage, ImageCacheError> {
    if raw.is_empty() {
        return Err(ImageCacheError::data("empty body"));
    }
    if raw.len() > config.max_input_bytes {
        return Err(ImageCacheError::data(format!(
            "{} bytes exceeds maximum of {}",
            raw.len(),
            config.max_input_bytes
        )));
    }

    let mut reader = ImageReader::new(Cursor::new(raw))
        .with_guessed_format()
        .map_err(|e| ImageCacheError::data(e.to_string()))?;
    if reader.format().is_none() {
        return Err(ImageCacheError::data("unsupported format"));
    }

    let mut limits = Limits::default();
    limits.max_image_width = Some(config.max_dimension);
    limits.max_image_height = Some(config.max_dimension);
    limits.max_alloc = Some(config.max_alloc_bytes);
    reader.limits(limits);

    let decoded = reader
        .decode()
        .map_err(|e| ImageCacheError::data(e.to_string()))?;
    let (width, height) = decoded.dimensions();
    Ok(MediaImage {
        width,
        height,
        rgba: Bytes::from(decoded.into_rgba8().into_raw()),
    })
}
