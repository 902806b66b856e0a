use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub const MAX_URL_LENGTH: usize = 2048;
pub const MAX_RESPONSE_BODY_SIZE: usize = 50 * 1024 * 1024;
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const MAX_TIMEOUT_MS: u64 = 300_000;
pub const MAX_HEADER_NAME_LENGTH: usize = 256;
pub const MAX_HEADER_VALUE_LENGTH: usize = 8192;
pub const MAX_HEADERS_COUNT: usize = 100;

/// An absolute http(s) URL that passed validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidatedUrl {
    url: Url,
}

impl ValidatedUrl {
    pub fn new(url: impl AsRef<str>) -> Result<Self, HttpError> {
        let raw = url.as_ref();

        if raw.trim().is_empty() {
            return Err(HttpError::InvalidUrl {
                url: raw.to_string(),
                reason: "URL cannot be empty".to_string(),
            });
        }

        if raw.len() > MAX_URL_LENGTH {
            return Err(HttpError::InvalidUrl {
                url: truncate_url(raw),
                reason: format!("URL exceeds maximum length of {MAX_URL_LENGTH} bytes"),
            });
        }

        let parsed = Url::parse(raw).map_err(|e| HttpError::InvalidUrl {
            url: truncate_url(raw),
            reason: e.to_string(),
        })?;

        Self::from_url(parsed)
    }

    pub fn from_url(url: Url) -> Result<Self, HttpError> {
        let scheme = url.scheme();
        if scheme != "http" && scheme != "https" {
            return Err(HttpError::InvalidUrl {
                url: truncate_url(url.as_str()),
                reason: format!("invalid scheme '{scheme}', only 'http' and 'https' are allowed"),
            });
        }

        if url.host_str().is_none() {
            return Err(HttpError::InvalidUrl {
                url: truncate_url(url.as_str()),
                reason: "URL must have a host".to_string(),
            });
        }

        if !url.username().is_empty() || url.password().is_some() {
            return Err(HttpError::InvalidUrl {
                url: truncate_url(url.as_str()),
                reason: "credentials in URL are not allowed".to_string(),
            });
        }

        Ok(Self { url })
    }

    /// Returns a copy with `name=value` appended to the query string.
    #[must_use]
    pub fn with_query(&self, name: &str, value: &str) -> Self {
        let mut url = self.url.clone();
        url.query_pairs_mut().append_pair(name, value);
        Self { url }
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    pub fn as_url(&self) -> &Url {
        &self.url
    }

    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }
}

impl std::fmt::Display for ValidatedUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.url.as_str())
    }
}

fn truncate_url(url: &str) -> String {
    if url.len() <= 100 {
        url.to_string()
    } else {
        let cut = (0..=100).rev().find(|i| url.is_char_boundary(*i)).unwrap_or(0);
        format!("{}...", &url[..cut])
    }
}

/// Ordered header list with case-insensitive lookup; inserting a name replaces it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpHeaders {
    headers: Vec<(String, String)>,
}

impl HttpHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), HttpError> {
        let name = name.into();
        let value = value.into();

        validate_header_name(&name)?;
        validate_header_value(&name, &value)?;

        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        if self.headers.len() >= MAX_HEADERS_COUNT {
            return Err(HttpError::TooManyHeaders {
                count: self.headers.len() + 1,
                max: MAX_HEADERS_COUNT,
            });
        }
        self.headers.push((name, value));

        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

impl FromIterator<(String, String)> for HttpHeaders {
    /// Builds a header list from a response without validation; transports hand
    /// over whatever the server sent.
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            headers: iter.into_iter().collect(),
        }
    }
}

fn validate_header_name(name: &str) -> Result<(), HttpError> {
    if name.is_empty() {
        return Err(HttpError::InvalidHeader {
            name: String::new(),
            reason: "header name cannot be empty".to_string(),
        });
    }

    if name.len() > MAX_HEADER_NAME_LENGTH {
        return Err(HttpError::InvalidHeader {
            name: name.chars().take(50).collect::<String>() + "...",
            reason: format!("header name exceeds maximum length of {MAX_HEADER_NAME_LENGTH} bytes"),
        });
    }

    if let Some(c) = name
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && *c != '-' && *c != '_')
    {
        return Err(HttpError::InvalidHeader {
            name: name.to_string(),
            reason: format!("invalid character '{c}' in header name"),
        });
    }

    if ["host", "content-length", "transfer-encoding"]
        .iter()
        .any(|reserved| name.eq_ignore_ascii_case(reserved))
    {
        return Err(HttpError::InvalidHeader {
            name: name.to_string(),
            reason: "this header is managed by the transport".to_string(),
        });
    }

    Ok(())
}

fn validate_header_value(name: &str, value: &str) -> Result<(), HttpError> {
    if value.len() > MAX_HEADER_VALUE_LENGTH {
        return Err(HttpError::InvalidHeader {
            name: name.to_string(),
            reason: format!(
                "header value exceeds maximum length of {MAX_HEADER_VALUE_LENGTH} bytes"
            ),
        });
    }

    if value.contains(['\r', '\n', '\0']) {
        return Err(HttpError::InvalidHeader {
            name: name.to_string(),
            reason: "header value contains CR, LF or NUL".to_string(),
        });
    }

    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
        }
    }
}

/// How a request interacts with the transport-level response cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CachePolicy {
    /// GET responses are served from and stored into the cache.
    #[default]
    UseCache,
    /// Always hit the network; the fresh response still refreshes the cache.
    ReloadIgnoringCache,
    /// Neither read nor write the cache.
    Bypass,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    method: HttpMethod,
    url: ValidatedUrl,
    headers: HttpHeaders,
    timeout_ms: u64,
    cache_policy: CachePolicy,
    request_id: String,
    max_response_size: usize,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: ValidatedUrl) -> Self {
        Self {
            method,
            url,
            headers: HttpHeaders::new(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            cache_policy: CachePolicy::default(),
            request_id: uuid::Uuid::new_v4().to_string(),
            max_response_size: MAX_RESPONSE_BODY_SIZE,
        }
    }

    pub fn get(url: impl AsRef<str>) -> Result<Self, HttpError> {
        Ok(Self::new(HttpMethod::Get, ValidatedUrl::new(url)?))
    }

    pub fn with_header(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Self, HttpError> {
        self.headers.insert(name, value)?;
        Ok(self)
    }

    pub fn with_query(mut self, name: &str, value: impl ToString) -> Self {
        self.url = self.url.with_query(name, &value.to_string());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, HttpError> {
        let ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        if ms == 0 || ms > MAX_TIMEOUT_MS {
            return Err(HttpError::InvalidRequest {
                reason: format!("timeout must be between 1 and {MAX_TIMEOUT_MS}ms"),
            });
        }
        self.timeout_ms = ms;
        Ok(self)
    }

    #[must_use]
    pub fn with_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = policy;
        self
    }

    #[must_use]
    pub fn with_max_response_size(mut self, max_bytes: usize) -> Self {
        self.max_response_size = max_bytes.min(MAX_RESPONSE_BODY_SIZE);
        self
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn url(&self) -> &ValidatedUrl {
        &self.url
    }

    pub fn headers(&self) -> &HttpHeaders {
        &self.headers
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn cache_policy(&self) -> CachePolicy {
        self.cache_policy
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn max_response_size(&self) -> usize {
        self.max_response_size
    }

    /// Only GETs are eligible for the response cache.
    pub fn is_cacheable(&self) -> bool {
        self.method == HttpMethod::Get && self.cache_policy != CachePolicy::Bypass
    }
}

/// What came back from the wire, before any classification.
///
/// `status` is `None` when the peer answered with something that is not an
/// HTTP response. `body` is `None` when no payload was delivered at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: Option<u16>,
    pub headers: HttpHeaders,
    pub body: Option<Bytes>,
}

impl RawResponse {
    pub fn http(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status: Some(status),
            headers: HttpHeaders::new(),
            body: Some(body.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_some_and(|s| (200..300).contains(&s))
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum HttpError {
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid header '{name}': {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("too many headers: {count} exceeds maximum of {max}")]
    TooManyHeaders { count: usize, max: usize },

    #[error("response body too large: {size} bytes exceeds maximum of {max} bytes")]
    ResponseTooLarge { size: usize, max: usize },

    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("connection failed to {host}: {message}")]
    Connection { host: String, message: String },

    #[error("timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64, request_id: String },

    #[error("too many redirects")]
    TooManyRedirects,

    #[error("I/O error: {message}")]
    Io { message: String },
}

/// The raw network seam. Implementations perform exactly one exchange and
/// never interpret the status code.
#[async_trait::async_trait]
pub trait HttpClient: Send + Sync + 'static {
    async fn execute(&self, request: &HttpRequest) -> Result<RawResponse, HttpError>;
}

#[async_trait::async_trait]
impl<C: HttpClient + ?Sized> HttpClient for std::sync::Arc<C> {
    async fn execute(&self, request: &HttpRequest) -> Result<RawResponse, HttpError> {
        (**self).execute(request).await
    }
}
