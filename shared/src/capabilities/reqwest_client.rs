//! [`HttpClient`] backed by `reqwest`.

use bytes::BytesMut;
use tracing::debug;

use super::http::{HttpClient, HttpError, HttpHeaders, HttpMethod, HttpRequest, RawResponse};

#[derive(Debug, Clone, Default)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps a preconfigured client, e.g. one with a proxy or custom roots.
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Delete => reqwest::Method::DELETE,
        HttpMethod::Head => reqwest::Method::HEAD,
    }
}

fn transport_error(request: &HttpRequest, e: &reqwest::Error) -> HttpError {
    if e.is_timeout() {
        HttpError::Timeout {
            timeout_ms: u64::try_from(request.timeout().as_millis()).unwrap_or(u64::MAX),
            request_id: request.request_id().to_string(),
        }
    } else if e.is_connect() {
        HttpError::Connection {
            host: request.url().host().to_string(),
            message: e.to_string(),
        }
    } else if e.is_redirect() {
        HttpError::TooManyRedirects
    } else if e.is_builder() {
        HttpError::InvalidRequest {
            reason: e.to_string(),
        }
    } else {
        HttpError::Io {
            message: e.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl HttpClient for ReqwestClient {
    async fn execute(&self, request: &HttpRequest) -> Result<RawResponse, HttpError> {
        let mut builder = self
            .client
            .request(method(request.method()), request.url().as_url().clone())
            .timeout(request.timeout());
        for (name, value) in request.headers().iter() {
            builder = builder.header(name, value);
        }

        let mut response = builder
            .send()
            .await
            .map_err(|e| transport_error(request, &e))?;

        let max = request.max_response_size();
        if let Some(declared) = response.content_length() {
            if declared > max as u64 {
                return Err(HttpError::ResponseTooLarge {
                    size: usize::try_from(declared).unwrap_or(usize::MAX),
                    max,
                });
            }
        }

        let headers: HttpHeaders = response
            .headers()
            .iter()
            .filter_map(|(name, value)| match value.to_str() {
                Ok(value) => Some((name.as_str().to_string(), value.to_string())),
                Err(_) => {
                    debug!(header = name.as_str(), "dropping non-ASCII response header");
                    None
                }
            })
            .collect();
        let status = response.status().as_u16();

        let mut body = BytesMut::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| transport_error(request, &e))?
        {
            if body.len() + chunk.len() > max {
                return Err(HttpError::ResponseTooLarge {
                    size: body.len() + chunk.len(),
                    max,
                });
            }
            body.extend_from_slice(&chunk);
        }

        Ok(RawResponse {
            status: Some(status),
            headers,
            body: Some(body.freeze()),
        })
    }
}
