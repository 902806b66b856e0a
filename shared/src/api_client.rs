//! The GitHub REST calls the app makes.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::capabilities::{
    CachePolicy, Dispatcher, HttpClient, HttpMethod, HttpRequest, ValidatedUrl,
};
use crate::model::{GitHubUser, Message};
use crate::network::{Network, NetworkError};
use crate::pagination::{Cursor, PageSource};
use crate::ConfigError;

pub const DEFAULT_USERS_URL: &str = "https://api.github.com/users";
pub const GITHUB_JSON_ACCEPT: &str = "application/vnd.github+json";

/// Remote operations the view models depend on.
#[async_trait::async_trait]
pub trait ApiClient: Send + Sync + 'static {
    /// Users with an id strictly greater than `since`, ascending by id. Empty
    /// once the listing is exhausted.
    async fn get_users(&self, since: Cursor) -> Result<Vec<GitHubUser>, NetworkError>;

    async fn send_message(&self, message: &Message) -> Result<(), NetworkError>;
}

#[async_trait::async_trait]
impl<A: ApiClient + ?Sized> ApiClient for Arc<A> {
    async fn get_users(&self, since: Cursor) -> Result<Vec<GitHubUser>, NetworkError> {
        (**self).get_users(since).await
    }

    async fn send_message(&self, message: &Message) -> Result<(), NetworkError> {
        (**self).send_message(message).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub users_url: String,
    pub accept: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            users_url: DEFAULT_USERS_URL.to_string(),
            accept: GITHUB_JSON_ACCEPT.to_string(),
        }
    }
}

impl ApiConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.users_url()?;
        if self.accept.trim().is_empty() {
            return Err(ConfigError::invalid("accept", "cannot be empty"));
        }
        Ok(())
    }

    fn users_url(&self) -> Result<ValidatedUrl, ConfigError> {
        ValidatedUrl::new(&self.users_url).map_err(|e| ConfigError::invalid("users_url", e.to_string()))
    }
}

/// [`ApiClient`] for the public GitHub REST API.
pub struct GitHubApiClient<C> {
    network: Network<C>,
    users_url: ValidatedUrl,
    accept: String,
}

impl<C> Clone for GitHubApiClient<C> {
    fn clone(&self) -> Self {
        Self {
            network: self.network.clone(),
            users_url: self.users_url.clone(),
            accept: self.accept.clone(),
        }
    }
}

impl<C: HttpClient> GitHubApiClient<C> {
    pub fn new(network: Network<C>, config: ApiConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            network,
            users_url: config.users_url()?,
            accept: config.accept,
        })
    }

    pub fn network(&self) -> &Network<C> {
        &self.network
    }

    /// `GET <users_url>?since=<cursor>`, never answered from the response cache.
    pub fn users_request(&self, since: Cursor) -> Result<HttpRequest, NetworkError> {
        HttpRequest::new(HttpMethod::Get, self.users_url.clone())
            .with_query("since", since)
            .with_cache_policy(CachePolicy::Bypass)
            .with_header("Accept", self.accept.as_str())
            .map_err(NetworkError::InvalidRequest)
    }

    /// Completion form of [`ApiClient::get_users`], delivered on `context`.
    pub fn get_users_on<D, F>(&self, since: Cursor, context: D, completion: F)
    where
        D: Dispatcher + 'static,
        F: FnOnce(Result<Vec<GitHubUser>, NetworkError>) + Send + 'static,
    {
        match self.users_request(since) {
            Ok(request) => self.network.send_typed_list_on(request, context, completion),
            Err(e) => context.dispatch(Box::new(move || completion(Err(e)))),
        }
    }
}

#[async_trait::async_trait]
impl<C: HttpClient> ApiClient for GitHubApiClient<C> {
    #[instrument(skip(self), fields(%since))]
    async fn get_users(&self, since: Cursor) -> Result<Vec<GitHubUser>, NetworkError> {
        let request = self.users_request(since)?;
        self.network.send_typed_list(&request).await
    }

    /// There is no messaging endpoint; delivery is someone else's job.
    #[instrument(skip(self, message), fields(to = %message.to))]
    async fn send_message(&self, message: &Message) -> Result<(), NetworkError> {
        debug!(len = message.text.len(), "message handed off");
        Ok(())
    }
}

#[async_trait::async_trait]
impl<C: HttpClient> PageSource for GitHubApiClient<C> {
    type Item = GitHubUser;

    async fn fetch_page(&self, cursor: Cursor) -> Result<Vec<GitHubUser>, NetworkError> {
        self.get_users(cursor).await
    }
}
