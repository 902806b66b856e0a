//! Wires the pieces together for a host shell.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tracing::info;

use crate::api_client::{ApiConfig, GitHubApiClient};
use crate::capabilities::{Dispatcher, HttpClient, Persisting};
use crate::conversation::Conversation;
use crate::event::DeliveryBus;
use crate::image_cache::{ImageCache, ImageCacheConfig};
use crate::model::GitHubUser;
use crate::network::{Network, NetworkConfig};
use crate::pagination::PaginationConfig;
use crate::user_list::UserList;
use crate::{ConfigError, CoreError};

/// Every tunable of the core. Missing sections fall back to their defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub network: NetworkConfig,
    pub api: ApiConfig,
    pub pagination: PaginationConfig,
    pub images: ImageCacheConfig,
}

impl CoreConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.network.validate()?;
        self.api.validate()?;
        self.pagination.validate()?;
        self.images.validate()
    }
}

pub type SharedPersistence = Arc<dyn Persisting>;

pub struct App<C: HttpClient> {
    api: GitHubApiClient<C>,
    users: UserList<GitHubApiClient<C>>,
    images: ImageCache<C>,
    bus: DeliveryBus,
    persistence: SharedPersistence,
    runtime: Handle,
}

impl<C: HttpClient> App<C> {
    /// `main` is where image completions are delivered. Background work runs
    /// on the Tokio runtime this is called from; without one it fails with
    /// [`CoreError::Runtime`].
    pub fn new<D>(
        client: C,
        persistence: SharedPersistence,
        main: D,
        config: CoreConfig,
    ) -> Result<Self, CoreError>
    where
        D: Dispatcher + 'static,
    {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|e| CoreError::Runtime(e.to_string()))?;
        let network = Network::new(client, config.network)?;
        let api = GitHubApiClient::new(network.clone(), config.api)?;
        let users = UserList::new(api.clone(), config.pagination)?;
        let images = ImageCache::new(network, config.images, main)?;
        info!("core ready");
        Ok(Self {
            api,
            users,
            images,
            bus: DeliveryBus::default(),
            persistence,
            runtime,
        })
    }

    pub fn users(&self) -> &UserList<GitHubApiClient<C>> {
        &self.users
    }

    pub fn images(&self) -> &ImageCache<C> {
        &self.images
    }

    /// Where the host publishes messages it receives.
    pub fn bus(&self) -> &DeliveryBus {
        &self.bus
    }

    /// Can be called from any thread, including one outside the runtime.
    pub fn open_conversation(
        &self,
        peer: GitHubUser,
    ) -> Conversation<GitHubApiClient<C>, SharedPersistence> {
        Conversation::start(
            peer,
            self.api.clone(),
            Arc::clone(&self.persistence),
            &self.bus,
            &self.runtime,
        )
    }

    pub async fn delete_all_messages(&self) -> Result<(), CoreError> {
        self.persistence.delete_all_messages().await?;
        Ok(())
    }
}
