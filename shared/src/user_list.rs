//! The paged user directory shown on the first screen.

use std::ops::Range;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

use crate::model::GitHubUser;
use crate::network::NetworkError;
use crate::pagination::{PageLoad, PageSource, PaginatedLoader, PaginationConfig};
use crate::row_sync::RowSyncTracker;
use crate::ConfigError;

/// Paged list of users behind a table that shows placeholder rows until
/// their data arrives.
pub struct UserList<S: PageSource<Item = GitHubUser>> {
    loader: PaginatedLoader<S>,
    rows: Mutex<RowSyncTracker>,
}

impl<S: PageSource<Item = GitHubUser>> UserList<S> {
    pub fn new(source: S, config: PaginationConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            loader: PaginatedLoader::new(source, config)?,
            rows: Mutex::new(RowSyncTracker::new()),
        })
    }

    pub fn with_defaults(source: S) -> Self {
        Self {
            loader: PaginatedLoader::with_defaults(source),
            rows: Mutex::new(RowSyncTracker::new()),
        }
    }

    /// Loads the next page. A call while one is pending is skipped.
    pub async fn load_more(&self) -> Result<PageLoad, NetworkError> {
        let load = self.loader.load_next_page().await?;
        if let PageLoad::Loaded { appended, .. } = &load {
            self.rows.lock().sync_to(appended.end);
        }
        Ok(load)
    }

    /// Rows the table should show: the capacity hint until the listing runs
    /// dry, then exactly what was loaded.
    pub fn row_count(&self) -> usize {
        let available = self.loader.len();
        if self.loader.is_exhausted() {
            available
        } else {
            available.max(self.loader.config().total_capacity_hint)
        }
    }

    pub fn available(&self) -> usize {
        self.loader.len()
    }

    /// Visible rows whose user just arrived and should be redrawn in place.
    pub fn rows_to_reload<I>(&self, visible: I) -> Vec<usize>
    where
        I: IntoIterator<Item = usize>,
    {
        self.rows.lock().claim_visible_unloaded(visible)
    }

    /// Rows appended since the last call, for tables that insert rather
    /// than reload.
    pub fn rows_to_insert(&self) -> Vec<usize> {
        self.rows.lock().claim_new_positions()
    }

    /// Whether prefetching `rows` should trigger [`Self::load_more`].
    pub fn should_prefetch(&self, rows: Range<usize>) -> bool {
        let Some(last) = rows.end.checked_sub(1) else {
            return false;
        };
        let wanted = last >= self.loader.len()
            && !self.loader.is_loading()
            && !self.loader.is_exhausted();
        if wanted {
            debug!(last, available = self.loader.len(), "prefetch needs more users");
        }
        wanted
    }

    /// `None` while the row is still a placeholder.
    pub fn user(&self, row: usize) -> Option<GitHubUser> {
        self.loader.get(row)
    }

    pub fn is_empty(&self) -> bool {
        self.loader.is_empty()
    }

    pub fn is_loading(&self) -> bool {
        self.loader.is_loading()
    }

    pub fn is_exhausted(&self) -> bool {
        self.loader.is_exhausted()
    }

    pub fn subscribe_available(&self) -> watch::Receiver<usize> {
        self.loader.subscribe_available()
    }
}
