//! Cursor-paginated loading into an append-only sequence.
//!
//! A [`PaginatedLoader`] owns the items fetched so far, the cursor for the
//! next page and an in-flight flag. At most one page request is outstanding
//! per loader: a call made while another is pending returns
//! [`PageLoad::Skipped`] without touching the source or any state.

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::network::NetworkError;
use crate::ConfigError;

/// Position in the remote resource. The next page holds items with keys at
/// or above it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(pub i64);

impl Cursor {
    pub const START: Cursor = Cursor(0);

    /// The cursor after a page whose largest key was `max_key`. Never moves back.
    #[must_use]
    pub fn advanced_past(self, max_key: i64) -> Cursor {
        Cursor(self.0.max(max_key.saturating_add(1)))
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An item that carries its own pagination key.
pub trait Paged {
    fn page_key(&self) -> i64;
}

/// Something that can hand out one page of items starting at a cursor.
#[async_trait::async_trait]
pub trait PageSource: Send + Sync + 'static {
    type Item: Paged + Clone + Send + Sync + 'static;

    async fn fetch_page(&self, cursor: Cursor) -> Result<Vec<Self::Item>, NetworkError>;
}

#[async_trait::async_trait]
impl<S: PageSource + ?Sized> PageSource for Arc<S> {
    type Item = S::Item;

    async fn fetch_page(&self, cursor: Cursor) -> Result<Vec<Self::Item>, NetworkError> {
        (**self).fetch_page(cursor).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageLoad {
    /// A page arrived. `appended` are the new positions, possibly empty.
    Loaded { appended: Range<usize>, cursor: Cursor },
    /// Another load was already in flight; nothing happened.
    Skipped,
}

impl PageLoad {
    pub fn appended(&self) -> usize {
        match self {
            PageLoad::Loaded { appended, .. } => appended.len(),
            PageLoad::Skipped => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    /// Row count shown before the real size of the resource is known.
    pub total_capacity_hint: usize,
    /// Consecutive empty pages after which the resource counts as exhausted.
    pub empty_pages_before_exhausted: u32,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            total_capacity_hint: 1000,
            empty_pages_before_exhausted: 2,
        }
    }
}

impl PaginationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.empty_pages_before_exhausted == 0 {
            return Err(ConfigError::invalid(
                "empty_pages_before_exhausted",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

struct LoaderState<T> {
    items: Vec<T>,
    cursor: Cursor,
    in_flight: bool,
    empty_streak: u32,
}

/// Clears the in-flight flag however the load ends, including when the
/// future driving it is dropped.
struct InFlightGuard<'a, T> {
    state: &'a Mutex<LoaderState<T>>,
}

impl<T> Drop for InFlightGuard<'_, T> {
    fn drop(&mut self) {
        self.state.lock().in_flight = false;
    }
}

pub struct PaginatedLoader<S: PageSource> {
    source: S,
    config: PaginationConfig,
    state: Mutex<LoaderState<S::Item>>,
    available: watch::Sender<usize>,
}

impl<S: PageSource> PaginatedLoader<S> {
    pub fn new(source: S, config: PaginationConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(source, config))
    }

    pub fn with_defaults(source: S) -> Self {
        Self::build(source, PaginationConfig::default())
    }

    fn build(source: S, config: PaginationConfig) -> Self {
        let (available, _) = watch::channel(0);
        Self {
            source,
            config,
            state: Mutex::new(LoaderState {
                items: Vec::new(),
                cursor: Cursor::START,
                in_flight: false,
                empty_streak: 0,
            }),
            available,
        }
    }

    /// Fetches the page at the current cursor and appends it.
    ///
    /// On failure the items and the cursor are left exactly as they were and
    /// the error is returned. Retrying is up to the caller.
    #[instrument(skip(self))]
    pub async fn load_next_page(&self) -> Result<PageLoad, NetworkError> {
        let cursor = {
            let mut state = self.state.lock();
            if state.in_flight {
                debug!("page load already in flight, skipping");
                return Ok(PageLoad::Skipped);
            }
            state.in_flight = true;
            state.cursor
        };
        let guard = InFlightGuard { state: &self.state };

        let page = match self.source.fetch_page(cursor).await {
            Ok(page) => page,
            Err(e) => {
                warn!(error = %e, %cursor, "page load failed");
                return Err(e);
            }
        };

        // published under the lock so the count never goes backwards
        let (appended, next, available) = {
            let mut state = self.state.lock();
            let start = state.items.len();
            match page.iter().map(Paged::page_key).max() {
                Some(max_key) => {
                    state.cursor = state.cursor.advanced_past(max_key);
                    state.empty_streak = 0;
                }
                None => state.empty_streak = state.empty_streak.saturating_add(1),
            }
            state.items.extend(page);
            let end = state.items.len();
            self.available.send_replace(end);
            (start..end, state.cursor, end)
        };
        drop(guard);

        info!(appended = appended.len(), cursor = %next, available, "page loaded");
        Ok(PageLoad::Loaded {
            appended,
            cursor: next,
        })
    }

    pub fn cursor(&self) -> Cursor {
        self.state.lock().cursor
    }

    pub fn is_loading(&self) -> bool {
        self.state.lock().in_flight
    }

    /// True once enough consecutive empty pages came back.
    pub fn is_exhausted(&self) -> bool {
        self.state.lock().empty_streak >= self.config.empty_pages_before_exhausted
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<S::Item> {
        self.state.lock().items.get(index).cloned()
    }

    /// Snapshot of every item loaded so far.
    pub fn items(&self) -> Vec<S::Item> {
        self.state.lock().items.clone()
    }

    /// Observes the number of loaded items. Starts at the current value.
    pub fn subscribe_available(&self) -> watch::Receiver<usize> {
        self.available.subscribe()
    }

    pub fn config(&self) -> &PaginationConfig {
        &self.config
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    #[derive(Clone, Debug, PartialEq)]
    struct Row(i64);

    impl Paged for Row {
        fn page_key(&self) -> i64 {
            self.0
        }
    }

    /// Answers each fetch with the next scripted page. A page is a list of
    /// key offsets from the requested cursor, so keys never fall below it.
    #[derive(Default)]
    struct OffsetSource {
        pages: Mutex<VecDeque<Result<Vec<i64>, NetworkError>>>,
        calls: AtomicUsize,
        gate: Option<Arc<Notify>>,
    }

    impl OffsetSource {
        fn new(pages: Vec<Result<Vec<i64>, NetworkError>>) -> Self {
            Self {
                pages: Mutex::new(pages.into()),
                ..Self::default()
            }
        }

        fn gated(pages: Vec<Result<Vec<i64>, NetworkError>>, gate: Arc<Notify>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::new(pages)
            }
        }
    }

    #[async_trait::async_trait]
    impl PageSource for OffsetSource {
        type Item = Row;

        async fn fetch_page(&self, cursor: Cursor) -> Result<Vec<Row>, NetworkError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            let next = self.pages.lock().pop_front().unwrap_or_else(|| Ok(Vec::new()));
            next.map(|offsets| offsets.into_iter().map(|o| Row(cursor.0 + o)).collect())
        }
    }

    #[tokio::test]
    async fn first_page_fills_sequence_and_moves_cursor() {
        let loader = PaginatedLoader::with_defaults(OffsetSource::new(vec![Ok((0..30).collect())]));
        let mut available = loader.subscribe_available();

        let load = loader.load_next_page().await.unwrap();
        assert_eq!(
            load,
            PageLoad::Loaded {
                appended: 0..30,
                cursor: Cursor(30)
            }
        );
        assert_eq!(loader.len(), 30);
        assert_eq!(loader.cursor(), Cursor(30));
        assert!(available.has_changed().unwrap());
        assert_eq!(*available.borrow_and_update(), 30);
        assert!(!loader.is_loading());
    }

    #[tokio::test]
    async fn second_call_while_pending_is_skipped() {
        let gate = Arc::new(Notify::new());
        let loader = Arc::new(PaginatedLoader::with_defaults(OffsetSource::gated(
            vec![Ok(vec![0, 1, 2])],
            gate.clone(),
        )));

        let first = tokio::spawn({
            let loader = loader.clone();
            async move { loader.load_next_page().await }
        });
        while loader.source().calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        assert!(loader.is_loading());
        assert_eq!(loader.load_next_page().await.unwrap(), PageLoad::Skipped);
        assert_eq!(loader.len(), 0);

        gate.notify_one();
        assert_eq!(first.await.unwrap().unwrap().appended(), 3);
        assert_eq!(loader.source().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failure_leaves_state_untouched_and_clears_guard() {
        let loader = PaginatedLoader::with_defaults(OffsetSource::new(vec![
            Ok(vec![0, 1]),
            Err(NetworkError::Status(500)),
            Ok(vec![0]),
        ]));
        loader.load_next_page().await.unwrap();
        let before = (loader.len(), loader.cursor());

        let err = loader.load_next_page().await.unwrap_err();
        assert_eq!(err, NetworkError::Status(500));
        assert_eq!((loader.len(), loader.cursor()), before);
        assert!(!loader.is_loading());

        // caller-driven retry goes through
        assert_eq!(loader.load_next_page().await.unwrap().appended(), 1);
        assert_eq!(loader.cursor(), Cursor(3));
    }

    #[tokio::test]
    async fn dropped_load_releases_the_guard() {
        let gate = Arc::new(Notify::new());
        let loader = PaginatedLoader::with_defaults(OffsetSource::gated(vec![], gate));

        {
            let pending = loader.load_next_page();
            tokio::pin!(pending);
            let poll = futures_poll_once(pending.as_mut()).await;
            assert!(poll.is_none());
            assert!(loader.is_loading());
        }
        assert!(!loader.is_loading());
    }

    async fn futures_poll_once<F: std::future::Future + Unpin>(fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            out = fut => Some(out),
            () = std::future::ready(()) => None,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn available_count_tracks_length_under_contention() {
        let loader = Arc::new(PaginatedLoader::with_defaults(OffsetSource::new(
            (0..200).map(|_| Ok(vec![0, 1])).collect(),
        )));
        let mut available = loader.subscribe_available();
        let watcher = tokio::spawn(async move {
            let mut last = 0;
            while available.changed().await.is_ok() {
                let now = *available.borrow_and_update();
                assert!(now >= last, "count went from {last} to {now}");
                last = now;
            }
        });

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let loader = Arc::clone(&loader);
                tokio::spawn(async move {
                    for _ in 0..100 {
                        loader.load_next_page().await.unwrap();
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.await.unwrap();
        }

        assert_eq!(*loader.subscribe_available().borrow(), loader.len());
        drop(loader);
        watcher.await.unwrap();
    }

    #[tokio::test]
    async fn empty_pages_keep_cursor_and_eventually_exhaust() {
        let loader = PaginatedLoader::with_defaults(OffsetSource::new(vec![
            Ok(vec![0, 4]),
            Ok(vec![]),
            Ok(vec![]),
        ]));
        loader.load_next_page().await.unwrap();
        assert_eq!(loader.cursor(), Cursor(5));

        let load = loader.load_next_page().await.unwrap();
        assert_eq!(
            load,
            PageLoad::Loaded {
                appended: 2..2,
                cursor: Cursor(5)
            }
        );
        assert!(!loader.is_exhausted());
        loader.load_next_page().await.unwrap();
        assert!(loader.is_exhausted());
    }

    #[test]
    fn config_rejects_zero_exhaustion_threshold() {
        let config = PaginationConfig {
            empty_pages_before_exhausted: 0,
            ..PaginationConfig::default()
        };
        assert!(PaginatedLoader::new(OffsetSource::default(), config).is_err());
    }

    #[test]
    fn cursor_never_regresses() {
        assert_eq!(Cursor(10).advanced_past(3), Cursor(10));
        assert_eq!(Cursor(10).advanced_past(10), Cursor(11));
        assert_eq!(Cursor(0).advanced_past(i64::MAX), Cursor(i64::MAX));
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn cursor_is_monotonic_across_loads(
                pages in prop::collection::vec(prop::collection::vec(0i64..50, 0..8), 1..12)
            ) {
                let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
                rt.block_on(async {
                    let loader = PaginatedLoader::with_defaults(
                        OffsetSource::new(pages.iter().cloned().map(Ok).collect()),
                    );
                    let mut previous = loader.cursor();
                    for page in &pages {
                        loader.load_next_page().await.unwrap();
                        let now = loader.cursor();
                        prop_assert!(now >= previous);
                        if !page.is_empty() {
                            prop_assert!(now > previous);
                        }
                        previous = now;
                    }
                    prop_assert_eq!(loader.len(), pages.iter().map(Vec::len).sum::<usize>());
                    Ok(())
                })?;
            }
        }
    }
}
