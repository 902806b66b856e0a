//! An in-process stand-in for the GitHub API and its avatar host.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use dm_core::capabilities::{HttpClient, HttpError, HttpRequest, RawResponse};
use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore};

pub const USERS_URL: &str = "https://api.github.com/users";
pub const AVATAR_HOST: &str = "avatars.example.com";

pub fn users_page_url(since: i64) -> String {
    format!("{USERS_URL}?since={since}")
}

pub fn avatar_url(id: i64) -> String {
    format!("https://{AVATAR_HOST}/u/{id}")
}

struct State {
    total_users: AtomicI64,
    page_size: i64,
    seen: Mutex<Vec<String>>,
    overrides: Mutex<HashMap<String, VecDeque<Result<RawResponse, HttpError>>>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
    arrived: Notify,
}

/// Serves `GET /users?since=N` with users `N..N+page_size` (ids start at 0)
/// until `total_users` run out, and a small PNG for every avatar URL.
#[derive(Clone)]
pub struct FakeGitHub {
    state: Arc<State>,
}

impl FakeGitHub {
    pub fn new(total_users: i64, page_size: i64) -> Self {
        Self {
            state: Arc::new(State {
                total_users: AtomicI64::new(total_users),
                page_size,
                seen: Mutex::new(Vec::new()),
                overrides: Mutex::new(HashMap::new()),
                gate: Mutex::new(None),
                arrived: Notify::new(),
            }),
        }
    }

    /// The next request for `url` gets `response` instead of the normal one.
    pub fn override_once(&self, url: &str, response: Result<RawResponse, HttpError>) {
        self.state
            .overrides
            .lock()
            .entry(url.to_string())
            .or_default()
            .push_back(response);
    }

    /// New accounts get the next ids after the current last one.
    pub fn sign_up(&self, count: i64) {
        self.state.total_users.fetch_add(count, Ordering::SeqCst);
    }

    pub fn hold(&self) {
        *self.state.gate.lock() = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release(&self, requests: usize) {
        if let Some(gate) = self.state.gate.lock().as_ref() {
            gate.add_permits(requests);
        }
    }

    pub fn calls(&self) -> usize {
        self.state.seen.lock().len()
    }

    pub fn calls_to(&self, url: &str) -> usize {
        self.state.seen.lock().iter().filter(|u| *u == url).count()
    }

    pub async fn wait_for_calls(&self, count: usize) {
        loop {
            let notified = self.state.arrived.notified();
            if self.calls() >= count {
                return;
            }
            notified.await;
        }
    }

    fn users_page(&self, since: i64) -> RawResponse {
        let total = self.state.total_users.load(Ordering::SeqCst);
        let end = (since + self.state.page_size).min(total);
        let users: Vec<serde_json::Value> = (since.max(0)..end)
            .map(|id| {
                serde_json::json!({
                    "login": format!("octo{id}"),
                    "id": id,
                    "node_id": "ignored",
                    "avatar_url": avatar_url(id),
                    "html_url": format!("https://github.com/octo{id}"),
                    "site_admin": false,
                })
            })
            .collect();
        RawResponse::http(200, serde_json::Value::Array(users).to_string())
    }

    fn answer(&self, request: &HttpRequest) -> Result<RawResponse, HttpError> {
        let url = request.url().as_url();
        if url.host_str() == Some(AVATAR_HOST) {
            return Ok(RawResponse::http(200, png(8, 8)));
        }
        if url.as_str().starts_with(USERS_URL) {
            let since = url
                .query_pairs()
                .find(|(k, _)| k == "since")
                .and_then(|(_, v)| v.parse::<i64>().ok())
                .unwrap_or(0);
            return Ok(self.users_page(since));
        }
        Ok(RawResponse::http(404, r#"{"message":"Not Found"}"#))
    }
}

#[async_trait::async_trait]
impl HttpClient for FakeGitHub {
    async fn execute(&self, request: &HttpRequest) -> Result<RawResponse, HttpError> {
        let url = request.url().as_str().to_string();
        self.state.seen.lock().push(url.clone());
        self.state.arrived.notify_waiters();

        let gate = self.state.gate.lock().clone();
        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        let scripted = self
            .state
            .overrides
            .lock()
            .get_mut(&url)
            .and_then(VecDeque::pop_front);
        scripted.unwrap_or_else(|| self.answer(request))
    }
}

pub fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(width, height, image::Rgba([30, 60, 90, 255]));
    let mut out = std::io::Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png)
        .expect("encoding a PNG in memory");
    out.into_inner()
}
