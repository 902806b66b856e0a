//! In-process doubles shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore};

use crate::capabilities::{HttpClient, HttpError, HttpRequest, RawResponse};

type Outcome = Result<RawResponse, HttpError>;

#[derive(Default)]
struct ScriptedInner {
    // The last scripted outcome for a URL keeps answering once the queue drains.
    routes: Mutex<HashMap<String, VecDeque<Outcome>>>,
    requests: Mutex<Vec<HttpRequest>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
    arrived: Notify,
}

/// Answers requests from a per-URL script and records every request it sees.
#[derive(Clone, Default)]
pub struct ScriptedClient {
    inner: Arc<ScriptedInner>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, url: &str, response: RawResponse) {
        self.push(url, Ok(response));
    }

    pub fn fail(&self, url: &str, error: HttpError) {
        self.push(url, Err(error));
    }

    fn push(&self, url: &str, outcome: Outcome) {
        self.inner
            .routes
            .lock()
            .entry(url.to_string())
            .or_default()
            .push_back(outcome);
    }

    /// Parks every later request until [`Self::release`] lets it through.
    pub fn hold(&self) {
        *self.inner.gate.lock() = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release(&self, requests: usize) {
        if let Some(gate) = self.inner.gate.lock().as_ref() {
            gate.add_permits(requests);
        }
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.inner.requests.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.inner.requests.lock().len()
    }

    pub fn calls_to(&self, url: &str) -> usize {
        self.inner
            .requests
            .lock()
            .iter()
            .filter(|r| r.url().as_str() == url)
            .count()
    }

    pub async fn wait_for_calls(&self, count: usize) {
        loop {
            let notified = self.inner.arrived.notified();
            if self.calls() >= count {
                return;
            }
            notified.await;
        }
    }

    fn next_outcome(&self, url: &str) -> Outcome {
        let mut routes = self.inner.routes.lock();
        match routes.get_mut(url) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_else(not_found),
            Some(queue) => queue.front().cloned().unwrap_or_else(not_found),
            None => not_found(),
        }
    }
}

fn not_found() -> Outcome {
    Ok(RawResponse::http(404, "not found"))
}

#[async_trait::async_trait]
impl HttpClient for ScriptedClient {
    async fn execute(&self, request: &HttpRequest) -> Result<RawResponse, HttpError> {
        self.inner.requests.lock().push(request.clone());
        self.inner.arrived.notify_waiters();

        let gate = self.inner.gate.lock().clone();
        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        self.next_outcome(request.url().as_str())
    }
}

/// A tiny solid-color PNG.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    use image::{ImageBuffer, ImageFormat, Rgba};

    let img: ImageBuffer<Rgba<u8>, Vec<u8>> =
        ImageBuffer::from_fn(width, height, |x, y| Rgba([(x % 256) as u8, (y % 256) as u8, 0, 255]));
    let mut buffer = std::io::Cursor::new(Vec::new());
    img.write_to(&mut buffer, ImageFormat::Png).unwrap();
    buffer.into_inner()
}

/// `count` users with consecutive ids starting at `first_id`, as the API returns them.
pub fn users_json(first_id: i64, count: usize) -> String {
    let users: Vec<serde_json::Value> = (0..count)
        .map(|offset| {
            let id = first_id + offset as i64;
            serde_json::json!({
                "login": format!("user{id}"),
                "id": id,
                "avatar_url": format!("https://avatars.example.com/u/{id}"),
                "html_url": format!("https://github.com/user{id}"),
            })
        })
        .collect();
    serde_json::Value::Array(users).to_string()
}
