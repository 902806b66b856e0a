//! Seams between the core and the host: the HTTP transport, execution
//! contexts for completions, and message storage.

mod dispatch;
mod http;
mod persistence;

#[cfg(feature = "reqwest-client")]
mod reqwest_client;

pub use self::dispatch::{Dispatcher, Immediate, Job, MainLoop, MainQueue, TokioDispatcher};
pub use self::http::{
    CachePolicy, HttpClient, HttpError, HttpHeaders, HttpMethod, HttpRequest, RawResponse,
    ValidatedUrl, DEFAULT_TIMEOUT_MS, MAX_HEADERS_COUNT, MAX_RESPONSE_BODY_SIZE, MAX_TIMEOUT_MS,
    MAX_URL_LENGTH,
};
pub use self::persistence::{MemoryPersistence, PersistenceError, Persisting};

#[cfg(feature = "reqwest-client")]
pub use self::reqwest_client::ReqwestClient;
