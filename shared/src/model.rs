use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

use crate::network::Entity;
use crate::pagination::Paged;

/// Remote user identifier. Also the pagination key of the user list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl UserId {
    /// The user running this app. Outgoing messages are sent from here.
    pub const LOCAL: UserId = UserId(0);
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Explicit timestamp unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnixTimeMs(pub u64);

impl UnixTimeMs {
    pub fn now() -> Self {
        Self(
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
                .unwrap_or_default(),
        )
    }
}

/// A GitHub account as returned by `GET /users`.
///
/// Field names on the wire are fixed by the API; the Rust names are ours.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitHubUser {
    pub id: UserId,
    #[serde(rename = "login")]
    pub username: String,
    pub avatar_url: Url,
    pub html_url: Url,
}

impl GitHubUser {
    pub fn new(id: i64, username: impl Into<String>, avatar_url: Url, html_url: Url) -> Self {
        Self {
            id: UserId(id),
            username: username.into(),
            avatar_url,
            html_url,
        }
    }

    /// `@login`, the way lists and titles show it.
    pub fn display_name(&self) -> String {
        format!("@{}", self.username)
    }
}

impl Entity for GitHubUser {}

impl Paged for GitHubUser {
    fn page_key(&self) -> i64 {
        self.id.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Sent,
    Received,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Sent => f.write_str("sent"),
            MessageKind::Received => f.write_str("received"),
        }
    }
}

/// A direct message between the local user and a peer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub created_at: UnixTimeMs,
    pub from: UserId,
    pub to: UserId,
    pub text: String,
    pub kind: MessageKind,
}

impl Message {
    /// An outgoing message from the local user to `to`, stamped now.
    pub fn outgoing(to: UserId, text: impl Into<String>) -> Self {
        Self {
            created_at: UnixTimeMs::now(),
            from: UserId::LOCAL,
            to,
            text: text.into(),
            kind: MessageKind::Sent,
        }
    }

    /// The peer on the other side of this message, from the local user's view.
    pub fn peer(&self) -> UserId {
        match self.kind {
            MessageKind::Sent => self.to,
            MessageKind::Received => self.from,
        }
    }
}

impl Entity for Message {}
