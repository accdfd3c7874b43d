//! Client-held session and notice queue, both stored in signed cookies.
//!
//! The server keeps no session table. A request is signed in when it carries
//! a `cms_session` cookie whose signature verifies under the app key.
//! Notices queue up in `cms_notices` until the next full page render takes
//! them.

use axum::{extract::FromRequestParts, http::request::Parts};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tower_cookies::{
    Cookie, Cookies, Key,
    cookie::{SameSite, time::Duration},
};

use crate::{state::AppState, template::PageContext};

const SESSION_COOKIE: &str = "cms_session";
const NOTICE_COOKIE: &str = "cms_notices";
/// Session lifetime.
const SESSION_TTL: Duration = Duration::hours(24);

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Info,
    Success,
    Error,
}

/// A one-shot message shown on the next rendered page.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: Level,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: Level::Info,
            message: message.into(),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: Level::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: Level::Error,
            message: message.into(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
struct SessionData {
    username: String,
    logged_in: bool,
}

/// Per-request view of the session and notice cookies.
pub struct Session {
    cookies: Cookies,
    key: Key,
}

impl FromRequestParts<AppState> for Session {
    type Rejection = <Cookies as FromRequestParts<AppState>>::Rejection;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let cookies = Cookies::from_request_parts(parts, state).await?;
        Ok(Session {
            cookies,
            key: state.cookie_key.clone(),
        })
    }
}

impl Session {
    /// The signed-in username, if any.
    pub fn username(&self) -> Option<String> {
        let cookie = self.cookies.signed(&self.key).get(SESSION_COOKIE)?;
        let data: SessionData = decode(cookie.value())?;
        data.logged_in.then_some(data.username)
    }

    pub fn sign_in(&self, username: &str) {
        let data = SessionData {
            username: username.to_string(),
            logged_in: true,
        };
        let Some(value) = encode(&data) else {
            return;
        };
        let cookie = Cookie::build((SESSION_COOKIE, value))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .max_age(SESSION_TTL)
            .build();
        self.cookies.signed(&self.key).add(cookie);
    }

    pub fn sign_out(&self) {
        self.cookies
            .signed(&self.key)
            .remove(Cookie::build(SESSION_COOKIE).path("/").build());
    }

    /// Queue a notice for the next rendered page.
    pub fn notify(&self, notice: Notice) {
        let mut pending = self.pending();
        pending.push(notice);
        let Some(value) = encode(&pending) else {
            return;
        };
        let cookie = Cookie::build((NOTICE_COOKIE, value))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .build();
        self.cookies.signed(&self.key).add(cookie);
    }

    /// Take every queued notice, clearing the queue.
    pub fn take_notices(&self) -> Vec<Notice> {
        if self.cookies.get(NOTICE_COOKIE).is_none() {
            return Vec::new();
        }
        let pending = self.pending();
        self.cookies
            .signed(&self.key)
            .remove(Cookie::build(NOTICE_COOKIE).path("/").build());
        pending
    }

    /// Context for a full page render. Takes the queued notices.
    pub fn page_context(&self) -> PageContext {
        PageContext {
            username: self.username(),
            notices: self.take_notices(),
        }
    }

    fn pending(&self) -> Vec<Notice> {
        self.cookies
            .signed(&self.key)
            .get(NOTICE_COOKIE)
            .and_then(|c| decode(c.value()))
            .unwrap_or_default()
    }
}

fn encode<T: Serialize>(value: &T) -> Option<String> {
    match serde_json::to_string(value) {
        Ok(json) => Some(URL_SAFE_NO_PAD.encode(json)),
        Err(e) => {
            tracing::error!("Cannot encode cookie payload: {}", e);
            None
        }
    }
}

/// Payloads are base64url so the value never contains `%`. Request cookies
/// are percent-decoded before the signature check, so a `%` in the signed
/// value would break verification.
fn decode<T: DeserializeOwned>(raw: &str) -> Option<T> {
    let json = URL_SAFE_NO_PAD.decode(raw).ok()?;
    serde_json::from_slice(&json).ok()
}
