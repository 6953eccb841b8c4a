//! Fetch-outcome classification.
//!
//! `classify_fetch_outcome` is total: every `(status, message, content_type,
//! html_size)` combination maps to exactly one class. Classes drive host
//! budgets and observability; they are never errors.

use serde::{Deserialize, Serialize};

/// Closed set of per-source fetch outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeClass {
    Ok,
    NotFound,
    Blocked,
    RateLimited,
    LoginWall,
    BotChallenge,
    BadContent,
    ServerError,
    NetworkTimeout,
    FetchError,
}

impl OutcomeClass {
    /// Stable wire token.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::NotFound => "not_found",
            Self::Blocked => "blocked",
            Self::RateLimited => "rate_limited",
            Self::LoginWall => "login_wall",
            Self::BotChallenge => "bot_challenge",
            Self::BadContent => "bad_content",
            Self::ServerError => "server_error",
            Self::NetworkTimeout => "network_timeout",
            Self::FetchError => "fetch_error",
        }
    }

    /// Classes that indicate the host is pushing back rather than failing.
    #[must_use]
    pub fn is_pushback(self) -> bool {
        matches!(
            self,
            Self::Blocked | Self::RateLimited | Self::LoginWall | Self::BotChallenge
        )
    }
}

/// Minimum plausible byte size for a real content page. Anything smaller is
/// treated as an interstitial.
const MIN_CONTENT_BYTES: usize = 512;

/// Classify a fetch result.
#[must_use]
pub fn classify_fetch_outcome(
    status: Option<u16>,
    message: &str,
    content_type: Option<&str>,
    html_size: usize,
) -> OutcomeClass {
    let msg = message.to_ascii_lowercase();

    if msg.contains("timeout") || msg.contains("timed out") {
        return OutcomeClass::NetworkTimeout;
    }

    let Some(status) = status else {
        return OutcomeClass::FetchError;
    };

    match status {
        429 => OutcomeClass::RateLimited,
        401 | 407 => OutcomeClass::LoginWall,
        403 => {
            if msg.contains("captcha") || msg.contains("challenge") {
                OutcomeClass::BotChallenge
            } else {
                OutcomeClass::Blocked
            }
        }
        404 | 410 => OutcomeClass::NotFound,
        500..=599 => OutcomeClass::ServerError,
        200..=299 => classify_success(&msg, content_type, html_size),
        _ => OutcomeClass::FetchError,
    }
}

fn classify_success(msg: &str, content_type: Option<&str>, html_size: usize) -> OutcomeClass {
    if msg.contains("captcha") || msg.contains("cf-challenge") || msg.contains("are you a robot") {
        return OutcomeClass::BotChallenge;
    }
    if msg.contains("login") || msg.contains("sign in") || msg.contains("signin") {
        return OutcomeClass::LoginWall;
    }

    let usable_type = content_type.is_none_or(|ct| {
        let ct = ct.to_ascii_lowercase();
        ct.contains("html") || ct.contains("json") || ct.contains("pdf") || ct.contains("xml")
    });
    if !usable_type {
        return OutcomeClass::BadContent;
    }
    if html_size < MIN_CONTENT_BYTES {
        return OutcomeClass::BadContent;
    }
    OutcomeClass::Ok
}
