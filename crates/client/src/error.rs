use {
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

/// Shown to the user when no response could be obtained at all.
pub const UNREACHABLE_MESSAGE: &str = "cannot reach server, try again later";

/// Substrings of a transport error message that indicate the server was
/// never reached.
pub const CONNECTIVITY_MARKERS: &[&str] = &[
    "fetch",
    "network",
    "ERR_",
    "ECONNREFUSED",
    "connection refused",
    "dns error",
    "timed out",
    "error sending request",
];

const DEFAULT_STATUS: u16 = 500;

/// The single failure shape returned by every gateway call.
///
/// `data` is always a JSON object with an `error` entry; `statusCode` is `0`
/// when the server could not be reached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct ApiError {
    pub data: Value,
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub message: String,
}

impl ApiError {
    pub fn new(status_code: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            data: serde_json::json!({ "error": message }),
            status_code,
            message,
        }
    }

    pub fn unreachable() -> Self {
        Self::new(0, UNREACHABLE_MESSAGE)
    }

    pub fn is_unreachable(&self) -> bool {
        self.status_code == 0
    }

    /// The `error` entry of `data`, falling back to `message`.
    pub fn error_text(&self) -> &str {
        self.data
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or(&self.message)
    }
}

/// A raw failed exchange, before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// A response arrived with a non-success status.
    Status { status: u16, body: String },
    /// No usable response. `connect` is set when the transport already knows
    /// the server was unreachable.
    Transport { message: String, connect: bool },
}

impl Failure {
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        Self::Transport {
            message: error_chain(err),
            connect: err.is_connect() || err.is_timeout(),
        }
    }
}

/// Normalize a failure. The 401 reaction happens before this, in the client.
pub fn classify(failure: Failure) -> ApiError {
    match failure {
        Failure::Status { status, body } => classify_body(status, &body),
        Failure::Transport { message, connect } => {
            if connect || looks_unreachable(&message) {
                ApiError::unreachable()
            } else if message.trim().is_empty() {
                ApiError::new(DEFAULT_STATUS, default_message(DEFAULT_STATUS))
            } else {
                ApiError::new(DEFAULT_STATUS, message)
            }
        },
    }
}

pub fn looks_unreachable(message: &str) -> bool {
    CONNECTIVITY_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
}

fn classify_body(status: u16, body: &str) -> ApiError {
    let status = if status == 0 {
        DEFAULT_STATUS
    } else {
        status
    };
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => {
            let message = match map.get("error") {
                Some(Value::String(text)) => Some(text.clone()),
                Some(Value::Null) | None => None,
                Some(other) => Some(other.to_string()),
            };
            match message {
                Some(message) => ApiError {
                    data: Value::Object(map),
                    status_code: status,
                    message,
                },
                None => {
                    let message = map
                        .get("message")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| default_message(status));
                    ApiError::new(status, message)
                },
            }
        },
        Ok(Value::String(text)) if !text.is_empty() => ApiError::new(status, text),
        Ok(_) => ApiError::new(status, default_message(status)),
        Err(_) => {
            let text = body.trim();
            if text.is_empty() {
                ApiError::new(status, default_message(status))
            } else {
                ApiError::new(status, text)
            }
        },
    }
}

fn default_message(status: u16) -> String {
    reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|code| code.canonical_reason())
        .map(|reason| format!("{status} {reason}"))
        .unwrap_or_else(|| format!("request failed with status {status}"))
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

/// Crate-level errors for everything that is not a gateway exchange.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] engage_config::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("failed to build http client: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
