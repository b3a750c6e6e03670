//! Service endpoint normalization.
//!
//! Every outbound address (REST, event channel, pairing stream) is derived
//! from one immutable [`ServiceEndpoint`]: scheme plus authority, nothing
//! else.

use std::fmt;

use url::Url;

use crate::error::{Error, Result};

/// Where the client code is running. Selects which configured base address
/// is used and whether session loss may redirect the user.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionContext {
    /// Server-side rendering / backend-to-backend calls.
    Server,
    /// Interactive client (browser, desktop or terminal front end).
    #[default]
    Client,
}

impl ExecutionContext {
    pub fn is_client(self) -> bool {
        matches!(self, Self::Client)
    }
}

/// Normalized base address of the dashboard API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    origin: String,
    secure: bool,
}

impl ServiceEndpoint {
    /// Normalize a configured base address.
    ///
    /// Trailing slashes and any path are dropped, and a base that was
    /// accidentally concatenated with itself (`http://hhttp://h`) collapses
    /// to a single origin.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(Error::endpoint(raw, "address is empty"));
        }

        let collapsed = collapse_duplicated_origin(trimmed);
        let url = Url::parse(collapsed).map_err(|e| Error::endpoint(raw, e.to_string()))?;

        let secure = match url.scheme() {
            "https" => true,
            "http" => false,
            other => {
                return Err(Error::endpoint(
                    raw,
                    format!("unsupported scheme '{other}'"),
                ));
            },
        };
        if url.host_str().is_none_or(str::is_empty) {
            return Err(Error::endpoint(raw, "missing host"));
        }

        Ok(Self {
            origin: url.origin().ascii_serialization(),
            secure,
        })
    }

    /// The normalized origin, e.g. `https://api.example.com`.
    pub fn as_str(&self) -> &str {
        &self.origin
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// Host and optional port, without scheme.
    pub fn authority(&self) -> &str {
        self.origin
            .split_once("://")
            .map_or(self.origin.as_str(), |(_, rest)| rest)
    }

    /// Full address for a relative API path.
    ///
    /// Rejects paths that already carry a scheme or this endpoint's origin,
    /// which would otherwise produce a doubled base.
    pub fn url(&self, path: &str) -> Result<String> {
        if path.contains("://") || path.starts_with(self.authority()) {
            return Err(Error::endpoint(
                path,
                "path must be relative to the service endpoint",
            ));
        }
        if path.starts_with('/') {
            Ok(format!("{}{path}", self.origin))
        } else {
            Ok(format!("{}/{path}", self.origin))
        }
    }

    /// Event channel address: `ws(s)://<authority><path>?token=<token>`.
    pub fn ws_url(&self, path: &str, token: &str) -> Result<Url> {
        let scheme = if self.secure {
            "wss"
        } else {
            "ws"
        };
        let path = path.strip_prefix('/').unwrap_or(path);
        let mut url = Url::parse(&format!("{scheme}://{}/{path}", self.authority()))
            .map_err(|e| Error::endpoint(path, e.to_string()))?;
        url.query_pairs_mut().append_pair("token", token);
        Ok(url)
    }
}

impl fmt::Display for ServiceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.origin)
    }
}

/// `http://a:1http://a:1/x` → `http://a:1/x`.
fn collapse_duplicated_origin(raw: &str) -> &str {
    for marker in ["https://", "http://"] {
        let Some((pos, _)) = raw.match_indices(marker).find(|(idx, _)| *idx > 0) else {
            continue;
        };
        let head = &raw[..pos];
        if raw[pos..].starts_with(head) {
            return &raw[pos..];
        }
    }
    raw
}

/// Replace the token query value so channel addresses can be logged.
pub fn redact_token(url: &Url) -> String {
    let mut redacted = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            if k == "token" {
                (k.into_owned(), "***".to_string())
            } else {
                (k.into_owned(), v.into_owned())
            }
        })
        .collect();
    if pairs.is_empty() {
        return redacted.to_string();
    }
    redacted.query_pairs_mut().clear().extend_pairs(pairs);
    redacted.to_string()
}
