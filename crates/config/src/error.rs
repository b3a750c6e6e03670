use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid service endpoint '{raw}': {reason}")]
    Endpoint { raw: String, reason: String },
}

impl Error {
    #[must_use]
    pub fn endpoint(raw: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Endpoint {
            raw: raw.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
