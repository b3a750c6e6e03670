//! On-disk persistence for the session credential.

use std::{
    io::Write,
    path::{Path, PathBuf},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use {
    serde::{Deserialize, Serialize},
    tracing::{debug, warn},
};

use crate::{error::Result, session::Credential};

#[derive(Serialize, Deserialize)]
struct PersistedSession {
    credential: Credential,
    /// Unix seconds.
    expires_at: u64,
}

/// A JSON file holding one credential with an absolute expiry.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            path: path.into(),
            ttl,
        }
    }

    /// Uses the configured path, or the platform data directory.
    pub fn from_config(config: &engage_config::SessionConfig) -> Option<Self> {
        let path = config
            .path
            .clone()
            .or_else(engage_config::default_session_path)?;
        Some(Self::new(path, config.ttl()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Expired, unreadable and malformed files all yield `None`.
    pub fn load(&self) -> Option<Credential> {
        self.load_at(unix_now())
    }

    fn load_at(&self, now: u64) -> Option<Credential> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "cannot read session file");
                return None;
            },
        };
        let persisted: PersistedSession = match serde_json::from_str(&raw) {
            Ok(persisted) => persisted,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "ignoring malformed session file");
                return None;
            },
        };
        if persisted.expires_at <= now {
            debug!(path = %self.path.display(), "persisted session expired");
            if let Err(e) = self.clear() {
                warn!(error = %e, "failed to remove expired session");
            }
            return None;
        }
        Some(persisted.credential).filter(Credential::is_valid)
    }

    pub fn save(&self, credential: &Credential) -> Result<()> {
        let persisted = PersistedSession {
            credential: credential.clone(),
            expires_at: unix_now().saturating_add(self.ttl.as_secs()),
        };
        let json = serde_json::to_vec_pretty(&persisted)?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        {
            let mut file = open_private(&tmp)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), "session saved");
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(unix)]
fn open_private(path: &Path) -> std::io::Result<std::fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> std::io::Result<std::fs::File> {
    std::fs::File::create(path)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
