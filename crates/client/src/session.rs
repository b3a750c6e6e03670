//! Process-wide session state.
//!
//! The [`SessionContext`] is the only owner of the [`Credential`]. Every
//! transport re-reads it at the start of an operation and never keeps a
//! copy longer than that; the event channel follows changes through
//! [`SessionContext::subscribe`].

use std::{fmt, sync::Arc};

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
    tokio::sync::watch,
    tracing::{debug, warn},
};

use crate::store::SessionStore;

/// Identity record returned alongside the token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Bearer token plus the identity it belongs to.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credential {
    #[serde(serialize_with = "serialize_secret")]
    token: Secret<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
}

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Secret::new(token.into()),
            user: None,
        }
    }

    #[must_use]
    pub fn with_user(mut self, user: User) -> Self {
        self.user = Some(user);
        self
    }

    pub fn token(&self) -> &Secret<String> {
        &self.token
    }

    /// A stored `"null"` string counts as no token.
    pub fn is_valid(&self) -> bool {
        let token = self.token.expose_secret();
        !token.is_empty() && token != "null"
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"[REDACTED]")
            .field("user", &self.user.as_ref().map(|u| &u.email))
            .finish()
    }
}

fn serialize_secret<S: serde::Serializer>(
    secret: &Secret<String>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

/// Clonable handle over the shared credential slot.
#[derive(Clone)]
pub struct SessionContext {
    tx: Arc<watch::Sender<Option<Credential>>>,
    store: Option<Arc<SessionStore>>,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("authenticated", &self.is_authenticated())
            .field("persistent", &self.store.is_some())
            .finish()
    }
}

impl SessionContext {
    pub fn new() -> Self {
        Self::with_credential(None)
    }

    pub fn with_credential(credential: Option<Credential>) -> Self {
        let (tx, _) = watch::channel(credential);
        Self {
            tx: Arc::new(tx),
            store: None,
        }
    }

    /// Restore from `store` and write every later change back to it.
    pub fn persistent(store: SessionStore) -> Self {
        let credential = store.load();
        if credential.is_some() {
            debug!(path = %store.path().display(), "restored session");
        }
        let mut session = Self::with_credential(credential);
        session.store = Some(Arc::new(store));
        session
    }

    pub fn current_credential(&self) -> Option<Credential> {
        self.tx.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.tx.borrow().as_ref().is_some_and(Credential::is_valid)
    }

    pub fn user(&self) -> Option<User> {
        self.tx.borrow().as_ref().and_then(|c| c.user.clone())
    }

    pub fn set_credential(&self, credential: Credential) {
        self.tx.send_replace(Some(credential));
        self.persist();
    }

    /// Replace the token, keeping the user. Empty tokens are ignored.
    pub fn set_token(&self, token: impl Into<String>) {
        let token = token.into();
        if token.is_empty() {
            return;
        }
        self.tx.send_modify(|slot| match slot {
            Some(credential) => credential.token = Secret::new(token),
            None => *slot = Some(Credential::new(token)),
        });
        self.persist();
    }

    /// Attach an identity. Returns `false` when there is no credential.
    pub fn set_user(&self, user: User) -> bool {
        let changed = self.tx.send_if_modified(|slot| match slot {
            Some(credential) => {
                credential.user = Some(user);
                true
            },
            None => false,
        });
        if changed {
            self.persist();
        }
        changed
    }

    /// Drop the credential. Returns whether one was present.
    pub fn clear(&self) -> bool {
        let previous = self.tx.send_replace(None);
        if let Some(store) = &self.store
            && let Err(e) = store.clear()
        {
            warn!(error = %e, "failed to remove persisted session");
        }
        previous.is_some()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Credential>> {
        self.tx.subscribe()
    }

    fn persist(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let Some(credential) = self.current_credential() else {
            return;
        };
        if let Err(e) = store.save(&credential) {
            warn!(error = %e, "failed to persist session");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn user() -> User {
        User {
            id: "u-1".into(),
            email: "agent@example.com".into(),
            full_name: "Agent Smith".into(),
            role: Some("admin".into()),
        }
    }

    #[test]
    fn null_and_empty_tokens_are_not_authenticated() {
        let session = SessionContext::new();
        assert!(!session.is_authenticated());

        session.set_credential(Credential::new("null"));
        assert!(!session.is_authenticated());

        session.set_credential(Credential::new(""));
        assert!(!session.is_authenticated());

        session.set_credential(Credential::new("tok"));
        assert!(session.is_authenticated());
    }

    #[test]
    fn set_token_keeps_user() {
        let session = SessionContext::with_credential(Some(Credential::new("a").with_user(user())));
        session.set_token("b");
        let credential = session.current_credential().unwrap();
        assert_eq!(credential.token().expose_secret(), "b");
        assert_eq!(credential.user, Some(user()));

        session.set_token("");
        assert_eq!(
            session.current_credential().unwrap().token().expose_secret(),
            "b"
        );
    }

    #[test]
    fn set_user_requires_credential() {
        let session = SessionContext::new();
        assert!(!session.set_user(user()));
        assert!(session.user().is_none());

        session.set_token("tok");
        assert!(session.set_user(user()));
        assert_eq!(session.user().unwrap().email, "agent@example.com");
    }

    #[test]
    fn clear_reports_previous_state() {
        let session = SessionContext::with_credential(Some(Credential::new("tok")));
        assert!(session.clear());
        assert!(!session.clear());
        assert!(session.current_credential().is_none());
    }

    #[test]
    fn debug_never_prints_token() {
        let credential = Credential::new("super-secret-token").with_user(user());
        let out = format!("{credential:?}");
        assert!(!out.contains("super-secret-token"));
        assert!(out.contains("agent@example.com"));
    }

    #[tokio::test]
    async fn subscribers_see_lifecycle() {
        let session = SessionContext::new();
        let mut rx = session.subscribe();

        session.set_credential(Credential::new("tok"));
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_some());

        session.clear();
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_none());
    }

    #[test]
    fn persistent_session_round_trips_through_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        let session = SessionContext::persistent(SessionStore::new(&path, Duration::from_secs(60)));
        session.set_credential(Credential::new("tok").with_user(user()));

        let restored = SessionContext::persistent(SessionStore::new(&path, Duration::from_secs(60)));
        assert!(restored.is_authenticated());
        assert_eq!(restored.user(), Some(user()));

        restored.clear();
        assert!(!path.exists());
    }
}
