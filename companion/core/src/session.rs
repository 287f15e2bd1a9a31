//! Session Store
//!
//! Holds the authenticated identity and its bearer credential for everything
//! else in the crate. There is no process-wide session: a [`SessionStore`] is
//! constructed explicitly and handed to the components that need it (the REST
//! client reads the credential from it, the connection manager follows its
//! state).
//!
//! # Lifecycle
//!
//! ```text
//! Anonymous ──login/establish──► Authenticated ──logout──► Anonymous
//!                                     │
//!                                     └──invalidate (401)──► Invalid
//! ```
//!
//! A re-login replaces the identity in place. Credential expiry is never
//! checked locally; the server decides, and a rejected credential moves the
//! store to `Invalid`.
//!
//! # Persistence
//!
//! A store created with [`SessionStore::with_persistence`] or
//! [`SessionStore::restore`] mirrors the identity to a JSON file so the next
//! start resumes the session. Persistence is best-effort: a failed write is
//! logged, and a corrupt file reads as "no session".

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;

use crate::api::{ApiError, AuthApi};
use crate::messages::UserId;

/// Bearer credential
///
/// Never printed: `Debug` is redacted.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    /// Wrap a bearer token
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw token, for building the `Authorization` header
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// `Authorization` header value
    #[must_use]
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// The authenticated identity
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Identity id
    pub user_id: UserId,
    /// Display name
    pub display_name: String,
    /// Email address
    #[serde(default)]
    pub email: Option<String>,
    /// Avatar reference
    #[serde(default)]
    pub avatar: Option<String>,
    /// Whether onboarding is complete
    #[serde(default)]
    pub profile_complete: bool,
    /// Bearer credential
    pub token: Credential,
}

/// Session state
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Nobody logged in
    #[default]
    Anonymous,
    /// Logged in
    Authenticated(Identity),
    /// The server rejected the credential; a new login is required
    Invalid,
}

impl SessionState {
    /// Identity, if authenticated
    #[must_use]
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Self::Authenticated(identity) => Some(identity),
            _ => None,
        }
    }
}

/// Errors from session persistence
#[derive(Debug, Error)]
pub enum SessionError {
    /// Reading or writing the session file failed
    #[error("session file {path}: {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The session file is not valid JSON
    #[error("session file {path} is corrupt: {source}")]
    Decode {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },

    /// Serializing the identity failed
    #[error("cannot serialize session: {0}")]
    Encode(#[source] serde_json::Error),
}

struct Inner {
    state: watch::Sender<SessionState>,
    path: Option<PathBuf>,
}

/// Shared, observable session
///
/// Cheap to clone; all clones see the same state.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<Inner>,
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore")
            .field("state", &*self.inner.state.borrow())
            .field("path", &self.inner.path)
            .finish()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    /// Anonymous store without persistence
    #[must_use]
    pub fn new() -> Self {
        Self::build(SessionState::Anonymous, None)
    }

    /// Anonymous store that persists to `path` once a session is established
    #[must_use]
    pub fn with_persistence(path: impl Into<PathBuf>) -> Self {
        Self::build(SessionState::Anonymous, Some(path.into()))
    }

    fn build(state: SessionState, path: Option<PathBuf>) -> Self {
        let (tx, _rx) = watch::channel(state);
        Self {
            inner: Arc::new(Inner { state: tx, path }),
        }
    }

    /// Resume the session saved at `path`, if any
    ///
    /// A missing file yields an anonymous store. An unreadable or corrupt file
    /// is logged and also yields an anonymous store.
    pub async fn restore(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match read_identity(&path).await {
            Ok(Some(identity)) => {
                tracing::info!(user_id = %identity.user_id, "Restored session");
                SessionState::Authenticated(identity)
            }
            Ok(None) => SessionState::Anonymous,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring saved session");
                SessionState::Anonymous
            }
        };
        Self::build(state, Some(path))
    }

    /// Install `identity` as the current session, replacing any previous one
    pub async fn establish(&self, identity: Identity) {
        tracing::info!(user_id = %identity.user_id, "Session established");
        self.inner
            .state
            .send_replace(SessionState::Authenticated(identity));
        if let Err(e) = self.persist().await {
            tracing::warn!(error = %e, "Failed to persist session");
        }
    }

    /// Log in: issue the credential, fetch the profile with it, and establish
    /// the merged identity
    pub async fn login(
        &self,
        api: &dyn AuthApi,
        email: &str,
        password: &str,
    ) -> Result<Identity, ApiError> {
        let grant = api.login(email, password).await?;
        let profile = api.profile(&grant.token).await?;

        let identity = Identity {
            user_id: grant.user_id,
            display_name: profile
                .display_name
                .or(grant.display_name)
                .unwrap_or_default(),
            email: profile.email.or(grant.email),
            avatar: profile.avatar,
            profile_complete: profile.profile_complete,
            token: grant.token,
        };

        self.establish(identity.clone()).await;
        Ok(identity)
    }

    /// End the session and forget the saved copy
    pub async fn logout(&self) {
        let previous = self.inner.state.send_replace(SessionState::Anonymous);
        if let Some(identity) = previous.identity() {
            tracing::info!(user_id = %identity.user_id, "Logged out");
        }
        self.forget().await;
    }

    /// Mark the session as rejected by the server
    ///
    /// Observers see `SessionState::Invalid`; the saved copy is removed so the
    /// next start does not resume a dead credential.
    pub async fn invalidate(&self) {
        let was_invalid = matches!(*self.inner.state.borrow(), SessionState::Invalid);
        if was_invalid {
            return;
        }
        tracing::warn!("Session rejected by server");
        self.inner.state.send_replace(SessionState::Invalid);
        self.forget().await;
    }

    /// Write the current identity to the session file
    ///
    /// No-op without persistence or without an identity.
    pub async fn persist(&self) -> Result<(), SessionError> {
        let Some(path) = self.inner.path.as_ref() else {
            return Ok(());
        };
        let Some(identity) = self.current() else {
            return Ok(());
        };

        let json = serde_json::to_vec_pretty(&identity).map_err(SessionError::Encode)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| SessionError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        tokio::fs::write(path, json)
            .await
            .map_err(|source| SessionError::Io {
                path: path.clone(),
                source,
            })?;
        Ok(())
    }

    async fn forget(&self) {
        let Some(path) = self.inner.path.as_ref() else {
            return;
        };
        match tokio::fs::remove_file(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove session file"),
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    /// Current identity, if authenticated
    #[must_use]
    pub fn current(&self) -> Option<Identity> {
        self.inner.state.borrow().identity().cloned()
    }

    /// Current bearer credential, if authenticated
    #[must_use]
    pub fn token(&self) -> Option<Credential> {
        self.inner
            .state
            .borrow()
            .identity()
            .map(|identity| identity.token.clone())
    }

    /// Observe state changes
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Session file, if persistent
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }
}

async fn read_identity(path: &Path) -> Result<Option<Identity>, SessionError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(SessionError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| SessionError::Decode {
            path: path.to_path_buf(),
            source,
        })
}
