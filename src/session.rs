//! Staff sessions, one per signed-in browser.
//!
//! The store maps cookie ids to sessions and broadcasts every start and end. Handlers
//! run backend calls inside [`scoped`] so the object-storage client can pick up the
//! requesting session's token.

use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};
use uuid::Uuid;

const CHANGE_BUFFER: usize = 32;

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: Uuid,
    pub user_id: String,
    pub email: Option<String>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip)]
    access_token: String,
}

impl Session {
    pub fn new(
        user_id: impl Into<String>,
        email: Option<String>,
        access_token: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            email,
            expires_at,
            access_token: access_token.into(),
        }
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[derive(Deserialize)]
struct TokenClaims {
    exp: i64,
}

/// Read the `exp` claim of a JWT without verifying its signature.
pub fn token_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let decoded = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: TokenClaims = serde_json::from_slice(&decoded).ok()?;
    Utc.timestamp_opt(claims.exp, 0).single()
}

tokio::task_local! {
    static REQUEST_SESSION: Arc<Session>;
}

/// Run `fut` on behalf of `session`, so backend calls inside it carry that session's
/// token. Without a session the future runs unscoped.
pub async fn scoped<F: Future>(session: Option<Arc<Session>>, fut: F) -> F::Output {
    match session {
        Some(session) => REQUEST_SESSION.scope(session, fut).await,
        None => fut.await,
    }
}

/// Bearer token of the session the current request runs for.
pub fn request_token() -> Option<String> {
    REQUEST_SESSION
        .try_with(|session| session.access_token().to_string())
        .ok()
}

#[derive(Debug, Clone)]
pub enum SessionChange {
    Started(Arc<Session>),
    Ended(Arc<Session>),
}

/// Staff sessions keyed by the id carried in each browser's session cookie.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<Uuid, Arc<Session>>>>,
    changes: broadcast::Sender<SessionChange>,
}

impl SessionStore {
    pub fn new() -> Self {
        let (changes, _rx) = broadcast::channel(CHANGE_BUFFER);
        Self {
            sessions: Arc::default(),
            changes,
        }
    }

    /// Look up an unexpired session by the id carried in the session cookie.
    pub fn validate(&self, id: Uuid) -> Option<Arc<Session>> {
        self.read()
            .get(&id)
            .filter(|session| !session.is_expired_at(Utc::now()))
            .cloned()
    }

    pub fn insert(&self, session: Session) -> Arc<Session> {
        let session = Arc::new(session);
        self.prune();
        self.write().insert(session.id, session.clone());
        let _ = self.changes.send(SessionChange::Started(session.clone()));
        session
    }

    /// Drop one session, returning it so the caller can revoke it remotely.
    pub fn remove(&self, id: Uuid) -> Option<Arc<Session>> {
        let removed = self.write().remove(&id)?;
        let _ = self.changes.send(SessionChange::Ended(removed.clone()));
        Some(removed)
    }

    /// Forget sessions whose tokens have expired.
    pub fn prune(&self) -> usize {
        let now = Utc::now();
        let expired: Vec<Arc<Session>> = {
            let mut sessions = self.write();
            let ids: Vec<Uuid> = sessions
                .values()
                .filter(|session| session.is_expired_at(now))
                .map(|session| session.id)
                .collect();
            ids.iter().filter_map(|id| sessions.remove(id)).collect()
        };
        for session in &expired {
            let _ = self.changes.send(SessionChange::Ended(session.clone()));
        }
        expired.len()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionChange> {
        self.changes.subscribe()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<Uuid, Arc<Session>>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Uuid, Arc<Session>>> {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Log every sign-in and sign-out observed on the session stream.
pub fn spawn_change_logger(store: &SessionStore) {
    let mut rx = store.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(SessionChange::Started(session)) => {
                    info!(user_id = %session.user_id, session = %session.id, "staff session started")
                }
                Ok(SessionChange::Ended(session)) => {
                    info!(user_id = %session.user_id, session = %session.id, "staff session ended")
                }
                Err(RecvError::Lagged(missed)) => warn!(missed, "session change logger lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}
