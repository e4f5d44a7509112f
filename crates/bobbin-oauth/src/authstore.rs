//! Persistence for sessions and in-flight authorizations.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use bobbin_common::session::{SecureStore, SessionStoreError};
use bobbin_common::types::Did;
use dashmap::DashMap;
use smol_str::{SmolStr, format_smolstr};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::session::{AuthRequestContext, OAuthSession};

/// Key under which the most recently saved account DID is kept.
///
/// Holds no secrets, so platforms may keep it outside the encrypted store.
pub const LAST_DID_KEY: &str = "last-did";

fn session_key(sub: &Did) -> SmolStr {
    format_smolstr!("session:{}", sub)
}

/// Why a session record went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteCause {
    /// The user signed out
    Revoked,
    /// The authorization server refused to refresh the tokens
    RefreshFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Updated(OAuthSession),
    Deleted { sub: Did, cause: DeleteCause },
}

impl SessionEvent {
    pub fn sub(&self) -> &Did {
        match self {
            Self::Updated(session) => &session.sub,
            Self::Deleted { sub, .. } => sub,
        }
    }
}

/// Subscription handle returned by [`SessionStore::subscribe`].
///
/// Events arrive in the order they were emitted. Dropping the handle
/// unsubscribes.
#[derive(Debug)]
pub struct SessionEvents(mpsc::UnboundedReceiver<SessionEvent>);

impl SessionEvents {
    /// Wait for the next event. Returns `None` once the store is gone.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.0.recv().await
    }

    /// Next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        self.0.try_recv().ok()
    }
}

/// Session records on top of a [`SecureStore`], one record per account.
pub struct SessionStore<S> {
    store: S,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<SessionEvent>>>,
}

impl<S: SecureStore> SessionStore<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn inner(&self) -> &S {
        &self.store
    }

    pub fn subscribe(&self) -> SessionEvents {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        SessionEvents(rx)
    }

    fn emit(&self, event: SessionEvent) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub async fn get(&self, sub: &Did) -> Result<Option<OAuthSession>, SessionStoreError> {
        let Some(bytes) = self.store.get(&session_key(sub)).await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Write `session`, point [`LAST_DID_KEY`] at it, and emit
    /// [`SessionEvent::Updated`].
    pub async fn save(&self, session: &OAuthSession) -> Result<(), SessionStoreError> {
        let bytes = serde_json::to_vec(session)?;
        self.store.set(&session_key(&session.sub), bytes).await?;
        self.store
            .set(LAST_DID_KEY, session.sub.as_str().as_bytes().to_vec())
            .await?;
        self.emit(SessionEvent::Updated(session.clone()));
        Ok(())
    }

    /// Remove the record for `sub`. Emits [`SessionEvent::Deleted`] and
    /// returns `true` only if there was one.
    ///
    /// [`LAST_DID_KEY`] is cleared if it points at `sub` or no longer decodes.
    pub async fn delete(&self, sub: &Did, cause: DeleteCause) -> Result<bool, SessionStoreError> {
        let key = session_key(sub);
        let existed = self.store.get(&key).await?.is_some();
        self.store.delete(&key).await?;
        let clear_pointer = match self.last_did().await {
            Ok(last) => last.as_ref() == Some(sub),
            Err(SessionStoreError::Corrupt(_)) => true,
            Err(e) => return Err(e),
        };
        if clear_pointer {
            self.store.delete(LAST_DID_KEY).await?;
        }
        if existed {
            self.emit(SessionEvent::Deleted {
                sub: sub.clone(),
                cause,
            });
        }
        Ok(existed)
    }

    pub async fn last_did(&self) -> Result<Option<Did>, SessionStoreError> {
        let Some(bytes) = self.store.get(LAST_DID_KEY).await? else {
            return Ok(None);
        };
        let did = std::str::from_utf8(&bytes)
            .ok()
            .and_then(|s| Did::new(s).ok())
            .ok_or_else(|| SessionStoreError::Corrupt(LAST_DID_KEY.into()))?;
        Ok(Some(did))
    }
}

/// In-memory table of authorizations waiting for their redirect, keyed by `state`.
#[derive(Debug)]
pub struct PendingRequests {
    entries: DashMap<SmolStr, (AuthRequestContext, Instant)>,
    ttl: Duration,
}

impl PendingRequests {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn insert(&self, context: AuthRequestContext) {
        self.purge_expired();
        let now = Instant::now();
        let expires_at = now.checked_add(self.ttl).unwrap_or(now);
        self.entries
            .insert(context.state.clone(), (context, expires_at));
    }

    /// Remove and return the context for `state`, unless it has expired.
    pub fn take(&self, state: &str) -> Option<AuthRequestContext> {
        let (_, (context, expires_at)) = self.entries.remove(state)?;
        (Instant::now() < expires_at).then_some(context)
    }

    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, (_, expires_at)| now < *expires_at);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
