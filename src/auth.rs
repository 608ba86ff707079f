//! Authentication session
//!
//! Holds the bearer credential and the identity it belongs to, persists both
//! through a [`SessionStore`] so they survive restarts, and tears the session
//! down when the server reports the credential as no longer valid.
//!
//! Components that must react to an expired session register a listener with
//! [`AuthSession::on_expired`]; listeners run synchronously inside
//! [`AuthSession::expire`], before the failing request resolves.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::error::{LoginError, StorageError};
use crate::transport::Transport;

const SESSION_FILENAME: &str = "session.json";

// ============ Persistence ============

/// What survives a restart. Field names double as the fixed storage keys.
#[derive(Clone, Serialize, Deserialize)]
pub struct PersistedSession {
    pub token: String,
    pub username: String,
}

/// Durable storage for the session credential.
pub trait SessionStore: Send + Sync {
    fn load(&self) -> Result<Option<PersistedSession>, StorageError>;
    fn save(&self, session: &PersistedSession) -> Result<(), StorageError>;
    fn clear(&self) -> Result<(), StorageError>;
}

impl<T: SessionStore + ?Sized> SessionStore for Arc<T> {
    fn load(&self) -> Result<Option<PersistedSession>, StorageError> {
        (**self).load()
    }

    fn save(&self, session: &PersistedSession) -> Result<(), StorageError> {
        (**self).save(session)
    }

    fn clear(&self) -> Result<(), StorageError> {
        (**self).clear()
    }
}

/// JSON file in the client's data directory.
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn in_dir(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(SESSION_FILENAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> Result<Option<PersistedSession>, StorageError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)?;
        let session: PersistedSession = serde_json::from_str(&content)?;
        if session.token.is_empty() {
            return Ok(None);
        }
        Ok(Some(session))
    }

    fn save(&self, session: &PersistedSession) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(session)?)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
        }
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Process-local store, for embedding and tests.
#[derive(Default)]
pub struct MemorySessionStore {
    inner: Mutex<Option<PersistedSession>>,
}

impl MemorySessionStore {
    pub fn with_session(token: &str, username: &str) -> Self {
        Self {
            inner: Mutex::new(Some(PersistedSession {
                token: token.to_string(),
                username: username.to_string(),
            })),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).is_none()
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Result<Option<PersistedSession>, StorageError> {
        Ok(self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn save(&self, session: &PersistedSession) -> Result<(), StorageError> {
        *self.inner.lock().unwrap_or_else(|e| e.into_inner()) = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        *self.inner.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}

// ============ Session ============

/// Session lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    LoggedIn { identity: String },
    LoggedOut,
    /// The server rejected the credential; the session was torn down.
    Expired,
}

/// Bearer credential handed to the transport for one request.
pub(crate) struct Credential {
    pub token: SecretString,
    pub generation: u64,
}

#[derive(Default)]
struct SessionState {
    credential: Option<SecretString>,
    identity: Option<String>,
    /// Bumped on every login so a late 401 for an old token cannot end a
    /// newer session.
    generation: u64,
}

type ExpiryListener = Arc<dyn Fn() + Send + Sync>;

pub struct AuthSession {
    state: Mutex<SessionState>,
    store: Box<dyn SessionStore>,
    listeners: Mutex<Vec<ExpiryListener>>,
    events: broadcast::Sender<AuthEvent>,
}

impl AuthSession {
    /// Create a session, restoring a persisted credential if there is one.
    pub fn restore(store: impl SessionStore + 'static) -> Self {
        let mut state = SessionState::default();
        match store.load() {
            Ok(Some(saved)) => {
                info!("[AUTH] Restored session for {}", saved.username);
                state.credential = Some(SecretString::from(saved.token));
                state.identity = Some(saved.username);
                state.generation = 1;
            }
            Ok(None) => {}
            Err(e) => warn!("[AUTH] Ignoring unreadable session store: {}", e),
        }
        let (events, _) = broadcast::channel(16);
        Self {
            state: Mutex::new(state),
            store: Box::new(store),
            listeners: Mutex::new(Vec::new()),
            events,
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_present(&self) -> bool {
        self.lock_state().credential.is_some()
    }

    pub fn identity(&self) -> Option<String> {
        self.lock_state().identity.clone()
    }

    pub fn generation(&self) -> u64 {
        self.lock_state().generation
    }

    /// Whether the credential of `generation` is still the live one.
    pub fn is_current(&self, generation: u64) -> bool {
        let state = self.lock_state();
        state.credential.is_some() && state.generation == generation
    }

    pub(crate) fn credential(&self) -> Option<Credential> {
        let state = self.lock_state();
        state.credential.as_ref().map(|token| Credential {
            token: token.clone(),
            generation: state.generation,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    /// Register a callback run whenever the session expires.
    pub fn on_expired(&self, listener: impl Fn() + Send + Sync + 'static) {
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(listener));
    }

    /// Exchange username and password for a credential.
    ///
    /// Session state is only touched on success.
    pub async fn login(
        &self,
        transport: &Transport,
        username: &str,
        password: &SecretString,
    ) -> Result<(), LoginError> {
        let username = username.trim();
        if username.is_empty() || password.expose_secret().is_empty() {
            return Err(LoginError::MissingCredentials);
        }
        let token = transport.login(username, password).await?;
        self.establish(token, username);
        Ok(())
    }

    /// Install a credential obtained out of band and persist it.
    pub fn establish(&self, token: String, username: &str) {
        let persisted = PersistedSession {
            token: token.clone(),
            username: username.to_string(),
        };
        {
            let mut state = self.lock_state();
            state.credential = Some(SecretString::from(token));
            state.identity = Some(username.to_string());
            state.generation += 1;
            // Saved under the lock so a concurrent expiry of the previous
            // generation cannot delete the new session from the store.
            if let Err(e) = self.store.save(&persisted) {
                warn!("[AUTH] Session not persisted: {}", e);
            }
        }
        info!("[AUTH] Logged in as {}", username);
        let _ = self.events.send(AuthEvent::LoggedIn {
            identity: username.to_string(),
        });
    }

    /// Explicit logout. Clears memory and persisted storage.
    pub fn logout(&self) {
        self.clear();
        info!("[AUTH] Logged out");
        let _ = self.events.send(AuthEvent::LoggedOut);
    }

    /// Tear the session down after an auth-error response for a credential of
    /// `generation`. Returns false when that credential is already gone.
    pub fn expire(&self, generation: u64) -> bool {
        {
            let mut state = self.lock_state();
            if state.credential.is_none() || state.generation != generation {
                return false;
            }
            state.credential = None;
            state.identity = None;
            if let Err(e) = self.store.clear() {
                warn!("[AUTH] Failed to clear persisted session: {}", e);
            }
        }
        warn!("[AUTH] Session expired, credential cleared");
        let _ = self.events.send(AuthEvent::Expired);

        let listeners: Vec<ExpiryListener> = self
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for listener in listeners {
            listener();
        }
        true
    }

    fn clear(&self) {
        {
            let mut state = self.lock_state();
            state.credential = None;
            state.identity = None;
        }
        if let Err(e) = self.store.clear() {
            warn!("[AUTH] Failed to clear persisted session: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_restore_without_stored_session() {
        let session = AuthSession::restore(MemorySessionStore::default());
        assert!(!session.is_present());
        assert_eq!(session.identity(), None);
    }

    #[test]
    fn test_restore_from_store() {
        let session = AuthSession::restore(MemorySessionStore::with_session("tok", "admin"));
        assert!(session.is_present());
        assert_eq!(session.identity().as_deref(), Some("admin"));
    }

    #[test]
    fn test_establish_persists_and_logout_clears() {
        let store = Arc::new(MemorySessionStore::default());
        let session = AuthSession::restore(store.clone());
        session.establish("tok".to_string(), "admin");
        assert!(session.is_present());
        assert!(!store.is_empty());

        session.logout();
        assert!(!session.is_present());
        assert_eq!(session.identity(), None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_expire_runs_listeners_and_clears_store() {
        let store = Arc::new(MemorySessionStore::default());
        let session = AuthSession::restore(store.clone());
        session.establish("tok".to_string(), "admin");

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        session.on_expired(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let mut events = session.subscribe();

        assert!(session.expire(session.generation()));
        assert!(!session.is_present());
        assert!(store.is_empty());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(events.try_recv().unwrap(), AuthEvent::Expired);

        // Second 401 for the same credential is a no-op
        assert!(!session.expire(session.generation()));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stale_generation_does_not_end_new_session() {
        let session = AuthSession::restore(MemorySessionStore::default());
        session.establish("old".to_string(), "admin");
        let old_generation = session.generation();
        session.establish("new".to_string(), "admin");

        assert!(!session.expire(old_generation));
        assert!(session.is_present());
    }

    #[test]
    fn test_racing_expiry_never_ends_newer_session() {
        for _ in 0..200 {
            let store = Arc::new(MemorySessionStore::default());
            let session = Arc::new(AuthSession::restore(store.clone()));
            session.establish("old".to_string(), "admin");
            let old_generation = session.generation();
            let barrier = Arc::new(std::sync::Barrier::new(2));

            let expirer = {
                let session = session.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    session.expire(old_generation);
                })
            };
            barrier.wait();
            session.establish("new".to_string(), "admin");
            expirer.join().unwrap();

            // Whichever ran first, the newer login survives in memory and on disk.
            assert!(session.is_present());
            assert_eq!(store.load().unwrap().unwrap().token, "new");
        }
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::in_dir(dir.path());
        assert!(store.load().unwrap().is_none());

        store
            .save(&PersistedSession {
                token: "abc".to_string(),
                username: "admin".to_string(),
            })
            .unwrap();
        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("\"token\""));
        assert!(raw.contains("\"username\""));
        assert_eq!(store.load().unwrap().unwrap().username, "admin");

        store.clear().unwrap();
        assert!(!store.path().exists());
        // Clearing twice is fine
        store.clear().unwrap();
    }

    #[test]
    fn test_corrupt_file_store_means_logged_out() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SESSION_FILENAME), "not json").unwrap();
        let session = AuthSession::restore(FileSessionStore::in_dir(dir.path()));
        assert!(!session.is_present());
    }
}
