//! File browser orchestrator
//!
//! Owns one of each component and wires them together: path changes trigger
//! a listing refresh, successful mutations and uploads refresh the directory
//! they touched when it is still on screen, and session expiry resets the
//! whole view back to the login entry point.

use std::sync::{Arc, Mutex, MutexGuard};

use secrecy::SecretString;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use url::Url;

use crate::auth::{AuthSession, FileSessionStore, SessionStore};
use crate::config::{ClientConfig, ConfigError};
use crate::error::{ClientError, LoginError};
use crate::listing::{DirectoryViewModel, ListingState, RefreshOutcome};
use crate::mutation::{MutationCoordinator, RefreshSignal};
use crate::navigator::{Breadcrumb, PathNavigator};
use crate::transfer::{FileSink, FileSource, ProgressCallback, SavedFile, TransferManager, TransferSnapshot, UploadReport};
use crate::transport::{HttpBackend, ReqwestBackend, Transport};

/// Which screen the presentation layer should show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Route {
    Login,
    Explorer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowserEvent {
    LoggedIn { identity: String },
    LoggedOut,
    /// The server rejected the credential; the view is back at the root.
    SessionExpired,
    PathChanged { path: String },
    ListingUpdated { path: String },
    ListingFailed { path: String, error: String },
    UploadFinished { file_name: String, path: String },
    DownloadFinished { file_name: String, location: String },
}

/// Everything the presentation layer renders.
#[derive(Debug, Clone, Serialize)]
pub struct BrowserSnapshot {
    pub route: Route,
    pub identity: Option<String>,
    pub path: String,
    pub trail: Vec<Breadcrumb>,
    pub listing: ListingState,
    pub transfers: TransferSnapshot,
}

struct BrowserInner {
    auth: Arc<AuthSession>,
    transport: Arc<Transport>,
    navigator: Mutex<PathNavigator>,
    listing: DirectoryViewModel,
    transfers: TransferManager,
    mutations: MutationCoordinator,
    events: broadcast::Sender<BrowserEvent>,
}

impl BrowserInner {
    fn navigator(&self) -> MutexGuard<'_, PathNavigator> {
        self.navigator.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: BrowserEvent) {
        let _ = self.events.send(event);
    }

    fn reset_view(&self) {
        self.navigator().reset();
        self.listing.reset();
    }

    fn on_session_expired(&self) {
        warn!("[BROWSER] Session expired, returning to login");
        self.reset_view();
        self.emit(BrowserEvent::SessionExpired);
    }
}

#[derive(Clone)]
pub struct FileBrowser {
    inner: Arc<BrowserInner>,
}

impl FileBrowser {
    pub fn new(
        base_url: Url,
        backend: Arc<dyn HttpBackend>,
        store: impl SessionStore + 'static,
        root_label: &str,
    ) -> Self {
        let auth = Arc::new(AuthSession::restore(store));
        let transport = Arc::new(Transport::new(base_url, backend, auth.clone()));
        let (events, _) = broadcast::channel(64);
        let inner = Arc::new(BrowserInner {
            auth: auth.clone(),
            transport: transport.clone(),
            navigator: Mutex::new(PathNavigator::new(root_label)),
            listing: DirectoryViewModel::new(transport.clone()),
            transfers: TransferManager::new(transport.clone()),
            mutations: MutationCoordinator::new(transport),
            events,
        });

        let weak = Arc::downgrade(&inner);
        auth.on_expired(move || {
            if let Some(inner) = weak.upgrade() {
                inner.on_session_expired();
            }
        });

        Self { inner }
    }

    /// Production wiring: reqwest backend and a session file in the data dir.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let backend = Arc::new(ReqwestBackend::new(config.connect_timeout()));
        let store = FileSessionStore::in_dir(&config.data_dir);
        Ok(Self::new(config.server_url()?, backend, store, &config.root_label))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BrowserEvent> {
        self.inner.events.subscribe()
    }

    pub fn auth(&self) -> &Arc<AuthSession> {
        &self.inner.auth
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.inner.transport
    }

    pub fn transfers(&self) -> &TransferManager {
        &self.inner.transfers
    }

    pub fn route(&self) -> Route {
        if self.inner.auth.is_present() {
            Route::Explorer
        } else {
            Route::Login
        }
    }

    pub fn current_path(&self) -> String {
        self.inner.navigator().current_path().to_string()
    }

    pub fn trail(&self) -> Vec<Breadcrumb> {
        self.inner.navigator().trail().to_vec()
    }

    pub fn snapshot(&self) -> BrowserSnapshot {
        let (path, trail) = {
            let nav = self.inner.navigator();
            (nav.current_path().to_string(), nav.trail().to_vec())
        };
        BrowserSnapshot {
            route: self.route(),
            identity: self.inner.auth.identity(),
            path,
            trail,
            listing: self.inner.listing.snapshot(),
            transfers: self.inner.transfers.snapshot(),
        }
    }

    // ─── Session ─────────────────────────────────────────────────────────

    /// Log in and start at the root. The listing is not fetched here.
    pub async fn login(&self, username: &str, password: &SecretString) -> Result<(), LoginError> {
        self.inner.auth.login(&self.inner.transport, username, password).await?;
        self.inner.reset_view();
        self.inner.emit(BrowserEvent::LoggedIn {
            identity: username.trim().to_string(),
        });
        Ok(())
    }

    pub fn logout(&self) {
        self.inner.auth.logout();
        self.inner.reset_view();
        self.inner.emit(BrowserEvent::LoggedOut);
    }

    // ─── Navigation ──────────────────────────────────────────────────────

    /// Refetch the current directory.
    pub async fn refresh(&self) -> Result<RefreshOutcome, ClientError> {
        let path = self.current_path();
        match self.inner.listing.refresh(&path).await {
            Ok(RefreshOutcome::Applied) => {
                self.inner.emit(BrowserEvent::ListingUpdated { path });
                Ok(RefreshOutcome::Applied)
            }
            Ok(RefreshOutcome::Superseded) => Ok(RefreshOutcome::Superseded),
            Err(ClientError::AuthExpired) => Err(ClientError::AuthExpired),
            Err(e) => {
                self.inner.emit(BrowserEvent::ListingFailed {
                    path,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn after_navigation(&self, changed: bool) -> Result<Option<RefreshOutcome>, ClientError> {
        if !changed {
            return Ok(None);
        }
        let path = self.current_path();
        debug!("[BROWSER] Path changed to '{}'", path);
        self.inner.emit(BrowserEvent::PathChanged { path });
        self.refresh().await.map(Some)
    }

    /// Enter the child directory `name` and list it.
    pub async fn descend(&self, name: &str) -> Result<Option<RefreshOutcome>, ClientError> {
        let changed = self.inner.navigator().descend(name)?;
        self.after_navigation(changed).await
    }

    /// Go to the parent directory. `Ok(None)` at the root.
    pub async fn ascend(&self) -> Result<Option<RefreshOutcome>, ClientError> {
        let changed = self.inner.navigator().ascend();
        self.after_navigation(changed).await
    }

    /// Go to breadcrumb `index`. `Ok(None)` when that is already current.
    pub async fn jump_to(&self, index: usize) -> Result<Option<RefreshOutcome>, ClientError> {
        let changed = self.inner.navigator().jump_to(index)?;
        self.after_navigation(changed).await
    }

    /// Refetch `signal.path` if it is still the displayed directory. The
    /// operation that produced the signal already succeeded, so a failed
    /// refetch only shows up in the listing state.
    async fn apply_refresh(&self, signal: &RefreshSignal) {
        if signal.path != self.current_path() {
            debug!("[BROWSER] '{}' changed but is not displayed", signal.path);
            return;
        }
        if let Err(e) = self.refresh().await {
            warn!("[BROWSER] Refresh of '{}' failed: {}", signal.path, e);
        }
    }

    // ─── Transfers ───────────────────────────────────────────────────────

    /// Upload `source` into the current directory.
    pub async fn upload<S>(&self, source: S, on_progress: Option<ProgressCallback>) -> Result<UploadReport, ClientError>
    where
        S: FileSource + 'static,
    {
        let target = self.current_path();
        let report = self.inner.transfers.begin_upload(source, &target, on_progress).await?;
        self.inner.emit(BrowserEvent::UploadFinished {
            file_name: report.file_name.clone(),
            path: report.target_path.clone(),
        });
        self.apply_refresh(&report.refresh).await;
        Ok(report)
    }

    /// Download `name` from the current directory into `sink`.
    pub async fn download<K>(
        &self,
        name: &str,
        sink: &K,
        on_progress: Option<ProgressCallback>,
    ) -> Result<SavedFile, ClientError>
    where
        K: FileSink + ?Sized,
    {
        let path = self.current_path();
        let saved = self.inner.transfers.download(name, &path, sink, on_progress).await?;
        self.inner.emit(BrowserEvent::DownloadFinished {
            file_name: name.to_string(),
            location: saved.location.clone(),
        });
        Ok(saved)
    }

    // ─── Mutations ───────────────────────────────────────────────────────

    pub async fn create_directory(&self, name: &str) -> Result<RefreshSignal, ClientError> {
        let signal = self
            .inner
            .mutations
            .create_directory(name, &self.current_path())
            .await?;
        self.apply_refresh(&signal).await;
        Ok(signal)
    }

    pub async fn delete_file(&self, name: &str) -> Result<RefreshSignal, ClientError> {
        let signal = self.inner.mutations.delete_file(name, &self.current_path()).await?;
        self.apply_refresh(&signal).await;
        Ok(signal)
    }

    pub async fn delete_directory(&self, name: &str) -> Result<RefreshSignal, ClientError> {
        let signal = self
            .inner
            .mutations
            .delete_directory(name, &self.current_path())
            .await?;
        info!("[BROWSER] Removed '{}'", name);
        self.apply_refresh(&signal).await;
        Ok(signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemorySessionStore;
    use crate::error::NavigationError;
    use crate::listing::LoadState;
    use crate::mock::MockServer;
    use crate::transfer::{MemoryFile, MemorySink};
    use crate::transport::ByteStream;
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures_util::StreamExt;
    use tokio::sync::oneshot;

    /// Source that blocks mid-upload until the sender fires.
    struct HeldFile {
        rx: oneshot::Receiver<()>,
    }

    #[async_trait]
    impl FileSource for HeldFile {
        fn name(&self) -> &str {
            "held.bin"
        }

        fn size(&self) -> Option<u64> {
            Some(4)
        }

        async fn open(self: Box<Self>) -> std::io::Result<ByteStream> {
            let rx = self.rx;
            Ok(futures_util::stream::once(async move {
                let _ = rx.await;
                Ok::<_, std::io::Error>(Bytes::from_static(b"held"))
            })
            .boxed())
        }
    }

    fn setup(store: MemorySessionStore) -> (Arc<MockServer>, FileBrowser) {
        let server = Arc::new(MockServer::new("admin", "admin123"));
        let browser = FileBrowser::new(Url::parse("http://mock.local").unwrap(), server.clone(), store, "Home");
        (server, browser)
    }

    async fn logged_in() -> (Arc<MockServer>, FileBrowser) {
        let (server, browser) = setup(MemorySessionStore::default());
        browser.login("admin", &SecretString::from("admin123")).await.unwrap();
        (server, browser)
    }

    fn drain(rx: &mut broadcast::Receiver<BrowserEvent>) -> Vec<BrowserEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_route_follows_session() {
        let (_server, browser) = setup(MemorySessionStore::default());
        assert_eq!(browser.route(), Route::Login);
        browser.login("admin", &SecretString::from("admin123")).await.unwrap();
        assert_eq!(browser.route(), Route::Explorer);
        browser.logout();
        assert_eq!(browser.route(), Route::Login);
    }

    #[tokio::test]
    async fn test_failed_login_stays_on_login() {
        let (_server, browser) = setup(MemorySessionStore::default());
        let err = browser.login("admin", &SecretString::from("nope")).await.unwrap_err();
        assert!(matches!(err, LoginError::BadCredentials(_)));
        let err = browser.login(" ", &SecretString::from("x")).await.unwrap_err();
        assert_eq!(err, LoginError::MissingCredentials);
        assert_eq!(browser.route(), Route::Login);
    }

    #[tokio::test]
    async fn test_restored_session_starts_in_explorer() {
        let server = Arc::new(MockServer::new("admin", "admin123"));
        let store = MemorySessionStore::with_session(&server.issue_token(), "admin");
        let browser = FileBrowser::new(Url::parse("http://mock.local").unwrap(), server.clone(), store, "/");
        assert_eq!(browser.route(), Route::Explorer);
        assert_eq!(browser.snapshot().identity.as_deref(), Some("admin"));
        assert_eq!(browser.refresh().await.unwrap(), RefreshOutcome::Applied);
    }

    #[tokio::test]
    async fn test_navigation_refreshes_listing() {
        let (server, browser) = logged_in().await;
        server.with_directory("docs/2024").with_file("docs/a.txt", b"a");
        let mut rx = browser.subscribe();

        assert_eq!(browser.descend("docs").await.unwrap(), Some(RefreshOutcome::Applied));
        let snap = browser.snapshot();
        assert_eq!(snap.path, "docs");
        assert_eq!(snap.trail.len(), 2);
        assert_eq!(snap.trail[0].name, "Home");
        assert_eq!(snap.listing.entries.directory_names(), vec!["2024"]);
        assert_eq!(snap.listing.entries.file_names(), vec!["a.txt"]);

        assert_eq!(
            drain(&mut rx),
            vec![
                BrowserEvent::PathChanged { path: "docs".into() },
                BrowserEvent::ListingUpdated { path: "docs".into() },
            ]
        );

        browser.descend("2024").await.unwrap();
        browser.jump_to(0).await.unwrap();
        assert_eq!(browser.current_path(), "");
        assert_eq!(browser.ascend().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_bad_navigation_is_rejected_without_requests() {
        let (server, browser) = logged_in().await;
        let before = server.call_count();
        let err = browser.descend("a/b").await.unwrap_err();
        assert!(matches!(err, ClientError::Navigation(NavigationError::InvalidSegment(_))));
        let err = browser.jump_to(3).await.unwrap_err();
        assert!(matches!(err, ClientError::Navigation(NavigationError::InvalidIndex { index: 3, len: 1 })));
        assert_eq!(server.call_count(), before);
    }

    #[tokio::test]
    async fn test_missing_directory_shows_error() {
        let (_server, browser) = logged_in().await;
        let mut rx = browser.subscribe();
        assert!(browser.descend("ghost").await.is_err());
        let snap = browser.snapshot();
        assert_eq!(snap.listing.status, LoadState::Error("Server rejected request (500): Could not read directory".into()));
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, BrowserEvent::ListingFailed { path, .. } if path == "ghost")));
    }

    #[tokio::test]
    async fn test_mutations_refresh_current_directory() {
        let (server, browser) = logged_in().await;
        browser.refresh().await.unwrap();
        browser.create_directory("docs").await.unwrap();
        assert!(browser.snapshot().listing.entries.has_directory("docs"));

        browser.upload(MemoryFile::new("a.txt", "hello"), None).await.unwrap();
        assert!(browser.snapshot().listing.entries.has_file("a.txt"));
        assert_eq!(server.file_contents("a.txt").unwrap(), b"hello");

        let sink = MemorySink::default();
        browser.download("a.txt", &sink, None).await.unwrap();
        assert_eq!(sink.get("a.txt").unwrap(), b"hello");

        browser.delete_file("a.txt").await.unwrap();
        browser.delete_directory("docs").await.unwrap();
        assert!(browser.snapshot().listing.entries.is_empty());
    }

    #[tokio::test]
    async fn test_session_expiry_resets_view() {
        let (server, browser) = logged_in().await;
        server.with_directory("docs/deep");
        browser.descend("docs").await.unwrap();
        browser.descend("deep").await.unwrap();
        let mut rx = browser.subscribe();

        server.invalidate_tokens();
        let err = browser.create_directory("new").await.unwrap_err();
        assert!(err.is_auth_expired());

        assert_eq!(browser.route(), Route::Login);
        let snap = browser.snapshot();
        assert_eq!(snap.path, "");
        assert_eq!(snap.trail.len(), 1);
        assert_eq!(snap.listing.status, LoadState::Idle);
        assert!(snap.listing.entries.is_empty());
        assert!(drain(&mut rx).contains(&BrowserEvent::SessionExpired));

        // Nothing further goes out without a credential.
        let before = server.call_count();
        assert!(matches!(browser.refresh().await, Err(ClientError::NotAuthenticated)));
        assert_eq!(server.call_count(), before);
    }

    #[tokio::test]
    async fn test_upload_in_flight_at_expiry_resolves_auth_expired() {
        let (server, browser) = logged_in().await;
        let mut rx = browser.subscribe();
        let (tx, held) = oneshot::channel();

        let (upload, listing) = tokio::join!(browser.upload(HeldFile { rx: held }, None), async {
            server.invalidate_tokens();
            let listing = browser.refresh().await;
            let _ = tx.send(());
            listing
        });

        assert!(listing.unwrap_err().is_auth_expired());
        assert!(upload.unwrap_err().is_auth_expired());
        assert_eq!(browser.route(), Route::Login);
        assert!(!browser.transfers().is_uploading());

        let events = drain(&mut rx);
        assert!(events.contains(&BrowserEvent::SessionExpired));
        assert!(!events
            .iter()
            .any(|e| matches!(e, BrowserEvent::UploadFinished { .. })));
    }
}
