//! Directory listing view model
//!
//! Holds the children of the directory currently on screen and the load state
//! around them. Every refresh takes a new sequence number; a response is only
//! applied while its number is still the latest, so when fetches overlap the
//! last-requested path wins regardless of resolution order.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::ClientError;
use crate::transport::{DirectoryEntryList, Transport};

fn listing_log(msg: &str) {
    debug!("[LISTING] {}", msg);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum LoadState {
    Idle,
    Loading,
    Ready,
    /// Human-readable cause. Entries from the last success stay visible.
    Error(String),
}

/// How a fetch ended, as fed to the reducer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchResult {
    Entries(DirectoryEntryList),
    Failed(String),
    /// Cancelled by session expiry; never shown as an error.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListingAction {
    Requested { seq: u64, path: String },
    Resolved { seq: u64, result: FetchResult },
    Reset { seq: u64 },
}

/// Snapshot of the view model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListingState {
    /// Path of the latest request (root before any)
    pub path: String,
    pub status: LoadState,
    pub entries: DirectoryEntryList,
    /// Directory `entries` were listed from; differs from `path` while a
    /// fetch for another directory is loading or has failed.
    pub entries_path: String,
    /// Sequence number of the latest request
    pub sequence: u64,
}

impl Default for ListingState {
    fn default() -> Self {
        Self {
            path: String::new(),
            status: LoadState::Idle,
            entries: DirectoryEntryList::default(),
            entries_path: String::new(),
            sequence: 0,
        }
    }
}

impl ListingState {
    pub fn is_loading(&self) -> bool {
        self.status == LoadState::Loading
    }

    pub fn error(&self) -> Option<&str> {
        match &self.status {
            LoadState::Error(cause) => Some(cause),
            _ => None,
        }
    }

    /// True when the visible entries belong to a directory other than the
    /// requested one.
    pub fn shows_other_directory(&self) -> bool {
        self.entries_path != self.path
    }
}

/// Apply `action` to `state`. Returns `None` when the action is stale and
/// must be discarded.
pub fn reduce(state: &ListingState, action: ListingAction) -> Option<ListingState> {
    match action {
        ListingAction::Requested { seq, path } => {
            if seq <= state.sequence {
                return None;
            }
            // Entries belong to the old path until the new fetch lands.
            Some(ListingState {
                path,
                status: LoadState::Loading,
                entries: state.entries.clone(),
                entries_path: state.entries_path.clone(),
                sequence: seq,
            })
        }
        ListingAction::Resolved { seq, result } => {
            if seq != state.sequence {
                return None;
            }
            let mut next = state.clone();
            match result {
                FetchResult::Entries(entries) => {
                    next.entries = entries;
                    next.entries_path = next.path.clone();
                    next.status = LoadState::Ready;
                }
                FetchResult::Failed(cause) => next.status = LoadState::Error(cause),
                FetchResult::Cancelled => {
                    next.entries = DirectoryEntryList::default();
                    next.entries_path = next.path.clone();
                    next.status = LoadState::Idle;
                }
            }
            Some(next)
        }
        ListingAction::Reset { seq } => {
            if seq <= state.sequence {
                return None;
            }
            Some(ListingState {
                sequence: seq,
                ..ListingState::default()
            })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Applied,
    /// A newer refresh or a reset happened first; the response was dropped.
    Superseded,
}

pub struct DirectoryViewModel {
    transport: Arc<Transport>,
    state: Mutex<ListingState>,
}

impl DirectoryViewModel {
    pub fn new(transport: Arc<Transport>) -> Self {
        Self {
            transport,
            state: Mutex::new(ListingState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ListingState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Dispatch under the lock; true if the action was applied.
    fn dispatch(&self, action: ListingAction) -> bool {
        let mut state = self.lock();
        match reduce(&state, action) {
            Some(next) => {
                *state = next;
                true
            }
            None => false,
        }
    }

    /// Start a request for `path` and return its sequence number.
    fn begin(&self, path: &str) -> u64 {
        let mut state = self.lock();
        let seq = state.sequence + 1;
        if let Some(next) = reduce(
            &state,
            ListingAction::Requested {
                seq,
                path: path.to_string(),
            },
        ) {
            *state = next;
        }
        seq
    }

    pub fn snapshot(&self) -> ListingState {
        self.lock().clone()
    }

    /// Fetch `path` and replace the displayed entries.
    ///
    /// Auth expiry is returned as an error even when superseded, since it
    /// ends the session regardless of which listing asked. The same goes for
    /// a response dropped because the session ended while it was in flight.
    pub async fn refresh(&self, path: &str) -> Result<RefreshOutcome, ClientError> {
        let generation = self.transport.auth().generation();
        let seq = self.begin(path);
        listing_log(&format!("#{} list '{}'", seq, path));

        let result = self.transport.list(path).await;
        let (fetch, error) = match result {
            Ok(entries) => (FetchResult::Entries(entries), None),
            Err(ClientError::AuthExpired) => (FetchResult::Cancelled, Some(ClientError::AuthExpired)),
            Err(e) => (FetchResult::Failed(e.to_string()), Some(e)),
        };

        let applied = self.dispatch(ListingAction::Resolved { seq, result: fetch });
        match (applied, error) {
            (_, Some(ClientError::AuthExpired)) => Err(ClientError::AuthExpired),
            (false, _) if !self.transport.auth().is_current(generation) => {
                listing_log(&format!("#{} for '{}' dropped, session ended", seq, path));
                Err(ClientError::AuthExpired)
            }
            (false, _) => {
                listing_log(&format!("#{} for '{}' superseded, dropped", seq, path));
                Ok(RefreshOutcome::Superseded)
            }
            (true, None) => {
                info!("[LISTING] '{}' loaded", path);
                Ok(RefreshOutcome::Applied)
            }
            (true, Some(e)) => {
                warn!("[LISTING] '{}' failed: {}", path, e);
                Err(e)
            }
        }
    }

    /// Back to Idle with no entries; in-flight fetches are discarded.
    pub fn reset(&self) {
        let mut state = self.lock();
        let seq = state.sequence + 1;
        if let Some(next) = reduce(&state, ListingAction::Reset { seq }) {
            *state = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthSession, MemorySessionStore};
    use crate::mock::{MockFailure, MockServer};
    use crate::transport::DirectoryEntry;
    use url::Url;

    fn entries(dirs: &[&str], files: &[&str]) -> DirectoryEntryList {
        DirectoryEntryList::new(
            dirs.iter().map(|n| DirectoryEntry::named(*n)).collect(),
            files.iter().map(|n| DirectoryEntry::named(*n)).collect(),
        )
    }

    fn setup() -> (Arc<MockServer>, DirectoryViewModel) {
        let server = Arc::new(MockServer::new("admin", "admin123"));
        let auth = Arc::new(AuthSession::restore(MemorySessionStore::default()));
        auth.establish(server.issue_token(), "admin");
        let transport = Transport::new(Url::parse("http://mock.local").unwrap(), server.clone(), auth);
        (server, DirectoryViewModel::new(Arc::new(transport)))
    }

    #[test]
    fn test_reducer_later_request_wins() {
        let s0 = ListingState::default();
        let s1 = reduce(&s0, ListingAction::Requested { seq: 1, path: "a".into() }).unwrap();
        let s2 = reduce(&s1, ListingAction::Requested { seq: 2, path: "b".into() }).unwrap();
        let s3 = reduce(
            &s2,
            ListingAction::Resolved {
                seq: 2,
                result: FetchResult::Entries(entries(&["from-b"], &[])),
            },
        )
        .unwrap();
        // "a" resolves last
        assert!(reduce(
            &s3,
            ListingAction::Resolved {
                seq: 1,
                result: FetchResult::Entries(entries(&["from-a"], &[])),
            },
        )
        .is_none());
        assert_eq!(s3.path, "b");
        assert_eq!(s3.entries.directory_names(), vec!["from-b"]);
        assert_eq!(s3.status, LoadState::Ready);
    }

    #[test]
    fn test_reducer_error_keeps_stale_entries() {
        let ready = ListingState {
            path: "docs".into(),
            status: LoadState::Ready,
            entries: entries(&[], &["a.txt"]),
            entries_path: "docs".into(),
            sequence: 1,
        };
        let loading = reduce(&ready, ListingAction::Requested { seq: 2, path: "docs".into() }).unwrap();
        assert!(loading.is_loading());
        let failed = reduce(
            &loading,
            ListingAction::Resolved {
                seq: 2,
                result: FetchResult::Failed("Could not read directory".into()),
            },
        )
        .unwrap();
        assert_eq!(failed.error(), Some("Could not read directory"));
        assert_eq!(failed.entries.file_names(), vec!["a.txt"]);
        assert!(!failed.shows_other_directory());
    }

    #[test]
    fn test_reducer_tracks_which_directory_entries_came_from() {
        let ready = ListingState {
            path: "a".into(),
            status: LoadState::Ready,
            entries: entries(&[], &["in-a.txt"]),
            entries_path: "a".into(),
            sequence: 1,
        };
        let loading = reduce(&ready, ListingAction::Requested { seq: 2, path: "b".into() }).unwrap();
        assert_eq!(loading.entries_path, "a");
        assert!(loading.shows_other_directory());

        let failed = reduce(
            &loading,
            ListingAction::Resolved {
                seq: 2,
                result: FetchResult::Failed("Could not read directory".into()),
            },
        )
        .unwrap();
        assert_eq!(failed.path, "b");
        assert_eq!(failed.entries_path, "a");
        assert_eq!(failed.entries.file_names(), vec!["in-a.txt"]);

        let retried = reduce(&failed, ListingAction::Requested { seq: 3, path: "b".into() }).unwrap();
        let loaded = reduce(
            &retried,
            ListingAction::Resolved {
                seq: 3,
                result: FetchResult::Entries(entries(&[], &["in-b.txt"])),
            },
        )
        .unwrap();
        assert_eq!(loaded.entries_path, "b");
        assert!(!loaded.shows_other_directory());
    }

    #[test]
    fn test_reducer_cancelled_is_not_an_error() {
        let loading = reduce(&ListingState::default(), ListingAction::Requested { seq: 1, path: "x".into() }).unwrap();
        let next = reduce(&loading, ListingAction::Resolved { seq: 1, result: FetchResult::Cancelled }).unwrap();
        assert_eq!(next.status, LoadState::Idle);
        assert!(next.error().is_none());
    }

    #[test]
    fn test_reducer_reset_discards_in_flight() {
        let loading = reduce(&ListingState::default(), ListingAction::Requested { seq: 1, path: "x".into() }).unwrap();
        let reset = reduce(&loading, ListingAction::Reset { seq: 2 }).unwrap();
        assert_eq!(reset.status, LoadState::Idle);
        assert!(reduce(
            &reset,
            ListingAction::Resolved {
                seq: 1,
                result: FetchResult::Entries(entries(&["late"], &[])),
            },
        )
        .is_none());
    }

    #[tokio::test]
    async fn test_refresh_loads_entries() {
        let (server, vm) = setup();
        server.with_directory("docs").with_file("readme.md", b"hi");
        assert_eq!(vm.refresh("").await.unwrap(), RefreshOutcome::Applied);
        let snap = vm.snapshot();
        assert_eq!(snap.status, LoadState::Ready);
        assert_eq!(snap.entries.directory_names(), vec!["docs"]);
        assert_eq!(snap.entries.file_names(), vec!["readme.md"]);
        assert_eq!(snap.entries.files[0].size, Some(2));
    }

    #[tokio::test]
    async fn test_empty_directory_lists_nothing() {
        let (_server, vm) = setup();
        vm.refresh("").await.unwrap();
        assert!(vm.snapshot().entries.is_empty());
    }

    #[tokio::test]
    async fn test_last_requested_path_wins() {
        let (server, vm) = setup();
        server.with_directory("a/inside-a").with_directory("b/inside-b");
        let gate = server.hold_listing("a");

        let (first, second) = tokio::join!(vm.refresh("a"), async {
            let result = vm.refresh("b").await;
            gate.release();
            result
        });

        assert_eq!(second.unwrap(), RefreshOutcome::Applied);
        assert_eq!(first.unwrap(), RefreshOutcome::Superseded);
        let snap = vm.snapshot();
        assert_eq!(snap.path, "b");
        assert_eq!(snap.entries.directory_names(), vec!["inside-b"]);
    }

    #[tokio::test]
    async fn test_failure_keeps_entries_visible() {
        let (server, vm) = setup();
        server.with_file("a.txt", b"a");
        vm.refresh("").await.unwrap();
        server.fail_next(MockFailure::Status(
            500,
            serde_json::json!({"error": "Could not read directory"}),
        ));
        assert!(vm.refresh("").await.is_err());
        let snap = vm.snapshot();
        assert!(snap.error().unwrap().contains("Could not read directory"));
        assert_eq!(snap.entries.file_names(), vec!["a.txt"]);
    }

    #[tokio::test]
    async fn test_auth_expiry_is_not_an_error_state() {
        let (server, vm) = setup();
        server.invalidate_tokens();
        let err = vm.refresh("").await.unwrap_err();
        assert!(err.is_auth_expired());
        assert!(vm.snapshot().error().is_none());
    }

    #[tokio::test]
    async fn test_listing_in_flight_at_expiry_is_auth_expired() {
        let (server, vm) = setup();
        server.with_directory("slow/inner");
        let gate = server.hold_listing("slow");

        let (listing, ()) = tokio::join!(vm.refresh("slow"), async {
            server.invalidate_tokens();
            let err = vm.transport.create_directory("x", "").await.unwrap_err();
            assert!(err.is_auth_expired());
            vm.reset();
            gate.release();
        });

        assert!(listing.unwrap_err().is_auth_expired());
        let snap = vm.snapshot();
        assert_eq!(snap.status, LoadState::Idle);
        assert!(snap.entries.is_empty());
    }

    #[tokio::test]
    async fn test_reset_drops_entries() {
        let (server, vm) = setup();
        server.with_directory("docs");
        vm.refresh("").await.unwrap();
        vm.reset();
        let snap = vm.snapshot();
        assert_eq!(snap.status, LoadState::Idle);
        assert!(snap.entries.is_empty());
    }
}
