//! WebDrive - client engine for a remote hierarchical file store
//!
//! Navigation, directory listing, transfers and mutations against the
//! storage service's HTTP API, kept consistent with an authentication
//! session that the server can revoke at any time.
//!
//! ```text
//!                     FileBrowser
//!   ┌───────────┬──────────┼───────────┬──────────────┐
//!   ▼           ▼          ▼           ▼              ▼
//! PathNavigator Directory  Transfer    Mutation       AuthSession
//!               ViewModel  Manager     Coordinator        ▲
//!                  └──────────┼───────────┘               │ 401
//!                             ▼                           │
//!                         Transport ──────────────────────┘
//!                             │
//!                  HttpBackend (reqwest / mock)
//! ```

pub mod auth;
pub mod browser;
pub mod config;
pub mod error;
pub mod listing;
pub mod mutation;
pub mod navigator;
pub mod path;
pub mod transfer;
pub mod transport;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use auth::{AuthEvent, AuthSession, FileSessionStore, MemorySessionStore, PersistedSession, SessionStore};
pub use browser::{BrowserEvent, BrowserSnapshot, FileBrowser, Route};
pub use config::{ClientConfig, ConfigError};
pub use error::{ClientError, LoginError, NavigationError, StorageError, ValidationError};
pub use listing::{DirectoryViewModel, ListingState, LoadState, RefreshOutcome};
pub use mutation::{MutationCoordinator, RefreshSignal};
pub use navigator::{Breadcrumb, NavAction, NavState, PathNavigator};
pub use transfer::{
    DirectorySink, FileSink, FileSource, LocalFile, MemoryFile, MemorySink, ProgressCallback, SavedFile,
    TransferManager, TransferProgress, TransferSession, TransferState, UploadReport,
};
pub use transport::{DirectoryEntry, DirectoryEntryList, HttpBackend, ReqwestBackend, Transport};
