//! Directory mutations
//!
//! Create and delete operations. None of them touch the displayed listing;
//! each success returns a [`RefreshSignal`] naming the directory the caller
//! should refetch.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::error::{ClientError, ValidationError};
use crate::path;
use crate::transport::Transport;

/// Directory whose listing changed and should be refetched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RefreshSignal {
    pub path: String,
}

impl RefreshSignal {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

pub struct MutationCoordinator {
    transport: Arc<Transport>,
}

impl MutationCoordinator {
    pub fn new(transport: Arc<Transport>) -> Self {
        Self { transport }
    }

    /// Create `name` inside `at_path`. The name is trimmed; a blank name is
    /// [`ValidationError::EmptyName`] and never reaches the server.
    pub async fn create_directory(&self, name: &str, at_path: &str) -> Result<RefreshSignal, ClientError> {
        let name = name.trim();
        path::validate_name(name)?;
        let at_path = path::normalize(at_path);
        self.transport.create_directory(name, &at_path).await?;
        info!("[MUTATION] Created directory '{}' in '{}'", name, at_path);
        Ok(RefreshSignal::new(at_path))
    }

    pub async fn delete_file(&self, name: &str, at_path: &str) -> Result<RefreshSignal, ClientError> {
        require_name(name)?;
        let at_path = path::normalize(at_path);
        self.transport.delete_file(name, &at_path).await?;
        info!("[MUTATION] Deleted file '{}' in '{}'", name, at_path);
        Ok(RefreshSignal::new(at_path))
    }

    /// Delete a directory and everything below it.
    pub async fn delete_directory(&self, name: &str, at_path: &str) -> Result<RefreshSignal, ClientError> {
        require_name(name)?;
        let at_path = path::normalize(at_path);
        self.transport.delete_directory(name, &at_path).await?;
        info!("[MUTATION] Deleted directory '{}' in '{}'", name, at_path);
        Ok(RefreshSignal::new(at_path))
    }
}

// Deletes address existing entries, so only names that cannot denote a
// child are refused.
fn require_name(name: &str) -> Result<(), ValidationError> {
    path::validate_segment(name)
}
