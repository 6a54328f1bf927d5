//! Application state management
//!
//! Contains shared state accessible across all handlers.

use crate::snapshot::SnapshotManager;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Application state shared across all handlers
pub struct AppState {
    /// Owner of the published schema snapshots
    pub manager: Arc<SnapshotManager>,

    /// JWT secret key for token verification
    pub jwt_secret: String,

    /// Cancelled when the server shuts down; aborts manual refreshes
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(manager: Arc<SnapshotManager>, jwt_secret: String, shutdown: CancellationToken) -> Self {
        Self {
            manager,
            jwt_secret,
            shutdown,
        }
    }
}

/// Type alias for shared state
pub type SharedState = Arc<AppState>;
