//! Schema Snapshot Module
//!
//! A snapshot is one fully built API (compiled catalog plus router) over
//! the schema as it was when the build ran. Snapshots for the default
//! caller and every configured role are grouped into a [`SnapshotSet`],
//! which is the only unit ever published.

pub mod builder;
pub mod manager;
pub mod overrides;

pub use builder::SnapshotBuilder;
pub use manager::SnapshotManager;

use crate::api::compiler::{ApiCatalog, CompiledSchema};
use crate::fingerprint::{FingerprintDetails, FingerprintMode};
use crate::introspection::DbSchema;
use axum::Router;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Immutable result of one build for one caller role
pub struct Snapshot {
    /// `None` for the default snapshot
    pub role: Option<String>,
    pub compiled: CompiledSchema,
    pub schema: Arc<DbSchema>,
    pub built_at: DateTime<Utc>,
    pub fingerprint: String,
}

impl Snapshot {
    pub fn catalog(&self) -> &ApiCatalog {
        &self.compiled.catalog
    }

    /// Request handler serving this snapshot's API
    pub fn handler(&self) -> Router {
        self.compiled.router.clone()
    }
}

/// Everything one refresh attempt produced
#[derive(Clone)]
pub struct SnapshotSet {
    /// Increases with every build attempt; a set never replaces a newer one
    pub version: u64,
    pub build_id: Uuid,
    pub default: Arc<Snapshot>,
    pub by_role: BTreeMap<String, Arc<Snapshot>>,
    pub fingerprint: FingerprintDetails,
    pub built_at: DateTime<Utc>,
}

impl SnapshotSet {
    pub fn summary(&self) -> SnapshotSummary {
        SnapshotSummary {
            version: self.version,
            build_id: self.build_id,
            fingerprint: self.fingerprint.value.clone(),
            mode: self.fingerprint.mode,
            components: self.fingerprint.components.clone(),
            roles: self.by_role.keys().cloned().collect(),
            types: self.default.catalog().types.len(),
            built_at: self.built_at,
        }
    }
}

/// Operator view of a published set
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSummary {
    pub version: u64,
    pub build_id: Uuid,
    pub fingerprint: String,
    pub mode: FingerprintMode,
    pub components: BTreeMap<String, String>,
    pub roles: Vec<String>,
    pub types: usize,
    pub built_at: DateTime<Utc>,
}

/// What started a build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshTrigger {
    Startup,
    Background,
    Manual,
}

impl std::fmt::Display for RefreshTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefreshTrigger::Startup => write!(f, "startup"),
            RefreshTrigger::Background => write!(f, "background"),
            RefreshTrigger::Manual => write!(f, "manual"),
        }
    }
}

/// Receives one record per build attempt
pub trait RefreshRecorder: Send + Sync {
    fn record(&self, duration: Duration, success: bool, trigger: RefreshTrigger, mode: FingerprintMode);
}

/// Writes build records to the log
#[derive(Debug, Default)]
pub struct TracingRecorder;

impl RefreshRecorder for TracingRecorder {
    fn record(&self, duration: Duration, success: bool, trigger: RefreshTrigger, mode: FingerprintMode) {
        if success {
            info!(
                trigger = %trigger,
                mode = %mode,
                duration_ms = duration.as_millis() as u64,
                "Schema build succeeded"
            );
        } else {
            warn!(
                trigger = %trigger,
                mode = %mode,
                duration_ms = duration.as_millis() as u64,
                "Schema build failed"
            );
        }
    }
}

/// Lifecycle of a [`SnapshotManager`] once constructed. Construction
/// itself covers the initial build and only returns once a set is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagerState {
    Published,
    Refreshing,
    Stopped,
}
