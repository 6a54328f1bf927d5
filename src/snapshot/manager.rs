//! Snapshot lifecycle
//!
//! Owns the published [`SnapshotSet`], keeps it current from a background
//! polling task and routes callers to the snapshot for their role. New
//! sets are assembled off to the side and published with one atomic swap,
//! so readers see either the old set or the new one.

use crate::config::{RefreshConfig, RoleConfig};
use crate::error::AppError;
use crate::executor::RequestContext;
use crate::fingerprint::FingerprintMode;
use crate::snapshot::builder::SnapshotBuilder;
use crate::snapshot::{
    ManagerState, RefreshRecorder, RefreshTrigger, Snapshot, SnapshotSet, TracingRecorder,
};
use arc_swap::ArcSwap;
use axum::Router;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Interval growth applied after every unchanged poll
const BACKOFF_FACTOR: f64 = 1.5;

pub struct SnapshotManager {
    builder: SnapshotBuilder,
    refresh: RefreshConfig,
    scoped: bool,
    roles: Vec<String>,
    recorder: Arc<dyn RefreshRecorder>,
    current: ArcSwap<SnapshotSet>,
    /// Last version handed to a build attempt
    version: AtomicU64,
    in_flight: AtomicUsize,
    stopped: AtomicBool,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    forbidden: Router,
}

/// Counts a build as in flight until dropped, cancelled builds included
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl SnapshotManager {
    /// Validate the configuration and run the first build. Fails if that
    /// build fails: the service never starts without a schema.
    pub async fn new(
        builder: SnapshotBuilder,
        refresh: RefreshConfig,
        roles: &RoleConfig,
        recorder: Option<Arc<dyn RefreshRecorder>>,
    ) -> Result<Arc<Self>, AppError> {
        refresh.validate()?;
        if roles.scoped_snapshots && roles.roles.is_empty() {
            return Err(AppError::Config(
                "role-scoped snapshots need at least one configured role".to_string(),
            ));
        }
        if roles.scoped_snapshots && !roles.role_security {
            return Err(AppError::Config(
                "role-scoped snapshots need the role-secured executor".to_string(),
            ));
        }

        let recorder = recorder.unwrap_or_else(|| Arc::new(TracingRecorder));
        let build_roles = if roles.scoped_snapshots {
            roles.roles.clone()
        } else {
            Vec::new()
        };

        let started = Instant::now();
        let initial = builder.build_set(&build_roles, 1).await;
        let mode = initial
            .as_ref()
            .map(|s| s.fingerprint.mode)
            .unwrap_or_default();
        recorder.record(started.elapsed(), initial.is_ok(), RefreshTrigger::Startup, mode);
        let initial = initial?;

        info!(
            fingerprint = %initial.fingerprint.value,
            mode = %initial.fingerprint.mode,
            roles = build_roles.len(),
            "Initial schema snapshot published"
        );

        Ok(Arc::new(Self {
            builder,
            refresh,
            scoped: roles.scoped_snapshots,
            roles: build_roles,
            recorder,
            current: ArcSwap::from_pointee(initial),
            version: AtomicU64::new(1),
            in_flight: AtomicUsize::new(0),
            stopped: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            task: Mutex::new(None),
            forbidden: forbidden_handler(),
        }))
    }

    /// Spawn the background refresh task. It exits when [`stop`](Self::stop)
    /// is called or `parent` is cancelled. Calling it twice is a no-op.
    pub async fn start(self: &Arc<Self>, parent: CancellationToken) {
        let mut task = self.task.lock().await;
        if task.is_some() || self.stopped.load(Ordering::SeqCst) {
            return;
        }

        let manager = Arc::clone(self);
        let canceller = self.shutdown.clone();
        *task = Some(tokio::spawn(async move {
            let mut interval = manager.refresh.min_interval;
            debug!("Polling schema fingerprint every {:?} to {:?}", interval, manager.refresh.max_interval);
            loop {
                tokio::select! {
                    biased;
                    _ = canceller.cancelled() => break,
                    _ = parent.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                // Shutdown is only observed between ticks; a running build completes
                interval = manager.poll_once(interval).await;
            }
            debug!("Background task exited: schema refresh");
        }));
    }

    /// One background tick. Returns the interval to wait before the next.
    pub async fn poll_once(&self, interval: Duration) -> Duration {
        let published = self.current.load_full();

        let fingerprint = match self.builder.fingerprint().await {
            Ok(fp) => fp,
            Err(e) => {
                warn!("Fingerprint failed, keeping version {}: {}", published.version, e);
                return self.refresh.min_interval;
            }
        };

        if fingerprint.value == published.fingerprint.value {
            let next = next_interval(interval, self.refresh.max_interval);
            debug!(fingerprint = %fingerprint.value, next = ?next, "Schema unchanged");
            return next;
        }

        match fingerprint.changed_components(&published.fingerprint) {
            Some(components) => info!(components = ?components, "Schema changed, rebuilding"),
            None => info!(mode = %fingerprint.mode, "Schema changed, rebuilding"),
        }

        if let Err(e) = self.rebuild(RefreshTrigger::Background).await {
            error!("Background rebuild failed, version {} stays live: {}", published.version, e);
        }
        self.refresh.min_interval
    }

    /// Rebuild and publish now, regardless of the fingerprint
    pub async fn refresh_now(&self) -> Result<Arc<SnapshotSet>, AppError> {
        self.rebuild(RefreshTrigger::Manual).await
    }

    /// Like [`refresh_now`](Self::refresh_now) but abandoned on `cancel` or
    /// after `deadline`. Abandoning drops every in-flight session, so no
    /// connection goes back to the pool with a role still set.
    pub async fn refresh_now_with(
        &self,
        cancel: &CancellationToken,
        deadline: Option<Duration>,
    ) -> Result<Arc<SnapshotSet>, AppError> {
        let started = Instant::now();
        let build = async {
            match deadline {
                Some(limit) => match tokio::time::timeout(limit, self.rebuild(RefreshTrigger::Manual)).await {
                    Ok(result) => result,
                    Err(_) => Err(AppError::Timeout(format!("schema refresh exceeded {:?}", limit))),
                },
                None => self.rebuild(RefreshTrigger::Manual).await,
            }
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AppError::Cancelled),
            result = build => result,
        };

        if matches!(result, Err(AppError::Cancelled) | Err(AppError::Timeout(_))) {
            self.recorder
                .record(started.elapsed(), false, RefreshTrigger::Manual, FingerprintMode::Unknown);
        }
        result
    }

    async fn rebuild(&self, trigger: RefreshTrigger) -> Result<Arc<SnapshotSet>, AppError> {
        let _in_flight = InFlight::enter(&self.in_flight);
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        let started = Instant::now();

        let result = self.builder.build_set(&self.roles, version).await;
        let mode = result
            .as_ref()
            .map(|s| s.fingerprint.mode)
            .unwrap_or_default();
        self.recorder.record(started.elapsed(), result.is_ok(), trigger, mode);

        let set = Arc::new(result?);
        if self.publish(set.clone()) {
            info!(
                version = set.version,
                fingerprint = %set.fingerprint.value,
                trigger = %trigger,
                "Published schema snapshot"
            );
        } else {
            debug!(version = set.version, "Newer snapshot already published, discarding build");
        }
        Ok(self.current.load_full())
    }

    /// Swap in `set` unless a newer one is already live
    fn publish(&self, set: Arc<SnapshotSet>) -> bool {
        let mut swapped = false;
        self.current.rcu(|current| {
            swapped = set.version > current.version;
            if swapped {
                set.clone()
            } else {
                current.clone()
            }
        });
        swapped
    }

    pub fn current_snapshot(&self) -> Arc<Snapshot> {
        self.current.load().default.clone()
    }

    pub fn current_set(&self) -> Arc<SnapshotSet> {
        self.current.load_full()
    }

    /// Handler for one caller. Without role-scoped snapshots everyone gets
    /// the default; with them, a missing or unknown role gets a fixed
    /// forbidden response.
    pub fn handler_for_context(&self, ctx: &RequestContext) -> Router {
        let set = self.current.load();
        if !self.scoped {
            return set.default.handler();
        }

        let role = ctx
            .role
            .as_deref()
            .filter(|r| ctx.authenticated && !r.is_empty());
        match role.and_then(|r| set.by_role.get(r)) {
            Some(snapshot) => snapshot.handler(),
            None => {
                debug!(role = ?ctx.role, "No snapshot for caller role");
                self.forbidden.clone()
            }
        }
    }

    pub fn state(&self) -> ManagerState {
        if self.stopped.load(Ordering::SeqCst) {
            ManagerState::Stopped
        } else if self.in_flight.load(Ordering::SeqCst) > 0 {
            ManagerState::Refreshing
        } else {
            ManagerState::Published
        }
    }

    /// Signal the background task to exit
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.shutdown.cancel();
    }

    /// Block until the background task has exited, up to `timeout`
    pub async fn wait(&self, timeout: Duration) -> Result<(), AppError> {
        let mut task = self.task.lock().await;
        let Some(handle) = task.as_mut() else {
            return Ok(());
        };

        match tokio::time::timeout(timeout, handle).await {
            Ok(joined) => {
                *task = None;
                joined.map_err(|e| AppError::Internal(format!("refresh task failed: {}", e)))
            }
            Err(_) => Err(AppError::Timeout(format!(
                "refresh task still running after {:?}",
                timeout
            ))),
        }
    }
}

fn next_interval(interval: Duration, max: Duration) -> Duration {
    interval.mul_f64(BACKOFF_FACTOR).min(max)
}

fn forbidden_handler() -> Router {
    Router::new().fallback(|| async { AppError::Forbidden("no snapshot for caller role".to_string()) })
}
