//! Role-secured statement execution
//!
//! Every operation borrows its own physical connection. When the caller
//! carries a database role the connection switches to it with `SET ROLE`
//! and is reset before it goes back to the pool. A connection whose reset
//! fails, or that is abandoned mid-operation, is closed instead of being
//! returned.

use crate::db::queries::{SqlBuilder, RESET_ROLE, RESET_SEARCH_PATH};
use crate::db::{PooledSession, SessionSource};
use crate::error::AppError;
use async_trait::async_trait;
use postgres_types::ToSql;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_postgres::Row;
use tracing::{debug, warn};

/// What is known about the caller of one request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub subject: Option<String>,
    /// Database role the caller acts as
    pub role: Option<String>,
    pub authenticated: bool,
    pub admin: bool,
}

impl RequestContext {
    pub fn with_role(role: &str) -> Self {
        Self {
            role: Some(role.to_string()),
            authenticated: true,
            ..Self::default()
        }
    }
}

/// Strategy deciding which database role a call runs as
pub trait RoleExtractor: Send + Sync {
    fn role_for(&self, ctx: &RequestContext) -> Option<String>;
}

impl<F> RoleExtractor for F
where
    F: Fn(&RequestContext) -> Option<String> + Send + Sync,
{
    fn role_for(&self, ctx: &RequestContext) -> Option<String> {
        self(ctx)
    }
}

/// Uses the role carried by the authenticated request context
pub struct ContextRole;

impl RoleExtractor for ContextRole {
    fn role_for(&self, ctx: &RequestContext) -> Option<String> {
        ctx.role.clone().filter(|r| !r.is_empty())
    }
}

/// Which roles may be assumed
#[derive(Debug, Clone, Default)]
pub struct RolePolicy {
    pub validate: bool,
    pub allowed: BTreeSet<String>,
}

impl RolePolicy {
    pub fn new(validate: bool, allowed: impl IntoIterator<Item = String>) -> Self {
        Self {
            validate,
            allowed: allowed.into_iter().collect(),
        }
    }

    pub fn check(&self, role: &str) -> Result<(), AppError> {
        if self.validate && !self.allowed.contains(role) {
            return Err(AppError::RoleSecurity(format!("role {:?} is not allowed", role)));
        }
        Ok(())
    }
}

/// A borrowed connection plus the session state applied to it
pub struct RoleSession {
    conn: Option<Box<dyn PooledSession>>,
    role: Option<String>,
    search_path: bool,
    in_transaction: bool,
}

impl RoleSession {
    /// Borrow a connection and switch it to `role` / `search_path`.
    /// On failure the connection is cleaned up before the error returns.
    pub async fn open(
        source: &dyn SessionSource,
        role: Option<&str>,
        search_path: Option<&str>,
        policy: &RolePolicy,
    ) -> Result<Self, AppError> {
        let conn = source.acquire().await?;
        let mut session = RoleSession {
            conn: Some(conn),
            role: None,
            search_path: false,
            in_transaction: false,
        };

        if let Some(role) = role.filter(|r| !r.is_empty()) {
            if let Err(e) = policy.check(role) {
                let _ = session.close().await;
                return Err(e);
            }
            // Marked before the statement runs: a failed SET ROLE still gets a reset
            session.role = Some(role.to_string());
            if let Err(e) = session.conn().batch(&SqlBuilder::set_role(role)).await {
                let _ = session.close().await;
                return Err(AppError::RoleSecurity(format!("SET ROLE failed: {}", e)));
            }
            debug!(role = %role, "Session role applied");
        }

        if let Some(path) = search_path {
            session.search_path = true;
            if let Err(e) = session.conn().batch(&SqlBuilder::set_search_path(path)).await {
                let _ = session.close().await;
                return Err(AppError::RoleSecurity(format!("SET search_path failed: {}", e)));
            }
        }

        Ok(session)
    }

    pub fn conn(&self) -> &dyn PooledSession {
        match &self.conn {
            Some(conn) => conn.as_ref(),
            None => unreachable!("session used after close"),
        }
    }

    fn is_dirty(&self) -> bool {
        self.role.is_some() || self.search_path || self.in_transaction
    }

    /// Reset the session state and return the connection to the pool.
    /// If the reset fails the connection is closed and the error returned.
    pub async fn close(mut self) -> Result<(), AppError> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };

        let mut failure = None;
        if self.in_transaction {
            if let Err(e) = conn.batch("ROLLBACK").await {
                failure = Some(e);
            }
        }
        if self.search_path {
            if let Err(e) = conn.batch(RESET_SEARCH_PATH).await {
                failure = Some(e);
            }
        }
        if self.role.is_some() {
            if let Err(e) = conn.batch(RESET_ROLE).await {
                failure = Some(e);
            }
        }

        match failure {
            None => {
                drop(conn);
                Ok(())
            }
            Some(e) => {
                warn!("Session reset failed, closing connection: {}", e);
                conn.discard();
                Err(AppError::RoleSecurity(format!("session reset failed: {}", e)))
            }
        }
    }
}

impl Drop for RoleSession {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if self.is_dirty() {
                warn!("Session abandoned with role or transaction state, closing connection");
                conn.discard();
            }
        }
    }
}

/// Close the session, keeping the operation's own result
async fn finish<T>(session: RoleSession, result: Result<T, AppError>) -> Result<T, AppError> {
    if let Err(e) = session.close().await {
        warn!("Connection cleanup after operation failed: {}", e);
    }
    result
}

/// Transaction bound to one session; commit or rollback releases it
pub struct ExecTx {
    session: RoleSession,
}

impl ExecTx {
    async fn begin(mut session: RoleSession) -> Result<Self, AppError> {
        session.in_transaction = true;
        if let Err(e) = session.conn().batch("BEGIN").await {
            session.in_transaction = false;
            let _ = session.close().await;
            return Err(e);
        }
        Ok(Self { session })
    }

    pub async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<Vec<Row>, AppError> {
        self.session.conn().query(sql, params).await
    }

    pub async fn exec(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<u64, AppError> {
        self.session.conn().execute(sql, params).await
    }

    pub async fn commit(self) -> Result<(), AppError> {
        self.finish("COMMIT").await
    }

    pub async fn rollback(self) -> Result<(), AppError> {
        self.finish("ROLLBACK").await
    }

    async fn finish(mut self, statement: &str) -> Result<(), AppError> {
        let result = self.session.conn().batch(statement).await;
        // The server ends the transaction even when COMMIT fails
        self.session.in_transaction = false;
        let closed = self.session.close().await;
        result.and(closed)
    }
}

/// Contract shared by both execution strategies
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn query(
        &self,
        ctx: &RequestContext,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<Row>, AppError>;

    async fn exec(
        &self,
        ctx: &RequestContext,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<u64, AppError>;

    async fn begin_tx(&self, ctx: &RequestContext) -> Result<ExecTx, AppError>;
}

/// Switches every call to the caller's database role
pub struct RoleSecuredExecutor {
    source: Arc<dyn SessionSource>,
    extractor: Arc<dyn RoleExtractor>,
    policy: RolePolicy,
    search_path: Option<String>,
}

impl RoleSecuredExecutor {
    pub fn new(
        source: Arc<dyn SessionSource>,
        extractor: Arc<dyn RoleExtractor>,
        policy: RolePolicy,
        search_path: Option<String>,
    ) -> Self {
        Self {
            source,
            extractor,
            policy,
            search_path,
        }
    }

    async fn open(&self, ctx: &RequestContext) -> Result<RoleSession, AppError> {
        let role = self.extractor.role_for(ctx);
        RoleSession::open(
            self.source.as_ref(),
            role.as_deref(),
            self.search_path.as_deref(),
            &self.policy,
        )
        .await
    }
}

#[async_trait]
impl QueryExecutor for RoleSecuredExecutor {
    async fn query(
        &self,
        ctx: &RequestContext,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<Row>, AppError> {
        let session = self.open(ctx).await?;
        let result = session.conn().query(sql, params).await;
        finish(session, result).await
    }

    async fn exec(
        &self,
        ctx: &RequestContext,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<u64, AppError> {
        let session = self.open(ctx).await?;
        let result = session.conn().execute(sql, params).await;
        finish(session, result).await
    }

    async fn begin_tx(&self, ctx: &RequestContext) -> Result<ExecTx, AppError> {
        ExecTx::begin(self.open(ctx).await?).await
    }
}

/// Runs everything as the pool's own login role
pub struct UnrestrictedExecutor {
    source: Arc<dyn SessionSource>,
    search_path: Option<String>,
}

impl UnrestrictedExecutor {
    pub fn new(source: Arc<dyn SessionSource>, search_path: Option<String>) -> Self {
        Self { source, search_path }
    }

    async fn open(&self) -> Result<RoleSession, AppError> {
        RoleSession::open(
            self.source.as_ref(),
            None,
            self.search_path.as_deref(),
            &RolePolicy::default(),
        )
        .await
    }
}

#[async_trait]
impl QueryExecutor for UnrestrictedExecutor {
    async fn query(
        &self,
        _ctx: &RequestContext,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<Row>, AppError> {
        let session = self.open().await?;
        let result = session.conn().query(sql, params).await;
        finish(session, result).await
    }

    async fn exec(
        &self,
        _ctx: &RequestContext,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<u64, AppError> {
        let session = self.open().await?;
        let result = session.conn().execute(sql, params).await;
        finish(session, result).await
    }

    async fn begin_tx(&self, _ctx: &RequestContext) -> Result<ExecTx, AppError> {
        ExecTx::begin(self.open().await?).await
    }
}
