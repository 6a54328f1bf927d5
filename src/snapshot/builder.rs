//! Snapshot assembly
//!
//! introspect -> type overrides -> junctions -> relationships -> compile.
//! Any stage failing fails the whole build.

use crate::api::{rebuild_relationships, CompiledSchema, NamingRules, SchemaCompiler, SchemaFilter};
use crate::config::{OverrideConfig, QueryLimits};
use crate::db::SessionSource;
use crate::error::AppError;
use crate::executor::{QueryExecutor, RolePolicy, RoleSession};
use crate::fingerprint::{compute_fingerprint, FingerprintDetails};
use crate::introspection::{DbSchema, Introspector};
use crate::junction::classify_junctions;
use crate::snapshot::overrides::apply_type_overrides;
use crate::snapshot::{Snapshot, SnapshotSet};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Collaborators and settings a build needs
pub struct SnapshotBuilder {
    pub source: Arc<dyn SessionSource>,
    pub introspector: Arc<dyn Introspector>,
    pub compiler: Arc<dyn SchemaCompiler>,
    pub naming: Arc<dyn NamingRules>,
    /// Executor handed to every compiled API
    pub executor: Arc<dyn QueryExecutor>,
    pub filter: SchemaFilter,
    pub overrides: OverrideConfig,
    pub limits: QueryLimits,
    /// Namespace to introspect
    pub schema: String,
    /// Applied to roles used for introspection
    pub policy: RolePolicy,
}

impl SnapshotBuilder {
    /// Fingerprint the live schema over a plain session
    pub async fn fingerprint(&self) -> Result<FingerprintDetails, AppError> {
        let session = self.source.acquire().await?;
        compute_fingerprint(session.as_ref(), &self.schema).await
    }

    /// Build the schema and its compiled API, introspecting as `role`
    pub async fn build_schema(&self, role: Option<&str>) -> Result<(DbSchema, CompiledSchema), AppError> {
        let session = RoleSession::open(self.source.as_ref(), role, None, &self.policy).await?;
        let introspected = self.introspector.introspect(session.conn(), &self.schema).await;
        if let Err(e) = session.close().await {
            warn!("Introspection session cleanup failed: {}", e);
        }
        let mut schema = introspected.map_err(|e| AppError::build("introspect", e))?;

        apply_type_overrides(&mut schema, &self.overrides);
        schema.junctions = classify_junctions(&schema);
        schema.relationships = rebuild_relationships(&schema, &schema.junctions, self.naming.as_ref());

        let compiled = self
            .compiler
            .compile(
                self.executor.clone(),
                &schema,
                &self.limits,
                &self.filter,
                self.naming.as_ref(),
            )
            .map_err(|e| AppError::build("compile", e))?;

        debug!(
            role = role.unwrap_or("default"),
            tables = schema.tables.len(),
            junctions = schema.junctions.len(),
            relationships = schema.relationships.len(),
            "Built schema"
        );
        Ok((schema, compiled))
    }

    async fn build_snapshot(&self, role: Option<&str>, fingerprint: &str) -> Result<Snapshot, AppError> {
        let (schema, compiled) = self.build_schema(role).await?;
        Ok(Snapshot {
            role: role.map(str::to_string),
            compiled,
            schema: Arc::new(schema),
            built_at: Utc::now(),
            fingerprint: fingerprint.to_string(),
        })
    }

    /// Build the default snapshot and one per role. The fingerprint is
    /// taken first so a change racing the build is caught on the next poll.
    pub async fn build_set(&self, roles: &[String], version: u64) -> Result<SnapshotSet, AppError> {
        let fingerprint = self.fingerprint().await?;

        let default = self.build_snapshot(None, &fingerprint.value).await?;
        let mut by_role = BTreeMap::new();
        for role in roles {
            let snapshot = self
                .build_snapshot(Some(role), &fingerprint.value)
                .await
                .map_err(|e| AppError::build(&format!("role {}", role), e))?;
            by_role.insert(role.clone(), Arc::new(snapshot));
        }

        Ok(SnapshotSet {
            version,
            build_id: Uuid::new_v4(),
            default: Arc::new(default),
            by_role,
            fingerprint,
            built_at: Utc::now(),
        })
    }
}
