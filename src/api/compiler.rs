//! Schema compiler
//!
//! Turns a built [`DbSchema`] into the API callers see: a catalog of types,
//! fields and edges, plus the axum router that serves it. Rows are read
//! through the injected [`QueryExecutor`], so every read runs under the
//! caller's database role when role security is on.

use crate::api::filter::SchemaFilter;
use crate::api::naming::NamingRules;
use crate::api::relationships::RelationshipKind;
use crate::config::QueryLimits;
use crate::db::queries::SqlBuilder;
use crate::error::{ApiResult, AppError};
use crate::executor::{QueryExecutor, RequestContext};
use crate::introspection::DbSchema;
use crate::junction::JunctionKind;
use axum::{
    extract::{Extension, State},
    routing::get,
    Json, Router,
};
use postgres_types::ToSql;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

// ==================== Catalog ====================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiCatalog {
    pub schema: String,
    pub types: Vec<ApiType>,
    pub limits: QueryLimits,
}

impl ApiCatalog {
    pub fn find(&self, type_name: &str) -> Option<&ApiType> {
        self.types.iter().find(|t| t.name == type_name)
    }

    /// Requested page size clamped to the configured limits
    pub fn page_size(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.limits.default_page_size)
            .clamp(1, self.limits.max_page_size)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiType {
    pub name: String,
    pub table: String,
    pub is_view: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub junction: Option<JunctionKind>,
    pub fields: Vec<ApiField>,
    pub edges: Vec<ApiEdge>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiField {
    pub name: String,
    pub column: String,
    pub data_type: String,
    pub nullable: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiEdge {
    pub name: String,
    pub kind: RelationshipKind,
    /// Target type name
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub via: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<String>,
}

/// Compiler output: the catalog and the router serving it
#[derive(Clone)]
pub struct CompiledSchema {
    pub catalog: Arc<ApiCatalog>,
    pub router: Router,
}

/// Compiles a schema into a servable API
pub trait SchemaCompiler: Send + Sync {
    fn compile(
        &self,
        executor: Arc<dyn QueryExecutor>,
        schema: &DbSchema,
        limits: &QueryLimits,
        filter: &SchemaFilter,
        naming: &dyn NamingRules,
    ) -> Result<CompiledSchema, AppError>;
}

/// JSON catalog API over the relationship graph
#[derive(Debug, Clone, Copy, Default)]
pub struct CatalogCompiler;

impl SchemaCompiler for CatalogCompiler {
    fn compile(
        &self,
        executor: Arc<dyn QueryExecutor>,
        schema: &DbSchema,
        limits: &QueryLimits,
        filter: &SchemaFilter,
        naming: &dyn NamingRules,
    ) -> Result<CompiledSchema, AppError> {
        let catalog = Arc::new(build_catalog(schema, limits, filter, naming)?);
        debug!(
            schema = %catalog.schema,
            types = catalog.types.len(),
            "Compiled API catalog"
        );

        let service = Arc::new(ApiService {
            catalog: catalog.clone(),
            executor,
        });
        let router = Router::new()
            .route("/", get(get_catalog).post(fetch_rows))
            .with_state(service);

        Ok(CompiledSchema { catalog, router })
    }
}

pub fn build_catalog(
    schema: &DbSchema,
    limits: &QueryLimits,
    filter: &SchemaFilter,
    naming: &dyn NamingRules,
) -> Result<ApiCatalog, AppError> {
    let mut types: Vec<ApiType> = Vec::new();
    let mut by_table: HashMap<&str, usize> = HashMap::new();
    let mut taken: HashSet<String> = HashSet::new();

    for table in &schema.tables {
        let junction = schema.junctions.get(&table.name).map(|j| j.kind);
        // Pure junctions only exist as many-to-many edges
        if junction == Some(JunctionKind::Pure) || !filter.table_allowed(&table.name) {
            continue;
        }

        let fields: Vec<ApiField> = table
            .columns
            .iter()
            .filter(|c| filter.column_allowed(&table.name, &c.name))
            .map(|c| ApiField {
                name: naming.field_name(&c.name),
                column: c.name.clone(),
                data_type: c.data_type.clone(),
                nullable: c.nullable,
            })
            .collect();
        if fields.is_empty() {
            warn!("Table {} has no visible columns, not exposed", table.name);
            continue;
        }

        let name = naming.type_name(&table.name);
        if !taken.insert(name.clone()) {
            return Err(AppError::build(
                "compile",
                format!("type name {} is derived from more than one table", name),
            ));
        }

        by_table.insert(table.name.as_str(), types.len());
        types.push(ApiType {
            name,
            table: table.name.clone(),
            is_view: table.is_view,
            junction,
            fields,
            edges: Vec::new(),
        });
    }

    for rel in &schema.relationships {
        let (Some(&from), Some(&to)) = (
            by_table.get(rel.from_table.as_str()),
            by_table.get(rel.to_table.as_str()),
        ) else {
            continue;
        };

        let key_visible = match (rel.kind, &rel.fk_column) {
            (RelationshipKind::ManyToOne, Some(col)) => filter.column_allowed(&rel.from_table, col),
            (RelationshipKind::OneToMany, Some(col)) => filter.column_allowed(&rel.to_table, col),
            _ => rel.via.as_deref().map_or(true, |via| filter.table_allowed(via)),
        };
        if !key_visible {
            continue;
        }

        let target = types[to].name.clone();
        types[from].edges.push(ApiEdge {
            name: rel.field_name.clone(),
            kind: rel.kind,
            target,
            via: rel.via.clone(),
            attributes: rel.attributes.clone(),
        });
    }

    Ok(ApiCatalog {
        schema: schema.name.clone(),
        types,
        limits: *limits,
    })
}

// ==================== Router ====================

struct ApiService {
    catalog: Arc<ApiCatalog>,
    executor: Arc<dyn QueryExecutor>,
}

#[derive(Debug, Deserialize)]
pub struct RowsRequest {
    #[serde(rename = "type")]
    pub type_name: String,
    pub limit: Option<u32>,
}

async fn get_catalog(State(api): State<Arc<ApiService>>) -> Json<Value> {
    Json(json!({
        "success": true,
        "catalog": &*api.catalog,
    }))
}

async fn fetch_rows(
    State(api): State<Arc<ApiService>>,
    Extension(ctx): Extension<RequestContext>,
    Json(request): Json<RowsRequest>,
) -> ApiResult<Json<Value>> {
    let api_type = api
        .catalog
        .find(&request.type_name)
        .ok_or_else(|| AppError::NotFound(format!("Unknown type '{}'", request.type_name)))?;

    let limit = i64::from(api.catalog.page_size(request.limit));
    let columns: Vec<&str> = api_type.fields.iter().map(|f| f.column.as_str()).collect();
    let sql = SqlBuilder::select_json(&api.catalog.schema, &api_type.table, &columns);

    let params: [&(dyn ToSql + Sync); 1] = [&limit];
    let rows = api.executor.query(&ctx, &sql, &params).await?;

    let field_of: HashMap<&str, &str> = api_type
        .fields
        .iter()
        .map(|f| (f.column.as_str(), f.name.as_str()))
        .collect();

    let mut items = Vec::with_capacity(rows.len());
    for row in &rows {
        let doc: Value = row.try_get(0)?;
        items.push(rename_keys(doc, &field_of));
    }

    Ok(Json(json!({
        "success": true,
        "type": api_type.name,
        "count": items.len(),
        "rows": items,
    })))
}

/// Column-keyed row object to field-keyed
fn rename_keys(doc: Value, field_of: &HashMap<&str, &str>) -> Value {
    match doc {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| {
                    let key = field_of.get(k.as_str()).map_or(k.clone(), |f| f.to_string());
                    (key, v)
                })
                .collect::<Map<String, Value>>(),
        ),
        other => other,
    }
}
