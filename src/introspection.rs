//! Schema Introspection Module
//!
//! Reads the live database catalog into a [`DbSchema`]. The schema is
//! rebuilt from scratch on every snapshot build and never mutated once the
//! builder hands it off.

use crate::api::relationships::Relationship;
use crate::db::queries::{
    SqlBuilder, INTROSPECT_COLUMNS, INTROSPECT_FOREIGN_KEYS, INTROSPECT_INDEXES, INTROSPECT_TABLES,
};
use crate::db::{MetadataQueryer, PooledSession};
use crate::error::AppError;
use crate::junction::JunctionInfo;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Introspected database schema
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbSchema {
    /// Namespace the tables were read from
    pub name: String,
    pub tables: Vec<Table>,
    /// Junction tables by name (junctions only)
    #[serde(default)]
    pub junctions: BTreeMap<String, JunctionInfo>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

impl DbSchema {
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }
}

/// Table or view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    #[serde(default)]
    pub indexes: Vec<Index>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
    /// Primary key columns in key order, empty when there is none
    #[serde(default)]
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub is_view: bool,
}

impl Table {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Column representation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    pub ordinal: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<i32>,
    /// Catalog type before an override reinterpreted it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_type: Option<String>,
}

/// Single-column foreign key; composite keys yield one entry per column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKey {
    pub constraint_name: String,
    pub column: String,
    pub referenced_table: String,
    pub referenced_column: String,
}

/// Index representation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Index {
    pub name: String,
    pub columns: Vec<String>,
    pub is_unique: bool,
    pub is_primary: bool,
    /// Carries a WHERE predicate, so uniqueness holds only for some rows
    #[serde(default)]
    pub is_partial: bool,
}

/// Reads a schema over a session
#[async_trait]
pub trait Introspector: Send + Sync {
    async fn introspect(&self, conn: &dyn PooledSession, schema: &str) -> Result<DbSchema, AppError>;
}

// Catalog rows as returned by the introspection queries

#[derive(Debug, Deserialize)]
struct TableRow {
    name: String,
    is_view: bool,
}

#[derive(Debug, Deserialize)]
struct ColumnRow {
    table: String,
    name: String,
    data_type: String,
    nullable: bool,
    default_value: Option<String>,
    ordinal: i32,
    max_length: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct IndexRow {
    table: String,
    name: String,
    is_unique: bool,
    is_primary: bool,
    #[serde(default)]
    is_partial: bool,
    columns: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ForeignKeyRow {
    constraint_name: String,
    table: String,
    column: String,
    referenced_table: String,
    referenced_column: String,
}

/// Schema introspector for PostgreSQL
pub struct PostgresIntrospector;

#[async_trait]
impl Introspector for PostgresIntrospector {
    async fn introspect(&self, conn: &dyn PooledSession, schema: &str) -> Result<DbSchema, AppError> {
        let tables: Vec<TableRow> = fetch_json(conn, "tables", INTROSPECT_TABLES, schema).await?;
        let columns: Vec<ColumnRow> = fetch_json(conn, "columns", INTROSPECT_COLUMNS, schema).await?;
        let indexes: Vec<IndexRow> = fetch_json(conn, "indexes", INTROSPECT_INDEXES, schema).await?;
        let foreign_keys: Vec<ForeignKeyRow> =
            fetch_json(conn, "foreign keys", INTROSPECT_FOREIGN_KEYS, schema).await?;

        let tables = assemble(tables, columns, indexes, foreign_keys);

        debug!(
            "Introspected schema {} with {} tables",
            schema,
            tables.len()
        );

        Ok(DbSchema {
            name: schema.to_string(),
            tables,
            ..DbSchema::default()
        })
    }
}

/// Run a metadata query whose rows are single JSON documents
async fn fetch_json<T, Q>(conn: &Q, what: &str, template: &str, schema: &str) -> Result<Vec<T>, AppError>
where
    T: DeserializeOwned,
    Q: MetadataQueryer + ?Sized,
{
    let sql = SqlBuilder::bind_schema(template, schema);
    let rows = conn
        .text_rows(&sql)
        .await
        .map_err(|e| AppError::Introspection(format!("reading {}: {}", what, e)))?;

    rows.into_iter()
        .filter_map(|row| row.into_iter().next().flatten())
        .map(|doc| {
            serde_json::from_str(&doc)
                .map_err(|e| AppError::Introspection(format!("decoding {}: {}", what, e)))
        })
        .collect()
}

/// Attach columns, indexes and foreign keys to their tables, keeping the
/// catalog order of tables
fn assemble(
    tables: Vec<TableRow>,
    columns: Vec<ColumnRow>,
    indexes: Vec<IndexRow>,
    foreign_keys: Vec<ForeignKeyRow>,
) -> Vec<Table> {
    let mut by_name: HashMap<String, Table> = HashMap::new();
    let order: Vec<String> = tables.iter().map(|t| t.name.clone()).collect();

    for row in tables {
        by_name.insert(
            row.name.clone(),
            Table {
                name: row.name,
                columns: Vec::new(),
                indexes: Vec::new(),
                foreign_keys: Vec::new(),
                primary_key: Vec::new(),
                is_view: row.is_view,
            },
        );
    }

    for row in columns {
        if let Some(table) = by_name.get_mut(&row.table) {
            table.columns.push(Column {
                name: row.name,
                data_type: row.data_type,
                nullable: row.nullable,
                default_value: row.default_value,
                ordinal: row.ordinal,
                max_length: row.max_length,
                original_type: None,
            });
        }
    }

    for row in indexes {
        if let Some(table) = by_name.get_mut(&row.table) {
            if row.is_primary {
                table.primary_key = row.columns.clone();
            }
            table.indexes.push(Index {
                name: row.name,
                columns: row.columns,
                is_unique: row.is_unique,
                is_primary: row.is_primary,
                is_partial: row.is_partial,
            });
        }
    }

    for row in foreign_keys {
        if let Some(table) = by_name.get_mut(&row.table) {
            table.foreign_keys.push(ForeignKey {
                constraint_name: row.constraint_name,
                column: row.column,
                referenced_table: row.referenced_table,
                referenced_column: row.referenced_column,
            });
        }
    }

    let mut assembled: Vec<Table> = order
        .into_iter()
        .filter_map(|name| by_name.remove(&name))
        .collect();
    for table in &mut assembled {
        table.columns.sort_by_key(|c| c.ordinal);
    }
    assembled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::FakeSource;
    use crate::db::SessionSource;
    use pretty_assertions::assert_eq;

    fn doc(json: &str) -> Vec<Option<String>> {
        vec![Some(json.to_string())]
    }

    #[tokio::test]
    async fn test_introspect_assembles_tables() {
        let (source, log) = FakeSource::new();
        log.set_rows(
            "introspect:tables",
            vec![
                doc(r#"{"name":"authors","is_view":false}"#),
                doc(r#"{"name":"author_books","is_view":false}"#),
                doc(r#"{"name":"recent_books","is_view":true}"#),
            ],
        );
        log.set_rows(
            "introspect:columns",
            vec![
                doc(r#"{"table":"author_books","name":"book_id","data_type":"int4","nullable":false,"default_value":null,"ordinal":2,"max_length":null}"#),
                doc(r#"{"table":"author_books","name":"author_id","data_type":"int4","nullable":false,"default_value":null,"ordinal":1,"max_length":null}"#),
                doc(r#"{"table":"authors","name":"id","data_type":"int4","nullable":false,"default_value":"nextval('authors_id_seq'::regclass)","ordinal":1,"max_length":null}"#),
            ],
        );
        log.set_rows(
            "introspect:indexes",
            vec![
                doc(r#"{"table":"author_books","name":"author_books_pkey","is_unique":true,"is_primary":true,"is_partial":false,"columns":["author_id","book_id"]}"#),
                doc(r#"{"table":"author_books","name":"author_books_live","is_unique":true,"is_primary":false,"is_partial":true,"columns":["book_id"]}"#),
            ],
        );
        log.set_rows(
            "introspect:foreign_keys",
            vec![doc(
                r#"{"constraint_name":"author_books_author_id_fkey","table":"author_books","column":"author_id","referenced_table":"authors","referenced_column":"id"}"#,
            )],
        );

        let session = source.acquire().await.unwrap();
        let schema = PostgresIntrospector
            .introspect(session.as_ref(), "public")
            .await
            .unwrap();

        assert_eq!(schema.name, "public");
        let names: Vec<&str> = schema.tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["authors", "author_books", "recent_books"]);

        let junction = schema.table("author_books").unwrap();
        let cols: Vec<&str> = junction.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(cols, vec!["author_id", "book_id"]);
        assert_eq!(junction.primary_key, vec!["author_id", "book_id"]);
        assert!(!junction.indexes[0].is_partial);
        assert!(junction.indexes[1].is_partial);
        assert_eq!(junction.foreign_keys.len(), 1);
        assert!(schema.table("recent_books").unwrap().is_view);
    }

    #[tokio::test]
    async fn test_introspect_reports_query_failure() {
        let (source, log) = FakeSource::new();
        log.fail_on("/* introspect:columns */");

        let session = source.acquire().await.unwrap();
        let err = PostgresIntrospector
            .introspect(session.as_ref(), "public")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Introspection(_)));
    }

    #[tokio::test]
    async fn test_introspect_rejects_malformed_rows() {
        let (source, log) = FakeSource::new();
        log.set_rows("introspect:tables", vec![doc("{not json")]);

        let session = source.acquire().await.unwrap();
        let err = PostgresIntrospector
            .introspect(session.as_ref(), "public")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("decoding tables"));
    }
}
