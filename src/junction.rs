//! Junction table detection
//!
//! Decides which tables implement a many-to-many relationship and whether
//! they carry extra attribute columns. Classification depends on the shape
//! of the table alone, so the same schema always yields the same result.

use crate::introspection::{DbSchema, ForeignKey, Table};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// How a table participates in many-to-many relationships
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JunctionKind {
    #[default]
    NotJunction,
    /// Only the two foreign-key columns
    Pure,
    /// Foreign-key pair plus attribute columns
    Attribute,
}

/// Classification result for one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JunctionInfo {
    pub table: String,
    pub kind: JunctionKind,
    /// Foreign key whose referenced table sorts first
    pub left_fk: Option<ForeignKey>,
    pub right_fk: Option<ForeignKey>,
    /// Non-FK columns in declaration order
    pub attributes: Vec<String>,
}

impl JunctionInfo {
    fn not_junction(table: &str) -> Self {
        Self {
            table: table.to_string(),
            kind: JunctionKind::NotJunction,
            left_fk: None,
            right_fk: None,
            attributes: Vec::new(),
        }
    }

    pub fn is_junction(&self) -> bool {
        self.kind != JunctionKind::NotJunction
    }
}

/// Classify every table of the schema, keeping junctions only
pub fn classify_junctions(schema: &DbSchema) -> BTreeMap<String, JunctionInfo> {
    let known: HashSet<&str> = schema.tables.iter().map(|t| t.name.as_str()).collect();

    schema
        .tables
        .iter()
        .map(|table| classify_table(table, &known))
        .filter(JunctionInfo::is_junction)
        .map(|info| (info.table.clone(), info))
        .collect()
}

/// Classify a single table against the set of table names in its schema
pub fn classify_table(table: &Table, known_tables: &HashSet<&str>) -> JunctionInfo {
    let rejected = || JunctionInfo::not_junction(&table.name);

    if table.is_view {
        return rejected();
    }

    let [first, second] = match table.foreign_keys.as_slice() {
        [a, b] => [a, b],
        _ => return rejected(),
    };

    // Self-referential pairs describe hierarchies, not many-to-many links
    if first.referenced_table == second.referenced_table {
        return rejected();
    }

    if !known_tables.contains(first.referenced_table.as_str())
        || !known_tables.contains(second.referenced_table.as_str())
    {
        return rejected();
    }

    let not_null = |fk: &ForeignKey| table.column(&fk.column).is_some_and(|c| !c.nullable);
    if !not_null(first) || !not_null(second) {
        return rejected();
    }

    if !pair_is_unique(table, &first.column, &second.column) {
        return rejected();
    }

    let attributes: Vec<String> = table
        .columns
        .iter()
        .filter(|c| c.name != first.column && c.name != second.column)
        .map(|c| c.name.clone())
        .collect();

    let (left, right) = if first.referenced_table <= second.referenced_table {
        (first, second)
    } else {
        (second, first)
    };

    JunctionInfo {
        table: table.name.clone(),
        kind: if attributes.is_empty() {
            JunctionKind::Pure
        } else {
            JunctionKind::Attribute
        },
        left_fk: Some(left.clone()),
        right_fk: Some(right.clone()),
        attributes,
    }
}

/// True if the primary key or a full (non-partial) unique index covers both columns
fn pair_is_unique(table: &Table, a: &str, b: &str) -> bool {
    let covers = |cols: &[String]| cols.iter().any(|c| c == a) && cols.iter().any(|c| c == b);

    covers(&table.primary_key)
        || table
            .indexes
            .iter()
            .any(|idx| (idx.is_unique || idx.is_primary) && !idx.is_partial && covers(&idx.columns))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::introspection::{Column, Index};
    use pretty_assertions::assert_eq;

    fn column(name: &str, nullable: bool) -> Column {
        Column {
            name: name.to_string(),
            data_type: "int4".to_string(),
            nullable,
            default_value: None,
            ordinal: 0,
            max_length: None,
            original_type: None,
        }
    }

    fn fk(column: &str, table: &str) -> ForeignKey {
        ForeignKey {
            constraint_name: format!("{}_fkey", column),
            column: column.to_string(),
            referenced_table: table.to_string(),
            referenced_column: "id".to_string(),
        }
    }

    fn entity(name: &str) -> Table {
        Table {
            name: name.to_string(),
            columns: vec![column("id", false)],
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
            primary_key: vec!["id".to_string()],
            is_view: false,
        }
    }

    fn link_table() -> Table {
        Table {
            name: "post_tags".to_string(),
            columns: vec![column("tag_id", false), column("post_id", false)],
            indexes: Vec::new(),
            foreign_keys: vec![fk("tag_id", "tags"), fk("post_id", "posts")],
            primary_key: vec!["tag_id".to_string(), "post_id".to_string()],
            is_view: false,
        }
    }

    fn schema(tables: Vec<Table>) -> DbSchema {
        DbSchema {
            name: "public".to_string(),
            tables,
            ..DbSchema::default()
        }
    }

    #[test]
    fn test_pure_junction() {
        let junctions = classify_junctions(&schema(vec![entity("posts"), entity("tags"), link_table()]));

        let info = &junctions["post_tags"];
        assert_eq!(info.kind, JunctionKind::Pure);
        assert!(info.attributes.is_empty());
        assert_eq!(info.left_fk.as_ref().unwrap().referenced_table, "posts");
        assert_eq!(info.right_fk.as_ref().unwrap().referenced_table, "tags");
        assert_eq!(junctions.len(), 1);
    }

    #[test]
    fn test_extra_column_makes_attribute_junction() {
        let mut link = link_table();
        link.columns.push(column("tagged_at", true));

        let junctions = classify_junctions(&schema(vec![entity("posts"), entity("tags"), link]));

        let info = &junctions["post_tags"];
        assert_eq!(info.kind, JunctionKind::Attribute);
        assert_eq!(info.attributes, vec!["tagged_at".to_string()]);
    }

    #[test]
    fn test_order_independence() {
        let mut reversed = link_table();
        reversed.foreign_keys.reverse();
        reversed.columns.reverse();

        let a = classify_junctions(&schema(vec![entity("posts"), entity("tags"), link_table()]));
        let b = classify_junctions(&schema(vec![reversed, entity("tags"), entity("posts")]));

        assert_eq!(a["post_tags"].left_fk, b["post_tags"].left_fk);
        assert_eq!(a["post_tags"].right_fk, b["post_tags"].right_fk);
        assert_eq!(a["post_tags"].kind, b["post_tags"].kind);
    }

    #[test]
    fn test_self_referential_pair_is_never_junction() {
        let follows = Table {
            name: "follows".to_string(),
            columns: vec![column("follower_id", false), column("followee_id", false)],
            indexes: vec![Index {
                name: "follows_pair".to_string(),
                columns: vec!["follower_id".to_string(), "followee_id".to_string()],
                is_unique: true,
                is_primary: false,
                is_partial: false,
            }],
            foreign_keys: vec![fk("follower_id", "users"), fk("followee_id", "users")],
            primary_key: vec!["follower_id".to_string(), "followee_id".to_string()],
            is_view: false,
        };

        let junctions = classify_junctions(&schema(vec![entity("users"), follows]));
        assert!(junctions.is_empty());
    }

    #[test]
    fn test_rejections() {
        let known = schema(vec![entity("posts"), entity("tags")]);
        let names: HashSet<&str> = known.tables.iter().map(|t| t.name.as_str()).collect();

        // nullable foreign key column
        let mut nullable = link_table();
        nullable.columns[0].nullable = true;
        assert_eq!(classify_table(&nullable, &names).kind, JunctionKind::NotJunction);

        // no constraint covering both columns
        let mut unconstrained = link_table();
        unconstrained.primary_key = vec!["tag_id".to_string()];
        assert_eq!(classify_table(&unconstrained, &names).kind, JunctionKind::NotJunction);

        // referenced table missing from the schema
        let mut dangling = link_table();
        dangling.foreign_keys[0].referenced_table = "archived_tags".to_string();
        assert_eq!(classify_table(&dangling, &names).kind, JunctionKind::NotJunction);

        // three foreign keys
        let mut triple = link_table();
        triple.columns.push(column("user_id", false));
        triple.foreign_keys.push(fk("user_id", "posts"));
        assert_eq!(classify_table(&triple, &names).kind, JunctionKind::NotJunction);

        // views are never junctions
        let mut view = link_table();
        view.is_view = true;
        assert_eq!(classify_table(&view, &names).kind, JunctionKind::NotJunction);
    }

    #[test]
    fn test_unique_index_superset_qualifies() {
        let mut link = link_table();
        link.primary_key = Vec::new();
        link.columns.push(column("position", false));
        link.indexes.push(Index {
            name: "post_tags_unique".to_string(),
            columns: vec!["post_id".to_string(), "tag_id".to_string(), "position".to_string()],
            is_unique: true,
            is_primary: false,
            is_partial: false,
        });

        let known = schema(vec![entity("posts"), entity("tags")]);
        let names: HashSet<&str> = known.tables.iter().map(|t| t.name.as_str()).collect();
        let info = classify_table(&link, &names);
        assert_eq!(info.kind, JunctionKind::Attribute);
        assert_eq!(info.attributes, vec!["position".to_string()]);
    }

    #[test]
    fn test_partial_unique_index_does_not_qualify() {
        let mut link = link_table();
        link.primary_key = vec!["id".to_string()];
        link.columns.push(column("id", false));
        link.indexes.push(Index {
            name: "post_tags_live".to_string(),
            columns: vec!["post_id".to_string(), "tag_id".to_string()],
            is_unique: true,
            is_primary: false,
            is_partial: true,
        });

        let known = schema(vec![entity("posts"), entity("tags")]);
        let names: HashSet<&str> = known.tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(classify_table(&link, &names).kind, JunctionKind::NotJunction);

        link.indexes[0].is_partial = false;
        assert_eq!(classify_table(&link, &names).kind, JunctionKind::Attribute);
    }
}
