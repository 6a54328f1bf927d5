//! Relationship graph
//!
//! Turns foreign keys into navigable edges. Junction tables contribute a
//! many-to-many edge in each direction instead of their own foreign-key
//! edges; attribute junctions carry their extra columns on that edge.

use crate::api::naming::NamingRules;
use crate::introspection::DbSchema;
use crate::junction::JunctionInfo;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    ManyToOne,
    OneToMany,
    ManyToMany,
}

/// Edge from one table to another, exposed as a field on `from_table`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    pub kind: RelationshipKind,
    pub from_table: String,
    pub to_table: String,
    pub field_name: String,
    /// Column on `from_table` (many-to-one) or on `to_table` (one-to-many)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fk_column: Option<String>,
    /// Junction table for many-to-many edges
    #[serde(skip_serializing_if = "Option::is_none")]
    pub via: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<String>,
}

/// Field names handed out so far, per table
struct FieldNames<'a> {
    naming: &'a dyn NamingRules,
    used: HashMap<String, HashSet<String>>,
}

impl<'a> FieldNames<'a> {
    fn new(schema: &DbSchema, naming: &'a dyn NamingRules) -> Self {
        let used = schema
            .tables
            .iter()
            .map(|t| {
                let columns = t.columns.iter().map(|c| naming.field_name(&c.name)).collect();
                (t.name.clone(), columns)
            })
            .collect();
        Self { naming, used }
    }

    /// `base` if free on `table`, otherwise a qualified variant, otherwise
    /// a numbered one
    fn claim(&mut self, table: &str, base: String, qualifier: &str) -> String {
        let used = self.used.entry(table.to_string()).or_default();
        let mut name = base.clone();
        if used.contains(&name) {
            name = self.naming.disambiguate(&base, qualifier);
        }
        let stem = name.clone();
        let mut n = 2;
        while used.contains(&name) {
            name = format!("{}{}", stem, n);
            n += 1;
        }
        used.insert(name.clone());
        name
    }
}

/// Rebuild every relationship of the schema from its foreign keys and
/// junction classification
pub fn rebuild_relationships(
    schema: &DbSchema,
    junctions: &BTreeMap<String, JunctionInfo>,
    naming: &dyn NamingRules,
) -> Vec<Relationship> {
    let known: HashSet<&str> = schema.tables.iter().map(|t| t.name.as_str()).collect();
    let mut names = FieldNames::new(schema, naming);
    let mut relationships = Vec::new();

    for table in &schema.tables {
        if junctions.contains_key(&table.name) {
            continue;
        }
        for fk in &table.foreign_keys {
            if !known.contains(fk.referenced_table.as_str()) {
                continue;
            }

            let field = names.claim(
                &table.name,
                naming.reference_field(&fk.column, &fk.referenced_table),
                &fk.referenced_table,
            );
            relationships.push(Relationship {
                kind: RelationshipKind::ManyToOne,
                from_table: table.name.clone(),
                to_table: fk.referenced_table.clone(),
                field_name: field,
                fk_column: Some(fk.column.clone()),
                via: None,
                attributes: Vec::new(),
            });

            let back = names.claim(&fk.referenced_table, naming.list_field(&table.name), &fk.column);
            relationships.push(Relationship {
                kind: RelationshipKind::OneToMany,
                from_table: fk.referenced_table.clone(),
                to_table: table.name.clone(),
                field_name: back,
                fk_column: Some(fk.column.clone()),
                via: None,
                attributes: Vec::new(),
            });
        }
    }

    for info in junctions.values() {
        let (Some(left), Some(right)) = (&info.left_fk, &info.right_fk) else {
            continue;
        };
        for (from, to) in [(left, right), (right, left)] {
            let field = names.claim(
                &from.referenced_table,
                naming.list_field(&to.referenced_table),
                &info.table,
            );
            relationships.push(Relationship {
                kind: RelationshipKind::ManyToMany,
                from_table: from.referenced_table.clone(),
                to_table: to.referenced_table.clone(),
                field_name: field,
                fk_column: None,
                via: Some(info.table.clone()),
                attributes: info.attributes.clone(),
            });
        }
    }

    relationships
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::naming::DefaultNaming;
    use crate::introspection::{Column, ForeignKey, Table};
    use crate::junction::classify_junctions;
    use pretty_assertions::assert_eq;

    fn column(name: &str) -> Column {
        Column {
            name: name.to_string(),
            data_type: "int4".to_string(),
            nullable: false,
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

    fn table(name: &str, columns: &[&str], fks: Vec<ForeignKey>, pk: &[&str]) -> Table {
        Table {
            name: name.to_string(),
            columns: columns.iter().map(|c| column(c)).collect(),
            indexes: Vec::new(),
            foreign_keys: fks,
            primary_key: pk.iter().map(|c| c.to_string()).collect(),
            is_view: false,
        }
    }

    fn blog() -> DbSchema {
        DbSchema {
            name: "public".to_string(),
            tables: vec![
                table("users", &["id", "name"], vec![], &["id"]),
                table(
                    "posts",
                    &["id", "author_id", "editor_id"],
                    vec![fk("author_id", "users"), fk("editor_id", "users")],
                    &["id"],
                ),
                table("tags", &["id"], vec![], &["id"]),
                table(
                    "post_tags",
                    &["post_id", "tag_id", "weight"],
                    vec![fk("post_id", "posts"), fk("tag_id", "tags")],
                    &["post_id", "tag_id"],
                ),
            ],
            ..DbSchema::default()
        }
    }

    fn field<'a>(rels: &'a [Relationship], from: &str, name: &str) -> Option<&'a Relationship> {
        rels.iter().find(|r| r.from_table == from && r.field_name == name)
    }

    #[test]
    fn test_foreign_keys_become_edges_both_ways() {
        let schema = blog();
        let rels = rebuild_relationships(&schema, &classify_junctions(&schema), &DefaultNaming);

        let author = field(&rels, "posts", "author").unwrap();
        assert_eq!(author.kind, RelationshipKind::ManyToOne);
        assert_eq!(author.to_table, "users");

        assert!(field(&rels, "posts", "editor").is_some());
        assert_eq!(field(&rels, "users", "posts").unwrap().fk_column.as_deref(), Some("author_id"));
        assert_eq!(
            field(&rels, "users", "postsByEditorId").unwrap().fk_column.as_deref(),
            Some("editor_id")
        );
    }

    #[test]
    fn test_junction_becomes_many_to_many() {
        let schema = blog();
        let rels = rebuild_relationships(&schema, &classify_junctions(&schema), &DefaultNaming);

        let tags = field(&rels, "posts", "tags").unwrap();
        assert_eq!(tags.kind, RelationshipKind::ManyToMany);
        assert_eq!(tags.via.as_deref(), Some("post_tags"));
        assert_eq!(tags.attributes, vec!["weight".to_string()]);
        assert!(field(&rels, "tags", "posts").is_some());

        // junction foreign keys are not exposed as their own edges
        assert!(rels.iter().all(|r| r.from_table != "post_tags" && r.to_table != "post_tags"));
    }

    #[test]
    fn test_reference_field_yields_to_column_names() {
        let mut schema = blog();
        schema.tables[1].columns.push(column("author"));
        let rels = rebuild_relationships(&schema, &BTreeMap::new(), &DefaultNaming);

        assert!(field(&rels, "posts", "author").is_none());
        assert!(field(&rels, "posts", "authorByUsers").is_some());
    }

    #[test]
    fn test_rebuild_is_deterministic() {
        let schema = blog();
        let junctions = classify_junctions(&schema);
        assert_eq!(
            rebuild_relationships(&schema, &junctions, &DefaultNaming),
            rebuild_relationships(&schema, &junctions, &DefaultNaming)
        );
    }
}
