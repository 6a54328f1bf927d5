//! Column type reinterpretation
//!
//! Some columns store a value whose logical type differs from the catalog
//! type (a `bytea` holding a UUID, a `bit(1)` used as a flag). Overrides
//! rewrite the exposed type and keep the catalog type in `original_type`.

use crate::config::OverrideConfig;
use crate::introspection::DbSchema;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalType {
    Uuid,
    Boolean,
    Integer,
}

impl LogicalType {
    /// Catalog type name the column is exposed as
    pub fn pg_type(&self) -> &'static str {
        match self {
            LogicalType::Uuid => "uuid",
            LogicalType::Boolean => "bool",
            LogicalType::Integer => "int4",
        }
    }
}

impl FromStr for LogicalType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "uuid" => Ok(LogicalType::Uuid),
            "boolean" | "bool" => Ok(LogicalType::Boolean),
            "integer" | "int" => Ok(LogicalType::Integer),
            other => Err(format!(
                "unknown column type '{}' (expected uuid, boolean or integer)",
                other
            )),
        }
    }
}

impl std::fmt::Display for LogicalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogicalType::Uuid => write!(f, "uuid"),
            LogicalType::Boolean => write!(f, "boolean"),
            LogicalType::Integer => write!(f, "integer"),
        }
    }
}

/// Reinterpret one column as a logical type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnOverride {
    pub table: String,
    pub column: String,
    pub as_type: LogicalType,
}

/// Apply the configured overrides in place, returning how many columns
/// were rewritten. Overrides naming a missing column are skipped.
pub fn apply_type_overrides(schema: &mut DbSchema, config: &OverrideConfig) -> usize {
    let mut applied = 0;

    if let Some(bit_type) = config.bit1_as {
        for table in &mut schema.tables {
            for column in &mut table.columns {
                if column.data_type == "bit" && column.max_length == Some(1) {
                    retype(column, bit_type);
                    applied += 1;
                }
            }
        }
    }

    // Explicit overrides win over the single-bit rule
    for rule in &config.columns {
        let target = schema
            .tables
            .iter_mut()
            .find(|t| t.name == rule.table)
            .and_then(|t| t.columns.iter_mut().find(|c| c.name == rule.column));

        match target {
            Some(column) => {
                retype(column, rule.as_type);
                applied += 1;
            }
            None => warn!(
                "Type override for {}.{} matches no column, skipping",
                rule.table, rule.column
            ),
        }
    }

    debug!(applied, "Applied column type overrides");
    applied
}

fn retype(column: &mut crate::introspection::Column, as_type: LogicalType) {
    if column.original_type.is_none() {
        column.original_type = Some(column.data_type.clone());
    }
    column.data_type = as_type.pg_type().to_string();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::introspection::{Column, Table};
    use pretty_assertions::assert_eq;

    fn column(name: &str, data_type: &str, max_length: Option<i32>) -> Column {
        Column {
            name: name.to_string(),
            data_type: data_type.to_string(),
            nullable: false,
            default_value: None,
            ordinal: 0,
            max_length,
            original_type: None,
        }
    }

    fn schema() -> DbSchema {
        DbSchema {
            name: "public".to_string(),
            tables: vec![Table {
                name: "devices".to_string(),
                columns: vec![
                    column("id", "bytea", None),
                    column("active", "bit", Some(1)),
                    column("mask", "bit", Some(8)),
                ],
                indexes: Vec::new(),
                foreign_keys: Vec::new(),
                primary_key: vec!["id".to_string()],
                is_view: false,
            }],
            ..DbSchema::default()
        }
    }

    #[test]
    fn test_logical_type_parsing() {
        assert_eq!("UUID".parse::<LogicalType>(), Ok(LogicalType::Uuid));
        assert_eq!("bool".parse::<LogicalType>(), Ok(LogicalType::Boolean));
        assert_eq!(" integer ".parse::<LogicalType>(), Ok(LogicalType::Integer));
        assert!("money".parse::<LogicalType>().is_err());
    }

    #[test]
    fn test_explicit_override_keeps_original_type() {
        let mut schema = schema();
        let config = OverrideConfig {
            columns: vec![ColumnOverride {
                table: "devices".to_string(),
                column: "id".to_string(),
                as_type: LogicalType::Uuid,
            }],
            bit1_as: None,
        };

        assert_eq!(apply_type_overrides(&mut schema, &config), 1);

        let id = schema.tables[0].column("id").unwrap();
        assert_eq!(id.data_type, "uuid");
        assert_eq!(id.original_type.as_deref(), Some("bytea"));
        assert_eq!(schema.tables[0].column("active").unwrap().data_type, "bit");
    }

    #[test]
    fn test_single_bit_rule_leaves_wider_bits_alone() {
        let mut schema = schema();
        let config = OverrideConfig {
            columns: Vec::new(),
            bit1_as: Some(LogicalType::Boolean),
        };

        assert_eq!(apply_type_overrides(&mut schema, &config), 1);
        let table = &schema.tables[0];
        assert_eq!(table.column("active").unwrap().data_type, "bool");
        assert_eq!(table.column("mask").unwrap().data_type, "bit");
    }

    #[test]
    fn test_explicit_override_beats_bit_rule() {
        let mut schema = schema();
        let config = OverrideConfig {
            columns: vec![ColumnOverride {
                table: "devices".to_string(),
                column: "active".to_string(),
                as_type: LogicalType::Integer,
            }],
            bit1_as: Some(LogicalType::Boolean),
        };

        apply_type_overrides(&mut schema, &config);
        let active = schema.tables[0].column("active").unwrap();
        assert_eq!(active.data_type, "int4");
        assert_eq!(active.original_type.as_deref(), Some("bit"));
    }

    #[test]
    fn test_unknown_target_is_skipped() {
        let mut schema = schema();
        let config = OverrideConfig {
            columns: vec![ColumnOverride {
                table: "gone".to_string(),
                column: "id".to_string(),
                as_type: LogicalType::Uuid,
            }],
            bit1_as: None,
        };
        assert_eq!(apply_type_overrides(&mut schema, &config), 0);
    }
}
