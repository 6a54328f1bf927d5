//! Table and column visibility rules

use crate::config::{ConfigError, FilterConfig};
use regex::Regex;

/// Compiled allow/deny patterns. Patterns must match the whole name.
#[derive(Debug, Clone, Default)]
pub struct SchemaFilter {
    include_tables: Vec<Regex>,
    exclude_tables: Vec<Regex>,
    exclude_columns: Vec<Regex>,
}

impl SchemaFilter {
    pub fn from_config(config: &FilterConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            include_tables: compile_all(&config.include_tables)?,
            exclude_tables: compile_all(&config.exclude_tables)?,
            exclude_columns: compile_all(&config.exclude_columns)?,
        })
    }

    /// Included (or no include list) and not excluded
    pub fn table_allowed(&self, table: &str) -> bool {
        let included =
            self.include_tables.is_empty() || self.include_tables.iter().any(|re| re.is_match(table));
        included && !self.exclude_tables.iter().any(|re| re.is_match(table))
    }

    pub fn column_allowed(&self, table: &str, column: &str) -> bool {
        let qualified = format!("{}.{}", table, column);
        !self.exclude_columns.iter().any(|re| re.is_match(&qualified))
    }
}

fn compile_all(patterns: &[String]) -> Result<Vec<Regex>, ConfigError> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(&format!("^(?:{})$", p))
                .map_err(|e| ConfigError::InvalidValue(format!("bad filter pattern '{}': {}", p, e)))
        })
        .collect()
}
