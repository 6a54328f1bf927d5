//! Schema fingerprinting
//!
//! Cheap drift detection. Structural mode hashes five catalog components
//! independently so two fingerprints can be compared component by
//! component; lightweight mode only hashes per-table identity and catalog
//! row versions and is used when the structural queries are unavailable.

use crate::db::queries::{
    SqlBuilder, FP_COLUMNS, FP_FOREIGN_KEYS, FP_INDEXES, FP_LIGHTWEIGHT, FP_PRIMARY_KEYS, FP_TABLES,
};
use crate::db::{MetadataQueryer, TextRow};
use crate::error::AppError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use tracing::{debug, warn};

/// Hex characters kept from each SHA-256 digest
pub const DIGEST_LEN: usize = 16;

/// Structural components and the queries that read them
const COMPONENTS: [(&str, &str); 5] = [
    ("tables", FP_TABLES),
    ("columns", FP_COLUMNS),
    ("primary_keys", FP_PRIMARY_KEYS),
    ("foreign_keys", FP_FOREIGN_KEYS),
    ("indexes", FP_INDEXES),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FingerprintMode {
    Structural,
    Lightweight,
    #[default]
    Unknown,
}

impl std::fmt::Display for FingerprintMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FingerprintMode::Structural => write!(f, "structural"),
            FingerprintMode::Lightweight => write!(f, "lightweight"),
            FingerprintMode::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FingerprintDetails {
    pub value: String,
    pub mode: FingerprintMode,
    /// Component name -> component digest (structural mode only)
    pub components: BTreeMap<String, String>,
}

impl FingerprintDetails {
    /// Names of the components that differ between two structural
    /// fingerprints. `None` when either side cannot attribute changes.
    pub fn changed_components(&self, other: &FingerprintDetails) -> Option<Vec<String>> {
        if self.mode != FingerprintMode::Structural || other.mode != FingerprintMode::Structural {
            return None;
        }

        let mut names: Vec<&String> = self.components.keys().chain(other.components.keys()).collect();
        names.sort();
        names.dedup();

        Some(
            names
                .into_iter()
                .filter(|name| self.components.get(*name) != other.components.get(*name))
                .cloned()
                .collect(),
        )
    }
}

/// Fingerprint the schema, falling back to lightweight mode when any
/// structural query fails
pub async fn compute_fingerprint<Q>(conn: &Q, schema: &str) -> Result<FingerprintDetails, AppError>
where
    Q: MetadataQueryer + ?Sized,
{
    match structural(conn, schema).await {
        Ok(details) => Ok(details),
        Err(structural_err) => {
            warn!(
                "Structural fingerprint unavailable, falling back to lightweight mode: {}",
                structural_err
            );
            lightweight(conn, schema).await.map_err(|lightweight_err| {
                AppError::Fingerprint(format!(
                    "structural: {}; lightweight: {}",
                    structural_err, lightweight_err
                ))
            })
        }
    }
}

async fn structural<Q>(conn: &Q, schema: &str) -> Result<FingerprintDetails, AppError>
where
    Q: MetadataQueryer + ?Sized,
{
    let mut components = BTreeMap::new();
    for (name, template) in COMPONENTS {
        let rows = conn.text_rows(&SqlBuilder::bind_schema(template, schema)).await?;
        components.insert(name.to_string(), hash_rows(&rows));
    }

    let value = combine(&components);
    debug!(fingerprint = %value, "Computed structural fingerprint");

    Ok(FingerprintDetails {
        value,
        mode: FingerprintMode::Structural,
        components,
    })
}

async fn lightweight<Q>(conn: &Q, schema: &str) -> Result<FingerprintDetails, AppError>
where
    Q: MetadataQueryer + ?Sized,
{
    let rows = conn
        .text_rows(&SqlBuilder::bind_schema(FP_LIGHTWEIGHT, schema))
        .await?;

    Ok(FingerprintDetails {
        value: hash_rows(&rows),
        mode: FingerprintMode::Lightweight,
        components: BTreeMap::new(),
    })
}

/// Length-prefix every cell as `<len>:<value>|`; NULL encodes as `-1:|`
pub fn encode_row(cells: &[Option<String>]) -> String {
    let mut out = String::new();
    for cell in cells {
        match cell {
            Some(value) => {
                let _ = write!(out, "{}:{}|", value.len(), value);
            }
            None => out.push_str("-1:|"),
        }
    }
    out
}

/// Digest of a component's rows, independent of row order
pub fn hash_rows(rows: &[TextRow]) -> String {
    let mut encoded: Vec<String> = rows.iter().map(|r| encode_row(r)).collect();
    encoded.sort();

    let mut hasher = Sha256::new();
    for row in &encoded {
        hasher.update(row.as_bytes());
        hasher.update(b"\n");
    }
    short_hex(hasher)
}

/// Whole-schema digest from `name=digest` lines in name order
pub fn combine(components: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    for (name, digest) in components {
        hasher.update(format!("{}={}\n", name, digest).as_bytes());
    }
    short_hex(hasher)
}

fn short_hex(hasher: Sha256) -> String {
    let mut hex = format!("{:x}", hasher.finalize());
    hex.truncate(DIGEST_LEN);
    hex
}
