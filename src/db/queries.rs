//! SQL query constants and builders
//!
//! Metadata queries run over the simple protocol, so the target schema is
//! spliced in as a quoted literal through [`SqlBuilder::bind_schema`].
//! Every query starts with a tag comment naming what it reads.

/// Placeholder replaced with the quoted schema name
const SCHEMA_PLACEHOLDER: &str = "$SCHEMA";

// ==================== Fingerprint: structural mode ====================

pub const FP_TABLES: &str = r#"/* fp:tables */
    SELECT table_name, table_type
    FROM information_schema.tables
    WHERE table_schema = $SCHEMA
    ORDER BY table_name
"#;

pub const FP_COLUMNS: &str = r#"/* fp:columns */
    SELECT
        table_name,
        column_name,
        ordinal_position,
        udt_name,
        is_nullable,
        column_default,
        concat_ws(' ',
            is_identity, identity_generation, is_generated, generation_expression,
            character_maximum_length, numeric_precision, numeric_scale) AS extra
    FROM information_schema.columns
    WHERE table_schema = $SCHEMA
    ORDER BY table_name, ordinal_position
"#;

pub const FP_PRIMARY_KEYS: &str = r#"/* fp:primary_keys */
    SELECT
        tc.table_name,
        tc.constraint_name,
        string_agg(kcu.column_name, ',' ORDER BY kcu.ordinal_position) AS columns
    FROM information_schema.table_constraints tc
    JOIN information_schema.key_column_usage kcu
        ON tc.constraint_name = kcu.constraint_name
        AND tc.table_schema = kcu.table_schema
        AND tc.table_name = kcu.table_name
    WHERE tc.constraint_type = 'PRIMARY KEY'
        AND tc.table_schema = $SCHEMA
    GROUP BY tc.table_name, tc.constraint_name
    ORDER BY tc.table_name
"#;

pub const FP_FOREIGN_KEYS: &str = r#"/* fp:foreign_keys */
    SELECT
        con.conrelid::regclass::text AS table_name,
        con.conname,
        pg_get_constraintdef(con.oid) AS definition
    FROM pg_constraint con
    JOIN pg_namespace n ON n.oid = con.connamespace
    WHERE con.contype = 'f'
        AND n.nspname = $SCHEMA
    ORDER BY 1, 2
"#;

pub const FP_INDEXES: &str = r#"/* fp:indexes */
    SELECT tablename, indexname, indexdef
    FROM pg_indexes
    WHERE schemaname = $SCHEMA
    ORDER BY tablename, indexname
"#;

// ==================== Fingerprint: lightweight mode ====================

/// Per base table: identity (oid), its pg_class row version (xmin), and a
/// `count:max(xmin)` signature over the catalog rows that describe it.
/// Column, default, constraint and index changes leave the pg_class row
/// alone but always insert, delete or rewrite one of those rows.
pub const FP_LIGHTWEIGHT: &str = r#"/* fp:lightweight */
    SELECT
        c.relname,
        c.oid::text,
        c.xmin::text,
        (SELECT count(*) || ':' || coalesce(max(a.xmin::text::bigint), 0)
            FROM pg_attribute a WHERE a.attrelid = c.oid),
        (SELECT count(*) || ':' || coalesce(max(d.xmin::text::bigint), 0)
            FROM pg_attrdef d WHERE d.adrelid = c.oid),
        (SELECT count(*) || ':' || coalesce(max(k.xmin::text::bigint), 0)
            FROM pg_constraint k WHERE k.conrelid = c.oid),
        (SELECT count(*) || ':' || coalesce(max(i.xmin::text::bigint), 0)
            FROM pg_index i WHERE i.indrelid = c.oid)
    FROM pg_class c
    JOIN pg_namespace n ON n.oid = c.relnamespace
    WHERE n.nspname = $SCHEMA
        AND c.relkind IN ('r', 'p')
    ORDER BY c.relname
"#;

// ==================== Introspection (one JSON document per row) ====================

pub const INTROSPECT_TABLES: &str = r#"/* introspect:tables */
    SELECT row_to_json(t)::text FROM (
        SELECT
            table_name AS name,
            table_type = 'VIEW' AS is_view
        FROM information_schema.tables
        WHERE table_schema = $SCHEMA
        ORDER BY table_name
    ) t
"#;

pub const INTROSPECT_COLUMNS: &str = r#"/* introspect:columns */
    SELECT row_to_json(c)::text FROM (
        SELECT
            table_name AS "table",
            column_name AS name,
            udt_name AS data_type,
            is_nullable = 'YES' AS nullable,
            column_default AS default_value,
            ordinal_position AS ordinal,
            character_maximum_length AS max_length
        FROM information_schema.columns
        WHERE table_schema = $SCHEMA
        ORDER BY table_name, ordinal_position
    ) c
"#;

pub const INTROSPECT_INDEXES: &str = r#"/* introspect:indexes */
    SELECT row_to_json(i)::text FROM (
        SELECT
            t.relname AS "table",
            ic.relname AS name,
            ix.indisunique AS is_unique,
            ix.indisprimary AS is_primary,
            ix.indpred IS NOT NULL AS is_partial,
            ARRAY(
                SELECT a.attname::text
                FROM unnest(ix.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord)
                JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum
                ORDER BY k.ord
            ) AS columns
        FROM pg_index ix
        JOIN pg_class t ON t.oid = ix.indrelid
        JOIN pg_class ic ON ic.oid = ix.indexrelid
        JOIN pg_namespace n ON n.oid = t.relnamespace
        WHERE n.nspname = $SCHEMA
        ORDER BY t.relname, ic.relname
    ) i
"#;

/// Composite keys come back as one row per column pair
pub const INTROSPECT_FOREIGN_KEYS: &str = r#"/* introspect:foreign_keys */
    SELECT row_to_json(f)::text FROM (
        SELECT
            con.conname AS constraint_name,
            src.relname AS "table",
            sa.attname AS "column",
            ref.relname AS referenced_table,
            ra.attname AS referenced_column
        FROM pg_constraint con
        JOIN pg_class src ON src.oid = con.conrelid
        JOIN pg_namespace n ON n.oid = src.relnamespace
        JOIN pg_class ref ON ref.oid = con.confrelid
        CROSS JOIN LATERAL unnest(con.conkey, con.confkey) AS k(src_att, ref_att)
        JOIN pg_attribute sa ON sa.attrelid = con.conrelid AND sa.attnum = k.src_att
        JOIN pg_attribute ra ON ra.attrelid = con.confrelid AND ra.attnum = k.ref_att
        WHERE con.contype = 'f'
            AND n.nspname = $SCHEMA
        ORDER BY src.relname, con.conname, sa.attnum
    ) f
"#;

/// SQL builder for safe identifier and literal quoting
pub struct SqlBuilder;

impl SqlBuilder {
    /// Quote an identifier (role/table/column name) safely
    pub fn quote_ident(ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    /// Quote a string literal (standard_conforming_strings semantics)
    pub fn quote_literal(value: &str) -> String {
        format!("'{}'", value.replace('\'', "''"))
    }

    /// Substitute the target schema into a metadata query template
    pub fn bind_schema(template: &str, schema: &str) -> String {
        template.replace(SCHEMA_PLACEHOLDER, &Self::quote_literal(schema))
    }

    pub fn set_role(role: &str) -> String {
        format!("SET ROLE {}", Self::quote_ident(role))
    }

    pub fn set_search_path(schema: &str) -> String {
        format!("SET search_path TO {}", Self::quote_ident(schema))
    }

    /// Select the given columns of a table as one JSON object per row
    pub fn select_json(schema: &str, table: &str, columns: &[&str]) -> String {
        let projection = columns
            .iter()
            .map(|c| Self::quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "SELECT row_to_json(r) FROM (SELECT {} FROM {}.{} LIMIT $1) r",
            projection,
            Self::quote_ident(schema),
            Self::quote_ident(table)
        )
    }
}

pub const RESET_ROLE: &str = "RESET ROLE";
pub const RESET_SEARCH_PATH: &str = "RESET search_path";
