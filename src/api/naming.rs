//! Deterministic names for API types and fields

use once_cell::sync::Lazy;
use regex::Regex;

static WORD_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9]+").unwrap());

/// Derives API names from catalog names
pub trait NamingRules: Send + Sync {
    /// Type name for a table (`blog_posts` -> `BlogPosts`)
    fn type_name(&self, table: &str) -> String;

    /// Scalar field name for a column (`created_at` -> `createdAt`)
    fn field_name(&self, column: &str) -> String;

    /// Single-valued field following a foreign key (`author_id` -> `author`)
    fn reference_field(&self, fk_column: &str, referenced_table: &str) -> String;

    /// List-valued field holding rows of `table` (`comment` -> `comments`)
    fn list_field(&self, table: &str) -> String;

    /// Alternative for a field name that is already taken
    fn disambiguate(&self, base: &str, qualifier: &str) -> String {
        format!("{}By{}", base, pascal_case(qualifier))
    }
}

/// PascalCase types, camelCase fields, naive plurals
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultNaming;

impl NamingRules for DefaultNaming {
    fn type_name(&self, table: &str) -> String {
        pascal_case(table)
    }

    fn field_name(&self, column: &str) -> String {
        camel_case(column)
    }

    fn reference_field(&self, fk_column: &str, referenced_table: &str) -> String {
        let stem = fk_column
            .strip_suffix("_id")
            .or_else(|| fk_column.strip_suffix("_ID"))
            .or_else(|| fk_column.strip_suffix("Id"))
            .filter(|s| !s.is_empty());

        match stem {
            Some(stem) => camel_case(stem),
            None => camel_case(&singular(referenced_table)),
        }
    }

    fn list_field(&self, table: &str) -> String {
        camel_case(&plural(table))
    }
}

fn words(raw: &str) -> impl Iterator<Item = &str> {
    WORD_BREAK.split(raw).filter(|w| !w.is_empty())
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

pub fn pascal_case(raw: &str) -> String {
    words(raw).map(capitalize).collect()
}

pub fn camel_case(raw: &str) -> String {
    let pascal = pascal_case(raw);
    let mut chars = pascal.chars();
    match chars.next() {
        Some(first) => first.to_ascii_lowercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

fn plural(word: &str) -> String {
    if word.ends_with('s') {
        word.to_string()
    } else if let Some(stem) = word.strip_suffix('y').filter(|s| !s.ends_with(['a', 'e', 'o', 'u'])) {
        format!("{}ies", stem)
    } else {
        format!("{}s", word)
    }
}

fn singular(word: &str) -> String {
    if let Some(stem) = word.strip_suffix("ies") {
        format!("{}y", stem)
    } else if let Some(stem) = word.strip_suffix('s').filter(|s| !s.ends_with('s')) {
        stem.to_string()
    } else {
        word.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_conversion() {
        assert_eq!(pascal_case("blog_posts"), "BlogPosts");
        assert_eq!(pascal_case("order-items v2"), "OrderItemsV2");
        assert_eq!(camel_case("created_at"), "createdAt");
    }

    #[test]
    fn test_reference_field_strips_id_suffix() {
        let naming = DefaultNaming;
        assert_eq!(naming.reference_field("author_id", "users"), "author");
        assert_eq!(naming.reference_field("parentId", "nodes"), "parent");
        assert_eq!(naming.reference_field("owner", "users"), "user");
        assert_eq!(naming.reference_field("id", "categories"), "category");
    }

    #[test]
    fn test_list_field_pluralizes() {
        let naming = DefaultNaming;
        assert_eq!(naming.list_field("comment"), "comments");
        assert_eq!(naming.list_field("posts"), "posts");
        assert_eq!(naming.list_field("category"), "categories");
        assert_eq!(naming.list_field("survey"), "surveys");
    }

    #[test]
    fn test_disambiguate() {
        assert_eq!(DefaultNaming.disambiguate("posts", "editor_id"), "postsByEditorId");
    }
}
