//! Generated API
//!
//! Everything downstream of introspection that shapes what callers see:
//! naming, visibility filters, the relationship graph and the compiler.

pub mod compiler;
pub mod filter;
pub mod naming;
pub mod relationships;

pub use compiler::{CatalogCompiler, CompiledSchema, SchemaCompiler};
pub use filter::SchemaFilter;
pub use naming::{DefaultNaming, NamingRules};
pub use relationships::rebuild_relationships;
