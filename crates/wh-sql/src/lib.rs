//! SQL-specific mechanics: dependency extraction from raw script text,
//! dialect physical-naming, and the textual rewrite passes the session
//! applies when redirecting scripts to their audit tables.

pub mod error;
pub mod extractor;
pub mod naming;
pub mod rewrite;

pub use error::{Result, SqlError};
pub use extractor::extract_dependencies;
pub use naming::{dialect_for, BigQueryDialect, DuckDbDialect, SqlDialect};
pub use rewrite::{
    dependencies_to_redirect, filter_dependency_by_field, filter_output_by_field,
    replace_table_reference, stitch_incremental_dependency,
};
