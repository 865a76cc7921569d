use wh_core::{Dialect, TableRef};

/// Maps a `TableRef` to the dialect's physical identifier and back. The two
/// directions are inverses of each other for any `TableRef` the dialect
/// itself produced.
pub trait SqlDialect: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// The physical identifier a warehouse sees, e.g. `my_dataset.staging__orders`
    /// for BigQuery or `my_dataset.staging.orders` for DuckDB.
    fn format_table_ref(&self, table_ref: &TableRef) -> String;

    /// Parse a physical identifier (as it would appear in a `FROM`/`JOIN`
    /// clause) back into a `TableRef`, given the dataset it was read in.
    fn parse_table_ref(&self, dataset: &str, physical: &str) -> TableRef;

    fn quote_ident(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }
}

/// BigQuery has one real level of namespacing (the dataset); deeper schema
/// nesting is encoded by joining schema segments and the name with `__`.
pub struct BigQueryDialect;

impl SqlDialect for BigQueryDialect {
    fn dialect(&self) -> Dialect {
        Dialect::BigQuery
    }

    fn format_table_ref(&self, table_ref: &TableRef) -> String {
        let mut out = String::new();
        if let Some(project) = &table_ref.project {
            out.push_str(project);
            out.push('.');
        }
        out.push_str(&table_ref.dataset);
        out.push('.');
        let mut parts = table_ref.schema.clone();
        parts.push(table_ref.name.clone());
        out.push_str(&parts.join("__"));
        out
    }

    fn parse_table_ref(&self, dataset: &str, physical: &str) -> TableRef {
        let leftover = match physical.rsplit_once('.') {
            Some((_, rest)) => rest,
            None => physical,
        };
        let mut parts: Vec<String> = leftover.split("__").map(|s| s.to_string()).collect();
        let name = parts.pop().unwrap_or_default();
        TableRef::new(None, dataset, parts, name)
    }
}

/// DuckDB has one real level of namespacing beyond the database itself (a
/// schema), so the dataset maps to a DuckDB schema and deeper schema
/// nesting is encoded the same way BigQuery encodes it: segments and the
/// name joined with `__`, giving a genuine two-part `schema.table`
/// identifier a single-catalog DuckDB connection can address directly.
pub struct DuckDbDialect;

impl SqlDialect for DuckDbDialect {
    fn dialect(&self) -> Dialect {
        Dialect::DuckDb
    }

    fn format_table_ref(&self, table_ref: &TableRef) -> String {
        let mut parts = table_ref.schema.clone();
        parts.push(table_ref.name.clone());
        format!("{}.{}", table_ref.dataset, parts.join("__"))
    }

    fn parse_table_ref(&self, dataset: &str, physical: &str) -> TableRef {
        let (schema_part, leftover) = match physical.split_once('.') {
            Some((schema, rest)) => (schema, rest),
            None => (dataset, physical),
        };
        let mut parts: Vec<String> = leftover.split("__").map(|s| s.to_string()).collect();
        let name = parts.pop().unwrap_or_default();
        TableRef::new(None, schema_part, parts, name)
    }
}

pub fn dialect_for(dialect: Dialect) -> Box<dyn SqlDialect> {
    match dialect {
        Dialect::BigQuery => Box::new(BigQueryDialect),
        Dialect::DuckDb => Box::new(DuckDbDialect),
    }
}

#[cfg(test)]
#[path = "naming_test.rs"]
mod tests;
