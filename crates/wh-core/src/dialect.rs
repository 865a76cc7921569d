/// The SQL dialect a script is written in. Governs how a dotted reference
/// in source code maps to a `TableRef` and back, and how a `TableRef`
/// formats to a physical identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum Dialect {
    DuckDb,
    BigQuery,
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dialect::DuckDb => write!(f, "duckdb"),
            Dialect::BigQuery => write!(f, "bigquery"),
        }
    }
}
