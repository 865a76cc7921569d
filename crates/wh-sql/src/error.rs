#[derive(Debug, thiserror::Error)]
pub enum SqlError {
    #[error("failed to parse SQL: {0}")]
    Parse(String),

    #[error("multiple incremental fields are not supported: found {0} and {1}")]
    MultipleIncrementalFields(String, String),
}

pub type Result<T> = std::result::Result<T, SqlError>;
