#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("warehouse error: {0}")]
    Warehouse(String),

    #[error("job was cancelled")]
    Cancelled,

    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, DbError>;
