use crate::TableRef;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("script directory not found: {0}")]
    ScriptsDirNotFound(std::path::PathBuf),

    #[error("duplicate table: {0}")]
    DuplicateTable(TableRef),

    #[error("unknown table referenced by selector: {0}")]
    UnknownTable(String),

    #[error("circular dependency detected involving: {0}")]
    CircularDependency(TableRef),

    #[error("empty selector match: no scripts selected")]
    EmptySelection,

    #[error("invalid selector: {0}")]
    InvalidSelector(String),

    #[error("invalid field tag: {0}")]
    InvalidFieldTag(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
