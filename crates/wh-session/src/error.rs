#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("scripts directory not found: {}", .0.display())]
    ScriptsDirNotFound(std::path::PathBuf),

    #[error("failed to render Jinja template: {0}")]
    JinjaRender(String),

    #[error("specifying multiple incremental fields is not supported: found {0} and {1}")]
    MultipleIncrementalFields(String, String),

    #[error(transparent)]
    Core(#[from] wh_core::CoreError),

    #[error(transparent)]
    Db(#[from] wh_db::DbError),

    #[error(transparent)]
    TestGen(#[from] wh_test::TestGenError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;
