#[derive(Debug, thiserror::Error)]
pub enum TestGenError {
    #[error("#SET requires at least one element")]
    EmptySet,

    #[error("unhandled field tag: {0:?}")]
    UnhandledTag(wh_core::FieldTag),
}

pub type Result<T> = std::result::Result<T, TestGenError>;
