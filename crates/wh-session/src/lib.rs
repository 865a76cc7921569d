mod error;
mod loader;
mod session;
mod sink;

pub use error::{Result, SessionError};
pub use loader::{build_dag, dedupe_by_table_ref, load_scripts};
pub use session::{RunStatus, RunSummary, ScriptOutcome, Session, SessionConfig};
pub use sink::{EventSink, LogEventSink};
