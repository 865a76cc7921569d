//! Shared types for waphouse: table identity, parsed scripts, and the
//! dependency DAG with its selector DSL.

pub mod dag;
pub mod dialect;
pub mod error;
pub mod field;
pub mod script;
pub mod selector;
pub mod table_ref;

pub use dag::{DagOfScripts, Scheduler};
pub use dialect::Dialect;
pub use error::{CoreError, Result};
pub use field::{parse_tags, Field, FieldTag};
pub use script::{Script, ScriptSource};
pub use selector::{select, Selector};
pub use table_ref::{TableRef, AUDIT_TABLE_SUFFIX};
