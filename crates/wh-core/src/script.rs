use std::collections::HashSet;
use std::path::PathBuf;

use crate::dialect::Dialect;
use crate::field::Field;
use crate::table_ref::TableRef;

/// Where a script's code came from. A tagged variant, rather than two
/// separate structs, so the DAG and Session can hold a single
/// `Vec<Script>` without needing a trait object for what is a closed set
/// of two shapes.
#[derive(Debug, Clone, serde::Serialize)]
pub enum ScriptSource {
    /// Parsed from a `.sql` or `.sql.jinja` file under the scripts root.
    File { relative_path: PathBuf },
    /// Generated from a field tag (e.g. `#NO_NULLS` on a column), not
    /// backed by a file on disk.
    Synthetic { tag: String, column: String },
}

/// A single unit of work: one target table, the SQL that produces it, the
/// tables it depends on, and the fields (with assertion tags) it exposes.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Script {
    pub table_ref: TableRef,
    pub dialect: Dialect,
    pub code: String,
    pub fields: Vec<Field>,
    pub dependencies: HashSet<TableRef>,
    pub source: ScriptSource,
}

impl Script {
    pub fn new(
        table_ref: TableRef,
        dialect: Dialect,
        code: impl Into<String>,
        source: ScriptSource,
    ) -> Self {
        Self {
            table_ref,
            dialect,
            code: code.into(),
            fields: Vec::new(),
            dependencies: HashSet::new(),
            source,
        }
    }

    pub fn is_test(&self) -> bool {
        self.table_ref.is_test()
    }

    pub fn is_synthetic(&self) -> bool {
        matches!(self.source, ScriptSource::Synthetic { .. })
    }

    /// The field tagged `#INCREMENTAL`, if this script declares one. A
    /// script may declare at most one; `Session` enforces this constraint
    /// across the whole run, not per-script.
    pub fn incremental_field(&self) -> Option<&Field> {
        self.fields.iter().find(|f| f.is_incremental())
    }

    pub fn is_incremental_eligible(&self) -> bool {
        self.incremental_field().is_some()
    }
}

#[cfg(test)]
#[path = "script_test.rs"]
mod tests;
