use std::path::Path;

/// Suffix appended to a table's name while it is staged for audit, never
/// committed to production under this name.
pub const AUDIT_TABLE_SUFFIX: &str = "___audit";

/// Canonical identity of a table: an optional project, a dataset, a schema
/// path (possibly nested), and a name.
///
/// Equality and hashing use all four fields, matching a frozen dataclass.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct TableRef {
    pub project: Option<String>,
    pub dataset: String,
    pub schema: Vec<String>,
    pub name: String,
}

impl TableRef {
    pub fn new(
        project: Option<String>,
        dataset: impl Into<String>,
        schema: Vec<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            project,
            dataset: dataset.into(),
            schema,
            name: name.into(),
        }
    }

    /// Derive a `TableRef` from a script's path relative to the scripts
    /// root directory. Path segments before the filename become the schema;
    /// the filename's first dot-separated component becomes the name.
    ///
    /// `scripts/staging/orders.sql` -> schema=["staging"], name="orders"
    /// `scripts/core/finance/kpis.sql.jinja` -> schema=["core","finance"], name="kpis"
    pub fn from_path(dataset: impl Into<String>, relative_path: &Path) -> Self {
        let mut schema: Vec<String> = relative_path
            .parent()
            .into_iter()
            .flat_map(|p| p.components())
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        schema.retain(|s| !s.is_empty());

        let file_name = relative_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = file_name
            .split('.')
            .next()
            .unwrap_or(&file_name)
            .to_string();

        Self {
            project: None,
            dataset: dataset.into(),
            schema,
            name,
        }
    }

    pub fn replace_dataset(&self, dataset: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            ..self.clone()
        }
    }

    pub fn replace_project(&self, project: Option<String>) -> Self {
        Self {
            project,
            ..self.clone()
        }
    }

    pub fn add_audit_suffix(&self) -> Self {
        if self.name.ends_with(AUDIT_TABLE_SUFFIX) {
            return self.clone();
        }
        Self {
            name: format!("{}{}", self.name, AUDIT_TABLE_SUFFIX),
            ..self.clone()
        }
    }

    pub fn remove_audit_suffix(&self) -> Self {
        match self.name.strip_suffix(AUDIT_TABLE_SUFFIX) {
            Some(stripped) => Self {
                name: stripped.to_string(),
                ..self.clone()
            },
            None => self.clone(),
        }
    }

    pub fn is_audit_table(&self) -> bool {
        self.name.ends_with(AUDIT_TABLE_SUFFIX)
    }

    /// A table is a test if its schema's first segment is `tests`.
    pub fn is_test(&self) -> bool {
        self.schema.first().map(|s| s == "tests").unwrap_or(false)
    }
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<&str> = std::iter::once(self.project.as_deref())
            .chain(std::iter::once(Some(self.dataset.as_str())))
            .chain(self.schema.iter().map(|s| Some(s.as_str())))
            .chain(std::iter::once(Some(self.name.as_str())))
            .flatten()
            .collect();
        write!(f, "{}", parts.join("."))
    }
}

#[cfg(test)]
#[path = "table_ref_test.rs"]
mod tests;
