use std::collections::HashSet;

use crate::dag::DagOfScripts;
use crate::error::{CoreError, Result};
use crate::table_ref::TableRef;

/// A single parsed selector query, e.g. `staging.orders`, `+core.customers+`,
/// `staging/`, or `*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    All,
    Name {
        include_ancestors: bool,
        include_descendants: bool,
        schema: Vec<String>,
        name: String,
    },
    SchemaPrefix {
        include_ancestors: bool,
        include_descendants: bool,
        prefix: Vec<String>,
    },
}

impl Selector {
    pub fn parse(query: &str) -> Result<Self> {
        if query == "*" {
            return Ok(Selector::All);
        }

        let include_ancestors = query.starts_with('+');
        let include_descendants = query.ends_with('+');
        let after_prefix = query.strip_prefix('+').unwrap_or(query);
        let trimmed = after_prefix.strip_suffix('+').unwrap_or(after_prefix);

        if trimmed.is_empty() {
            return Err(CoreError::InvalidSelector(query.to_string()));
        }

        if trimmed.contains('/') {
            let prefix: Vec<String> = trimmed
                .trim_end_matches('/')
                .split('/')
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
                .collect();
            if prefix.is_empty() {
                return Err(CoreError::InvalidSelector(query.to_string()));
            }
            return Ok(Selector::SchemaPrefix {
                include_ancestors,
                include_descendants,
                prefix,
            });
        }

        let mut parts: Vec<String> = trimmed.split('.').map(|s| s.to_string()).collect();
        let name = parts
            .pop()
            .ok_or_else(|| CoreError::InvalidSelector(query.to_string()))?;
        Ok(Selector::Name {
            include_ancestors,
            include_descendants,
            schema: parts,
            name,
        })
    }

    /// Resolve this selector against a DAG, returning every matching
    /// `TableRef` that actually has a script (externals are never
    /// selectable directly).
    pub fn apply(&self, dag: &DagOfScripts) -> HashSet<TableRef> {
        match self {
            Selector::All => dag
                .table_refs()
                .filter(|t| dag.is_script(t))
                .cloned()
                .collect(),
            Selector::Name {
                include_ancestors,
                include_descendants,
                schema,
                name,
            } => {
                let matches: Vec<TableRef> = dag
                    .table_refs()
                    .filter(|t| &t.schema == schema && &t.name == name)
                    .cloned()
                    .collect();
                expand(dag, matches, *include_ancestors, *include_descendants)
            }
            Selector::SchemaPrefix {
                include_ancestors,
                include_descendants,
                prefix,
            } => {
                let matches: Vec<TableRef> = dag
                    .table_refs()
                    .filter(|t| &t.schema == prefix)
                    .cloned()
                    .collect();
                expand(dag, matches, *include_ancestors, *include_descendants)
            }
        }
    }
}

fn expand(
    dag: &DagOfScripts,
    matches: Vec<TableRef>,
    include_ancestors: bool,
    include_descendants: bool,
) -> HashSet<TableRef> {
    let mut selected: HashSet<TableRef> = matches.iter().cloned().collect();
    if include_ancestors {
        for m in &matches {
            selected.extend(dag.ancestors(m));
        }
    }
    if include_descendants {
        for m in &matches {
            selected.extend(dag.descendants(m));
        }
    }
    selected.retain(|t| dag.is_script(t));
    selected
}

/// Resolve one or more selector queries against a DAG and union the
/// results. An empty query list selects everything, matching a bare `run`
/// with no `--select` flags.
pub fn select(dag: &DagOfScripts, queries: &[String]) -> Result<HashSet<TableRef>> {
    if queries.is_empty() {
        return Ok(Selector::All.apply(dag));
    }
    let mut selected = HashSet::new();
    for query in queries {
        selected.extend(Selector::parse(query)?.apply(dag));
    }
    if selected.is_empty() {
        return Err(CoreError::EmptySelection);
    }
    Ok(selected)
}

#[cfg(test)]
#[path = "selector_test.rs"]
mod tests;
