use std::collections::HashSet;

use regex::Regex;
use wh_core::TableRef;

use crate::naming::SqlDialect;

/// Word-boundary-replace every occurrence of `from`'s physical identifier
/// (both the fully dataset-qualified form and the dataset-stripped form) in
/// `code` with `to`'s physical identifier. This is a textual rewrite, not
/// an AST rewrite: the source may use dialect syntax the bundled SQL parser
/// doesn't support, so the dependency-redirection pass has to work on
/// scripts a parser would reject.
pub fn replace_table_reference(code: &str, dialect: &dyn SqlDialect, from: &TableRef, to: &TableRef) -> String {
    let full_from = dialect.format_table_ref(from);
    let full_to = dialect.format_table_ref(to);
    let mut rewritten = word_boundary_replace(code, &full_from, &full_to);

    let stripped_from = dialect.format_table_ref(&from.replace_dataset(String::new()));
    let stripped_from = stripped_from.trim_start_matches('.').to_string();
    if !stripped_from.is_empty() && stripped_from != full_from {
        rewritten = word_boundary_replace(&rewritten, &stripped_from, &full_to);
    }
    rewritten
}

fn word_boundary_replace(haystack: &str, needle: &str, replacement: &str) -> String {
    if needle.is_empty() {
        return haystack.to_string();
    }
    let pattern = format!(r"\b{}\b", regex::escape(needle));
    match Regex::new(&pattern) {
        Ok(re) => re.replace_all(haystack, regex::NoExpand(replacement)).into_owned(),
        Err(_) => haystack.to_string(),
    }
}

/// Apply an `IN (...)` filter on `field` to every non-incremental scan
/// source that exposes it, by substituting the bare table reference for a
/// filtered subquery aliased back to the original name so unqualified
/// column references elsewhere in the query keep resolving.
pub fn filter_dependency_by_field(
    code: &str,
    dialect: &dyn SqlDialect,
    dependency: &TableRef,
    field: &str,
    values: &[String],
) -> String {
    let physical = dialect.format_table_ref(dependency);
    let filtered = format!(
        "(SELECT * FROM {physical} WHERE {field} IN ({})) AS {name}",
        quoted_list(values),
        name = dependency.name,
    );
    word_boundary_replace(code, &physical, &filtered)
}

/// Wrap the whole (already-rewritten) query so its own output is filtered
/// by the incremental field too, matching the final-output wrap spec.md §4.2
/// pass 2 describes.
pub fn filter_output_by_field(code: &str, field: &str, values: &[String]) -> String {
    format!(
        "SELECT * FROM (\n{code}\n) AS waphouse_incremental_output WHERE {field} IN ({})",
        quoted_list(values)
    )
}

/// Stitch a non-incremental dependent's reference to an incremental
/// dependency into a `UNION ALL` of the dependency's audit-staged rows (for
/// the incremental batch) and its already-published rows (everything
/// else), so a downstream script sees a consistent view without itself
/// needing to be incremental-aware.
pub fn stitch_incremental_dependency(
    code: &str,
    dialect: &dyn SqlDialect,
    dependency: &TableRef,
    field: &str,
    values: &[String],
) -> String {
    let physical = dialect.format_table_ref(dependency);
    let audit_physical = dialect.format_table_ref(&dependency.add_audit_suffix());
    let stitched = format!(
        "(SELECT * FROM {audit_physical} WHERE {field} IN ({list}) \
         UNION ALL SELECT * FROM {physical} WHERE {field} NOT IN ({list})) AS {name}",
        list = quoted_list(values),
        name = dependency.name,
    );
    word_boundary_replace(code, &physical, &stitched)
}

fn quoted_list(values: &[String]) -> String {
    values
        .iter()
        .map(|v| format!("'{}'", v.replace('\'', "''")))
        .collect::<Vec<_>>()
        .join(", ")
}

/// The set of dependencies selected to be redirected to their audit
/// siblings, given the full set of scripts currently being run and the
/// existing audit tables already sampled from the warehouse. A dependency
/// is redirected if it's one of the scripts in the current run (it will be
/// (re)materialized to an audit table this run) or it already has a
/// leftover audit table from a prior run.
pub fn dependencies_to_redirect<'a>(
    dependencies: impl IntoIterator<Item = &'a TableRef>,
    selected: &HashSet<TableRef>,
    existing_audit_tables: &HashSet<TableRef>,
) -> HashSet<TableRef> {
    dependencies
        .into_iter()
        .filter(|d| selected.contains(d) || existing_audit_tables.contains(&d.add_audit_suffix()))
        .cloned()
        .collect()
}

#[cfg(test)]
#[path = "rewrite_test.rs"]
mod tests;
