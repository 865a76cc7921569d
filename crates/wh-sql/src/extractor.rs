use std::collections::HashSet;
use std::ops::ControlFlow;

use once_cell::sync::Lazy;
use regex::Regex;
use sqlparser::ast::{visit_relations, Cte, Query, SetExpr, Statement};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

use crate::error::SqlError;

/// Every table referenced by a script's SQL that isn't a CTE binding and
/// isn't a function call, as dotted strings exactly as they appear in the
/// source (e.g. `my_dataset.staging__orders` or `staging.orders`).
///
/// Falls back to a regex scan of `FROM`/`JOIN <schema>.<name>` tokens when
/// the SQL fails to parse, since a script may use dialect syntax the
/// bundled parser doesn't support.
pub fn extract_dependencies(sql: &str) -> HashSet<String> {
    match try_parse_dependencies(sql) {
        Ok(deps) => deps,
        Err(err) => {
            log::warn!("falling back to regex dependency extraction: {err}");
            regex_fallback_dependencies(sql)
        }
    }
}

fn try_parse_dependencies(sql: &str) -> Result<HashSet<String>, SqlError> {
    let dialect = GenericDialect {};
    let statements =
        Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;

    let mut cte_names = HashSet::new();
    for statement in &statements {
        collect_cte_names(statement, &mut cte_names);
    }

    let mut relations = HashSet::new();
    let _ = visit_relations(&statements, |relation| {
        let name = relation.to_string();
        let last_segment = name.rsplit('.').next().unwrap_or(&name);
        if !cte_names.contains(last_segment) {
            relations.insert(name);
        }
        ControlFlow::<()>::Continue(())
    });

    Ok(relations)
}

fn collect_cte_names(statement: &Statement, names: &mut HashSet<String>) {
    if let Statement::Query(query) = statement {
        collect_cte_names_from_query(query, names);
    }
}

fn collect_cte_names_from_query(query: &Query, names: &mut HashSet<String>) {
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            collect_cte_name(cte, names);
        }
    }
    collect_cte_names_from_set_expr(&query.body, names);
}

fn collect_cte_name(cte: &Cte, names: &mut HashSet<String>) {
    names.insert(cte.alias.name.value.clone());
    collect_cte_names_from_query(&cte.query, names);
}

fn collect_cte_names_from_set_expr(set_expr: &SetExpr, names: &mut HashSet<String>) {
    match set_expr {
        SetExpr::Query(inner) => collect_cte_names_from_query(inner, names),
        SetExpr::SetOperation { left, right, .. } => {
            collect_cte_names_from_set_expr(left, names);
            collect_cte_names_from_set_expr(right, names);
        }
        _ => {}
    }
}

static DEP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:JOIN|FROM)\s+(?P<schema>[a-zA-Z][a-zA-Z0-9_]*)\.(?P<name>[a-zA-Z][a-zA-Z0-9_]*)")
        .unwrap()
});

fn regex_fallback_dependencies(sql: &str) -> HashSet<String> {
    DEP_RE
        .captures_iter(sql)
        .map(|caps| format!("{}.{}", &caps["schema"], &caps["name"]))
        .collect()
}

#[cfg(test)]
#[path = "extractor_test.rs"]
mod tests;
