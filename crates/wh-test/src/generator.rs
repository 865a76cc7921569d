use wh_core::{Field, FieldTag, Script, ScriptSource, TableRef};
use wh_sql::SqlDialect;

use crate::error::{Result, TestGenError};

fn not_null_sql(table: &str, column: &str) -> String {
    format!("SELECT * FROM {table} WHERE {column} IS NULL")
}

fn unique_sql(table: &str, column: &str) -> String {
    format!("SELECT {column}, COUNT(*) AS n FROM {table} GROUP BY {column} HAVING COUNT(*) > 1")
}

fn unique_by_sql(table: &str, column: &str, by: &str) -> String {
    format!(
        "SELECT {by}, {column}, COUNT(*) AS n FROM {table} GROUP BY {by}, {column} HAVING COUNT(*) > 1"
    )
}

fn set_sql(table: &str, column: &str, elements: &[String]) -> Result<String> {
    if elements.is_empty() {
        return Err(TestGenError::EmptySet);
    }
    let quoted = elements
        .iter()
        .map(|e| format!("'{}'", e.replace('\'', "''")))
        .collect::<Vec<_>>()
        .join(", ");
    Ok(format!(
        "SELECT * FROM {table} WHERE {column} NOT IN ({quoted})"
    ))
}

fn tag_label(tag: &FieldTag) -> &'static str {
    match tag {
        FieldTag::NoNulls => "no_nulls",
        FieldTag::Unique => "unique",
        FieldTag::UniqueBy(_) => "unique_by",
        FieldTag::Set(_) => "set",
        FieldTag::Incremental => "incremental",
    }
}

/// Build the SQL body for one tag on one column of a materialized table.
/// `#INCREMENTAL` is not a test tag: it's an eligibility flag consumed by
/// the session's incremental rewriting, never reaching this dispatcher.
fn assertion_sql(table: &str, column: &str, tag: &FieldTag) -> Result<String> {
    match tag {
        FieldTag::NoNulls => Ok(not_null_sql(table, column)),
        FieldTag::Unique => Ok(unique_sql(table, column)),
        FieldTag::UniqueBy(by) => Ok(unique_by_sql(table, column, by)),
        FieldTag::Set(elements) => set_sql(table, column, elements),
        FieldTag::Incremental => Err(TestGenError::UnhandledTag(tag.clone())),
    }
}

/// Every synthetic assertion-test `Script` implied by a script's tagged
/// fields. A script with N tagged columns and M tags per column yields up
/// to N*M synthetic scripts, placed under a `tests/` schema prefix so
/// `TableRef::is_test` picks them up automatically.
pub fn build_assertion_tests(
    script: &Script,
    dialect: &dyn SqlDialect,
) -> Result<Vec<Script>> {
    let table_physical = dialect.format_table_ref(&script.table_ref);
    let mut tests = Vec::new();

    for field in &script.fields {
        for tag in &field.tags {
            if matches!(tag, FieldTag::Incremental) {
                continue;
            }
            let sql = assertion_sql(&table_physical, &field.name, tag)?;
            let test_ref = test_table_ref(&script.table_ref, field, tag);
            let mut test_script = Script::new(
                test_ref,
                script.dialect,
                sql,
                ScriptSource::Synthetic {
                    tag: tag_label(tag).to_string(),
                    column: field.name.clone(),
                },
            );
            test_script.dependencies.insert(script.table_ref.clone());
            tests.push(test_script);
        }
    }
    Ok(tests)
}

fn test_table_ref(table_ref: &TableRef, field: &Field, tag: &FieldTag) -> TableRef {
    let mut schema = vec!["tests".to_string()];
    schema.extend(table_ref.schema.iter().cloned());
    schema.push(table_ref.name.clone());
    TableRef::new(
        table_ref.project.clone(),
        table_ref.dataset.clone(),
        schema,
        format!("{}_{}", field.name, tag_label(tag)),
    )
}

#[cfg(test)]
#[path = "generator_test.rs"]
mod tests;
