use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use wh_core::{parse_tags, DagOfScripts, Dialect, Field, Script, ScriptSource, TableRef};
use wh_sql::{extract_dependencies, SqlDialect};

use crate::error::{Result, SessionError};

const SCRIPT_SUFFIXES: &[&str] = &[".sql", ".sql.jinja"];

/// Load every script under `scripts_dir`, generate the synthetic assertion
/// tests their field tags imply, and assemble the whole set into a DAG.
/// `extra_vars` is exposed to `.sql.jinja` templates under `env.*` alongside
/// the process environment, which wins on a naming collision.
pub fn build_dag(
    scripts_dir: &Path,
    dataset: &str,
    dialect: Dialect,
    sql_dialect: &dyn SqlDialect,
    extra_vars: &HashMap<String, String>,
) -> Result<DagOfScripts> {
    let scripts = load_scripts(scripts_dir, dataset, dialect, sql_dialect, extra_vars)?;

    let mut all = Vec::with_capacity(scripts.len());
    for script in &scripts {
        all.extend(wh_test::build_assertion_tests(script, sql_dialect)?);
    }
    all.extend(scripts);

    Ok(DagOfScripts::build(all)?)
}

/// Walk the scripts directory and parse every script file into a `Script`,
/// with dependencies and tagged fields already extracted. Jinja files are
/// rendered at load time against `extra_vars` merged under the process
/// environment; nothing in the rest of the pipeline is Jinja-aware.
pub fn load_scripts(
    scripts_dir: &Path,
    dataset: &str,
    dialect: Dialect,
    sql_dialect: &dyn SqlDialect,
    extra_vars: &HashMap<String, String>,
) -> Result<Vec<Script>> {
    if !scripts_dir.is_dir() {
        return Err(SessionError::ScriptsDirNotFound(scripts_dir.to_path_buf()));
    }

    let mut scripts = Vec::new();
    for entry in walk(scripts_dir)? {
        let Some(relative) = classify(scripts_dir, &entry) else {
            continue;
        };
        let raw = std::fs::read_to_string(&entry)?;
        if raw.trim().is_empty() {
            continue;
        }
        let code = render(&entry, &raw, extra_vars)?;
        let table_ref = TableRef::from_path(dataset, &relative);
        let mut script = Script::new(table_ref, dialect, code.clone(), ScriptSource::File {
            relative_path: relative,
        });

        script.fields = parse_fields(&code)?;
        script.dependencies = extract_dependencies(&code)
            .into_iter()
            .map(|raw_ref| sql_dialect.parse_table_ref(dataset, &raw_ref))
            .collect();
        scripts.push(script);
    }
    Ok(scripts)
}

fn walk(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            files.extend(walk(&path)?);
        } else {
            files.push(path);
        }
    }
    Ok(files)
}

/// Filter to recognized SQL/Jinja suffixes, non-`_`-prefixed file names,
/// non-empty files, and return the path relative to the scripts root.
fn classify(root: &Path, path: &Path) -> Option<PathBuf> {
    let file_name = path.file_name()?.to_string_lossy();
    if file_name.starts_with('_') {
        return None;
    }
    if !SCRIPT_SUFFIXES.iter().any(|suffix| file_name.ends_with(suffix)) {
        return None;
    }
    path.strip_prefix(root).ok().map(|p| p.to_path_buf())
}

fn render(path: &Path, raw: &str, extra_vars: &HashMap<String, String>) -> Result<String> {
    let trimmed = raw.trim_end().trim_end_matches(';').to_string();
    if path.to_string_lossy().ends_with(".jinja") {
        let mut env = minijinja::Environment::new();
        env.add_template("script", &trimmed)
            .map_err(|e| SessionError::JinjaRender(e.to_string()))?;
        let template = env
            .get_template("script")
            .map_err(|e| SessionError::JinjaRender(e.to_string()))?;
        let mut vars = extra_vars.clone();
        vars.extend(std::env::vars());
        template
            .render(minijinja::context! { env => vars })
            .map_err(|e| SessionError::JinjaRender(e.to_string()))
    } else {
        Ok(trimmed)
    }
}

/// Parse tagged fields out of trailing `--` comment blocks that
/// immediately precede a SELECT column. A minimal line-based scan, not a
/// full tokenizer: comment blocks are groups of consecutive `--` lines,
/// and the column they describe is the next non-comment, non-blank line.
fn parse_fields(code: &str) -> Result<Vec<Field>> {
    let lines: Vec<&str> = code.lines().collect();
    let mut fields = Vec::new();
    let mut pending_comment: Vec<String> = Vec::new();

    for line in &lines {
        let trimmed = line.trim();
        if trimmed.starts_with("--") {
            pending_comment.push(trimmed.trim_start_matches("--").trim().to_string());
            continue;
        }
        if trimmed.is_empty() {
            continue;
        }
        if !pending_comment.is_empty() {
            if let Some(name) = column_name(trimmed) {
                let tags = parse_tags(&pending_comment.join(" "))?;
                if !tags.is_empty() {
                    fields.push(Field::new(name, tags));
                }
            }
            pending_comment.clear();
        }
    }
    Ok(fields)
}

fn column_name(line: &str) -> Option<String> {
    let without_comma = line.trim_end_matches(',').trim();
    if without_comma.is_empty()
        || without_comma.eq_ignore_ascii_case("select")
        || without_comma.to_ascii_uppercase().starts_with("FROM")
    {
        return None;
    }
    let upper = without_comma.to_ascii_uppercase();
    if let Some(pos) = upper.rfind(" AS ") {
        return Some(without_comma[pos + 4..].trim().to_string());
    }
    without_comma
        .split_whitespace()
        .last()
        .map(|token| token.rsplit('.').next().unwrap_or(token).to_string())
}

pub fn dedupe_by_table_ref(scripts: Vec<Script>) -> Vec<Script> {
    let mut seen = HashSet::new();
    scripts
        .into_iter()
        .filter(|s| seen.insert(s.table_ref.clone()))
        .collect()
}

#[cfg(test)]
#[path = "loader_test.rs"]
mod tests;
