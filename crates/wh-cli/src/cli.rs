//! CLI argument definitions using clap derive API

use clap::{Args, Parser, Subcommand};

/// waphouse - a write-audit-publish runner for SQL projects
#[derive(Parser, Debug)]
#[command(name = "wh")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Global arguments available to every subcommand.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Suppress informational logging; only warnings and errors are shown.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Increase logging verbosity. Repeatable (-v, -vv).
    #[arg(short = 'v', long = "verbose", global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Path to the project directory (where `waphouse.yml` lives).
    #[arg(short = 'p', long, global = true, default_value = ".")]
    pub project_dir: String,

    /// Maximum number of scripts to run concurrently.
    #[arg(long, global = true)]
    pub threads: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a write-audit-publish session: materialize selected scripts and
    /// their assertion tests to a scratch dataset, then promote whatever
    /// came back clean.
    Run(RunArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Selector query, e.g. `staging.orders+`, `core/`, `*`. Repeatable;
    /// selecting nothing selects everything.
    #[arg(long = "select", short = 'm')]
    pub select: Vec<String>,

    /// Name of the base dataset scripts belong to. Falls back to the
    /// project config's `dataset`, then errors if neither is set.
    #[arg(long)]
    pub dataset: Option<String>,

    /// Directory scripts are loaded from, relative to the project
    /// directory.
    #[arg(long)]
    pub scripts: Option<String>,

    /// Incremental field name and value, e.g. `--incremental ds 2024-01-01`.
    /// Repeatable for multiple values of the same field; specifying more
    /// than one distinct field name is an error.
    #[arg(long, num_args = 2, value_names = ["FIELD", "VALUE"])]
    pub incremental: Vec<String>,

    /// Rewrite and submit scripts but skip materialization and promotion
    /// entirely - useful for checking what a run would touch.
    #[arg(long)]
    pub dry: bool,

    /// Keep running independent scripts after one fails instead of
    /// stopping the whole session.
    #[arg(long = "keep-going")]
    pub keep_going: bool,

    /// Ignore any audit tables left over from a previous run instead of
    /// redirecting dependents to them.
    #[arg(long)]
    pub fresh: bool,
}

impl RunArgs {
    /// Group the flat `--incremental FIELD VALUE` pairs by field name,
    /// rejecting more than one distinct field the way the original CLI
    /// does.
    pub fn incremental_field(&self) -> anyhow::Result<(Option<String>, Vec<String>)> {
        let mut by_field: std::collections::BTreeMap<String, Vec<String>> = Default::default();
        for pair in self.incremental.chunks(2) {
            let [field, value] = pair else {
                continue;
            };
            by_field.entry(field.clone()).or_default().push(value.clone());
        }
        if by_field.len() > 1 {
            anyhow::bail!("specifying multiple incremental fields is not supported");
        }
        match by_field.into_iter().next() {
            Some((field, values)) => Ok((Some(field), values)),
            None => Ok((None, Vec::new())),
        }
    }
}

#[cfg(test)]
#[path = "cli_test.rs"]
mod tests;
