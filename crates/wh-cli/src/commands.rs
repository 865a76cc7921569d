//! The `run` subcommand: loads a project, selects scripts, and drives a
//! `Session` to completion.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use wh_core::{select, Dialect};
use wh_db::{DatabaseClient, DuckDbClient};
use wh_session::{EventSink, RunStatus as SessionRunStatus, Session, SessionConfig};

use crate::cli::{GlobalArgs, RunArgs};
use crate::config::{Config, WarehouseConfig};

/// A non-zero process exit requested deliberately (a failed run, a bad
/// selector), as opposed to an unexpected error. `main` checks for this
/// with `downcast_ref` so RAII cleanup still runs on the way out.
#[derive(Debug)]
pub struct ExitCode(pub i32);

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "")
    }
}

impl std::error::Error for ExitCode {}

pub async fn execute(args: &RunArgs, global: &GlobalArgs) -> anyhow::Result<()> {
    let project_dir = PathBuf::from(&global.project_dir);
    let config = Config::load(&project_dir)?;

    let dataset = args
        .dataset
        .clone()
        .or_else(|| config.dataset.clone())
        .ok_or_else(|| anyhow::anyhow!("no --dataset given and no `dataset` set in waphouse.yml"))?;

    let scripts_dir = project_dir.join(args.scripts.clone().unwrap_or_else(|| config.scripts_dir.clone()));
    let write_dataset = config.resolved_write_dataset(&dataset);
    let threads = global.threads.unwrap_or(config.threads);
    let (incremental_field_name, incremental_field_values) = args.incremental_field()?;

    let sql_dialect = Arc::new(wh_sql::DuckDbDialect);
    let dag = wh_session::build_dag(&scripts_dir, &dataset, Dialect::DuckDb, sql_dialect.as_ref(), &config.vars)?;
    let selected = select(&dag, &args.select)?;

    let client: Arc<dyn DatabaseClient> = match &config.warehouse {
        WarehouseConfig::DuckDb { path } if path == ":memory:" => Arc::new(DuckDbClient::in_memory()?),
        WarehouseConfig::DuckDb { path } => Arc::new(DuckDbClient::from_path(path)?),
    };
    client.create_dataset(&dataset).await?;

    let sink: Arc<dyn EventSink> = Arc::new(ProgressEventSink::new(selected.len(), global.quiet));
    let session_config = SessionConfig {
        write_dataset,
        threads,
        dry_run: args.dry,
        keep_going: args.keep_going || config.keep_going,
        fresh: args.fresh,
        incremental_field_name,
        incremental_field_values,
    };

    let session = Session::new(client, sql_dialect, sink, session_config);
    let summary = session.run(&dag, selected).await?;

    for outcome in &summary.outcomes {
        if outcome.status == SessionRunStatus::Errored {
            log::error!(
                "{}: {}",
                outcome.table_ref,
                outcome.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    log::info!("total billed: ${:.4}", summary.total_billed_dollars());

    if summary.any_error_has_occurred() {
        return Err(ExitCode(1).into());
    }
    Ok(())
}

/// Drives an `indicatif` progress bar off `Session`'s structured events and
/// also forwards everything to `log`, matching the ambient logging every
/// other crate in the project uses.
struct ProgressEventSink {
    bar: Option<ProgressBar>,
}

impl ProgressEventSink {
    fn new(total: usize, quiet: bool) -> Self {
        let bar = if quiet || total == 0 {
            None
        } else {
            let bar = ProgressBar::new(total as u64);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                    .expect("static progress bar template is valid")
                    .progress_chars("#>-"),
            );
            Some(bar)
        };
        Self { bar }
    }
}

impl EventSink for ProgressEventSink {
    fn job_started(&self, table_ref: &wh_core::TableRef, is_test: bool) {
        log::info!("started {table_ref} (test={is_test})");
    }

    fn job_heartbeat(&self, table_ref: &wh_core::TableRef, elapsed_secs: u64) {
        log::info!("{table_ref} still running after {elapsed_secs}s");
    }

    fn job_finished(&self, table_ref: &wh_core::TableRef, status: &str, billed_dollars: f64, n_rows: u64) {
        log::info!("{table_ref} finished: {status} (${billed_dollars:.4}, {n_rows} rows)");
        if let Some(bar) = &self.bar {
            bar.set_message(table_ref.to_string());
            bar.inc(1);
        }
    }

    fn promotion_started(&self, table_ref: &wh_core::TableRef) {
        log::info!("promoting {table_ref}");
    }

    fn promotion_finished(&self, table_ref: &wh_core::TableRef, status: &str) {
        log::info!("promotion of {table_ref}: {status}");
    }

    fn session_ended(&self, total_billed_dollars: f64, n_errored: usize) {
        if let Some(bar) = &self.bar {
            bar.finish_with_message(format!("done, {n_errored} errored"));
        }
        log::info!("session ended: ${total_billed_dollars:.4} billed, {n_errored} errored");
    }
}
