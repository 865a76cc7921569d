use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Semaphore};
use wh_core::{DagOfScripts, Scheduler, Script, TableRef};
use wh_db::{DatabaseClient, Job};
use wh_sql::{
    dependencies_to_redirect, filter_dependency_by_field, filter_output_by_field,
    replace_table_reference, stitch_incremental_dependency, SqlDialect,
};

use crate::error::Result;
use crate::sink::EventSink;

const BACKOFF_START: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(10);
const HEARTBEAT_EVERY: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    Errored,
    Stopped,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Success => write!(f, "SUCCESS"),
            RunStatus::Errored => write!(f, "ERRORED"),
            RunStatus::Stopped => write!(f, "STOPPED"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScriptOutcome {
    pub table_ref: TableRef,
    pub status: RunStatus,
    pub billed_dollars: f64,
    pub n_rows: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub outcomes: Vec<ScriptOutcome>,
}

impl RunSummary {
    pub fn any_error_has_occurred(&self) -> bool {
        self.outcomes.iter().any(|o| o.status == RunStatus::Errored)
    }

    pub fn total_billed_dollars(&self) -> f64 {
        self.outcomes.iter().map(|o| o.billed_dollars).sum()
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub write_dataset: String,
    pub threads: usize,
    pub dry_run: bool,
    pub keep_going: bool,
    pub fresh: bool,
    pub incremental_field_name: Option<String>,
    pub incremental_field_values: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            write_dataset: "waphouse".to_string(),
            threads: 4,
            dry_run: false,
            keep_going: false,
            fresh: false,
            incremental_field_name: None,
            incremental_field_values: Vec::new(),
        }
    }
}

/// A script after the rewrite passes have run, ready to submit to the
/// warehouse. Tests keep their own identity (they write nothing); regular
/// scripts are re-targeted to an audit-suffixed table in the write
/// dataset, which is what `audit_table_ref` holds.
#[derive(Debug, Clone)]
struct PreparedScript {
    audit_table_ref: TableRef,
    is_test: bool,
    code: String,
    incremental_field: Option<String>,
}

/// The scheduling engine: rewrites scripts against a write dataset, submits
/// them to the warehouse with bounded concurrency, polls jobs to
/// completion, and promotes everything that passed its assertion tests.
pub struct Session {
    client: Arc<dyn DatabaseClient>,
    sql_dialect: Arc<dyn SqlDialect>,
    sink: Arc<dyn EventSink>,
    config: SessionConfig,
    stop_requested: Arc<AtomicBool>,
}

impl Session {
    pub fn new(
        client: Arc<dyn DatabaseClient>,
        sql_dialect: Arc<dyn SqlDialect>,
        sink: Arc<dyn EventSink>,
        config: SessionConfig,
    ) -> Self {
        Self {
            client,
            sql_dialect,
            sink,
            config,
            stop_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A clonable handle a caller (e.g. a Ctrl-C signal handler) can use to
    /// request cancellation without holding a reference to the session.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop_requested.clone()
    }

    /// Run every script in `selected`, in dependency order, against the
    /// configured write dataset, then promote whatever passed its tests.
    /// The single-incremental-field constraint (`CLI` flags would let a
    /// caller try to pass more than one) is enforced where those flags are
    /// parsed, not here: `SessionConfig` can only ever hold one.
    pub async fn run(&self, dag: &DagOfScripts, selected: HashSet<TableRef>) -> Result<RunSummary> {
        if !self.config.dry_run {
            self.client.create_dataset(&self.config.write_dataset).await?;
        }

        let existing_audit: HashSet<TableRef> = if self.config.fresh || self.config.dry_run {
            HashSet::new()
        } else {
            self.client
                .list_tables(&self.config.write_dataset)
                .await
                .unwrap_or_default()
                .into_iter()
                .filter(|t| t.is_audit_table())
                .collect()
        };

        let mut prepared: HashMap<TableRef, PreparedScript> = HashMap::new();
        for table_ref in &selected {
            if let Some(script) = dag.get_script(table_ref) {
                prepared.insert(
                    table_ref.clone(),
                    self.prepare_script(script, dag, &selected, &existing_audit),
                );
            }
        }

        let outcomes = self.run_audit_phase(dag, selected.clone(), &prepared).await;
        let any_errored = outcomes.iter().any(|o| o.status == RunStatus::Errored);

        let mut all_outcomes = outcomes;
        if !self.config.dry_run && !any_errored {
            let promotions = self
                .run_promotion_phase(dag, &selected, &prepared, &all_outcomes)
                .await;
            all_outcomes.extend(promotions);
        }

        let summary = RunSummary {
            outcomes: all_outcomes,
        };
        self.sink.session_ended(
            summary.total_billed_dollars(),
            summary.outcomes.iter().filter(|o| o.status == RunStatus::Errored).count(),
        );
        Ok(summary)
    }

    /// The four compositional rewrite passes, applied in order: redirect
    /// dependencies to audit siblings, filter filterable scan sources by
    /// the incremental field, stitch non-incremental dependents onto
    /// incremental dependencies, and re-target the script's own output.
    fn prepare_script(
        &self,
        script: &Script,
        dag: &DagOfScripts,
        selected: &HashSet<TableRef>,
        existing_audit: &HashSet<TableRef>,
    ) -> PreparedScript {
        let to_redirect = dependencies_to_redirect(script.dependencies.iter(), selected, existing_audit);
        let mut code = script.code.clone();

        // Pass 1: dependency redirection.
        for dep in &script.dependencies {
            if dep.project.is_some() && dep.project != script.table_ref.project {
                continue;
            }
            let mut new_dep = dep.replace_dataset(self.config.write_dataset.clone());
            if to_redirect.contains(dep) {
                new_dep = new_dep.add_audit_suffix();
            }
            code = replace_table_reference(&code, self.sql_dialect.as_ref(), dep, &new_dep);
        }

        if let Some(field) = self.config.incremental_field_name.clone() {
            let values = &self.config.incremental_field_values;
            if !values.is_empty() {
                // Pass 2: filter filterable (non-incremental) scan-source
                // dependencies, then wrap this script's own output if it's
                // incremental itself.
                for dep in &script.dependencies {
                    let dep_is_incremental = dag
                        .get_script(dep)
                        .map(|d| d.is_incremental_eligible())
                        .unwrap_or(false);
                    let dep_has_field = dag
                        .get_script(dep)
                        .map(|d| d.fields.iter().any(|f| f.name == field))
                        .unwrap_or(false);
                    if !dep_is_incremental && dep_has_field {
                        code = filter_dependency_by_field(
                            &code,
                            self.sql_dialect.as_ref(),
                            dep,
                            &field,
                            values,
                        );
                    }
                }
                if script.is_incremental_eligible() {
                    code = filter_output_by_field(&code, &field, values);
                }

                // Pass 3: stitch this script onto incremental dependencies
                // if it isn't incremental itself.
                if !script.is_incremental_eligible() {
                    for dep in &script.dependencies {
                        let dep_is_incremental = dag
                            .get_script(dep)
                            .map(|d| d.is_incremental_eligible())
                            .unwrap_or(false);
                        if dep_is_incremental {
                            code = stitch_incremental_dependency(
                                &code,
                                self.sql_dialect.as_ref(),
                                dep,
                                &field,
                                values,
                            );
                        }
                    }
                }
            }
        }

        // Pass 4: self re-target. Tests don't write anything, so they keep
        // their own identity rather than gaining an audit-suffixed target.
        let audit_table_ref = if script.is_test() {
            script.table_ref.clone()
        } else {
            script
                .table_ref
                .replace_dataset(self.config.write_dataset.clone())
                .add_audit_suffix()
        };

        PreparedScript {
            audit_table_ref,
            is_test: script.is_test(),
            code,
            incremental_field: script.incremental_field().map(|f| f.name.clone()),
        }
    }

    /// Drain the ready-queue, submitting each ready script (or test) to the
    /// warehouse with bounded concurrency, until every selected node is
    /// done. On an error without `keep_going`, or once external
    /// cancellation is requested, new nodes stop being submitted - but
    /// every task already in flight is always drained to its terminal
    /// outcome before this returns, so an independent branch that's
    /// already running finishes rather than being abandoned.
    async fn run_audit_phase(
        &self,
        dag: &DagOfScripts,
        selected: HashSet<TableRef>,
        prepared: &HashMap<TableRef, PreparedScript>,
    ) -> Vec<ScriptOutcome> {
        let mut scheduler = Scheduler::new(dag, selected);
        let semaphore = Arc::new(Semaphore::new(self.config.threads.max(1)));
        let (tx, mut rx) = mpsc::unbounded_channel::<ScriptOutcome>();
        let mut in_flight: HashSet<TableRef> = HashSet::new();
        let mut outcomes = Vec::new();
        let mut failed: HashSet<TableRef> = HashSet::new();
        let mut halt_new_submissions = false;

        loop {
            if self.stop_requested.load(Ordering::SeqCst) {
                halt_new_submissions = true;
            }

            if !halt_new_submissions {
                for table_ref in scheduler.ready() {
                    let Some(prepared_script) = prepared.get(&table_ref) else {
                        // External table, never a script: mark done immediately.
                        scheduler.done(&table_ref);
                        continue;
                    };

                    let upstream_failed = dag
                        .dependencies(&table_ref)
                        .iter()
                        .any(|d| failed.contains(d));
                    if upstream_failed {
                        scheduler.done(&table_ref);
                        continue;
                    }

                    in_flight.insert(table_ref.clone());
                    let permit = semaphore.clone().acquire_owned().await.expect("semaphore open");
                    let client = self.client.clone();
                    let sink = self.sink.clone();
                    let tx = tx.clone();
                    let table_ref_for_task = table_ref.clone();
                    let prepared_script = prepared_script.clone();
                    let dry_run = self.config.dry_run;
                    let stop_requested = self.stop_requested.clone();

                    tokio::spawn(async move {
                        let _permit = permit;
                        let outcome = if dry_run {
                            ScriptOutcome {
                                table_ref: table_ref_for_task.clone(),
                                status: RunStatus::Success,
                                billed_dollars: 0.0,
                                n_rows: 0,
                                error: None,
                            }
                        } else {
                            run_one(
                                client.as_ref(),
                                sink.as_ref(),
                                &table_ref_for_task,
                                &prepared_script,
                                stop_requested,
                            )
                            .await
                        };
                        let _ = tx.send(outcome);
                    });
                }
            }

            if in_flight.is_empty() {
                // Either every selected node is done, or submissions are
                // halted and nothing already running is left to wait for.
                break;
            }

            match rx.recv().await {
                Some(outcome) => {
                    in_flight.remove(&outcome.table_ref);
                    scheduler.done(&outcome.table_ref);
                    if outcome.status == RunStatus::Errored {
                        failed.insert(outcome.table_ref.clone());
                        if !self.config.keep_going {
                            halt_new_submissions = true;
                        }
                    }
                    outcomes.push(outcome);
                }
                None => break,
            }
        }

        outcomes
    }

    /// Promote every non-test script whose materialization succeeded and
    /// whose assertion tests all came back clean (zero offending rows).
    async fn run_promotion_phase(
        &self,
        dag: &DagOfScripts,
        selected: &HashSet<TableRef>,
        prepared: &HashMap<TableRef, PreparedScript>,
        outcomes: &[ScriptOutcome],
    ) -> Vec<ScriptOutcome> {
        let outcome_by_ref: HashMap<&TableRef, &ScriptOutcome> =
            outcomes.iter().map(|o| (&o.table_ref, o)).collect();

        let mut promotions = Vec::new();
        for table_ref in selected {
            let Some(prepared_script) = prepared.get(table_ref) else {
                continue;
            };
            if prepared_script.is_test {
                continue;
            }
            let Some(own_outcome) = outcome_by_ref.get(table_ref) else {
                continue;
            };
            if own_outcome.status != RunStatus::Success {
                continue;
            }

            let tests_clean = dag.dependents(table_ref).iter().all(|dependent| {
                if !dependent.is_test() {
                    return true;
                }
                matches!(
                    outcome_by_ref.get(dependent),
                    Some(ScriptOutcome { status: RunStatus::Success, n_rows: 0, .. })
                )
            });

            if !tests_clean {
                self.sink.promotion_finished(table_ref, "SKIPPED (failed tests)");
                continue;
            }

            self.sink.promotion_started(table_ref);
            let production_ref = table_ref.clone();
            let result = match &prepared_script.incremental_field {
                Some(field) => {
                    self.client
                        .delete_and_insert(&prepared_script.audit_table_ref, &production_ref, field)
                        .await
                }
                None => {
                    self.client
                        .clone_table(&prepared_script.audit_table_ref, &production_ref)
                        .await
                }
            };

            let outcome = match result {
                Ok(job) => {
                    while !job.is_done() {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                    match job.exception() {
                        Some(error) => ScriptOutcome {
                            table_ref: production_ref.clone(),
                            status: RunStatus::Errored,
                            billed_dollars: job.billed_dollars(),
                            n_rows: job.statistics().n_rows,
                            error: Some(error),
                        },
                        None => ScriptOutcome {
                            table_ref: production_ref.clone(),
                            status: RunStatus::Success,
                            billed_dollars: job.billed_dollars(),
                            n_rows: job.statistics().n_rows,
                            error: None,
                        },
                    }
                }
                Err(err) => ScriptOutcome {
                    table_ref: production_ref.clone(),
                    status: RunStatus::Errored,
                    billed_dollars: 0.0,
                    n_rows: 0,
                    error: Some(err.to_string()),
                },
            };
            self.sink
                .promotion_finished(&production_ref, &outcome.status.to_string());
            promotions.push(outcome);
        }
        promotions
    }

    /// Stop every in-flight job and mark the session ended. Safe to call
    /// even if nothing is running.
    pub async fn end(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }
}

async fn run_one(
    client: &dyn DatabaseClient,
    sink: &dyn EventSink,
    table_ref: &TableRef,
    prepared: &PreparedScript,
    stop_requested: Arc<AtomicBool>,
) -> ScriptOutcome {
    sink.job_started(&prepared.audit_table_ref, prepared.is_test);

    let submission = if prepared.is_test {
        client.query_script(&prepared.audit_table_ref, &prepared.code).await
    } else {
        client
            .materialize_script(&prepared.audit_table_ref, &prepared.code)
            .await
    };

    let job = match submission {
        Ok(job) => job,
        Err(err) => {
            return ScriptOutcome {
                table_ref: table_ref.clone(),
                status: RunStatus::Errored,
                billed_dollars: 0.0,
                n_rows: 0,
                error: Some(err.to_string()),
            };
        }
    };

    monitor_job(job.as_ref(), sink, stop_requested).await;

    let table_ref = table_ref.clone();
    if let Some(error) = job.exception() {
        sink.job_finished(&table_ref, "ERRORED", job.billed_dollars(), job.statistics().n_rows);
        return ScriptOutcome {
            table_ref,
            status: RunStatus::Errored,
            billed_dollars: job.billed_dollars(),
            n_rows: job.statistics().n_rows,
            error: Some(error),
        };
    }

    if prepared.is_test {
        let n_rows = job.result().await.unwrap_or(0);
        let status = if n_rows > 0 { RunStatus::Errored } else { RunStatus::Success };
        sink.job_finished(&table_ref, &status.to_string(), job.billed_dollars(), n_rows);
        return ScriptOutcome {
            table_ref,
            status,
            billed_dollars: job.billed_dollars(),
            n_rows,
            error: if status == RunStatus::Errored {
                Some(format!("{n_rows} row(s) failed the assertion"))
            } else {
                None
            },
        };
    }

    let _ = job.conclude().await;
    let n_rows = job.statistics().n_rows;
    sink.job_finished(&table_ref, "SUCCESS", job.billed_dollars(), n_rows);
    ScriptOutcome {
        table_ref,
        status: RunStatus::Success,
        billed_dollars: job.billed_dollars(),
        n_rows,
        error: None,
    }
}

/// Poll a job to completion with exponential backoff (1s, doubling, capped
/// at 10s), logging a heartbeat whenever at least 10s have elapsed since
/// the last one. Stops early (without cancelling the job itself here -
/// that's `Session::end`'s job) if cancellation was requested.
async fn monitor_job(job: &dyn Job, sink: &dyn EventSink, stop_requested: Arc<AtomicBool>) {
    let started = Instant::now();
    let mut backoff = BACKOFF_START;
    let mut last_heartbeat = started;

    loop {
        if job.is_done() {
            return;
        }
        if stop_requested.load(Ordering::SeqCst) {
            let _ = job.stop().await;
            return;
        }

        if last_heartbeat.elapsed() >= HEARTBEAT_EVERY {
            sink.job_heartbeat(job.table_ref(), started.elapsed().as_secs());
            last_heartbeat = Instant::now();
        }

        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(BACKOFF_CAP);
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
