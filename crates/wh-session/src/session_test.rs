use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use wh_core::{DagOfScripts, Dialect, Field, FieldTag, Script, ScriptSource, Selector, TableRef};
use wh_db::{DatabaseClient, DuckDbClient, Job, JobStatistics};
use wh_sql::DuckDbDialect;

use super::*;
use crate::sink::LogEventSink;

fn table(dataset: &str, schema: &[&str], name: &str) -> TableRef {
    TableRef::new(
        None,
        dataset,
        schema.iter().map(|s| s.to_string()).collect(),
        name.to_string(),
    )
}

fn customers_script(table_ref: TableRef) -> Script {
    let mut script = Script::new(
        table_ref,
        Dialect::DuckDb,
        "SELECT 1 AS id".to_string(),
        ScriptSource::File {
            relative_path: "staging/customers.sql".into(),
        },
    );
    script.fields = vec![Field::new("id".to_string(), vec![FieldTag::NoNulls])];
    script
}

fn all_table_refs(dag: &DagOfScripts) -> HashSet<TableRef> {
    dag.table_refs().filter(|t| dag.is_script(t)).cloned().collect()
}

#[tokio::test]
async fn runs_and_promotes_a_clean_script() {
    let table_ref = table("prod", &["staging"], "customers");
    let script = customers_script(table_ref.clone());
    let tests = wh_test::build_assertion_tests(&script, &DuckDbDialect).unwrap();

    let mut scripts = tests;
    scripts.push(script);
    let dag = DagOfScripts::build(scripts).unwrap();
    let selected = all_table_refs(&dag);

    let client: Arc<dyn DatabaseClient> = Arc::new(DuckDbClient::in_memory().unwrap());
    client.create_dataset("prod").await.unwrap();

    let sql_dialect: Arc<dyn SqlDialect> = Arc::new(DuckDbDialect);
    let sink: Arc<dyn EventSink> = Arc::new(LogEventSink);
    let config = SessionConfig {
        write_dataset: "prod_audit".to_string(),
        threads: 2,
        fresh: true,
        ..SessionConfig::default()
    };
    let session = Session::new(client.clone(), sql_dialect, sink, config);

    let summary = session.run(&dag, selected).await.unwrap();
    assert!(!summary.any_error_has_occurred(), "{:?}", summary.outcomes);

    let promoted = client.list_tables("prod").await.unwrap();
    assert!(promoted.iter().any(|t| t.name == "customers" && !t.is_audit_table()));
}

#[tokio::test]
async fn a_failing_test_blocks_promotion() {
    let table_ref = table("prod", &["staging"], "orders");
    let mut script = Script::new(
        table_ref.clone(),
        Dialect::DuckDb,
        "SELECT NULL AS id".to_string(),
        ScriptSource::File {
            relative_path: "staging/orders.sql".into(),
        },
    );
    script.fields = vec![Field::new("id".to_string(), vec![FieldTag::NoNulls])];
    let tests = wh_test::build_assertion_tests(&script, &DuckDbDialect).unwrap();

    let mut scripts = tests;
    scripts.push(script);
    let dag = DagOfScripts::build(scripts).unwrap();
    let selected = all_table_refs(&dag);

    let client: Arc<dyn DatabaseClient> = Arc::new(DuckDbClient::in_memory().unwrap());
    client.create_dataset("prod").await.unwrap();

    let sql_dialect: Arc<dyn SqlDialect> = Arc::new(DuckDbDialect);
    let sink: Arc<dyn EventSink> = Arc::new(LogEventSink);
    let config = SessionConfig {
        write_dataset: "prod_audit".to_string(),
        threads: 2,
        fresh: true,
        keep_going: true,
        ..SessionConfig::default()
    };
    let session = Session::new(client.clone(), sql_dialect, sink, config);

    let summary = session.run(&dag, selected).await.unwrap();
    assert!(summary.any_error_has_occurred());

    let promoted = client.list_tables("prod").await.unwrap();
    assert!(!promoted.iter().any(|t| t.name == "orders" && !t.is_audit_table()));
}

#[test]
fn prepare_script_redirects_dependencies_to_their_audit_siblings() {
    let parent_ref = table("prod", &["staging"], "customers");
    let child_ref = table("prod", &["core"], "customers");

    let parent = customers_script(parent_ref.clone());
    let mut child = Script::new(
        child_ref.clone(),
        Dialect::DuckDb,
        "SELECT id FROM prod.staging__customers".to_string(),
        ScriptSource::File {
            relative_path: "core/customers.sql".into(),
        },
    );
    child.dependencies.insert(parent_ref.clone());

    let dag = DagOfScripts::build(vec![parent, child.clone()]).unwrap();

    let client: Arc<dyn DatabaseClient> = Arc::new(DuckDbClient::in_memory().unwrap());
    let sql_dialect: Arc<dyn SqlDialect> = Arc::new(DuckDbDialect);
    let sink: Arc<dyn EventSink> = Arc::new(LogEventSink);
    let config = SessionConfig {
        write_dataset: "prod_audit".to_string(),
        ..SessionConfig::default()
    };
    let session = Session::new(client, sql_dialect, sink, config);

    let mut selected = HashSet::new();
    selected.insert(parent_ref);
    selected.insert(child_ref);

    let prepared = session.prepare_script(&child, &dag, &selected, &HashSet::new());
    assert!(prepared.code.contains("prod_audit.staging__customers___audit"));
}

async fn probe(client: &Arc<dyn DatabaseClient>, sql: &str) -> u64 {
    let probe_ref = table("prod", &["_probe"], "check");
    let job = client.query_script(&probe_ref, sql).await.unwrap();
    while !job.is_done() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    job.result().await.unwrap()
}

/// S1: a simple three-script chain, selected and run end to end, ends with
/// the aggregate's production table holding the one expected row.
#[tokio::test]
async fn s1_simple_chain_promotes_the_expected_row_count() {
    let raw_users = table("prod", &["raw"], "users");
    let core_users = table("prod", &["core"], "users");
    let n_users = table("prod", &["analytics"], "n_users");

    let raw_users_script = Script::new(
        raw_users.clone(),
        Dialect::DuckDb,
        "SELECT * FROM (VALUES (1,'Alice',30),(2,'Bob',25),(3,'Charlie',35)) AS t(id,name,age)",
        ScriptSource::File { relative_path: "raw/users.sql".into() },
    );
    let mut core_users_script = Script::new(
        core_users.clone(),
        Dialect::DuckDb,
        "SELECT id,name,age FROM prod.raw__users",
        ScriptSource::File { relative_path: "core/users.sql".into() },
    );
    core_users_script.dependencies.insert(raw_users.clone());
    let mut n_users_script = Script::new(
        n_users.clone(),
        Dialect::DuckDb,
        "SELECT COUNT(*) AS n FROM prod.core__users",
        ScriptSource::File { relative_path: "analytics/n_users.sql".into() },
    );
    n_users_script.dependencies.insert(core_users.clone());

    let dag = DagOfScripts::build(vec![raw_users_script, core_users_script, n_users_script]).unwrap();
    let selected = all_table_refs(&dag);

    let client: Arc<dyn DatabaseClient> = Arc::new(DuckDbClient::in_memory().unwrap());
    client.create_dataset("prod").await.unwrap();

    let sql_dialect: Arc<dyn SqlDialect> = Arc::new(DuckDbDialect);
    let sink: Arc<dyn EventSink> = Arc::new(LogEventSink);
    let config = SessionConfig {
        write_dataset: "prod_audit".to_string(),
        threads: 2,
        fresh: true,
        ..SessionConfig::default()
    };
    let session = Session::new(client.clone(), sql_dialect, sink, config);

    let summary = session.run(&dag, selected).await.unwrap();
    assert!(!summary.any_error_has_occurred(), "{:?}", summary.outcomes);

    let matching_rows = probe(&client, "SELECT n FROM prod.analytics__n_users WHERE n = 3").await;
    assert_eq!(matching_rows, 1);
}

/// S2: the incremental rewrite passes produce the literal SQL the write-
/// audit-publish contract promises - a filtered subquery wrapping the
/// incremental script's own output, and dependency redirection into the
/// write dataset's audit-suffixed sibling.
#[test]
fn s2_incremental_rewrite_produces_the_documented_sql() {
    let raw_users = table("prod", &["raw"], "users");
    let core_users = table("prod", &["core"], "users");
    let n_users = table("prod", &["analytics"], "n_users");

    let raw_users_script = Script::new(
        raw_users.clone(),
        Dialect::DuckDb,
        "SELECT * FROM (VALUES (1,'Alice',30)) AS t(id,name,age)",
        ScriptSource::File { relative_path: "raw/users.sql".into() },
    );
    let mut core_users_script = Script::new(
        core_users.clone(),
        Dialect::DuckDb,
        "SELECT id,name,age FROM prod.raw__users",
        ScriptSource::File { relative_path: "core/users.sql".into() },
    );
    core_users_script.dependencies.insert(raw_users.clone());
    core_users_script.fields = vec![Field::new("name", vec![FieldTag::Incremental])];

    let mut n_users_script = Script::new(
        n_users.clone(),
        Dialect::DuckDb,
        "SELECT COUNT(*) AS n FROM prod.core__users",
        ScriptSource::File { relative_path: "analytics/n_users.sql".into() },
    );
    n_users_script.dependencies.insert(core_users.clone());

    let dag = DagOfScripts::build(vec![raw_users_script, core_users_script.clone(), n_users_script.clone()]).unwrap();
    let selected: HashSet<TableRef> = [raw_users, core_users, n_users].into_iter().collect();

    let client: Arc<dyn DatabaseClient> = Arc::new(DuckDbClient::in_memory().unwrap());
    let sql_dialect: Arc<dyn SqlDialect> = Arc::new(DuckDbDialect);
    let sink: Arc<dyn EventSink> = Arc::new(LogEventSink);
    let config = SessionConfig {
        write_dataset: "prod_audit".to_string(),
        incremental_field_name: Some("name".to_string()),
        incremental_field_values: vec!["Alice".to_string()],
        ..SessionConfig::default()
    };
    let session = Session::new(client, sql_dialect, sink, config);

    let prepared_core = session.prepare_script(&core_users_script, &dag, &selected, &HashSet::new());
    assert_eq!(
        prepared_core.code,
        "SELECT * FROM (\nSELECT id,name,age FROM prod_audit.raw__users___audit\n) AS waphouse_incremental_output WHERE name IN ('Alice')"
    );

    let prepared_n_users = session.prepare_script(&n_users_script, &dag, &selected, &HashSet::new());
    assert!(prepared_n_users.code.contains("prod_audit.core__users___audit"));
}

/// S4: a script in an independent subgraph A errors; its own dependent is
/// skipped, but the unrelated subgraph B still runs to completion, and
/// nothing anywhere gets promoted.
#[tokio::test]
async fn s4_partial_failure_lets_the_independent_subgraph_finish() {
    let a_root = table("prod", &["a"], "root");
    let a_child = table("prod", &["a"], "child");
    let b_root = table("prod", &["b"], "root");

    let a_root_script = Script::new(
        a_root.clone(),
        Dialect::DuckDb,
        "SELECT * FROM this_table_does_not_exist",
        ScriptSource::File { relative_path: "a/root.sql".into() },
    );
    let mut a_child_script = Script::new(
        a_child.clone(),
        Dialect::DuckDb,
        "SELECT * FROM prod.a__root",
        ScriptSource::File { relative_path: "a/child.sql".into() },
    );
    a_child_script.dependencies.insert(a_root.clone());
    let b_root_script = Script::new(
        b_root.clone(),
        Dialect::DuckDb,
        "SELECT 1 AS x",
        ScriptSource::File { relative_path: "b/root.sql".into() },
    );

    let dag = DagOfScripts::build(vec![a_root_script, a_child_script, b_root_script]).unwrap();
    let selected = all_table_refs(&dag);

    let client: Arc<dyn DatabaseClient> = Arc::new(DuckDbClient::in_memory().unwrap());
    client.create_dataset("prod").await.unwrap();

    let sql_dialect: Arc<dyn SqlDialect> = Arc::new(DuckDbDialect);
    let sink: Arc<dyn EventSink> = Arc::new(LogEventSink);
    let config = SessionConfig {
        write_dataset: "prod_audit".to_string(),
        threads: 4,
        fresh: true,
        ..SessionConfig::default()
    };
    let session = Session::new(client.clone(), sql_dialect, sink, config);

    let summary = session.run(&dag, selected).await.unwrap();
    assert!(summary.any_error_has_occurred());

    let outcome_refs: HashSet<TableRef> = summary.outcomes.iter().map(|o| o.table_ref.clone()).collect();
    assert!(outcome_refs.contains(&a_root));
    assert!(outcome_refs.contains(&b_root));
    assert!(!outcome_refs.contains(&a_child), "a.child should never have been submitted");

    let b_outcome = summary.outcomes.iter().find(|o| o.table_ref == b_root).unwrap();
    assert_eq!(b_outcome.status, RunStatus::Success);

    assert!(client.list_tables("prod").await.unwrap().is_empty(), "nothing should be promoted");
}

/// S5: the selector DSL over the exact fixture shape the project's
/// documentation uses - a staging/core/analytics chain with a nested
/// schema at the tip.
#[test]
fn s5_selector_dsl_over_the_documented_fixture() {
    let staging_customers = table("ds", &["staging"], "customers");
    let staging_orders = table("ds", &["staging"], "orders");
    let staging_payments = table("ds", &["staging"], "payments");
    let core_customers = table("ds", &["core"], "customers");
    let core_orders = table("ds", &["core"], "orders");
    let analytics_kpis = table("ds", &["analytics"], "kpis");
    let analytics_finance_kpis = table("ds", &["analytics", "finance"], "kpis");

    let mut scripts = vec![
        Script::new(staging_customers.clone(), Dialect::DuckDb, "SELECT 1", ScriptSource::File { relative_path: "staging/customers.sql".into() }),
        Script::new(staging_orders.clone(), Dialect::DuckDb, "SELECT 1", ScriptSource::File { relative_path: "staging/orders.sql".into() }),
        Script::new(staging_payments.clone(), Dialect::DuckDb, "SELECT 1", ScriptSource::File { relative_path: "staging/payments.sql".into() }),
    ];
    let mut core_customers_script = Script::new(core_customers.clone(), Dialect::DuckDb, "SELECT 1", ScriptSource::File { relative_path: "core/customers.sql".into() });
    core_customers_script.dependencies = [staging_customers.clone(), staging_orders.clone(), staging_payments.clone()].into_iter().collect();
    let mut core_orders_script = Script::new(core_orders.clone(), Dialect::DuckDb, "SELECT 1", ScriptSource::File { relative_path: "core/orders.sql".into() });
    core_orders_script.dependencies = [staging_orders.clone(), staging_payments.clone()].into_iter().collect();
    let mut analytics_kpis_script = Script::new(analytics_kpis.clone(), Dialect::DuckDb, "SELECT 1", ScriptSource::File { relative_path: "analytics/kpis.sql".into() });
    analytics_kpis_script.dependencies = [core_customers.clone(), core_orders.clone()].into_iter().collect();
    let mut analytics_finance_kpis_script = Script::new(analytics_finance_kpis.clone(), Dialect::DuckDb, "SELECT 1", ScriptSource::File { relative_path: "analytics/finance/kpis.sql".into() });
    analytics_finance_kpis_script.dependencies = [analytics_kpis.clone()].into_iter().collect();

    scripts.extend([core_customers_script, core_orders_script, analytics_kpis_script, analytics_finance_kpis_script]);
    let dag = DagOfScripts::build(scripts).unwrap();

    let both_plus: HashSet<TableRef> = Selector::parse("+core.customers+").unwrap().apply(&dag);
    assert_eq!(
        both_plus,
        [
            staging_customers.clone(),
            staging_orders.clone(),
            staging_payments.clone(),
            core_customers.clone(),
            analytics_kpis.clone(),
        ]
        .into_iter()
        .collect::<HashSet<_>>()
    );

    let staging_slash: HashSet<TableRef> = Selector::parse("staging/").unwrap().apply(&dag);
    assert_eq!(
        staging_slash,
        [staging_customers, staging_orders, staging_payments].into_iter().collect::<HashSet<_>>()
    );

    let finance_slash: HashSet<TableRef> = Selector::parse("analytics/finance/").unwrap().apply(&dag);
    assert_eq!(finance_slash, [analytics_finance_kpis].into_iter().collect::<HashSet<_>>());
}

/// A `Job` that never reports done on its own; it only transitions to a
/// terminal, errored state once `stop()` is called, the way a warehouse
/// backend that genuinely supports mid-flight cancellation would behave.
struct StoppableJob {
    table_ref: TableRef,
    is_test: bool,
    stop_calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Job for StoppableJob {
    fn table_ref(&self) -> &TableRef {
        &self.table_ref
    }
    fn is_test(&self) -> bool {
        self.is_test
    }
    fn is_done(&self) -> bool {
        self.stop_calls.load(Ordering::SeqCst) > 0
    }
    fn exception(&self) -> Option<String> {
        if self.is_done() {
            Some("stopped".to_string())
        } else {
            None
        }
    }
    fn billed_dollars(&self) -> f64 {
        0.0
    }
    fn statistics(&self) -> JobStatistics {
        JobStatistics::default()
    }
    fn metadata(&self) -> std::collections::HashMap<String, String> {
        std::collections::HashMap::new()
    }
    async fn result(&self) -> wh_db::Result<u64> {
        Ok(0)
    }
    async fn stop(&self) -> wh_db::Result<()> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A `DatabaseClient` whose only job is a `StoppableJob`, with a counter on
/// every promotion-path call so a test can assert promotion never ran.
struct StoppableClient {
    stop_calls: Arc<AtomicUsize>,
    promote_calls: Arc<AtomicUsize>,
}

#[async_trait]
impl DatabaseClient for StoppableClient {
    async fn create_dataset(&self, _dataset: &str) -> wh_db::Result<()> {
        Ok(())
    }

    async fn materialize_script(&self, table_ref: &TableRef, _sql: &str) -> wh_db::Result<Box<dyn Job>> {
        Ok(Box::new(StoppableJob {
            table_ref: table_ref.clone(),
            is_test: false,
            stop_calls: self.stop_calls.clone(),
        }))
    }

    async fn query_script(&self, table_ref: &TableRef, _sql: &str) -> wh_db::Result<Box<dyn Job>> {
        Ok(Box::new(StoppableJob {
            table_ref: table_ref.clone(),
            is_test: true,
            stop_calls: self.stop_calls.clone(),
        }))
    }

    async fn clone_table(&self, _from: &TableRef, to: &TableRef) -> wh_db::Result<Box<dyn Job>> {
        self.promote_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StoppableJob {
            table_ref: to.clone(),
            is_test: false,
            stop_calls: Arc::new(AtomicUsize::new(1)),
        }))
    }

    async fn delete_and_insert(&self, _from: &TableRef, to: &TableRef, _on_field: &str) -> wh_db::Result<Box<dyn Job>> {
        self.promote_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StoppableJob {
            table_ref: to.clone(),
            is_test: false,
            stop_calls: Arc::new(AtomicUsize::new(1)),
        }))
    }

    async fn list_tables(&self, _dataset: &str) -> wh_db::Result<Vec<TableRef>> {
        Ok(Vec::new())
    }

    async fn list_columns(&self, _table_ref: &TableRef) -> wh_db::Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Fires once, when `job_started` is called, so a test can wait for a job
/// to genuinely be running before it signals cancellation.
struct SignalOnStartSink {
    started: Arc<tokio::sync::Notify>,
}

impl EventSink for SignalOnStartSink {
    fn job_started(&self, _table_ref: &TableRef, _is_test: bool) {
        self.started.notify_one();
    }
}

/// S6: signal stop once the one selected job is running; it should be
/// stopped exactly once, surface as an error, and promotion never runs.
#[tokio::test]
async fn s6_cancellation_mid_job_stops_the_job_and_skips_promotion() {
    let slow_job = table("prod", &["slow"], "job");
    let script = Script::new(
        slow_job.clone(),
        Dialect::DuckDb,
        "SELECT 1",
        ScriptSource::File { relative_path: "slow/job.sql".into() },
    );
    let dag = DagOfScripts::build(vec![script]).unwrap();
    let selected: HashSet<TableRef> = [slow_job.clone()].into_iter().collect();

    let stop_calls = Arc::new(AtomicUsize::new(0));
    let promote_calls = Arc::new(AtomicUsize::new(0));
    let client: Arc<dyn DatabaseClient> = Arc::new(StoppableClient {
        stop_calls: stop_calls.clone(),
        promote_calls: promote_calls.clone(),
    });

    let started = Arc::new(tokio::sync::Notify::new());
    let sql_dialect: Arc<dyn SqlDialect> = Arc::new(DuckDbDialect);
    let sink: Arc<dyn EventSink> = Arc::new(SignalOnStartSink { started: started.clone() });
    let session = Session::new(client.clone(), sql_dialect, sink, SessionConfig::default());

    let (run_result, ()) = tokio::join!(session.run(&dag, selected), async {
        started.notified().await;
        session.end().await;
    });

    let summary = run_result.unwrap();
    assert!(summary.any_error_has_occurred());
    assert_eq!(stop_calls.load(Ordering::SeqCst), 1);
    assert_eq!(promote_calls.load(Ordering::SeqCst), 0);
}
