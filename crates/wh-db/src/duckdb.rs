use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use wh_core::TableRef;
use wh_sql::{DuckDbDialect, SqlDialect};

use crate::error::{DbError, Result};
use crate::traits::{DatabaseClient, Job, JobStatistics};

enum JobOutcome {
    Success { n_rows: u64 },
    Errored(String),
}

/// A `Job` backed by a task already spawned onto the tokio runtime. DuckDB
/// itself is synchronous, so "in flight" really means "the spawned task
/// hasn't finished yet" rather than a warehouse-side async operation, but
/// the polling contract is the same either way.
pub struct DuckDbJob {
    table_ref: TableRef,
    is_test: bool,
    outcome: Arc<StdMutex<Option<JobOutcome>>>,
}

#[async_trait]
impl Job for DuckDbJob {
    fn table_ref(&self) -> &TableRef {
        &self.table_ref
    }

    fn is_test(&self) -> bool {
        self.is_test
    }

    fn is_done(&self) -> bool {
        self.outcome.lock().unwrap().is_some()
    }

    fn exception(&self) -> Option<String> {
        match &*self.outcome.lock().unwrap() {
            Some(JobOutcome::Errored(message)) => Some(message.clone()),
            _ => None,
        }
    }

    fn billed_dollars(&self) -> f64 {
        0.0
    }

    fn statistics(&self) -> JobStatistics {
        match &*self.outcome.lock().unwrap() {
            Some(JobOutcome::Success { n_rows }) => JobStatistics {
                n_rows: *n_rows,
                n_bytes: 0,
            },
            _ => JobStatistics::default(),
        }
    }

    fn metadata(&self) -> HashMap<String, String> {
        HashMap::new()
    }

    async fn result(&self) -> Result<u64> {
        match &*self.outcome.lock().unwrap() {
            Some(JobOutcome::Success { n_rows }) => Ok(*n_rows),
            Some(JobOutcome::Errored(message)) => Err(DbError::Warehouse(message.clone())),
            None => Ok(0),
        }
    }

    async fn stop(&self) -> Result<()> {
        // DuckDB statements run to completion on their own blocking thread;
        // there is no native in-flight cancellation to request here.
        Ok(())
    }
}

/// A `DatabaseClient` backed by a single DuckDB connection, shared behind a
/// blocking `Mutex` since the `duckdb` crate's `Connection` is `!Sync`.
pub struct DuckDbClient {
    conn: Arc<StdMutex<duckdb::Connection>>,
    dialect: DuckDbDialect,
}

impl DuckDbClient {
    pub fn in_memory() -> Result<Self> {
        let conn = duckdb::Connection::open_in_memory()
            .map_err(|e| DbError::Warehouse(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(StdMutex::new(conn)),
            dialect: DuckDbDialect,
        })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let conn = duckdb::Connection::open(path.as_ref())
            .map_err(|e| DbError::Warehouse(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(StdMutex::new(conn)),
            dialect: DuckDbDialect,
        })
    }

    /// Spawn the given statements on a blocking thread and return a `Job`
    /// that resolves once they've run. `count_query`, if given, is run
    /// after the statements to populate the job's row-count statistic (a
    /// materialization counts its own output; a test query counts its own
    /// result set, which doubles as the pass/fail signal).
    fn spawn_job(
        &self,
        table_ref: TableRef,
        is_test: bool,
        statements: Vec<String>,
        count_query: Option<String>,
    ) -> Box<dyn Job> {
        let outcome = Arc::new(StdMutex::new(None));
        let outcome_for_task = outcome.clone();
        let conn = self.conn.clone();

        tokio::spawn(async move {
            let run = tokio::task::spawn_blocking(move || -> std::result::Result<u64, String> {
                let conn = conn.lock().map_err(|_| "connection mutex poisoned".to_string())?;
                for statement in &statements {
                    conn.execute_batch(statement).map_err(|e| e.to_string())?;
                }
                match &count_query {
                    Some(query) => {
                        let mut stmt = conn.prepare(query).map_err(|e| e.to_string())?;
                        let n_rows: i64 = stmt
                            .query_row([], |row| row.get(0))
                            .map_err(|e| e.to_string())?;
                        Ok(n_rows.max(0) as u64)
                    }
                    None => Ok(0),
                }
            })
            .await;

            let outcome = match run {
                Ok(Ok(n_rows)) => JobOutcome::Success { n_rows },
                Ok(Err(message)) => JobOutcome::Errored(message),
                Err(join_err) => JobOutcome::Errored(join_err.to_string()),
            };
            *outcome_for_task.lock().unwrap() = Some(outcome);
        });

        Box::new(DuckDbJob {
            table_ref,
            is_test,
            outcome,
        })
    }
}

#[async_trait]
impl DatabaseClient for DuckDbClient {
    async fn create_dataset(&self, dataset: &str) -> Result<()> {
        let conn = self.conn.clone();
        let statement = format!("CREATE SCHEMA IF NOT EXISTS {dataset}");
        tokio::task::spawn_blocking(move || {
            conn.lock()
                .map_err(|_| DbError::Warehouse("connection mutex poisoned".into()))?
                .execute_batch(&statement)
                .map_err(|e| DbError::Warehouse(e.to_string()))
        })
        .await??;
        Ok(())
    }

    async fn materialize_script(&self, table_ref: &TableRef, sql: &str) -> Result<Box<dyn Job>> {
        let physical = self.dialect.format_table_ref(table_ref);
        let statement = format!("CREATE OR REPLACE TABLE {physical} AS {sql}");
        let count_query = format!("SELECT COUNT(*) FROM {physical}");
        Ok(self.spawn_job(table_ref.clone(), false, vec![statement], Some(count_query)))
    }

    async fn query_script(&self, table_ref: &TableRef, sql: &str) -> Result<Box<dyn Job>> {
        let count_query = format!("SELECT COUNT(*) FROM ({sql}) AS waphouse_test_query");
        Ok(self.spawn_job(table_ref.clone(), true, Vec::new(), Some(count_query)))
    }

    async fn clone_table(&self, from: &TableRef, to: &TableRef) -> Result<Box<dyn Job>> {
        let from_physical = self.dialect.format_table_ref(from);
        let to_physical = self.dialect.format_table_ref(to);
        let statement = format!("CREATE OR REPLACE TABLE {to_physical} AS SELECT * FROM {from_physical}");
        let count_query = format!("SELECT COUNT(*) FROM {to_physical}");
        Ok(self.spawn_job(to.clone(), false, vec![statement], Some(count_query)))
    }

    async fn delete_and_insert(
        &self,
        from: &TableRef,
        to: &TableRef,
        on_field: &str,
    ) -> Result<Box<dyn Job>> {
        let from_physical = self.dialect.format_table_ref(from);
        let to_physical = self.dialect.format_table_ref(to);
        let statements = vec![format!(
            "BEGIN TRANSACTION; \
             DELETE FROM {to_physical} WHERE {on_field} IN (SELECT DISTINCT {on_field} FROM {from_physical}); \
             INSERT INTO {to_physical} SELECT * FROM {from_physical}; \
             COMMIT;"
        )];
        let count_query = format!("SELECT COUNT(*) FROM {to_physical}");
        Ok(self.spawn_job(to.clone(), false, statements, Some(count_query)))
    }

    async fn list_tables(&self, dataset: &str) -> Result<Vec<TableRef>> {
        let conn = self.conn.clone();
        let dataset_owned = dataset.to_string();
        let rows: Vec<(String, String)> = tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| DbError::Warehouse("connection mutex poisoned".into()))?;
            let mut stmt = conn
                .prepare("SELECT table_schema, table_name FROM information_schema.tables WHERE table_schema = ?")
                .map_err(|e| DbError::Warehouse(e.to_string()))?;
            let rows = stmt
                .query_map([&dataset_owned], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })
                .map_err(|e| DbError::Warehouse(e.to_string()))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| DbError::Warehouse(e.to_string()))?;
            Ok::<_, DbError>(rows)
        })
        .await??;

        Ok(rows
            .into_iter()
            .map(|(schema, name)| self.dialect.parse_table_ref(&schema, &format!("{schema}.{name}")))
            .collect())
    }

    async fn list_columns(&self, table_ref: &TableRef) -> Result<Vec<String>> {
        let conn = self.conn.clone();
        let physical = self.dialect.format_table_ref(table_ref);
        let (schema, name) = physical
            .split_once('.')
            .map(|(s, n)| (s.to_string(), n.to_string()))
            .unwrap_or((table_ref.dataset.clone(), physical.clone()));

        let columns: Vec<String> = tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| DbError::Warehouse("connection mutex poisoned".into()))?;
            let mut stmt = conn
                .prepare(
                    "SELECT column_name FROM information_schema.columns \
                     WHERE table_schema = ? AND table_name = ? ORDER BY ordinal_position",
                )
                .map_err(|e| DbError::Warehouse(e.to_string()))?;
            let columns = stmt
                .query_map([&schema, &name], |row| row.get::<_, String>(0))
                .map_err(|e| DbError::Warehouse(e.to_string()))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| DbError::Warehouse(e.to_string()))?;
            Ok::<_, DbError>(columns)
        })
        .await??;
        Ok(columns)
    }
}

#[cfg(test)]
#[path = "duckdb_test.rs"]
mod tests;
