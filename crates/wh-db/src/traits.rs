use std::collections::HashMap;

use async_trait::async_trait;
use wh_core::TableRef;

use crate::error::Result;

#[derive(Debug, Clone, Default)]
pub struct JobStatistics {
    pub n_rows: u64,
    pub n_bytes: u64,
}

/// A handle to warehouse work in flight. Mirrors a Protocol-style contract:
/// any warehouse (synchronous or genuinely async) can implement it as long
/// as it can report whether it's done and what it cost.
#[async_trait]
pub trait Job: Send + Sync {
    fn table_ref(&self) -> &TableRef;
    fn is_test(&self) -> bool;
    fn is_done(&self) -> bool;
    fn exception(&self) -> Option<String>;
    fn billed_dollars(&self) -> f64;
    fn statistics(&self) -> JobStatistics;
    fn metadata(&self) -> HashMap<String, String>;

    /// For a test job: the number of rows the assertion query returned
    /// (non-zero means the assertion failed). For a materialization job:
    /// always `Ok(0)`.
    async fn result(&self) -> Result<u64>;

    /// Request cancellation of in-flight work. A no-op if already done.
    async fn stop(&self) -> Result<()>;

    /// Called once after a successful job finishes. No-op by default; a
    /// future warehouse backend may use it to record statistics.
    async fn conclude(&self) -> Result<()> {
        Ok(())
    }
}

/// The narrow surface `Session` needs from a warehouse: submit work, get a
/// pollable `Job` back, never block the caller on completion.
#[async_trait]
pub trait DatabaseClient: Send + Sync {
    async fn create_dataset(&self, dataset: &str) -> Result<()>;

    async fn materialize_script(
        &self,
        table_ref: &TableRef,
        sql: &str,
    ) -> Result<Box<dyn Job>>;

    async fn query_script(&self, table_ref: &TableRef, sql: &str) -> Result<Box<dyn Job>>;

    async fn clone_table(&self, from: &TableRef, to: &TableRef) -> Result<Box<dyn Job>>;

    async fn delete_and_insert(
        &self,
        from: &TableRef,
        to: &TableRef,
        on_field: &str,
    ) -> Result<Box<dyn Job>>;

    async fn list_tables(&self, dataset: &str) -> Result<Vec<TableRef>>;

    async fn list_columns(&self, table_ref: &TableRef) -> Result<Vec<String>>;
}
