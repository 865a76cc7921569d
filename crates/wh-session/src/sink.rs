use wh_core::TableRef;

/// Structured events a `Session` emits as it runs, decoupled from the
/// global `log` facade so a caller can capture them (tests, a progress
/// bar, a metrics exporter) without scraping log lines.
pub trait EventSink: Send + Sync {
    fn job_started(&self, table_ref: &TableRef, is_test: bool) {
        let _ = (table_ref, is_test);
    }

    fn job_heartbeat(&self, table_ref: &TableRef, elapsed_secs: u64) {
        let _ = (table_ref, elapsed_secs);
    }

    fn job_finished(&self, table_ref: &TableRef, status: &str, billed_dollars: f64, n_rows: u64) {
        let _ = (table_ref, status, billed_dollars, n_rows);
    }

    fn promotion_started(&self, table_ref: &TableRef) {
        let _ = table_ref;
    }

    fn promotion_finished(&self, table_ref: &TableRef, status: &str) {
        let _ = (table_ref, status);
    }

    fn session_ended(&self, total_billed_dollars: f64, n_errored: usize) {
        let _ = (total_billed_dollars, n_errored);
    }
}

/// Routes every event through the `log` facade, matching the `log::`
/// call sites already present throughout the codebase; the binary wires a
/// real sink (`env_logger`) on top of it.
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn job_started(&self, table_ref: &TableRef, is_test: bool) {
        log::info!("started {table_ref} (test={is_test})");
    }

    fn job_heartbeat(&self, table_ref: &TableRef, elapsed_secs: u64) {
        log::info!("{table_ref} still running after {elapsed_secs}s");
    }

    fn job_finished(&self, table_ref: &TableRef, status: &str, billed_dollars: f64, n_rows: u64) {
        log::info!("{table_ref} finished: {status} (${billed_dollars:.4}, {n_rows} rows)");
    }

    fn promotion_started(&self, table_ref: &TableRef) {
        log::info!("promoting {table_ref}");
    }

    fn promotion_finished(&self, table_ref: &TableRef, status: &str) {
        log::info!("promotion of {table_ref}: {status}");
    }

    fn session_ended(&self, total_billed_dollars: f64, n_errored: usize) {
        log::info!("session ended: ${total_billed_dollars:.4} billed, {n_errored} errored");
    }
}
