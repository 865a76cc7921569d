//! The warehouse contract: `DatabaseClient` submits work and returns a
//! pollable `Job`, plus a DuckDB adapter implementing both.

pub mod duckdb;
pub mod error;
pub mod traits;

pub use duckdb::{DuckDbClient, DuckDbJob};
pub use error::{DbError, Result};
pub use traits::{DatabaseClient, Job, JobStatistics};
