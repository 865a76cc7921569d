//! Generates synthetic assertion-test scripts from a script's tagged
//! fields (`#NO_NULLS`, `#UNIQUE`, `#UNIQUE_BY(col)`, `#SET{...}`).

pub mod error;
pub mod generator;

pub use error::{Result, TestGenError};
pub use generator::build_assertion_tests;
