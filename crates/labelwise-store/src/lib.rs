//! Storage layer: unit-of-work backends for the annotation store.
//!
//! [`MemoryStore`] is volatile and transaction-free; [`DuckStore`] is durable
//! with one DuckDB transaction per unit of work. Both satisfy the same
//! repository contract and are tested against the same suite.

mod error;
mod memory;
pub use error::StoreError;
pub use memory::{MemoryStore, MemoryUnitOfWork};

#[cfg(feature = "duckdb")]
mod duck;
#[cfg(feature = "duckdb")]
pub use duck::{DuckStore, DuckUnitOfWork};
