//! Background workers for the embedding and estimation stages.
//!
//! Each stage runs in its own [`Worker`]: cycles execute on the blocking
//! pool, back to back while there is work, then the worker sleeps until the
//! idle interval elapses or a [`ChangeSignal`] fires.

mod scheduler;
mod signal;
mod stages;

pub use scheduler::{
    Progress, Stage, Worker, WorkerConfig, WorkerError, WorkerHandle, WorkerState, WorkerStats,
};
pub use signal::ChangeSignal;
