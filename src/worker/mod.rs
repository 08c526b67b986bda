//! Worker runtime and pool supervision
//!
//! A generic, concurrency-bounded harness that executes queue tasks through
//! a pluggable processor, plus the pool manager that owns one typed worker
//! per queue and applies bounded auto-restart.

mod pool;
mod runtime;

pub use pool::{PoolConfig, PoolEvent, PoolStatus, WorkerPool};
pub use runtime::{
    JobEvent, TaskProcessor, Worker, WorkerConfig, WorkerEvent, WorkerStatus,
};
