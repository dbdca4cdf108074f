//! A database backed job queue.
//!
//! Application code adds [`Job`]s through a [`Queue`]; a [`Worker`] claims
//! them from the `queue` table, runs the matching [`JobHandler`] and records
//! the outcome: successful jobs are deleted, failed ones are marked failed or
//! re-queued according to their [`RetryPolicy`].

pub mod cli;
pub mod clock;
pub mod config;
pub mod console;
pub mod database;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod http;
pub mod job;
pub mod logger;
pub mod memory;
pub mod models;
pub mod queue;
pub mod schedule;
pub mod schema;
pub mod signals;
pub mod worker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use engine::{DatabaseEngine, ListFilter};
pub use error::{Error, JobError, Result};
pub use job::{HandlerError, Job, JobContext, JobHandler, JobRegistry, RetryPolicy};
pub use models::{QueueRecord, QueueStatus};
pub use queue::Queue;
pub use worker::{Worker, WorkerOptions};

pub use async_trait::async_trait;
