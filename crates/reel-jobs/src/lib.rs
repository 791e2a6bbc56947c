//! `reel-jobs`: in-process background job manager.
//!
//! # Overview
//!
//! [`JobManager`] owns the job table, a per-job execution history and an
//! event bus. A scheduler loop ticks on a fixed interval and starts every
//! enabled, idle job whose `next_run_at` has arrived. Each accepted run gets
//! its own cancellation token; handlers poll it at safe boundaries.
//!
//! | Module     | Role                                                   |
//! |------------|--------------------------------------------------------|
//! | `store`    | Job definitions + derived state, validation            |
//! | `executor` | Accepts runs, drives handlers, settles outcomes        |
//! | `engine`   | Scheduler loop                                         |
//! | `history`  | Capped per-job execution ledger                        |
//! | `events`   | Bounded, drop-on-full status fan-out                   |
//! | `handler`  | [`JobHandler`] trait, [`JobContext`], registry         |
//! | `handlers` | Built-in `library_scan` and `cache_cleanup`            |
//! | `db`       | Optional SQLite persistence of job definitions         |

pub mod db;
mod engine;
pub mod error;
pub mod events;
mod executor;
pub mod handler;
pub mod handlers;
pub mod history;
pub mod manager;
pub mod schedule;
mod store;
pub mod types;

pub use db::JobRepository;
pub use error::{JobError, Result, WorkError};
pub use events::{EventBus, Subscription};
pub use handler::{HandlerRegistry, JobContext, JobHandler, ProgressReporter};
pub use manager::JobManager;
pub use schedule::Schedule;
pub use types::{
    Execution, ExecutionId, ExecutionStatus, Job, JobId, JobPatch, JobState, NewJob, StatusUpdate,
    Trigger, UpdateKind,
};
