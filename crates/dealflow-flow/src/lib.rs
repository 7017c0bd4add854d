//! # dealflow-flow
//!
//! Orchestration engine for the dealflow pipeline.
//!
//! This crate implements the deal-pipeline orchestration domain:
//!
//! - **Job Envelope**: The closed job vocabulary crossing the queue
//! - **Dispatch**: Pluggable queue backends (Cloud Tasks, direct HTTP,
//!   in-memory), selected by environment at startup
//! - **Handlers**: Calendar sync, section-change detection, the stage
//!   state machine, and the cancellable research/memo fan-out
//! - **Watch Lifecycle**: Push-channel start/replace/stop and housekeeping
//! - **Cancellation**: Persisted-flag polling bridged to cancellation
//!   tokens that abort in-flight LLM calls
//!
//! ## Guarantees
//!
//! - **At-most-once effect** on at-least-once delivery, via idempotency
//!   keys claimed in the relational store
//! - **Fixed emission order** for research output, independent of agent
//!   completion order
//! - **Cooperative cancellation** observed within one poll tick

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod agents;
pub mod cancel;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod watch;

pub use agents::{AgentKey, MEMO_OUTLINE};
pub use cancel::{CancelWatcher, CANCEL_POLL_INTERVAL};
pub use dispatch::{
    CloudTasksConfig, CloudTasksQueue, EnqueueOptions, EnqueueResult, HttpJobQueue,
    InMemoryJobQueue, JobQueue, RetryConfig,
};
pub use envelope::{
    calendar_ping_key, stage_action_key, tasks_event_key, CalendarSyncPayload, JobEnvelope,
    JobType, MemoGeneratePayload, ResearchAgentPayload, ResearchBatchPayload, StageActionPayload,
    TasksProcessPayload,
};
pub use error::{Error, Result};
pub use handlers::{FlowConfig, JobRouter};
pub use watch::{
    replace_watch, run_housekeeping, start_watch, stop_watch, HousekeepingReport,
    IDEMPOTENCY_KEY_TTL_DAYS, RETIRED_CHANNEL_TTL_HOURS,
};
