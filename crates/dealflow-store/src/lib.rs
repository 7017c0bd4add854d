//! # dealflow-store
//!
//! Relational data model and storage abstraction for the dealflow
//! orchestrator.
//!
//! The relational store is the single source of truth for every cross-request
//! invariant in the system; all coordination is expressed as row-level
//! upserts or unique-constraint claims. This crate provides:
//!
//! - **Entity types**: The persisted data model (channels, deals, task
//!   states, sections, idempotency keys, workflow runs)
//! - **[`DealStore`]**: The storage trait all services share
//! - **[`PostgresStore`]**: Production implementation on `sqlx`
//! - **[`MemoryStore`]**: In-memory twin for tests

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod store;

pub use error::{Error, Result};
pub use memory::MemoryStore;
pub use model::{
    ChannelStatus, Deal, DealPatch, Integration, IntegrationKind, PipelineSection, PushChannel,
    RunStatus, TaskState, WorkflowRun,
};
pub use postgres::{PoolConfig, PostgresStore};
pub use store::DealStore;
