//! # dealflow-core
//!
//! Core abstractions for the dealflow pipeline orchestrator.
//!
//! This crate provides the foundational types used across all dealflow
//! services:
//!
//! - **Identifiers**: Strongly-typed IDs for tenants, deals, and workflow runs
//! - **Stage Vocabulary**: The closed set of pipeline stages
//! - **Error Types**: Shared error definitions and result types
//! - **Observability**: Logging initialization and span constructors
//! - **Secrets**: The secret-store interface with an in-process cache
//!
//! ## Crate Boundary
//!
//! `dealflow-core` is the only crate allowed to define shared primitives.
//! It knows nothing about the database, the queue, or any provider API.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod id;
pub mod observability;
pub mod secrets;
pub mod stage;

pub use error::{Error, Result};
pub use id::{DealId, TenantId, WorkflowRunId};
pub use observability::{init_logging, job_span, webhook_span, LogFormat};
pub use secrets::{CachingSecretStore, EnvSecretStore, SecretStore};
pub use stage::StageKey;
