//! # dealflow-api
//!
//! The three HTTP services of the dealflow orchestrator:
//!
//! - **Ingress** (public): webhook ingestion with idempotency admission
//! - **Admin** (private): push-channel lifecycle and housekeeping
//! - **Worker** (private): the queue's dispatch endpoint
//!
//! All three share one [`AppState`] shape over the store, the queue, and
//! the provider clients; each binary assembles only the router it serves.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod auth;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod routes;
pub mod server;
pub mod state;

pub use auth::DispatchVerifier;
pub use config::{Config, DatabaseConfig, DEFAULT_CALENDAR_ID};
pub use error::{ApiError, ApiResult};
pub use server::{admin_app, ingress_app, serve, worker_app};
pub use state::AppState;
