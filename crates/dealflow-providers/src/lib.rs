//! # dealflow-providers
//!
//! Clients for the four external collaborators of the dealflow orchestrator:
//!
//! - **Calendar**: push-channel lifecycle and sync-token change enumeration
//! - **Tasks**: pipeline task CRUD, subtasks, webhooks
//! - **Docs**: the per-deal document workspace, spoken in neutral [`Block`]s
//! - **LLM**: cancellable chat completions for the research agents
//!
//! Every provider is a trait with an HTTP implementation and a recording
//! fake (see [`fake`]); handlers depend only on the traits.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod blocks;
pub mod calendar;
pub mod docs;
pub mod error;
pub mod fake;
pub mod llm;
pub mod tasks;

pub use blocks::{markdown_to_blocks, Block};
pub use calendar::{
    CalendarEvent, CalendarProvider, EventAttendee, EventsPage, HttpCalendarClient, SyncCursor,
    SyncRequest, WatchInfo, FULL_SYNC_WINDOW_DAYS, SYNC_PAGE_SIZE,
};
pub use docs::{DocsProvider, HttpDocsClient, PageRef};
pub use error::{Error, Result};
pub use llm::{Completion, CompletionRequest, HttpLlmClient, LlmProvider};
pub use tasks::{HttpTaskClient, NewTask, TaskMembership, TaskProvider, TaskRecord};
