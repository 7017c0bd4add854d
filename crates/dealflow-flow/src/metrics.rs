//! Flow metrics.
//!
//! Counters for webhook admission, queue dispatch, and research agent
//! outcomes. These complement the structured logging already in place.

use metrics::{counter, describe_counter};

/// Webhook notifications admitted, by source.
pub const WEBHOOK_ADMITTED: &str = "dealflow_webhook_admitted_total";

/// Webhook notifications dropped as duplicates.
pub const WEBHOOK_DEDUPED: &str = "dealflow_webhook_deduped_total";

/// Jobs enqueued, by job type.
pub const JOBS_ENQUEUED: &str = "dealflow_jobs_enqueued_total";

/// Job handler failures, by job type.
pub const JOB_FAILURES: &str = "dealflow_job_failures_total";

/// Research agent outcomes, by result.
pub const RESEARCH_AGENTS: &str = "dealflow_research_agents_total";

/// Workflow runs closed, by terminal status.
pub const RUNS_CLOSED: &str = "dealflow_runs_closed_total";

/// Registers metric descriptions. Call once at startup.
pub fn register_metrics() {
    describe_counter!(WEBHOOK_ADMITTED, "Webhook notifications admitted, by source");
    describe_counter!(WEBHOOK_DEDUPED, "Webhook notifications dropped as duplicates");
    describe_counter!(JOBS_ENQUEUED, "Jobs enqueued, by job type");
    describe_counter!(JOB_FAILURES, "Job handler failures, by job type");
    describe_counter!(RESEARCH_AGENTS, "Research agent outcomes, by result");
    describe_counter!(RUNS_CLOSED, "Workflow runs closed, by terminal status");
}

/// Records an admitted webhook notification.
pub fn record_webhook_admitted(source: &'static str) {
    counter!(WEBHOOK_ADMITTED, "source" => source).increment(1);
}

/// Records a deduplicated webhook notification.
pub fn record_webhook_deduped(source: &'static str) {
    counter!(WEBHOOK_DEDUPED, "source" => source).increment(1);
}

/// Records an enqueued job.
pub fn record_job_enqueued(job_type: &'static str) {
    counter!(JOBS_ENQUEUED, "job_type" => job_type).increment(1);
}

/// Records a failed job handling attempt.
pub fn record_job_failure(job_type: &'static str) {
    counter!(JOB_FAILURES, "job_type" => job_type).increment(1);
}

/// Records one research agent outcome.
pub fn record_research_agent(outcome: &'static str) {
    counter!(RESEARCH_AGENTS, "outcome" => outcome).increment(1);
}

/// Records a workflow run reaching a terminal status.
pub fn record_run_closed(status: &'static str) {
    counter!(RUNS_CLOSED, "status" => status).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_does_not_panic_without_recorder() {
        register_metrics();
        record_webhook_admitted("calendar");
        record_webhook_deduped("tasks");
        record_job_enqueued("CALENDAR_SYNC");
        record_job_failure("STAGE_ACTION");
        record_research_agent("ok");
        record_run_closed("succeeded");
    }
}
