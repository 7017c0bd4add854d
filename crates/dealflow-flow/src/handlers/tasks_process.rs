//! TASKS_PROCESS handler: section-change detection.
//!
//! The task provider fires on any task edit. This filter collapses that
//! stream to actual stage transitions: the atomic prior-value upsert
//! serializes concurrent observations, and only a real section change with
//! a mapped stage enqueues STAGE_ACTION.

use dealflow_core::TenantId;

use super::JobRouter;
use crate::dispatch::EnqueueOptions;
use crate::envelope::{
    stage_action_key, JobEnvelope, JobType, StageActionPayload, TasksProcessPayload,
};
use crate::error::Result;
use crate::metrics;

impl JobRouter {
    /// Handles one TASKS_PROCESS job.
    pub(crate) async fn handle_tasks_process(
        &self,
        tenant_id: TenantId,
        envelope: &JobEnvelope,
    ) -> Result<()> {
        let payload: TasksProcessPayload = envelope.payload_as()?;

        let task = match self.tasks.get_task(&payload.task_gid).await {
            Ok(task) => task,
            Err(dealflow_providers::Error::Api { status: 404, .. }) => {
                tracing::info!(task_gid = %payload.task_gid, "task gone, dropping");
                return Ok(());
            }
            Err(error) => return Err(error.into()),
        };

        let Some(section_gid) = task.section_in_project(&payload.project_gid) else {
            tracing::debug!(task_gid = %payload.task_gid, "task has no section in project");
            return Ok(());
        };
        let section_gid = section_gid.to_string();

        let previous = self
            .store
            .record_task_observation(
                tenant_id,
                &payload.task_gid,
                &payload.project_gid,
                &section_gid,
                task.modified_at,
            )
            .await?;

        let previous_section = match previous {
            // First observation establishes the baseline without firing.
            None => return Ok(()),
            Some(prev) if prev == section_gid => return Ok(()),
            Some(prev) => prev,
        };

        let Some(stage_key) = self.store.resolve_section(tenant_id, &section_gid).await? else {
            tracing::debug!(section_gid = %section_gid, "section not mapped to a stage");
            return Ok(());
        };
        let previous_stage = self
            .store
            .resolve_section(tenant_id, &previous_section)
            .await?;

        let action = JobEnvelope::new(
            JobType::StageAction,
            tenant_id,
            &StageActionPayload {
                task_gid: payload.task_gid.clone(),
                section_gid: section_gid.clone(),
                stage_key,
                modified_at: task.modified_at,
                previous_stage,
            },
        )?
        .with_idempotency_key(stage_action_key(
            &payload.task_gid,
            &section_gid,
            task.modified_at,
        ));

        self.queue.enqueue(action, EnqueueOptions::default()).await?;
        metrics::record_job_enqueued(JobType::StageAction.as_str());

        self.store
            .set_last_triggered_stage(tenant_id, &payload.task_gid, &payload.project_gid, stage_key)
            .await?;

        tracing::info!(
            task_gid = %payload.task_gid,
            stage = %stage_key,
            "stage transition detected"
        );
        Ok(())
    }
}
