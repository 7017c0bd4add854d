//! End-to-end orchestration scenarios against in-memory collaborators.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use dealflow_core::{StageKey, TenantId};
use dealflow_flow::{
    CalendarSyncPayload, FlowConfig, InMemoryJobQueue, JobEnvelope, JobRouter, JobType,
    StageActionPayload, TasksProcessPayload,
};
use dealflow_providers::fake::{FakeCalendar, FakeDocs, FakeTasks, ScriptedLlm};
use dealflow_providers::{
    Block, CalendarEvent, CalendarProvider, DocsProvider, EventsPage, LlmProvider, SyncCursor,
    TaskMembership, TaskProvider, TaskRecord,
};
use dealflow_store::{
    ChannelStatus, Deal, DealStore, IntegrationKind, MemoryStore, PushChannel, RunStatus,
};

const PROJECT_GID: &str = "pipeline-1";

struct Harness {
    tenant: TenantId,
    store: Arc<MemoryStore>,
    queue: Arc<InMemoryJobQueue>,
    calendar: Arc<FakeCalendar>,
    tasks: Arc<FakeTasks>,
    docs: Arc<FakeDocs>,
    llm: Arc<ScriptedLlm>,
    router: JobRouter,
}

async fn harness() -> Harness {
    let tenant = TenantId::generate();
    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(InMemoryJobQueue::new("test"));
    let calendar = Arc::new(FakeCalendar::new());
    let tasks = Arc::new(FakeTasks::new());
    let docs = Arc::new(FakeDocs::new());
    let llm = Arc::new(ScriptedLlm::new());

    let router = JobRouter::new(
        store.clone() as Arc<dyn DealStore>,
        queue.clone(),
        calendar.clone() as Arc<dyn CalendarProvider>,
        tasks.clone() as Arc<dyn TaskProvider>,
        docs.clone() as Arc<dyn DocsProvider>,
        llm.clone() as Arc<dyn LlmProvider>,
        FlowConfig::default(),
    );

    store.ensure_tenant(tenant, "default").await.unwrap();
    store
        .upsert_integration(
            tenant,
            IntegrationKind::Tasks,
            serde_json::json!({ "project_gid": PROJECT_GID }),
        )
        .await
        .unwrap();
    store
        .upsert_section(tenant, "sec-fm", StageKey::FirstMeeting, true)
        .await
        .unwrap();
    store
        .upsert_section(tenant, "sec-dd", StageKey::InDiligence, true)
        .await
        .unwrap();
    store
        .upsert_section(tenant, "sec-ic", StageKey::IcReview, true)
        .await
        .unwrap();
    store
        .upsert_section(tenant, "sec-pass", StageKey::Pass, true)
        .await
        .unwrap();

    Harness {
        tenant,
        store,
        queue,
        calendar,
        tasks,
        docs,
        llm,
        router,
    }
}

fn channel(tenant: TenantId, channel_id: &str, sync_token: Option<&str>) -> PushChannel {
    PushChannel {
        tenant_id: tenant,
        calendar_id: "primary".to_string(),
        channel_id: channel_id.to_string(),
        resource_id: Some(format!("res-{channel_id}")),
        channel_token: None,
        sync_token: sync_token.map(str::to_string),
        expiration_ms: None,
        status: ChannelStatus::Active,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn deal_event(id: &str, summary: &str) -> CalendarEvent {
    CalendarEvent {
        id: id.to_string(),
        status: Some("confirmed".to_string()),
        summary: Some(summary.to_string()),
        ..CalendarEvent::default()
    }
}

async fn sync(h: &Harness, channel_id: &str) {
    let envelope = JobEnvelope::new(
        JobType::CalendarSync,
        h.tenant,
        &CalendarSyncPayload {
            calendar_id: "primary".to_string(),
            channel_id: channel_id.to_string(),
        },
    )
    .unwrap();
    h.router.dispatch(&envelope).await.unwrap();
}

/// Runs the full deal-creation flow and returns the materialized deal.
async fn seeded_deal(h: &Harness) -> Deal {
    h.store
        .insert_channel(&channel(h.tenant, "gcal-A", None))
        .await
        .unwrap();
    h.calendar.push_page(EventsPage {
        events: vec![deal_event("evt-1", "Acme — Jane [deal]")],
        next_page_token: None,
        next_sync_token: Some("T1".to_string()),
    });
    sync(h, "gcal-A").await;
    h.store.deals().unwrap().into_iter().next().expect("deal")
}

fn pipeline_task(gid: &str, section: &str, modified_at: DateTime<Utc>) -> TaskRecord {
    TaskRecord {
        gid: gid.to_string(),
        name: "Acme — Jane".to_string(),
        notes: None,
        modified_at,
        memberships: vec![TaskMembership {
            project_gid: PROJECT_GID.to_string(),
            section_gid: Some(section.to_string()),
        }],
        completed: false,
    }
}

async fn process_task(h: &Harness, task_gid: &str) {
    let envelope = JobEnvelope::new(
        JobType::TasksProcess,
        h.tenant,
        &TasksProcessPayload {
            task_gid: task_gid.to_string(),
            project_gid: PROJECT_GID.to_string(),
            action: Some("changed".to_string()),
        },
    )
    .unwrap();
    h.router.dispatch(&envelope).await.unwrap();
}

fn heading_texts(blocks: &[Block]) -> Vec<String> {
    blocks
        .iter()
        .filter_map(|b| match b {
            Block::Heading { level: 2, text } => Some(text.clone()),
            _ => None,
        })
        .collect()
}

// ----------------------------------------------------------------------
// Scenario: deal creation
// ----------------------------------------------------------------------

#[tokio::test]
async fn full_sync_creates_deal_task_and_workspace() {
    let h = harness().await;
    let deal = seeded_deal(&h).await;

    assert_eq!(deal.company.as_deref(), Some("Acme"));
    assert_eq!(deal.founder.as_deref(), Some("Jane"));
    assert_eq!(deal.task_record_gid.as_deref(), Some("task-1"));
    assert!(deal.doc_root_id.is_some());

    // One root and five child pages.
    assert_eq!(h.docs.page_ids().len(), 6);

    // Task notes embed the workspace root URL.
    let created = h.tasks.created();
    assert_eq!(created.len(), 1);
    let root_url = deal.doc_urls.get("root").unwrap();
    assert!(created[0].notes.as_deref().unwrap().contains(root_url));
    assert_eq!(created[0].section_gid.as_deref(), Some("sec-fm"));

    // Sync token persisted on the triggering channel.
    let stored = h
        .store
        .channel_by_id(h.tenant, "gcal-A")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.sync_token.as_deref(), Some("T1"));
}

#[tokio::test]
async fn replayed_sync_is_idempotent() {
    let h = harness().await;
    let deal = seeded_deal(&h).await;

    // The provider redelivers the same event on the next sync.
    h.calendar.push_page(EventsPage {
        events: vec![deal_event("evt-1", "Acme — Jane [deal]")],
        next_page_token: None,
        next_sync_token: Some("T2".to_string()),
    });
    sync(&h, "gcal-A").await;

    let deals = h.store.deals().unwrap();
    assert_eq!(deals.len(), 1);
    assert_eq!(deals[0].id, deal.id);

    // Materialization ran exactly once.
    assert_eq!(h.tasks.created().len(), 1);
    assert_eq!(h.docs.page_ids().len(), 6);
}

#[tokio::test]
async fn untagged_and_cancelled_events_are_skipped() {
    let h = harness().await;
    h.store
        .insert_channel(&channel(h.tenant, "gcal-A", None))
        .await
        .unwrap();

    let mut cancelled = deal_event("evt-2", "Dead deal [deal]");
    cancelled.status = Some("cancelled".to_string());

    h.calendar.push_page(EventsPage {
        events: vec![deal_event("evt-1", "1:1 with Sam"), cancelled],
        next_page_token: None,
        next_sync_token: Some("T1".to_string()),
    });
    sync(&h, "gcal-A").await;

    assert!(h.store.deals().unwrap().is_empty());
}

#[tokio::test]
async fn unknown_channel_drops_silently() {
    let h = harness().await;
    sync(&h, "gcal-missing").await;
    assert!(h.store.deals().unwrap().is_empty());
    assert!(h.calendar.requests().is_empty());
}

// ----------------------------------------------------------------------
// Scenario: token expiry
// ----------------------------------------------------------------------

#[tokio::test]
async fn expired_token_falls_back_to_full_sync() {
    let h = harness().await;
    let _deal = seeded_deal(&h).await;

    // Incremental sync on the stored token dies with 410; the full-window
    // fallback re-reads everything without duplicating the deal.
    h.calendar.push_token_expired();
    h.calendar.push_page(EventsPage {
        events: vec![deal_event("evt-1", "Acme — Jane [deal]")],
        next_page_token: None,
        next_sync_token: Some("T3".to_string()),
    });
    sync(&h, "gcal-A").await;

    let requests = h.calendar.requests();
    let last_two = &requests[requests.len() - 2..];
    assert!(matches!(last_two[0].cursor, SyncCursor::Token(_)));
    assert!(matches!(last_two[1].cursor, SyncCursor::Window { .. }));

    assert_eq!(h.store.deals().unwrap().len(), 1);
    let stored = h
        .store
        .channel_by_id(h.tenant, "gcal-A")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.sync_token.as_deref(), Some("T3"));
}

// ----------------------------------------------------------------------
// Scenario: section-change detection
// ----------------------------------------------------------------------

#[tokio::test]
async fn first_observation_establishes_baseline_without_firing() {
    let h = harness().await;
    let _deal = seeded_deal(&h).await;
    let ts: DateTime<Utc> = "2025-01-02T03:04:05Z".parse().unwrap();

    h.tasks.set_task(pipeline_task("task-1", "sec-fm", ts));
    process_task(&h, "task-1").await;
    assert!(h.queue.is_empty().unwrap());
}

#[tokio::test]
async fn repeated_observation_is_stable() {
    let h = harness().await;
    let _deal = seeded_deal(&h).await;
    let ts: DateTime<Utc> = "2025-01-02T03:04:05Z".parse().unwrap();

    h.tasks.set_task(pipeline_task("task-1", "sec-fm", ts));
    process_task(&h, "task-1").await;
    process_task(&h, "task-1").await;
    process_task(&h, "task-1").await;

    assert!(h.queue.is_empty().unwrap());
}

#[tokio::test]
async fn section_move_enqueues_one_stage_action() {
    let h = harness().await;
    let _deal = seeded_deal(&h).await;
    let ts: DateTime<Utc> = "2025-01-02T03:04:05Z".parse().unwrap();

    h.tasks.set_task(pipeline_task("task-1", "sec-fm", ts));
    process_task(&h, "task-1").await;

    let ts2: DateTime<Utc> = "2025-01-03T10:00:00Z".parse().unwrap();
    h.tasks.set_task(pipeline_task("task-1", "sec-dd", ts2));
    process_task(&h, "task-1").await;

    let entries = h.queue.drain().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].envelope.job_type, JobType::StageAction);
    assert_eq!(
        entries[0].envelope.idempotency_key.as_deref(),
        Some("stage:task-1:sec-dd:2025-01-03T10:00:00Z")
    );

    let payload: StageActionPayload = entries[0].envelope.payload_as().unwrap();
    assert_eq!(payload.stage_key, StageKey::InDiligence);
    assert_eq!(payload.previous_stage, Some(StageKey::FirstMeeting));
}

// ----------------------------------------------------------------------
// Scenario: stage transitions
// ----------------------------------------------------------------------

async fn fire_stage(
    h: &Harness,
    task_gid: &str,
    section_gid: &str,
    stage: StageKey,
    modified_at: &str,
    previous: Option<StageKey>,
) -> Result<(), dealflow_flow::Error> {
    let envelope = JobEnvelope::new(
        JobType::StageAction,
        h.tenant,
        &StageActionPayload {
            task_gid: task_gid.to_string(),
            section_gid: section_gid.to_string(),
            stage_key: stage,
            modified_at: modified_at.parse().unwrap(),
            previous_stage: previous,
        },
    )
    .unwrap();
    h.router.dispatch(&envelope).await
}

#[tokio::test]
async fn first_meeting_creates_prep_subtasks() {
    let h = harness().await;
    let deal = seeded_deal(&h).await;

    fire_stage(&h, "task-1", "sec-fm", StageKey::FirstMeeting, "2025-01-02T03:04:05Z", None)
        .await
        .unwrap();

    assert_eq!(h.tasks.subtasks().len(), 4);
    let notes = h.tasks.notes_updates();
    assert_eq!(notes.len(), 1);
    assert!(notes[0].1.contains(deal.doc_urls.get("root").unwrap()));

    let runs = h.store.runs().unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Succeeded);

    let stored = h.store.deal_by_id(h.tenant, deal.id).await.unwrap().unwrap();
    assert_eq!(stored.current_stage, Some(StageKey::FirstMeeting));
}

#[tokio::test]
async fn in_diligence_clears_placeholders_and_enqueues_batch() {
    let h = harness().await;
    let deal = seeded_deal(&h).await;
    let root_id = deal.doc_root_id.clone().unwrap();

    let research = h
        .docs
        .find_child_page(&root_id, "Research")
        .await
        .unwrap()
        .unwrap();
    assert!(!h.docs.page(&research.id).unwrap().blocks.is_empty());

    fire_stage(
        &h,
        "task-1",
        "sec-dd",
        StageKey::InDiligence,
        "2025-01-03T10:00:00Z",
        Some(StageKey::FirstMeeting),
    )
    .await
    .unwrap();

    // Placeholders cleared before the batch starts.
    assert_eq!(h.docs.page(&research.id).unwrap().cleared, 1);

    // Five human subtasks and exactly one batch job.
    assert_eq!(h.tasks.subtasks().len(), 5);
    let entries = h.queue.drain().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].envelope.job_type, JobType::ResearchBatch);

    // The run stays open for the batch to close.
    let runs = h.store.runs().unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Running);
}

#[tokio::test]
async fn stage_action_fires_once_per_observation() {
    let h = harness().await;
    let _deal = seeded_deal(&h).await;

    fire_stage(
        &h,
        "task-1",
        "sec-dd",
        StageKey::InDiligence,
        "2025-01-03T10:00:00Z",
        Some(StageKey::FirstMeeting),
    )
    .await
    .unwrap();
    fire_stage(
        &h,
        "task-1",
        "sec-dd",
        StageKey::InDiligence,
        "2025-01-03T10:00:00Z",
        Some(StageKey::FirstMeeting),
    )
    .await
    .unwrap();

    // Redelivery was dropped at the claim: one batch, one run, five subtasks.
    assert_eq!(h.queue.len().unwrap(), 1);
    assert_eq!(h.store.runs().unwrap().len(), 1);
    assert_eq!(h.tasks.subtasks().len(), 5);
}

#[tokio::test]
async fn pass_stage_cancels_completes_and_annotates() {
    let h = harness().await;
    let deal = seeded_deal(&h).await;

    fire_stage(
        &h,
        "task-1",
        "sec-dd",
        StageKey::InDiligence,
        "2025-01-03T10:00:00Z",
        Some(StageKey::FirstMeeting),
    )
    .await
    .unwrap();

    fire_stage(
        &h,
        "task-1",
        "sec-pass",
        StageKey::Pass,
        "2025-01-04T09:00:00Z",
        Some(StageKey::InDiligence),
    )
    .await
    .unwrap();

    // The running diligence run got flagged.
    let runs = h.store.runs().unwrap();
    let diligence = runs
        .iter()
        .find(|r| r.stage_key == StageKey::InDiligence)
        .unwrap();
    assert!(diligence.cancel_requested);

    // Task completed, terminal note on the root page.
    assert_eq!(h.tasks.completed(), vec!["task-1".to_string()]);
    let root = h.docs.page(&deal.doc_root_id.clone().unwrap()).unwrap();
    let text: Vec<_> = root.blocks.iter().filter_map(Block::text).collect();
    assert!(text.iter().any(|t| t.contains("Pass")));

    // The pass run itself closed succeeded.
    let pass_run = runs.iter().find(|r| r.stage_key == StageKey::Pass).unwrap();
    assert_eq!(pass_run.status, RunStatus::Succeeded);
}

#[tokio::test]
async fn stage_action_without_deal_is_a_noop() {
    let h = harness().await;
    fire_stage(&h, "task-x", "sec-dd", StageKey::InDiligence, "2025-01-03T10:00:00Z", None)
        .await
        .unwrap();
    assert!(h.queue.is_empty().unwrap());
    assert!(h.store.runs().unwrap().is_empty());
}

// ----------------------------------------------------------------------
// Scenario: research batch
// ----------------------------------------------------------------------

/// Moves the seeded deal into diligence and returns the batch envelope.
async fn diligence_batch(h: &Harness) -> JobEnvelope {
    let _ = seeded_deal(h).await;
    fire_stage(
        h,
        "task-1",
        "sec-dd",
        StageKey::InDiligence,
        "2025-01-03T10:00:00Z",
        Some(StageKey::FirstMeeting),
    )
    .await
    .unwrap();
    h.queue.drain().unwrap().remove(0).envelope
}

#[tokio::test]
async fn research_sections_emit_in_fixed_order() {
    let h = harness().await;
    let batch = diligence_batch(&h).await;

    h.llm.respond_containing("market_tam", "## Sizing\nBig.");
    h.llm.respond_containing("traction_signals", "- hiring fast");

    h.router.dispatch(&batch).await.unwrap();

    let deal = h.store.deals().unwrap().remove(0);
    let research = h
        .docs
        .find_child_page(&deal.doc_root_id.clone().unwrap(), "Research")
        .await
        .unwrap()
        .unwrap();
    let page = h.docs.page(&research.id).unwrap();

    let headings = heading_texts(&page.blocks);
    assert_eq!(
        headings,
        vec![
            "Market & TAM",
            "Competitive Landscape",
            "Founder Background",
            "Risks & Red Flags",
            "Product & Defensibility",
            "Traction Signals",
        ]
    );

    // All six agents ran; the run closed succeeded.
    assert_eq!(h.llm.calls().len(), 6);
    let runs = h.store.runs().unwrap();
    assert_eq!(runs[0].status, RunStatus::Succeeded);
}

#[tokio::test]
async fn failed_agent_is_skipped_without_cancelling_peers() {
    let h = harness().await;
    let batch = diligence_batch(&h).await;

    h.llm.fail_containing("competitors", 500);

    h.router.dispatch(&batch).await.unwrap();

    let deal = h.store.deals().unwrap().remove(0);
    let research = h
        .docs
        .find_child_page(&deal.doc_root_id.clone().unwrap(), "Research")
        .await
        .unwrap()
        .unwrap();
    let headings = heading_texts(&h.docs.page(&research.id).unwrap().blocks);

    assert_eq!(headings.len(), 5);
    assert!(!headings.contains(&"Competitive Landscape".to_string()));

    let runs = h.store.runs().unwrap();
    assert_eq!(runs[0].status, RunStatus::Succeeded);
}

#[tokio::test]
async fn pre_cancelled_batch_produces_no_output() {
    let h = harness().await;
    let batch = diligence_batch(&h).await;

    let deal = h.store.deals().unwrap().remove(0);
    h.store
        .request_cancel_running(h.tenant, deal.id)
        .await
        .unwrap();

    h.router.dispatch(&batch).await.unwrap();

    assert!(h.llm.calls().is_empty());
    let runs = h.store.runs().unwrap();
    assert_eq!(runs[0].status, RunStatus::Canceled);
}

#[tokio::test(start_paused = true)]
async fn cancel_mid_batch_aborts_in_flight_calls_and_keeps_order() {
    let h = harness().await;
    let batch = diligence_batch(&h).await;

    // Two agents answer instantly; the rest hang far past the poll tick.
    h.llm.respond_containing("market_tam", "## Sizing\nBig.");
    h.llm.respond_containing("competitors", "- none");
    h.llm
        .respond_with_delay("founder_background", "slow", Duration::from_secs(600));
    h.llm
        .respond_with_delay("risks_redflags", "slow", Duration::from_secs(600));
    h.llm
        .respond_with_delay("product_defensibility", "slow", Duration::from_secs(600));
    h.llm
        .respond_with_delay("traction_signals", "slow", Duration::from_secs(600));

    let deal = h.store.deals().unwrap().remove(0);
    let router_task = {
        let envelope = batch.clone();
        let h_router = h.router;
        tokio::spawn(async move { h_router.dispatch(&envelope).await })
    };

    // Let the fan-out start all six calls.
    while h.llm.calls().len() < 6 {
        tokio::task::yield_now().await;
    }

    h.store
        .request_cancel_running(h.tenant, deal.id)
        .await
        .unwrap();

    // The poller observes the flag within one 5s tick and trips the token.
    router_task.await.unwrap().unwrap();

    let research = h
        .docs
        .find_child_page(&deal.doc_root_id.clone().unwrap(), "Research")
        .await
        .unwrap()
        .unwrap();
    let headings = heading_texts(&h.docs.page(&research.id).unwrap().blocks);

    // Completed-before-cancel agents kept their output, in order.
    assert_eq!(headings, vec!["Market & TAM", "Competitive Landscape"]);

    let runs = h.store.runs().unwrap();
    assert_eq!(runs[0].status, RunStatus::Canceled);
    assert!(runs[0].finished_at.is_some());
}

// ----------------------------------------------------------------------
// Scenario: memo generation
// ----------------------------------------------------------------------

#[tokio::test]
async fn ic_review_memo_lands_on_memo_page() {
    let h = harness().await;
    let _deal = seeded_deal(&h).await;

    fire_stage(
        &h,
        "task-1",
        "sec-ic",
        StageKey::IcReview,
        "2025-01-05T08:00:00Z",
        Some(StageKey::InDiligence),
    )
    .await
    .unwrap();

    let entries = h.queue.drain().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].envelope.job_type, JobType::MemoGenerate);
    assert_eq!(h.tasks.subtasks().len(), 5);

    h.llm
        .respond_containing("investment memo", "## Executive Summary\nStrong team.");
    h.router.dispatch(&entries[0].envelope).await.unwrap();

    let deal = h.store.deals().unwrap().remove(0);
    let memo = h
        .docs
        .find_child_page(&deal.doc_root_id.clone().unwrap(), "Investment Memo")
        .await
        .unwrap()
        .unwrap();
    let page = h.docs.page(&memo.id).unwrap();

    // Leading generated-on callout, body, trailing review warning.
    assert!(matches!(page.blocks.first(), Some(Block::Callout { text }) if text.contains("Generated on")));
    assert!(matches!(page.blocks.last(), Some(Block::Callout { text }) if text.contains("review")));
    let texts: Vec<_> = page.blocks.iter().filter_map(Block::text).collect();
    assert!(texts.iter().any(|t| t.contains("Strong team.")));

    // The IC run closed succeeded once the memo landed.
    let runs = h.store.runs().unwrap();
    assert_eq!(runs[0].status, RunStatus::Succeeded);
}

#[tokio::test]
async fn pre_cancelled_memo_short_circuits() {
    let h = harness().await;
    let _deal = seeded_deal(&h).await;

    fire_stage(
        &h,
        "task-1",
        "sec-ic",
        StageKey::IcReview,
        "2025-01-05T08:00:00Z",
        Some(StageKey::InDiligence),
    )
    .await
    .unwrap();
    let entries = h.queue.drain().unwrap();

    let deal = h.store.deals().unwrap().remove(0);
    h.store
        .request_cancel_running(h.tenant, deal.id)
        .await
        .unwrap();

    h.router.dispatch(&entries[0].envelope).await.unwrap();

    assert!(h.llm.calls().is_empty());
    assert_eq!(h.store.runs().unwrap()[0].status, RunStatus::Canceled);
}

// ----------------------------------------------------------------------
// Scenario: single-agent re-drive
// ----------------------------------------------------------------------

#[tokio::test]
async fn research_agent_appends_one_section() {
    let h = harness().await;
    let deal = seeded_deal(&h).await;

    h.llm.respond_containing("competitors", "- Rival Corp");

    let envelope = JobEnvelope::new(
        JobType::ResearchAgent,
        h.tenant,
        &dealflow_flow::ResearchAgentPayload {
            deal_id: deal.id,
            agent_key: "competitors".to_string(),
            context: None,
        },
    )
    .unwrap();
    h.router.dispatch(&envelope).await.unwrap();

    let research = h
        .docs
        .find_child_page(&deal.doc_root_id.clone().unwrap(), "Research")
        .await
        .unwrap()
        .unwrap();
    let headings = heading_texts(&h.docs.page(&research.id).unwrap().blocks);
    assert_eq!(headings, vec!["Competitive Landscape"]);

    let runs = h.store.runs().unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Succeeded);
}

#[tokio::test]
async fn unknown_agent_key_is_non_retryable() {
    let h = harness().await;
    let deal = seeded_deal(&h).await;

    let envelope = JobEnvelope::new(
        JobType::ResearchAgent,
        h.tenant,
        &dealflow_flow::ResearchAgentPayload {
            deal_id: deal.id,
            agent_key: "astrology".to_string(),
            context: None,
        },
    )
    .unwrap();

    let err = h.router.dispatch(&envelope).await.unwrap_err();
    assert!(err.is_non_retryable());
}
