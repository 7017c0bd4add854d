//! Recording fakes for tests.
//!
//! Each fake records the calls it receives and serves scripted responses,
//! so flow and API tests can assert on provider side effects without any
//! network. All fakes are `Send + Sync` and cheap to share via `Arc`.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::blocks::Block;
use crate::calendar::{CalendarProvider, EventsPage, SyncRequest, WatchInfo};
use crate::docs::{DocsProvider, PageRef};
use crate::error::{Error, Result};
use crate::llm::{Completion, CompletionRequest, LlmProvider};
use crate::tasks::{NewTask, TaskProvider, TaskRecord};

// ============================================================================
// Calendar
// ============================================================================

/// A scripted outcome for one `list_events` call.
#[derive(Debug, Clone)]
enum ScriptedPage {
    Page(EventsPage),
    TokenExpired,
    Api(u16),
}

/// Recording calendar fake.
#[derive(Debug, Default)]
pub struct FakeCalendar {
    script: Mutex<VecDeque<ScriptedPage>>,
    requests: Mutex<Vec<SyncRequest>>,
    watches: Mutex<Vec<(String, String, String)>>,
    stops: Mutex<Vec<(String, String)>>,
    fail_watch: Mutex<bool>,
    fail_stop: Mutex<bool>,
}

impl FakeCalendar {
    /// Creates an empty fake.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a page to serve on the next `list_events` call.
    pub fn push_page(&self, page: EventsPage) {
        self.script.lock().unwrap().push_back(ScriptedPage::Page(page));
    }

    /// Queues a 410 token-expired failure.
    pub fn push_token_expired(&self) {
        self.script
            .lock()
            .unwrap()
            .push_back(ScriptedPage::TokenExpired);
    }

    /// Queues a provider API failure.
    pub fn push_api_error(&self, status: u16) {
        self.script
            .lock()
            .unwrap()
            .push_back(ScriptedPage::Api(status));
    }

    /// Makes subsequent `create_watch` calls fail.
    pub fn fail_watches(&self) {
        *self.fail_watch.lock().unwrap() = true;
    }

    /// Makes subsequent `stop_watch` calls fail.
    pub fn fail_stops(&self) {
        *self.fail_stop.lock().unwrap() = true;
    }

    /// Returns the recorded sync requests.
    #[must_use]
    pub fn requests(&self) -> Vec<SyncRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Returns recorded `(calendar_id, channel_id, address)` watch creations.
    #[must_use]
    pub fn watches(&self) -> Vec<(String, String, String)> {
        self.watches.lock().unwrap().clone()
    }

    /// Returns recorded `(channel_id, resource_id)` stops.
    #[must_use]
    pub fn stops(&self) -> Vec<(String, String)> {
        self.stops.lock().unwrap().clone()
    }
}

#[async_trait]
impl CalendarProvider for FakeCalendar {
    async fn create_watch(
        &self,
        calendar_id: &str,
        channel_id: &str,
        address: &str,
        _channel_token: Option<&str>,
    ) -> Result<WatchInfo> {
        if *self.fail_watch.lock().unwrap() {
            return Err(Error::api(500, "watch creation failed"));
        }
        self.watches.lock().unwrap().push((
            calendar_id.to_string(),
            channel_id.to_string(),
            address.to_string(),
        ));
        Ok(WatchInfo {
            resource_id: format!("res-{channel_id}"),
            expiration_ms: Some(4_102_444_800_000),
        })
    }

    async fn stop_watch(&self, channel_id: &str, resource_id: &str) -> Result<()> {
        if *self.fail_stop.lock().unwrap() {
            return Err(Error::api(404, "channel already expired"));
        }
        self.stops
            .lock()
            .unwrap()
            .push((channel_id.to_string(), resource_id.to_string()));
        Ok(())
    }

    async fn list_events(&self, _calendar_id: &str, request: &SyncRequest) -> Result<EventsPage> {
        self.requests.lock().unwrap().push(request.clone());
        match self.script.lock().unwrap().pop_front() {
            Some(ScriptedPage::Page(page)) => Ok(page),
            Some(ScriptedPage::TokenExpired) => Err(Error::SyncTokenExpired),
            Some(ScriptedPage::Api(status)) => Err(Error::api(status, "scripted failure")),
            None => Ok(EventsPage::default()),
        }
    }
}

// ============================================================================
// Tasks
// ============================================================================

/// Recording task-manager fake.
#[derive(Debug, Default)]
pub struct FakeTasks {
    next_gid: AtomicUsize,
    tasks: Mutex<HashMap<String, TaskRecord>>,
    created: Mutex<Vec<NewTask>>,
    subtasks: Mutex<Vec<(String, String)>>,
    notes_updates: Mutex<Vec<(String, String)>>,
    completed: Mutex<Vec<String>>,
    webhooks: Mutex<Vec<(String, String)>>,
    deleted_webhooks: Mutex<Vec<String>>,
    fail_create: Mutex<bool>,
    fail_subtasks: Mutex<bool>,
}

impl FakeTasks {
    /// Creates an empty fake.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a task record for `get_task`.
    pub fn set_task(&self, record: TaskRecord) {
        self.tasks.lock().unwrap().insert(record.gid.clone(), record);
    }

    /// Makes subsequent `create_task` calls fail.
    pub fn fail_creates(&self) {
        *self.fail_create.lock().unwrap() = true;
    }

    /// Makes subsequent `create_subtask` calls fail.
    pub fn fail_subtasks(&self) {
        *self.fail_subtasks.lock().unwrap() = true;
    }

    /// Returns recorded task creations.
    #[must_use]
    pub fn created(&self) -> Vec<NewTask> {
        self.created.lock().unwrap().clone()
    }

    /// Returns recorded `(parent_gid, name)` subtask creations.
    #[must_use]
    pub fn subtasks(&self) -> Vec<(String, String)> {
        self.subtasks.lock().unwrap().clone()
    }

    /// Returns recorded `(task_gid, notes)` note updates.
    #[must_use]
    pub fn notes_updates(&self) -> Vec<(String, String)> {
        self.notes_updates.lock().unwrap().clone()
    }

    /// Returns recorded completions.
    #[must_use]
    pub fn completed(&self) -> Vec<String> {
        self.completed.lock().unwrap().clone()
    }

    /// Returns recorded `(resource_gid, target_url)` webhook creations.
    #[must_use]
    pub fn webhooks(&self) -> Vec<(String, String)> {
        self.webhooks.lock().unwrap().clone()
    }

    /// Returns recorded webhook deletions.
    #[must_use]
    pub fn deleted_webhooks(&self) -> Vec<String> {
        self.deleted_webhooks.lock().unwrap().clone()
    }

    fn allocate_gid(&self, prefix: &str) -> String {
        let n = self.next_gid.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{prefix}-{n}")
    }
}

#[async_trait]
impl TaskProvider for FakeTasks {
    async fn get_task(&self, task_gid: &str) -> Result<TaskRecord> {
        self.tasks
            .lock()
            .unwrap()
            .get(task_gid)
            .cloned()
            .ok_or_else(|| Error::api(404, format!("task {task_gid} not found")))
    }

    async fn create_task(&self, task: &NewTask) -> Result<String> {
        if *self.fail_create.lock().unwrap() {
            return Err(Error::api(500, "task creation failed"));
        }
        let gid = self.allocate_gid("task");
        self.created.lock().unwrap().push(task.clone());
        Ok(gid)
    }

    async fn create_subtask(
        &self,
        parent_gid: &str,
        name: &str,
        _notes: Option<&str>,
    ) -> Result<String> {
        if *self.fail_subtasks.lock().unwrap() {
            return Err(Error::api(500, "subtask creation failed"));
        }
        let gid = self.allocate_gid("subtask");
        self.subtasks
            .lock()
            .unwrap()
            .push((parent_gid.to_string(), name.to_string()));
        Ok(gid)
    }

    async fn update_task_notes(&self, task_gid: &str, notes: &str) -> Result<()> {
        self.notes_updates
            .lock()
            .unwrap()
            .push((task_gid.to_string(), notes.to_string()));
        Ok(())
    }

    async fn complete_task(&self, task_gid: &str) -> Result<()> {
        self.completed.lock().unwrap().push(task_gid.to_string());
        Ok(())
    }

    async fn create_webhook(&self, resource_gid: &str, target_url: &str) -> Result<String> {
        let gid = self.allocate_gid("webhook");
        self.webhooks
            .lock()
            .unwrap()
            .push((resource_gid.to_string(), target_url.to_string()));
        Ok(gid)
    }

    async fn delete_webhook(&self, webhook_gid: &str) -> Result<()> {
        self.deleted_webhooks
            .lock()
            .unwrap()
            .push(webhook_gid.to_string());
        Ok(())
    }
}

// ============================================================================
// Docs
// ============================================================================

/// A fake page's state.
#[derive(Debug, Clone, Default)]
pub struct FakePage {
    /// Page title.
    pub title: String,
    /// Parent page id, if nested.
    pub parent: Option<String>,
    /// Accumulated blocks, in append order.
    pub blocks: Vec<Block>,
    /// How many times the page was cleared.
    pub cleared: usize,
    /// Scripted plain-text body for `read_page_text`.
    pub text: Option<String>,
}

/// Recording document fake.
#[derive(Debug, Default)]
pub struct FakeDocs {
    next_id: AtomicUsize,
    pages: Mutex<BTreeMap<String, FakePage>>,
}

impl FakeDocs {
    /// Creates an empty fake.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a page's state, for assertions.
    #[must_use]
    pub fn page(&self, page_id: &str) -> Option<FakePage> {
        self.pages.lock().unwrap().get(page_id).cloned()
    }

    /// Returns all page ids in creation order.
    #[must_use]
    pub fn page_ids(&self) -> Vec<String> {
        self.pages.lock().unwrap().keys().cloned().collect()
    }

    /// Scripts the plain-text body returned by `read_page_text`.
    pub fn set_page_text(&self, page_id: &str, text: &str) {
        if let Some(page) = self.pages.lock().unwrap().get_mut(page_id) {
            page.text = Some(text.to_string());
        }
    }
}

#[async_trait]
impl DocsProvider for FakeDocs {
    async fn create_page(
        &self,
        parent_id: Option<&str>,
        title: &str,
        blocks: &[Block],
    ) -> Result<PageRef> {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("page-{n:03}");
        self.pages.lock().unwrap().insert(
            id.clone(),
            FakePage {
                title: title.to_string(),
                parent: parent_id.map(str::to_string),
                blocks: blocks.to_vec(),
                cleared: 0,
                text: None,
            },
        );
        Ok(PageRef {
            url: format!("https://docs.test/{id}"),
            id,
        })
    }

    async fn append_blocks(&self, page_id: &str, blocks: &[Block]) -> Result<()> {
        let mut pages = self.pages.lock().unwrap();
        let page = pages
            .get_mut(page_id)
            .ok_or_else(|| Error::api(404, format!("page {page_id} not found")))?;
        page.blocks.extend_from_slice(blocks);
        Ok(())
    }

    async fn clear_page(&self, page_id: &str) -> Result<()> {
        let mut pages = self.pages.lock().unwrap();
        let page = pages
            .get_mut(page_id)
            .ok_or_else(|| Error::api(404, format!("page {page_id} not found")))?;
        page.blocks.clear();
        page.cleared += 1;
        Ok(())
    }

    async fn find_child_page(&self, parent_id: &str, title: &str) -> Result<Option<PageRef>> {
        let pages = self.pages.lock().unwrap();
        Ok(pages
            .iter()
            .find(|(_, page)| page.parent.as_deref() == Some(parent_id) && page.title == title)
            .map(|(id, _)| PageRef {
                id: id.clone(),
                url: format!("https://docs.test/{id}"),
            }))
    }

    async fn read_page_text(&self, page_id: &str) -> Result<String> {
        let pages = self.pages.lock().unwrap();
        let page = pages
            .get(page_id)
            .ok_or_else(|| Error::api(404, format!("page {page_id} not found")))?;
        if let Some(text) = &page.text {
            return Ok(text.clone());
        }
        Ok(page
            .blocks
            .iter()
            .filter_map(Block::text)
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

// ============================================================================
// LLM
// ============================================================================

#[derive(Debug, Clone)]
struct ScriptedResponse {
    needle: String,
    delay: Option<Duration>,
    outcome: std::result::Result<Completion, u16>,
}

/// Recording LLM fake with keyword-scripted responses.
#[derive(Debug, Default)]
pub struct ScriptedLlm {
    responses: Mutex<Vec<ScriptedResponse>>,
    calls: Mutex<Vec<CompletionRequest>>,
    delay: Mutex<Option<Duration>>,
}

impl ScriptedLlm {
    /// Creates a fake that answers every prompt with a stub completion.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts a response for prompts containing `needle`.
    pub fn respond_containing(&self, needle: &str, text: &str) {
        self.responses.lock().unwrap().push(ScriptedResponse {
            needle: needle.to_string(),
            delay: None,
            outcome: Ok(Completion {
                text: text.to_string(),
                citations: Vec::new(),
            }),
        });
    }

    /// Scripts a delayed response for prompts containing `needle`.
    pub fn respond_with_delay(&self, needle: &str, text: &str, delay: Duration) {
        self.responses.lock().unwrap().push(ScriptedResponse {
            needle: needle.to_string(),
            delay: Some(delay),
            outcome: Ok(Completion {
                text: text.to_string(),
                citations: Vec::new(),
            }),
        });
    }

    /// Scripts an API failure for prompts containing `needle`.
    pub fn fail_containing(&self, needle: &str, status: u16) {
        self.responses.lock().unwrap().push(ScriptedResponse {
            needle: needle.to_string(),
            delay: None,
            outcome: Err(status),
        });
    }

    /// Delays every unscripted completion, so tests can race cancellation.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Returns all recorded completion requests.
    #[must_use]
    pub fn calls(&self) -> Vec<CompletionRequest> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    async fn complete(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<Completion> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        self.calls.lock().unwrap().push(request.clone());

        let scripted = self
            .responses
            .lock()
            .unwrap()
            .iter()
            .find(|r| request.prompt.contains(&r.needle) || request.system.contains(&r.needle))
            .cloned();

        let delay = scripted
            .as_ref()
            .and_then(|r| r.delay)
            .or(*self.delay.lock().unwrap());
        if let Some(delay) = delay {
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = cancel.cancelled() => return Err(Error::Cancelled),
            }
        }

        match scripted.map(|r| r.outcome) {
            Some(Ok(completion)) => Ok(completion),
            Some(Err(status)) => Err(Error::api(status, "scripted failure")),
            None => Ok(Completion {
                text: "No findings.".to_string(),
                citations: Vec::new(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_calendar_serves_script_in_order() {
        let calendar = FakeCalendar::new();
        calendar.push_token_expired();
        calendar.push_page(EventsPage {
            next_sync_token: Some("T2".into()),
            ..EventsPage::default()
        });

        let req = SyncRequest::incremental("T1");
        let err = calendar.list_events("primary", &req).await.unwrap_err();
        assert!(matches!(err, Error::SyncTokenExpired));

        let page = calendar
            .list_events("primary", &SyncRequest::full_window())
            .await
            .unwrap();
        assert_eq!(page.next_sync_token.as_deref(), Some("T2"));
        assert_eq!(calendar.requests().len(), 2);
    }

    #[tokio::test]
    async fn fake_docs_tracks_appends_and_clears() {
        let docs = FakeDocs::new();
        let page = docs.create_page(None, "Research", &[]).await.unwrap();
        docs.append_blocks(&page.id, &[Block::heading(2, "Market")])
            .await
            .unwrap();
        docs.clear_page(&page.id).await.unwrap();

        let state = docs.page(&page.id).unwrap();
        assert!(state.blocks.is_empty());
        assert_eq!(state.cleared, 1);
    }

    #[tokio::test]
    async fn scripted_llm_matches_needles() {
        let llm = ScriptedLlm::new();
        llm.respond_containing("competitors", "## Rivals\n- one");

        let cancel = CancellationToken::new();
        let request = CompletionRequest {
            model: "gpt-4o".into(),
            system: "You research companies.".into(),
            prompt: "List competitors of Acme".into(),
        };

        let completion = llm.complete(&request, &cancel).await.unwrap();
        assert!(completion.text.contains("Rivals"));
        assert_eq!(llm.calls().len(), 1);
    }

    #[tokio::test]
    async fn scripted_llm_honors_pre_cancel() {
        let llm = ScriptedLlm::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let request = CompletionRequest {
            model: "gpt-4o".into(),
            system: String::new(),
            prompt: "anything".into(),
        };
        let err = llm.complete(&request, &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(llm.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn scripted_llm_aborts_delayed_call_on_cancel() {
        let llm = std::sync::Arc::new(ScriptedLlm::new());
        llm.set_delay(Duration::from_secs(600));

        let cancel = CancellationToken::new();
        let request = CompletionRequest {
            model: "gpt-4o".into(),
            system: String::new(),
            prompt: "slow".into(),
        };

        let call = {
            let llm = llm.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { llm.complete(&request, &cancel).await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();

        let err = call.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
    }
}
