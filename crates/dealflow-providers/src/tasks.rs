//! Task-manager provider client.
//!
//! Tasks live in a pipeline project divided into sections; moving a task
//! between sections is the user gesture that drives the stage state machine.
//! The client covers task CRUD, subtasks, completion, and webhook
//! registration (the two-phase handshake itself happens on our ingress
//! side).

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A task's placement within a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMembership {
    /// Project identifier.
    pub project_gid: String,
    /// Section identifier within the project, when placed.
    pub section_gid: Option<String>,
}

/// A task record as returned by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Provider task identifier.
    pub gid: String,
    /// Task name.
    pub name: String,
    /// Free-form notes.
    pub notes: Option<String>,
    /// Last modification timestamp.
    pub modified_at: DateTime<Utc>,
    /// Project/section memberships.
    pub memberships: Vec<TaskMembership>,
    /// Completion flag.
    pub completed: bool,
}

impl TaskRecord {
    /// Returns the task's section within the given project, if any.
    #[must_use]
    pub fn section_in_project(&self, project_gid: &str) -> Option<&str> {
        self.memberships
            .iter()
            .find(|m| m.project_gid == project_gid)
            .and_then(|m| m.section_gid.as_deref())
    }
}

/// A new task to create in the pipeline project.
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    /// Task name.
    pub name: String,
    /// Free-form notes.
    pub notes: Option<String>,
    /// Project to add the task to.
    pub project_gid: String,
    /// Section within the project.
    pub section_gid: Option<String>,
}

/// Task-manager provider interface.
#[async_trait]
pub trait TaskProvider: Send + Sync {
    /// Fetches a task with its memberships.
    async fn get_task(&self, task_gid: &str) -> Result<TaskRecord>;

    /// Creates a task; returns the new gid.
    async fn create_task(&self, task: &NewTask) -> Result<String>;

    /// Creates a subtask under a parent; returns the new gid.
    async fn create_subtask(
        &self,
        parent_gid: &str,
        name: &str,
        notes: Option<&str>,
    ) -> Result<String>;

    /// Replaces a task's notes.
    async fn update_task_notes(&self, task_gid: &str, notes: &str) -> Result<()>;

    /// Marks a task complete.
    async fn complete_task(&self, task_gid: &str) -> Result<()>;

    /// Registers a webhook on a resource; returns the webhook gid.
    async fn create_webhook(&self, resource_gid: &str, target_url: &str) -> Result<String>;

    /// Deregisters a webhook.
    async fn delete_webhook(&self, webhook_gid: &str) -> Result<()>;
}

// ============================================================================
// HTTP client
// ============================================================================

#[derive(Debug, Serialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct DataResponse<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct RawTask {
    gid: String,
    name: String,
    notes: Option<String>,
    modified_at: DateTime<Utc>,
    #[serde(default)]
    memberships: Vec<RawMembership>,
    #[serde(default)]
    completed: bool,
}

#[derive(Debug, Deserialize)]
struct RawMembership {
    project: Option<RawRef>,
    section: Option<RawRef>,
}

#[derive(Debug, Deserialize)]
struct RawRef {
    gid: String,
}

#[derive(Debug, Deserialize)]
struct GidOnly {
    gid: String,
}

impl From<RawTask> for TaskRecord {
    fn from(raw: RawTask) -> Self {
        Self {
            gid: raw.gid,
            name: raw.name,
            notes: raw.notes,
            modified_at: raw.modified_at,
            memberships: raw
                .memberships
                .into_iter()
                .filter_map(|m| {
                    m.project.map(|p| TaskMembership {
                        project_gid: p.gid,
                        section_gid: m.section.map(|s| s.gid),
                    })
                })
                .collect(),
            completed: raw.completed,
        }
    }
}

/// HTTP task-manager client.
pub struct HttpTaskClient {
    base_url: String,
    access_token: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpTaskClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTaskClient")
            .field("base_url", &self.base_url)
            .field("access_token", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl HttpTaskClient {
    /// Default production API base.
    pub const DEFAULT_BASE_URL: &'static str = "https://app.asana.com/api/1.0";

    /// Creates a new client against the default API base.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(access_token: impl Into<String>) -> Result<Self> {
        Self::with_base_url(Self::DEFAULT_BASE_URL, access_token)
    }

    /// Creates a new client against a custom API base (tests, proxies).
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn with_base_url(
        base_url: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
            client,
        })
    }

    async fn check<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(Error::api(status.as_u16(), message));
        }
        let body: DataResponse<T> = response
            .json()
            .await
            .map_err(|e| Error::decode(format!("task provider response: {e}")))?;
        Ok(body.data)
    }

    async fn check_empty(response: reqwest::Response) -> Result<()> {
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(Error::api(status.as_u16(), message));
        }
        Ok(())
    }
}

#[async_trait]
impl TaskProvider for HttpTaskClient {
    async fn get_task(&self, task_gid: &str) -> Result<TaskRecord> {
        let url = format!("{}/tasks/{}", self.base_url, task_gid);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.access_token)
            .query(&[(
                "opt_fields",
                "name,notes,modified_at,completed,memberships.project.gid,memberships.section.gid",
            )])
            .send()
            .await?;

        let raw: RawTask = Self::check(response).await?;
        Ok(raw.into())
    }

    async fn create_task(&self, task: &NewTask) -> Result<String> {
        let url = format!("{}/tasks", self.base_url);
        let mut data = serde_json::json!({
            "name": task.name,
            "projects": [task.project_gid],
        });
        if let Some(notes) = &task.notes {
            data["notes"] = serde_json::json!(notes);
        }
        if let Some(section) = &task.section_gid {
            data["memberships"] = serde_json::json!([{
                "project": task.project_gid,
                "section": section,
            }]);
        }

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&DataEnvelope { data })
            .send()
            .await?;

        let created: GidOnly = Self::check(response).await?;
        Ok(created.gid)
    }

    async fn create_subtask(
        &self,
        parent_gid: &str,
        name: &str,
        notes: Option<&str>,
    ) -> Result<String> {
        let url = format!("{}/tasks/{}/subtasks", self.base_url, parent_gid);
        let mut data = serde_json::json!({ "name": name });
        if let Some(notes) = notes {
            data["notes"] = serde_json::json!(notes);
        }

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&DataEnvelope { data })
            .send()
            .await?;

        let created: GidOnly = Self::check(response).await?;
        Ok(created.gid)
    }

    async fn update_task_notes(&self, task_gid: &str, notes: &str) -> Result<()> {
        let url = format!("{}/tasks/{}", self.base_url, task_gid);
        let response = self
            .client
            .put(&url)
            .bearer_auth(&self.access_token)
            .json(&DataEnvelope {
                data: serde_json::json!({ "notes": notes }),
            })
            .send()
            .await?;

        Self::check_empty(response).await
    }

    async fn complete_task(&self, task_gid: &str) -> Result<()> {
        let url = format!("{}/tasks/{}", self.base_url, task_gid);
        let response = self
            .client
            .put(&url)
            .bearer_auth(&self.access_token)
            .json(&DataEnvelope {
                data: serde_json::json!({ "completed": true }),
            })
            .send()
            .await?;

        Self::check_empty(response).await
    }

    async fn create_webhook(&self, resource_gid: &str, target_url: &str) -> Result<String> {
        let url = format!("{}/webhooks", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&DataEnvelope {
                data: serde_json::json!({
                    "resource": resource_gid,
                    "target": target_url,
                }),
            })
            .send()
            .await?;

        let created: GidOnly = Self::check(response).await?;
        Ok(created.gid)
    }

    async fn delete_webhook(&self, webhook_gid: &str) -> Result<()> {
        let url = format!("{}/webhooks/{}", self.base_url, webhook_gid);
        let response = self
            .client
            .delete(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;

        Self::check_empty(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn section_lookup_by_project() {
        let record = TaskRecord {
            gid: "t-1".into(),
            name: "Acme".into(),
            notes: None,
            modified_at: Utc::now(),
            memberships: vec![
                TaskMembership {
                    project_gid: "other".into(),
                    section_gid: Some("sec-x".into()),
                },
                TaskMembership {
                    project_gid: "pipeline".into(),
                    section_gid: Some("sec-dd".into()),
                },
            ],
            completed: false,
        };

        assert_eq!(record.section_in_project("pipeline"), Some("sec-dd"));
        assert_eq!(record.section_in_project("missing"), None);
    }

    #[test]
    fn raw_task_conversion_drops_projectless_memberships() {
        let raw = RawTask {
            gid: "t-1".into(),
            name: "Acme".into(),
            notes: None,
            modified_at: Utc::now(),
            memberships: vec![
                RawMembership {
                    project: None,
                    section: Some(RawRef { gid: "sec-x".into() }),
                },
                RawMembership {
                    project: Some(RawRef {
                        gid: "pipeline".into(),
                    }),
                    section: None,
                },
            ],
            completed: false,
        };

        let record = TaskRecord::from(raw);
        assert_eq!(record.memberships.len(), 1);
        assert_eq!(record.memberships[0].project_gid, "pipeline");
        assert_eq!(record.memberships[0].section_gid, None);
    }
}
