//! CALENDAR_SYNC handler: change enumeration and deal detection.
//!
//! The hardest delivery-semantics handler in the system. Replays are safe
//! because the deal upsert is keyed on `(calendar, event)` and the
//! materialization branch is guarded by `task_record_gid` presence; the
//! sync token is only persisted after the full page walk.

use std::sync::OnceLock;

use regex::Regex;

use dealflow_core::TenantId;
use dealflow_providers::{CalendarEvent, SyncRequest};
use dealflow_store::DealPatch;

use super::JobRouter;
use crate::envelope::{CalendarSyncPayload, JobEnvelope};
use crate::error::Result;

/// The literal marker that makes a calendar event a deal event.
pub const DEAL_TAG: &str = "[deal]";

fn deal_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\[deal\]").expect("deal tag regex"))
}

fn dash_split_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(.+?)\s*[—-]\s*(.+)$").expect("dash split regex"))
}

/// Returns true when the event's title or description carries the deal tag.
#[must_use]
pub fn has_deal_tag(event: &CalendarEvent) -> bool {
    let in_title = event
        .summary
        .as_deref()
        .is_some_and(|s| deal_tag_re().is_match(s));
    let in_description = event
        .description
        .as_deref()
        .is_some_and(|d| deal_tag_re().is_match(d));
    in_title || in_description
}

/// Extracts `(company, founder)` from a deal event.
///
/// Title is examined first: a `Company — Founder` split wins outright.
/// Otherwise the tag-stripped title is the company and the first non-self,
/// non-resource attendee supplies the founder.
#[must_use]
pub fn extract_company_founder(event: &CalendarEvent) -> (Option<String>, Option<String>) {
    let title = event.summary.as_deref().unwrap_or_default();
    let stripped = deal_tag_re().replace_all(title, "").trim().to_string();

    if let Some(caps) = dash_split_re().captures(&stripped) {
        return (
            Some(caps[1].trim().to_string()),
            Some(caps[2].trim().to_string()),
        );
    }

    let company = if stripped.is_empty() {
        None
    } else {
        Some(stripped)
    };
    let founder = event
        .attendees
        .iter()
        .find(|a| !a.is_self && !a.is_resource)
        .map(|a| {
            a.display_name
                .clone()
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| a.email.clone())
        });

    (company, founder)
}

impl JobRouter {
    /// Handles one CALENDAR_SYNC job.
    pub(crate) async fn handle_calendar_sync(
        &self,
        tenant_id: TenantId,
        envelope: &JobEnvelope,
    ) -> Result<()> {
        let payload: CalendarSyncPayload = envelope.payload_as()?;

        let Some(channel) = self
            .store
            .channel_by_id(tenant_id, &payload.channel_id)
            .await?
        else {
            tracing::info!(channel_id = %payload.channel_id, "channel gone, dropping sync");
            return Ok(());
        };

        let mut request = match &channel.sync_token {
            Some(token) => SyncRequest::incremental(token.clone()),
            None => SyncRequest::full_window(),
        };

        let mut latest_token: Option<String> = None;
        loop {
            let page = match self
                .calendar
                .list_events(&channel.calendar_id, &request)
                .await
            {
                Ok(page) => page,
                Err(dealflow_providers::Error::SyncTokenExpired) => {
                    tracing::warn!(
                        calendar_id = %channel.calendar_id,
                        "sync token gone, falling back to full sync"
                    );
                    request = SyncRequest::full_window();
                    continue;
                }
                Err(error) => return Err(error.into()),
            };

            for event in &page.events {
                if let Err(error) = self
                    .process_calendar_event(tenant_id, &channel.calendar_id, event)
                    .await
                {
                    tracing::warn!(event_id = %event.id, %error, "event processing failed");
                }
            }

            if page.next_sync_token.is_some() {
                latest_token = page.next_sync_token;
            }
            match page.next_page_token {
                Some(next) => request.page_token = Some(next),
                None => break,
            }
        }

        // The triggering channel may have been replaced mid-flight; the
        // token always lands on whichever channel is active now.
        if let Some(token) = latest_token {
            let persisted = self
                .store
                .set_active_sync_token(tenant_id, &channel.calendar_id, &token)
                .await?;
            if !persisted {
                tracing::warn!(
                    calendar_id = %channel.calendar_id,
                    "no active channel to carry the new sync token"
                );
            }
        }

        Ok(())
    }

    async fn process_calendar_event(
        &self,
        tenant_id: TenantId,
        calendar_id: &str,
        event: &CalendarEvent,
    ) -> Result<()> {
        if event.status.as_deref() == Some("cancelled") {
            return Ok(());
        }
        if !has_deal_tag(event) {
            return Ok(());
        }

        let (company, founder) = extract_company_founder(event);
        let deal = self
            .store
            .upsert_deal(
                tenant_id,
                calendar_id,
                &event.id,
                DealPatch {
                    company,
                    founder,
                    event_title: event.summary.clone(),
                    event_start: event.start,
                },
            )
            .await?;

        if deal.task_record_gid.is_none() {
            self.materialize_deal(tenant_id, &deal).await;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dealflow_providers::EventAttendee;

    fn event(summary: &str) -> CalendarEvent {
        CalendarEvent {
            id: "evt-1".into(),
            summary: Some(summary.into()),
            ..CalendarEvent::default()
        }
    }

    #[test]
    fn tag_detection_is_case_insensitive() {
        assert!(has_deal_tag(&event("Acme intro [DEAL]")));
        assert!(has_deal_tag(&event("Acme intro [deal]")));
        assert!(!has_deal_tag(&event("Acme intro")));

        let mut e = event("Acme intro");
        e.description = Some("tagging this [Deal]".into());
        assert!(has_deal_tag(&e));
    }

    #[test]
    fn dash_split_extracts_company_and_founder() {
        let (company, founder) = extract_company_founder(&event("Acme — Jane [deal]"));
        assert_eq!(company.as_deref(), Some("Acme"));
        assert_eq!(founder.as_deref(), Some("Jane"));

        let (company, founder) = extract_company_founder(&event("[deal] Acme - Jane Smith"));
        assert_eq!(company.as_deref(), Some("Acme"));
        assert_eq!(founder.as_deref(), Some("Jane Smith"));
    }

    #[test]
    fn fallback_uses_attendee_as_founder() {
        let mut e = event("Acme intro [deal]");
        e.attendees = vec![
            EventAttendee {
                email: "me@fund.vc".into(),
                display_name: None,
                is_self: true,
                is_resource: false,
            },
            EventAttendee {
                email: "room@fund.vc".into(),
                display_name: Some("Boardroom".into()),
                is_self: false,
                is_resource: true,
            },
            EventAttendee {
                email: "jane@acme.dev".into(),
                display_name: Some("Jane".into()),
                is_self: false,
                is_resource: false,
            },
        ];

        let (company, founder) = extract_company_founder(&e);
        assert_eq!(company.as_deref(), Some("Acme intro"));
        assert_eq!(founder.as_deref(), Some("Jane"));
    }

    #[test]
    fn fallback_without_attendees_has_null_founder() {
        let (company, founder) = extract_company_founder(&event("Acme [deal]"));
        assert_eq!(company.as_deref(), Some("Acme"));
        assert_eq!(founder, None);
    }

    #[test]
    fn attendee_email_used_when_display_name_missing() {
        let mut e = event("Acme [deal]");
        e.attendees = vec![EventAttendee {
            email: "jane@acme.dev".into(),
            display_name: None,
            is_self: false,
            is_resource: false,
        }];
        let (_, founder) = extract_company_founder(&e);
        assert_eq!(founder.as_deref(), Some("jane@acme.dev"));
    }
}
