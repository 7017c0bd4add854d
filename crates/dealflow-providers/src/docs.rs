//! Document workspace provider client.
//!
//! Each deal owns a small page tree: one root and five child pages. The
//! client speaks [`Block`] values only; translation to the provider's block
//! JSON happens here and nowhere else.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::blocks::Block;
use crate::error::{Error, Result};

/// A created page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRef {
    /// Provider page identifier.
    pub id: String,
    /// Shareable URL.
    pub url: String,
}

/// Document provider interface.
#[async_trait]
pub trait DocsProvider: Send + Sync {
    /// Creates a page, optionally under a parent, with initial content.
    async fn create_page(
        &self,
        parent_id: Option<&str>,
        title: &str,
        blocks: &[Block],
    ) -> Result<PageRef>;

    /// Appends blocks to the end of a page.
    async fn append_blocks(&self, page_id: &str, blocks: &[Block]) -> Result<()>;

    /// Removes all content blocks from a page (placeholder cleanup).
    async fn clear_page(&self, page_id: &str) -> Result<()>;

    /// Finds a direct child page by title.
    async fn find_child_page(&self, parent_id: &str, title: &str) -> Result<Option<PageRef>>;

    /// Reads a page's visible text, flattened to plain paragraphs.
    async fn read_page_text(&self, page_id: &str) -> Result<String>;
}

// ============================================================================
// HTTP client (Notion-style shape)
// ============================================================================

fn rich_text(text: &str) -> serde_json::Value {
    serde_json::json!([{ "type": "text", "text": { "content": text } }])
}

/// Maps a neutral block to the provider's block JSON.
fn block_to_json(block: &Block) -> serde_json::Value {
    match block {
        Block::Heading { level, text } => {
            let key = match level {
                1 => "heading_1",
                2 => "heading_2",
                _ => "heading_3",
            };
            serde_json::json!({
                "object": "block",
                "type": key,
                key: { "rich_text": rich_text(text) },
            })
        }
        Block::Paragraph { text } => serde_json::json!({
            "object": "block",
            "type": "paragraph",
            "paragraph": { "rich_text": rich_text(text) },
        }),
        Block::Bullet { text } => serde_json::json!({
            "object": "block",
            "type": "bulleted_list_item",
            "bulleted_list_item": { "rich_text": rich_text(text) },
        }),
        Block::Numbered { text } => serde_json::json!({
            "object": "block",
            "type": "numbered_list_item",
            "numbered_list_item": { "rich_text": rich_text(text) },
        }),
        Block::Divider => serde_json::json!({
            "object": "block",
            "type": "divider",
            "divider": {},
        }),
        Block::Callout { text } => serde_json::json!({
            "object": "block",
            "type": "callout",
            "callout": { "rich_text": rich_text(text) },
        }),
    }
}

#[derive(Debug, Deserialize)]
struct PageResponse {
    id: String,
    #[serde(default)]
    url: String,
}

#[derive(Debug, Deserialize)]
struct BlockChildrenResponse {
    #[serde(default)]
    results: Vec<RawBlock>,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawBlock {
    id: String,
    #[serde(rename = "type", default)]
    block_type: String,
    #[serde(flatten)]
    rest: serde_json::Value,
}

impl RawBlock {
    fn child_page_title(&self) -> Option<&str> {
        if self.block_type != "child_page" {
            return None;
        }
        self.rest
            .get("child_page")
            .and_then(|body| body.get("title"))
            .and_then(|t| t.as_str())
    }

    fn plain_text(&self) -> String {
        self.rest
            .get(&self.block_type)
            .and_then(|body| body.get("rich_text"))
            .and_then(|rt| rt.as_array())
            .map(|spans| {
                spans
                    .iter()
                    .filter_map(|s| {
                        s.get("text")
                            .and_then(|t| t.get("content"))
                            .and_then(|c| c.as_str())
                    })
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default()
    }
}

/// HTTP document client.
pub struct HttpDocsClient {
    base_url: String,
    access_token: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpDocsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpDocsClient")
            .field("base_url", &self.base_url)
            .field("access_token", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl HttpDocsClient {
    /// Default production API base.
    pub const DEFAULT_BASE_URL: &'static str = "https://api.notion.com/v1";

    /// API version header sent on every request.
    pub const API_VERSION: &'static str = "2022-06-28";

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

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(&self.access_token)
            .header("Notion-Version", Self::API_VERSION)
    }

    async fn check<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(Error::api(status.as_u16(), message));
        }
        response
            .json()
            .await
            .map_err(|e| Error::decode(format!("docs provider response: {e}")))
    }

    async fn list_children(&self, page_id: &str, cursor: Option<&str>) -> Result<BlockChildrenResponse> {
        let mut url = format!("{}/blocks/{}/children?page_size=100", self.base_url, page_id);
        if let Some(cursor) = cursor {
            url.push_str("&start_cursor=");
            url.push_str(cursor);
        }
        let response = self.request(reqwest::Method::GET, url).send().await?;
        Self::check(response).await
    }
}

#[async_trait]
impl DocsProvider for HttpDocsClient {
    async fn create_page(
        &self,
        parent_id: Option<&str>,
        title: &str,
        blocks: &[Block],
    ) -> Result<PageRef> {
        let parent = parent_id.map_or_else(
            || serde_json::json!({ "workspace": true }),
            |id| serde_json::json!({ "page_id": id }),
        );

        let body = serde_json::json!({
            "parent": parent,
            "properties": {
                "title": { "title": rich_text(title) },
            },
            "children": blocks.iter().map(block_to_json).collect::<Vec<_>>(),
        });

        let response = self
            .request(reqwest::Method::POST, format!("{}/pages", self.base_url))
            .json(&body)
            .send()
            .await?;

        let page: PageResponse = Self::check(response).await?;
        Ok(PageRef {
            id: page.id,
            url: page.url,
        })
    }

    async fn append_blocks(&self, page_id: &str, blocks: &[Block]) -> Result<()> {
        if blocks.is_empty() {
            return Ok(());
        }

        let body = serde_json::json!({
            "children": blocks.iter().map(block_to_json).collect::<Vec<_>>(),
        });

        let response = self
            .request(
                reqwest::Method::PATCH,
                format!("{}/blocks/{}/children", self.base_url, page_id),
            )
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(Error::api(status.as_u16(), message));
        }
        Ok(())
    }

    async fn clear_page(&self, page_id: &str) -> Result<()> {
        let mut cursor: Option<String> = None;
        loop {
            let page = self.list_children(page_id, cursor.as_deref()).await?;
            for block in &page.results {
                let response = self
                    .request(
                        reqwest::Method::DELETE,
                        format!("{}/blocks/{}", self.base_url, block.id),
                    )
                    .send()
                    .await?;
                let status = response.status();
                if !status.is_success() {
                    let message = response.text().await.unwrap_or_default();
                    return Err(Error::api(status.as_u16(), message));
                }
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(()),
            }
        }
    }

    async fn find_child_page(&self, parent_id: &str, title: &str) -> Result<Option<PageRef>> {
        let mut cursor: Option<String> = None;
        loop {
            let page = self.list_children(parent_id, cursor.as_deref()).await?;
            for block in &page.results {
                if block.child_page_title() == Some(title) {
                    let response = self
                        .request(
                            reqwest::Method::GET,
                            format!("{}/pages/{}", self.base_url, block.id),
                        )
                        .send()
                        .await?;
                    let found: PageResponse = Self::check(response).await?;
                    return Ok(Some(PageRef {
                        id: found.id,
                        url: found.url,
                    }));
                }
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(None),
            }
        }
    }

    async fn read_page_text(&self, page_id: &str) -> Result<String> {
        let mut lines = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self.list_children(page_id, cursor.as_deref()).await?;
            for block in &page.results {
                let text = block.plain_text();
                if !text.is_empty() {
                    lines.push(text);
                }
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(lines.join("\n")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heading_levels_map_to_distinct_types() {
        let h1 = block_to_json(&Block::heading(1, "a"));
        let h3 = block_to_json(&Block::heading(3, "a"));
        assert_eq!(h1["type"], "heading_1");
        assert_eq!(h3["type"], "heading_3");
    }

    #[test]
    fn divider_has_empty_body() {
        let json = block_to_json(&Block::Divider);
        assert_eq!(json["type"], "divider");
        assert!(json["divider"].as_object().unwrap().is_empty());
    }

    #[test]
    fn raw_block_extracts_plain_text() {
        let raw: RawBlock = serde_json::from_value(serde_json::json!({
            "id": "b-1",
            "type": "paragraph",
            "paragraph": {
                "rich_text": [
                    { "type": "text", "text": { "content": "hello " } },
                    { "type": "text", "text": { "content": "world" } },
                ],
            },
        }))
        .unwrap();
        assert_eq!(raw.plain_text(), "hello world");
    }
}
