//! Markdown to document-block translation.
//!
//! This is the only piece of external document-format knowledge in the core.
//! Handlers produce [`Block`] values; each docs backend maps them onto its
//! own wire representation. Swapping the document provider means writing one
//! new mapping, not touching any handler.

use serde::{Deserialize, Serialize};

/// A provider-neutral document block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    /// A heading, level 1 to 3.
    Heading {
        /// Heading depth (1 = largest). Clamped to 3.
        level: u8,
        /// Heading text.
        text: String,
    },
    /// A plain paragraph.
    Paragraph {
        /// Paragraph text.
        text: String,
    },
    /// A bulleted list item.
    Bullet {
        /// Item text.
        text: String,
    },
    /// A numbered list item.
    Numbered {
        /// Item text.
        text: String,
    },
    /// A horizontal divider.
    Divider,
    /// A callout box (used for generated-content banners).
    Callout {
        /// Callout text.
        text: String,
    },
}

impl Block {
    /// Convenience constructor for a heading.
    #[must_use]
    pub fn heading(level: u8, text: impl Into<String>) -> Self {
        Self::Heading {
            level: level.clamp(1, 3),
            text: text.into(),
        }
    }

    /// Convenience constructor for a paragraph.
    #[must_use]
    pub fn paragraph(text: impl Into<String>) -> Self {
        Self::Paragraph { text: text.into() }
    }

    /// Convenience constructor for a bullet.
    #[must_use]
    pub fn bullet(text: impl Into<String>) -> Self {
        Self::Bullet { text: text.into() }
    }

    /// Convenience constructor for a callout.
    #[must_use]
    pub fn callout(text: impl Into<String>) -> Self {
        Self::Callout { text: text.into() }
    }

    /// Returns the block's visible text, if any.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Heading { text, .. }
            | Self::Paragraph { text }
            | Self::Bullet { text }
            | Self::Numbered { text }
            | Self::Callout { text } => Some(text),
            Self::Divider => None,
        }
    }
}

/// Translates a markdown string into document blocks.
///
/// Understands the subset LLM output actually uses: `#`/`##`/`###` headings,
/// `-`/`*` bullets, `1.`-style numbered items, `---` dividers, and plain
/// paragraphs. Inline formatting is passed through verbatim; consecutive
/// plain lines join into one paragraph.
#[must_use]
pub fn markdown_to_blocks(markdown: &str) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut paragraph: Vec<&str> = Vec::new();

    let mut flush = |paragraph: &mut Vec<&str>, blocks: &mut Vec<Block>| {
        if !paragraph.is_empty() {
            blocks.push(Block::paragraph(paragraph.join(" ")));
            paragraph.clear();
        }
    };

    for line in markdown.lines() {
        let trimmed = line.trim();

        if trimmed.is_empty() {
            flush(&mut paragraph, &mut blocks);
            continue;
        }

        if trimmed == "---" || trimmed == "***" {
            flush(&mut paragraph, &mut blocks);
            blocks.push(Block::Divider);
            continue;
        }

        if let Some(rest) = trimmed.strip_prefix("### ") {
            flush(&mut paragraph, &mut blocks);
            blocks.push(Block::heading(3, rest));
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("## ") {
            flush(&mut paragraph, &mut blocks);
            blocks.push(Block::heading(2, rest));
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("# ") {
            flush(&mut paragraph, &mut blocks);
            blocks.push(Block::heading(1, rest));
            continue;
        }

        if let Some(rest) = trimmed.strip_prefix("- ").or_else(|| trimmed.strip_prefix("* ")) {
            flush(&mut paragraph, &mut blocks);
            blocks.push(Block::bullet(rest));
            continue;
        }

        if let Some(rest) = numbered_item(trimmed) {
            flush(&mut paragraph, &mut blocks);
            blocks.push(Block::Numbered {
                text: rest.to_string(),
            });
            continue;
        }

        paragraph.push(trimmed);
    }

    flush(&mut paragraph, &mut blocks);
    blocks
}

/// Matches `1. text` style numbered list items.
fn numbered_item(line: &str) -> Option<&str> {
    let dot = line.find(". ")?;
    if dot == 0 || !line[..dot].bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(&line[dot + 2..])
}
