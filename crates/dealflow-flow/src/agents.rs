//! Research agent definitions.
//!
//! Six agents, fixed order. The order matters twice: it is the spawn order
//! of the fan-out and the emission order on the research page, regardless
//! of which agent finishes first.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use dealflow_providers::CompletionRequest;

use crate::error::Error;

/// The closed set of research agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKey {
    /// Market size and growth.
    MarketTam,
    /// Competitive landscape.
    Competitors,
    /// Founder track record.
    FounderBackground,
    /// Risks and red flags.
    RisksRedflags,
    /// Product moat and defensibility.
    ProductDefensibility,
    /// Traction and momentum signals.
    TractionSignals,
}

impl AgentKey {
    /// All agents, in fan-out and emission order.
    pub const ALL: [Self; 6] = [
        Self::MarketTam,
        Self::Competitors,
        Self::FounderBackground,
        Self::RisksRedflags,
        Self::ProductDefensibility,
        Self::TractionSignals,
    ];

    /// Returns the stable wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MarketTam => "market_tam",
            Self::Competitors => "competitors",
            Self::FounderBackground => "founder_background",
            Self::RisksRedflags => "risks_redflags",
            Self::ProductDefensibility => "product_defensibility",
            Self::TractionSignals => "traction_signals",
        }
    }

    /// Returns the human-readable section title.
    #[must_use]
    pub const fn title(&self) -> &'static str {
        match self {
            Self::MarketTam => "Market & TAM",
            Self::Competitors => "Competitive Landscape",
            Self::FounderBackground => "Founder Background",
            Self::RisksRedflags => "Risks & Red Flags",
            Self::ProductDefensibility => "Product & Defensibility",
            Self::TractionSignals => "Traction Signals",
        }
    }

    /// Returns the research focus fed to the model.
    #[must_use]
    pub const fn focus(&self) -> &'static str {
        match self {
            Self::MarketTam => {
                "Estimate the total addressable market, its growth rate, and the \
                 segment the company actually serves. Separate TAM from realistic SOM."
            }
            Self::Competitors => {
                "Map the competitive landscape: direct competitors, adjacent players \
                 likely to enter, and how the company differentiates. Note funding and \
                 scale of each competitor where known."
            }
            Self::FounderBackground => {
                "Research the founder's track record: prior companies, exits, domain \
                 expertise, and public reputation. Flag anything unverifiable."
            }
            Self::RisksRedflags => {
                "Identify the principal risks: market, execution, regulatory, \
                 concentration, and anything in the public record that looks like a \
                 red flag. Be specific and skeptical."
            }
            Self::ProductDefensibility => {
                "Assess the product's moat: technology depth, switching costs, network \
                 effects, data advantages. State plainly where defensibility is weak."
            }
            Self::TractionSignals => {
                "Collect traction signals: customers, revenue hints, hiring pace, \
                 partnerships, press. Distinguish verified facts from company claims."
            }
        }
    }

    /// Builds the completion request for this agent.
    #[must_use]
    pub fn completion_request(
        &self,
        model: &str,
        company: &str,
        founder: Option<&str>,
        context: Option<&str>,
    ) -> CompletionRequest {
        let mut prompt = format!(
            "Company: {company}\nResearch focus ({key}): {focus}\n",
            key = self.as_str(),
            focus = self.focus()
        );
        if let Some(founder) = founder {
            prompt.push_str(&format!("Founder: {founder}\n"));
        }
        if let Some(context) = context {
            prompt.push_str(&format!("\nMeeting notes:\n{context}\n"));
        }
        prompt.push_str(
            "\nWrite a concise markdown brief with headings and bullets. \
             End with a short list of source URLs if you can cite any.",
        );

        CompletionRequest {
            model: model.to_string(),
            system: "You are a venture diligence analyst. You are factual, terse, \
                     and explicit about uncertainty."
                .to_string(),
            prompt,
        }
    }
}

impl fmt::Display for AgentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "market_tam" => Ok(Self::MarketTam),
            "competitors" => Ok(Self::Competitors),
            "founder_background" => Ok(Self::FounderBackground),
            "risks_redflags" => Ok(Self::RisksRedflags),
            "product_defensibility" => Ok(Self::ProductDefensibility),
            "traction_signals" => Ok(Self::TractionSignals),
            other => Err(Error::invalid_job(format!("unknown agent key: {other}"))),
        }
    }
}

/// The fixed ten-section memo outline.
pub const MEMO_OUTLINE: [&str; 10] = [
    "Executive Summary",
    "Company Overview",
    "Problem & Solution",
    "Market Opportunity",
    "Product & Technology",
    "Competition",
    "Team",
    "Traction & Metrics",
    "Risks",
    "Recommendation",
];

/// Builds the memo synthesis completion request.
#[must_use]
pub fn memo_request(
    model: &str,
    company: &str,
    founder: Option<&str>,
    research: Option<&str>,
) -> CompletionRequest {
    let mut prompt = format!("Write an investment memo for {company}");
    if let Some(founder) = founder {
        prompt.push_str(&format!(" (founder: {founder})"));
    }
    prompt.push_str(".\n\nUse exactly these ten sections, as markdown `##` headings:\n");
    for section in MEMO_OUTLINE {
        prompt.push_str(&format!("- {section}\n"));
    }
    if let Some(research) = research {
        prompt.push_str(&format!("\nResearch gathered so far:\n{research}\n"));
    }

    CompletionRequest {
        model: model.to_string(),
        system: "You are a venture analyst writing an internal investment memo. \
                 Be balanced; surface both the bull and bear case."
            .to_string(),
        prompt,
    }
}
