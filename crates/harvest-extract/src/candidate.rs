//! Candidate model and the extraction-method dispatch order.

use serde::{Deserialize, Serialize};

/// Closed set of extraction methods, ordered by trust.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    NetworkJson,
    EmbeddedState,
    Ldjson,
    Pdf,
    Dom,
    LlmExtract,
}

impl Method {
    /// Method priority feeding candidate scores. Higher wins.
    #[must_use]
    pub fn priority(self) -> u8 {
        match self {
            Self::NetworkJson => 5,
            Self::EmbeddedState => 4,
            Self::Ldjson | Self::Pdf => 3,
            Self::Dom => 2,
            Self::LlmExtract => 1,
        }
    }

    /// Stable wire token.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NetworkJson => "network_json",
            Self::EmbeddedState => "embedded_state",
            Self::Ldjson => "ldjson",
            Self::Pdf => "pdf",
            Self::Dom => "dom",
            Self::LlmExtract => "llm_extract",
        }
    }
}

/// One proposed field value from one method on one source. Candidates carry
/// no confidence; that is computed at consensus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub field: String,
    pub value: String,
    pub method: Method,
    pub key_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quote: Option<String>,
    pub source_index: usize,
}

impl Candidate {
    /// Exact de-duplication key: `field|value|method|key_path`.
    #[must_use]
    pub fn dedupe_key(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.field,
            self.value,
            self.method.as_str(),
            self.key_path
        )
    }
}
