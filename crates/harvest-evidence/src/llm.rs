//! Provider-agnostic LLM adapter.
//!
//! The transport belongs to an external collaborator; this module fixes the
//! request/response contract and ships a stub backend for tests and dry runs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use harvest_extract::{Candidate, Method};

/// Model tier requested per call. Escalation moves fast → deep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    #[default]
    Fast,
    Deep,
    Vision,
}

/// Role of one prompt message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One prompt message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// One extraction request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    pub model_tier: ModelTier,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// One candidate as the model returned it, before lock filtering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmCandidate {
    pub field: String,
    pub value: String,
    pub quote: String,
    #[serde(default)]
    pub key_path: String,
}

impl LlmCandidate {
    /// Convert into an extractor candidate for one source. The extractor
    /// drops anything touching locked fields.
    #[must_use]
    pub fn into_candidate(self, source_index: usize) -> Candidate {
        let key_path = if self.key_path.is_empty() {
            format!("llm:{}", self.field)
        } else {
            self.key_path
        };
        Candidate {
            field: self.field,
            value: self.value,
            method: Method::LlmExtract,
            key_path,
            quote: Some(self.quote),
            source_index,
        }
    }
}

/// Token accounting from the provider.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Structured model output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmResponse {
    pub candidates: Vec<LlmCandidate>,
    #[serde(default)]
    pub conflicts: Vec<String>,
    #[serde(default)]
    pub notes: Vec<String>,
    #[serde(default)]
    pub usage: Usage,
}

/// Adapter failures.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM budget exhausted: {0}")]
    BudgetExhausted(String),
    #[error("LLM transport error: {0}")]
    Transport(String),
    #[error("LLM returned an unusable response: {0}")]
    InvalidResponse(String),
}

/// The LLM seam.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn invoke(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;
}

/// Canned backend for tests and dry runs: returns its staged candidates,
/// optionally only on the deep tier (to exercise escalation).
#[derive(Debug, Default)]
pub struct StubLlmBackend {
    staged: Vec<LlmCandidate>,
    deep_only: Vec<LlmCandidate>,
}

impl StubLlmBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Candidates returned on every tier.
    pub fn stage(&mut self, candidate: LlmCandidate) {
        self.staged.push(candidate);
    }

    /// Candidates returned only when the deep tier is requested.
    pub fn stage_deep(&mut self, candidate: LlmCandidate) {
        self.deep_only.push(candidate);
    }
}

#[async_trait]
impl LlmBackend for StubLlmBackend {
    async fn invoke(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let mut candidates = self.staged.clone();
        if request.model_tier == ModelTier::Deep {
            candidates.extend(self.deep_only.clone());
        }
        Ok(LlmResponse {
            candidates,
            conflicts: Vec::new(),
            notes: vec!["stub".to_string()],
            usage: Usage {
                input_tokens: 100,
                output_tokens: 50,
            },
        })
    }
}
