//! Evidence packs and the LLM adapter seam.

pub mod budget;
pub mod llm;
pub mod pack;

pub use budget::{AiBudget, BudgetEvent};
pub use llm::{
    LlmBackend, LlmCandidate, LlmError, LlmRequest, LlmResponse, Message, ModelTier, Role,
    StubLlmBackend, Usage,
};
pub use pack::{
    EvidencePack, FieldSlice, FieldState, PrimeSnippet, SnippetInput, build_evidence_pack,
    is_high_stakes, render_messages,
};
