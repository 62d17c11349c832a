use envoy_core::errors::CompletionError;
use envoy_store::StoreError;

use crate::compactor::SummaryParseError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("completion error: {0}")]
    Completion(#[from] CompletionError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Orders and outreach need both phase and state.
    #[error("phase and state must both be set")]
    MissingGameState,

    /// The batched summary refresh returned unusable output; nothing was applied.
    #[error("malformed summaries: {0}")]
    MalformedSummaries(#[from] SummaryParseError),

    /// No valid order line after every retry step.
    #[error("no valid order lines after {attempts} attempts")]
    GrammarRejection { attempts: usize },

    #[error("completion returned an empty reply")]
    EmptyReply,
}

impl EngineError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Completion(e) => e.error_kind(),
            Self::Store(_) => "store",
            Self::MissingGameState => "missing_game_state",
            Self::MalformedSummaries(_) => "malformed_summaries",
            Self::GrammarRejection { .. } => "grammar_rejection",
            Self::EmptyReply => "empty_reply",
        }
    }
}
