use tracing::{info, instrument};

use envoy_core::completion::CompletionService;
use envoy_store::{JournalRepo, StoreError};

use crate::error::EngineError;
use crate::prompts::JOURNAL_SYSTEM_PROMPT;
use crate::truncate::{truncate_chars, ELLIPSIS};

/// The AI's private strategy notes, rewritten wholesale on every refresh.
pub struct StrategyJournal {
    repo: JournalRepo,
    max_chars: usize,
}

impl StrategyJournal {
    pub fn new(repo: JournalRepo, max_chars: usize) -> Self {
        Self { repo, max_chars }
    }

    pub fn current(&self) -> Result<String, StoreError> {
        self.repo.get()
    }

    /// Ask for a rewritten journal using `prompt` and store it.
    ///
    /// The result is trimmed and capped at `max_chars`. Nothing is written
    /// when the completion fails.
    #[instrument(skip_all, fields(stage = stage))]
    pub async fn refresh(
        &self,
        completion: &dyn CompletionService,
        stage: &'static str,
        prompt: &str,
    ) -> Result<String, EngineError> {
        let raw = completion.complete(JOURNAL_SYSTEM_PROMPT, prompt).await?;
        let journal = truncate_chars(raw.trim(), self.max_chars, ELLIPSIS);
        self.repo.set(&journal)?;
        info!(stage, chars = journal.chars().count(), "journal refreshed");
        Ok(journal)
    }
}
