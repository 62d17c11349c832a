use async_trait::async_trait;

use crate::errors::CompletionError;

/// The generative text oracle, consumed as a pure function
/// `(system_prompt, user_text) -> text`.
///
/// Implementations must not stream and must return plain text; callers that
/// expect JSON validate it themselves.
#[async_trait]
pub trait CompletionService: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;

    async fn complete(&self, system_prompt: &str, user_text: &str)
        -> Result<String, CompletionError>;
}
