use async_trait::async_trait;

use docmodules_shared::Result;

/// A text-completion backend.
///
/// Implementations return the raw completion. Timeouts are applied by the
/// caller, so an implementation may take as long as its backend does.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Run one prompt to completion.
    ///
    /// Errors are [`DocModulesError::ModelUnavailable`] when the model is not
    /// installed or the server is unreachable, [`DocModulesError::ModelTimeout`]
    /// when the backend gave up, and [`DocModulesError::Model`] otherwise.
    ///
    /// [`DocModulesError::ModelUnavailable`]: docmodules_shared::DocModulesError::ModelUnavailable
    /// [`DocModulesError::ModelTimeout`]: docmodules_shared::DocModulesError::ModelTimeout
    /// [`DocModulesError::Model`]: docmodules_shared::DocModulesError::Model
    async fn infer(&self, prompt: &str) -> Result<String>;

    /// Model identifier for logs and error messages.
    fn name(&self) -> &str;
}
