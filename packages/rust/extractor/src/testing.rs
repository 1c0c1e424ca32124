//! Scripted [`LanguageModel`] for tests of the extractor and the pipeline.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use docmodules_shared::{DocModulesError, Result};

use crate::model::LanguageModel;

/// One scripted response.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Return this completion text.
    Text(String),
    /// Fail as if the model were not installed.
    Unavailable,
    /// Fail with a generic backend error.
    Error(String),
    /// Never answer. Only a caller-side timeout ends the call.
    Hang,
}

/// A model that plays back scripted replies in order, then repeats a
/// fallback reply forever.
pub struct ScriptedModel {
    script: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedModel {
    /// Answer every prompt with `text`.
    pub fn always(text: impl Into<String>) -> Self {
        Self::with_fallback(Reply::Text(text.into()))
    }

    /// Never answer any prompt.
    pub fn hanging() -> Self {
        Self::with_fallback(Reply::Hang)
    }

    pub fn with_fallback(fallback: Reply) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Queue a reply ahead of the fallback.
    pub fn then(self, reply: Reply) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(reply);
        }
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every prompt received, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn infer(&self, prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }

        let reply = self
            .script
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front())
            .unwrap_or_else(|| self.fallback.clone());

        match reply {
            Reply::Text(text) => Ok(text),
            Reply::Unavailable => Err(DocModulesError::ModelUnavailable(
                "scripted model is not installed".into(),
            )),
            Reply::Error(message) => Err(DocModulesError::Model(message)),
            Reply::Hang => std::future::pending().await,
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
