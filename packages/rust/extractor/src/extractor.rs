//! Batch-by-batch extraction with retry, repair and merge.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use docmodules_shared::{DocModulesError, ExtractConfig, ExtractionResult, NormalizedDocument, Result};

use crate::model::LanguageModel;
use crate::prompt::{self, PromptBatch};
use crate::repair::{RepairStep, parse_with_repair};
use crate::schema;

/// A batch whose documents contributed nothing.
#[derive(Debug, Clone)]
pub struct UnitFailure {
    pub urls: Vec<String>,
    pub error: String,
}

/// Merged result plus per-unit accounting.
#[derive(Debug, Clone, Default)]
pub struct ExtractionReport {
    pub result: ExtractionResult,
    /// Batches submitted.
    pub units: usize,
    pub succeeded: usize,
    pub parse_failures: usize,
    pub model_failures: usize,
    /// Successful units that needed at least one repair step.
    pub repaired: usize,
    /// Values flattened into the two-level shape.
    pub flattened: usize,
    pub failures: Vec<UnitFailure>,
}

/// Runs normalized documents through a [`LanguageModel`].
///
/// Calls are serialized: one inference in flight at a time, batches in
/// document order.
pub struct Extractor {
    model: Arc<dyn LanguageModel>,
    config: ExtractConfig,
}

enum UnitOutcome {
    Parsed {
        result: ExtractionResult,
        step: RepairStep,
        flattened: usize,
    },
    Failed(DocModulesError),
}

impl Extractor {
    pub fn new(model: Arc<dyn LanguageModel>, config: ExtractConfig) -> Self {
        Self { model, config }
    }

    /// Extract and merge modules from every document.
    ///
    /// Per-batch failures are recorded in the report and do not stop the run.
    /// Errors are returned only when there is nothing to extract from
    /// ([`DocModulesError::NoResults`]) or when every model call failed
    /// ([`DocModulesError::ModelUnavailable`]).
    #[instrument(skip_all, fields(model = %self.model.name(), documents = documents.len()))]
    pub async fn extract(&self, documents: &[NormalizedDocument]) -> Result<ExtractionReport> {
        if documents.is_empty() {
            return Err(DocModulesError::NoResults("no documents to extract from".into()));
        }

        let batches = prompt::build_batches(documents, self.config.batch_char_budget);
        info!(batches = batches.len(), "starting extraction");

        let mut report = ExtractionReport {
            units: batches.len(),
            ..Default::default()
        };
        let mut last_error: Option<DocModulesError> = None;

        for (index, batch) in batches.iter().enumerate() {
            match self.run_unit(index, batch).await {
                UnitOutcome::Parsed {
                    result,
                    step,
                    flattened,
                } => {
                    debug!(unit = index, modules = result.len(), repaired_by = step.as_str(), "unit extracted");
                    report.succeeded += 1;
                    if step != RepairStep::Strict {
                        report.repaired += 1;
                    }
                    report.flattened += flattened;
                    report.result.merge(result);
                }
                UnitOutcome::Failed(error) => {
                    warn!(unit = index, urls = ?batch.urls, error = %error, "unit failed, skipping");
                    if error.is_model_failure() {
                        report.model_failures += 1;
                    } else {
                        report.parse_failures += 1;
                    }
                    report.failures.push(UnitFailure {
                        urls: batch.urls.clone(),
                        error: error.to_string(),
                    });
                    last_error = Some(error);
                }
            }
        }

        if report.succeeded == 0 {
            let last = last_error.map(|e| e.to_string()).unwrap_or_default();
            if report.model_failures == report.units {
                return Err(DocModulesError::ModelUnavailable(format!(
                    "all {} model calls failed; last error: {last}",
                    report.units
                )));
            }
            return Err(DocModulesError::NoResults(format!(
                "every response was unrecoverable; last error: {last}"
            )));
        }

        info!(
            modules = report.result.len(),
            submodules = report.result.submodule_count(),
            succeeded = report.succeeded,
            failed = report.failures.len(),
            repaired = report.repaired,
            flattened = report.flattened,
            "extraction finished"
        );
        Ok(report)
    }

    /// Submit one batch up to `max_attempts` times.
    async fn run_unit(&self, index: usize, batch: &PromptBatch) -> UnitOutcome {
        let prompt = prompt::render_prompt(batch);
        let attempts = self.config.max_attempts.max(1);
        let mut last = DocModulesError::Model("no attempt made".into());

        for attempt in 1..=attempts {
            let raw = match self.infer_with_ceiling(&prompt).await {
                Ok(raw) => raw,
                Err(error) => {
                    warn!(unit = index, attempt, error = %error, "model call failed");
                    let unavailable = matches!(error, DocModulesError::ModelUnavailable(_));
                    last = error;
                    if unavailable {
                        break;
                    }
                    continue;
                }
            };

            match parse_with_repair(&raw) {
                Ok(repaired) => {
                    let (result, flattened) = schema::coerce(repaired.value);
                    return UnitOutcome::Parsed {
                        result,
                        step: repaired.step,
                        flattened,
                    };
                }
                Err(error) => {
                    warn!(unit = index, attempt, error = %error, "model output unrecoverable");
                    last = error;
                }
            }
        }

        UnitOutcome::Failed(last)
    }

    async fn infer_with_ceiling(&self, prompt: &str) -> Result<String> {
        let ceiling: Duration = self.config.model_timeout;
        match tokio::time::timeout(ceiling, self.model.infer(prompt)).await {
            Ok(result) => result,
            Err(_) => Err(DocModulesError::ModelTimeout {
                model: self.model.name().to_string(),
                secs: ceiling.as_secs(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Reply, ScriptedModel};
    use chrono::Utc;

    fn doc(url: &str, text: &str) -> NormalizedDocument {
        NormalizedDocument {
            url: url.into(),
            title: None,
            clean_text: text.into(),
            source_fetched_at: Utc::now(),
        }
    }

    /// One document per batch, short ceiling.
    fn config() -> ExtractConfig {
        ExtractConfig {
            model_timeout: Duration::from_millis(100),
            max_attempts: 2,
            batch_char_budget: 0,
        }
    }

    fn extractor(model: &Arc<ScriptedModel>) -> Extractor {
        Extractor::new(model.clone(), config())
    }

    #[tokio::test]
    async fn merges_account_management_first_description_wins() {
        let model = Arc::new(
            ScriptedModel::always("{}")
                .then(Reply::Text(
                    r#"{"Account Management": {"Description": "Manage user accounts", "Submodules": {"Login": "Sign in", "Profile": "Edit details"}}}"#.into(),
                ))
                .then(Reply::Text(
                    r#"{"Account Management": {"Description": "Accounts and roles", "Submodules": {"Profile": "Change avatar", "Roles": "Assign permissions"}}}"#.into(),
                )),
        );
        let report = extractor(&model)
            .extract(&[doc("https://e.com/a", "a"), doc("https://e.com/b", "b")])
            .await
            .unwrap();

        let module = report.result.get("Account Management").unwrap();
        assert_eq!(module.description, "Manage user accounts");
        let subs: Vec<_> = module.submodules.keys().map(String::as_str).collect();
        assert_eq!(subs, vec!["Login", "Profile", "Roles"]);
        assert_eq!(module.submodules["Profile"], "Edit details");
        assert_eq!(report.succeeded, 2);
    }

    #[tokio::test]
    async fn empty_object_is_a_successful_empty_result() {
        let model = Arc::new(ScriptedModel::always("{}"));
        let report = extractor(&model)
            .extract(&[doc("https://e.com/a", "a"), doc("https://e.com/b", "b")])
            .await
            .unwrap();
        assert!(report.result.is_empty());
        assert_eq!(report.succeeded, 2);
        assert!(report.failures.is_empty());
    }

    #[tokio::test]
    async fn all_timeouts_are_a_model_failure() {
        let model = Arc::new(ScriptedModel::hanging());
        let err = extractor(&model)
            .extract(&[doc("https://e.com/a", "a"), doc("https://e.com/b", "b")])
            .await
            .unwrap_err();
        assert!(matches!(err, DocModulesError::ModelUnavailable(ref m) if m.contains("all 2 model calls failed")), "{err}");
        // Timeouts are retried.
        assert_eq!(model.call_count(), 4);
    }

    #[tokio::test]
    async fn timeout_on_one_document_keeps_the_others() {
        let model = Arc::new(
            ScriptedModel::always(r#"{"Reporting": {"Description": "Dashboards", "Submodules": {"Exports": "CSV download"}}}"#)
                .then(Reply::Hang)
                .then(Reply::Hang),
        );
        let report = extractor(&model)
            .extract(&[doc("https://e.com/slow", "a"), doc("https://e.com/fast", "b")])
            .await
            .unwrap();

        assert_eq!(report.model_failures, 1);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failures[0].urls, vec!["https://e.com/slow".to_string()]);
        assert_eq!(report.result.get("Reporting").unwrap().submodules["Exports"], "CSV download");
    }

    #[tokio::test]
    async fn unavailable_model_is_not_retried() {
        let model = Arc::new(ScriptedModel::with_fallback(Reply::Unavailable));
        let err = extractor(&model)
            .extract(&[doc("https://e.com/a", "a")])
            .await
            .unwrap_err();
        assert!(err.is_model_failure());
        assert_eq!(model.call_count(), 1);
    }

    #[tokio::test]
    async fn malformed_response_does_not_abort_the_run() {
        let model = Arc::new(
            ScriptedModel::always(r#"{"Billing": {"Description": "Invoices", "Submodules": {}}}"#)
                .then(Reply::Text("I could not find any modules.".into()))
                .then(Reply::Text("Still nothing, sorry.".into())),
        );
        let report = extractor(&model)
            .extract(&[doc("https://e.com/a", "a"), doc("https://e.com/b", "b")])
            .await
            .unwrap();

        assert_eq!(report.parse_failures, 1);
        assert_eq!(report.failures[0].urls, vec!["https://e.com/a".to_string()]);
        assert_eq!(report.result.get("Billing").unwrap().description, "Invoices");
    }

    #[tokio::test]
    async fn retry_recovers_from_a_bad_first_answer() {
        let model = Arc::new(
            ScriptedModel::always(r#"{"Search": {}}"#).then(Reply::Error("overloaded".into())),
        );
        let report = extractor(&model).extract(&[doc("https://e.com/a", "a")]).await.unwrap();
        assert_eq!(model.call_count(), 2);
        assert!(report.result.get("Search").is_some());
        assert!(report.failures.is_empty());
    }

    #[tokio::test]
    async fn repaired_and_flattened_output_is_counted() {
        let model = Arc::new(ScriptedModel::always(
            "Here you go: {'Reports': {'Description': 'Charts', 'Submodules': {'Export': {'Description': 'CSV'}}}} Enjoy!",
        ));
        let report = extractor(&model).extract(&[doc("https://e.com/a", "a")]).await.unwrap();
        assert_eq!(report.repaired, 1);
        assert_eq!(report.flattened, 1);
        assert_eq!(report.result.get("Reports").unwrap().submodules["Export"], "CSV");
    }

    #[tokio::test]
    async fn every_parse_failure_is_no_results() {
        let model = Arc::new(ScriptedModel::always("no json here"));
        let err = extractor(&model)
            .extract(&[doc("https://e.com/a", "a")])
            .await
            .unwrap_err();
        assert!(matches!(err, DocModulesError::NoResults(_)), "{err}");
    }

    #[tokio::test]
    async fn empty_input_is_no_results() {
        let model = Arc::new(ScriptedModel::always("{}"));
        let err = extractor(&model).extract(&[]).await.unwrap_err();
        assert!(matches!(err, DocModulesError::NoResults(_)));
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn prompts_follow_document_order() {
        let model = Arc::new(ScriptedModel::always("{}"));
        extractor(&model)
            .extract(&[doc("https://e.com/first", "a"), doc("https://e.com/second", "b")])
            .await
            .unwrap();
        let prompts = model.prompts();
        assert!(prompts[0].contains("URL: https://e.com/first"));
        assert!(prompts[1].contains("URL: https://e.com/second"));
    }
}
