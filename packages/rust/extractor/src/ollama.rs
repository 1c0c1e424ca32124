//! Client for a local Ollama server.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use docmodules_shared::{DocModulesError, Result};

use crate::model::LanguageModel;

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Deserialize)]
struct TagEntry {
    name: String,
}

/// Non-streaming `/api/generate` client.
pub struct OllamaClient {
    endpoint: String,
    model: String,
    temperature: f32,
    timeout: Duration,
    client: Client,
}

impl OllamaClient {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DocModulesError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
            temperature: 0.0,
            timeout,
            client,
        })
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Check that the server answers and has the model installed.
    ///
    /// Both failures are configuration errors: nothing can be extracted
    /// without a model.
    pub async fn ensure_available(&self) -> Result<()> {
        let url = format!("{}/api/tags", self.endpoint);
        let response = self.client.get(&url).send().await.map_err(|e| {
            DocModulesError::config(format!(
                "inference server at {} is not reachable ({e}); is `ollama serve` running?",
                self.endpoint
            ))
        })?;

        if !response.status().is_success() {
            return Err(DocModulesError::config(format!(
                "inference server at {} answered HTTP {}",
                self.endpoint,
                response.status()
            )));
        }

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| DocModulesError::config(format!("unexpected /api/tags response: {e}")))?;

        let tagged = format!("{}:latest", self.model);
        if tags.models.iter().any(|m| m.name == self.model || m.name == tagged) {
            info!(model = %self.model, "model available");
            Ok(())
        } else {
            Err(DocModulesError::config(format!(
                "model `{}` is not installed; run `ollama pull {}`",
                self.model, self.model
            )))
        }
    }
}

#[async_trait]
impl LanguageModel for OllamaClient {
    async fn infer(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/api/generate", self.endpoint);
        let body = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: GenerateOptions {
                temperature: self.temperature,
            },
        };

        debug!(model = %self.model, prompt_chars = prompt.len(), "model request");

        let response = self.client.post(&url).json(&body).send().await.map_err(|e| {
            if e.is_timeout() {
                DocModulesError::ModelTimeout {
                    model: self.model.clone(),
                    secs: self.timeout.as_secs(),
                }
            } else if e.is_connect() {
                DocModulesError::ModelUnavailable(format!("{}: {e}", self.endpoint))
            } else {
                DocModulesError::Model(e.to_string())
            }
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(DocModulesError::ModelUnavailable(format!(
                "model `{}` not found; run `ollama pull {}`",
                self.model, self.model
            )));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(DocModulesError::Model(format!("HTTP {status}: {}", text.trim())));
        }

        let parsed: GenerateResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                DocModulesError::ModelTimeout {
                    model: self.model.clone(),
                    secs: self.timeout.as_secs(),
                }
            } else {
                DocModulesError::Model(format!("invalid response body: {e}"))
            }
        })?;

        debug!(model = %self.model, response_chars = parsed.response.len(), "model response");
        Ok(parsed.response)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> OllamaClient {
        OllamaClient::new(server.uri(), "llama3.1", Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn infer_returns_response_field() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(json!({"model": "llama3.1", "stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "llama3.1",
                "response": "{\"Search\": {}}",
                "done": true
            })))
            .expect(1)
            .mount(&server)
            .await;

        let out = client(&server).infer("prompt").await.unwrap();
        assert_eq!(out, "{\"Search\": {}}");
    }

    #[tokio::test]
    async fn missing_model_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(404).set_body_string("model not found"))
            .mount(&server)
            .await;

        let err = client(&server).infer("prompt").await.unwrap_err();
        assert!(matches!(err, DocModulesError::ModelUnavailable(_)), "{err}");
    }

    #[tokio::test]
    async fn server_error_is_model_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = client(&server).infer("prompt").await.unwrap_err();
        assert!(matches!(err, DocModulesError::Model(ref m) if m.contains("boom")), "{err}");
    }

    #[tokio::test]
    async fn slow_server_is_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"response": "{}"}))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let client = OllamaClient::new(server.uri(), "llama3.1", Duration::from_millis(200)).unwrap();
        let err = client.infer("prompt").await.unwrap_err();
        assert!(matches!(err, DocModulesError::ModelTimeout { .. }), "{err}");
        assert!(err.is_model_failure());
    }

    #[tokio::test]
    async fn unreachable_server_is_unavailable() {
        let client = OllamaClient::new("http://127.0.0.1:9", "llama3.1", Duration::from_secs(2)).unwrap();
        let err = client.infer("prompt").await.unwrap_err();
        assert!(err.is_model_failure(), "{err}");
    }

    #[tokio::test]
    async fn ensure_available_matches_latest_tag() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "models": [{"name": "llama3.1:latest"}, {"name": "mistral:7b"}]
            })))
            .mount(&server)
            .await;

        client(&server).ensure_available().await.unwrap();

        let other = OllamaClient::new(server.uri(), "qwen2", Duration::from_secs(5)).unwrap();
        let err = other.ensure_available().await.unwrap_err();
        assert!(err.to_string().contains("ollama pull qwen2"), "{err}");
    }
}
