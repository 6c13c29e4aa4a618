use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use deskroute_core::config::LlmConfig;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::llm::{LlmClient, LlmRequest};

/// `generateContent` client for the Gemini API. When a request against the
/// primary model fails it is retried once against the fallback model.
pub struct GeminiClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    fallback_model: String,
    api_key: Option<SecretString>,
    temperature: f32,
}

impl GeminiClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build Gemini HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.resolved_model().to_string(),
            fallback_model: strip_latest(&config.fallback_model).to_string(),
            api_key: config.api_key.clone(),
            temperature: config.temperature,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.base_url, model)
    }

    async fn generate(
        &self,
        model: &str,
        api_key: &SecretString,
        request: &LlmRequest,
    ) -> Result<String> {
        let body = GenerateRequest::new(request, self.temperature);
        let response = self
            .client
            .post(self.endpoint(model))
            .header("x-goog-api-key", api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .with_context(|| format!("request to model `{model}` failed"))?;

        let status = response.status();
        let text = response.text().await.context("failed to read Gemini response body")?;
        if !status.is_success() {
            bail!("model `{model}` returned HTTP {status}: {text}");
        }

        extract_text(&text)
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn complete(&self, request: LlmRequest) -> Result<String> {
        let Some(api_key) = &self.api_key else {
            bail!("no Gemini API key configured; set DESKROUTE_LLM_API_KEY or GOOGLE_API_KEY");
        };

        match self.generate(&self.model, api_key, &request).await {
            Ok(text) => Ok(text),
            Err(primary) => {
                warn!(
                    event_name = "agent.llm.fallback",
                    model = %self.model,
                    fallback_model = %self.fallback_model,
                    error = %primary,
                    "primary model failed; retrying on fallback model"
                );
                self.generate(&self.fallback_model, api_key, &request)
                    .await
                    .with_context(|| format!("primary model also failed: {primary:#}"))
            }
        }
    }
}

fn strip_latest(model: &str) -> &str {
    model.strip_suffix("-latest").unwrap_or(model)
}

fn extract_text(body: &str) -> Result<String> {
    let parsed: GenerateResponse =
        serde_json::from_str(body).context("Gemini response is not valid JSON")?;

    if let Some(error) = parsed.error {
        bail!("Gemini API error: {}", error.message);
    }

    let text: String = parsed
        .candidates
        .and_then(|candidates| candidates.into_iter().next())
        .map(|candidate| {
            candidate.content.parts.into_iter().map(|part| part.text).collect::<String>()
        })
        .ok_or_else(|| anyhow!("Gemini response carried no candidates"))?;

    if text.trim().is_empty() {
        bail!("Gemini response carried no text");
    }
    Ok(text)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction>,
    generation_config: GenerationConfig,
}

impl GenerateRequest {
    fn new(request: &LlmRequest, temperature: f32) -> Self {
        let system_instruction = (!request.system.trim().is_empty()).then(|| SystemInstruction {
            parts: vec![Part { text: request.system.clone() }],
        });
        Self {
            contents: vec![Content {
                role: "user".to_string(),
                parts: vec![Part { text: request.user.clone() }],
            }],
            system_instruction,
            generation_config: GenerationConfig { temperature },
        }
    }
}

#[derive(Debug, Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    candidates: Option<Vec<Candidate>>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

#[cfg(test)]
mod tests {
    use deskroute_core::config::LlmConfig;
    use serde_json::json;

    use super::{extract_text, GeminiClient, GenerateRequest};
    use crate::llm::{LlmClient, LlmRequest};

    #[test]
    fn request_body_uses_camel_case_and_optional_system_instruction() {
        let request = LlmRequest { system: "be brief".to_string(), user: "hi".to_string() };
        let body = serde_json::to_value(GenerateRequest::new(&request, 0.1)).expect("serialize");
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be brief");
        assert_eq!(body["contents"][0]["role"], "user");
        assert!(body["generationConfig"]["temperature"].is_number());

        let bare = LlmRequest { system: String::new(), user: "hi".to_string() };
        let body = serde_json::to_value(GenerateRequest::new(&bare, 0.1)).expect("serialize");
        assert!(body.get("systemInstruction").is_none());
    }

    #[test]
    fn candidate_parts_are_concatenated() {
        let body = json!({
            "candidates": [{"content": {"parts": [{"text": "{\"message\":"}, {"text": " \"hi\"}"}]}}]
        });
        let text = extract_text(&body.to_string()).expect("text");
        assert_eq!(text, "{\"message\": \"hi\"}");
    }

    #[test]
    fn api_errors_and_empty_candidates_are_reported() {
        let error = json!({"error": {"message": "quota exceeded", "code": 429}});
        let message = extract_text(&error.to_string()).expect_err("api error").to_string();
        assert!(message.contains("quota exceeded"));

        assert!(extract_text(&json!({"candidates": []}).to_string()).is_err());
        assert!(extract_text("not json").is_err());
    }

    #[test]
    fn latest_alias_is_stripped_from_both_models() {
        let config = LlmConfig {
            model: "gemini-2.5-pro-latest".to_string(),
            fallback_model: "gemini-2.5-flash-latest".to_string(),
            ..LlmConfig::default()
        };
        let client = GeminiClient::from_config(&config).expect("client");
        assert_eq!(client.model(), "gemini-2.5-pro");
        assert_eq!(client.fallback_model, "gemini-2.5-flash");
        assert_eq!(
            client.endpoint(client.model()),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-pro:generateContent"
        );
    }

    #[tokio::test]
    async fn missing_api_key_fails_before_any_request() {
        let client = GeminiClient::from_config(&LlmConfig::default()).expect("client");
        let error = client
            .complete(LlmRequest { system: String::new(), user: "hi".to_string() })
            .await
            .expect_err("no key");
        assert!(error.to_string().contains("API key"));
    }
}
