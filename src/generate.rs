//! Generation client for OpenAI-compatible chat-completions endpoints.
//!
//! [`generate`] renders the selected template with the retrieved context,
//! sends one (system, user) completion request and returns the trimmed
//! answer. Each call is a single attempt bounded by the configured
//! timeout. Failures come back as a typed [`GenerationError`] so the API
//! layer can tell a timeout from a rate limit from bad credentials.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::LlmConfig;
use crate::models::{Chunk, ConversationTurn};
use crate::prompt::{build_prompt, format_context, format_history, TemplateId};

const MAX_ERROR_BODY_CHARS: usize = 500;

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("LLM API key missing: set the {0} environment variable")]
    MissingApiKey(String),
    #[error("LLM request timed out after {0}s")]
    Timeout(u64),
    #[error("LLM rate limit exceeded: {0}")]
    RateLimited(String),
    #[error("LLM rejected the API key (HTTP {status})")]
    Unauthorized { status: u16 },
    #[error("LLM returned HTTP {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("LLM request failed: {0}")]
    Transport(String),
    #[error("invalid LLM response: {0}")]
    InvalidResponse(String),
    #[error("LLM returned an empty answer")]
    EmptyResponse,
}

impl GenerationError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, GenerationError::Timeout(_))
    }
}

/// A single completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: usize,
}

/// Trait implemented by concrete LLM backends.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn model_name(&self) -> &str;
    async fn complete(&self, request: &CompletionRequest) -> Result<String, GenerationError>;
}

/// Sampling and history settings applied to every request.
#[derive(Debug, Clone, Copy)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: usize,
    pub history_turns: usize,
}

impl From<&LlmConfig> for GenerationParams {
    fn from(config: &LlmConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            history_turns: config.history_turns,
        }
    }
}

/// Render `template` over `chunks` and ask the provider for an answer.
pub async fn generate(
    provider: &dyn LlmProvider,
    params: GenerationParams,
    template: TemplateId,
    chunks: &[Chunk],
    query: &str,
    history: &[ConversationTurn],
) -> Result<String, GenerationError> {
    let context = format_context(chunks);
    let history = format_history(history, params.history_turns);
    let prompt = build_prompt(template, &context, query, &history);

    let request = CompletionRequest {
        system: prompt.system,
        user: prompt.user,
        temperature: params.temperature,
        max_tokens: params.max_tokens,
    };

    let answer = provider.complete(&request).await?;
    let answer = answer.trim();
    if answer.is_empty() {
        return Err(GenerationError::EmptyResponse);
    }
    Ok(answer.to_string())
}

/// Provider speaking `POST {base_url}/chat/completions` with bearer auth.
pub struct ChatCompletionsProvider {
    base_url: String,
    model: String,
    api_key: String,
    timeout_secs: u64,
    client: reqwest::Client,
}

impl ChatCompletionsProvider {
    /// Build from config, reading the key from `llm.api_key_env`.
    pub fn from_config(config: &LlmConfig) -> Result<Self, GenerationError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| GenerationError::MissingApiKey(config.api_key_env.clone()))?;
        Self::new(
            &config.base_url,
            &config.model,
            api_key,
            config.timeout_secs,
        )
    }

    pub fn new(
        base_url: &str,
        model: &str,
        api_key: String,
        timeout_secs: u64,
    ) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| GenerationError::Transport(e.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
            timeout_secs,
            client,
        })
    }

    fn map_transport(&self, err: reqwest::Error) -> GenerationError {
        if err.is_timeout() {
            GenerationError::Timeout(self.timeout_secs)
        } else {
            GenerationError::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl LlmProvider for ChatCompletionsProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, GenerationError> {
        let body = ChatRequest {
            model: &self.model,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
        };

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.trim())
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            let text: String = text.chars().take(MAX_ERROR_BODY_CHARS).collect();
            tracing::warn!(status = status.as_u16(), "LLM request rejected");
            return Err(match status.as_u16() {
                429 => GenerationError::RateLimited(text),
                401 | 403 => GenerationError::Unauthorized {
                    status: status.as_u16(),
                },
                code => GenerationError::Upstream { status: code, body: text },
            });
        }

        let parsed: ChatResponse = resp.json().await.map_err(|e| {
            if e.is_timeout() {
                GenerationError::Timeout(self.timeout_secs)
            } else {
                GenerationError::InvalidResponse(e.to_string())
            }
        })?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| GenerationError::InvalidResponse("no choices[0].message.content".into()))
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: usize,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RiskLevel;
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::IntoResponse;
    use axum::{routing::post, Json, Router};

    async fn spawn(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn completion(content: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [{"index": 0, "message": {"role": "assistant", "content": content}}]
        })
    }

    fn request() -> CompletionRequest {
        CompletionRequest {
            system: "sys".into(),
            user: "user".into(),
            temperature: 0.1,
            max_tokens: 64,
        }
    }

    async fn provider_for(router: Router, timeout_secs: u64) -> ChatCompletionsProvider {
        let url = spawn(router).await;
        ChatCompletionsProvider::new(&url, "test-model", "sk-test".into(), timeout_secs).unwrap()
    }

    fn params() -> GenerationParams {
        GenerationParams {
            temperature: 0.1,
            max_tokens: 64,
            history_turns: 4,
        }
    }

    #[tokio::test]
    async fn test_success_sends_auth_and_messages() {
        let router = Router::new().route(
            "/chat/completions",
            post(|headers: HeaderMap, Json(body): Json<serde_json::Value>| async move {
                let auth = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                let reply = format!(
                    "{}|{}|{}|{}",
                    auth,
                    body["model"].as_str().unwrap_or_default(),
                    body["messages"][0]["role"].as_str().unwrap_or_default(),
                    body["messages"][1]["content"].as_str().unwrap_or_default()
                );
                Json(completion(&reply))
            }),
        );
        let provider = provider_for(router, 5).await;
        let out = provider.complete(&request()).await.unwrap();
        assert_eq!(out, "Bearer sk-test|test-model|system|user");
    }

    #[tokio::test]
    async fn test_rate_limit_maps_distinctly() {
        let router = Router::new().route(
            "/chat/completions",
            post(|| async { (StatusCode::TOO_MANY_REQUESTS, "slow down").into_response() }),
        );
        let provider = provider_for(router, 5).await;
        let err = provider.complete(&request()).await.unwrap_err();
        assert!(matches!(err, GenerationError::RateLimited(ref body) if body == "slow down"));
    }

    #[tokio::test]
    async fn test_unauthorized_maps_distinctly() {
        let router = Router::new().route(
            "/chat/completions",
            post(|| async { StatusCode::UNAUTHORIZED.into_response() }),
        );
        let provider = provider_for(router, 5).await;
        let err = provider.complete(&request()).await.unwrap_err();
        assert!(matches!(err, GenerationError::Unauthorized { status: 401 }));
    }

    #[tokio::test]
    async fn test_server_error_is_upstream() {
        let router = Router::new().route(
            "/chat/completions",
            post(|| async { (StatusCode::BAD_GATEWAY, "boom").into_response() }),
        );
        let provider = provider_for(router, 5).await;
        let err = provider.complete(&request()).await.unwrap_err();
        assert!(matches!(err, GenerationError::Upstream { status: 502, .. }));
    }

    #[tokio::test]
    async fn test_timeout_maps_to_timeout() {
        let router = Router::new().route(
            "/chat/completions",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Json(completion("too late"))
            }),
        );
        let provider = provider_for(router, 1).await;
        let err = provider.complete(&request()).await.unwrap_err();
        assert!(err.is_timeout(), "{:?}", err);
    }

    #[tokio::test]
    async fn test_missing_choices_is_invalid() {
        let router = Router::new().route(
            "/chat/completions",
            post(|| async { Json(serde_json::json!({"choices": []})) }),
        );
        let provider = provider_for(router, 5).await;
        let err = provider.complete(&request()).await.unwrap_err();
        assert!(matches!(err, GenerationError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport() {
        let provider =
            ChatCompletionsProvider::new("http://127.0.0.1:1", "m", "k".into(), 2).unwrap();
        let err = provider.complete(&request()).await.unwrap_err();
        assert!(matches!(err, GenerationError::Transport(_)), "{:?}", err);
    }

    #[test]
    fn test_missing_api_key() {
        let config = LlmConfig {
            api_key_env: "CLINRAG_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            ..Default::default()
        };
        let err = ChatCompletionsProvider::from_config(&config).err().unwrap();
        assert!(matches!(err, GenerationError::MissingApiKey(_)));
    }

    #[tokio::test]
    async fn test_generate_renders_context_and_trims() {
        // Echo the system prompt so the rendered context is visible.
        let router = Router::new().route(
            "/chat/completions",
            post(|Json(body): Json<serde_json::Value>| async move {
                let system = body["messages"][0]["content"].as_str().unwrap_or_default();
                Json(completion(&format!("  {}  ", system)))
            }),
        );
        let provider = provider_for(router, 5).await;
        let chunk = Chunk {
            id: "P001#1:0".into(),
            note_id: "P001#1".into(),
            patient_id: "P001".into(),
            risk_level: RiskLevel::High,
            chunk_index: 0,
            text: "Troponin elevated.".into(),
            hash: String::new(),
        };
        let out = generate(
            &provider,
            params(),
            TemplateId::GeneralQa,
            &[chunk],
            "What is wrong with P001?",
            &[],
        )
        .await
        .unwrap();
        assert!(out.starts_with("You are ClinicalBot"));
        assert!(out.contains("[Source: P001 | Risk: HIGH]\nTroponin elevated."));
        assert!(!out.ends_with(' '));
    }

    #[tokio::test]
    async fn test_generate_blank_answer_is_error() {
        let router = Router::new().route(
            "/chat/completions",
            post(|| async { Json(completion("   ")) }),
        );
        let provider = provider_for(router, 5).await;
        let err = generate(&provider, params(), TemplateId::GeneralQa, &[], "q?", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::EmptyResponse));
    }
}
