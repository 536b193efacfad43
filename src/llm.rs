//! Generative model boundary.
//!
//! [`GenerativeModel`] is the only thing the answer composer knows about
//! text generation: `prompt → text`. Two backends are provided:
//!
//! | `llm.provider` | Backend | Endpoint |
//! |----------------|---------|----------|
//! | `openai` | [`OpenAiChatModel`] | `POST {endpoint}/v1/chat/completions` |
//! | `ollama` | [`OllamaModel`] | `POST {endpoint}/api/generate` |
//! | `none` | no model; answers use the structured template | |
//!
//! Models are treated as unreliable. Every error is an [`LlmError`] and
//! the caller falls back to a template answer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::config::LlmConfig;
use crate::http::{post_json, with_retry, HttpError, Retryable};

/// Built-in answer prompt. `{context}`, `{question}` and `{result_count}`
/// are substituted.
pub const DEFAULT_QA_PROMPT: &str = r#"你是資安威脅情報分析助理，負責回答關於網路風險與 CREM (Cyber Risk Exposure Management) 的問題。

請只根據以下 {result_count} 筆檢索結果回答，不要編造資料。

=== 檢索結果 ===
{context}

=== 使用者問題 ===
{question}

回答要求：
1. 先給一段簡短摘要，再補充細節。
2. 只有在檢索結果包含具體數字、排名或表格資料時才整理數據重點。
3. 正確使用 CREM、CRI 等專有名詞。
4. 最後列出主要資料來源的檔名。

請開始回答："#;

/// Fill the prompt placeholders.
pub fn render_prompt(template: &str, context: &str, question: &str, result_count: usize) -> String {
    template
        .replace("{context}", context)
        .replace("{question}", question)
        .replace("{result_count}", &result_count.to_string())
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM configuration error: {0}")]
    Config(String),

    #[error("LLM connection error: {0}")]
    Connection(String),

    #[error("LLM API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("LLM response parse error: {0}")]
    Parse(String),
}

impl From<HttpError> for LlmError {
    fn from(e: HttpError) -> Self {
        match e {
            HttpError::Connection { message, .. } => LlmError::Connection(message),
            HttpError::Status { status, body } => LlmError::Api { status, body },
            HttpError::Decode(message) => LlmError::Parse(message),
        }
    }
}

impl Retryable for LlmError {
    fn is_retryable(&self) -> bool {
        match self {
            LlmError::Connection(_) => true,
            LlmError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// A `prompt → text` function.
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    fn model_name(&self) -> &str;
    async fn generate(&self, prompt: &str) -> Result<String, LlmError>;
}

/// Shared sampling and transport settings.
#[derive(Debug, Clone)]
struct Settings {
    model: String,
    temperature: f32,
    max_tokens: u32,
    max_retries: u32,
}

impl Settings {
    fn from_config(config: &LlmConfig, default_model: &str) -> Self {
        Self {
            model: config
                .model
                .clone()
                .unwrap_or_else(|| default_model.to_string()),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
        }
    }
}

fn build_client(timeout_secs: u64) -> Result<reqwest::Client, LlmError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| LlmError::Config(e.to_string()))
}

// ============ OpenAI-compatible chat ============

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct OpenAiChatModel {
    settings: Settings,
    url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiChatModel {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                LlmError::Config(format!("{} is not set", config.api_key_env))
            })?;
        let base = config
            .endpoint
            .clone()
            .unwrap_or_else(|| "https://api.openai.com".to_string());
        Ok(Self {
            settings: Settings::from_config(config, "gpt-4o-mini"),
            url: format!("{}/v1/chat/completions", base.trim_end_matches('/')),
            api_key,
            client: build_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl GenerativeModel for OpenAiChatModel {
    fn model_name(&self) -> &str {
        &self.settings.model
    }

    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        let body = ChatRequest {
            model: &self.settings.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        };
        let (client, url, key, body) = (&self.client, self.url.as_str(), self.api_key.as_str(), &body);
        let response: ChatResponse = with_retry(self.settings.max_retries, "openai chat", || async move {
            post_json(client, url, Some(key), body)
                .await
                .map_err(LlmError::from)
        })
        .await?;
        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|t| t.trim().to_string())
            .unwrap_or_default();
        if text.is_empty() {
            return Err(LlmError::Parse("empty completion".into()));
        }
        Ok(text)
    }
}

// ============ Ollama ============

#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
}

pub struct OllamaModel {
    settings: Settings,
    url: String,
    client: reqwest::Client,
}

impl OllamaModel {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let base = config
            .endpoint
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        Ok(Self {
            settings: Settings::from_config(config, "llama3.2"),
            url: format!("{}/api/generate", base.trim_end_matches('/')),
            client: build_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl GenerativeModel for OllamaModel {
    fn model_name(&self) -> &str {
        &self.settings.model
    }

    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        let body = OllamaRequest {
            model: &self.settings.model,
            prompt,
            stream: false,
            options: OllamaOptions {
                temperature: self.settings.temperature,
                num_predict: self.settings.max_tokens,
            },
        };
        let (client, url, body) = (&self.client, self.url.as_str(), &body);
        let response: OllamaResponse = with_retry(self.settings.max_retries, "ollama generate", || async move {
            post_json(client, url, None, body)
                .await
                .map_err(LlmError::from)
        })
        .await?;
        let text = response.response.trim().to_string();
        if text.is_empty() {
            return Err(LlmError::Parse("empty response".into()));
        }
        Ok(text)
    }
}

/// Build the configured model. `none` yields `Ok(None)`.
pub fn create_model(config: &LlmConfig) -> Result<Option<Arc<dyn GenerativeModel>>, LlmError> {
    let model: Arc<dyn GenerativeModel> = match config.provider.as_str() {
        "none" => return Ok(None),
        "openai" => Arc::new(OpenAiChatModel::new(config)?),
        "ollama" => Arc::new(OllamaModel::new(config)?),
        other => {
            return Err(LlmError::Config(format!(
                "unknown llm provider '{}'",
                other
            )))
        }
    };
    info!(
        provider = %config.provider,
        model = model.model_name(),
        temperature = config.temperature,
        max_tokens = config.max_tokens,
        "generative model configured"
    );
    Ok(Some(model))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_prompt() {
        let p = render_prompt(DEFAULT_QA_PROMPT, "[文字資料 1]", "什麼是 CRI", 3);
        assert!(p.contains("[文字資料 1]"));
        assert!(p.contains("什麼是 CRI"));
        assert!(p.contains("以下 3 筆"));
        assert!(!p.contains("{question}"));
    }

    #[test]
    fn test_none_provider_has_no_model() {
        assert!(create_model(&LlmConfig::default()).unwrap().is_none());
    }

    #[test]
    fn test_missing_api_key_is_config_error() {
        let config = LlmConfig {
            provider: "openai".into(),
            api_key_env: "IQA_TEST_KEY_THAT_IS_NEVER_SET".into(),
            ..LlmConfig::default()
        };
        assert!(matches!(create_model(&config), Err(LlmError::Config(_))));
    }

    #[test]
    fn test_ollama_model_uses_configured_name() {
        let config = LlmConfig {
            provider: "ollama".into(),
            model: Some("qwen2.5:7b".into()),
            ..LlmConfig::default()
        };
        let model = create_model(&config).unwrap().unwrap();
        assert_eq!(model.model_name(), "qwen2.5:7b");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(LlmError::Connection("refused".into()).is_retryable());
        assert!(LlmError::Api { status: 503, body: String::new() }.is_retryable());
        assert!(!LlmError::Api { status: 401, body: String::new() }.is_retryable());
        assert!(!LlmError::Parse("x".into()).is_retryable());
    }

    #[tokio::test]
    async fn test_unreachable_ollama_is_connection_error() {
        let config = LlmConfig {
            provider: "ollama".into(),
            endpoint: Some("http://127.0.0.1:9".into()),
            max_retries: 0,
            timeout_secs: 2,
            ..LlmConfig::default()
        };
        let model = OllamaModel::new(&config).unwrap();
        assert!(matches!(
            model.generate("hi").await,
            Err(LlmError::Connection(_))
        ));
    }
}
