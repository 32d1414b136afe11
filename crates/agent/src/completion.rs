use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use conduit_core::config::CompletionConfig;
use conduit_core::domain::agent::AgentRecord;

const KEY_PATHS: [&str; 3] =
    ["settings.secrets.OPENAI_API_KEY", "settings.OPENAI_API_KEY", "settings.apiKey"];
const MODEL_PATHS: [&str; 2] = ["settings.model", "model"];

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("no completion API key configured for agent or process")]
    MissingCredential,
    #[error("completion request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("completion provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("completion provider returned no choices")]
    EmptyResponse,
}

#[derive(Clone, Debug)]
pub struct CompletionRequest {
    pub api_key: SecretString,
    pub model: String,
    pub system: String,
    pub user: String,
}

#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionError>;
}

/// Process-wide fallback credentials used when an agent carries none.
#[derive(Clone, Debug)]
pub struct CompletionDefaults {
    pub api_key: Option<SecretString>,
    pub model: String,
}

impl CompletionDefaults {
    pub fn from_config(config: &CompletionConfig) -> Self {
        Self { api_key: config.api_key.clone(), model: config.model.clone() }
    }

    /// Builds the request for one agent, preferring its own key and model.
    pub fn request_for(
        &self,
        agent: Option<&AgentRecord>,
        agent_name: &str,
        text: &str,
    ) -> Result<CompletionRequest, CompletionError> {
        let api_key = agent
            .and_then(|record| KEY_PATHS.iter().find_map(|path| record.metadata_str(path)))
            .map(|key| SecretString::from(key.to_string()))
            .or_else(|| self.api_key.clone())
            .ok_or(CompletionError::MissingCredential)?;
        let model = agent
            .and_then(|record| MODEL_PATHS.iter().find_map(|path| record.metadata_str(path)))
            .map(str::to_string)
            .unwrap_or_else(|| self.model.clone());
        let system = agent
            .map(|record| record.system_prompt.trim())
            .filter(|prompt| !prompt.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("You are {agent_name}, a helpful assistant."));

        Ok(CompletionRequest { api_key, model, system, user: text.to_string() })
    }
}

/// Chat-completions client for OpenAI-compatible endpoints.
#[derive(Clone, Debug)]
pub struct OpenAiCompletionClient {
    endpoint: String,
    temperature: f32,
    max_tokens: u32,
    client: Client,
}

impl OpenAiCompletionClient {
    pub fn new(
        base_url: &str,
        temperature: f32,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<Self, CompletionError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            temperature,
            max_tokens,
            client,
        })
    }

    pub fn from_config(config: &CompletionConfig) -> Result<Self, CompletionError> {
        Self::new(
            &config.base_url,
            config.temperature,
            config.max_tokens,
            Duration::from_secs(config.timeout_secs),
        )
    }
}

#[async_trait]
impl CompletionClient for OpenAiCompletionClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionError> {
        let body = ChatRequest {
            model: &request.model,
            messages: vec![
                ChatMessage { role: "system", content: &request.system },
                ChatMessage { role: "user", content: &request.user },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(request.api_key.expose_secret())
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::Status {
                status: status.as_u16(),
                body: crate::channel::truncate_body(body),
            });
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(CompletionError::EmptyResponse)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
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

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use secrecy::{ExposeSecret, SecretString};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use conduit_core::domain::agent::{AgentId, AgentRecord};

    use super::{
        CompletionClient, CompletionDefaults, CompletionError, CompletionRequest,
        OpenAiCompletionClient,
    };

    fn record(metadata: serde_json::Value, system_prompt: &str) -> AgentRecord {
        let now = Utc::now();
        AgentRecord {
            id: AgentId("a-1".to_string()),
            name: "Bot".to_string(),
            description: String::new(),
            system_prompt: system_prompt.to_string(),
            metadata,
            created_at: now,
            updated_at: now,
        }
    }

    fn defaults(key: Option<&str>) -> CompletionDefaults {
        CompletionDefaults {
            api_key: key.map(|key| SecretString::from(key.to_string())),
            model: "gpt-4o-mini".to_string(),
        }
    }

    #[test]
    fn agent_credentials_win_over_process_defaults() {
        let agent = record(
            json!({ "settings": { "secrets": { "OPENAI_API_KEY": "sk-agent" }, "model": "gpt-4o" } }),
            "You trade.",
        );

        let request = defaults(Some("sk-default"))
            .request_for(Some(&agent), "Bot", "hello")
            .expect("request builds");

        assert_eq!(request.api_key.expose_secret(), "sk-agent");
        assert_eq!(request.model, "gpt-4o");
        assert_eq!(request.system, "You trade.");
        assert_eq!(request.user, "hello");
    }

    #[test]
    fn process_defaults_fill_missing_agent_settings() {
        let agent = record(json!({ "settings": {} }), "");

        let request =
            defaults(Some("sk-default")).request_for(Some(&agent), "Bot", "hi").expect("request builds");

        assert_eq!(request.api_key.expose_secret(), "sk-default");
        assert_eq!(request.model, "gpt-4o-mini");
        assert_eq!(request.system, "You are Bot, a helpful assistant.");
    }

    #[test]
    fn missing_key_everywhere_is_reported() {
        let result = defaults(None).request_for(None, "Bot", "hi");

        assert!(matches!(result, Err(CompletionError::MissingCredential)));
    }

    #[tokio::test]
    async fn complete_sends_bearer_and_returns_first_choice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "gpt-4o-mini",
                "messages": [
                    { "role": "system", "content": "Be brief." },
                    { "role": "user", "content": "hello" }
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "message": { "role": "assistant", "content": "hi!" } }]
            })))
            .expect(1)
            .mount(&server)
            .await;
        let client = OpenAiCompletionClient::new(&server.uri(), 0.7, 256, Duration::from_secs(5))
            .expect("client builds");

        let reply = client
            .complete(CompletionRequest {
                api_key: SecretString::from("sk-test".to_string()),
                model: "gpt-4o-mini".to_string(),
                system: "Be brief.".to_string(),
                user: "hello".to_string(),
            })
            .await
            .expect("completion succeeds");

        assert_eq!(reply, "hi!");
    }

    #[tokio::test]
    async fn empty_choices_and_error_status_are_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/broken/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;
        let request = CompletionRequest {
            api_key: SecretString::from("sk-test".to_string()),
            model: "gpt-4o-mini".to_string(),
            system: "s".to_string(),
            user: "u".to_string(),
        };

        let empty = OpenAiCompletionClient::new(
            &format!("{}/v1/", server.uri()),
            0.7,
            256,
            Duration::from_secs(5),
        )
        .expect("client builds")
        .complete(request.clone())
        .await;
        let unauthorized = OpenAiCompletionClient::new(
            &format!("{}/broken", server.uri()),
            0.7,
            256,
            Duration::from_secs(5),
        )
        .expect("client builds")
        .complete(request)
        .await;

        assert!(matches!(empty, Err(CompletionError::EmptyResponse)));
        assert!(matches!(unauthorized, Err(CompletionError::Status { status: 401, .. })));
    }
}
