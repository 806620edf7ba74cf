use crate::config::LlmConfig;
use crate::llm::{LlmError, TextGenerator};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;

/// OpenAI-compatible chat-completions backend. Buffered only; the service
/// layer falls back to treating the full response as a single fragment.
pub struct RemoteProvider {
    api_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    top_p: f32,
    client: OnceLock<reqwest::Client>,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f32,
    top_p: f32,
    max_tokens: usize,
}

#[derive(Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
}

impl RemoteProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_url = config.api_url.clone().ok_or_else(|| {
            LlmError::ConfigError("API URL is required for the remote backend".to_string())
        })?;

        let api_key = config.api_key.clone().ok_or_else(|| {
            LlmError::ConfigError("API key is required for the remote backend".to_string())
        })?;

        Ok(Self {
            api_url,
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            top_p: config.top_p,
            client: OnceLock::new(),
        })
    }

    fn client(&self) -> Result<&reqwest::Client, LlmError> {
        self.client.get().ok_or_else(|| {
            LlmError::ConfigError("remote backend used before initialization".to_string())
        })
    }
}

#[async_trait]
impl TextGenerator for RemoteProvider {
    async fn initialize(&self) -> Result<(), LlmError> {
        if self.client.get().is_some() {
            return Ok(());
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| LlmError::ConnectionError(e.to_string()))?;

        let _ = self.client.set(client);
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.client.get().is_some()
    }

    async fn generate(&self, prompt: &str, max_tokens: usize) -> Result<String, LlmError> {
        if !self.is_initialized() {
            self.initialize().await?;
        }

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            temperature: self.temperature,
            top_p: self.top_p,
            max_tokens,
        };

        let response = self
            .client()?
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::ConnectionError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(LlmError::ResponseError(format!(
                "API responded with status code: {}",
                response.status()
            )));
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::ResponseError(e.to_string()))?;

        let choice = chat_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::ResponseError("No choices in response".to_string()))?;

        Ok(choice.message.content)
    }
}
