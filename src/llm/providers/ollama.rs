use crate::config::LlmConfig;
use crate::llm::{FragmentReceiver, LlmError, TextGenerator, FRAGMENT_CHANNEL_CAPACITY};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Local Ollama backend. Supports incremental generation: the HTTP response
/// is NDJSON, one chunk per line, relayed into a bounded fragment channel by
/// a background task.
pub struct OllamaProvider {
    api_url: String,
    model: String,
    temperature: f32,
    top_p: f32,
    client: OnceLock<reqwest::Client>,
}

#[derive(Serialize, Debug)]
struct OllamaRequest {
    model: String,
    prompt: String,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize, Debug)]
struct OllamaOptions {
    temperature: f32,
    top_p: f32,
    num_predict: i64,
}

#[derive(Deserialize, Debug)]
struct OllamaChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
}

impl OllamaProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_url = config
            .api_url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434/api/generate".to_string());

        Ok(Self {
            api_url,
            model: config.model.clone(),
            temperature: config.temperature,
            top_p: config.top_p,
            client: OnceLock::new(),
        })
    }

    fn client(&self) -> Result<&reqwest::Client, LlmError> {
        self.client.get().ok_or_else(|| {
            LlmError::ConfigError("ollama backend used before initialization".to_string())
        })
    }

    fn request(&self, prompt: &str, max_tokens: usize, stream: bool) -> OllamaRequest {
        OllamaRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            stream,
            options: OllamaOptions {
                temperature: self.temperature,
                top_p: self.top_p,
                num_predict: max_tokens as i64,
            },
        }
    }

    async fn send(&self, request: &OllamaRequest) -> Result<reqwest::Response, LlmError> {
        let response = self
            .client()?
            .post(&self.api_url)
            .json(request)
            .send()
            .await
            .map_err(|e| LlmError::ConnectionError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = match response.text().await {
                Ok(body) => format!(" - Response body: {}", body),
                Err(_) => String::new(),
            };

            error!("Ollama API responded with status code: {}{}", status, error_body);
            return Err(LlmError::ResponseError(format!(
                "Ollama API responded with status code: {}{}",
                status, error_body
            )));
        }

        Ok(response)
    }
}

#[async_trait]
impl TextGenerator for OllamaProvider {
    async fn initialize(&self) -> Result<(), LlmError> {
        if self.client.get().is_some() {
            return Ok(());
        }

        let client = reqwest::Client::new();
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

        let request = self.request(prompt, max_tokens, false);
        debug!("Sending request to Ollama with model: {}", self.model);

        let response = self.send(&request).await?;

        let response_text = response.text().await.map_err(|e| {
            LlmError::ResponseError(format!("Failed to read response body: {}", e))
        })?;

        let chunk: OllamaChunk = serde_json::from_str(&response_text).map_err(|e| {
            error!(
                "Failed to parse Ollama response: {} - Response was: {}",
                e, response_text
            );
            LlmError::ResponseError(format!(
                "Failed to parse Ollama response: {} - Response was: {}",
                e, response_text
            ))
        })?;

        Ok(chunk.response)
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        max_tokens: usize,
    ) -> Result<FragmentReceiver, LlmError> {
        if !self.is_initialized() {
            self.initialize().await?;
        }

        let request = self.request(prompt, max_tokens, true);
        debug!("Streaming from Ollama with model: {}", self.model);

        let response = self.send(&request).await?;
        let (tx, rx) = mpsc::channel(FRAGMENT_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk) = stream.next().await {
                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx.send(Err(LlmError::ConnectionError(e.to_string()))).await;
                        return;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&bytes));

                // One JSON chunk per line; a network read may split or batch lines.
                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim().to_string();
                    buffer.drain(..=newline);

                    if line.is_empty() {
                        continue;
                    }

                    match serde_json::from_str::<OllamaChunk>(&line) {
                        Ok(chunk) => {
                            if !chunk.response.is_empty()
                                && tx.send(Ok(chunk.response)).await.is_err()
                            {
                                return;
                            }
                            if chunk.done {
                                return;
                            }
                        }
                        Err(e) => {
                            let _ = tx
                                .send(Err(LlmError::ResponseError(format!(
                                    "Failed to parse streaming chunk: {} - line was: {}",
                                    e, line
                                ))))
                                .await;
                            return;
                        }
                    }
                }
            }
        });

        Ok(rx)
    }
}
