pub mod providers;

use crate::config::LlmConfig;
use async_trait::async_trait;
use std::error::Error;
use std::fmt;
use tokio::sync::mpsc;

#[derive(Debug)]
pub enum LlmError {
    ConnectionError(String),
    ResponseError(String),
    ConfigError(String),
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmError::ConnectionError(msg) => write!(f, "LLM connection error: {}", msg),
            LlmError::ResponseError(msg) => write!(f, "LLM response error: {}", msg),
            LlmError::ConfigError(msg) => write!(f, "LLM configuration error: {}", msg),
        }
    }
}

impl Error for LlmError {}

/// Incremental fragments of one generation call, in backend emission order.
/// The channel closing cleanly marks the end of the stream; an `Err` fragment
/// means generation died mid-stream.
pub type FragmentReceiver = mpsc::Receiver<Result<String, LlmError>>;

/// Capacity of the fragment channel between a backend producer task and the
/// consuming loop.
pub const FRAGMENT_CHANNEL_CAPACITY: usize = 32;

/// A text-generation backend. `generate` is mandatory; backends that can
/// stream override `generate_stream` and report it via `supports_streaming`,
/// everyone else inherits the buffered fallback that delivers the full text
/// as a single fragment.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Prepare the backend. Idempotent; called lazily before first use.
    async fn initialize(&self) -> Result<(), LlmError>;

    fn is_initialized(&self) -> bool;

    /// Blocking generation: the complete response text.
    async fn generate(&self, prompt: &str, max_tokens: usize) -> Result<String, LlmError>;

    fn supports_streaming(&self) -> bool {
        false
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        max_tokens: usize,
    ) -> Result<FragmentReceiver, LlmError> {
        let text = self.generate(prompt, max_tokens).await?;
        let (tx, rx) = mpsc::channel(1);
        let _ = tx.send(Ok(text)).await;
        Ok(rx)
    }
}

/// Builds a fresh backend instance per request. The retry loop creates one
/// generator per attempt so no state leaks between attempts.
pub trait GeneratorFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn TextGenerator>, LlmError>;
}

/// Configured entry point to the generation backends.
pub struct LlmManager {
    config: LlmConfig,
}

impl LlmManager {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        match config.backend.as_str() {
            "remote" | "ollama" => Ok(Self {
                config: config.clone(),
            }),
            other => Err(LlmError::ConfigError(format!(
                "Unsupported LLM backend: {}",
                other
            ))),
        }
    }

    pub fn backend(&self) -> &str {
        &self.config.backend
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }
}

impl GeneratorFactory for LlmManager {
    fn create(&self) -> Result<Box<dyn TextGenerator>, LlmError> {
        match self.config.backend.as_str() {
            "remote" => Ok(Box::new(providers::remote::RemoteProvider::new(
                &self.config,
            )?)),
            "ollama" => Ok(Box::new(providers::ollama::OllamaProvider::new(
                &self.config,
            )?)),
            other => Err(LlmError::ConfigError(format!(
                "Unsupported LLM backend: {}",
                other
            ))),
        }
    }
}
