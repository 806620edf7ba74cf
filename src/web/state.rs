use crate::config::AppConfig;
use crate::db::QueryExecutor;
use crate::llm::LlmManager;
use crate::service::{AutoExecuteOptions, AutoExecutor};
use std::sync::Arc;

/// Shared application state for the web server. Everything in here is either
/// immutable after startup or internally synchronized; retry sessions own
/// their mutable state themselves.
pub struct AppState {
    pub config: AppConfig,
    pub schema_text: String,
    pub llm_manager: Arc<LlmManager>,
    pub executor: Arc<dyn QueryExecutor>,
    pub startup_time: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        schema_text: String,
        llm_manager: Arc<LlmManager>,
        executor: Arc<dyn QueryExecutor>,
    ) -> Self {
        Self {
            config,
            schema_text,
            llm_manager,
            executor,
            startup_time: chrono::Utc::now(),
        }
    }

    /// Options for a retry session, honoring a per-request attempt budget.
    pub fn auto_execute_options(&self, max_retries: Option<usize>) -> AutoExecuteOptions {
        AutoExecuteOptions {
            max_attempts: max_retries.unwrap_or(self.config.retry.max_attempts),
            max_tokens: self.config.llm.max_tokens,
            history_limit: self.config.retry.history_limit,
        }
    }

    /// A retry-loop driver over the configured backend and database. Cheap to
    /// build; each request gets its own so sessions never share loop state.
    pub fn auto_executor(&self, max_retries: Option<usize>) -> AutoExecutor {
        AutoExecutor::new(
            Arc::clone(&self.llm_manager) as Arc<dyn crate::llm::GeneratorFactory>,
            Arc::clone(&self.executor),
            self.auto_execute_options(max_retries),
        )
    }
}
