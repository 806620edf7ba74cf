//! Generate-execute-retry loop.
//!
//! Drives repeated attempts of generation plus execution, feeding every
//! failure back into the next prompt, and reports progress as a stream of
//! tagged events. Transport is someone else's problem: the loop writes
//! [`ProgressEvent`] values into a channel and the caller serializes them
//! however it likes.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::db::{QueryExecutor, QueryResult};
use crate::llm::{GeneratorFactory, TextGenerator};
use crate::prompt::{self, AttemptRecord, ErrorHistory};
use crate::sql;

/// Events emitted over one retry session, in order. A `Done` sentinel follows
/// the final informational event of every session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Start {
        max_retries: usize,
    },
    Generating {
        attempt: usize,
        status: String,
    },
    Generated {
        attempt: usize,
        sql: String,
        raw_sql: String,
    },
    Executing {
        attempt: usize,
        sql: String,
        status: String,
    },
    Success {
        attempt: usize,
        sql: String,
        result: QueryResult,
    },
    Error {
        attempt: usize,
        sql: String,
        error: String,
        prompt: String,
        is_final: bool,
    },
    FinalError {
        message: String,
    },
    FatalError {
        message: String,
    },
    Done,
}

#[derive(Debug, Clone)]
pub struct AutoExecuteOptions {
    pub max_attempts: usize,
    pub max_tokens: usize,
    pub history_limit: usize,
}

impl Default for AutoExecuteOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            max_tokens: 512,
            history_limit: prompt::DEFAULT_HISTORY_LIMIT,
        }
    }
}

const EVENT_CHANNEL_CAPACITY: usize = 64;
const FRAGMENT_POLL_TIMEOUT: Duration = Duration::from_millis(100);
const PROGRESS_EVERY_FRAGMENTS: usize = 10;
const IDLE_POLLS_PER_HEARTBEAT: usize = 10;
const RAW_PREVIEW_LIMIT: usize = 500;
const ERROR_PREVIEW_LIMIT: usize = 200;

/// Stands in for the SQL text in an attempt record when generation itself
/// failed and there is no statement to show.
pub const GENERATION_FAILED_SQL: &str = "SQL generation failed";

/// Spawns retry sessions. A fresh backend is created per attempt via the
/// factory; the executor is shared only within one session at a time.
pub struct AutoExecutor {
    factory: Arc<dyn GeneratorFactory>,
    executor: Arc<dyn QueryExecutor>,
    options: AutoExecuteOptions,
}

enum AttemptOutcome {
    Completed { sql: String, result: QueryResult },
    Cancelled,
}

struct AttemptFailure {
    /// Cleaned SQL when generation got that far, `None` when it did not.
    sql: Option<String>,
    message: String,
}

impl AutoExecutor {
    pub fn new(
        factory: Arc<dyn GeneratorFactory>,
        executor: Arc<dyn QueryExecutor>,
        options: AutoExecuteOptions,
    ) -> Self {
        Self {
            factory,
            executor,
            options,
        }
    }

    /// Start a retry session. Events arrive on the returned channel; the
    /// session ends when the channel closes, and dropping the receiver
    /// cancels the session at its next emission point.
    pub fn run(&self, schema: String, question: String) -> mpsc::Receiver<ProgressEvent> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let session = RetrySession {
            factory: Arc::clone(&self.factory),
            executor: Arc::clone(&self.executor),
            options: self.options.clone(),
            schema,
            question,
        };

        tokio::spawn(async move {
            if let Err(message) = session.drive(&tx).await {
                warn!("Retry session failed outside the attempt loop: {}", message);
                let _ = tx.send(ProgressEvent::FatalError { message }).await;
            }
            let _ = tx.send(ProgressEvent::Done).await;
        });

        rx
    }
}

/// One logical auto-execute request: owns the error history and the attempt
/// counter, and dies with the request.
struct RetrySession {
    factory: Arc<dyn GeneratorFactory>,
    executor: Arc<dyn QueryExecutor>,
    options: AutoExecuteOptions,
    schema: String,
    question: String,
}

impl RetrySession {
    /// Runs the attempt loop. `Err` is reserved for session-level failures
    /// outside the retry cycle; a dropped receiver just ends the session.
    async fn drive(&self, tx: &mpsc::Sender<ProgressEvent>) -> Result<(), String> {
        if self.question.trim().is_empty() {
            return Err("question must not be empty".to_string());
        }

        let max_attempts = self.options.max_attempts.max(1);
        let mut history = ErrorHistory::new();
        let mut current_prompt = prompt::build_prompt(&self.schema, &self.question);

        if tx
            .send(ProgressEvent::Start {
                max_retries: max_attempts,
            })
            .await
            .is_err()
        {
            return Ok(());
        }

        for attempt in 1..=max_attempts {
            info!("Auto-execute attempt {}/{}", attempt, max_attempts);

            if tx
                .send(ProgressEvent::Generating {
                    attempt,
                    status: "Generating SQL".to_string(),
                })
                .await
                .is_err()
            {
                return Ok(());
            }

            match self.attempt(attempt, &current_prompt, tx).await {
                Ok(AttemptOutcome::Completed { sql, result }) => {
                    info!(
                        "Attempt {} succeeded with {} rows",
                        attempt, result.row_count
                    );
                    let _ = tx
                        .send(ProgressEvent::Success {
                            attempt,
                            sql,
                            result,
                        })
                        .await;
                    return Ok(());
                }
                Ok(AttemptOutcome::Cancelled) => return Ok(()),
                Err(failure) => {
                    warn!("Attempt {} failed: {}", attempt, failure.message);

                    let sql = failure
                        .sql
                        .unwrap_or_else(|| GENERATION_FAILED_SQL.to_string());
                    history.push(AttemptRecord {
                        attempt,
                        sql: sql.clone(),
                        error: failure.message.clone(),
                    });

                    let is_final = attempt >= max_attempts;
                    if tx
                        .send(ProgressEvent::Error {
                            attempt,
                            sql,
                            error: failure.message.clone(),
                            prompt: current_prompt.clone(),
                            is_final,
                        })
                        .await
                        .is_err()
                    {
                        return Ok(());
                    }

                    if is_final {
                        let _ = tx
                            .send(ProgressEvent::FinalError {
                                message: format!(
                                    "Still failing after {} attempts. Last error: {}",
                                    max_attempts, failure.message
                                ),
                            })
                            .await;
                        return Ok(());
                    }

                    current_prompt = prompt::build_retry_prompt_bounded(
                        &self.schema,
                        &self.question,
                        &history,
                        self.options.history_limit,
                    );
                }
            }
        }

        Ok(())
    }

    /// One generate-then-execute cycle. Every failure in here is recoverable
    /// at the session level.
    async fn attempt(
        &self,
        attempt: usize,
        current_prompt: &str,
        tx: &mpsc::Sender<ProgressEvent>,
    ) -> Result<AttemptOutcome, AttemptFailure> {
        let generator = self.factory.create().map_err(|e| AttemptFailure {
            sql: None,
            message: e.to_string(),
        })?;

        if !generator.is_initialized() {
            generator.initialize().await.map_err(|e| AttemptFailure {
                sql: None,
                message: e.to_string(),
            })?;
        }

        let raw_output = if generator.supports_streaming() {
            match self
                .consume_stream(generator.as_ref(), attempt, current_prompt, tx)
                .await?
            {
                Some(raw) => raw,
                None => return Ok(AttemptOutcome::Cancelled),
            }
        } else {
            generator
                .generate(current_prompt, self.options.max_tokens)
                .await
                .map_err(|e| AttemptFailure {
                    sql: None,
                    message: e.to_string(),
                })?
        };

        let cleaned = sql::clean(&raw_output);
        if cleaned.trim().is_empty() {
            return Err(AttemptFailure {
                sql: None,
                message: format!(
                    "SQL cleanup produced no statement. Raw output: {}",
                    truncate(&raw_output, ERROR_PREVIEW_LIMIT)
                ),
            });
        }

        if tx
            .send(ProgressEvent::Generated {
                attempt,
                sql: cleaned.clone(),
                raw_sql: truncate(&raw_output, RAW_PREVIEW_LIMIT),
            })
            .await
            .is_err()
        {
            return Ok(AttemptOutcome::Cancelled);
        }

        if tx
            .send(ProgressEvent::Executing {
                attempt,
                sql: cleaned.clone(),
                status: "Executing".to_string(),
            })
            .await
            .is_err()
        {
            return Ok(AttemptOutcome::Cancelled);
        }

        match self.executor.execute(&cleaned).await {
            Ok(result) => Ok(AttemptOutcome::Completed {
                sql: cleaned,
                result,
            }),
            Err(e) => Err(AttemptFailure {
                sql: Some(cleaned),
                message: e.to_string(),
            }),
        }
    }

    /// Accumulates fragments from the backend's producer task. Short poll
    /// timeouts keep the session cooperative while the backend is quiet;
    /// progress events go out at a bounded cadence either way. A mid-stream
    /// error counts as a generation failure for this attempt, not a fatal
    /// one. `Ok(None)` means the caller went away.
    async fn consume_stream(
        &self,
        generator: &dyn TextGenerator,
        attempt: usize,
        current_prompt: &str,
        tx: &mpsc::Sender<ProgressEvent>,
    ) -> Result<Option<String>, AttemptFailure> {
        let mut fragments = generator
            .generate_stream(current_prompt, self.options.max_tokens)
            .await
            .map_err(|e| AttemptFailure {
                sql: None,
                message: e.to_string(),
            })?;

        let mut raw_output = String::new();
        let mut fragment_count = 0usize;
        let mut idle_polls = 0usize;

        loop {
            match tokio::time::timeout(FRAGMENT_POLL_TIMEOUT, fragments.recv()).await {
                Ok(Some(Ok(fragment))) => {
                    idle_polls = 0;
                    raw_output.push_str(&fragment);
                    fragment_count += 1;

                    if fragment_count % PROGRESS_EVERY_FRAGMENTS == 0 {
                        debug!("Attempt {}: {} fragments so far", attempt, fragment_count);
                        if tx
                            .send(ProgressEvent::Generating {
                                attempt,
                                status: format!("Generating SQL ({} fragments)", fragment_count),
                            })
                            .await
                            .is_err()
                        {
                            return Ok(None);
                        }
                    }
                }
                Ok(Some(Err(e))) => {
                    return Err(AttemptFailure {
                        sql: None,
                        message: e.to_string(),
                    });
                }
                Ok(None) => break,
                Err(_) => {
                    idle_polls += 1;
                    if idle_polls % IDLE_POLLS_PER_HEARTBEAT == 0
                        && tx
                            .send(ProgressEvent::Generating {
                                attempt,
                                status: "Generating SQL...".to_string(),
                            })
                            .await
                            .is_err()
                    {
                        return Ok(None);
                    }
                }
            }
        }

        Ok(Some(raw_output))
    }
}

fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        text.to_string()
    } else {
        text.chars().take(limit).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn events_serialize_with_snake_case_tags() {
        let event = ProgressEvent::Start { max_retries: 3 };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "start", "max_retries": 3})
        );

        let event = ProgressEvent::FinalError {
            message: "out of attempts".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "final_error", "message": "out of attempts"})
        );

        let event = ProgressEvent::Error {
            attempt: 2,
            sql: "SELECT 1;".to_string(),
            error: "boom".to_string(),
            prompt: "p".to_string(),
            is_final: false,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["is_final"], false);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("查詢所有使用者", 4), "查詢所有");
        assert_eq!(truncate("short", 200), "short");
    }
}
