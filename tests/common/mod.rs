//! Scripted stand-ins for the generation backend and the database.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use text2sql::db::{DbError, QueryExecutor, QueryResult};
use text2sql::llm::{FragmentReceiver, GeneratorFactory, LlmError, TextGenerator};
use tokio::sync::mpsc;

/// What a stub backend produces for one generation call.
#[derive(Debug, Clone)]
pub enum ScriptedOutput {
    Text(String),
    Fragments(Vec<String>),
    FailMidStream { fragments: Vec<String>, error: String },
    Error(String),
}

/// Shared recorder: the outputs still to replay, plus everything the loop
/// sent our way. The last scripted output repeats once the queue runs dry.
pub struct ScriptState {
    outputs: Mutex<VecDeque<ScriptedOutput>>,
    pub prompts: Mutex<Vec<String>>,
    pub initializations: AtomicUsize,
}

impl ScriptState {
    pub fn new(outputs: Vec<ScriptedOutput>) -> Arc<Self> {
        Arc::new(Self {
            outputs: Mutex::new(outputs.into()),
            prompts: Mutex::new(Vec::new()),
            initializations: AtomicUsize::new(0),
        })
    }

    fn next(&self) -> ScriptedOutput {
        let mut outputs = self.outputs.lock().unwrap();
        if outputs.len() > 1 {
            outputs.pop_front().unwrap()
        } else {
            outputs
                .front()
                .cloned()
                .unwrap_or_else(|| ScriptedOutput::Error("script exhausted".to_string()))
        }
    }

    pub fn prompt(&self, index: usize) -> String {
        self.prompts.lock().unwrap()[index].clone()
    }

    pub fn prompt_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

pub struct StubGenerator {
    state: Arc<ScriptState>,
    streaming: bool,
    initialized: AtomicBool,
}

#[async_trait]
impl TextGenerator for StubGenerator {
    async fn initialize(&self) -> Result<(), LlmError> {
        if !self.initialized.swap(true, Ordering::SeqCst) {
            self.state.initializations.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    async fn generate(&self, prompt: &str, _max_tokens: usize) -> Result<String, LlmError> {
        self.state.prompts.lock().unwrap().push(prompt.to_string());
        match self.state.next() {
            ScriptedOutput::Text(text) => Ok(text),
            ScriptedOutput::Fragments(fragments) => Ok(fragments.concat()),
            ScriptedOutput::FailMidStream { error, .. } => Err(LlmError::ResponseError(error)),
            ScriptedOutput::Error(error) => Err(LlmError::ResponseError(error)),
        }
    }

    fn supports_streaming(&self) -> bool {
        self.streaming
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        max_tokens: usize,
    ) -> Result<FragmentReceiver, LlmError> {
        if !self.streaming {
            // Inherit the buffered fallback shape: one fragment.
            let text = self.generate(prompt, max_tokens).await?;
            let (tx, rx) = mpsc::channel(1);
            let _ = tx.send(Ok(text)).await;
            return Ok(rx);
        }

        self.state.prompts.lock().unwrap().push(prompt.to_string());
        let output = self.state.next();
        let (tx, rx) = mpsc::channel(8);

        tokio::spawn(async move {
            match output {
                ScriptedOutput::Text(text) => {
                    let _ = tx.send(Ok(text)).await;
                }
                ScriptedOutput::Fragments(fragments) => {
                    for fragment in fragments {
                        if tx.send(Ok(fragment)).await.is_err() {
                            return;
                        }
                    }
                }
                ScriptedOutput::FailMidStream { fragments, error } => {
                    for fragment in fragments {
                        if tx.send(Ok(fragment)).await.is_err() {
                            return;
                        }
                    }
                    let _ = tx.send(Err(LlmError::ResponseError(error))).await;
                }
                ScriptedOutput::Error(error) => {
                    let _ = tx.send(Err(LlmError::ResponseError(error))).await;
                }
            }
        });

        Ok(rx)
    }
}

pub struct StubFactory {
    pub state: Arc<ScriptState>,
    pub streaming: bool,
    pub fail_create: bool,
}

impl StubFactory {
    pub fn new(state: Arc<ScriptState>) -> Self {
        Self {
            state,
            streaming: false,
            fail_create: false,
        }
    }

    pub fn streaming(state: Arc<ScriptState>) -> Self {
        Self {
            state,
            streaming: true,
            fail_create: false,
        }
    }
}

impl GeneratorFactory for StubFactory {
    fn create(&self) -> Result<Box<dyn TextGenerator>, LlmError> {
        if self.fail_create {
            return Err(LlmError::ConfigError("backend unavailable".to_string()));
        }
        Ok(Box::new(StubGenerator {
            state: Arc::clone(&self.state),
            streaming: self.streaming,
            initialized: AtomicBool::new(false),
        }))
    }
}

/// Execution stub: succeeds only when the statement contains the accepted
/// fragment (always succeeds when there is none).
pub struct StubExecutor {
    pub accept_containing: Option<String>,
    pub executed: Mutex<Vec<String>>,
}

impl StubExecutor {
    pub fn accepting(fragment: &str) -> Self {
        Self {
            accept_containing: Some(fragment.to_string()),
            executed: Mutex::new(Vec::new()),
        }
    }

    pub fn always_ok() -> Self {
        Self {
            accept_containing: None,
            executed: Mutex::new(Vec::new()),
        }
    }

    pub fn executed_count(&self) -> usize {
        self.executed.lock().unwrap().len()
    }
}

#[async_trait]
impl QueryExecutor for StubExecutor {
    async fn execute(&self, sql: &str) -> Result<QueryResult, DbError> {
        self.executed.lock().unwrap().push(sql.to_string());

        if let Some(fragment) = &self.accept_containing {
            if !sql.contains(fragment) {
                return Err(DbError::QueryError(format!(
                    "no such table or column in statement: {}",
                    sql
                )));
            }
        }

        Ok(QueryResult {
            columns: vec!["id".to_string()],
            rows: vec![serde_json::json!({"id": 1})],
            row_count: 1,
        })
    }
}
