use serde::{Deserialize, Serialize};

/// One failed generate-then-execute cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttemptRecord {
    pub attempt: usize,
    pub sql: String,
    pub error: String,
}

/// Append-only log of failed attempts within one retry session. Records are
/// never reordered or removed; prompt rendering takes a read-only view.
#[derive(Debug, Default, Clone)]
pub struct ErrorHistory {
    records: Vec<AttemptRecord>,
}

impl ErrorHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: AttemptRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[AttemptRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

const SYSTEM_INSTRUCTION: &str = r#"### Instructions:
You are an expert SQL engineer. Convert the question into a single SQL query for DuckDB, given the database schema below.
Adhere to these rules:
- Column and table names must match the schema exactly, including case and underscores
- Never use a column that does not exist in the schema, and never invent or guess names
- If the query needs a JOIN, keep table aliases consistent throughout the statement
- Include every non-aggregated column in the GROUP BY clause
- Output exactly one SQL statement and nothing else - no explanation, no commentary
- Wrap the statement in a ```sql fenced block

### Output format:
```sql
SELECT column1, column2 FROM table_name WHERE condition;
```"#;

const RETRY_REMINDER: &str = "Before answering again, re-check the failed attempts above: \
verify every column name against the schema and make sure table aliases are used consistently.";

/// How many failed attempts are rendered into a retry prompt. The history
/// itself is never truncated; only the rendered view is bounded so the prompt
/// cannot outgrow the backend's input window on high attempt budgets.
pub const DEFAULT_HISTORY_LIMIT: usize = 6;

/// First-attempt prompt: system instruction, schema, question.
pub fn build_prompt(schema: &str, question: &str) -> String {
    format!(
        "{}\n\n### Database schema:\n{}\n\n### Question:\n{}\n\n### SQL query:\n",
        SYSTEM_INSTRUCTION,
        schema.trim(),
        question.trim()
    )
}

/// Retry prompt: the first-attempt layout plus the serialized error history
/// and a reminder to re-examine names before answering again.
pub fn build_retry_prompt(schema: &str, question: &str, history: &ErrorHistory) -> String {
    build_retry_prompt_bounded(schema, question, history, DEFAULT_HISTORY_LIMIT)
}

pub fn build_retry_prompt_bounded(
    schema: &str,
    question: &str,
    history: &ErrorHistory,
    history_limit: usize,
) -> String {
    let mut history_section = String::new();

    if !history.is_empty() {
        history_section.push_str("### Failed attempts so far:\n");

        let records = history.records();
        let skipped = records.len().saturating_sub(history_limit.max(1));
        if skipped > 0 {
            history_section.push_str(&format!("({skipped} earlier attempts omitted)\n"));
        }

        for (index, record) in records[skipped..].iter().enumerate() {
            if index > 0 {
                history_section.push_str(&format!("\n{}\n", "-".repeat(60)));
            }
            history_section.push_str(&format!(
                "\nAttempt {}:\nGenerated SQL:\n```sql\n{}\n```\n\nError message:\n{}\n",
                record.attempt, record.sql, record.error
            ));
        }

        history_section.push('\n');
        history_section.push_str(RETRY_REMINDER);
        history_section.push('\n');
    }

    format!(
        "{}\n\n### Database schema:\n{}\n\n{}\n### Question:\n{}\n\n### Before you answer:\n\
1. Review the errors listed above\n\
2. Find the correct column names in the schema\n\
3. Check table alias consistency\n\
4. Do not repeat a mistake from a previous attempt\n\n### SQL query:\n",
        SYSTEM_INSTRUCTION,
        schema.trim(),
        history_section,
        question.trim()
    )
}
