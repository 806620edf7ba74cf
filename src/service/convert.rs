use crate::llm::{FragmentReceiver, LlmError, TextGenerator};
use crate::prompt;
use crate::sql;

/// One natural-language → SQL call over a generation backend.
pub struct Converter {
    generator: Box<dyn TextGenerator>,
}

impl Converter {
    pub fn new(generator: Box<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    async fn ensure_initialized(&self) -> Result<(), LlmError> {
        if !self.generator.is_initialized() {
            self.generator.initialize().await?;
        }
        Ok(())
    }

    /// Buffered conversion: generate, then extract/validate/format the raw
    /// output into cleaned SQL.
    pub async fn convert(
        &self,
        schema: &str,
        question: &str,
        max_tokens: usize,
    ) -> Result<String, LlmError> {
        self.ensure_initialized().await?;

        let prompt = prompt::build_prompt(schema, question);
        let raw_output = self.generator.generate(&prompt, max_tokens).await?;

        Ok(sql::clean(&raw_output))
    }

    /// Incremental conversion: raw fragments exactly as the backend produces
    /// them. Cleaning needs the complete text, so the caller concatenates the
    /// fragments and runs [`sql::clean`] on the result afterward.
    pub async fn convert_stream(
        &self,
        schema: &str,
        question: &str,
        max_tokens: usize,
    ) -> Result<FragmentReceiver, LlmError> {
        self.ensure_initialized().await?;

        let prompt = prompt::build_prompt(schema, question);
        self.generator.generate_stream(&prompt, max_tokens).await
    }
}
