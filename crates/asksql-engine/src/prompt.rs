//! Generation prompt for turning a question into a single SELECT

use crate::schema::SchemaDescription;

pub const DEFAULT_DIALECT: &str = "DuckDB";

/// Renders the prompt sent to the model. Output depends only on the dialect,
/// the question and the schema.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    dialect: String,
}

impl PromptBuilder {
    pub fn new(dialect: impl Into<String>) -> Self {
        Self {
            dialect: dialect.into(),
        }
    }

    pub fn build(&self, question: &str, schema: &SchemaDescription) -> String {
        let dialect = &self.dialect;
        format!(
            "You are an expert SQL Assistant. Given the database schema and a user question, \
generate a valid {dialect} SELECT query.

SCHEMA:
{schema}

QUESTION: {question}

RULES:
- Return ONLY the SQL query.
- Do NOT return markdown (no ```sql ... ```).
- Do NOT return explanations.
- Only SELECT statements are allowed.
- Start the SQL with SELECT.
- Use {dialect} syntax.

SQL:
"
        )
    }
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_DIALECT)
    }
}

/// [`PromptBuilder::build`] with the default dialect
pub fn build_prompt(question: &str, schema: &SchemaDescription) -> String {
    PromptBuilder::default().build(question, schema)
}
