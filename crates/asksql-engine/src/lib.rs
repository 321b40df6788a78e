//! Natural-language question to SQL result pipeline
//!
//! [`Orchestrator::ask`] runs one question through five stages:
//! schema lookup ([`SchemaCache`]), prompt rendering ([`PromptBuilder`]),
//! SQL generation ([`SqlGenerator`]), safety validation
//! ([`asksql_guard::SqlGuard`]) and execution ([`QueryExecutor`]).
//! The first failing stage ends the run with a [`PipelineError`].

pub mod llm;
pub mod metrics;
pub mod pipeline;
pub mod prompt;
pub mod schema;

pub use asksql_duck::Record;
pub use asksql_guard::ValidatedSql;
pub use llm::{GenerationError, GeneratorConfig, OllamaGenerator, SqlGenerator};
pub use metrics::PipelineMetrics;
pub use pipeline::{
    into_pair, Answer, Orchestrator, OrchestratorConfig, Outcome, PipelineError, QueryExecutor,
    Stage,
};
pub use prompt::{build_prompt, PromptBuilder};
pub use schema::{SchemaCache, SchemaDescription, SchemaSource};
