//! Orchestrator: one question in, validated SQL and records (or a stage error) out

use crate::llm::{GenerationError, SqlGenerator};
use crate::metrics::PipelineMetrics;
use crate::prompt::{PromptBuilder, DEFAULT_DIALECT};
use crate::schema::{SchemaCache, SchemaSource};
use asksql_duck::{Database, DuckError, Record};
use asksql_guard::{Rejection, SqlGuard, ValidatedSql};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::Instrument;
use uuid::Uuid;

/// Runs validated SQL. Implemented by [`Database`].
pub trait QueryExecutor: Send + Sync + 'static {
    fn execute(&self, sql: &ValidatedSql) -> Result<Vec<Record>, DuckError>;
}

impl QueryExecutor for Database {
    fn execute(&self, sql: &ValidatedSql) -> Result<Vec<Record>, DuckError> {
        Database::execute(self, sql)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Schema,
    Generation,
    Validation,
    Execution,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Schema => "schema",
            Stage::Generation => "generation",
            Stage::Validation => "validation",
            Stage::Execution => "execution",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of one pipeline stage. `Display` gives the user-facing text.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Schema Error: {0}")]
    Schema(#[source] DuckError),

    #[error("Error generating SQL")]
    Generation(#[source] GenerationError),

    #[error("Invalid SQL: {0}")]
    Validation(#[source] Rejection),

    #[error("SQL Execution Error: {0}")]
    Execution(String),
}

impl PipelineError {
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Schema(_) => Stage::Schema,
            PipelineError::Generation(_) => Stage::Generation,
            PipelineError::Validation(_) => Stage::Validation,
            PipelineError::Execution(_) => Stage::Execution,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub sql: ValidatedSql,
    pub records: Vec<Record>,
}

pub type Outcome = Result<Answer, PipelineError>;

/// Flatten an outcome into `(sql or error text, records)`; records are empty
/// on failure.
pub fn into_pair(outcome: Outcome) -> (String, Vec<Record>) {
    match outcome {
        Ok(answer) => (answer.sql.into_string(), answer.records),
        Err(e) => (e.to_string(), Vec::new()),
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub dialect: String,
    pub query_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            dialect: DEFAULT_DIALECT.to_string(),
            query_timeout: Duration::from_secs(30),
        }
    }
}

pub struct Orchestrator {
    schema: SchemaCache,
    prompt: PromptBuilder,
    generator: Arc<dyn SqlGenerator>,
    guard: SqlGuard,
    executor: Arc<dyn QueryExecutor>,
    query_timeout: Duration,
    metrics: Option<PipelineMetrics>,
}

impl Orchestrator {
    pub fn new(
        schema_source: Arc<dyn SchemaSource>,
        generator: Arc<dyn SqlGenerator>,
        executor: Arc<dyn QueryExecutor>,
        config: OrchestratorConfig,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            schema: SchemaCache::new(schema_source),
            prompt: PromptBuilder::new(config.dialect),
            generator,
            guard: SqlGuard::new()?,
            executor,
            query_timeout: config.query_timeout,
            metrics: None,
        })
    }

    /// Use one database for both introspection and execution
    pub fn with_database(
        database: Arc<Database>,
        generator: Arc<dyn SqlGenerator>,
        config: OrchestratorConfig,
    ) -> Result<Self, regex::Error> {
        Self::new(database.clone(), generator, database, config)
    }

    pub fn with_metrics(mut self, metrics: PipelineMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn schema_cache(&self) -> &SchemaCache {
        &self.schema
    }

    /// Answer one question. Each stage runs once; the first failure ends the
    /// run.
    pub async fn ask(&self, question: &str) -> Outcome {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("ask", %request_id);

        async move {
            tracing::info!(question, "Processing question");
            let outcome = self.run(question).await;

            let label = match &outcome {
                Ok(answer) => {
                    tracing::info!(rows = answer.records.len(), "Question answered");
                    "success"
                }
                Err(e) => {
                    tracing::warn!(stage = %e.stage(), error = %e, "Question failed");
                    e.stage().as_str()
                }
            };
            if let Some(metrics) = &self.metrics {
                metrics.record_outcome(label);
            }
            outcome
        }
        .instrument(span)
        .await
    }

    async fn run(&self, question: &str) -> Outcome {
        let started = Instant::now();
        let schema = self.schema.get_schema().await;
        self.observe(Stage::Schema, started);
        let schema = schema.map_err(PipelineError::Schema)?;

        let prompt = self.prompt.build(question, &schema);

        tracing::info!("Sending prompt to generation service");
        let started = Instant::now();
        let generated = self.generator.generate(&prompt).await;
        self.observe(Stage::Generation, started);
        let raw = generated.map_err(PipelineError::Generation)?;
        tracing::info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Generation service responded"
        );

        let sql = self.guard.validate(&raw).map_err(|rejection| {
            tracing::debug!(candidate = %raw, "Rejected generated SQL");
            PipelineError::Validation(rejection)
        })?;

        tracing::debug!(sql = %sql, "Executing SQL");
        let started = Instant::now();
        let records = self.execute(sql.clone()).await;
        self.observe(Stage::Execution, started);
        let records = records?;
        tracing::info!(
            rows = records.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Query executed"
        );

        Ok(Answer { sql, records })
    }

    async fn execute(&self, sql: ValidatedSql) -> Result<Vec<Record>, PipelineError> {
        let executor = Arc::clone(&self.executor);
        let task = tokio::task::spawn_blocking(move || executor.execute(&sql));

        match tokio::time::timeout(self.query_timeout, task).await {
            Ok(Ok(Ok(records))) => Ok(records),
            Ok(Ok(Err(e))) => Err(PipelineError::Execution(e.to_string())),
            Ok(Err(e)) => Err(PipelineError::Execution(format!("query task failed: {e}"))),
            Err(_) => Err(PipelineError::Execution(format!(
                "query timed out after {:?}",
                self.query_timeout
            ))),
        }
    }

    fn observe(&self, stage: Stage, started: Instant) {
        if let Some(metrics) = &self.metrics {
            metrics.observe_stage(stage, started.elapsed());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::tests::CountingSource;
    use async_trait::async_trait;
    use prometheus::Registry;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replays canned generations and records the prompts it was given
    struct ScriptedGenerator {
        reply: Mutex<Option<Result<String, GenerationError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedGenerator {
        fn replying(sql: &str) -> Arc<Self> {
            Self::with(Ok(sql.to_string()))
        }

        fn with(reply: Result<String, GenerationError>) -> Arc<Self> {
            Arc::new(Self {
                reply: Mutex::new(Some(reply)),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl SqlGenerator for ScriptedGenerator {
        async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.reply
                .lock()
                .unwrap()
                .take()
                .unwrap_or(Err(GenerationError::Empty))
        }
    }

    /// Delegates to a seeded database and counts executions
    struct CountingExecutor {
        db: Database,
        calls: AtomicUsize,
        delay: Option<Duration>,
    }

    impl CountingExecutor {
        fn seeded() -> Arc<Self> {
            Self::seeded_with_delay(None)
        }

        fn seeded_with_delay(delay: Option<Duration>) -> Arc<Self> {
            let db = Database::in_memory().unwrap();
            asksql_duck::demo::seed(&db).unwrap();
            Arc::new(Self {
                db,
                calls: AtomicUsize::new(0),
                delay,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl QueryExecutor for CountingExecutor {
        fn execute(&self, sql: &ValidatedSql) -> Result<Vec<Record>, DuckError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
            }
            self.db.execute(sql)
        }
    }

    fn orchestrator(
        source: Arc<CountingSource>,
        generator: Arc<ScriptedGenerator>,
        executor: Arc<CountingExecutor>,
    ) -> Orchestrator {
        Orchestrator::new(source, generator, executor, OrchestratorConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_success_path() {
        let source = Arc::new(CountingSource::new());
        let generator = ScriptedGenerator::replying(
            "```sql\nSELECT ProductName, Price FROM Products ORDER BY Price DESC LIMIT 3\n```",
        );
        let executor = CountingExecutor::seeded();
        let orchestrator = orchestrator(source.clone(), generator.clone(), executor.clone());

        let answer = orchestrator
            .ask("Show me the top 3 most expensive products.")
            .await
            .unwrap();

        assert_eq!(
            answer.sql.as_str(),
            "SELECT ProductName, Price FROM Products ORDER BY Price DESC LIMIT 3"
        );
        assert_eq!(answer.records.len(), 3);
        assert_eq!(answer.records[0]["ProductName"], json!("Laptop Pro X"));
        assert_eq!(answer.records[2]["Price"], json!(250.0));

        let prompt = &generator.prompts.lock().unwrap()[0];
        assert!(prompt.contains("QUESTION: Show me the top 3 most expensive products."));
        assert!(prompt.contains("Table Products: ProductName (VARCHAR), Price (DOUBLE)"));
        assert_eq!(executor.calls(), 1);
    }

    #[tokio::test]
    async fn test_schema_is_fetched_once_across_questions() {
        let source = Arc::new(CountingSource::new());
        let executor = CountingExecutor::seeded();
        let orchestrator = Orchestrator::new(
            source.clone(),
            ScriptedGenerator::replying("SELECT 1"),
            executor,
            OrchestratorConfig::default(),
        )
        .unwrap();

        orchestrator.ask("first").await.unwrap();
        // the scripted reply is used up, so this one fails at generation
        orchestrator.ask("second").await.unwrap_err();

        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_schema_failure_stops_pipeline() {
        let source = Arc::new(CountingSource::failing(1));
        let generator = ScriptedGenerator::replying("SELECT 1");
        let executor = CountingExecutor::seeded();
        let orchestrator = orchestrator(source, generator.clone(), executor.clone());

        let err = orchestrator.ask("anything").await.unwrap_err();
        assert_eq!(err.stage(), Stage::Schema);
        assert_eq!(
            err.to_string(),
            "Schema Error: Error fetching schema: connection refused"
        );
        assert_eq!(generator.calls(), 0);
        assert_eq!(executor.calls(), 0);
    }

    #[tokio::test]
    async fn test_generation_failure_skips_database() {
        let generator = ScriptedGenerator::with(Err(GenerationError::Empty));
        let executor = CountingExecutor::seeded();
        let orchestrator = orchestrator(
            Arc::new(CountingSource::new()),
            generator,
            executor.clone(),
        );

        let outcome = orchestrator.ask("anything").await;
        assert!(matches!(&outcome, Err(e) if e.stage() == Stage::Generation));
        assert_eq!(
            into_pair(outcome),
            ("Error generating SQL".to_string(), Vec::new())
        );
        assert_eq!(executor.calls(), 0);
    }

    #[tokio::test]
    async fn test_injection_is_never_executed() {
        let generator = ScriptedGenerator::replying("SELECT * FROM Products; DROP TABLE Products;");
        let executor = CountingExecutor::seeded();
        let orchestrator = orchestrator(
            Arc::new(CountingSource::new()),
            generator,
            executor.clone(),
        );

        let err = orchestrator.ask("drop everything").await.unwrap_err();
        assert_eq!(err.stage(), Stage::Validation);
        assert_eq!(
            err.to_string(),
            "Invalid SQL: Forbidden keyword detected: DROP"
        );
        assert_eq!(executor.calls(), 0);
    }

    #[tokio::test]
    async fn test_non_select_is_rejected() {
        let orchestrator = orchestrator(
            Arc::new(CountingSource::new()),
            ScriptedGenerator::replying("DELETE FROM Orders"),
            CountingExecutor::seeded(),
        );

        let (text, records) = into_pair(orchestrator.ask("clear orders").await);
        assert_eq!(text, "Invalid SQL: Only SELECT queries are allowed.");
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_execution_error() {
        let executor = CountingExecutor::seeded();
        let orchestrator = orchestrator(
            Arc::new(CountingSource::new()),
            ScriptedGenerator::replying("SELECT NoSuchColumn FROM Products"),
            executor.clone(),
        );

        let err = orchestrator.ask("anything").await.unwrap_err();
        assert_eq!(err.stage(), Stage::Execution);
        assert!(err.to_string().starts_with("SQL Execution Error: "));
        assert_eq!(executor.calls(), 1);
    }

    #[tokio::test]
    async fn test_execution_timeout() {
        let orchestrator = Orchestrator::new(
            Arc::new(CountingSource::new()),
            ScriptedGenerator::replying("SELECT 1"),
            CountingExecutor::seeded_with_delay(Some(Duration::from_millis(500))),
            OrchestratorConfig {
                query_timeout: Duration::from_millis(20),
                ..OrchestratorConfig::default()
            },
        )
        .unwrap();

        let err = orchestrator.ask("anything").await.unwrap_err();
        assert_eq!(err.stage(), Stage::Execution);
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_dates_are_serializable() {
        let orchestrator = orchestrator(
            Arc::new(CountingSource::new()),
            ScriptedGenerator::replying(
                "SELECT FullName, JoinDate FROM Customers ORDER BY JoinDate LIMIT 2",
            ),
            CountingExecutor::seeded(),
        );

        let answer = orchestrator.ask("first customers").await.unwrap();
        assert_eq!(answer.records[0]["JoinDate"], json!("2023-01-15"));
        assert_eq!(answer.records[1]["JoinDate"], json!("2023-02-20"));
        assert!(serde_json::to_string(&answer).is_ok());
    }

    #[tokio::test]
    async fn test_metrics_record_outcomes() {
        let registry = Registry::new();
        let metrics = PipelineMetrics::register(&registry).unwrap();
        let orchestrator = orchestrator(
            Arc::new(CountingSource::new()),
            ScriptedGenerator::replying("SELECT 1"),
            CountingExecutor::seeded(),
        )
        .with_metrics(metrics.clone());

        orchestrator.ask("one").await.unwrap();
        orchestrator.ask("two").await.unwrap_err();

        assert_eq!(metrics.questions_total("success"), 1);
        assert_eq!(metrics.questions_total("generation"), 1);
    }

    #[tokio::test]
    async fn test_failed_schema_fetch_is_timed() {
        let registry = Registry::new();
        let metrics = PipelineMetrics::register(&registry).unwrap();
        let orchestrator = orchestrator(
            Arc::new(CountingSource::failing(1)),
            ScriptedGenerator::replying("SELECT 1"),
            CountingExecutor::seeded(),
        )
        .with_metrics(metrics.clone());

        orchestrator.ask("anything").await.unwrap_err();

        assert_eq!(metrics.stage_observations(Stage::Schema), 1);
        assert_eq!(metrics.stage_observations(Stage::Generation), 0);
        assert_eq!(metrics.questions_total("schema"), 1);
    }

    #[tokio::test]
    async fn test_with_database() {
        let db = Arc::new(Database::in_memory().unwrap());
        asksql_duck::demo::seed(&db).unwrap();
        let orchestrator = Orchestrator::with_database(
            db,
            ScriptedGenerator::replying("SELECT COUNT(*) AS orders FROM Orders"),
            OrchestratorConfig::default(),
        )
        .unwrap();

        let (sql, records) = into_pair(orchestrator.ask("how many orders?").await);
        assert_eq!(sql, "SELECT COUNT(*) AS orders FROM Orders");
        assert_eq!(records[0]["orders"], json!(20));
    }
}
