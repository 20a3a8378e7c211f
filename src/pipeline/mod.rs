//! Query Pipeline
//!
//! Orchestrates one request: resolve schema → generate → validate → execute.
//!
//! # State Machine
//! ```text
//! Start → SchemaResolved → Generated → Validated → Executed ────────┐
//!                                    │           └→ ExecutionFailed ┼→ Completed
//!                                    └→ Rejected ───────────────────┘
//! any non-terminal state → Errored
//! ```
//!
//! # Safety Layers
//! Two independent checks stand between generated text and the database:
//! the generator's own destructive-intent sentinel, then the AST guard.
//! Neither replaces the other.
//!
//! # Failure Routing
//! Generator, executor and schema faults (including timeouts) become
//! [`PipelineOutcome::ExecutionError`]. Their details are logged here and
//! never returned.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::cache::SchemaCache;
use crate::engine::{Executor, ResultSet};
use crate::error::{Result, SentryError};
use crate::generator::{is_violation, Generator};
use crate::guard::SqlGuard;
use crate::output::{AnswerBody, RejectionBody, Response, EMPTY_QUESTION_MESSAGE};

/// Message returned when the generator reports destructive intent
pub const SECURITY_ALERT_MESSAGE: &str = "Destructive intent detected by AI.";

/// `queryAttempted` shown for a security alert, where no SQL exists
pub const BLOCKED_BY_AI: &str = "N/A (blocked by AI)";

/// A caller's question, guaranteed non-blank
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question(String);

impl Question {
    /// Accept `text` unless it is empty after trimming.
    ///
    /// Surrounding whitespace is kept as written.
    pub fn new(text: impl Into<String>) -> Result<Self> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(SentryError::invalid_input(EMPTY_QUESTION_MESSAGE));
        }
        Ok(Self(text))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

/// Request lifecycle stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    SchemaResolved,
    Generated,
    Validated,
    Rejected,
    Executed,
    ExecutionFailed,
    Completed,
    Errored,
}

impl Stage {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Errored)
    }

    /// Whether `self → next` is a legal transition
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        match (self, next) {
            (from, Self::Errored) => !from.is_terminal(),
            (Self::Start, Self::SchemaResolved)
            | (Self::SchemaResolved, Self::Generated)
            | (Self::Generated, Self::Validated | Self::Rejected)
            | (Self::Validated, Self::Executed | Self::ExecutionFailed)
            | (Self::Executed | Self::ExecutionFailed | Self::Rejected, Self::Completed) => true,
            _ => false,
        }
    }
}

/// Stage tracker for one request
#[derive(Debug)]
struct Run {
    stage: Stage,
}

impl Run {
    const fn new() -> Self {
        Self { stage: Stage::Start }
    }

    fn advance(&mut self, next: Stage) {
        debug_assert!(
            self.stage.can_advance_to(next),
            "illegal transition {:?} -> {next:?}",
            self.stage
        );
        debug!(from = ?self.stage, to = ?next, "Pipeline transition");
        self.stage = next;
    }
}

/// Result of handling one question
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    /// Guard approved the candidate and it executed
    Success { question: String, candidate: String, result_set: ResultSet },

    /// Guard rejected the candidate; it was not executed
    Rejected {
        question: String,
        candidate: String,
        reason: String,
        detected_statement_kind: Option<String>,
    },

    /// Question was empty; nothing ran
    InputError { message: String },

    /// Generator reported destructive intent; guard and executor never saw it
    SecurityAlert { message: String },

    /// Generator, executor or schema fault; details are in the logs only
    ExecutionError,
}

impl PipelineOutcome {
    /// Map to the caller-facing response body
    #[must_use]
    pub fn into_response(self) -> Response {
        match self {
            Self::Success { question, candidate, result_set } => Response::answer(AnswerBody {
                question,
                generated_query: candidate,
                data: result_set,
            }),
            Self::Rejected { candidate, reason, .. } => {
                Response::rejection(RejectionBody::new(reason, candidate))
            }
            Self::SecurityAlert { message } => {
                Response::rejection(RejectionBody::new(message, BLOCKED_BY_AI))
            }
            Self::InputError { message } => Response::invalid_input(message),
            Self::ExecutionError => Response::internal_error(),
        }
    }
}

/// Time budgets for collaborator calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    pub generation_timeout: Duration,
    pub execution_timeout: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            generation_timeout: Duration::from_secs(60),
            execution_timeout: Duration::from_secs(30),
        }
    }
}

/// Run `fut` with a deadline, turning expiry into a [`SentryError::Timeout`]
async fn bounded<T>(
    limit: Duration,
    what: &str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(limit, fut).await.unwrap_or_else(|_| {
        Err(SentryError::timeout(format!("{what} exceeded {}ms", limit.as_millis())))
    })
}

/// The query safety pipeline
#[derive(Debug)]
pub struct QueryPipeline<G, E> {
    generator: G,
    executor: E,
    guard: SqlGuard,
    cache: SchemaCache,
    options: PipelineOptions,
}

impl<G: Generator, E: Executor> QueryPipeline<G, E> {
    pub fn new(
        generator: G,
        executor: E,
        guard: SqlGuard,
        cache: SchemaCache,
        options: PipelineOptions,
    ) -> Self {
        Self { generator, executor, guard, cache, options }
    }

    #[must_use]
    pub const fn guard(&self) -> &SqlGuard {
        &self.guard
    }

    #[must_use]
    pub const fn cache(&self) -> &SchemaCache {
        &self.cache
    }

    #[must_use]
    pub const fn generator(&self) -> &G {
        &self.generator
    }

    #[must_use]
    pub const fn executor(&self) -> &E {
        &self.executor
    }

    /// Handle one question end to end
    ///
    /// Dropping the returned future abandons any in-flight generator or
    /// executor call; the schema cache stays consistent.
    pub async fn handle(&self, text: &str) -> PipelineOutcome {
        let question = match Question::new(text) {
            Ok(question) => question,
            Err(_) => {
                info!("Rejected empty question");
                return PipelineOutcome::InputError { message: EMPTY_QUESTION_MESSAGE.to_string() };
            }
        };

        self.run(question).instrument(info_span!("ask")).await
    }

    async fn run(&self, question: Question) -> PipelineOutcome {
        let mut run = Run::new();
        info!(question = %question.as_str(), "User asked");

        let introspect = || {
            bounded(
                self.options.execution_timeout,
                "Schema introspection",
                self.executor.introspect_schema(),
            )
        };
        let schema = match self.cache.get_or_fetch(introspect).await {
            Ok(schema) => schema,
            Err(e) => {
                error!(error = %e, code = e.error_code(), "Schema resolution failed");
                run.advance(Stage::Errored);
                return PipelineOutcome::ExecutionError;
            }
        };
        run.advance(Stage::SchemaResolved);

        let schema_text = schema.to_prompt_text();
        let candidate = match bounded(
            self.options.generation_timeout,
            "Generation",
            self.generator.generate(question.as_str(), &schema_text),
        )
        .await
        {
            Ok(candidate) => candidate,
            Err(e) => {
                error!(error = %e, code = e.error_code(), "Generation failed");
                run.advance(Stage::Errored);
                return PipelineOutcome::ExecutionError;
            }
        };
        run.advance(Stage::Generated);

        if is_violation(&candidate) {
            warn!("SECURITY ALERT: generator reported destructive intent");
            run.advance(Stage::Rejected);
            run.advance(Stage::Completed);
            return PipelineOutcome::SecurityAlert { message: SECURITY_ALERT_MESSAGE.to_string() };
        }
        info!(sql = %candidate, "Generated SQL");

        let verdict = self.guard.validate(&candidate);
        if !verdict.is_safe {
            let reason = verdict.reason.unwrap_or_default();
            warn!(
                reason = %reason,
                kind = verdict.detected_statement_kind.as_deref().unwrap_or("-"),
                "SECURITY BLOCK"
            );
            run.advance(Stage::Rejected);
            run.advance(Stage::Completed);
            return PipelineOutcome::Rejected {
                question: question.into_inner(),
                candidate,
                reason,
                detected_statement_kind: verdict.detected_statement_kind,
            };
        }
        run.advance(Stage::Validated);

        let execution =
            bounded(self.options.execution_timeout, "Execution", self.executor.execute(&candidate));
        let result_set = match execution.await {
            Ok(result_set) => result_set,
            Err(e) => {
                error!(error = %e, code = e.error_code(), "Query execution failed");
                run.advance(Stage::ExecutionFailed);
                run.advance(Stage::Completed);
                return PipelineOutcome::ExecutionError;
            }
        };
        run.advance(Stage::Executed);

        info!(rows = result_set.len(), "Query executed successfully");
        run.advance(Stage::Completed);

        PipelineOutcome::Success { question: question.into_inner(), candidate, result_set }
    }

    /// Run the guard alone over `sql`
    #[must_use]
    pub fn check(&self, sql: &str) -> crate::guard::Verdict {
        self.guard.validate(sql)
    }
}

#[cfg(feature = "sqlite")]
mod wiring {
    use super::{PipelineOptions, QueryPipeline};
    use crate::cache::SchemaCache;
    use crate::config::AppConfig;
    use crate::engine::sqlite::SqliteExecutor;
    use crate::error::Result;
    use crate::generator::OpenAiGenerator;
    use crate::guard::SqlGuard;
    use std::time::Duration;

    /// Pipeline over the bundled collaborators
    pub type SqlitePipeline = QueryPipeline<OpenAiGenerator, SqliteExecutor>;

    /// Executor configured from settings
    #[must_use]
    pub fn executor_from_config(config: &AppConfig) -> SqliteExecutor {
        let mut executor = SqliteExecutor::new(&config.database.file);
        if let Some(ms) = config.limits.busy_timeout_ms {
            executor = executor.with_busy_timeout(Duration::from_millis(ms));
        }
        if let Some(max) = config.limits.max_rows {
            executor = executor.with_max_rows(max);
        }
        executor
    }

    impl SqlitePipeline {
        /// Build the pipeline from configuration
        pub fn from_config(config: &AppConfig) -> Result<Self> {
            let options = PipelineOptions {
                generation_timeout: Duration::from_millis(config.limits.generation_timeout_ms),
                execution_timeout: Duration::from_millis(config.limits.execution_timeout_ms),
            };
            Ok(Self::new(
                OpenAiGenerator::new(&config.ai)?,
                executor_from_config(config),
                SqlGuard::new(config.guard.dialect),
                SchemaCache::new(config.cache.ttl()),
                options,
            ))
        }
    }
}

#[cfg(feature = "sqlite")]
pub use wiring::{executor_from_config, SqlitePipeline};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Column, Number, Row, SchemaDefinition, TableSchema, Value};
    use crate::generator::VIOLATION_SENTINEL;
    use crate::guard::{MULTIPLE_STATEMENTS_REASON, ONLY_SELECT_REASON};
    use crate::output::ResponseClass;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Generator that replays a fixed reply and records the schema it was shown
    #[derive(Default)]
    struct ScriptedGenerator {
        reply: Option<String>,
        delay: Option<Duration>,
        calls: AtomicUsize,
        seen_schema: Mutex<Option<String>>,
    }

    impl ScriptedGenerator {
        fn replying(reply: &str) -> Self {
            Self { reply: Some(reply.to_string()), ..Self::default() }
        }

        fn failing() -> Self {
            Self::default()
        }
    }

    impl Generator for ScriptedGenerator {
        async fn generate(&self, _question: &str, schema: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.seen_schema.lock().unwrap() = Some(schema.to_string());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.reply
                .clone()
                .ok_or_else(|| SentryError::generation_failed("connection reset by model host"))
        }
    }

    /// Executor with a fixed schema and canned rows, counting every call
    #[derive(Default)]
    struct RecordingExecutor {
        fail_execute: bool,
        introspections: AtomicUsize,
        executed: Mutex<Vec<String>>,
    }

    impl RecordingExecutor {
        fn failing() -> Self {
            Self { fail_execute: true, ..Self::default() }
        }

        fn executed(&self) -> Vec<String> {
            self.executed.lock().unwrap().clone()
        }
    }

    impl Executor for RecordingExecutor {
        async fn introspect_schema(&self) -> Result<SchemaDefinition> {
            self.introspections.fetch_add(1, Ordering::SeqCst);
            Ok(SchemaDefinition::new(vec![TableSchema::new(
                "Products",
                vec![Column::new("Id", "INTEGER"), Column::new("Name", "TEXT")],
            )]))
        }

        async fn execute(&self, sql: &str) -> Result<ResultSet> {
            self.executed.lock().unwrap().push(sql.to_string());
            if self.fail_execute {
                return Err(SentryError::execution_failed(
                    "SQLITE_CORRUPT: database disk image is malformed",
                ));
            }
            Ok(ResultSet::new(
                vec!["Id".to_string(), "Name".to_string()],
                vec![Row::new(vec![
                    ("Id".to_string(), Value::Number(Number::Integer(1))),
                    ("Name".to_string(), Value::Text("Tea".to_string())),
                ])],
            ))
        }
    }

    fn pipeline(
        generator: ScriptedGenerator,
        executor: RecordingExecutor,
    ) -> QueryPipeline<ScriptedGenerator, RecordingExecutor> {
        QueryPipeline::new(
            generator,
            executor,
            SqlGuard::default(),
            SchemaCache::default(),
            PipelineOptions::default(),
        )
    }

    #[tokio::test]
    async fn test_select_reaches_success() {
        let p = pipeline(ScriptedGenerator::replying("SELECT * FROM Products"), RecordingExecutor::default());

        let outcome = p.handle("What products do we have?").await;
        let PipelineOutcome::Success { question, candidate, result_set } = outcome else {
            panic!("expected success, got {outcome:?}");
        };
        assert_eq!(question, "What products do we have?");
        assert_eq!(candidate, "SELECT * FROM Products");
        assert_eq!(result_set.len(), 1);
        assert_eq!(p.executor().executed(), vec!["SELECT * FROM Products"]);
    }

    #[tokio::test]
    async fn test_generator_sees_rendered_schema() {
        let p = pipeline(ScriptedGenerator::replying("SELECT 1"), RecordingExecutor::default());
        p.handle("anything").await;
        let seen = p.generator.seen_schema.lock().unwrap().clone();
        assert_eq!(seen.as_deref(), Some("Products (Id INTEGER, Name TEXT)\n"));
    }

    #[tokio::test]
    async fn test_drop_is_rejected_and_not_executed() {
        let p = pipeline(ScriptedGenerator::replying("DROP TABLE Products"), RecordingExecutor::default());

        let outcome = p.handle("Remove the products table").await;
        let PipelineOutcome::Rejected { candidate, reason, detected_statement_kind, .. } = outcome else {
            panic!("expected rejection, got {outcome:?}");
        };
        assert_eq!(candidate, "DROP TABLE Products");
        assert!(reason.contains("Only SELECT"));
        assert_eq!(reason, ONLY_SELECT_REASON);
        assert_eq!(detected_statement_kind.as_deref(), Some("Drop"));
        assert!(p.executor().executed().is_empty());
    }

    #[tokio::test]
    async fn test_stacked_query_is_rejected() {
        let p = pipeline(
            ScriptedGenerator::replying("SELECT * FROM Products; DELETE FROM Orders;"),
            RecordingExecutor::default(),
        );

        let outcome = p.handle("Show products").await;
        let PipelineOutcome::Rejected { reason, .. } = outcome else {
            panic!("expected rejection, got {outcome:?}");
        };
        assert!(reason.contains("Multiple statements"));
        assert_eq!(reason, MULTIPLE_STATEMENTS_REASON);
        assert!(p.executor().executed().is_empty());
    }

    #[tokio::test]
    async fn test_empty_question_is_input_error() {
        let p = pipeline(ScriptedGenerator::replying("SELECT 1"), RecordingExecutor::default());

        for text in ["", "   ", "\n\t"] {
            assert_eq!(
                p.handle(text).await,
                PipelineOutcome::InputError { message: "Please ask a question.".to_string() }
            );
        }
        assert_eq!(p.executor().introspections.load(Ordering::SeqCst), 0);
        assert_eq!(p.generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_sentinel_short_circuits_to_security_alert() {
        let p = pipeline(ScriptedGenerator::replying(VIOLATION_SENTINEL), RecordingExecutor::default());

        let outcome = p.handle("Delete every order").await;
        assert_eq!(
            outcome,
            PipelineOutcome::SecurityAlert { message: SECURITY_ALERT_MESSAGE.to_string() }
        );
        assert!(p.executor().executed().is_empty());
    }

    #[tokio::test]
    async fn test_execution_fault_is_opaque() {
        let p = pipeline(ScriptedGenerator::replying("SELECT * FROM Products"), RecordingExecutor::failing());

        let outcome = p.handle("Show products").await;
        assert_eq!(outcome, PipelineOutcome::ExecutionError);

        let json = outcome.into_response().to_json().unwrap().to_string();
        assert!(!json.contains("SQLITE_CORRUPT"));
        assert!(!json.contains("malformed"));
        assert!(json.contains("An internal error occurred."));
    }

    #[tokio::test]
    async fn test_generation_fault_is_opaque() {
        let p = pipeline(ScriptedGenerator::failing(), RecordingExecutor::default());

        let outcome = p.handle("Show products").await;
        assert_eq!(outcome, PipelineOutcome::ExecutionError);
        assert!(p.executor().executed().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_generation_timeout_is_execution_error() {
        let generator = ScriptedGenerator {
            delay: Some(Duration::from_secs(120)),
            ..ScriptedGenerator::replying("SELECT 1")
        };
        let p = pipeline(generator, RecordingExecutor::default());

        assert_eq!(p.handle("slow").await, PipelineOutcome::ExecutionError);
        assert!(p.executor().executed().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_request_keeps_cached_schema() {
        let generator = ScriptedGenerator {
            delay: Some(Duration::from_secs(30)),
            ..ScriptedGenerator::replying("SELECT * FROM Products")
        };
        let p = pipeline(generator, RecordingExecutor::default());

        let abandoned = tokio::time::timeout(Duration::from_secs(1), p.handle("slow")).await;
        assert!(abandoned.is_err());
        assert!(p.cache().peek().await.is_some());
        assert!(p.executor().executed().is_empty());

        assert!(matches!(p.handle("slow").await, PipelineOutcome::Success { .. }));
        assert_eq!(p.executor().introspections.load(Ordering::SeqCst), 1);
        assert_eq!(p.generator().calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_schema_is_cached_across_requests() {
        let p = pipeline(ScriptedGenerator::replying("SELECT * FROM Products"), RecordingExecutor::default());

        for _ in 0..3 {
            assert!(matches!(p.handle("again").await, PipelineOutcome::Success { .. }));
        }
        assert_eq!(p.executor().introspections.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_introspection() {
        let p = Arc::new(pipeline(
            ScriptedGenerator::replying("SELECT * FROM Products"),
            RecordingExecutor::default(),
        ));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let p = Arc::clone(&p);
                tokio::spawn(async move { p.handle(&format!("question {i}")).await })
            })
            .collect();
        for handle in handles {
            assert!(matches!(handle.await.unwrap(), PipelineOutcome::Success { .. }));
        }
        assert_eq!(p.executor().introspections.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_question_rules() {
        assert!(Question::new("").is_err());
        assert!(Question::new(" \t\n").is_err());
        assert_eq!(Question::new("  hi  ").unwrap().as_str(), "  hi  ");
    }

    #[test]
    fn test_stage_transitions() {
        assert!(Stage::Start.can_advance_to(Stage::SchemaResolved));
        assert!(Stage::Generated.can_advance_to(Stage::Rejected));
        assert!(Stage::Validated.can_advance_to(Stage::ExecutionFailed));
        assert!(Stage::ExecutionFailed.can_advance_to(Stage::Completed));
        assert!(Stage::SchemaResolved.can_advance_to(Stage::Errored));

        assert!(!Stage::Start.can_advance_to(Stage::Generated));
        assert!(!Stage::Rejected.can_advance_to(Stage::Executed));
        assert!(!Stage::Generated.can_advance_to(Stage::Executed));
        assert!(!Stage::Completed.can_advance_to(Stage::Errored));
        assert!(!Stage::Errored.can_advance_to(Stage::Completed));
    }

    #[test]
    fn test_outcome_responses() {
        let response =
            PipelineOutcome::SecurityAlert { message: SECURITY_ALERT_MESSAGE.to_string() }
                .into_response();
        assert_eq!(response.class, ResponseClass::BadRequest);
        let json = response.to_json().unwrap();
        assert_eq!(json["error"], "Safety Protocol Engaged");
        assert_eq!(json["details"], SECURITY_ALERT_MESSAGE);
        assert_eq!(json["queryAttempted"], BLOCKED_BY_AI);

        let response = PipelineOutcome::Rejected {
            question: "q".to_string(),
            candidate: "DELETE FROM Orders".to_string(),
            reason: ONLY_SELECT_REASON.to_string(),
            detected_statement_kind: Some("Delete".to_string()),
        }
        .into_response();
        let json = response.to_json().unwrap();
        assert_eq!(json["queryAttempted"], "DELETE FROM Orders");

        let response = PipelineOutcome::InputError { message: EMPTY_QUESTION_MESSAGE.to_string() }
            .into_response();
        assert_eq!(response.class, ResponseClass::BadRequest);
        assert_eq!(response.to_json().unwrap()["error"]["code"], "INVALID_INPUT");
    }
}
