//! sqlsentry - Guarded natural-language querying for SQL databases
//!
//! A question goes in, a text-to-SQL generator proposes a query, and the query runs only if
//! it is a single read-only `SELECT`. Everything else is refused with a structured rejection.
//!
//! # Safety Model
//! - The generator may refuse outright with a reserved sentinel (destructive intent)
//! - Every candidate is parsed and allow-listed by [`guard::SqlGuard`]; text is never trusted
//! - Execution uses a read-only database handle
//! - Backend failures are logged, never echoed to callers
//!
//! # Module Organization
//! - [`error`] - Error types and handling
//! - [`output`] - JSON response bodies
//! - [`engine`] - Executor trait, schema and row types
//! - [`guard`] - AST-based SQL allow-list
//! - [`cache`] - Single-flight schema cache
//! - [`generator`] - Text-to-SQL generator trait and HTTP client
//! - [`pipeline`] - Request orchestration
//! - [`config`] - Configuration management
//! - [`logging`] - Tracing subscriber setup
//! - [`mcp`] - MCP server over stdio

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod generator;
pub mod guard;
pub mod logging;
pub mod mcp;
pub mod output;
pub mod pipeline;

pub use cache::SchemaCache;
pub use config::{resolve_config, save_config, AppConfig, ConfigLocation};
pub use engine::{Executor, ResultSet, Row, SchemaDefinition, Value};
pub use error::{Result, SentryError};
pub use generator::{Generator, OpenAiGenerator};
pub use guard::{SqlDialect, SqlGuard, Verdict};
pub use output::{Response, ResponseClass};
pub use pipeline::{PipelineOptions, PipelineOutcome, QueryPipeline};

#[cfg(feature = "sqlite")]
pub use engine::sqlite::SqliteExecutor;
#[cfg(feature = "sqlite")]
pub use pipeline::SqlitePipeline;
