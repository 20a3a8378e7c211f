//! Text-to-SQL Generator
//!
//! The generator turns a question plus the rendered schema into candidate SQL.
//! Its output is untrusted: the pipeline always passes it through the guard.
//!
//! # Destructive Intent Sentinel
//! The backend is instructed to answer with exactly [`VIOLATION_SENTINEL`]
//! when the user asks to modify data. The pipeline checks for it before the
//! guard runs and never forwards such output.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::AiSettings;
use crate::error::{Result, SentryError};

/// Reserved generator output meaning "this request wants to mutate data"
pub const VIOLATION_SENTINEL: &str = "VIOLATION_REQUEST";

/// Generator trait
pub trait Generator: Send + Sync {
    /// Produce candidate SQL text for `question` against `schema`
    fn generate(
        &self,
        question: &str,
        schema: &str,
    ) -> impl Future<Output = Result<String>> + Send;
}

/// True if the generator reported destructive intent
#[must_use]
pub fn is_violation(output: &str) -> bool {
    output.contains(VIOLATION_SENTINEL)
}

/// System prompt carrying the generation rules and the schema
#[must_use]
pub fn build_system_prompt(schema: &str) -> String {
    format!(
        r"You are a Senior SQL Expert specializing in SQLite.
Your task is to convert the user's natural language question into a valid SQL query.

RULES:
1. Use ONLY the provided database schema.
2. Return ONLY the raw SQL query. Do not use Markdown blocks (```sql), do not add explanations.
3. The query must be a Read-Only SELECT statement.
4. If the user asks to MODIFY data (INSERT, UPDATE, DELETE, DROP, ALTER) or perform destructive actions, YOU MUST RETURN EXACTLY: '{VIOLATION_SENTINEL}'.
5. Do NOT generate SQL if the intent is destructive.
6. If the request cannot be satisfied with the schema, return 'SELECT NULL'.
7. Always use 'SELECT DISTINCT' when retrieving lists of names or entities to avoid duplicates.
8. Use meaningful aliases for tables (e.g., 'p' for Products, 'o' for Orders) instead of T1, T2.
9. For string comparisons, prefer the LIKE operator to handle potential case sensitivity issues (e.g. WHERE Region LIKE 'Milano').

DB SCHEMA:
{schema}
"
    )
}

/// Strip markdown code fences some models wrap around SQL
#[must_use]
pub fn clean_output(output: &str) -> String {
    output.replace("```sql", "").replace("```", "").trim().to_string()
}

// ============================================================================
// OpenAI-compatible chat completions
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

impl ChatResponse {
    /// Trimmed content of the first choice; empty if the model sent none
    fn into_text(self) -> String {
        self.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    }
}

/// Generator backed by an OpenAI-compatible `/chat/completions` endpoint
#[derive(Debug, Clone)]
pub struct OpenAiGenerator {
    client: reqwest::Client,
    model_id: String,
    endpoint: String,
    api_key: Option<String>,
}

impl OpenAiGenerator {
    /// Build a generator from settings
    ///
    /// Fails if the model id or endpoint is missing.
    pub fn new(settings: &AiSettings) -> Result<Self> {
        if settings.model_id.trim().is_empty() {
            return Err(SentryError::config_error("AI model_id is missing in configuration"));
        }
        if settings.endpoint.trim().is_empty() {
            return Err(SentryError::config_error("AI endpoint is missing in configuration"));
        }

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| SentryError::config_error(format!("Could not build HTTP client: {e}")))?;

        Ok(Self {
            client,
            model_id: settings.model_id.clone(),
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
            api_key: settings.resolve_api_key()?,
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.endpoint)
    }
}

impl Generator for OpenAiGenerator {
    async fn generate(&self, question: &str, schema: &str) -> Result<String> {
        let system = build_system_prompt(schema);
        let body = ChatRequest {
            model: &self.model_id,
            messages: vec![
                ChatMessage { role: "system", content: &system },
                ChatMessage { role: "user", content: question },
            ],
            temperature: 0.0,
        };

        let mut request = self.client.post(self.completions_url()).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SentryError::generation_failed(format!("Chat completion request failed: {e}")))?
            .error_for_status()
            .map_err(|e| SentryError::generation_failed(format!("Chat completion rejected: {e}")))?;

        let reply: ChatResponse = response
            .json()
            .await
            .map_err(|e| SentryError::generation_failed(format!("Malformed chat completion: {e}")))?;

        let text = reply.into_text();
        debug!(model = %self.model_id, chars = text.len(), "Generator replied");

        // The sentinel survives cleaning untouched
        Ok(clean_output(&text))
    }
}
