//! JSON Response Types
//!
//! Transport-agnostic request and response bodies for the ask flow. The CLI
//! prints them; the MCP server wraps them in tool results; an HTTP layer
//! would map [`ResponseClass`] to a status code.
//!
//! # Output Contract
//! - Answer: `{"question": "...", "generatedQuery": "...", "data": [{...}]}`
//! - Rejection: `{"error": "Safety Protocol Engaged", "details": "...", "queryAttempted": "..."}`
//! - Error: `{"error": {"code": "...", "message": "..."}}`
//!
//! Error bodies never carry database or backend diagnostics.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::engine::ResultSet;

/// Top-level error label on every rejection body
pub const SAFETY_PROTOCOL_ENGAGED: &str = "Safety Protocol Engaged";

/// Message for empty questions
pub const EMPTY_QUESTION_MESSAGE: &str = "Please ask a question.";

/// Message for every internal failure
pub const INTERNAL_ERROR_MESSAGE: &str = "An internal error occurred.";

/// Incoming question
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AskRequest {
    /// Natural-language question about the data
    pub text: String,
}

/// Incoming guard-only check
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CheckRequest {
    /// SQL text to validate (never executed)
    pub sql: String,
}

/// Coarse outcome class, for transports that need a status code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    Ok,
    BadRequest,
    InternalError,
}

impl ResponseClass {
    /// Process exit code used by the CLI
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::InternalError => 1,
            Self::BadRequest => 2,
        }
    }
}

/// Successful answer
#[derive(Debug, Clone, Serialize)]
pub struct AnswerBody {
    pub question: String,

    #[serde(rename = "generatedQuery")]
    pub generated_query: String,

    pub data: ResultSet,
}

/// Guard rejection or generator security alert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionBody {
    pub error: String,

    pub details: String,

    #[serde(rename = "queryAttempted")]
    pub query_attempted: String,
}

impl RejectionBody {
    pub fn new(details: impl Into<String>, query_attempted: impl Into<String>) -> Self {
        Self {
            error: SAFETY_PROTOCOL_ENGAGED.to_string(),
            details: details.into(),
            query_attempted: query_attempted.into(),
        }
    }
}

/// Error information structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable error code (e.g., "INVALID_INPUT", "INTERNAL_ERROR")
    pub code: String,

    /// Human-readable message, free of sensitive data
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self { code: code.into(), message: message.into() }
    }
}

/// Error envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorInfo,
}

impl ErrorEnvelope {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self { error: ErrorInfo::new("INVALID_INPUT", message) }
    }

    #[must_use]
    pub fn internal() -> Self {
        Self { error: ErrorInfo::new("INTERNAL_ERROR", INTERNAL_ERROR_MESSAGE) }
    }
}

/// Any response body
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ResponseBody {
    Answer(AnswerBody),
    Rejection(RejectionBody),
    Error(ErrorEnvelope),
}

/// A response body together with its class
#[derive(Debug, Clone)]
pub struct Response {
    pub class: ResponseClass,
    pub body: ResponseBody,
}

impl Response {
    #[must_use]
    pub const fn answer(body: AnswerBody) -> Self {
        Self { class: ResponseClass::Ok, body: ResponseBody::Answer(body) }
    }

    #[must_use]
    pub const fn rejection(body: RejectionBody) -> Self {
        Self { class: ResponseClass::BadRequest, body: ResponseBody::Rejection(body) }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self {
            class: ResponseClass::BadRequest,
            body: ResponseBody::Error(ErrorEnvelope::invalid_input(message)),
        }
    }

    #[must_use]
    pub fn internal_error() -> Self {
        Self { class: ResponseClass::InternalError, body: ResponseBody::Error(ErrorEnvelope::internal()) }
    }

    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self.class, ResponseClass::Ok)
    }

    /// Body as a JSON value
    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(&self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Row, Value};

    #[test]
    fn test_answer_body_field_names() {
        let response = Response::answer(AnswerBody {
            question: "What do we sell?".to_string(),
            generated_query: "SELECT DISTINCT Name FROM Products".to_string(),
            data: ResultSet::new(
                vec!["Name".to_string()],
                vec![Row::new(vec![("Name".to_string(), Value::Text("Tea".to_string()))])],
            ),
        });

        assert!(response.is_ok());
        insta::assert_json_snapshot!(response.body, @r###"
        {
          "question": "What do we sell?",
          "generatedQuery": "SELECT DISTINCT Name FROM Products",
          "data": [
            {
              "Name": "Tea"
            }
          ]
        }
        "###);
    }

    #[test]
    fn test_rejection_body_field_names() {
        let response =
            Response::rejection(RejectionBody::new("Only SELECT statements are allowed.", "DROP TABLE Products"));

        assert_eq!(response.class, ResponseClass::BadRequest);
        insta::assert_json_snapshot!(response.body, @r###"
        {
          "error": "Safety Protocol Engaged",
          "details": "Only SELECT statements are allowed.",
          "queryAttempted": "DROP TABLE Products"
        }
        "###);
    }

    #[test]
    fn test_error_bodies() {
        let json = Response::invalid_input(EMPTY_QUESTION_MESSAGE).to_json().unwrap();
        assert_eq!(json["error"]["code"], "INVALID_INPUT");
        assert_eq!(json["error"]["message"], "Please ask a question.");

        let response = Response::internal_error();
        assert_eq!(response.class, ResponseClass::InternalError);
        let json = response.to_json().unwrap();
        assert_eq!(json, serde_json::json!({"error": {"code": "INTERNAL_ERROR", "message": "An internal error occurred."}}));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(ResponseClass::Ok.exit_code(), 0);
        assert_eq!(ResponseClass::InternalError.exit_code(), 1);
        assert_eq!(ResponseClass::BadRequest.exit_code(), 2);
    }

    #[test]
    fn test_ask_request_schema() {
        let schema = serde_json::to_value(schemars::schema_for!(AskRequest)).unwrap();
        assert_eq!(schema["required"], serde_json::json!(["text"]));
        assert_eq!(schema["properties"]["text"]["type"], "string");
    }
}
