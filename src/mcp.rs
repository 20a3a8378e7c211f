//! MCP (Model Context Protocol) Server
//!
//! JSON-RPC 2.0 over stdio, one request per line, one response per line.
//!
//! # MCP Tools
//!
//! - `ask` - Answer a natural-language question through the full pipeline
//! - `check` - Run the SQL guard over a statement without executing it
//!
//! Start with `sqlsentry mcp`.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info};

use crate::engine::Executor;
use crate::generator::Generator;
use crate::output::{AskRequest, CheckRequest};
use crate::pipeline::QueryPipeline;

const PROTOCOL_VERSION: &str = "2024-11-05";

const ASK_DESCRIPTION: &str = "Answer a question about the database in plain language. \
    The question is translated to a single read-only SELECT, checked by an SQL guard, and \
    executed only if it passes. Requests to change data are refused with a \
    'Safety Protocol Engaged' body.";

const CHECK_DESCRIPTION: &str = "Check whether a SQL statement would be allowed to run. \
    Parses the statement and reports the verdict and the detected statement kind. \
    Never executes anything.";

const PARSE_ERROR: i32 = -32700;
const INTERNAL_ERROR: i32 = -32603;

#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    #[allow(dead_code)]
    jsonrpc: String,
    id: Option<Value>,
    method: String,
    params: Option<Value>,
}

#[derive(Debug, Serialize)]
struct JsonRpcResponse {
    jsonrpc: &'static str,
    id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

impl JsonRpcResponse {
    const fn result(id: Option<Value>, result: Value) -> Self {
        Self { jsonrpc: "2.0", id, result: Some(result), error: None }
    }

    const fn error(id: Option<Value>, code: i32, message: String) -> Self {
        Self { jsonrpc: "2.0", id, result: None, error: Some(JsonRpcError { code, message }) }
    }
}

#[derive(Debug, Serialize)]
struct TextContent {
    #[serde(rename = "type")]
    content_type: &'static str,
    text: String,
}

/// MCP tool call result
#[derive(Debug, Serialize)]
struct CallToolResult {
    content: Vec<TextContent>,
    #[serde(rename = "isError")]
    is_error: bool,
}

impl CallToolResult {
    fn json(data: &impl Serialize, is_error: bool) -> Result<Value> {
        let text = serde_json::to_string_pretty(data)?;
        let content = vec![TextContent { content_type: "text", text }];
        Ok(serde_json::to_value(Self { content, is_error })?)
    }
}

/// Serve MCP over the process's stdin and stdout
pub async fn serve<G: Generator, E: Executor>(pipeline: &QueryPipeline<G, E>) -> Result<()> {
    info!("MCP server listening on stdio");
    serve_io(pipeline, BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await
}

/// Serve MCP over an arbitrary line-oriented transport
///
/// Returns when `reader` reaches end of input.
pub async fn serve_io<G, E, R, W>(
    pipeline: &QueryPipeline<G, E>,
    reader: R,
    mut writer: W,
) -> Result<()>
where
    G: Generator,
    E: Executor,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<JsonRpcRequest>(&line) {
            Ok(request) => handle_request(pipeline, request).await,
            Err(e) => JsonRpcResponse::error(None, PARSE_ERROR, format!("Parse error: {e}")),
        };

        // Notifications carry no id and get no reply
        if response.id.is_none() && response.error.is_none() {
            continue;
        }

        let mut out = serde_json::to_vec(&response)?;
        out.push(b'\n');
        writer.write_all(&out).await?;
        writer.flush().await?;
    }

    Ok(())
}

async fn handle_request<G: Generator, E: Executor>(
    pipeline: &QueryPipeline<G, E>,
    request: JsonRpcRequest,
) -> JsonRpcResponse {
    debug!(method = %request.method, "MCP request");
    let result = match request.method.as_str() {
        "initialize" => Ok(initialize()),
        "notifications/initialized" => Ok(Value::Null),
        "tools/list" => list_tools(),
        "tools/call" => call_tool(pipeline, request.params).await,
        other => Err(anyhow!("Unknown method: {other}")),
    };

    match result {
        Ok(value) => JsonRpcResponse::result(request.id, value),
        Err(e) => JsonRpcResponse::error(request.id, INTERNAL_ERROR, e.to_string()),
    }
}

fn initialize() -> Value {
    serde_json::json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": { "tools": {} },
        "serverInfo": {
            "name": "sqlsentry",
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}

fn list_tools() -> Result<Value> {
    Ok(serde_json::json!({
        "tools": [
            {
                "name": "ask",
                "description": ASK_DESCRIPTION,
                "inputSchema": serde_json::to_value(schemars::schema_for!(AskRequest))?
            },
            {
                "name": "check",
                "description": CHECK_DESCRIPTION,
                "inputSchema": serde_json::to_value(schemars::schema_for!(CheckRequest))?
            }
        ]
    }))
}

async fn call_tool<G: Generator, E: Executor>(
    pipeline: &QueryPipeline<G, E>,
    params: Option<Value>,
) -> Result<Value> {
    let params = params.ok_or_else(|| anyhow!("Missing params"))?;
    let name = params["name"].as_str().ok_or_else(|| anyhow!("Missing tool name"))?;
    let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);

    match name {
        "ask" => {
            let request: AskRequest = serde_json::from_value(arguments)
                .map_err(|e| anyhow!("Invalid arguments for ask: {e}"))?;
            let response = pipeline.handle(&request.text).await.into_response();
            CallToolResult::json(&response.body, !response.is_ok())
        }
        "check" => {
            let request: CheckRequest = serde_json::from_value(arguments)
                .map_err(|e| anyhow!("Invalid arguments for check: {e}"))?;
            let verdict = pipeline.check(&request.sql);
            CallToolResult::json(&verdict, false)
        }
        _ => Err(anyhow!("Unknown tool: {name}")),
    }
}
