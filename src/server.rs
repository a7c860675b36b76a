//! Request dispatcher and the stdio transport loop.
//!
//! Every tool-call failure is converted into an error-flagged tool response;
//! a request can never take the process down.

use log::{debug, error, info, warn};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::db::DatabaseManager;
use crate::error::ServerError;
use crate::rpc::{
    InitializeResult, JsonRpcRequest, JsonRpcResponse, ServerCapabilities, ServerInfo,
    ToolCallParams, ToolsCapability, ToolsList,
};
use crate::tools::tool_catalog;
use crate::validators::{
    check_query_safety, validate_query, validate_table, ConnectionArguments, QueryArguments,
    TableArguments,
};

pub const PROTOCOL_VERSION: &str = "2025-03-26";

#[derive(Clone)]
pub struct Dispatcher {
    db: Arc<DatabaseManager>,
}

impl Dispatcher {
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }

    pub async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        match request.method.as_str() {
            "initialize" => JsonRpcResponse::success(
                request.id,
                json!(InitializeResult {
                    protocol_version: PROTOCOL_VERSION.to_string(),
                    capabilities: ServerCapabilities {
                        tools: Some(ToolsCapability {
                            list_changed: false,
                        }),
                    },
                    server_info: ServerInfo {
                        name: env!("CARGO_PKG_NAME").to_string(),
                        version: env!("CARGO_PKG_VERSION").to_string(),
                    },
                }),
            ),
            "tools/list" => {
                debug!("Listing available tools");
                JsonRpcResponse::success(
                    request.id,
                    json!(ToolsList {
                        tools: tool_catalog()
                    }),
                )
            }
            "tools/call" => {
                let params = match request.params {
                    Some(params) => params,
                    None => {
                        return JsonRpcResponse::error(
                            request.id,
                            -32602,
                            "Missing parameters".to_string(),
                        )
                    }
                };
                match serde_json::from_value::<ToolCallParams>(params) {
                    Ok(call) => {
                        let result = self.call_tool(&call.name, call.arguments).await;
                        JsonRpcResponse::success(request.id, result)
                    }
                    Err(e) => JsonRpcResponse::error(
                        request.id,
                        -32602,
                        format!("Invalid tool call parameters: {e}"),
                    ),
                }
            }
            _ => {
                warn!("Unknown method: {}", request.method);
                JsonRpcResponse::error(
                    request.id,
                    -32601,
                    format!("Method not found: {}", request.method),
                )
            }
        }
    }

    /// Run one tool call to completion. Failures become an `isError` payload
    /// carrying the failure's message text.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Value {
        let arguments = if arguments.is_null() {
            json!({})
        } else {
            arguments
        };

        match self.dispatch(name, arguments).await {
            Ok(text) => json!({
                "content": [{ "type": "text", "text": text }]
            }),
            Err(e) => {
                error!("Tool '{name}' failed: {e}");
                json!({
                    "content": [{ "type": "text", "text": format!("Error: {e}") }],
                    "isError": true
                })
            }
        }
    }

    async fn dispatch(&self, name: &str, arguments: Value) -> Result<String, ServerError> {
        match name {
            "execute_query" => {
                let args: QueryArguments = parse_arguments(arguments)?;
                validate_query(&args)?;
                check_query_safety(&args.query)?;

                let rows = self
                    .db
                    .query(&args.query, &args.params, args.connection.as_deref())
                    .await?;
                Ok(format!(
                    "Query executed on connection '{}':\n{}",
                    self.db.resolve_name(args.connection.as_deref()),
                    pretty(&json!(rows))
                ))
            }
            "list_tables" => {
                let args: ConnectionArguments = parse_arguments(arguments)?;
                let tables = self.db.list_tables(args.connection.as_deref()).await?;
                Ok(format!(
                    "Available tables in '{}':\n{}",
                    self.db.resolve_name(args.connection.as_deref()),
                    tables.join("\n")
                ))
            }
            "describe_table" => {
                let args: TableArguments = parse_arguments(arguments)?;
                validate_table(&args)?;
                let schema = self
                    .db
                    .table_schema(&args.table_name, args.connection.as_deref())
                    .await?;
                Ok(format!(
                    "Table '{}' structure in '{}':\n{}",
                    args.table_name,
                    self.db.resolve_name(args.connection.as_deref()),
                    pretty(&json!(schema))
                ))
            }
            "test_connection" => {
                let args: ConnectionArguments = parse_arguments(arguments)?;
                let ok = self.db.test_connection(args.connection.as_deref()).await;
                Ok(format!(
                    "Database connection '{}': {}",
                    self.db.resolve_name(args.connection.as_deref()),
                    if ok { "SUCCESS" } else { "FAILED" }
                ))
            }
            "list_connections" => {
                let default = self.db.default_connection();
                let lines: Vec<String> = self
                    .db
                    .available_connections()
                    .into_iter()
                    .map(|name| {
                        if name == default {
                            format!("{name} (default)")
                        } else {
                            name
                        }
                    })
                    .collect();
                Ok(format!(
                    "Available database connections:\n{}",
                    lines.join("\n")
                ))
            }
            "get_connection_info" => {
                let args: ConnectionArguments = parse_arguments(arguments)?;
                let info = self.db.connection_info(args.connection.as_deref())?;
                Ok(format!(
                    "Connection '{}' information:\n{}",
                    self.db.resolve_name(args.connection.as_deref()),
                    pretty(&info)
                ))
            }
            "test_all_connections" => {
                let results = self.db.test_all_connections().await;
                let lines: Vec<String> = results
                    .into_iter()
                    .map(|(name, ok)| {
                        format!("{name}: {}", if ok { "SUCCESS" } else { "FAILED" })
                    })
                    .collect();
                Ok(format!("All connection test results:\n{}", lines.join("\n")))
            }
            _ => Err(ServerError::Validation(format!("Unknown tool: {name}"))),
        }
    }
}

fn parse_arguments<T: serde::de::DeserializeOwned>(arguments: Value) -> Result<T, ServerError> {
    serde_json::from_value(arguments)
        .map_err(|e| ServerError::Validation(format!("Invalid arguments: {e}")))
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "Error formatting results".to_string())
}

/// Serve JSON-RPC over stdio until the client closes stdin.
pub async fn run_stdio(dispatcher: Dispatcher) -> Result<(), Box<dyn std::error::Error>> {
    let stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    let reader = BufReader::new(stdin);
    let mut lines = reader.lines();

    info!("MCP server listening on stdio");

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }

                debug!("Received message (len={}): {line}", line.len());
                match serde_json::from_str::<JsonRpcRequest>(&line) {
                    Ok(request) => {
                        // Notifications get no response
                        if request.method.starts_with("notifications/")
                            || request.method == "initialized"
                        {
                            debug!("Ignoring notification: {}", request.method);
                            continue;
                        }

                        let response = dispatcher.handle_request(request).await;
                        match serde_json::to_string(&response) {
                            Ok(text) => {
                                if let Err(e) = write_line(&mut stdout, &text).await {
                                    error!("Failed to write response: {e}");
                                }
                            }
                            Err(e) => {
                                error!("Failed to serialize response: {e}");
                                let fallback = JsonRpcResponse::error(
                                    None,
                                    -32603,
                                    "Internal error".to_string(),
                                );
                                if let Ok(text) = serde_json::to_string(&fallback) {
                                    let _ = write_line(&mut stdout, &text).await;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Failed to parse request: {e}");
                        let response =
                            JsonRpcResponse::error(None, -32700, "Parse error".to_string());
                        if let Ok(text) = serde_json::to_string(&response) {
                            let _ = write_line(&mut stdout, &text).await;
                        }
                    }
                }
            }
            Ok(None) => {
                info!("stdin closed, client disconnected");
                break;
            }
            Err(e) => {
                warn!("Error reading from stdin: {e}");
                if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    break;
                }
                tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            }
        }
    }

    Ok(())
}

async fn write_line(
    stdout: &mut tokio::io::Stdout,
    response: &str,
) -> Result<(), std::io::Error> {
    stdout.write_all(response.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await?;
    Ok(())
}
