//! Minimal MCP server over newline-delimited JSON-RPC (stdio transport).

use super::{find_tool, tools, TOOLS_SERVER_NAME};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

pub const PROTOCOL_VERSION: &str = "2024-11-05";

const PARSE_ERROR: i64 = -32700;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;

#[derive(Debug, Deserialize)]
struct Request {
    /// Absent for notifications.
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Option<Value>,
}

fn ok(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn err(id: Value, code: i64, message: impl Into<String>) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "error": { "code": code, "message": message.into() } })
}

/// Answer one JSON-RPC line. Returns `None` for notifications.
pub fn handle_request(line: &str) -> Option<Value> {
    let req: Request = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(e) => return Some(err(Value::Null, PARSE_ERROR, e.to_string())),
    };
    let id = req.id?;
    let response = match req.method.as_str() {
        "initialize" => ok(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": { "name": TOOLS_SERVER_NAME, "version": env!("CARGO_PKG_VERSION") },
            }),
        ),
        "ping" => ok(id, json!({})),
        "tools/list" => {
            let list: Vec<Value> = tools()
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "inputSchema": t.input_schema(),
                    })
                })
                .collect();
            ok(id, json!({ "tools": list }))
        }
        "tools/call" => {
            let name = req
                .params
                .as_ref()
                .and_then(|p| p.get("name"))
                .and_then(Value::as_str);
            match name.and_then(find_tool) {
                Some(tool) => {
                    log::debug!("tools-server: call {}", tool.name);
                    ok(
                        id,
                        json!({ "content": [{ "type": "text", "text": tool.run() }], "isError": false }),
                    )
                }
                None => err(
                    id,
                    INVALID_PARAMS,
                    format!("unknown tool: {}", name.unwrap_or("<missing>")),
                ),
            }
        }
        other => err(id, METHOD_NOT_FOUND, format!("method not found: {}", other)),
    };
    Some(response)
}

/// Serve requests from `input` until end of input, writing one response line per request.
pub async fn serve<R, W>(input: R, mut output: W) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(response) = handle_request(line) {
            let mut out = response.to_string();
            out.push('\n');
            output.write_all(out.as_bytes()).await?;
            output.flush().await?;
        }
    }
    Ok(())
}

pub async fn serve_stdio() -> std::io::Result<()> {
    serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await
}
