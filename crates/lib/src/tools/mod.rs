//! Built-in capabilities the agent backend may call, served over MCP stdio by `switchboard tools-server`.

mod server;

pub use server::{handle_request, serve, serve_stdio, PROTOCOL_VERSION};

use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::Path;

/// Server name the backend sees; tool ids are `mcp__<server>__<tool>`.
pub const TOOLS_SERVER_NAME: &str = "switchboard-tools";

/// One callable capability: name, description, and a handler producing text.
#[derive(Debug, Clone, Copy)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    run: fn() -> String,
}

impl ToolSpec {
    pub fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    pub fn run(&self) -> String {
        (self.run)()
    }
}

const TOOLS: &[ToolSpec] = &[
    ToolSpec {
        name: "get_system_info",
        description: "Get system information (hostname, OS, architecture, runtime version)",
        run: system_info,
    },
    ToolSpec {
        name: "get_time",
        description: "Get the current date and time in UTC",
        run: current_time,
    },
];

pub fn tools() -> &'static [ToolSpec] {
    TOOLS
}

pub fn find_tool(name: &str) -> Option<&'static ToolSpec> {
    TOOLS.iter().find(|t| t.name == name)
}

/// Fully-qualified tool ids to pass to the backend's allow list.
pub fn allowed_tool_names() -> Vec<String> {
    TOOLS
        .iter()
        .map(|t| format!("mcp__{}__{}", TOOLS_SERVER_NAME, t.name))
        .collect()
}

/// MCP config JSON for the backend: the built-in tool server (this executable) plus any extra servers.
/// An extra server named like the built-in one is ignored.
pub fn mcp_config(exe: &Path, extra: &BTreeMap<String, Value>) -> Value {
    let mut servers = serde_json::Map::new();
    servers.insert(
        TOOLS_SERVER_NAME.to_string(),
        json!({
            "type": "stdio",
            "command": exe.to_string_lossy(),
            "args": ["tools-server"],
        }),
    );
    for (name, server) in extra {
        if name == TOOLS_SERVER_NAME {
            log::warn!("ignoring extra MCP server named {}", name);
            continue;
        }
        servers.insert(name.clone(), server.clone());
    }
    json!({ "mcpServers": Value::Object(servers) })
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

fn system_info() -> String {
    format!(
        "Hostname: {}\nOS: {} ({})\nArch: {}\nRuntime: switchboard {}",
        hostname(),
        std::env::consts::OS,
        std::env::consts::FAMILY,
        std::env::consts::ARCH,
        env!("CARGO_PKG_VERSION"),
    )
}

fn current_time() -> String {
    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string()
}
