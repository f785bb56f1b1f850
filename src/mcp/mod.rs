//! Line-oriented JSON-RPC stdio transport. Wire framing is intentionally
//! minimal: one JSON object per line in on stdin, one JSON object per line
//! out on stdout, nothing else ever touches stdout. All logging goes to
//! stderr via `env_logger` so it never corrupts the protocol stream.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::tools::ToolContext;

const PROTOCOL_VERSION: &str = "2024-11-05";
const SERVER_NAME: &str = "aksfleet-mcp";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Deserialize)]
struct RpcRequest {
    #[allow(dead_code)]
    jsonrpc: Option<String>,
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Serialize)]
struct RpcResponse {
    jsonrpc: &'static str,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

#[derive(Debug, Serialize)]
struct RpcError {
    code: i32,
    message: String,
}

const PARSE_ERROR: i32 = -32700;
const METHOD_NOT_FOUND: i32 = -32601;

fn tool_catalog() -> Value {
    serde_json::json!([
        {
            "name": "check_node_pool_pressure",
            "description": "Report CPU/memory request pressure and pending-pod counts per node pool.",
            "inputSchema": {
                "type": "object",
                "properties": { "cluster": { "type": "string", "default": "all" } }
            }
        },
        {
            "name": "get_pod_health",
            "description": "Report unhealthy pods (crash-looping, OOMKilled, pending, failed) for a cluster.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "cluster": { "type": "string", "default": "all" },
                    "namespace": { "type": "string" },
                    "status_filter": { "type": "string", "enum": ["pending", "failed", "all"], "default": "all" }
                }
            }
        },
        {
            "name": "get_kubernetes_upgrade_status",
            "description": "Report control-plane/node-pool versions, available upgrades, and end-of-support state.",
            "inputSchema": {
                "type": "object",
                "properties": { "cluster": { "type": "string", "default": "all" } }
            }
        },
        {
            "name": "get_upgrade_progress",
            "description": "Report per-node upgrade progress state for an in-flight upgrade.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "cluster": { "type": "string", "default": "all" },
                    "node_pool": { "type": "string" }
                }
            }
        },
        {
            "name": "get_upgrade_duration_metrics",
            "description": "Report current-run and historical node-upgrade duration statistics for a node pool.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "cluster": { "type": "string", "default": "all" },
                    "node_pool": { "type": "string" },
                    "history_count": { "type": "integer", "default": 10 }
                },
                "required": ["node_pool"]
            }
        },
        {
            "name": "check_pdb_upgrade_risk",
            "description": "Report pod disruption budgets that would block or are blocking node eviction during an upgrade.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "cluster": { "type": "string", "default": "all" },
                    "node_pool": { "type": "string" },
                    "mode": { "type": "string", "enum": ["preflight", "live"], "default": "preflight" }
                }
            }
        }
    ])
}

const TOOL_NAMES: [&str; 6] = [
    "check_node_pool_pressure",
    "get_pod_health",
    "get_kubernetes_upgrade_status",
    "get_upgrade_progress",
    "get_upgrade_duration_metrics",
    "check_pdb_upgrade_risk",
];

async fn handle_request(ctx: &ToolContext, req: RpcRequest) -> Option<RpcResponse> {
    if req.method == "notifications/cancelled" {
        ctx.cancellation.cancel();
        return None;
    }

    let id = req.id?;

    let (result, error) = match req.method.as_str() {
        "initialize" => (
            Some(serde_json::json!({
                "protocolVersion": PROTOCOL_VERSION,
                "serverInfo": { "name": SERVER_NAME, "version": SERVER_VERSION },
                "capabilities": { "tools": {} }
            })),
            None,
        ),
        "tools/list" => (Some(serde_json::json!({ "tools": tool_catalog() })), None),
        "tools/call" => {
            let name = req.params.get("name").and_then(Value::as_str).unwrap_or_default();
            if !TOOL_NAMES.contains(&name) {
                (None, Some(RpcError { code: METHOD_NOT_FOUND, message: format!("unknown tool '{name}'") }))
            } else {
                let arguments = req.params.get("arguments").cloned().unwrap_or_else(|| serde_json::json!({}));
                let envelope = crate::tools::dispatch(ctx, name, arguments).await;
                let text = serde_json::to_string(&envelope).unwrap_or_else(|_| "{}".to_string());
                (
                    Some(serde_json::json!({ "content": [{ "type": "text", "text": text }] })),
                    None,
                )
            }
        }
        other => (None, Some(RpcError { code: METHOD_NOT_FOUND, message: format!("unknown method '{other}'") })),
    };

    Some(RpcResponse { jsonrpc: "2.0", id, result, error })
}

/// Run the stdio read-dispatch-write loop until stdin closes.
pub async fn serve(ctx: ToolContext) -> anyhow::Result<()> {
    run_loop(&ctx, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Generic over the transport so the read-dispatch-write loop can be driven
/// by an in-memory duplex in tests instead of real stdio.
async fn run_loop<R, W>(ctx: &ToolContext, reader: R, mut writer: W) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<RpcRequest>(trimmed) {
            Ok(req) => {
                let method = req.method.clone();
                let has_id = req.id.is_some();
                match handle_request(ctx, req).await {
                    Some(resp) => Some(resp),
                    None if has_id => None,
                    None => {
                        log::debug!("notification method={method} ignored");
                        None
                    }
                }
            }
            Err(e) => Some(RpcResponse {
                jsonrpc: "2.0",
                id: Value::Null,
                result: None,
                error: Some(RpcError { code: PARSE_ERROR, message: format!("invalid JSON-RPC request: {e}") }),
            }),
        };

        if let Some(resp) = response {
            let line = serde_json::to_string(&resp)?;
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    use crate::config::ClusterRegistry;
    use crate::domain::ThresholdBundle;

    fn ctx() -> ToolContext {
        let yaml = r#"
dev-eastus:
  environment: dev
  region: eastus
  subscription_id: "11111111-1111-1111-1111-111111111111"
  resource_group: rg-dev-eastus
  cluster_name: aks-dev-eastus
  kube_context: dev-eastus
"#;
        let registry = ClusterRegistry::from_yaml_str(yaml, "test").unwrap();
        ToolContext::new(registry, ThresholdBundle::default())
    }

    #[tokio::test]
    async fn initialize_returns_server_info() {
        let req = RpcRequest {
            jsonrpc: Some("2.0".to_string()),
            id: Some(serde_json::json!(1)),
            method: "initialize".to_string(),
            params: serde_json::json!({}),
        };
        let resp = handle_request(&ctx(), req).await.unwrap();
        assert!(resp.result.is_some());
        assert!(resp.error.is_none());
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let req = RpcRequest {
            jsonrpc: Some("2.0".to_string()),
            id: Some(serde_json::json!(2)),
            method: "bogus".to_string(),
            params: serde_json::json!({}),
        };
        let resp = handle_request(&ctx(), req).await.unwrap();
        assert_eq!(resp.error.unwrap().code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn cancelled_notification_sets_the_context_token_and_yields_no_response() {
        let ctx = ctx();
        let req = RpcRequest {
            jsonrpc: Some("2.0".to_string()),
            id: None,
            method: "notifications/cancelled".to_string(),
            params: serde_json::json!({ "requestId": 1 }),
        };
        assert!(handle_request(&ctx, req).await.is_none());
        assert!(ctx.cancellation.is_cancelled());
    }

    #[tokio::test]
    async fn notification_without_id_yields_no_response() {
        let req = RpcRequest {
            jsonrpc: Some("2.0".to_string()),
            id: None,
            method: "notifications/initialized".to_string(),
            params: serde_json::json!({}),
        };
        assert!(handle_request(&ctx(), req).await.is_none());
    }

    /// Drives the transport-generic loop over an in-memory duplex rather
    /// than real stdio, so the framing contract (one JSON response per
    /// input line, `\n`-terminated, flushed immediately) is verified end to
    /// end instead of only through `handle_request` in isolation.
    #[tokio::test]
    async fn malformed_line_yields_one_parse_error_response_line() {
        let (mut client_in, server_in) = tokio::io::duplex(1024);
        let (server_out, mut client_out) = tokio::io::duplex(1024);

        client_in.write_all(b"not json\n").await.unwrap();
        drop(client_in);

        run_loop(&ctx(), server_in, server_out).await.unwrap();

        let mut buf = Vec::new();
        client_out.read_to_end(&mut buf).await.unwrap();
        let lines: Vec<&str> = std::str::from_utf8(&buf).unwrap().lines().collect();
        assert_eq!(lines.len(), 1);

        let parsed: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["error"]["code"], PARSE_ERROR);
        assert_eq!(parsed["id"], Value::Null);
    }
}
