//! MCP JSON-RPC protocol bridge.
//!
//! Exposes the [`ToolRegistry`] as MCP tools over the Streamable HTTP
//! transport mounted at `/mcp`. Tool failures are returned as
//! `CallToolResult::error` carrying the same JSON error payload the REST
//! API returns, so agents can read `available`, `missing`, and
//! `remediation` from either surface.

use std::borrow::Cow;
use std::sync::Arc;

use rmcp::model::*;
use rmcp::{ErrorData as McpError, ServerHandler};

use crate::error::DiscoveryError;
use crate::traits::{validate_params, ToolContext, ToolRegistry};

/// Bridges the tool registry to the MCP protocol.
///
/// Each MCP session receives a clone; everything is behind `Arc`.
#[derive(Clone)]
pub struct McpBridge {
    tools: Arc<ToolRegistry>,
    ctx: ToolContext,
}

impl McpBridge {
    pub fn new(tools: Arc<ToolRegistry>, ctx: ToolContext) -> Self {
        Self { tools, ctx }
    }

    fn to_mcp_tool(tool: &dyn crate::traits::Tool) -> Tool {
        let input_schema: Arc<serde_json::Map<String, serde_json::Value>> =
            match tool.parameters_schema() {
                serde_json::Value::Object(map) => Arc::new(map),
                _ => Arc::new(serde_json::Map::new()),
            };

        Tool {
            name: Cow::Owned(tool.name().to_string()),
            title: None,
            description: Some(Cow::Owned(tool.description().to_string())),
            input_schema,
            output_schema: None,
            annotations: Some(ToolAnnotations::new().read_only(tool.is_read_only())),
            execution: None,
            icons: None,
            meta: None,
        }
    }
}

/// JSON error payload for a failed tool call.
pub(crate) fn error_payload(err: &anyhow::Error) -> serde_json::Value {
    match err.downcast_ref::<DiscoveryError>() {
        Some(discovery) => discovery.to_payload(),
        None => serde_json::json!({
            "error": { "code": "internal", "message": err.to_string() }
        }),
    }
}

impl ServerHandler for McpBridge {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "catalog-scout".to_string(),
                title: Some("Catalog Scout".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Catalog Scout finds the right OData service in a large enterprise catalog. \
                 Call search_services with your intent, then list_entities and inspect_entity \
                 on a chosen service to learn its keys and capabilities, then \
                 execute_entity_operation to read or change data."
                    .to_string(),
            ),
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        let tools: Vec<Tool> = self
            .tools
            .tools()
            .iter()
            .map(|t| Self::to_mcp_tool(t.as_ref()))
            .collect();
        std::future::ready(Ok(ListToolsResult::with_all_items(tools)))
    }

    fn get_tool(&self, name: &str) -> Option<Tool> {
        self.tools.find(name).map(Self::to_mcp_tool)
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let tool = self.tools.find(&request.name).ok_or_else(|| {
            McpError::new(
                ErrorCode::METHOD_NOT_FOUND,
                format!("no tool registered with name: {}", request.name),
                None,
            )
        })?;

        let params = request
            .arguments
            .map(serde_json::Value::Object)
            .unwrap_or(serde_json::Value::Object(serde_json::Map::new()));

        let outcome = match validate_params(&tool.parameters_schema(), &params) {
            Ok(validated) => tool.execute(validated, &self.ctx).await,
            Err(e) => Err(e.into()),
        };

        match outcome {
            Ok(result) => {
                let text = serde_json::to_string_pretty(&result).unwrap_or_default();
                Ok(CallToolResult::success(vec![Content::text(text)]))
            }
            Err(e) => {
                tracing::debug!(tool = %request.name, error = %e, "tool call failed");
                let text = serde_json::to_string_pretty(&error_payload(&e)).unwrap_or_default();
                Ok(CallToolResult::error(vec![Content::text(text)]))
            }
        }
    }
}
