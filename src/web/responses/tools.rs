//! Tool expansion and execution for the Responses gateway
//!
//! Declarative tools (`file_search`, `web_search`, `mcp`) are rewritten into
//! plain function tools the backend can call. The dispatch tables produced
//! here travel with the conversation state and are read-only afterwards;
//! `ExpandedTools::resolve` is the single place a call name is mapped to a
//! handler.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

use crate::mcp::{McpError, McpToolProvider, McpToolResult};
use crate::search::{VectorSearchResult, VectorSearcher, WebSearchResult, WebSearcher};

use super::constants::*;
use super::types::{FunctionTool, ToolCall, ToolParam};

/// Execution parameters captured from a `file_search` declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSearchConfig {
    pub vector_store_ids: Vec<String>,
    pub max_num_results: u32,
}

/// Execution parameters captured from a `web_search` declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebSearchConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_context_size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_location: Option<Value>,
}

impl WebSearchConfig {
    /// Result count derived from the requested context size
    pub fn max_results(&self) -> u32 {
        match self.search_context_size.as_deref() {
            Some("low") => 3,
            Some("high") => 10,
            _ => 5,
        }
    }
}

/// Tool list safe to hand the backend, plus the per-name dispatch tables
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpandedTools {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expanded_tools: Vec<ToolParam>,
    /// Function name -> MCP server label
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub mcp_tool_names: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub file_search_configs: HashMap<String, FileSearchConfig>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub web_search_configs: HashMap<String, WebSearchConfig>,
}

/// How a backend-requested call is handled
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ToolDispatch<'a> {
    Mcp { server_label: &'a str },
    FileSearch(&'a FileSearchConfig),
    WebSearch(&'a WebSearchConfig),
}

impl ExpandedTools {
    /// Resolve a call name to its server-side handler
    ///
    /// `None` means the call belongs to the client and ends the loop.
    pub fn resolve(&self, name: &str) -> Option<ToolDispatch<'_>> {
        if let Some(label) = self.mcp_tool_names.get(name) {
            return Some(ToolDispatch::Mcp {
                server_label: label,
            });
        }
        if let Some(cfg) = self.file_search_configs.get(name) {
            return Some(ToolDispatch::FileSearch(cfg));
        }
        self.web_search_configs.get(name).map(ToolDispatch::WebSearch)
    }

    /// Only function tools are forwarded to the backend
    pub fn function_tools(&self) -> Vec<FunctionTool> {
        self.expanded_tools
            .iter()
            .filter_map(|t| match t {
                ToolParam::Function(f) => Some(f.clone()),
                _ => None,
            })
            .collect()
    }
}

/// Synthetic function exposed in place of `file_search`
pub fn file_search_function() -> FunctionTool {
    FunctionTool {
        name: FILE_SEARCH_FUNCTION.to_string(),
        description: Some(
            "Search files in vector stores for relevant content based on a query.".to_string(),
        ),
        parameters: Some(json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query to find relevant file content."
                }
            },
            "required": ["query"],
            "additionalProperties": false
        })),
        strict: None,
    }
}

/// Synthetic function exposed in place of `web_search`
pub fn web_search_function() -> FunctionTool {
    FunctionTool {
        name: WEB_SEARCH_FUNCTION.to_string(),
        description: Some(
            "Search the web for current information, facts, and real-time data.".to_string(),
        ),
        parameters: Some(json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query to execute."
                }
            },
            "required": ["query"],
            "additionalProperties": false
        })),
        strict: None,
    }
}

/// Replace `file_search` declarations in place
///
/// Without a vector-search collaborator the list is returned unchanged and
/// no configs are produced.
pub fn expand_file_search_tools(
    tools: Vec<ToolParam>,
    search_available: bool,
) -> (Vec<ToolParam>, HashMap<String, FileSearchConfig>) {
    let mut configs = HashMap::new();
    if !search_available {
        return (tools, configs);
    }

    let expanded = tools
        .into_iter()
        .map(|tool| match tool {
            ToolParam::FileSearch(fs) => {
                let cfg = FileSearchConfig {
                    vector_store_ids: fs.vector_store_ids,
                    max_num_results: fs
                        .max_num_results
                        .filter(|n| *n > 0)
                        .unwrap_or(DEFAULT_FILE_SEARCH_RESULTS),
                };
                // Several declarations share one synthetic function; merge their stores
                configs
                    .entry(FILE_SEARCH_FUNCTION.to_string())
                    .and_modify(|existing: &mut FileSearchConfig| {
                        existing.vector_store_ids.extend(cfg.vector_store_ids.clone());
                        existing.max_num_results = existing.max_num_results.max(cfg.max_num_results);
                    })
                    .or_insert_with(|| cfg.clone());
                ToolParam::Function(file_search_function())
            }
            other => other,
        })
        .collect();
    (expanded, configs)
}

/// Replace `web_search` declarations in place, mirroring file_search
pub fn expand_web_search_tools(
    tools: Vec<ToolParam>,
    search_available: bool,
) -> (Vec<ToolParam>, HashMap<String, WebSearchConfig>) {
    let mut configs = HashMap::new();
    if !search_available {
        return (tools, configs);
    }

    let expanded = tools
        .into_iter()
        .map(|tool| match tool {
            ToolParam::WebSearch(ws) => {
                configs.insert(
                    WEB_SEARCH_FUNCTION.to_string(),
                    WebSearchConfig {
                        search_context_size: ws.search_context_size,
                        user_location: ws.user_location,
                    },
                );
                ToolParam::Function(web_search_function())
            }
            other => other,
        })
        .collect();
    (expanded, configs)
}

/// Replace each `mcp` declaration with the functions its server lists
///
/// A server that cannot be listed fails the whole expansion.
pub async fn expand_mcp_tools(
    tools: Vec<ToolParam>,
    provider: &dyn McpToolProvider,
) -> Result<(Vec<ToolParam>, HashMap<String, String>), McpError> {
    let mut expanded = Vec::with_capacity(tools.len());
    let mut names = HashMap::new();

    for tool in tools {
        let ToolParam::Mcp(mcp) = tool else {
            expanded.push(tool);
            continue;
        };

        let listed = provider.list_tools(&mcp.server_label).await?;
        info!(
            "Expanded MCP server {} into {} tools",
            mcp.server_label,
            listed.len()
        );
        for info in listed {
            if let Some(allowed) = &mcp.allowed_tools {
                if !allowed.contains(&info.name) {
                    trace!("Skipping MCP tool {} (not allowed)", info.name);
                    continue;
                }
            }
            names.insert(info.name.clone(), mcp.server_label.clone());
            expanded.push(ToolParam::Function(FunctionTool {
                name: info.name,
                description: info.description,
                parameters: info.input_schema,
                strict: None,
            }));
        }
    }
    Ok((expanded, names))
}

/// Parse a model-produced argument string; anything but an object becomes `{}`
pub fn parse_json_args(arguments: &str) -> Map<String, Value> {
    match serde_json::from_str::<Value>(arguments) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

pub fn format_file_search_results(results: &[VectorSearchResult]) -> String {
    if results.is_empty() {
        return "No relevant results found.".to_string();
    }
    results
        .iter()
        .map(|r| format!("[File: {}, Score: {:.4}]\n{}", r.file_id, r.score, r.content))
        .collect::<Vec<_>>()
        .join("\n---\n")
}

pub fn format_web_search_results(results: &[WebSearchResult]) -> String {
    if results.is_empty() {
        return "No web results found.".to_string();
    }
    results
        .iter()
        .enumerate()
        .map(|(i, r)| format!("[{}] {}\n{}\n{}", i + 1, r.title, r.url, r.snippet))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn mcp_result_to_string(result: &McpToolResult) -> String {
    result
        .content
        .iter()
        .filter_map(|c| c.text.as_deref())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Executes server-side tool calls against the configured collaborators
#[derive(Clone, Default)]
pub struct ToolExecutor {
    pub mcp: Option<Arc<dyn McpToolProvider>>,
    pub vector_search: Option<Arc<dyn VectorSearcher>>,
    pub web_search: Option<Arc<dyn WebSearcher>>,
}

impl ToolExecutor {
    /// Execute one call; failures become the tool output, never an error
    pub async fn execute(&self, dispatch: ToolDispatch<'_>, call: &ToolCall) -> String {
        trace!(
            "Executing tool: {} with arguments: {}",
            call.name,
            call.arguments
        );
        debug!("Executing tool: {}", call.name);
        let args = parse_json_args(&call.arguments);

        match dispatch {
            ToolDispatch::Mcp { server_label } => {
                let Some(mcp) = &self.mcp else {
                    warn!("MCP call {} without an MCP provider", call.name);
                    return "Error calling tool: MCP is not available".to_string();
                };
                match mcp
                    .call_tool(server_label, &call.name, Value::Object(args))
                    .await
                {
                    Ok(result) => mcp_result_to_string(&result),
                    Err(e) => {
                        error!("MCP tool {} failed: {}", call.name, e);
                        format!("Error calling tool: {}", e)
                    }
                }
            }
            ToolDispatch::FileSearch(cfg) => {
                let Some(searcher) = &self.vector_search else {
                    return "Error: file search is not available".to_string();
                };
                let query = args.get("query").and_then(Value::as_str).unwrap_or_default();
                self.execute_file_search(searcher.as_ref(), cfg, query).await
            }
            ToolDispatch::WebSearch(cfg) => {
                let Some(searcher) = &self.web_search else {
                    return "Error: web search is not available".to_string();
                };
                let query = args.get("query").and_then(Value::as_str).unwrap_or_default();
                match searcher.search(query, cfg.max_results()).await {
                    Ok(results) => format_web_search_results(&results),
                    Err(e) => {
                        error!("Web search failed: {}", e);
                        format!("Error performing web search: {}", e)
                    }
                }
            }
        }
    }

    /// Search every configured store; stores that fail are skipped
    async fn execute_file_search(
        &self,
        searcher: &dyn VectorSearcher,
        cfg: &FileSearchConfig,
        query: &str,
    ) -> String {
        let searches = cfg
            .vector_store_ids
            .iter()
            .map(|store| searcher.search(store, query, cfg.max_num_results));
        let mut results = Vec::new();
        for (store, outcome) in cfg.vector_store_ids.iter().zip(join_all(searches).await) {
            match outcome {
                Ok(hits) => results.extend(hits),
                Err(e) => warn!("Vector store {} search failed: {}", store, e),
            }
        }
        format_file_search_results(&results)
    }

    /// Execute calls concurrently; outputs come back in submission order
    pub async fn execute_all(&self, calls: &[(ToolDispatch<'_>, &ToolCall)]) -> Vec<String> {
        join_all(calls.iter().map(|(dispatch, call)| self.execute(*dispatch, call))).await
    }
}
