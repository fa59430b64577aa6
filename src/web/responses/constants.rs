//! Constants used throughout the Responses gateway

/// Channel buffer sizes
pub const CLIENT_CHANNEL_BUFFER: usize = 1024;
pub const BACKEND_CHANNEL_BUFFER: usize = 256;

/// SSE buffer sizing
pub const SSE_BUFFER_CAPACITY: usize = 8192;

/// Tool-call loop bound used when neither the request nor the config sets one
pub const DEFAULT_MAX_TOOL_CALLS: u32 = 10;

/// Default result count for expanded file_search tools
pub const DEFAULT_FILE_SEARCH_RESULTS: u32 = 10;

/// Identifier prefixes
pub const ID_PREFIX_RESPONSE: &str = "resp_";
pub const ID_PREFIX_MESSAGE: &str = "msg_";
pub const ID_PREFIX_FUNCTION_CALL: &str = "fc_";
pub const ID_PREFIX_FUNCTION_CALL_OUTPUT: &str = "fco_";
pub const ID_PREFIX_REASONING: &str = "rs_";
pub const ID_PREFIX_CONVERSATION: &str = "conv_";
pub const ID_PREFIX_REQUEST: &str = "req_";

/// Response object types
pub const OBJECT_TYPE_RESPONSE: &str = "response";
pub const OBJECT_TYPE_RESPONSE_DELETED: &str = "response.deleted";
pub const OBJECT_TYPE_LIST: &str = "list";

/// Pagination for the list endpoints
pub const DEFAULT_PAGINATION_LIMIT: usize = 50;
pub const MAX_PAGINATION_LIMIT: usize = 100;

/// Responses kept by the in-memory store before the oldest are evicted
pub const DEFAULT_STORE_CAPACITY: usize = 10_000;

/// Event types for SSE streaming
pub const EVENT_RESPONSE_CREATED: &str = "response.created";
pub const EVENT_RESPONSE_IN_PROGRESS: &str = "response.in_progress";
pub const EVENT_RESPONSE_OUTPUT_ITEM_ADDED: &str = "response.output_item.added";
pub const EVENT_RESPONSE_CONTENT_PART_ADDED: &str = "response.content_part.added";
pub const EVENT_RESPONSE_OUTPUT_TEXT_DELTA: &str = "response.output_text.delta";
pub const EVENT_RESPONSE_OUTPUT_TEXT_DONE: &str = "response.output_text.done";
pub const EVENT_RESPONSE_REFUSAL_DELTA: &str = "response.refusal.delta";
pub const EVENT_RESPONSE_REFUSAL_DONE: &str = "response.refusal.done";
pub const EVENT_RESPONSE_REASONING_DELTA: &str = "response.reasoning.delta";
pub const EVENT_RESPONSE_REASONING_DONE: &str = "response.reasoning.done";
pub const EVENT_RESPONSE_CONTENT_PART_DONE: &str = "response.content_part.done";
pub const EVENT_RESPONSE_FUNCTION_CALL_ARGUMENTS_DELTA: &str =
    "response.function_call_arguments.delta";
pub const EVENT_RESPONSE_FUNCTION_CALL_ARGUMENTS_DONE: &str =
    "response.function_call_arguments.done";
pub const EVENT_RESPONSE_OUTPUT_ITEM_DONE: &str = "response.output_item.done";
pub const EVENT_RESPONSE_COMPLETED: &str = "response.completed";
pub const EVENT_RESPONSE_FAILED: &str = "response.failed";
pub const EVENT_RESPONSE_INCOMPLETE: &str = "response.incomplete";
pub const EVENT_ERROR: &str = "error";

/// Fallback SSE event name when a payload carries no type
pub const EVENT_FALLBACK: &str = "message";

/// Item statuses
pub const STATUS_IN_PROGRESS: &str = "in_progress";
pub const STATUS_COMPLETED: &str = "completed";
pub const STATUS_INCOMPLETE: &str = "incomplete";

/// Finish reason for a backend that stopped on its token limit
pub const FINISH_REASON_LENGTH: &str = "length";

/// Incomplete reasons
pub const INCOMPLETE_MAX_TOOL_CALLS: &str = "max tool calls reached";
pub const INCOMPLETE_MAX_OUTPUT_TOKENS: &str = "max_output_tokens";

/// Error types and codes attached to failed responses
pub const ERROR_TYPE_API: &str = "api_error";
pub const ERROR_CODE_BACKEND: &str = "backend_error";
pub const ERROR_CODE_NO_OUTPUT: &str = "no_output";
pub const ERROR_CODE_MCP: &str = "mcp_error";

/// Text format types
pub const TEXT_FORMAT_TYPE: &str = "text";

/// Truncation strategies
pub const TRUNCATION_DISABLED: &str = "disabled";

/// Tool choice strategies
pub const TOOL_CHOICE_NONE: &str = "none";
pub const TOOL_CHOICE_AUTO: &str = "auto";

/// Tool type tags
pub const TOOL_TYPE_FUNCTION: &str = "function";
pub const TOOL_TYPE_FILE_SEARCH: &str = "file_search";
pub const TOOL_TYPE_WEB_SEARCH: &str = "web_search";
pub const TOOL_TYPE_WEB_SEARCH_PREVIEW: &str = "web_search_preview";
pub const TOOL_TYPE_MCP: &str = "mcp";

/// Synthetic function names for expanded tools
pub const FILE_SEARCH_FUNCTION: &str = "file_search";
pub const WEB_SEARCH_FUNCTION: &str = "web_search";

/// Input item types
pub const ITEM_TYPE_MESSAGE: &str = "message";
pub const ITEM_TYPE_FUNCTION_CALL: &str = "function_call";
pub const ITEM_TYPE_FUNCTION_CALL_OUTPUT: &str = "function_call_output";

/// Message roles
pub const ROLE_USER: &str = "user";
pub const ROLE_ASSISTANT: &str = "assistant";
pub const ROLE_SYSTEM: &str = "system";
pub const ROLE_DEVELOPER: &str = "developer";
pub const ROLE_TOOL: &str = "tool";
