use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

/// One chat turn as submitted by the browser client.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_mode: Option<PermissionMode>,
}

/// Permission modes understood by the Claude CLI's `--permission-mode` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    Default,
    AcceptEdits,
    Plan,
    BypassPermissions,
}

impl PermissionMode {
    pub fn as_arg(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::AcceptEdits => "acceptEdits",
            Self::Plan => "plan",
            Self::BypassPermissions => "bypassPermissions",
        }
    }
}

/// Normalized outbound event, one JSON object per NDJSON line.
///
/// `claude_json` payloads are opaque passthrough of the CLI's native
/// stream-json events; the relay never re-types them. Exactly one of
/// the terminal variants ends every stream, and it is always the last
/// line.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamResponse {
    ClaudeJson { data: Value },
    Done,
    Aborted,
    Error { error: String },
}

impl StreamResponse {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::ClaudeJson { .. })
    }

    /// Wire tag of this event, for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ClaudeJson { .. } => "claude_json",
            Self::Done => "done",
            Self::Aborted => "aborted",
            Self::Error { .. } => "error",
        }
    }
}

/// Pulls the engine session id out of the CLI's `system`/`init` event.
///
/// The first event of a fresh turn carries the session token the client
/// must replay as `sessionId` to resume the conversation. The event
/// itself still passes through to the client untouched.
pub fn extract_session_id(event: &Value) -> Option<&str> {
    if event.get("type").and_then(Value::as_str) != Some("system") {
        return None;
    }
    if event.get("subtype").and_then(Value::as_str) != Some("init") {
        return None;
    }
    event
        .get("session_id")
        .and_then(Value::as_str)
        .or_else(|| event.get("sessionId").and_then(Value::as_str))
}
