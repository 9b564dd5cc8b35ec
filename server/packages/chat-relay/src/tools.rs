//! Server-side tool permission filter.
//!
//! The client sends the tool names the user approved in the UI, but that
//! list is advisory only. This filter is re-applied on every turn and is
//! the actual authorization boundary: write-capable tools never reach
//! the CLI invocation no matter what the client claims.

/// Read-only tools granted on every turn, in this order.
pub const BASELINE_TOOLS: [&str; 5] = ["Read", "Glob", "Grep", "LS", "Task"];

/// Write/execute-capable tools that are never accepted from the client.
pub const BLOCKED_TOOLS: [&str; 5] = ["Bash", "Write", "Edit", "MultiEdit", "NotebookEdit"];

/// Computes the effective allowed-tool set for one turn.
///
/// Result is the baseline followed by the user-approved entries in their
/// original order, minus anything blocklisted, without duplicates.
pub fn compute_allowed_tools(user_approved: &[String]) -> Vec<String> {
    let mut allowed: Vec<String> = BASELINE_TOOLS.iter().map(|tool| tool.to_string()).collect();
    for tool in user_approved {
        if is_blocked(tool) {
            tracing::warn!(tool = %tool, "rejected blocklisted tool from client request");
            continue;
        }
        if allowed.iter().any(|existing| existing == tool) {
            continue;
        }
        allowed.push(tool.clone());
    }
    allowed
}

/// Blocklist matching is exact, or prefix on `Name(` for parameterized
/// forms such as `Bash(git push:*)`.
fn is_blocked(tool: &str) -> bool {
    BLOCKED_TOOLS.iter().any(|blocked| {
        tool == *blocked
            || tool
                .strip_prefix(blocked)
                .is_some_and(|rest| rest.starts_with('('))
    })
}
