//! Rules document cache and first-message injection.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::RwLock;

/// Built-in rules used when no rules file is configured or readable.
pub const DEFAULT_RULES: &str = "\
You are a coding assistant operating inside a web chat. \
Only use the tools you have been granted for this turn. \
Prefer reading and explaining code over modifying it.";

const RULES_SEPARATOR: &str = "\n\n---\nUser message: ";

/// Read-mostly cache over the rules file.
///
/// The file is read at construction and on explicit [`reload`]; every
/// other access is served from memory. Reload swaps the cached `Arc`
/// atomically so in-flight readers keep the snapshot they started with.
///
/// [`reload`]: RulesCache::reload
#[derive(Debug)]
pub struct RulesCache {
    path: Option<PathBuf>,
    current: RwLock<Arc<str>>,
}

impl RulesCache {
    /// Loads the cache from `path`, falling back to [`DEFAULT_RULES`]
    /// when the file is absent or unreadable. The fallback is logged
    /// and never surfaced to callers.
    pub async fn load(path: Option<PathBuf>) -> Self {
        let current = read_or_default(path.as_deref()).await;
        Self {
            path,
            current: RwLock::new(current),
        }
    }

    pub async fn current(&self) -> Arc<str> {
        self.current.read().await.clone()
    }

    /// Re-reads the rules file and swaps the cache. Returns the new
    /// content. Unreadable files degrade to the built-in default, same
    /// as at startup.
    pub async fn reload(&self) -> Arc<str> {
        let fresh = read_or_default(self.path.as_deref()).await;
        let mut guard = self.current.write().await;
        *guard = fresh.clone();
        tracing::info!(length = fresh.len(), "rules document reloaded");
        fresh
    }

    /// Prepends the rules document to the first message of a new
    /// conversation. Resumed turns (those carrying a session id) pass
    /// through unchanged: the engine already has the rules in context.
    pub async fn prepare(&self, message: &str, session_id: Option<&str>) -> String {
        if session_id.is_some() {
            return message.to_string();
        }
        let rules = self.current().await;
        format!("{rules}{RULES_SEPARATOR}{message}")
    }
}

async fn read_or_default(path: Option<&std::path::Path>) -> Arc<str> {
    let Some(path) = path else {
        return Arc::from(DEFAULT_RULES);
    };
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Arc::from(content.as_str()),
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "failed to read rules file, using built-in default"
            );
            Arc::from(DEFAULT_RULES)
        }
    }
}
