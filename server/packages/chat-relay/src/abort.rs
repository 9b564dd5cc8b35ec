//! Process-wide cancellation registry, keyed by request id.

use std::collections::HashMap;
use std::sync::Mutex;

use chat_relay_error::RelayError;
use tokio::sync::oneshot;

/// Maps in-flight request ids to their cancellation handles.
///
/// The only shared mutable structure in the relay. Constructed
/// explicitly and passed into the router state so tests can run
/// isolated instances. A std mutex (never held across an await) keeps
/// register/trigger/release atomic with respect to each other and lets
/// the executor's release guard run from `Drop`.
#[derive(Debug, Default)]
pub struct AbortRegistry {
    entries: Mutex<HashMap<String, oneshot::Sender<()>>>,
}

impl AbortRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a turn and returns the receiving half of its handle.
    ///
    /// A request id that is already in flight is rejected rather than
    /// silently overwritten, which would orphan the first turn's handle.
    pub fn register(&self, request_id: &str) -> Result<oneshot::Receiver<()>, RelayError> {
        let mut entries = self.entries.lock().expect("abort registry lock poisoned");
        if entries.contains_key(request_id) {
            return Err(RelayError::Conflict {
                request_id: request_id.to_string(),
            });
        }
        let (tx, rx) = oneshot::channel();
        entries.insert(request_id.to_string(), tx);
        Ok(rx)
    }

    /// Signals the handle for `request_id`, reporting whether an entry
    /// existed. A miss is expected when a late abort races natural
    /// completion and is not an error.
    pub fn trigger(&self, request_id: &str) -> bool {
        let sender = self
            .entries
            .lock()
            .expect("abort registry lock poisoned")
            .remove(request_id);
        match sender {
            Some(tx) => {
                // The receiver may already be gone if the turn finished
                // between the lookup and the send; still a successful abort
                // from the caller's point of view.
                let _ = tx.send(());
                true
            }
            None => false,
        }
    }

    /// Removes the entry for a finished turn. No-op if `trigger` or a
    /// prior release already removed it.
    pub fn release(&self, request_id: &str) {
        self.entries
            .lock()
            .expect("abort registry lock poisoned")
            .remove(request_id);
    }

    pub fn contains(&self, request_id: &str) -> bool {
        self.entries
            .lock()
            .expect("abort registry lock poisoned")
            .contains_key(request_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_on_unknown_id_reports_not_found() {
        let registry = AbortRegistry::new();
        assert!(!registry.trigger("missing"));
    }

    #[tokio::test]
    async fn trigger_signals_the_registered_receiver() {
        let registry = AbortRegistry::new();
        let rx = registry.register("r1").unwrap();
        assert!(registry.contains("r1"));
        assert!(registry.trigger("r1"));
        rx.await.expect("cancellation signal");
        assert!(!registry.contains("r1"));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = AbortRegistry::new();
        let _rx = registry.register("r1").unwrap();
        let err = registry.register("r1").unwrap_err();
        assert!(matches!(err, RelayError::Conflict { .. }));
    }

    #[test]
    fn release_then_trigger_is_a_miss() {
        let registry = AbortRegistry::new();
        let _rx = registry.register("r1").unwrap();
        registry.release("r1");
        assert!(!registry.trigger("r1"));
    }

    #[test]
    fn distinct_requests_get_distinct_handles() {
        let registry = AbortRegistry::new();
        let _rx1 = registry.register("r1").unwrap();
        let _rx2 = registry.register("r2").unwrap();
        assert!(registry.trigger("r1"));
        assert!(registry.contains("r2"));
    }
}
