//! In-flight JSON-RPC request table.
//!
//! One table per service connection, shared between the request submitter
//! and the transport reader. The table is the sole source of truth for
//! matching responses to requests: a response whose id is not registered
//! here is dropped by the caller with a warning. The lock is never held
//! across a suspension point.

use crate::protocol::RequestId;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::{Mutex, oneshot};
use switchboard_types::BridgeError;

type Outcome = Result<Value, BridgeError>;

struct Entry {
    method: String,
    tx: oneshot::Sender<Outcome>,
}

#[derive(Default)]
pub struct PendingRequests {
    entries: Mutex<HashMap<RequestId, Entry>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an outgoing request and obtain the receiver its response
    /// will be delivered on.
    pub async fn register(
        &self,
        id: RequestId,
        method: impl Into<String>,
    ) -> oneshot::Receiver<Outcome> {
        let (tx, rx) = oneshot::channel();
        let mut entries = self.entries.lock().await;
        if entries
            .insert(
                id.clone(),
                Entry {
                    method: method.into(),
                    tx,
                },
            )
            .is_some()
        {
            tracing::warn!(%id, "replaced pending request with duplicate id");
        }
        rx
    }

    /// Deliver an outcome to the registered caller; the closure sees the
    /// method the request was sent with, so the caller can classify error
    /// responses. Returns the method name when the id was outstanding,
    /// `None` for unknown or already-settled ids (late responses after a
    /// timeout land here).
    pub async fn complete(
        &self,
        id: &RequestId,
        outcome: impl FnOnce(&str) -> Outcome,
    ) -> Option<String> {
        let entry = self.entries.lock().await.remove(id)?;
        let result = outcome(&entry.method);
        // Receiver may have been dropped by a cancelled caller; that is fine.
        let _ = entry.tx.send(result);
        Some(entry.method)
    }

    /// Drop a registration without delivering anything (timeout path).
    pub async fn remove(&self, id: &RequestId) -> bool {
        self.entries.lock().await.remove(id).is_some()
    }

    /// Fail every outstanding request, emptying the table.
    pub async fn fail_all(&self, make_error: impl Fn(&str) -> BridgeError) {
        let entries: Vec<(RequestId, Entry)> = self.entries.lock().await.drain().collect();
        for (id, entry) in entries {
            tracing::debug!(%id, method = %entry.method, "failing in-flight request");
            let _ = entry.tx.send(Err(make_error(&entry.method)));
        }
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn completes_registered_request() {
        let pending = PendingRequests::new();
        let rx = pending.register(RequestId::Number(1), "tools/call").await;

        let method = pending
            .complete(&RequestId::Number(1), |_| Ok(json!({"ok": true})))
            .await;
        assert_eq!(method.as_deref(), Some("tools/call"));
        assert_eq!(rx.await.unwrap().unwrap()["ok"], true);
        assert!(pending.is_empty().await);
    }

    #[tokio::test]
    async fn unknown_ids_are_reported() {
        let pending = PendingRequests::new();
        let outcome = pending
            .complete(&RequestId::Number(99), |_| Ok(json!(null)))
            .await;
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn removed_entry_drops_late_response() {
        let pending = PendingRequests::new();
        let _rx = pending.register(RequestId::Number(2), "ping").await;
        assert!(pending.remove(&RequestId::Number(2)).await);
        // The late response now has nowhere to go.
        assert!(
            pending
                .complete(&RequestId::Number(2), |_| Ok(json!({})))
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn fail_all_empties_the_table() {
        let pending = PendingRequests::new();
        let rx1 = pending.register(RequestId::Number(1), "tools/call").await;
        let rx2 = pending.register(RequestId::String("a".into()), "ping").await;

        pending
            .fail_all(|method| BridgeError::transport(format!("gone during {method}")))
            .await;

        assert!(pending.is_empty().await);
        assert!(rx1.await.unwrap().is_err());
        let err = rx2.await.unwrap().unwrap_err();
        assert!(err.to_string().contains("gone during ping"));
    }

    #[tokio::test]
    async fn each_request_gets_at_most_one_outcome() {
        let pending = PendingRequests::new();
        let rx = pending.register(RequestId::Number(5), "tools/call").await;
        assert!(
            pending
                .complete(&RequestId::Number(5), |_| Ok(json!(1)))
                .await
                .is_some()
        );
        // Second completion finds nothing to deliver to.
        assert!(
            pending
                .complete(&RequestId::Number(5), |_| Ok(json!(2)))
                .await
                .is_none()
        );
        assert_eq!(rx.await.unwrap().unwrap(), json!(1));
    }
}
