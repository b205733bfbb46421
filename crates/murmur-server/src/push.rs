//! Best-effort push dispatch.
//!
//! The transport is an abstract collaborator: given an opaque subscriber
//! descriptor and a JSON payload it attempts one out-of-process delivery.
//! There is no queue and no retry; the only feedback the core acts on is
//! "endpoint gone", which prunes the stored subscription.

use std::sync::Mutex;

use murmur_shared::protocol::PushPayload;
use murmur_store::{Database, PushSubscription};

use crate::error::ServerError;

/// Transport-level delivery failure.
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    /// The endpoint no longer exists (HTTP 404/410 equivalent).  The
    /// subscription should be pruned.
    #[error("subscription endpoint gone")]
    Gone,

    /// Any other transport failure.  Logged and otherwise ignored.
    #[error("push transport error: {0}")]
    Transport(String),
}

/// One-shot, best-effort delivery to a single subscriber.
pub trait PushTransport {
    fn deliver(
        &self,
        subscription: &PushSubscription,
        payload: &PushPayload,
    ) -> impl std::future::Future<Output = Result<(), PushError>> + Send;
}

/// HTTP transport posting the payload to the subscriber's endpoint.
///
/// Real Web Push additionally requires VAPID signing and payload
/// encryption; that lives behind the provider URL this server posts to and
/// is outside the notify contract.
#[derive(Clone)]
pub struct HttpPushTransport {
    client: reqwest::Client,
}

impl HttpPushTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpPushTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl PushTransport for HttpPushTransport {
    async fn deliver(
        &self,
        subscription: &PushSubscription,
        payload: &PushPayload,
    ) -> Result<(), PushError> {
        let response = self
            .client
            .post(&subscription.endpoint)
            .json(&serde_json::json!({
                "subscription": subscription.descriptor,
                "payload": payload,
            }))
            .send()
            .await
            .map_err(|e| PushError::Transport(e.to_string()))?;

        match response.status().as_u16() {
            404 | 410 => Err(PushError::Gone),
            s if response.status().is_success() => {
                tracing::debug!(endpoint = %subscription.endpoint, status = s, "push delivered");
                Ok(())
            }
            s => Err(PushError::Transport(format!("unexpected status {s}"))),
        }
    }
}

/// Result of a broadcast pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct BroadcastOutcome {
    /// Subscriptions attempted.
    pub attempted: usize,
    /// Successful deliveries.
    pub delivered: usize,
    /// Dead endpoints removed from the store.
    pub pruned: usize,
}

/// Deliver `payload` to every registered subscriber, pruning endpoints the
/// transport reports as gone.  Individual failures are logged and swallowed;
/// dispatch never blocks or fails the send path.
pub async fn broadcast<T: PushTransport>(
    db: &Mutex<Database>,
    transport: &T,
    payload: &PushPayload,
) -> Result<BroadcastOutcome, ServerError> {
    let subscriptions = {
        let db = db.lock().map_err(|e| ServerError::Internal(e.to_string()))?;
        db.list_subscriptions()?
    };

    let mut delivered = 0;
    let mut gone = Vec::new();

    for subscription in &subscriptions {
        match transport.deliver(subscription, payload).await {
            Ok(()) => delivered += 1,
            Err(PushError::Gone) => gone.push(subscription.endpoint.clone()),
            Err(PushError::Transport(msg)) => {
                tracing::warn!(endpoint = %subscription.endpoint, error = %msg, "push delivery failed");
            }
        }
    }

    let pruned = {
        let db = db.lock().map_err(|e| ServerError::Internal(e.to_string()))?;
        db.prune_subscriptions(&gone)?
    };

    Ok(BroadcastOutcome {
        attempted: subscriptions.len(),
        delivered,
        pruned,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct ScriptedTransport;

    impl PushTransport for ScriptedTransport {
        async fn deliver(
            &self,
            subscription: &PushSubscription,
            _payload: &PushPayload,
        ) -> Result<(), PushError> {
            match subscription.endpoint.as_str() {
                "https://push.example/gone" => Err(PushError::Gone),
                "https://push.example/flaky" => {
                    Err(PushError::Transport("503".into()))
                }
                _ => Ok(()),
            }
        }
    }

    fn payload() -> PushPayload {
        PushPayload {
            title: "New message".into(),
            body: "hello".into(),
            icon: "/favicon.ico".into(),
            url: "/chats".into(),
        }
    }

    #[tokio::test]
    async fn broadcast_prunes_gone_endpoints_only() {
        let dir = tempfile::tempdir().unwrap();
        let db = Mutex::new(Database::open_at(&dir.path().join("test.db")).unwrap());
        {
            let db = db.lock().unwrap();
            let d = json!({"keys": {}});
            db.add_subscription("https://push.example/ok", &d).unwrap();
            db.add_subscription("https://push.example/gone", &d).unwrap();
            db.add_subscription("https://push.example/flaky", &d).unwrap();
        }

        let outcome = broadcast(&db, &ScriptedTransport, &payload()).await.unwrap();
        assert_eq!(outcome.attempted, 3);
        assert_eq!(outcome.delivered, 1);
        assert_eq!(outcome.pruned, 1);

        let remaining: Vec<String> = db
            .lock()
            .unwrap()
            .list_subscriptions()
            .unwrap()
            .into_iter()
            .map(|s| s.endpoint)
            .collect();
        assert!(remaining.contains(&"https://push.example/ok".to_string()));
        // Flaky endpoints stay registered; only gone ones are removed.
        assert!(remaining.contains(&"https://push.example/flaky".to_string()));
        assert!(!remaining.contains(&"https://push.example/gone".to_string()));
    }
}
