//! Push subscriber records.
//!
//! Descriptors are opaque to the store; the endpoint URL is the identity.
//! Records are pruned when the push transport reports the endpoint gone.

use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::database::Database;
use crate::error::Result;
use crate::models::PushSubscription;

impl Database {
    /// Register a push subscription.  Re-registering an existing endpoint is
    /// a no-op and keeps the original record.
    pub fn add_subscription(&self, endpoint: &str, descriptor: &serde_json::Value) -> Result<()> {
        self.conn().execute(
            "INSERT OR IGNORE INTO push_subscriptions (endpoint, descriptor, created_at)
             VALUES (?1, ?2, ?3)",
            params![
                endpoint,
                serde_json::to_string(descriptor)?,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Remove a subscription by endpoint.  Returns `true` if a row was
    /// deleted.
    pub fn remove_subscription(&self, endpoint: &str) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM push_subscriptions WHERE endpoint = ?1",
            params![endpoint],
        )?;
        Ok(affected > 0)
    }

    /// All registered subscriptions.
    pub fn list_subscriptions(&self) -> Result<Vec<PushSubscription>> {
        let mut stmt = self.conn().prepare(
            "SELECT endpoint, descriptor, created_at FROM push_subscriptions
             ORDER BY created_at ASC",
        )?;

        let rows = stmt.query_map([], |row| {
            let endpoint: String = row.get(0)?;
            let descriptor_str: String = row.get(1)?;
            let created_str: String = row.get(2)?;
            Ok((endpoint, descriptor_str, created_str))
        })?;

        let mut subscriptions = Vec::new();
        for row in rows {
            let (endpoint, descriptor_str, created_str) = row?;
            let descriptor: serde_json::Value = serde_json::from_str(&descriptor_str)?;
            let created_at: DateTime<Utc> =
                DateTime::parse_from_rfc3339(&created_str)?.with_timezone(&Utc);
            subscriptions.push(PushSubscription {
                endpoint,
                descriptor,
                created_at,
            });
        }
        Ok(subscriptions)
    }

    /// Drop every endpoint the transport reported as gone.
    pub fn prune_subscriptions(&self, gone: &[String]) -> Result<usize> {
        let mut pruned = 0;
        for endpoint in gone {
            if self.remove_subscription(endpoint)? {
                pruned += 1;
            }
        }
        if pruned > 0 {
            tracing::info!(pruned, "pruned dead push subscriptions");
        }
        Ok(pruned)
    }
}
