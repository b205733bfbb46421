//! Delivered/seen reconciliation.
//!
//! Both operations are idempotent, monotonic set unions and are invoked on
//! every visibility change, so they must tolerate arbitrary repetition and
//! arbitrary interleaving across clients.  Each row insert is an independent
//! atomic patch: a crash mid-scan leaves a partially reconciled conversation
//! that self-heals on the next invocation.

use rusqlite::params;

use murmur_shared::constants::RECONCILE_SCAN_LIMIT;
use murmur_shared::{ConversationId, UserId};

use crate::database::Database;
use crate::error::Result;

impl Database {
    /// Mark the conversation's recent messages as delivered to `viewer`.
    ///
    /// Scans the newest [`RECONCILE_SCAN_LIMIT`] messages; the viewer's own
    /// messages are never marked.  Returns the number of newly marked
    /// messages (zero when already reconciled).
    pub fn mark_delivered(&self, conversation: ConversationId, viewer: UserId) -> Result<usize> {
        // The scan window is the conversation's newest N messages; the
        // viewer's own messages are skipped within it, not excluded from it.
        let marked = self.conn().execute(
            "INSERT OR IGNORE INTO message_delivered (message_id, user_id)
             SELECT id, ?2 FROM (
                 SELECT id, sender FROM messages
                 WHERE conversation_id = ?1
                 ORDER BY seq DESC
                 LIMIT ?3
             )
             WHERE sender != ?2",
            params![
                conversation.to_string(),
                viewer.to_string(),
                RECONCILE_SCAN_LIMIT,
            ],
        )?;

        if marked > 0 {
            tracing::debug!(
                conversation = %conversation,
                viewer = %viewer,
                marked,
                "messages marked delivered"
            );
        }
        Ok(marked)
    }

    /// Mark the conversation's recent messages as seen by `viewer`.
    ///
    /// Seen implies delivered: the viewer is unioned into both receipt sets
    /// so `seen_by ⊆ delivered_to` holds after any call sequence.
    pub fn mark_seen(&self, conversation: ConversationId, viewer: UserId) -> Result<usize> {
        // Delivered first: if the second insert is never reached, the state
        // is still a valid prefix of the lattice.
        self.mark_delivered(conversation, viewer)?;

        let marked = self.conn().execute(
            "INSERT OR IGNORE INTO message_seen (message_id, user_id)
             SELECT id, ?2 FROM (
                 SELECT id, sender FROM messages
                 WHERE conversation_id = ?1
                 ORDER BY seq DESC
                 LIMIT ?3
             )
             WHERE sender != ?2",
            params![
                conversation.to_string(),
                viewer.to_string(),
                RECONCILE_SCAN_LIMIT,
            ],
        )?;

        if marked > 0 {
            tracing::debug!(
                conversation = %conversation,
                viewer = %viewer,
                marked,
                "messages marked seen"
            );
        }
        Ok(marked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use murmur_shared::{MessageType, Sender};

    fn test_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        (dir, db)
    }

    fn fixture(db: &Database) -> (UserId, UserId, ConversationId) {
        let alice = db
            .create_user("idp|alice", "Alice", "a@example.com", "/a.png")
            .unwrap();
        let bob = db
            .create_user("idp|bob", "Bob", "b@example.com", "/b.png")
            .unwrap();
        let conv = db.create_direct(alice.id, bob.id).unwrap();
        (alice.id, bob.id, conv.id)
    }

    #[test]
    fn mark_seen_records_both_receipts() {
        let (_dir, db) = test_db();
        let (alice, bob, conv) = fixture(&db);

        db.send_message(conv, &Sender::User(alice), "hi", MessageType::Text, None)
            .unwrap();

        // Before reconciliation the message is bare.
        let feed = db.fetch_feed(conv, 10).unwrap();
        assert!(feed[0].delivered_to.is_empty());
        assert!(feed[0].seen_by.is_empty());

        db.mark_seen(conv, bob).unwrap();

        let feed = db.fetch_feed(conv, 10).unwrap();
        assert_eq!(feed[0].delivered_to, vec![bob]);
        assert_eq!(feed[0].seen_by, vec![bob]);
    }

    #[test]
    fn reconciliation_is_idempotent() {
        let (_dir, db) = test_db();
        let (alice, bob, conv) = fixture(&db);

        db.send_message(conv, &Sender::User(alice), "hi", MessageType::Text, None)
            .unwrap();

        assert_eq!(db.mark_seen(conv, bob).unwrap(), 1);
        let after_once = db.fetch_feed(conv, 10).unwrap();

        assert_eq!(db.mark_seen(conv, bob).unwrap(), 0);
        let after_twice = db.fetch_feed(conv, 10).unwrap();

        assert_eq!(after_once, after_twice);
    }

    #[test]
    fn receipts_are_monotonic_across_call_orders() {
        let (_dir, db) = test_db();
        let (alice, bob, conv) = fixture(&db);

        db.send_message(conv, &Sender::User(alice), "hi", MessageType::Text, None)
            .unwrap();

        db.mark_seen(conv, bob).unwrap();
        // A later delivered-only pass must not demote the seen state.
        db.mark_delivered(conv, bob).unwrap();

        let feed = db.fetch_feed(conv, 10).unwrap();
        assert_eq!(feed[0].seen_by, vec![bob]);
        assert_eq!(feed[0].delivered_to, vec![bob]);
    }

    #[test]
    fn seen_implies_delivered_for_every_message() {
        let (_dir, db) = test_db();
        let (alice, bob, conv) = fixture(&db);

        for i in 0..10 {
            db.send_message(
                conv,
                &Sender::User(alice),
                &format!("m{i}"),
                MessageType::Text,
                None,
            )
            .unwrap();
        }

        db.mark_seen(conv, bob).unwrap();

        for message in db.fetch_feed(conv, 100).unwrap() {
            for user in &message.seen_by {
                assert!(message.delivered_to.contains(user));
            }
        }
    }

    #[test]
    fn sender_is_never_marked_on_own_messages() {
        let (_dir, db) = test_db();
        let (alice, bob, conv) = fixture(&db);

        db.send_message(conv, &Sender::User(alice), "mine", MessageType::Text, None)
            .unwrap();
        db.send_message(conv, &Sender::User(bob), "yours", MessageType::Text, None)
            .unwrap();

        db.mark_seen(conv, alice).unwrap();
        db.mark_seen(conv, bob).unwrap();

        for message in db.fetch_feed(conv, 10).unwrap() {
            let sender = message.sender.sender;
            assert!(message.delivered_to.iter().all(|u| !sender.is(u)));
            assert!(message.seen_by.iter().all(|u| !sender.is(u)));
        }
    }

    #[test]
    fn concurrent_viewers_converge() {
        let (_dir, db) = test_db();
        let alice = db
            .create_user("idp|alice", "Alice", "a@example.com", "/a.png")
            .unwrap();
        let bob = db
            .create_user("idp|bob", "Bob", "b@example.com", "/b.png")
            .unwrap();
        let carol = db
            .create_user("idp|carol", "Carol", "c@example.com", "/c.png")
            .unwrap();
        let group = db
            .create_group(alice.id, "team", None, &[bob.id, carol.id])
            .unwrap();

        db.send_message(group.id, &Sender::User(alice.id), "hi all", MessageType::Text, None)
            .unwrap();

        // Interleave two viewers in both orders; the final receipt sets are
        // the same union either way.
        db.mark_delivered(group.id, bob.id).unwrap();
        db.mark_seen(group.id, carol.id).unwrap();
        db.mark_seen(group.id, bob.id).unwrap();
        db.mark_delivered(group.id, carol.id).unwrap();

        let feed = db.fetch_feed(group.id, 10).unwrap();
        let mut delivered = feed[0].delivered_to.clone();
        let mut seen = feed[0].seen_by.clone();
        delivered.sort();
        seen.sort();
        let mut expected = vec![bob.id, carol.id];
        expected.sort();
        assert_eq!(delivered, expected);
        assert_eq!(seen, expected);
    }

    #[test]
    fn scenario_send_then_seen_round_trip() {
        let (_dir, db) = test_db();
        let (alice, bob, conv) = fixture(&db);

        db.send_message(conv, &Sender::User(alice), "hi", MessageType::Text, None)
            .unwrap();

        let feed = db.fetch_feed(conv, 10).unwrap();
        assert_eq!(feed.len(), 1);
        assert!(feed[0].delivered_to.is_empty());
        assert!(feed[0].seen_by.is_empty());

        db.mark_seen(conv, bob).unwrap();

        let feed = db.fetch_feed(conv, 10).unwrap();
        assert_eq!(feed[0].delivered_to, vec![bob]);
        assert_eq!(feed[0].seen_by, vec![bob]);
    }

    #[test]
    fn scan_window_is_the_newest_messages_regardless_of_sender() {
        let (_dir, db) = test_db();
        let (alice, bob, conv) = fixture(&db);

        // One old message from alice, then enough of bob's own messages to
        // fill the entire scan window.
        db.send_message(conv, &Sender::User(alice), "early", MessageType::Text, None)
            .unwrap();
        for i in 0..RECONCILE_SCAN_LIMIT {
            db.send_message(
                conv,
                &Sender::User(bob),
                &format!("b{i}"),
                MessageType::Text,
                None,
            )
            .unwrap();
        }

        // Bob's pass scans the newest window, which is all his own
        // messages; alice's older message sits outside it and stays bare.
        assert_eq!(db.mark_delivered(conv, bob).unwrap(), 0);
        let feed = db.fetch_feed(conv, RECONCILE_SCAN_LIMIT + 10).unwrap();
        let early = feed.iter().find(|m| m.content == "early").unwrap();
        assert!(early.delivered_to.is_empty());

        // Alice's pass marks every message in the window (none are hers).
        assert_eq!(
            db.mark_delivered(conv, alice).unwrap(),
            RECONCILE_SCAN_LIMIT as usize
        );
    }

    #[test]
    fn reconciling_an_empty_conversation_is_fine() {
        let (_dir, db) = test_db();
        let (_, bob, conv) = fixture(&db);

        assert_eq!(db.mark_delivered(conv, bob).unwrap(), 0);
        assert_eq!(db.mark_seen(conv, bob).unwrap(), 0);
    }

    #[test]
    fn unsend_after_seen_removes_receipts() {
        let (_dir, db) = test_db();
        let (alice, bob, conv) = fixture(&db);

        let id = db
            .send_message(conv, &Sender::User(alice), "hi", MessageType::Text, None)
            .unwrap();
        db.mark_seen(conv, bob).unwrap();
        db.unsend_message(id, alice).unwrap();

        assert!(matches!(db.get_message(id), Err(StoreError::NotFound)));
        let orphans: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM message_delivered", [], |r| r.get(0))
            .unwrap();
        assert_eq!(orphans, 0);
    }
}
