//! Fallback-only feed cache.
//!
//! The cache is never consulted while the server is reachable; it exists so
//! a conversation opens instantly (and offline) with the last feed the
//! client ever saw.  Writes are last-authoritative-wins: every successful
//! fetch overwrites the cached feed wholesale.

use std::fs;
use std::path::PathBuf;

use directories::ProjectDirs;

use murmur_shared::protocol::FeedMessage;
use murmur_shared::ConversationId;

use crate::error::{ClientError, Result};

pub struct FeedCache {
    dir: PathBuf,
}

impl FeedCache {
    /// Open a cache rooted at `dir`, creating the directory if needed.
    pub fn open(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Open the cache in the platform cache directory.
    pub fn open_default() -> Result<Self> {
        let dirs = ProjectDirs::from("com", "murmur", "murmur")
            .ok_or(ClientError::NoCacheDir)?;
        Self::open(dirs.cache_dir().join("feeds"))
    }

    fn path_for(&self, conversation: ConversationId) -> PathBuf {
        self.dir.join(format!("{conversation}.json"))
    }

    /// The cached feed for a conversation, if any.  A corrupt cache file is
    /// treated as absent; the cache must never take down a feed render.
    pub fn get(&self, conversation: ConversationId) -> Option<Vec<FeedMessage>> {
        let path = self.path_for(conversation);
        let bytes = fs::read(&path).ok()?;

        match serde_json::from_slice(&bytes) {
            Ok(feed) => Some(feed),
            Err(e) => {
                tracing::warn!(
                    conversation = %conversation,
                    error = %e,
                    "discarding corrupt feed cache entry"
                );
                None
            }
        }
    }

    /// Overwrite the cached feed for a conversation.
    pub fn set(&self, conversation: ConversationId, feed: &[FeedMessage]) -> Result<()> {
        let bytes = serde_json::to_vec(feed)?;
        fs::write(self.path_for(conversation), bytes)?;
        Ok(())
    }

    /// Drop the cached feed for a conversation, if present.
    pub fn remove(&self, conversation: ConversationId) -> Result<()> {
        match fs::remove_file(self.path_for(conversation)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use murmur_shared::protocol::SenderProfile;
    use murmur_shared::{MessageId, MessageType, Sender, UserId};

    fn message(conversation: ConversationId, content: &str) -> FeedMessage {
        FeedMessage {
            id: MessageId::new(),
            conversation,
            sender: SenderProfile {
                sender: Sender::User(UserId::new()),
                name: "Alice".into(),
                image: "/a.png".into(),
            },
            content: content.into(),
            message_type: MessageType::Text,
            created_at: Utc::now(),
            delivered_to: vec![],
            seen_by: vec![],
            reply_to: None,
        }
    }

    #[test]
    fn set_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FeedCache::open(dir.path().to_path_buf()).unwrap();
        let conv = ConversationId::new();

        assert!(cache.get(conv).is_none());

        let feed = vec![message(conv, "hello")];
        cache.set(conv, &feed).unwrap();
        assert_eq!(cache.get(conv).unwrap(), feed);
    }

    #[test]
    fn set_overwrites_wholesale() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FeedCache::open(dir.path().to_path_buf()).unwrap();
        let conv = ConversationId::new();

        cache.set(conv, &[message(conv, "old")]).unwrap();
        let newer = vec![message(conv, "newer"), message(conv, "old")];
        cache.set(conv, &newer).unwrap();

        assert_eq!(cache.get(conv).unwrap(), newer);
    }

    #[test]
    fn corrupt_entry_reads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FeedCache::open(dir.path().to_path_buf()).unwrap();
        let conv = ConversationId::new();

        fs::write(cache.path_for(conv), b"{not json").unwrap();
        assert!(cache.get(conv).is_none());
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FeedCache::open(dir.path().to_path_buf()).unwrap();
        let conv = ConversationId::new();

        cache.set(conv, &[message(conv, "x")]).unwrap();
        cache.remove(conv).unwrap();
        cache.remove(conv).unwrap();
        assert!(cache.get(conv).is_none());
    }
}
