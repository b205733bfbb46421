/// Application name
pub const APP_NAME: &str = "Murmur";

/// Hard cap on the number of messages a single feed fetch may return.
/// Callers needing older history must page explicitly.
pub const FEED_FETCH_CAP: u32 = 1000;

/// Default feed fetch size when the caller does not specify a limit.
pub const FEED_FETCH_DEFAULT: u32 = 50;

/// How many of a conversation's most recent messages a single
/// delivered/seen reconciliation pass scans.
pub const RECONCILE_SCAN_LIMIT: u32 = 500;

/// A newly arrived message only triggers a notification if it was created
/// within this window.  Keeps historical backfill and initial loads quiet.
pub const NOTIFY_RECENCY_WINDOW_SECS: i64 = 120;

/// Maximum number of results returned by a message search.
pub const SEARCH_RESULT_LIMIT: usize = 100;

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Display name shown for messages from the built-in assistant sender.
pub const ASSISTANT_DISPLAY_NAME: &str = "ChatGPT";

/// Avatar shown for assistant text replies.
pub const ASSISTANT_TEXT_AVATAR: &str = "/gpt.png";

/// Avatar shown for assistant-generated media.
pub const ASSISTANT_MEDIA_AVATAR: &str = "/dall-e.png";

/// Fallback avatar for deleted or unknown users.
pub const PLACEHOLDER_AVATAR: &str = "/placeholder.png";
