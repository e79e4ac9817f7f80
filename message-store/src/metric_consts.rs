pub const MESSAGES_RECEIVED: &str = "message_store_messages_received";
pub const MESSAGES_COMMITTED: &str = "message_store_messages_committed";
pub const MESSAGES_PUBLISHED: &str = "message_store_messages_published";
pub const FETCH_FAILURES: &str = "message_store_fetch_failures";
pub const DISPATCH_FAILURES: &str = "message_store_dispatch_failures";
pub const COMMIT_RETRIES: &str = "message_store_commit_retries";
pub const COMMIT_FAILURES: &str = "message_store_commit_failures";
pub const PUBLISH_FAILURES: &str = "message_store_publish_failures";
pub const MESSAGES_STORED: &str = "message_store_messages_stored";
pub const HANDLED_BYTES: &str = "message_store_handled_bytes";
