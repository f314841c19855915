//! Domain model structs persisted in the SQLite database.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to the web layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A registered user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    /// Unique login name.
    pub username: String,
    /// Optional human-readable display name.
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Attributes accepted by [`Database::create_user`](crate::Database::create_user).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewUser {
    pub username: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
}

impl NewUser {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A direct message from one user to another, optionally replying to an
/// earlier message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
    /// Set once on creation.
    pub created_at: DateTime<Utc>,
    /// Whether the receiver has read the message.
    pub read: bool,
    /// `true` once the content has been changed at least once.
    pub edited: bool,
    /// Time of the latest edit; `Some` exactly when `edited` is `true`.
    pub edited_at: Option<DateTime<Utc>>,
    /// Author of the latest edit.  Cleared when that user is deleted.
    pub edited_by: Option<Uuid>,
    /// The message this one replies to.
    pub parent_message_id: Option<Uuid>,
}

impl Message {
    pub fn is_thread_start(&self) -> bool {
        self.parent_message_id.is_none()
    }
}

/// Minimal projection returned by the unread-inbox query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnreadMessage {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub sender_username: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Criteria for [`Database::search_messages`](crate::Database::search_messages).
/// Unset fields do not filter.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageFilter {
    /// Only messages sent by this user.
    pub sender_id: Option<Uuid>,
    /// Only messages created at or after this instant.
    pub since: Option<DateTime<Utc>>,
    /// Only messages created at or before this instant.
    pub until: Option<DateTime<Utc>>,
    /// Case-insensitive substring of the content or the sender's username.
    pub text: Option<String>,
}

// ---------------------------------------------------------------------------
// MessageHistory
// ---------------------------------------------------------------------------

/// Snapshot of a message's content taken just before an edit overwrote it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageHistory {
    pub id: Uuid,
    pub message_id: Uuid,
    /// The content as it was before the edit.
    pub content: String,
    pub edited_at: DateTime<Utc>,
    /// Who wrote `content`: the previous editor, or the sender for the first
    /// edit.
    pub edited_by: Option<Uuid>,
}

// ---------------------------------------------------------------------------
// Notification
// ---------------------------------------------------------------------------

/// Pending alert for the receiver of a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notification {
    pub id: Uuid,
    /// Recipient.
    pub user_id: Uuid,
    pub message_id: Uuid,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Threads
// ---------------------------------------------------------------------------

/// A message together with its reply tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ThreadNode {
    pub message: Message,
    /// Direct replies, oldest first.
    pub replies: Vec<ThreadNode>,
}

impl ThreadNode {
    /// Number of messages in this subtree, including the root.
    pub fn len(&self) -> usize {
        1 + self.replies.iter().map(ThreadNode::len).sum::<usize>()
    }

    /// Always `false`: a thread contains at least its root.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Message ids in depth-first pre-order.
    pub fn message_ids(&self) -> Vec<Uuid> {
        let mut ids = Vec::with_capacity(self.len());
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            ids.push(node.message.id);
            stack.extend(node.replies.iter().rev());
        }
        ids
    }
}
