//! Thread-safe handle shared by request handlers and background jobs.
//!
//! A [`MessageStore`] wraps one [`Database`] in `Arc<Mutex<>>`.  Each call
//! holds the lock for exactly one store operation, so operations on the same
//! message or user are serialized and a reader never sees half of another
//! caller's transaction.

use std::sync::{Arc, Mutex, MutexGuard};

use uuid::Uuid;

use crate::cascade::CleanupReport;
use crate::config::StoreConfig;
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::integrity::IntegrityReport;
use crate::models::{
    Message, MessageFilter, MessageHistory, NewUser, Notification, ThreadNode, UnreadMessage,
    User,
};

/// Cloneable, `Send + Sync` access to the message store.
#[derive(Clone)]
pub struct MessageStore {
    db: Arc<Mutex<Database>>,
}

impl MessageStore {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    /// Open the database described by `config` and wrap it.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        Ok(Self::new(Database::open(config)?))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Database>> {
        self.db.lock().map_err(|_| StoreError::LockPoisoned)
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    pub fn create_user(&self, new: NewUser) -> Result<User> {
        self.lock()?.create_user(new)
    }

    pub fn get_user(&self, id: Uuid) -> Result<User> {
        self.lock()?.get_user(id)
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<User> {
        self.lock()?.get_user_by_username(username)
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        self.lock()?.list_users()
    }

    pub fn delete_user(&self, id: Uuid) -> Result<CleanupReport> {
        self.lock()?.delete_user(id)
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    pub fn create_message(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        content: &str,
        parent_id: Option<Uuid>,
    ) -> Result<Message> {
        self.lock()?.create_message(sender_id, receiver_id, content, parent_id)
    }

    pub fn get_message(&self, id: Uuid) -> Result<Message> {
        self.lock()?.get_message(id)
    }

    pub fn update_message_content(
        &self,
        message_id: Uuid,
        new_content: &str,
        editor_id: Uuid,
    ) -> Result<Message> {
        self.lock()?.update_message_content(message_id, new_content, editor_id)
    }

    pub fn mark_read(&self, message_id: Uuid, actor_id: Uuid) -> Result<Message> {
        self.lock()?.mark_read(message_id, actor_id)
    }

    pub fn delete_message(&self, message_id: Uuid, actor_id: Uuid) -> Result<CleanupReport> {
        self.lock()?.delete_message(message_id, actor_id)
    }

    pub fn get_unread(&self, user_id: Uuid) -> Result<Vec<UnreadMessage>> {
        self.lock()?.get_unread(user_id)
    }

    pub fn unread_count(&self, user_id: Uuid) -> Result<u64> {
        self.lock()?.unread_count(user_id)
    }

    pub fn get_conversation(&self, user_a: Uuid, user_b: Uuid) -> Result<Vec<Message>> {
        self.lock()?.get_conversation(user_a, user_b)
    }

    pub fn search_messages(&self, user_id: Uuid, filter: &MessageFilter) -> Result<Vec<Message>> {
        self.lock()?.search_messages(user_id, filter)
    }

    pub fn get_message_history(&self, message_id: Uuid) -> Result<Vec<MessageHistory>> {
        self.lock()?.get_message_history(message_id)
    }

    // ------------------------------------------------------------------
    // Notifications
    // ------------------------------------------------------------------

    pub fn list_notifications(
        &self,
        user_id: Uuid,
        unread_only: bool,
    ) -> Result<Vec<Notification>> {
        self.lock()?.list_notifications(user_id, unread_only)
    }

    pub fn notifications_for_message(&self, message_id: Uuid) -> Result<Vec<Notification>> {
        self.lock()?.notifications_for_message(message_id)
    }

    pub fn mark_notification_read(
        &self,
        notification_id: Uuid,
        actor_id: Uuid,
    ) -> Result<Notification> {
        self.lock()?.mark_notification_read(notification_id, actor_id)
    }

    // ------------------------------------------------------------------
    // Threads
    // ------------------------------------------------------------------

    pub fn get_thread(&self, message_id: Uuid) -> Result<ThreadNode> {
        self.lock()?.get_thread(message_id)
    }

    pub fn get_top_level_threads(&self, user_id: Uuid) -> Result<Vec<ThreadNode>> {
        self.lock()?.get_top_level_threads(user_id)
    }

    pub fn get_replies(&self, message_id: Uuid) -> Result<Vec<Message>> {
        self.lock()?.get_replies(message_id)
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    pub fn check_integrity(&self) -> Result<IntegrityReport> {
        self.lock()?.check_integrity()
    }
}
