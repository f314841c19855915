//! Read-only assembly of reply trees.

use std::collections::{HashSet, VecDeque};

use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::messages::{fetch_message, row_to_message, MESSAGE_COLUMNS};
use crate::models::{Message, ThreadNode};
use crate::users::require_user;

impl Database {
    /// A message with all of its direct and transitive replies.
    pub fn get_thread(&self, message_id: Uuid) -> Result<ThreadNode> {
        let tx = self.begin_read()?;
        let root = fetch_message(&tx, message_id)?;
        build_thread(&tx, root)
    }

    /// Conversation starters the user sent or received, newest first, each
    /// with its reply tree.
    pub fn get_top_level_threads(&self, user_id: Uuid) -> Result<Vec<ThreadNode>> {
        let tx = self.begin_read()?;
        require_user(&tx, user_id)?;

        let roots = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE (sender_id = ?1 OR receiver_id = ?1) AND parent_message_id IS NULL
                 ORDER BY created_at DESC, rowid DESC"
            ))?;
            let rows = stmt.query_map(params![user_id.to_string()], row_to_message)?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        };

        let threads = roots
            .into_iter()
            .map(|root| build_thread(&tx, root))
            .collect::<Result<Vec<_>>>()?;
        Ok(threads)
    }

    /// Direct replies to `message_id`, oldest first.
    pub fn get_replies(&self, message_id: Uuid) -> Result<Vec<Message>> {
        let tx = self.begin_read()?;
        fetch_message(&tx, message_id)?;
        replies_of(&tx, message_id)
    }
}

fn replies_of(conn: &Connection, parent_id: Uuid) -> Result<Vec<Message>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages
         WHERE parent_message_id = ?1
         ORDER BY created_at ASC, rowid ASC"
    ))?;
    let rows = stmt.query_map(params![parent_id.to_string()], row_to_message)?;
    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(StoreError::Sqlite)
}

/// Breadth-first walk from `root` into an arena, then bottom-up assembly of
/// the nested tree.  Neither phase recurses, so depth is bounded only by
/// memory.  Meeting a message twice means the parent links loop.
fn build_thread(conn: &Connection, root: Message) -> Result<ThreadNode> {
    let mut visited = HashSet::from([root.id]);
    let mut nodes: Vec<Message> = vec![root];
    let mut children: Vec<Vec<usize>> = vec![Vec::new()];
    let mut queue = VecDeque::from([0usize]);

    while let Some(idx) = queue.pop_front() {
        let parent_id = nodes[idx].id;
        for reply in replies_of(conn, parent_id)? {
            if !visited.insert(reply.id) {
                return Err(StoreError::Integrity(format!(
                    "reply chain through message {} loops back on itself",
                    reply.id
                )));
            }
            let child = nodes.len();
            nodes.push(reply);
            children.push(Vec::new());
            children[idx].push(child);
            queue.push_back(child);
        }
    }

    // Children always sit at higher indices than their parent, so a reverse
    // sweep sees every subtree complete before its parent needs it.
    let mut built: Vec<Option<ThreadNode>> = Vec::with_capacity(nodes.len());
    built.resize_with(nodes.len(), || None);
    for (idx, message) in nodes.into_iter().enumerate().rev() {
        let replies = children[idx]
            .iter()
            .map(|&child| {
                built[child].take().ok_or_else(|| {
                    StoreError::Integrity(format!("reply {child} assembled twice"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        built[idx] = Some(ThreadNode { message, replies });
    }

    built
        .into_iter()
        .next()
        .flatten()
        .ok_or_else(|| StoreError::Integrity("thread root missing after assembly".into()))
}
