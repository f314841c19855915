//! # parley-store
//!
//! Transactional message store for the Parley direct-messaging service,
//! backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and a [`MessageStore`] that shares one database
//! between threads.  Every mutating operation runs in a single transaction
//! together with its follow-on effects: notifications on send, edit history
//! on content changes, and cascading cleanup when messages or users are
//! deleted.

pub mod cascade;
pub mod clock;
pub mod config;
pub mod database;
pub mod history;
pub mod integrity;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod notifications;
pub mod store;
pub mod threads;
pub mod users;

mod error;
#[cfg(test)]
mod test_support;

pub use cascade::CleanupReport;
pub use clock::{Clock, SteppingClock, SystemClock};
pub use config::StoreConfig;
pub use database::Database;
pub use error::{Result, StoreError};
pub use integrity::{IntegrityReport, Violation};
pub use models::*;
pub use store::MessageStore;
