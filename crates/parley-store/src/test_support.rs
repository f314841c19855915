use std::sync::Arc;

use crate::clock::SteppingClock;
use crate::database::Database;
use crate::models::{NewUser, User};

/// In-memory database whose clock ticks one second per reading.
pub(crate) fn test_db() -> Database {
    Database::open_in_memory()
        .unwrap()
        .with_clock(Arc::new(SteppingClock::default()))
}

pub(crate) fn user(db: &mut Database, name: &str) -> User {
    db.create_user(NewUser::new(name)).unwrap()
}
