use parley_db::Database;
use parley_types::models::{Message, NewMessage, PersistedMessage};

use crate::error::StorageError;

/// Durable message storage as the relay sees it. Calls are blocking; async
/// callers wrap them in `spawn_blocking`.
pub trait MessageStore: Send + Sync + 'static {
    /// Stores an unread message and assigns its id and timestamp.
    fn persist(&self, msg: &NewMessage) -> Result<PersistedMessage, StorageError>;

    /// The conversation between two users, oldest first.
    fn query_history(&self, user_a: i64, user_b: i64) -> Result<Vec<Message>, StorageError>;

    /// Marks every unread `sender_id -> recipient_id` message read.
    fn mark_read(&self, sender_id: i64, recipient_id: i64) -> Result<usize, StorageError>;
}

impl MessageStore for Database {
    fn persist(&self, msg: &NewMessage) -> Result<PersistedMessage, StorageError> {
        Ok(self.insert_message(msg)?)
    }

    fn query_history(&self, user_a: i64, user_b: i64) -> Result<Vec<Message>, StorageError> {
        Ok(self.get_history(user_a, user_b)?)
    }

    fn mark_read(&self, sender_id: i64, recipient_id: i64) -> Result<usize, StorageError> {
        Ok(Database::mark_read(self, sender_id, recipient_id)?)
    }
}
