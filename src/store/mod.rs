//! Read/write seams the notification sweep needs from the task and account
//! collections. HTTP handlers talk to MongoDB directly; the sweep goes
//! through these traits so it can run against any backing store.

mod mongo;

#[cfg(test)]
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::models::{Todo, User};

pub use mongo::MongoStore;

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Todos that are not completed, are due after `now`, and carry an
    /// enabled reminder that has not been emailed yet.
    async fn pending_reminders(&self, now: DateTime<Utc>) -> Result<Vec<Todo>, StoreError>;

    /// The user's todos that are not completed and were due before `now`.
    async fn overdue_for_user(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Todo>, StoreError>;

    /// Sets `reminder.email_sent` on a todo whose reminder is still unsent.
    /// Returns false when nothing was updated.
    async fn mark_reminder_sent(
        &self,
        todo_id: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn find_todo(&self, todo_id: &str) -> Result<Option<Todo>, StoreError>;

    /// Non-completed todos with `start <= due_date < end`.
    async fn count_open_due_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    async fn count_overdue(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_user(&self, user_id: &str) -> Result<Option<User>, StoreError>;

    async fn find_users(&self, user_ids: &[String]) -> Result<Vec<User>, StoreError>;

    /// Accounts with both the master switch and overdue notifications on.
    async fn overdue_subscribers(&self) -> Result<Vec<User>, StoreError>;

    async fn count_notifications_enabled(&self) -> Result<u64, StoreError>;
}
