//! In-process store used by the notification tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::models::{Todo, User};
use crate::store::{AccountStore, TaskStore};

#[derive(Default)]
pub struct MemoryStore {
    todos: Mutex<Vec<Todo>>,
    users: Mutex<Vec<User>>,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn new(users: Vec<User>, todos: Vec<Todo>) -> Self {
        Self {
            todos: Mutex::new(todos),
            users: Mutex::new(users),
            failing: AtomicBool::new(false),
        }
    }

    /// Makes every subsequent query fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn todo(&self, id: &str) -> Option<Todo> {
        self.todos.lock().unwrap().iter().find(|t| t.id == id).cloned()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(mongodb::error::Error::custom("store unavailable").into())
        } else {
            Ok(())
        }
    }

    fn select(&self, pred: impl Fn(&Todo) -> bool) -> Vec<Todo> {
        self.todos
            .lock()
            .unwrap()
            .iter()
            .filter(|t| pred(t))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn pending_reminders(&self, now: DateTime<Utc>) -> Result<Vec<Todo>, StoreError> {
        self.check()?;
        Ok(self.select(|t| {
            !t.is_completed()
                && t.due_date.is_some_and(|d| d > now)
                && t.reminder.as_ref().is_some_and(|r| r.enabled && !r.email_sent)
        }))
    }

    async fn overdue_for_user(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Todo>, StoreError> {
        self.check()?;
        Ok(self.select(|t| t.user_id == user_id && t.is_overdue_at(now)))
    }

    async fn mark_reminder_sent(
        &self,
        todo_id: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.check()?;
        let mut todos = self.todos.lock().unwrap();
        let reminder = todos
            .iter_mut()
            .find(|t| t.id == todo_id)
            .and_then(|t| t.reminder.as_mut())
            .filter(|r| !r.email_sent);
        Ok(match reminder {
            Some(r) => {
                r.email_sent = true;
                r.email_sent_at = Some(sent_at);
                true
            }
            None => false,
        })
    }

    async fn find_todo(&self, todo_id: &str) -> Result<Option<Todo>, StoreError> {
        self.check()?;
        Ok(self.todo(todo_id))
    }

    async fn count_open_due_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        self.check()?;
        let n = self
            .select(|t| !t.is_completed() && t.due_date.is_some_and(|d| d >= start && d < end))
            .len();
        Ok(n as u64)
    }

    async fn count_overdue(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        self.check()?;
        Ok(self.select(|t| t.is_overdue_at(now)).len() as u64)
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn find_user(&self, user_id: &str) -> Result<Option<User>, StoreError> {
        self.check()?;
        Ok(self.users.lock().unwrap().iter().find(|u| u.id == user_id).cloned())
    }

    async fn find_users(&self, user_ids: &[String]) -> Result<Vec<User>, StoreError> {
        self.check()?;
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .filter(|u| user_ids.contains(&u.id))
            .cloned()
            .collect())
    }

    async fn overdue_subscribers(&self) -> Result<Vec<User>, StoreError> {
        self.check()?;
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.email_notifications.wants_overdue_notifications())
            .cloned()
            .collect())
    }

    async fn count_notifications_enabled(&self) -> Result<u64, StoreError> {
        self.check()?;
        let n = self
            .users
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.email_notifications.enabled)
            .count();
        Ok(n as u64)
    }
}
