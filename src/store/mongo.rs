use async_trait::async_trait;
use bson::{doc, DateTime as BsonDateTime, Document};
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use mongodb::{Collection, Database};

use crate::error::StoreError;
use crate::models::{Todo, TodoDocument, TodoStatus, User, UserDocument, TODOS, USERS};
use crate::store::{AccountStore, TaskStore};

#[derive(Clone)]
pub struct MongoStore {
    db: Database,
}

impl MongoStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn todos(&self) -> Collection<TodoDocument> {
        self.db.collection(TODOS)
    }

    fn users(&self) -> Collection<UserDocument> {
        self.db.collection(USERS)
    }
}

fn open() -> Document {
    doc! { "$ne": TodoStatus::Completed.as_str() }
}

/// Open todos with an armed, unsent reminder that are still upcoming.
fn pending_reminders_filter(now: DateTime<Utc>) -> Document {
    doc! {
        "status": open(),
        "due_date": { "$ne": null, "$gt": BsonDateTime::from_chrono(now) },
        "reminder.enabled": true,
        "reminder.email_sent": false,
    }
}

fn overdue_filter(now: DateTime<Utc>) -> Document {
    doc! {
        "status": open(),
        "due_date": { "$lt": BsonDateTime::from_chrono(now) },
    }
}

fn overdue_for_user_filter(user_id: &str, now: DateTime<Utc>) -> Document {
    let mut filter = overdue_filter(now);
    filter.insert("user_id", user_id);
    filter
}

/// Matches only while the reminder is unsent, so two sweeps racing on the
/// same todo cannot both claim it.
fn unsent_reminder_filter(todo_id: &str) -> Document {
    doc! { "_id": todo_id, "reminder.email_sent": false }
}

fn open_due_between_filter(start: DateTime<Utc>, end: DateTime<Utc>) -> Document {
    doc! {
        "status": open(),
        "due_date": {
            "$gte": BsonDateTime::from_chrono(start),
            "$lt": BsonDateTime::from_chrono(end),
        },
    }
}

fn overdue_subscribers_filter() -> Document {
    doc! {
        "email_notifications.enabled": true,
        "email_notifications.overdue_notification": true,
    }
}

#[async_trait]
impl TaskStore for MongoStore {
    async fn pending_reminders(&self, now: DateTime<Utc>) -> Result<Vec<Todo>, StoreError> {
        let docs: Vec<TodoDocument> = self
            .todos()
            .find(pending_reminders_filter(now))
            .await?
            .try_collect()
            .await?;
        Ok(docs.into_iter().map(Todo::from).collect())
    }

    async fn overdue_for_user(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Todo>, StoreError> {
        let docs: Vec<TodoDocument> = self
            .todos()
            .find(overdue_for_user_filter(user_id, now))
            .await?
            .try_collect()
            .await?;
        Ok(docs.into_iter().map(Todo::from).collect())
    }

    async fn mark_reminder_sent(
        &self,
        todo_id: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let sent_at = BsonDateTime::from_chrono(sent_at);
        let result = self
            .todos()
            .update_one(
                unsent_reminder_filter(todo_id),
                doc! { "$set": {
                    "reminder.email_sent": true,
                    "reminder.email_sent_at": sent_at,
                    "updated_at": sent_at,
                } },
            )
            .await?;
        Ok(result.modified_count == 1)
    }

    async fn find_todo(&self, todo_id: &str) -> Result<Option<Todo>, StoreError> {
        let found = self.todos().find_one(doc! { "_id": todo_id }).await?;
        Ok(found.map(Todo::from))
    }

    async fn count_open_due_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        Ok(self
            .todos()
            .count_documents(open_due_between_filter(start, end))
            .await?)
    }

    async fn count_overdue(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        Ok(self.todos().count_documents(overdue_filter(now)).await?)
    }
}

#[async_trait]
impl AccountStore for MongoStore {
    async fn find_user(&self, user_id: &str) -> Result<Option<User>, StoreError> {
        let found = self.users().find_one(doc! { "_id": user_id }).await?;
        Ok(found.map(User::from))
    }

    async fn find_users(&self, user_ids: &[String]) -> Result<Vec<User>, StoreError> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }
        let docs: Vec<UserDocument> = self
            .users()
            .find(doc! { "_id": { "$in": user_ids.to_vec() } })
            .await?
            .try_collect()
            .await?;
        Ok(docs.into_iter().map(User::from).collect())
    }

    async fn overdue_subscribers(&self) -> Result<Vec<User>, StoreError> {
        let docs: Vec<UserDocument> = self
            .users()
            .find(overdue_subscribers_filter())
            .await?
            .try_collect()
            .await?;
        Ok(docs.into_iter().map(User::from).collect())
    }

    async fn count_notifications_enabled(&self) -> Result<u64, StoreError> {
        Ok(self
            .users()
            .count_documents(doc! { "email_notifications.enabled": true })
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::Bson;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 10, 12, 0, 0).unwrap()
    }

    fn excludes_completed(filter: &Document) {
        let status = filter.get_document("status").unwrap();
        assert_eq!(status.get_str("$ne").unwrap(), "completed");
    }

    #[test]
    fn pending_reminders_only_match_armed_unsent_upcoming() {
        let filter = pending_reminders_filter(now());
        excludes_completed(&filter);
        assert!(filter.get_bool("reminder.enabled").unwrap());
        assert!(!filter.get_bool("reminder.email_sent").unwrap());

        let due = filter.get_document("due_date").unwrap();
        assert_eq!(due.get("$ne"), Some(&Bson::Null));
        assert_eq!(
            due.get_datetime("$gt").unwrap(),
            &BsonDateTime::from_chrono(now())
        );
    }

    #[test]
    fn overdue_filters_are_strictly_before_now() {
        let filter = overdue_for_user_filter("u1", now());
        excludes_completed(&filter);
        assert_eq!(filter.get_str("user_id").unwrap(), "u1");
        let due = filter.get_document("due_date").unwrap();
        assert_eq!(
            due.get_datetime("$lt").unwrap(),
            &BsonDateTime::from_chrono(now())
        );
        assert!(!due.contains_key("$lte"));

        assert!(!overdue_filter(now()).contains_key("user_id"));
    }

    #[test]
    fn mark_sent_is_conditional_on_unsent() {
        let filter = unsent_reminder_filter("t1");
        assert_eq!(filter.get_str("_id").unwrap(), "t1");
        assert!(!filter.get_bool("reminder.email_sent").unwrap());
    }

    #[test]
    fn due_between_is_half_open() {
        let end = now() + Duration::days(1);
        let filter = open_due_between_filter(now(), end);
        excludes_completed(&filter);
        let due = filter.get_document("due_date").unwrap();
        assert_eq!(due.get_datetime("$gte").unwrap(), &BsonDateTime::from_chrono(now()));
        assert_eq!(due.get_datetime("$lt").unwrap(), &BsonDateTime::from_chrono(end));
    }

    #[test]
    fn subscribers_need_both_switches() {
        let filter = overdue_subscribers_filter();
        assert!(filter.get_bool("email_notifications.enabled").unwrap());
        assert!(filter.get_bool("email_notifications.overdue_notification").unwrap());
    }
}
