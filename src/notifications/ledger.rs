//! De-duplication markers for overdue notifications, one per
//! (account, todo, calendar day).

use std::collections::HashSet;
use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;
use bson::{doc, DateTime as BsonDateTime};
use chrono::{DateTime, NaiveDate, Utc};
use mongodb::{Collection, Database};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::models::OVERDUE_NOTICES;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OverdueKey {
    pub user_id: String,
    pub todo_id: String,
    pub day: NaiveDate,
}

impl OverdueKey {
    pub fn new(user_id: &str, todo_id: &str, day: NaiveDate) -> Self {
        Self {
            user_id: user_id.to_string(),
            todo_id: todo_id.to_string(),
            day,
        }
    }
}

impl fmt::Display for OverdueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-overdue-{}", self.user_id, self.todo_id, day_string(self.day))
    }
}

fn day_string(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

#[async_trait]
pub trait OverdueLedger: Send + Sync {
    async fn contains(&self, key: &OverdueKey) -> Result<bool, StoreError>;

    async fn record(&self, key: &OverdueKey, sent_at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Drops every marker dated before `today`. Returns how many went.
    async fn purge_before(&self, today: NaiveDate) -> Result<u64, StoreError>;

    async fn count_for(&self, day: NaiveDate) -> Result<u64, StoreError>;
}

/// Process-local ledger. Markers are lost on restart and are not shared
/// between instances.
#[derive(Default)]
pub struct MemoryLedger {
    keys: Mutex<HashSet<OverdueKey>>,
}

impl MemoryLedger {
    fn keys(&self) -> std::sync::MutexGuard<'_, HashSet<OverdueKey>> {
        self.keys.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl OverdueLedger for MemoryLedger {
    async fn contains(&self, key: &OverdueKey) -> Result<bool, StoreError> {
        Ok(self.keys().contains(key))
    }

    async fn record(&self, key: &OverdueKey, _sent_at: DateTime<Utc>) -> Result<(), StoreError> {
        self.keys().insert(key.clone());
        Ok(())
    }

    async fn purge_before(&self, today: NaiveDate) -> Result<u64, StoreError> {
        let mut keys = self.keys();
        let before = keys.len();
        keys.retain(|k| k.day >= today);
        Ok((before - keys.len()) as u64)
    }

    async fn count_for(&self, day: NaiveDate) -> Result<u64, StoreError> {
        Ok(self.keys().iter().filter(|k| k.day == day).count() as u64)
    }
}

/// A marker as stored in the `overdue_notices` collection. The `_id` is the
/// rendered key, so concurrent instances converge on one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverdueNotice {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: String,
    pub todo_id: String,
    pub day: String,
    pub sent_at: BsonDateTime,
}

#[derive(Clone)]
pub struct MongoLedger {
    notices: Collection<OverdueNotice>,
}

impl MongoLedger {
    pub fn new(db: &Database) -> Self {
        Self {
            notices: db.collection(OVERDUE_NOTICES),
        }
    }
}

#[async_trait]
impl OverdueLedger for MongoLedger {
    async fn contains(&self, key: &OverdueKey) -> Result<bool, StoreError> {
        let found = self
            .notices
            .find_one(doc! { "_id": key.to_string() })
            .await?;
        Ok(found.is_some())
    }

    async fn record(&self, key: &OverdueKey, sent_at: DateTime<Utc>) -> Result<(), StoreError> {
        self.notices
            .update_one(
                doc! { "_id": key.to_string() },
                doc! { "$setOnInsert": {
                    "user_id": &key.user_id,
                    "todo_id": &key.todo_id,
                    "day": day_string(key.day),
                    "sent_at": BsonDateTime::from_chrono(sent_at),
                } },
            )
            .upsert(true)
            .await?;
        Ok(())
    }

    async fn purge_before(&self, today: NaiveDate) -> Result<u64, StoreError> {
        let result = self
            .notices
            .delete_many(doc! { "day": { "$lt": day_string(today) } })
            .await?;
        Ok(result.deleted_count)
    }

    async fn count_for(&self, day: NaiveDate) -> Result<u64, StoreError> {
        Ok(self
            .notices
            .count_documents(doc! { "day": day_string(day) })
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, d).unwrap()
    }

    #[test]
    fn key_renders_with_kind_and_day() {
        let key = OverdueKey::new("u1", "t9", day(5));
        assert_eq!(key.to_string(), "u1-t9-overdue-2026-01-05");
    }

    #[tokio::test]
    async fn memory_ledger_tracks_and_purges_by_day() {
        let ledger = MemoryLedger::default();
        let now = Utc::now();
        ledger.record(&OverdueKey::new("u1", "t1", day(4)), now).await.unwrap();
        ledger.record(&OverdueKey::new("u1", "t1", day(5)), now).await.unwrap();
        ledger.record(&OverdueKey::new("u1", "t2", day(5)), now).await.unwrap();

        assert!(ledger.contains(&OverdueKey::new("u1", "t1", day(4))).await.unwrap());
        assert_eq!(ledger.count_for(day(5)).await.unwrap(), 2);

        assert_eq!(ledger.purge_before(day(5)).await.unwrap(), 1);
        assert!(!ledger.contains(&OverdueKey::new("u1", "t1", day(4))).await.unwrap());
        assert_eq!(ledger.count_for(day(5)).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn recording_twice_keeps_one_marker() {
        let ledger = MemoryLedger::default();
        let key = OverdueKey::new("u1", "t1", day(5));
        ledger.record(&key, Utc::now()).await.unwrap();
        ledger.record(&key, Utc::now()).await.unwrap();
        assert_eq!(ledger.count_for(day(5)).await.unwrap(), 1);
    }
}
