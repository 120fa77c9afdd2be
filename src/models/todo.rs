use std::fmt;
use std::str::FromStr;

use bson::DateTime as BsonDateTime;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Longest reminder offset accepted from clients: one week.
pub const MAX_REMINDER_MINUTES: i64 = 7 * 24 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

impl TodoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TodoStatus::Pending => "pending",
            TodoStatus::InProgress => "in_progress",
            TodoStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for TodoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TodoStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(TodoStatus::Pending),
            "in_progress" => Ok(TodoStatus::InProgress),
            "completed" => Ok(TodoStatus::Completed),
            other => Err(format!("unknown status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            other => Err(format!("unknown priority '{}'", other)),
        }
    }
}

/// Per-todo due-date reminder. `email_sent` only ever goes from false to
/// true in the sweep; task edits that move the due date re-arm it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reminder {
    pub enabled: bool,
    pub minutes_before: i64,
    pub email_sent: bool,
    pub email_sent_at: Option<DateTime<Utc>>,
}

impl Reminder {
    pub fn armed(minutes_before: i64) -> Self {
        Self {
            enabled: true,
            minutes_before,
            email_sent: false,
            email_sent_at: None,
        }
    }

    pub fn disabled(minutes_before: i64) -> Self {
        Self {
            enabled: false,
            ..Self::armed(minutes_before)
        }
    }
}

/// A todo as the API and the notification sweep see it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Todo {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub description: Option<String>,
    pub status: TodoStatus,
    pub priority: Priority,
    pub due_date: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
    pub reminder: Option<Reminder>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Todo {
    pub fn is_completed(&self) -> bool {
        self.status == TodoStatus::Completed
    }

    /// When the due-date reminder should go out, if this todo has one. An
    /// offset that does not fit chrono's range yields `None`.
    pub fn reminder_time(&self) -> Option<DateTime<Utc>> {
        let reminder = self.reminder.as_ref()?;
        let offset = TimeDelta::try_minutes(reminder.minutes_before)?;
        self.due_date?.checked_sub_signed(offset)
    }

    pub fn is_overdue_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_completed() && self.due_date.is_some_and(|due| due < now)
    }
}

/// Storage shape of a todo in the `todos` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: TodoStatus,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub due_date: Option<BsonDateTime>,
    #[serde(default)]
    pub completed_at: Option<BsonDateTime>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub reminder: Option<ReminderDocument>,
    pub created_at: BsonDateTime,
    pub updated_at: BsonDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderDocument {
    pub enabled: bool,
    pub minutes_before: i64,
    #[serde(default)]
    pub email_sent: bool,
    #[serde(default)]
    pub email_sent_at: Option<BsonDateTime>,
}

impl From<ReminderDocument> for Reminder {
    fn from(doc: ReminderDocument) -> Self {
        Self {
            enabled: doc.enabled,
            minutes_before: doc.minutes_before,
            email_sent: doc.email_sent,
            email_sent_at: doc.email_sent_at.map(|d| d.to_chrono()),
        }
    }
}

impl From<&Reminder> for ReminderDocument {
    fn from(reminder: &Reminder) -> Self {
        Self {
            enabled: reminder.enabled,
            minutes_before: reminder.minutes_before,
            email_sent: reminder.email_sent,
            email_sent_at: reminder.email_sent_at.map(BsonDateTime::from_chrono),
        }
    }
}

impl From<TodoDocument> for Todo {
    fn from(doc: TodoDocument) -> Self {
        Self {
            id: doc.id,
            user_id: doc.user_id,
            title: doc.title,
            description: doc.description,
            status: doc.status,
            priority: doc.priority,
            due_date: doc.due_date.map(|d| d.to_chrono()),
            completed_at: doc.completed_at.map(|d| d.to_chrono()),
            tags: doc.tags,
            reminder: doc.reminder.map(Reminder::from),
            created_at: doc.created_at.to_chrono(),
            updated_at: doc.updated_at.to_chrono(),
        }
    }
}

impl From<&Todo> for TodoDocument {
    fn from(todo: &Todo) -> Self {
        Self {
            id: todo.id.clone(),
            user_id: todo.user_id.clone(),
            title: todo.title.clone(),
            description: todo.description.clone(),
            status: todo.status,
            priority: todo.priority,
            due_date: todo.due_date.map(BsonDateTime::from_chrono),
            completed_at: todo.completed_at.map(BsonDateTime::from_chrono),
            tags: todo.tags.clone(),
            reminder: todo.reminder.as_ref().map(ReminderDocument::from),
            created_at: BsonDateTime::from_chrono(todo.created_at),
            updated_at: BsonDateTime::from_chrono(todo.updated_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn todo_due(due: Option<DateTime<Utc>>) -> Todo {
        let created = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap();
        Todo {
            id: "t1".into(),
            user_id: "u1".into(),
            title: "Pay rent".into(),
            description: None,
            status: TodoStatus::Pending,
            priority: Priority::High,
            due_date: due,
            completed_at: None,
            tags: vec![],
            reminder: Some(Reminder::armed(90)),
            created_at: created,
            updated_at: created,
        }
    }

    #[test]
    fn status_parses_case_insensitively() {
        assert_eq!("In_Progress".parse::<TodoStatus>(), Ok(TodoStatus::InProgress));
        assert!("done".parse::<TodoStatus>().is_err());
        assert_eq!("HIGH".parse::<Priority>(), Ok(Priority::High));
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&TodoStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
    }

    #[test]
    fn reminder_time_subtracts_offset() {
        let due = Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap();
        let todo = todo_due(Some(due));
        assert_eq!(
            todo.reminder_time(),
            Some(Utc.with_ymd_and_hms(2026, 3, 2, 10, 30, 0).unwrap())
        );
        assert_eq!(todo_due(None).reminder_time(), None);
    }

    #[test]
    fn out_of_range_offset_has_no_reminder_time() {
        let due = Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap();
        let mut todo = todo_due(Some(due));
        todo.reminder = Some(Reminder::armed(i64::MAX));
        assert_eq!(todo.reminder_time(), None);

        todo.reminder = Some(Reminder::armed(i64::MIN));
        assert_eq!(todo.reminder_time(), None);
    }

    #[test]
    fn overdue_excludes_completed() {
        let due = Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap();
        let later = due + Duration::hours(1);
        let mut todo = todo_due(Some(due));
        assert!(todo.is_overdue_at(later));
        assert!(!todo.is_overdue_at(due));
        todo.status = TodoStatus::Completed;
        assert!(!todo.is_overdue_at(later));
    }

    #[test]
    fn document_conversion_keeps_reminder_state() {
        let due = Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap();
        let mut todo = todo_due(Some(due));
        if let Some(r) = todo.reminder.as_mut() {
            r.email_sent = true;
            r.email_sent_at = Some(due - Duration::minutes(90));
        }
        let back = Todo::from(TodoDocument::from(&todo));
        assert_eq!(back, todo);
    }
}
