use bson::DateTime as BsonDateTime;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MIN_REMINDER_HOURS: i32 = 1;
pub const MAX_REMINDER_HOURS: i32 = 168;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPreferences {
    pub enabled: bool,
    pub due_date_reminder: bool,
    pub overdue_notification: bool,
    pub reminder_hours: i32,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            enabled: true,
            due_date_reminder: true,
            overdue_notification: true,
            reminder_hours: 24,
        }
    }
}

impl NotificationPreferences {
    pub fn wants_due_date_reminders(&self) -> bool {
        self.enabled && self.due_date_reminder
    }

    pub fn wants_overdue_notifications(&self) -> bool {
        self.enabled && self.overdue_notification
    }
}

/// A registered account. Credentials never leave the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,
    pub email_notifications: NotificationPreferences,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Storage shape of an account in the `users` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub email_notifications: PreferencesDocument,
    pub created_at: BsonDateTime,
    pub updated_at: BsonDateTime,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PreferencesDocument {
    pub enabled: bool,
    pub due_date_reminder: bool,
    pub overdue_notification: bool,
    pub reminder_hours: i32,
}

impl Default for PreferencesDocument {
    fn default() -> Self {
        NotificationPreferences::default().into()
    }
}

impl From<NotificationPreferences> for PreferencesDocument {
    fn from(p: NotificationPreferences) -> Self {
        Self {
            enabled: p.enabled,
            due_date_reminder: p.due_date_reminder,
            overdue_notification: p.overdue_notification,
            reminder_hours: p.reminder_hours,
        }
    }
}

impl From<PreferencesDocument> for NotificationPreferences {
    fn from(p: PreferencesDocument) -> Self {
        Self {
            enabled: p.enabled,
            due_date_reminder: p.due_date_reminder,
            overdue_notification: p.overdue_notification,
            reminder_hours: p.reminder_hours,
        }
    }
}

impl From<UserDocument> for User {
    fn from(doc: UserDocument) -> Self {
        Self {
            id: doc.id,
            username: doc.username,
            email: doc.email,
            password_hash: doc.password,
            refresh_token: doc.refresh_token,
            email_notifications: doc.email_notifications.into(),
            created_at: doc.created_at.to_chrono(),
            updated_at: doc.updated_at.to_chrono(),
        }
    }
}

impl From<&User> for UserDocument {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
            password: user.password_hash.clone(),
            refresh_token: user.refresh_token.clone(),
            email_notifications: user.email_notifications.into(),
            created_at: BsonDateTime::from_chrono(user.created_at),
            updated_at: BsonDateTime::from_chrono(user.updated_at),
        }
    }
}
