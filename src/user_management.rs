use actix_web::{web, HttpResponse};
use log::info;
use mongodb::bson::{doc, DateTime as BsonDateTime};
use serde::Deserialize;

use crate::app_state::AppState;
use crate::auth::{load_user, CurrentUser};
use crate::error::{ApiError, ApiResponse};
use crate::models::{
    NotificationPreferences, PreferencesDocument, UserDocument, MAX_REMINDER_HOURS,
    MIN_REMINDER_HOURS, USERS,
};

/// Partial update of the caller's notification preferences.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateNotificationSettings {
    pub enabled: Option<bool>,
    pub due_date_reminder: Option<bool>,
    pub overdue_notification: Option<bool>,
    pub reminder_hours: Option<i32>,
}

impl UpdateNotificationSettings {
    pub fn apply(&self, mut current: NotificationPreferences) -> Result<NotificationPreferences, ApiError> {
        if let Some(hours) = self.reminder_hours {
            if !(MIN_REMINDER_HOURS..=MAX_REMINDER_HOURS).contains(&hours) {
                return Err(ApiError::BadRequest(format!(
                    "Reminder hours must be between {} and {}",
                    MIN_REMINDER_HOURS, MAX_REMINDER_HOURS
                )));
            }
            current.reminder_hours = hours;
        }
        if let Some(enabled) = self.enabled {
            current.enabled = enabled;
        }
        if let Some(due) = self.due_date_reminder {
            current.due_date_reminder = due;
        }
        if let Some(overdue) = self.overdue_notification {
            current.overdue_notification = overdue;
        }
        Ok(current)
    }
}

pub async fn get_notification_settings(
    data: web::Data<AppState>,
    current: CurrentUser,
) -> Result<HttpResponse, ApiError> {
    let user = load_user(&data, &current.id).await?;
    Ok(ApiResponse::ok(
        user.email_notifications,
        "Notification settings retrieved successfully",
    ))
}

pub async fn update_notification_settings(
    data: web::Data<AppState>,
    current: CurrentUser,
    body: web::Json<UpdateNotificationSettings>,
) -> Result<HttpResponse, ApiError> {
    let user = load_user(&data, &current.id).await?;
    let updated = body.apply(user.email_notifications)?;

    let stored = mongodb::bson::to_bson(&PreferencesDocument::from(updated))?;
    data.mongodb
        .db
        .collection::<UserDocument>(USERS)
        .update_one(
            doc! { "_id": &user.id },
            doc! { "$set": {
                "email_notifications": stored,
                "updated_at": BsonDateTime::now(),
            } },
        )
        .await?;
    info!("Updated notification settings for user {}", user.id);

    Ok(ApiResponse::ok(updated, "Notification settings updated successfully"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_update_keeps_other_fields() {
        let patch = UpdateNotificationSettings {
            overdue_notification: Some(false),
            ..Default::default()
        };
        let updated = patch.apply(NotificationPreferences::default()).unwrap();
        assert!(updated.enabled);
        assert!(updated.due_date_reminder);
        assert!(!updated.overdue_notification);
        assert_eq!(updated.reminder_hours, 24);
    }

    #[test]
    fn reminder_hours_bounds_are_inclusive() {
        for hours in [1, 168] {
            let patch = UpdateNotificationSettings {
                reminder_hours: Some(hours),
                ..Default::default()
            };
            assert_eq!(
                patch.apply(NotificationPreferences::default()).unwrap().reminder_hours,
                hours
            );
        }
        for hours in [0, 169, -5] {
            let patch = UpdateNotificationSettings {
                reminder_hours: Some(hours),
                enabled: Some(false),
                ..Default::default()
            };
            assert!(matches!(
                patch.apply(NotificationPreferences::default()),
                Err(ApiError::BadRequest(_))
            ));
        }
    }

    #[test]
    fn body_uses_camel_case() {
        let patch: UpdateNotificationSettings =
            serde_json::from_str(r#"{"dueDateReminder": false, "reminderHours": 48}"#).unwrap();
        assert_eq!(patch.due_date_reminder, Some(false));
        assert_eq!(patch.reminder_hours, Some(48));
        assert!(patch.enabled.is_none());
    }
}
