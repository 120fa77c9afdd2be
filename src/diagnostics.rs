//! Operational endpoints for exercising the mailer and the notification
//! sweeps by hand.

use actix_web::{web, HttpResponse};
use chrono::{DateTime, Duration, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::app_state::AppState;
use crate::auth::{is_valid_email, load_user, CurrentUser};
use crate::error::{ApiError, ApiResponse};
use crate::models::{Priority, Reminder, Todo, TodoStatus, User};
use crate::notifications::NoticeKind;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestEmailRequest {
    pub email: Option<String>,
    pub subject: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestNoticeRequest {
    pub todo_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Delivery {
    message_id: String,
    sent_to: String,
    todo_title: Option<String>,
}

/// A throwaway todo for previewing a template when the caller names none.
pub fn sample_todo(owner: &User, kind: NoticeKind, now: DateTime<Utc>) -> Todo {
    let (title, description, due) = match kind {
        NoticeKind::DueDate => (
            "Sample Todo - Test Reminder",
            "This is a test reminder for your todo item.",
            now + Duration::hours(2),
        ),
        NoticeKind::Overdue => (
            "Sample Overdue Todo",
            "This is a test overdue notification.",
            now - Duration::days(1),
        ),
    };
    Todo {
        id: "sample".into(),
        user_id: owner.id.clone(),
        title: title.into(),
        description: Some(description.into()),
        status: TodoStatus::Pending,
        priority: Priority::High,
        due_date: Some(due),
        completed_at: None,
        tags: vec!["test".into(), "sample".into()],
        reminder: Some(Reminder::armed(120)),
        created_at: now,
        updated_at: now,
    }
}

pub async fn test_email(
    data: web::Data<AppState>,
    current: CurrentUser,
    body: Option<web::Json<TestEmailRequest>>,
) -> Result<HttpResponse, ApiError> {
    let body = body.map(web::Json::into_inner).unwrap_or_default();
    let user = load_user(&data, &current.id).await?;

    let to = match body.email.as_deref().map(str::trim).filter(|e| !e.is_empty()) {
        Some(email) if is_valid_email(email) => email.to_string(),
        Some(_) => return Err(ApiError::BadRequest("Please enter a valid email".into())),
        None => user.email.clone(),
    };
    let subject = body
        .subject
        .unwrap_or_else(|| "Test Email from Todo App".to_string());
    let message = body
        .message
        .unwrap_or_else(|| "This is a test email to verify your email configuration is working correctly!".to_string());

    let notifier = &data.notifier;
    let email = notifier
        .templates()
        .test_message(&to, &user.username, &subject, &message);
    let id = notifier
        .mailer()
        .send(email)
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to send email: {}", e)))?;
    info!("Test email {} sent to {}", id, to);

    Ok(ApiResponse::ok(
        Delivery {
            message_id: id.0,
            sent_to: to,
            todo_title: None,
        },
        "Test email sent successfully",
    ))
}

async fn test_notice(
    data: &AppState,
    current: &CurrentUser,
    kind: NoticeKind,
    body: TestNoticeRequest,
) -> Result<Delivery, ApiError> {
    let user = load_user(data, &current.id).await?;
    let notifier = &data.notifier;

    let (id, title) = match body.todo_id.as_deref().filter(|id| !id.is_empty()) {
        Some(todo_id) => {
            let id = notifier.send_test_notice(kind, &user.id, todo_id).await?;
            (id, None)
        }
        None => {
            let todo = sample_todo(&user, kind, Utc::now());
            let id = notifier.send_notice(kind, &user, &todo).await?;
            (id, Some(todo.title))
        }
    };

    Ok(Delivery {
        message_id: id.0,
        sent_to: user.email,
        todo_title: title,
    })
}

pub async fn test_reminder(
    data: web::Data<AppState>,
    current: CurrentUser,
    body: Option<web::Json<TestNoticeRequest>>,
) -> Result<HttpResponse, ApiError> {
    let body = body.map(web::Json::into_inner).unwrap_or_default();
    let delivery = test_notice(&data, &current, NoticeKind::DueDate, body).await?;
    Ok(ApiResponse::ok(delivery, "Test reminder email sent successfully"))
}

pub async fn test_overdue(
    data: web::Data<AppState>,
    current: CurrentUser,
    body: Option<web::Json<TestNoticeRequest>>,
) -> Result<HttpResponse, ApiError> {
    let body = body.map(web::Json::into_inner).unwrap_or_default();
    let delivery = test_notice(&data, &current, NoticeKind::Overdue, body).await?;
    Ok(ApiResponse::ok(delivery, "Test overdue email sent successfully"))
}

pub async fn email_status(data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let notifier = &data.notifier;
    let stats = notifier.stats().await?;
    Ok(ApiResponse::ok(
        json!({
            "emailService": notifier.mailer().status(),
            "notificationStats": stats,
            "schedulerRunning": notifier.is_running(),
        }),
        "Email service status retrieved",
    ))
}

pub async fn run_due_soon(
    data: web::Data<AppState>,
    current: CurrentUser,
) -> Result<HttpResponse, ApiError> {
    info!("Due-date reminder sweep triggered by {}", current.id);
    let outcome = data.notifier.check_due_date_reminders().await?;
    Ok(ApiResponse::ok(outcome, "Due date reminder check completed"))
}

pub async fn run_overdue(
    data: web::Data<AppState>,
    current: CurrentUser,
) -> Result<HttpResponse, ApiError> {
    info!("Overdue sweep triggered by {}", current.id);
    let outcome = data.notifier.check_overdue_todos().await?;
    Ok(ApiResponse::ok(outcome, "Overdue check completed"))
}
