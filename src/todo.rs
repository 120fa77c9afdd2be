use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use log::info;
use mongodb::bson::{doc, Document};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::auth::{load_user, CurrentUser};
use crate::error::{ApiError, ApiResponse};
use crate::models::{
    NotificationPreferences, Priority, Reminder, Todo, TodoDocument, TodoStatus,
    MAX_REMINDER_MINUTES, TODOS,
};

const MAX_TITLE: usize = 200;
const MAX_DESCRIPTION: usize = 1000;
const DEFAULT_LIMIT: u64 = 10;
const MAX_LIMIT: u64 = 100;

/// Distinguishes an absent field from an explicit `null`.
fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderSettings {
    pub enabled: Option<bool>,
    pub minutes_before: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTodoRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub tags: Option<Vec<String>>,
    pub reminder: Option<ReminderSettings>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTodoRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    /// `null` clears the due date.
    #[serde(default, deserialize_with = "double_option")]
    pub due_date: Option<Option<DateTime<Utc>>>,
    pub tags: Option<Vec<String>>,
    pub reminder: Option<ReminderSettings>,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub page: u64,
    pub limit: u64,
    pub total: u64,
    pub pages: u64,
}

impl Pagination {
    pub fn new(page: u64, limit: u64, total: u64) -> Self {
        Self {
            page,
            limit,
            total,
            pages: total.div_ceil(limit.max(1)),
        }
    }

    pub fn skip(&self) -> u64 {
        self.page.saturating_sub(1).saturating_mul(self.limit)
    }
}

impl ListQuery {
    /// Page is 1-based; limit falls back to the default and is capped. A
    /// page whose offset does not fit the driver's skip is rejected.
    pub fn window(&self) -> Result<(u64, u64), ApiError> {
        let page = self.page.filter(|p| *p > 0).unwrap_or(1);
        let limit = self
            .limit
            .filter(|l| *l > 0)
            .unwrap_or(DEFAULT_LIMIT)
            .min(MAX_LIMIT);
        let in_range = (page - 1)
            .checked_mul(limit)
            .is_some_and(|skip| i64::try_from(skip).is_ok());
        if !in_range {
            return Err(ApiError::BadRequest("Page is out of range".into()));
        }
        Ok((page, limit))
    }

    pub fn filter(&self, user_id: &str) -> Result<Document, ApiError> {
        let mut filter = doc! { "user_id": user_id };
        if let Some(status) = non_blank(&self.status) {
            filter.insert("status", parse_status(status)?.as_str());
        }
        if let Some(priority) = non_blank(&self.priority) {
            filter.insert("priority", parse_priority(priority)?.as_str());
        }
        if let Some(search) = non_blank(&self.search) {
            let pattern = regex::escape(search);
            filter.insert(
                "$or",
                vec![
                    doc! { "title": { "$regex": pattern.as_str(), "$options": "i" } },
                    doc! { "description": { "$regex": pattern.as_str(), "$options": "i" } },
                ],
            );
        }
        Ok(filter)
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn parse_status(value: &str) -> Result<TodoStatus, ApiError> {
    value.parse().map_err(|_| {
        ApiError::BadRequest("Status must be one of: pending, in_progress, completed".into())
    })
}

fn parse_priority(value: &str) -> Result<Priority, ApiError> {
    value
        .parse()
        .map_err(|_| ApiError::BadRequest("Priority must be one of: low, medium, high".into()))
}

fn clean_title(title: &str) -> Result<String, ApiError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(ApiError::BadRequest("Title is required".into()));
    }
    if title.chars().count() > MAX_TITLE {
        return Err(ApiError::BadRequest(format!(
            "Title cannot exceed {} characters",
            MAX_TITLE
        )));
    }
    Ok(title.to_string())
}

fn clean_description(description: &str) -> Result<Option<String>, ApiError> {
    let description = description.trim();
    if description.chars().count() > MAX_DESCRIPTION {
        return Err(ApiError::BadRequest(format!(
            "Description cannot exceed {} characters",
            MAX_DESCRIPTION
        )));
    }
    Ok(Some(description.to_string()).filter(|d| !d.is_empty()))
}

fn clean_tags(tags: &[String]) -> Vec<String> {
    tags.iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn check_minutes(minutes: i64) -> Result<i64, ApiError> {
    if (1..=MAX_REMINDER_MINUTES).contains(&minutes) {
        Ok(minutes)
    } else {
        Err(ApiError::BadRequest(format!(
            "Reminder minutes must be between 1 and {}",
            MAX_REMINDER_MINUTES
        )))
    }
}

/// Moves a todo to `status`, keeping `completed_at` set exactly when it is
/// completed.
pub fn set_status(todo: &mut Todo, status: TodoStatus, now: DateTime<Utc>) {
    match (todo.status, status) {
        (TodoStatus::Completed, TodoStatus::Completed) => {}
        (_, TodoStatus::Completed) => todo.completed_at = Some(now),
        _ => todo.completed_at = None,
    }
    todo.status = status;
}

/// Builds a new todo for `owner_id`. A due date without reminder settings
/// gets a reminder armed from the owner's `reminder_hours`.
pub fn new_todo(
    owner_id: &str,
    preferences: &NotificationPreferences,
    req: &CreateTodoRequest,
    now: DateTime<Utc>,
) -> Result<Todo, ApiError> {
    let title = clean_title(req.title.as_deref().unwrap_or(""))?;
    let description = match req.description.as_deref() {
        Some(d) => clean_description(d)?,
        None => None,
    };
    let priority = match non_blank(&req.priority) {
        Some(p) => parse_priority(p)?,
        None => Priority::default(),
    };

    let default_minutes = i64::from(preferences.reminder_hours) * 60;
    let reminder = match (&req.reminder, req.due_date) {
        (Some(settings), _) => {
            let minutes = check_minutes(settings.minutes_before.unwrap_or(default_minutes))?;
            if settings.enabled.unwrap_or(true) {
                Some(Reminder::armed(minutes))
            } else {
                Some(Reminder::disabled(minutes))
            }
        }
        (None, Some(_)) => Some(Reminder::armed(check_minutes(default_minutes)?)),
        (None, None) => None,
    };

    Ok(Todo {
        id: Uuid::new_v4().to_string(),
        user_id: owner_id.to_string(),
        title,
        description,
        status: TodoStatus::Pending,
        priority,
        due_date: req.due_date,
        completed_at: None,
        tags: req.tags.as_deref().map(clean_tags).unwrap_or_default(),
        reminder,
        created_at: now,
        updated_at: now,
    })
}

/// Applies a partial update. Moving the due date or changing the reminder
/// offset clears `email_sent` so the reminder fires again.
pub fn apply_update(todo: &mut Todo, req: &UpdateTodoRequest, now: DateTime<Utc>) -> Result<(), ApiError> {
    if let Some(title) = req.title.as_deref() {
        todo.title = clean_title(title)?;
    }
    if let Some(description) = req.description.as_deref() {
        todo.description = clean_description(description)?;
    }
    if let Some(priority) = non_blank(&req.priority) {
        todo.priority = parse_priority(priority)?;
    }
    if let Some(status) = non_blank(&req.status) {
        set_status(todo, parse_status(status)?, now);
    }
    if let Some(tags) = req.tags.as_deref() {
        todo.tags = clean_tags(tags);
    }

    let mut rearm = false;
    if let Some(due_date) = req.due_date {
        rearm |= todo.due_date != due_date;
        todo.due_date = due_date;
    }
    if let Some(settings) = &req.reminder {
        let reminder = todo.reminder.get_or_insert_with(|| Reminder::armed(60));
        if let Some(minutes) = settings.minutes_before {
            let minutes = check_minutes(minutes)?;
            rearm |= reminder.minutes_before != minutes;
            reminder.minutes_before = minutes;
        }
        if let Some(enabled) = settings.enabled {
            reminder.enabled = enabled;
        }
    }
    if rearm {
        if let Some(reminder) = todo.reminder.as_mut() {
            reminder.email_sent = false;
            reminder.email_sent_at = None;
        }
    }

    todo.updated_at = now;
    Ok(())
}

fn owned(todo_id: &str, user_id: &str) -> Document {
    doc! { "_id": todo_id, "user_id": user_id }
}

async fn find_owned(data: &AppState, todo_id: &str, user_id: &str) -> Result<Todo, ApiError> {
    data.mongodb
        .db
        .collection::<TodoDocument>(TODOS)
        .find_one(owned(todo_id, user_id))
        .await?
        .map(Todo::from)
        .ok_or_else(|| ApiError::NotFound("Todo not found".into()))
}

async fn save(data: &AppState, todo: &Todo) -> Result<(), ApiError> {
    data.mongodb
        .db
        .collection::<TodoDocument>(TODOS)
        .replace_one(owned(&todo.id, &todo.user_id), TodoDocument::from(todo))
        .await?;
    Ok(())
}

pub async fn create_todo(
    data: web::Data<AppState>,
    current: CurrentUser,
    body: web::Json<CreateTodoRequest>,
) -> Result<HttpResponse, ApiError> {
    let owner = load_user(&data, &current.id).await?;
    let todo = new_todo(&owner.id, &owner.email_notifications, &body, Utc::now())?;

    data.mongodb
        .db
        .collection::<TodoDocument>(TODOS)
        .insert_one(TodoDocument::from(&todo))
        .await?;
    info!("Todo created: {} for user {}", todo.id, owner.id);

    Ok(ApiResponse::created(todo, "Todo created successfully"))
}

pub async fn list_todos(
    data: web::Data<AppState>,
    current: CurrentUser,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse, ApiError> {
    let filter = query.filter(&current.id)?;
    let (page, limit) = query.window()?;
    let todos = data.mongodb.db.collection::<TodoDocument>(TODOS);

    let total = todos.count_documents(filter.clone()).await?;
    let pagination = Pagination::new(page, limit, total);
    let docs: Vec<TodoDocument> = todos
        .find(filter)
        .sort(doc! { "created_at": -1 })
        .skip(pagination.skip())
        .limit(i64::try_from(limit).unwrap_or(DEFAULT_LIMIT as i64))
        .await?
        .try_collect()
        .await?;
    let items: Vec<Todo> = docs.into_iter().map(Todo::from).collect();

    Ok(ApiResponse::ok(
        json!({ "todos": items, "pagination": pagination }),
        "Todos retrieved successfully",
    ))
}

pub async fn get_todo(
    data: web::Data<AppState>,
    current: CurrentUser,
    todo_id: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let todo = find_owned(&data, &todo_id, &current.id).await?;
    Ok(ApiResponse::ok(todo, "Todo retrieved successfully"))
}

pub async fn update_todo(
    data: web::Data<AppState>,
    current: CurrentUser,
    todo_id: web::Path<String>,
    body: web::Json<UpdateTodoRequest>,
) -> Result<HttpResponse, ApiError> {
    let mut todo = find_owned(&data, &todo_id, &current.id).await?;
    apply_update(&mut todo, &body, Utc::now())?;
    save(&data, &todo).await?;
    info!("Todo updated: {}", todo.id);
    Ok(ApiResponse::ok(todo, "Todo updated successfully"))
}

pub async fn delete_todo(
    data: web::Data<AppState>,
    current: CurrentUser,
    todo_id: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let result = data
        .mongodb
        .db
        .collection::<TodoDocument>(TODOS)
        .delete_one(owned(&todo_id, &current.id))
        .await?;
    if result.deleted_count == 0 {
        return Err(ApiError::NotFound("Todo not found".into()));
    }
    info!("Todo deleted: {}", todo_id);
    Ok(ApiResponse::ok(json!({}), "Todo deleted successfully"))
}

pub async fn update_todo_status(
    data: web::Data<AppState>,
    current: CurrentUser,
    todo_id: web::Path<String>,
    body: web::Json<StatusRequest>,
) -> Result<HttpResponse, ApiError> {
    let status = non_blank(&body.status)
        .ok_or_else(|| ApiError::BadRequest("Status is required".into()))
        .and_then(parse_status)?;
    let mut todo = find_owned(&data, &todo_id, &current.id).await?;
    let now = Utc::now();
    set_status(&mut todo, status, now);
    todo.updated_at = now;
    save(&data, &todo).await?;
    Ok(ApiResponse::ok(todo, "Todo status updated successfully"))
}

pub async fn complete_todo(
    data: web::Data<AppState>,
    current: CurrentUser,
    todo_id: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let mut todo = find_owned(&data, &todo_id, &current.id).await?;
    let now = Utc::now();
    set_status(&mut todo, TodoStatus::Completed, now);
    todo.updated_at = now;
    save(&data, &todo).await?;
    Ok(ApiResponse::ok(todo, "Todo marked as completed"))
}
