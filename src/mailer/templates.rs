use chrono::{DateTime, Local, Utc};

use crate::mailer::OutgoingEmail;
use crate::models::{Priority, Todo};

/// Renders notification emails. Every user-supplied string is escaped
/// before it lands in HTML.
#[derive(Clone, Debug)]
pub struct EmailTemplates {
    app_url: String,
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn long_date(date: DateTime<Utc>) -> String {
    date.with_timezone(&Local).format("%A, %B %-d, %Y").to_string()
}

fn short_date(date: DateTime<Utc>) -> String {
    date.with_timezone(&Local).format("%Y-%m-%d").to_string()
}

fn priority_color(priority: Priority) -> &'static str {
    match priority {
        Priority::High => "#ff6b6b",
        Priority::Medium => "#ffb74d",
        Priority::Low => "#81c784",
    }
}

const BASE_STYLE: &str = "body { font-family: 'Segoe UI', Tahoma, Geneva, Verdana, sans-serif; margin: 0; padding: 0; background-color: #f5f5f5; }
.container { max-width: 600px; margin: 0 auto; background-color: white; border-radius: 10px; overflow: hidden; }
.content { padding: 30px; }
.todo-card { border-radius: 8px; padding: 20px; margin: 20px 0; }
.badge { display: inline-block; padding: 4px 12px; border-radius: 20px; font-size: 12px; font-weight: bold; text-transform: uppercase; color: white; }
.due-date { font-size: 18px; font-weight: bold; color: #e74c3c; margin: 10px 0; }
.footer { background: #f8f9fa; padding: 20px; text-align: center; color: #666; font-size: 14px; }
.btn { display: inline-block; padding: 12px 24px; color: white; text-decoration: none; border-radius: 6px; font-weight: bold; margin: 10px 0; }";

impl EmailTemplates {
    pub fn new(app_url: impl Into<String>) -> Self {
        Self {
            app_url: app_url.into(),
        }
    }

    pub fn due_date_reminder(&self, to: &str, user_name: &str, todo: &Todo) -> OutgoingEmail {
        let color = priority_color(todo.priority);
        let due = todo.due_date.map(long_date).unwrap_or_else(|| "soon".into());
        let tags = if todo.tags.is_empty() {
            String::new()
        } else {
            format!(
                "<p><strong>Tags:</strong> {}</p>",
                escape_html(&todo.tags.join(", "))
            )
        };

        let html = format!(
            r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Todo Reminder</title><style>{style}</style></head>
<body>
<div class="container">
  <div class="content">
    <h1>Todo Reminder</h1>
    <h2>Hi {name}!</h2>
    <p>This is a friendly reminder that you have a todo item due soon:</p>
    <div class="todo-card" style="background: #f8f9fa; border-left: 4px solid {color};">
      <h3>{title}</h3>
      {description}
      <div class="badge" style="background: {color};">{priority} Priority</div>
      <div class="due-date">Due: {due}</div>
      {tags}
    </div>
    <p>Log in to your Todo app to mark it as completed or update the due date if needed.</p>
    <a href="{url}" class="btn" style="background: #667eea;">Open Todo App</a>
  </div>
  <div class="footer">
    <p>This is an automated reminder from your Todo App.</p>
    <p>You can manage your notification preferences in your account settings.</p>
  </div>
</div>
</body>
</html>"#,
            style = BASE_STYLE,
            name = escape_html(user_name),
            color = color,
            title = escape_html(&todo.title),
            description = html_description(todo),
            priority = todo.priority,
            due = due,
            tags = tags,
            url = escape_html(&self.app_url),
        );

        let mut text = format!(
            "Hi {}!\n\nThis is a reminder that your todo item \"{}\" is due on {}.\n\nPriority: {}\n",
            user_name,
            todo.title,
            todo.due_date.map(short_date).unwrap_or_else(|| "soon".into()),
            todo.priority,
        );
        push_text_details(&mut text, todo, true);
        text.push_str(&format!(
            "\nDon't forget to complete this task on time!\n\nVisit your Todo App: {}\n\nBest regards,\nTodo App Team\n",
            self.app_url
        ));

        OutgoingEmail {
            to: to.to_string(),
            subject: format!("Reminder: \"{}\" is due soon!", todo.title),
            html,
            text,
        }
    }

    pub fn overdue_notice(&self, to: &str, user_name: &str, todo: &Todo) -> OutgoingEmail {
        let due = todo.due_date.map(long_date).unwrap_or_default();
        let html = format!(
            r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Overdue Todo</title><style>{style}</style></head>
<body>
<div class="container">
  <div class="content">
    <h1>Overdue Task</h1>
    <h2>Hi {name}!</h2>
    <p>Your todo item is now overdue. Please take action as soon as possible:</p>
    <div class="todo-card" style="background: #fff5f5; border-left: 4px solid #e74c3c;">
      <h3>{title}</h3>
      {description}
      <div class="badge" style="background: #e74c3c;">OVERDUE</div>
      <div class="due-date">Was due: {due}</div>
    </div>
    <p>It's not too late! Log in to your Todo app to complete this task or reschedule it.</p>
    <a href="{url}" class="btn" style="background: #e74c3c;">Complete Task Now</a>
  </div>
  <div class="footer">
    <p>This is an automated notification from your Todo App.</p>
  </div>
</div>
</body>
</html>"#,
            style = BASE_STYLE,
            name = escape_html(user_name),
            title = escape_html(&todo.title),
            description = html_description(todo),
            due = due,
            url = escape_html(&self.app_url),
        );

        let mut text = format!(
            "Hi {}!\n\nYour todo item \"{}\" is now OVERDUE. It was due on {}.\n",
            user_name,
            todo.title,
            todo.due_date.map(short_date).unwrap_or_default(),
        );
        push_text_details(&mut text, todo, false);
        text.push_str(&format!(
            "\nPlease complete this task as soon as possible or update the due date.\n\nVisit your Todo App: {}\n\nBest regards,\nTodo App Team\n",
            self.app_url
        ));

        OutgoingEmail {
            to: to.to_string(),
            subject: format!("Overdue: \"{}\" was due!", todo.title),
            html,
            text,
        }
    }

    pub fn test_message(&self, to: &str, user_name: &str, subject: &str, message: &str) -> OutgoingEmail {
        let sent_at = Local::now().format("%Y-%m-%d %H:%M:%S");
        let html = format!(
            r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto; padding: 20px;">
  <h2 style="color: #667eea;">Email Service Test</h2>
  <p>Hello {name}!</p>
  <p>{message}</p>
  <p style="color: #666; font-size: 14px;">Sent at: {sent_at}<br>From: Todo App Email Service</p>
</div>"#,
            name = escape_html(user_name),
            message = escape_html(message),
            sent_at = sent_at,
        );
        OutgoingEmail {
            to: to.to_string(),
            subject: subject.to_string(),
            html,
            text: message.to_string(),
        }
    }
}

fn html_description(todo: &Todo) -> String {
    todo.description
        .as_deref()
        .filter(|d| !d.is_empty())
        .map(|d| format!("<p>{}</p>", escape_html(d)))
        .unwrap_or_default()
}

fn push_text_details(text: &mut String, todo: &Todo, with_tags: bool) {
    if let Some(description) = todo.description.as_deref().filter(|d| !d.is_empty()) {
        text.push_str(&format!("Description: {}\n", description));
    }
    if with_tags && !todo.tags.is_empty() {
        text.push_str(&format!("Tags: {}\n", todo.tags.join(", ")));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Reminder, TodoStatus};
    use chrono::TimeZone;

    fn todo() -> Todo {
        let now = Utc.with_ymd_and_hms(2026, 5, 4, 9, 0, 0).unwrap();
        Todo {
            id: "t1".into(),
            user_id: "u1".into(),
            title: "Ship <release>".into(),
            description: Some("Tag & push".into()),
            status: TodoStatus::Pending,
            priority: Priority::High,
            due_date: Some(now),
            completed_at: None,
            tags: vec!["work".into(), "urgent".into()],
            reminder: Some(Reminder::armed(60)),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn reminder_escapes_user_content() {
        let email = EmailTemplates::new("https://todo.example.com")
            .due_date_reminder("ada@example.com", "ada", &todo());
        assert_eq!(email.to, "ada@example.com");
        assert_eq!(email.subject, "Reminder: \"Ship <release>\" is due soon!");
        assert!(email.html.contains("Ship &lt;release&gt;"));
        assert!(email.html.contains("Tag &amp; push"));
        assert!(email.html.contains("#ff6b6b"));
        assert!(!email.html.contains("<release>"));
        assert!(email.text.contains("Tags: work, urgent"));
        assert!(email.text.contains("https://todo.example.com"));
    }

    #[test]
    fn overdue_notice_mentions_due_date() {
        let email = EmailTemplates::new("http://localhost:8000")
            .overdue_notice("ada@example.com", "ada", &todo());
        assert!(email.subject.starts_with("Overdue:"));
        assert!(email.html.contains("OVERDUE"));
        assert!(email.text.contains("is now OVERDUE"));
        assert!(!email.text.contains("Tags:"));
    }
}
