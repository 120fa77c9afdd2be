mod todo;
mod user;

pub use todo::{Priority, Reminder, Todo, TodoDocument, TodoStatus, MAX_REMINDER_MINUTES};
pub use user::{
    NotificationPreferences, PreferencesDocument, User, UserDocument, MAX_REMINDER_HOURS,
    MIN_REMINDER_HOURS,
};

/// Collection names.
pub const TODOS: &str = "todos";
pub const USERS: &str = "users";
pub const OVERDUE_NOTICES: &str = "overdue_notices";
