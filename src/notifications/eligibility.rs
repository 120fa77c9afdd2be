use chrono::{DateTime, Duration, Local, NaiveDate, NaiveTime, TimeZone, Utc};

use crate::models::{Todo, User};

/// Why a due-soon candidate was or was not emailed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DueSoon {
    Eligible,
    /// The reminder time has not been reached yet.
    NotYet,
    Completed,
    NoReminder,
    AlreadySent,
    NotUpcoming,
    OwnerMissing,
    OptedOut,
}

/// Decides whether `todo` gets its due-date reminder at `now`. The
/// boundary is inclusive: a todo due exactly `minutes_before` from now is
/// eligible.
pub fn due_soon(todo: &Todo, owner: Option<&User>, now: DateTime<Utc>) -> DueSoon {
    if todo.is_completed() {
        return DueSoon::Completed;
    }
    let Some(reminder) = todo.reminder.as_ref().filter(|r| r.enabled) else {
        return DueSoon::NoReminder;
    };
    if reminder.email_sent {
        return DueSoon::AlreadySent;
    }
    if !todo.due_date.is_some_and(|due| due > now) {
        return DueSoon::NotUpcoming;
    }
    let Some(owner) = owner.filter(|o| o.id == todo.user_id) else {
        return DueSoon::OwnerMissing;
    };
    if !owner.email_notifications.wants_due_date_reminders() {
        return DueSoon::OptedOut;
    }
    if todo.reminder_time().is_some_and(|at| now >= at) {
        DueSoon::Eligible
    } else {
        DueSoon::NotYet
    }
}

/// The local calendar day `now` falls on.
pub fn calendar_day(now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(&Local).date_naive()
}

/// Start and end (exclusive) of the local calendar day containing `now`.
pub fn day_bounds(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let midnight = calendar_day(now).and_time(NaiveTime::MIN);
    let start = Local
        .from_local_datetime(&midnight)
        .earliest()
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&midnight));
    (start, start + Duration::days(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NotificationPreferences, Priority, Reminder, TodoStatus};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 10, 12, 0, 0).unwrap()
    }

    fn owner() -> User {
        User {
            id: "u1".into(),
            username: "ada".into(),
            email: "ada@example.com".into(),
            password_hash: String::new(),
            refresh_token: None,
            email_notifications: NotificationPreferences::default(),
            created_at: now(),
            updated_at: now(),
        }
    }

    fn todo(due_in_minutes: i64, minutes_before: i64) -> Todo {
        Todo {
            id: "t1".into(),
            user_id: "u1".into(),
            title: "Renew passport".into(),
            description: None,
            status: TodoStatus::Pending,
            priority: Priority::Medium,
            due_date: Some(now() + Duration::minutes(due_in_minutes)),
            completed_at: None,
            tags: vec![],
            reminder: Some(Reminder::armed(minutes_before)),
            created_at: now(),
            updated_at: now(),
        }
    }

    #[test]
    fn inside_window_is_eligible() {
        assert_eq!(due_soon(&todo(30, 60), Some(&owner()), now()), DueSoon::Eligible);
    }

    #[test]
    fn exact_boundary_is_eligible() {
        assert_eq!(due_soon(&todo(60, 60), Some(&owner()), now()), DueSoon::Eligible);
        assert_eq!(due_soon(&todo(61, 60), Some(&owner()), now()), DueSoon::NotYet);
    }

    #[test]
    fn completed_and_sent_are_never_eligible() {
        let mut done = todo(30, 60);
        done.status = TodoStatus::Completed;
        assert_eq!(due_soon(&done, Some(&owner()), now()), DueSoon::Completed);

        let mut sent = todo(30, 60);
        sent.reminder.as_mut().unwrap().email_sent = true;
        assert_eq!(due_soon(&sent, Some(&owner()), now()), DueSoon::AlreadySent);
    }

    #[test]
    fn disabled_or_missing_reminder() {
        let mut t = todo(30, 60);
        t.reminder = Some(Reminder::disabled(60));
        assert_eq!(due_soon(&t, Some(&owner()), now()), DueSoon::NoReminder);
        t.reminder = None;
        assert_eq!(due_soon(&t, Some(&owner()), now()), DueSoon::NoReminder);
    }

    #[test]
    fn unrepresentable_offset_never_fires() {
        assert_eq!(due_soon(&todo(30, i64::MAX), Some(&owner()), now()), DueSoon::NotYet);
    }

    #[test]
    fn past_due_is_not_a_due_soon_candidate() {
        assert_eq!(due_soon(&todo(-5, 60), Some(&owner()), now()), DueSoon::NotUpcoming);
        assert_eq!(due_soon(&todo(0, 60), Some(&owner()), now()), DueSoon::NotUpcoming);
    }

    #[test]
    fn owner_preferences_gate_delivery() {
        let mut user = owner();
        user.email_notifications.due_date_reminder = false;
        assert_eq!(due_soon(&todo(30, 60), Some(&user), now()), DueSoon::OptedOut);
        assert_eq!(due_soon(&todo(30, 60), None, now()), DueSoon::OwnerMissing);

        let mut stranger = owner();
        stranger.id = "u2".into();
        assert_eq!(due_soon(&todo(30, 60), Some(&stranger), now()), DueSoon::OwnerMissing);
    }

    #[test]
    fn day_bounds_cover_a_full_day_around_now() {
        let (start, end) = day_bounds(now());
        assert!(start <= now() && now() < end);
        assert_eq!(end - start, Duration::days(1));
        assert_eq!(calendar_day(start), calendar_day(now()));
    }
}
