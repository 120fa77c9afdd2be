//! Background due-date reminders and overdue notices.
//!
//! Two sweeps run on their own cron schedules:
//!
//! - **due soon** emails a todo's owner once the reminder time
//!   (`due_date - minutes_before`) is reached, then flips
//!   `reminder.email_sent` on that todo. A failed send leaves the flag
//!   unset so the next sweep retries.
//! - **overdue** emails every opted-in account about each open todo past
//!   its due date, at most once per calendar day, tracked in an
//!   [`OverdueLedger`].
//!
//! A store query failure aborts the sweep; a failure on one todo never
//! stops the rest of the pass.

pub mod eligibility;
pub mod ledger;
pub mod schedule;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::StoreError;
use crate::mailer::{DeliveryId, EmailTemplates, MailError, Mailer};
use crate::models::{Todo, User};
use crate::store::{AccountStore, TaskStore};

use eligibility::{calendar_day, day_bounds, DueSoon};
use ledger::{OverdueKey, OverdueLedger};
use schedule::{spawn_periodic, Schedules};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidSchedule { expr: String, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Mail(#[from] MailError),

    #[error("{0} not found")]
    NotFound(&'static str),
}

/// Counters for one sweep pass.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub candidates: usize,
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum SweepOutcome {
    Completed(SweepReport),
    /// Another pass of the same sweep was still in flight.
    AlreadyRunning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationStats {
    pub todos_due_today: u64,
    pub overdue_todos: u64,
    pub users_with_notifications: u64,
    pub sent_reminders_today: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    DueDate,
    Overdue,
}

/// Admits one pass of a sweep at a time.
#[derive(Default)]
struct SweepGuard(AtomicBool);

struct SweepPermit<'a>(&'a AtomicBool);

impl SweepGuard {
    fn try_enter(&self) -> Option<SweepPermit<'_>> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SweepPermit(&self.0))
    }
}

impl Drop for SweepPermit<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct Timers {
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

pub struct NotificationService {
    tasks: Arc<dyn TaskStore>,
    accounts: Arc<dyn AccountStore>,
    mailer: Arc<dyn Mailer>,
    ledger: Arc<dyn OverdueLedger>,
    templates: EmailTemplates,
    due_soon_guard: SweepGuard,
    overdue_guard: SweepGuard,
    timers: Mutex<Option<Timers>>,
}

impl NotificationService {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        accounts: Arc<dyn AccountStore>,
        mailer: Arc<dyn Mailer>,
        ledger: Arc<dyn OverdueLedger>,
        templates: EmailTemplates,
    ) -> Self {
        Self {
            tasks,
            accounts,
            mailer,
            ledger,
            templates,
            due_soon_guard: SweepGuard::default(),
            overdue_guard: SweepGuard::default(),
            timers: Mutex::new(None),
        }
    }

    pub fn mailer(&self) -> &dyn Mailer {
        self.mailer.as_ref()
    }

    pub fn templates(&self) -> &EmailTemplates {
        &self.templates
    }

    fn timers(&self) -> MutexGuard<'_, Option<Timers>> {
        self.timers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_running(&self) -> bool {
        self.timers().is_some()
    }

    /// Arms the periodic jobs. Returns false, and changes nothing, when the
    /// service is already running.
    pub fn start(self: &Arc<Self>, schedules: &Schedules) -> bool {
        let mut timers = self.timers();
        if timers.is_some() {
            warn!("Notification service is already running");
            return false;
        }

        let token = CancellationToken::new();
        let due_soon = {
            let service = Arc::clone(self);
            spawn_periodic(
                "due-date reminders",
                schedules.due_soon.clone(),
                token.child_token(),
                move || {
                    let service = service.clone();
                    async move { service.run_due_soon_job().await }
                },
            )
        };
        let overdue = {
            let service = Arc::clone(self);
            spawn_periodic(
                "overdue notices",
                schedules.overdue.clone(),
                token.child_token(),
                move || {
                    let service = service.clone();
                    async move { service.run_overdue_job().await }
                },
            )
        };
        let reset = {
            let service = Arc::clone(self);
            spawn_periodic(
                "overdue ledger reset",
                schedules.ledger_reset.clone(),
                token.child_token(),
                move || {
                    let service = service.clone();
                    async move { service.run_ledger_reset_job().await }
                },
            )
        };

        *timers = Some(Timers {
            token,
            handles: vec![due_soon, overdue, reset],
        });
        info!("Notification service started successfully");
        true
    }

    /// Cancels the timers. A sweep already in progress finishes; no new
    /// one starts. Returns false when the service was not running.
    pub fn stop(&self) -> bool {
        let Some(timers) = self.timers().take() else {
            warn!("Notification service is not running");
            return false;
        };
        timers.token.cancel();
        debug!("Cancelled {} notification timers", timers.handles.len());
        info!("Notification service stopped");
        true
    }

    async fn run_due_soon_job(&self) {
        info!("Checking for due date reminders...");
        match self.check_due_date_reminders().await {
            Ok(SweepOutcome::Completed(report)) => info!(
                "Due date reminders: {} candidates, {} sent, {} failed, {} skipped",
                report.candidates, report.sent, report.failed, report.skipped
            ),
            Ok(SweepOutcome::AlreadyRunning) => {
                warn!("Due date reminder sweep still running; skipping this firing")
            }
            Err(e) => error!("Error in due date reminder sweep: {}", e),
        }
    }

    async fn run_overdue_job(&self) {
        info!("Running overdue notification check...");
        match self.check_overdue_todos().await {
            Ok(SweepOutcome::Completed(report)) => info!(
                "Overdue notices: {} candidates, {} sent, {} failed, {} skipped",
                report.candidates, report.sent, report.failed, report.skipped
            ),
            Ok(SweepOutcome::AlreadyRunning) => {
                warn!("Overdue sweep still running; skipping this firing")
            }
            Err(e) => error!("Error in overdue notification sweep: {}", e),
        }
    }

    async fn run_ledger_reset_job(&self) {
        match self.reset_ledger(calendar_day(Utc::now())).await {
            Ok(purged) => info!("Cleared {} overdue notice markers", purged),
            Err(e) => error!("Error clearing overdue notice markers: {}", e),
        }
    }

    pub async fn check_due_date_reminders(&self) -> Result<SweepOutcome, NotifyError> {
        self.check_due_date_reminders_at(Utc::now()).await
    }

    pub async fn check_due_date_reminders_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<SweepOutcome, NotifyError> {
        let Some(_permit) = self.due_soon_guard.try_enter() else {
            return Ok(SweepOutcome::AlreadyRunning);
        };

        let candidates = self.tasks.pending_reminders(now).await?;
        let mut owner_ids: Vec<String> = candidates.iter().map(|t| t.user_id.clone()).collect();
        owner_ids.sort();
        owner_ids.dedup();
        let owners: HashMap<String, User> = self
            .accounts
            .find_users(&owner_ids)
            .await?
            .into_iter()
            .map(|u| (u.id.clone(), u))
            .collect();

        let mut report = SweepReport {
            candidates: candidates.len(),
            ..SweepReport::default()
        };

        for todo in &candidates {
            let owner = owners.get(&todo.user_id);
            match eligibility::due_soon(todo, owner, now) {
                DueSoon::Eligible => {}
                DueSoon::NotYet => continue,
                reason => {
                    debug!("Skipping reminder for todo {}: {:?}", todo.id, reason);
                    report.skipped += 1;
                    continue;
                }
            }
            let Some(owner) = owner else { continue };

            let email = self
                .templates
                .due_date_reminder(&owner.email, &owner.username, todo);
            match self.mailer.send(email).await {
                Ok(id) => {
                    report.sent += 1;
                    match self.tasks.mark_reminder_sent(&todo.id, now).await {
                        Ok(_) => info!(
                            "Sent reminder {} to {} for todo: {} ({} min before)",
                            id,
                            owner.email,
                            todo.title,
                            todo.reminder.as_ref().map_or(0, |r| r.minutes_before)
                        ),
                        Err(e) => error!(
                            "Reminder {} for todo {} was sent but not recorded: {}",
                            id, todo.id, e
                        ),
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    error!("Failed to send reminder to {}: {}", owner.email, e);
                }
            }
        }

        Ok(SweepOutcome::Completed(report))
    }

    pub async fn check_overdue_todos(&self) -> Result<SweepOutcome, NotifyError> {
        self.check_overdue_todos_at(Utc::now()).await
    }

    pub async fn check_overdue_todos_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<SweepOutcome, NotifyError> {
        let Some(_permit) = self.overdue_guard.try_enter() else {
            return Ok(SweepOutcome::AlreadyRunning);
        };

        let today = calendar_day(now);
        let mut report = SweepReport::default();

        for user in self.accounts.overdue_subscribers().await? {
            if !user.email_notifications.wants_overdue_notifications() {
                continue;
            }
            let overdue = self.tasks.overdue_for_user(&user.id, now).await?;
            report.candidates += overdue.len();

            for todo in overdue.iter().filter(|t| t.is_overdue_at(now)) {
                let key = OverdueKey::new(&user.id, &todo.id, today);
                match self.ledger.contains(&key).await {
                    Ok(false) => {}
                    Ok(true) => {
                        report.skipped += 1;
                        continue;
                    }
                    Err(e) => {
                        report.failed += 1;
                        error!("Could not read overdue marker {}: {}", key, e);
                        continue;
                    }
                }

                let email = self.templates.overdue_notice(&user.email, &user.username, todo);
                match self.mailer.send(email).await {
                    Ok(id) => {
                        report.sent += 1;
                        match self.ledger.record(&key, now).await {
                            Ok(()) => info!(
                                "Sent overdue notification {} to {} for todo: {}",
                                id, user.email, todo.title
                            ),
                            Err(e) => error!(
                                "Overdue notice {} was sent but marker {} not recorded: {}",
                                id, key, e
                            ),
                        }
                    }
                    Err(e) => {
                        report.failed += 1;
                        error!("Failed to send overdue notification to {}: {}", user.email, e);
                    }
                }
            }
        }

        Ok(SweepOutcome::Completed(report))
    }

    /// Drops overdue markers from days before `today`.
    pub async fn reset_ledger(&self, today: NaiveDate) -> Result<u64, NotifyError> {
        Ok(self.ledger.purge_before(today).await?)
    }

    /// Sends a notice for one of the user's todos right away, ignoring
    /// schedules, eligibility and the sent flags.
    pub async fn send_test_notice(
        &self,
        kind: NoticeKind,
        user_id: &str,
        todo_id: &str,
    ) -> Result<DeliveryId, NotifyError> {
        let user = self
            .accounts
            .find_user(user_id)
            .await?
            .ok_or(NotifyError::NotFound("user"))?;
        let todo = self
            .tasks
            .find_todo(todo_id)
            .await?
            .filter(|t| t.user_id == user.id)
            .ok_or(NotifyError::NotFound("todo"))?;
        self.send_notice(kind, &user, &todo).await
    }

    pub async fn send_notice(
        &self,
        kind: NoticeKind,
        user: &User,
        todo: &Todo,
    ) -> Result<DeliveryId, NotifyError> {
        let email = match kind {
            NoticeKind::DueDate => {
                self.templates
                    .due_date_reminder(&user.email, &user.username, todo)
            }
            NoticeKind::Overdue => self.templates.overdue_notice(&user.email, &user.username, todo),
        };
        let id = self.mailer.send(email).await?;
        info!("Test {:?} notice {} sent to {}", kind, id, user.email);
        Ok(id)
    }

    pub async fn stats(&self) -> Result<NotificationStats, NotifyError> {
        self.stats_at(Utc::now()).await
    }

    pub async fn stats_at(&self, now: DateTime<Utc>) -> Result<NotificationStats, NotifyError> {
        let (start, end) = day_bounds(now);
        Ok(NotificationStats {
            todos_due_today: self.tasks.count_open_due_between(start, end).await?,
            overdue_todos: self.tasks.count_overdue(now).await?,
            users_with_notifications: self.accounts.count_notifications_enabled().await?,
            sent_reminders_today: self.ledger.count_for(calendar_day(now)).await?,
        })
    }
}
