//! Cron-driven timers for the notification jobs.

use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use chrono::Local;
use cron::Schedule;
use log::{info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::NotificationConfig;
use crate::notifications::NotifyError;

/// Parses a cron expression. Standard 5-field expressions get a leading
/// seconds field; 6- and 7-field expressions are taken as-is.
pub fn parse_cron(expr: &str) -> Result<Schedule, NotifyError> {
    let trimmed = expr.trim();
    let full = if trimmed.split_whitespace().count() == 5 {
        format!("0 {}", trimmed)
    } else {
        trimmed.to_string()
    };
    Schedule::from_str(&full).map_err(|e| NotifyError::InvalidSchedule {
        expr: expr.to_string(),
        reason: e.to_string(),
    })
}

/// The three periodic jobs of the notification service.
#[derive(Clone, Debug)]
pub struct Schedules {
    pub due_soon: Schedule,
    pub overdue: Schedule,
    pub ledger_reset: Schedule,
}

impl Schedules {
    pub fn from_config(config: &NotificationConfig) -> Result<Self, NotifyError> {
        Ok(Self {
            due_soon: parse_cron(&config.due_soon_cron)?,
            overdue: parse_cron(&config.overdue_cron)?,
            ledger_reset: parse_cron(&config.ledger_reset_cron)?,
        })
    }
}

/// Runs `job` at every firing of `schedule` (local time) until `token` is
/// cancelled. A job that is already running when the token fires is
/// awaited to completion; firings missed while it ran are skipped.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    schedule: Schedule,
    token: CancellationToken,
    job: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let now = Local::now();
            let Some(next) = schedule.after(&now).next() else {
                warn!("Schedule '{}' has no upcoming firings; timer exits", name);
                break;
            };
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);

            tokio::select! {
                _ = token.cancelled() => {
                    info!("Schedule '{}' stopped", name);
                    break;
                }
                _ = tokio::time::sleep(wait) => {}
            }

            job().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn five_field_expressions_are_accepted() {
        assert!(parse_cron("*/15 * * * *").is_ok());
        assert!(parse_cron("0 9 * * *").is_ok());
        assert!(parse_cron("0 0 * * *").is_ok());
    }

    #[test]
    fn six_field_expressions_pass_through() {
        assert!(parse_cron("*/5 * * * * *").is_ok());
    }

    #[test]
    fn garbage_is_rejected() {
        let err = parse_cron("every tuesday").unwrap_err();
        assert!(matches!(err, NotifyError::InvalidSchedule { .. }));
    }

    #[test]
    fn due_soon_default_fires_every_quarter_hour() {
        let schedule = parse_cron("*/15 * * * *").unwrap();
        let mut upcoming = schedule.upcoming(Local).take(2);
        let first = upcoming.next().unwrap();
        let second = upcoming.next().unwrap();
        assert_eq!((second - first).num_minutes(), 15);
    }

    #[tokio::test]
    async fn periodic_job_stops_on_cancel() {
        let runs = Arc::new(AtomicUsize::new(0));
        let token = CancellationToken::new();
        let counter = runs.clone();
        let handle = spawn_periodic(
            "every-second",
            parse_cron("* * * * * *").unwrap(),
            token.clone(),
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            },
        );

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        token.cancel();
        handle.await.unwrap();

        let after_stop = runs.load(Ordering::SeqCst);
        assert!(after_stop >= 1);
        tokio::time::sleep(Duration::from_millis(1_200)).await;
        assert_eq!(runs.load(Ordering::SeqCst), after_stop);
    }
}
