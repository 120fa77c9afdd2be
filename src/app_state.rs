use crate::config::Config;
use crate::db::MongoDB;
use crate::notifications::NotificationService;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub mongodb: Arc<MongoDB>,
    pub config: Config,
    pub notifier: Arc<NotificationService>,
}
