// src/main.rs

mod app_state;
mod auth;
mod config;
mod db;
mod diagnostics;
mod error;
mod mailer;
mod models;
mod notifications;
mod store;
mod todo;
mod user_management;

use std::io;
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{http, middleware::Logger, web, App, HttpServer};
use env_logger::Env;
use log::{error, info, warn};

use crate::app_state::AppState;
use crate::auth::{login, logout, me, register, Authentication};
use crate::config::{Config, LedgerBackend};
use crate::diagnostics::{
    email_status, run_due_soon, run_overdue, test_email, test_overdue, test_reminder,
};
use crate::mailer::{EmailTemplates, SmtpMailer};
use crate::notifications::ledger::{MemoryLedger, MongoLedger, OverdueLedger};
use crate::notifications::schedule::Schedules;
use crate::notifications::NotificationService;
use crate::store::MongoStore;
use crate::todo::{
    complete_todo, create_todo, delete_todo, get_todo, list_todos, update_todo,
    update_todo_status,
};
use crate::user_management::{get_notification_settings, update_notification_settings};

#[actix_web::main]
async fn main() -> io::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = Config::from_env().map_err(|e| {
        error!("Invalid configuration: {}", e);
        io::Error::other(e)
    })?;

    let mongodb = db::MongoDB::init(&config.mongo_uri, &config.database_name)
        .await
        .map_err(|e| {
            error!("Failed to connect to MongoDB: {}", e);
            io::Error::other(e)
        })?;
    if let Err(e) = mongodb.ensure_indexes().await {
        warn!("Could not create indexes: {}", e);
    }
    let mongodb = Arc::new(mongodb);
    info!("Connected to MongoDB database '{}'", config.database_name);

    let store = Arc::new(MongoStore::new(mongodb.db.clone()));
    let ledger: Arc<dyn OverdueLedger> = match config.notifications.ledger {
        LedgerBackend::Mongo => Arc::new(MongoLedger::new(&mongodb.db)),
        LedgerBackend::Memory => Arc::new(MemoryLedger::default()),
    };
    let mailer = Arc::new(SmtpMailer::from_config(&config.smtp).map_err(|e| {
        error!("Invalid email configuration: {}", e);
        io::Error::other(e)
    })?);
    {
        let mailer = mailer.clone();
        tokio::spawn(async move { mailer.verify().await });
    }

    let notifier = Arc::new(NotificationService::new(
        store.clone(),
        store,
        mailer,
        ledger,
        EmailTemplates::new(config.frontend_url.clone()),
    ));
    if config.notifications.enabled {
        let schedules = Schedules::from_config(&config.notifications).map_err(|e| {
            error!("Invalid notification schedule: {}", e);
            io::Error::other(e)
        })?;
        notifier.start(&schedules);
    } else {
        info!("Notifications disabled; scheduler not started");
    }

    let state = AppState {
        mongodb,
        config: config.clone(),
        notifier: notifier.clone(),
    };
    let bind_addr = config.bind_addr.clone();

    info!("Server running at http://{}", bind_addr);
    info!("Allowed CORS Origin: {}", config.cors_origin);

    let result = HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin(&state.config.cors_origin)
            .allowed_methods(vec!["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"])
            .allowed_headers(vec![
                http::header::CONTENT_TYPE,
                http::header::ACCEPT,
                http::header::AUTHORIZATION,
            ])
            .supports_credentials()
            .max_age(3600);

        App::new()
            .wrap(Authentication::new(state.config.jwt.access_secret.clone()))
            .wrap(cors)
            .wrap(Logger::default())
            .app_data(web::Data::new(state.clone()))
            .service(
                web::scope("/api/v1")
                    // USERS
                    .service(
                        web::scope("/users")
                            .route("/register", web::post().to(register))
                            .route("/login", web::post().to(login))
                            .route("/logout", web::post().to(logout))
                            .route("/me", web::get().to(me))
                            .route("/notification-settings", web::get().to(get_notification_settings))
                            .route("/notification-settings", web::patch().to(update_notification_settings)),
                    )
                    // TODOS
                    .service(
                        web::scope("/todos")
                            .route("", web::post().to(create_todo))
                            .route("", web::get().to(list_todos))
                            .route("/{todo_id}", web::get().to(get_todo))
                            .route("/{todo_id}", web::patch().to(update_todo))
                            .route("/{todo_id}", web::put().to(update_todo))
                            .route("/{todo_id}", web::delete().to(delete_todo))
                            .route("/{todo_id}/status", web::patch().to(update_todo_status))
                            .route("/{todo_id}/complete", web::patch().to(complete_todo)),
                    )
                    // NOTIFICATION TESTING
                    .service(
                        web::scope("/test")
                            .route("/test-email", web::post().to(test_email))
                            .route("/test-reminder", web::post().to(test_reminder))
                            .route("/test-overdue", web::post().to(test_overdue))
                            .route("/email-status", web::get().to(email_status))
                            .route("/run-due-soon", web::post().to(run_due_soon))
                            .route("/run-overdue", web::post().to(run_overdue)),
                    ),
            )
    })
    .bind(&bind_addr)?
    .run()
    .await;

    notifier.stop();
    result
}
