use log::info;
use mongodb::{
    bson::doc,
    options::{ClientOptions, IndexOptions},
    Client, Database, IndexModel,
};

use crate::models::{TodoDocument, UserDocument, OVERDUE_NOTICES, TODOS, USERS};
use crate::notifications::ledger::OverdueNotice;

pub struct MongoDB {
    pub db: Database,
}

impl MongoDB {
    pub async fn init(uri: &str, db_name: &str) -> mongodb::error::Result<Self> {
        let client_options = ClientOptions::parse(uri).await?;
        let client = Client::with_options(client_options)?;
        Ok(MongoDB {
            db: client.database(db_name),
        })
    }

    /// Creates the indexes the handlers and the notification sweep rely on.
    /// Safe to call on every startup.
    pub async fn ensure_indexes(&self) -> mongodb::error::Result<()> {
        let unique = || IndexOptions::builder().unique(true).build();

        self.db
            .collection::<UserDocument>(USERS)
            .create_indexes(vec![
                IndexModel::builder()
                    .keys(doc! { "username": 1 })
                    .options(unique())
                    .build(),
                IndexModel::builder()
                    .keys(doc! { "email": 1 })
                    .options(unique())
                    .build(),
            ])
            .await?;

        self.db
            .collection::<TodoDocument>(TODOS)
            .create_indexes(vec![
                IndexModel::builder()
                    .keys(doc! { "user_id": 1, "created_at": -1 })
                    .build(),
                IndexModel::builder()
                    .keys(doc! { "status": 1, "due_date": 1 })
                    .build(),
                IndexModel::builder()
                    .keys(doc! { "user_id": 1, "status": 1, "priority": 1 })
                    .build(),
                IndexModel::builder()
                    .keys(doc! { "reminder.enabled": 1, "reminder.email_sent": 1 })
                    .build(),
            ])
            .await?;

        self.db
            .collection::<OverdueNotice>(OVERDUE_NOTICES)
            .create_index(IndexModel::builder().keys(doc! { "day": 1 }).build())
            .await?;

        info!("MongoDB indexes ensured");
        Ok(())
    }
}
