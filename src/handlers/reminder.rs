use anyhow::Result;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::services::Database;

/// Background sweep that promotes scheduled reminders to `due` once
/// their time passes. Clients pick the change up by polling the
/// reminders endpoint; nothing is pushed.
pub struct ReminderSweeper {
    db: Arc<Database>,
    scheduler: JobScheduler,
}

impl ReminderSweeper {
    pub async fn new(db: Arc<Database>) -> Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self { db, scheduler })
    }

    pub async fn start(&mut self) -> Result<()> {
        let db = self.db.clone();

        // Once a minute is plenty; reminder resolution is minutes anyway
        let job = Job::new_async("0 * * * * *", move |_uuid, _l| {
            let db = db.clone();
            Box::pin(async move {
                match db.mark_due_reminders(chrono::Utc::now()).await {
                    Ok(0) => {}
                    Ok(n) => log::info!("⏰ Marked {} reminder(s) as due", n),
                    Err(e) => log::error!("❌ Reminder sweep failed: {}", e),
                }
            })
        })?;

        self.scheduler.add(job).await?;
        self.scheduler.start().await?;

        log::info!("✅ Reminder sweeper started");
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        self.scheduler.shutdown().await?;
        Ok(())
    }
}
