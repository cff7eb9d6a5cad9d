//! Scheduler service
//!
//! Wires the reminder batch job onto a cron schedule. The job itself
//! lives in [`RemindersService::run_batch`]; this service only owns the
//! periodic execution and its lifecycle.

use crate::error::{AppError, Result};
use crate::services::RemindersService;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

/// Cron expression for the batch cadence: once a minute, which keeps
/// every reminder inside its schedule tolerance window.
const BATCH_CRON: &str = "0 * * * * *";

/// Scheduler service for the periodic reminder batch job
pub struct ReminderScheduler {
    scheduler: Arc<RwLock<JobScheduler>>,
    reminders: Arc<RemindersService>,
    current_job_id: Arc<RwLock<Option<Uuid>>>,
}

impl ReminderScheduler {
    /// Create a new scheduler around the reminders service
    pub async fn new(reminders: RemindersService) -> Result<Self> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| AppError::Generic(format!("Failed to create scheduler: {}", e)))?;

        Ok(Self {
            scheduler: Arc::new(RwLock::new(scheduler)),
            reminders: Arc::new(reminders),
            current_job_id: Arc::new(RwLock::new(None)),
        })
    }

    /// Start the scheduler
    pub async fn start(&self) -> Result<()> {
        let scheduler = self.scheduler.read().await;
        scheduler
            .start()
            .await
            .map_err(|e| AppError::Generic(format!("Failed to start scheduler: {}", e)))?;
        tracing::info!("Reminder scheduler started");
        Ok(())
    }

    /// Schedule the batch job. Replaces any previously scheduled job.
    pub async fn schedule_batch(&self) -> Result<()> {
        self.cancel_batch().await?;

        let reminders = Arc::clone(&self.reminders);

        let job = Job::new_async(BATCH_CRON, move |_uuid, _l| {
            let reminders = Arc::clone(&reminders);
            Box::pin(async move {
                match reminders.run_batch(Utc::now()).await {
                    Ok(fired) if fired > 0 => {
                        tracing::info!("Reminder batch fired {} reminder(s)", fired);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!("Reminder batch failed: {}", e);
                    }
                }
            })
        })
        .map_err(|e| AppError::Generic(format!("Failed to create batch job: {}", e)))?;

        let job_id = job.guid();

        let scheduler = self.scheduler.write().await;
        scheduler
            .add(job)
            .await
            .map_err(|e| AppError::Generic(format!("Failed to schedule batch job: {}", e)))?;

        let mut current_job = self.current_job_id.write().await;
        *current_job = Some(job_id);

        tracing::info!("Reminder batch scheduled ({})", BATCH_CRON);
        Ok(())
    }

    /// Cancel the scheduled batch job, if any
    pub async fn cancel_batch(&self) -> Result<()> {
        let mut current_job = self.current_job_id.write().await;

        if let Some(job_id) = *current_job {
            let scheduler = self.scheduler.write().await;
            scheduler
                .remove(&job_id)
                .await
                .map_err(|e| AppError::Generic(format!("Failed to remove batch job: {}", e)))?;

            *current_job = None;
            tracing::info!("Reminder batch schedule cancelled");
        }

        Ok(())
    }

    /// Shutdown the scheduler gracefully
    pub async fn shutdown(&self) -> Result<()> {
        let mut scheduler = self.scheduler.write().await;
        scheduler
            .shutdown()
            .await
            .map_err(|e| AppError::Generic(format!("Failed to shutdown scheduler: {}", e)))?;
        tracing::info!("Reminder scheduler shutdown");
        Ok(())
    }
}
