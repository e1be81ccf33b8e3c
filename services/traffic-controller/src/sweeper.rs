//! Periodic sweep of expired sessions
//!
//! Keeps storage tidy between requests. Expiry is still decided at read time,
//! so a missed sweep never lets a stale session through.

use anyhow::Result;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use crate::dispatcher::Gateway;

/// Schedule the sweep; an empty schedule disables it
pub async fn start_session_sweeper(gateway: Gateway, schedule: &str) -> Result<Option<JobScheduler>> {
    if schedule.trim().is_empty() {
        info!("Session sweeper disabled");
        return Ok(None);
    }

    let scheduler = JobScheduler::new().await?;

    let job = Job::new_async(schedule, move |_, _| {
        let gateway = gateway.clone();
        Box::pin(async move {
            let now = gateway.clock().now();
            if let Err(e) = gateway.sessions().sweep_expired(now).await {
                error!("Failed to sweep expired sessions: {}", e);
            }
        })
    })?;

    scheduler.add(job).await?;
    scheduler.start().await?;

    info!("Started session sweeper with schedule: {}", schedule);
    Ok(Some(scheduler))
}
