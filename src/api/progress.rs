//! Background loop folding task progress back into documents.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::application::TaskService;

/// Runs `update_progress` every `interval` until `shutdown` flips to true.
pub fn spawn_progress_updater(
    tasks: Arc<TaskService>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(interval_secs = interval.as_secs_f64(), "progress updater started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match tasks.update_progress().await {
                        Ok(0) => {}
                        Ok(updated) => tracing::debug!(updated, "document progress updated"),
                        Err(e) => tracing::error!(error = %e, "progress update failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("progress updater stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::services::testing;
    use crate::application::{Services, Settings};

    #[tokio::test]
    async fn test_updater_stops_on_shutdown() {
        let services = Services::new(testing::backends(), Settings::default());
        let (tx, rx) = watch::channel(false);
        let handle = spawn_progress_updater(services.tasks.clone(), Duration::from_millis(10), rx);

        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
