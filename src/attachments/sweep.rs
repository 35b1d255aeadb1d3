//! Background expiry sweep for the attachment store.
//!
//! Removes sessions whose last activity is older than the store's maximum
//! age. The task holds no resources that keep the runtime alive and exits as
//! soon as its cancellation token fires.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::store::TempFileStore;

/// Spawn the recurring expiry sweep.
///
/// The first sweep runs one `period` after spawning, then every `period`.
#[must_use]
pub fn spawn_expiry_task(
    store: TempFileStore,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("attachment expiry sweep shutting down");
                    break;
                }
                _ = interval.tick() => {
                    match store.cleanup_expired().await {
                        Ok(summary) if summary.sessions_removed > 0 => {
                            info!(
                                sessions = summary.sessions_removed,
                                files = summary.files_removed,
                                "expired attachment sessions removed"
                            );
                        }
                        Ok(_) => {}
                        Err(err) => error!(%err, "attachment expiry sweep failed"),
                    }
                }
            }
        }
    })
}
