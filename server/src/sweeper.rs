use devcat_store::RegistryStore;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, warn};

/// Shortest sweep period accepted.
const MIN_PERIOD: Duration = Duration::from_millis(10);

/// Spawns a task purging lapsed leases from `store` every `period` until
/// `cancel` fires.
pub fn spawn_expiry_sweeper(
    store: Arc<RegistryStore>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let period = period.max(MIN_PERIOD);
    tokio::spawn(
        async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                match store.purge_expired(Instant::now()) {
                    Ok(purged) if !purged.is_empty() => {
                        debug!("Purged {} expired registrations", purged.len());
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Expiry sweep failed: {e}"),
                }
            }
            debug!("Expiry sweeper stopped");
        }
        .in_current_span(),
    )
}
