use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::runtime::{ContainerRuntime, RuntimeResult};

const MIN_SWEEP_PERIOD: Duration = Duration::from_secs(60);
const MAX_SWEEP_PERIOD: Duration = Duration::from_secs(60 * 60);

/// Removes evaluator containers created more than `lifetime` ago and returns
/// how many were removed. Individual delete failures are logged and skipped.
pub async fn sweep_stale_containers<R>(runtime: &R, lifetime: Duration) -> RuntimeResult<usize>
where
    R: ContainerRuntime + ?Sized,
{
    let stale = runtime.list_stale(lifetime).await?;
    let mut removed = 0;

    for id in stale {
        match runtime.delete(&id).await {
            Ok(()) => {
                log::info!("Removed stale container {id}");
                removed += 1;
            }
            Err(e) => log::warn!("Failed to remove stale container {id}: {e}"),
        }
    }

    Ok(removed)
}

/// Sweeps periodically until the token is cancelled
pub async fn run_sweeper<R: ContainerRuntime>(
    runtime: Arc<R>,
    lifetime: Duration,
    token: CancellationToken,
) {
    let period = sweep_period(lifetime);
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    log::info!(
        "Container sweeper started (lifetime {}s, period {}s)",
        lifetime.as_secs(),
        period.as_secs()
    );

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = sweep_stale_containers(runtime.as_ref(), lifetime).await {
                    log::warn!("Container sweep failed: {e}");
                }
            }
        }
    }

    log::info!("Container sweeper stopped");
}

fn sweep_period(lifetime: Duration) -> Duration {
    (lifetime / 4).clamp(MIN_SWEEP_PERIOD, MAX_SWEEP_PERIOD)
}
