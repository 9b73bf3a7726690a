use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

use super::TransportPool;

/// Sweep all idle connections out of `pool` every `every`, starting one full
/// interval from now, until `token` is cancelled.
pub fn spawn_flush(
    pool: TransportPool,
    every: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        log::info!("starting idle connection flush routine");
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    log::info!("idle connection flush routine received completion signal");
                    return;
                }
                _ = ticker.tick() => {
                    let closed = pool.evict_idle();
                    log::info!("executing idle connection flush, closed {closed} idle connections");
                }
            }
        }
    })
}
