use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{metrics, Result};

/// Run `tick` every `period` until `cancel` fires.
///
/// The first run happens one period after start. A tick in flight when
/// cancellation arrives is dropped, which rolls back any open transaction.
/// Errors are counted under `task` and the loop keeps going. Transient
/// backend errors log at warn level, anything else at error.
pub fn spawn_periodic<F, Fut>(
    task: &'static str,
    period: Duration,
    cancel: CancellationToken,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut timer = interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(task, period_secs = period.as_secs(), "Background task started");

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = timer.tick() => {}
            }

            tokio::select! {
                () = cancel.cancelled() => break,
                result = tick() => {
                    if let Err(e) = result {
                        metrics::gc::ERRORS.with_label_values(&[task]).inc();
                        if e.is_transient() {
                            tracing::warn!(task, error = %e, "Background task pass failed, retrying next period");
                        } else {
                            tracing::error!(task, error = %e, "Background task pass failed");
                        }
                    }
                }
            }
        }

        tracing::info!(task, "Background task shutting down");
    })
}
