//! # Flusher
//!
//! In-process scheduling of [Instrumentation::flush_meters], for deployments without an external
//! scheduled job

use super::instrumentation::Instrumentation;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, warn};

/// Flush meters every `period` on the current tokio runtime until the returned handle is aborted
///
/// The first flush happens one `period` after the call. Flushes block on the submission client, so
/// they run on the blocking pool and never overlap.
pub fn spawn_flusher(instrumentation: Instrumentation, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticks = interval_at(Instant::now() + period, period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticks.tick().await;

            let instrumentation = instrumentation.clone();
            match tokio::task::spawn_blocking(move || instrumentation.flush_meters()).await {
                Ok(report) if report.is_ok() => debug!("Flushed {} meters", report.metrics),
                Ok(report) => warn!("Partial meter flush: {report:?}"),
                Err(e) => error!("Meter flush panicked: {e}"),
            }
        }
    })
}
