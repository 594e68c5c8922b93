//! Periodic tick driver for hosts without their own UI timer

use crate::presentation::TickOutcome;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Why [`run_every`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleExit {
    /// The token was cancelled
    Cancelled,
    /// The tick function requested teardown
    Teardown,
}

/// Call `tick` every `period` until it returns [`TickOutcome::Teardown`] or
/// `cancel` fires
///
/// Late ticks are skipped rather than bunched up. The first tick runs
/// immediately.
pub async fn run_every<F>(period: Duration, cancel: CancellationToken, mut tick: F) -> ScheduleExit
where
    F: FnMut() -> TickOutcome,
{
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                debug!("Tick schedule cancelled");
                return ScheduleExit::Cancelled;
            }
            _ = interval.tick() => {
                if tick() == TickOutcome::Teardown {
                    debug!("Tick schedule finished by teardown");
                    return ScheduleExit::Teardown;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stops_on_teardown() {
        let mut count = 0;
        let exit = run_every(Duration::from_millis(1), CancellationToken::new(), || {
            count += 1;
            if count == 3 {
                TickOutcome::Teardown
            } else {
                TickOutcome::Reschedule
            }
        })
        .await;

        assert_eq!(exit, ScheduleExit::Teardown);
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn test_stops_on_cancel() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let mut count = 0;

        let exit = run_every(Duration::from_millis(1), cancel, || {
            count += 1;
            if count == 2 {
                trigger.cancel();
            }
            TickOutcome::Reschedule
        })
        .await;

        assert_eq!(exit, ScheduleExit::Cancelled);
        assert!(count >= 2);
    }

    #[tokio::test]
    async fn test_already_cancelled_runs_at_most_once() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut count = 0;
        let exit = run_every(Duration::from_secs(60), cancel, || {
            count += 1;
            TickOutcome::Reschedule
        })
        .await;
        assert_eq!(exit, ScheduleExit::Cancelled);
        assert!(count <= 1);
    }
}
