//! Step pacing: immediate requests, delayed retries, and backoff reset.

use crate::{Deriver, Emitter, Event};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

/// The initial retry delay after a temporary error.
pub const STEP_BACKOFF_BASE: Duration = Duration::from_millis(250);

/// The retry delay cap.
pub const STEP_BACKOFF_MAX: Duration = Duration::from_secs(10);

/// A step schedule handed to the driver loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepSchedule {
    /// Attempt the step as soon as the loop is back in its select.
    Now,
    /// Attempt the step after the given delay.
    After(Duration),
}

/// Schedules step attempts.
///
/// Exactly one attempt may be outstanding: duplicate [`Event::StepReq`]s
/// collapse until the attempt fires. Temporary errors grow the retry delay
/// exponentially from [`STEP_BACKOFF_BASE`] to [`STEP_BACKOFF_MAX`];
/// [`Event::ResetStepBackoff`] and an idle pipeline restart it at the base.
#[derive(Debug)]
pub struct StepSchedulingDeriver {
    emitter: Emitter,
    schedule_tx: mpsc::UnboundedSender<StepSchedule>,
    attempt_pending: bool,
    backoff: Option<Duration>,
}

impl StepSchedulingDeriver {
    /// Creates the scheduler. Schedules are sent to the driver loop over
    /// `schedule_tx`.
    pub fn new(emitter: Emitter, schedule_tx: mpsc::UnboundedSender<StepSchedule>) -> Self {
        Self { emitter, schedule_tx, attempt_pending: false, backoff: None }
    }

    fn schedule(&mut self) {
        if self.attempt_pending {
            return;
        }
        self.attempt_pending = true;
        let schedule = match self.backoff {
            Some(delay) => StepSchedule::After(delay),
            None => StepSchedule::Now,
        };
        if self.schedule_tx.send(schedule).is_err() {
            warn!(target: "driver", "Step schedule receiver dropped");
        }
    }

    fn grow_backoff(&mut self) {
        self.backoff = Some(match self.backoff {
            Some(delay) => STEP_BACKOFF_MAX.min(delay * 2),
            None => STEP_BACKOFF_BASE,
        });
    }
}

#[async_trait]
impl Deriver for StepSchedulingDeriver {
    fn name(&self) -> &'static str {
        "step-scheduler"
    }

    async fn on_event(&mut self, ev: &Event) -> bool {
        match ev {
            Event::StepReq => self.schedule(),
            Event::StepAttempt => {
                self.attempt_pending = false;
                self.emitter.emit(Event::Step);
            }
            Event::ResetStepBackoff | Event::DeriverIdle { .. } => self.backoff = None,
            Event::TemporaryL1Error { .. } | Event::TemporaryEngineError { .. } => {
                self.grow_backoff()
            }
            _ => return false,
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EventSystem;

    fn scheduler() -> (StepSchedulingDeriver, mpsc::UnboundedReceiver<StepSchedule>, EventSystem)
    {
        let sys = EventSystem::new();
        let (tx, rx) = mpsc::unbounded_channel();
        (StepSchedulingDeriver::new(sys.emitter(), tx), rx, sys)
    }

    #[tokio::test]
    async fn test_duplicate_step_requests_collapse() {
        let (mut sched, mut rx, _sys) = scheduler();
        sched.on_event(&Event::StepReq).await;
        sched.on_event(&Event::StepReq).await;
        sched.on_event(&Event::StepReq).await;

        assert_eq!(rx.try_recv().unwrap(), StepSchedule::Now);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_attempt_reopens_scheduling() {
        let (mut sched, mut rx, _sys) = scheduler();
        sched.on_event(&Event::StepReq).await;
        sched.on_event(&Event::StepAttempt).await;
        sched.on_event(&Event::StepReq).await;

        assert_eq!(rx.try_recv().unwrap(), StepSchedule::Now);
        assert_eq!(rx.try_recv().unwrap(), StepSchedule::Now);
    }

    #[tokio::test]
    async fn test_backoff_doubles_and_caps() {
        let (mut sched, mut rx, _sys) = scheduler();

        let mut expected = STEP_BACKOFF_BASE;
        for _ in 0..8 {
            sched.on_event(&Event::TemporaryEngineError { cause: "syncing".into() }).await;
            sched.on_event(&Event::StepReq).await;
            sched.on_event(&Event::StepAttempt).await;

            assert_eq!(rx.try_recv().unwrap(), StepSchedule::After(expected));
            expected = STEP_BACKOFF_MAX.min(expected * 2);
        }
        assert_eq!(expected, STEP_BACKOFF_MAX);
    }

    #[tokio::test]
    async fn test_reset_backoff_restarts_at_base() {
        let (mut sched, mut rx, _sys) = scheduler();
        sched.on_event(&Event::TemporaryL1Error { cause: "timeout".into() }).await;
        sched.on_event(&Event::TemporaryL1Error { cause: "timeout".into() }).await;
        sched.on_event(&Event::ResetStepBackoff).await;
        sched.on_event(&Event::StepReq).await;

        assert_eq!(rx.try_recv().unwrap(), StepSchedule::Now);
    }
}
