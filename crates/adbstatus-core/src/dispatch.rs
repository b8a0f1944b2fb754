//! Rule matching and action dispatch.
//!
//! A single [`Dispatcher`] task drains a bounded queue of [`DispatchJob`]s. Jobs
//! run one at a time, so scripts for different events never interleave, and
//! each job carries the snapshot that was current when its event happened.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::action::{ActionContext, ActionError, ActionRunner};
use crate::device::{DeviceEvent, DeviceRecord, DeviceSnapshot, EventKind};
use crate::rules::RuleSet;

/// An event together with the snapshot it should be evaluated against.
#[derive(Debug, Clone)]
pub struct DispatchJob {
    /// What happened.
    pub event: DeviceEvent,
    /// Devices connected at that moment.
    pub snapshot: Arc<DeviceSnapshot>,
}

/// Tally of one dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Scripts started.
    pub ran: usize,
    /// Scripts that exited zero.
    pub succeeded: usize,
    /// Scripts that exited non-zero or could not start.
    pub failed: usize,
    /// Scripts killed at the timeout.
    pub timed_out: usize,
}

impl DispatchReport {
    fn record(&mut self, result: &Result<(), ActionError>) {
        self.ran += 1;
        match result {
            Ok(()) => self.succeeded += 1,
            Err(ActionError::TimedOut { .. }) => self.timed_out += 1,
            Err(_) => self.failed += 1,
        }
    }
}

/// Matches events against rules and runs the selected scripts.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    rules: RuleSet,
    runner: ActionRunner,
}

impl Dispatcher {
    /// Creates a dispatcher.
    #[must_use]
    pub const fn new(rules: RuleSet, runner: ActionRunner) -> Self {
        Self { rules, runner }
    }

    /// Runs every script the event selects and reports how they went.
    ///
    /// Connect and Disconnect are matched against the event's own device. Sleep
    /// and Wake are matched once per device in `snapshot`. A failing script never
    /// stops the ones after it.
    pub async fn dispatch(&self, event: &DeviceEvent, snapshot: &DeviceSnapshot) -> DispatchReport {
        let kind = event.kind();
        let span = info_span!("dispatch", dispatch_id = %Uuid::new_v4(), event = %kind);

        async {
            let mut report = DispatchReport::default();
            match event.device() {
                Some(device) => self.run_for(device, kind, &mut report).await,
                None => {
                    for device in snapshot.devices() {
                        self.run_for(device, kind, &mut report).await;
                    }
                }
            }
            debug!(
                ran = report.ran,
                succeeded = report.succeeded,
                failed = report.failed,
                timed_out = report.timed_out,
                "dispatch finished"
            );
            report
        }
        .instrument(span)
        .await
    }

    async fn run_for(&self, device: &DeviceRecord, kind: EventKind, report: &mut DispatchReport) {
        for selected in self.rules.select(device, kind) {
            let context = ActionContext {
                device,
                kind,
                rule: &selected.rule,
            };
            let result = match self.runner.run(selected.script, &context).await {
                Ok(output) => {
                    info!(
                        serial = %device.serial,
                        rule = %selected.rule,
                        stdout = %output.stdout,
                        stderr = (!output.stderr.is_empty()).then_some(output.stderr.as_str()),
                        "action succeeded"
                    );
                    Ok(())
                }
                Err(err) => {
                    warn!(
                        serial = %device.serial,
                        rule = %selected.rule,
                        error = %err,
                        "action failed"
                    );
                    Err(err)
                }
            };
            report.record(&result);
        }
    }

    /// Drains `jobs` until the queue closes or `cancel` fires.
    ///
    /// A job already running when `cancel` fires is finished. Jobs still queued
    /// are dropped and counted in the log. Returns the number of jobs handled.
    pub async fn run_queue(
        self,
        mut jobs: mpsc::Receiver<DispatchJob>,
        cancel: CancellationToken,
    ) -> usize {
        let mut handled = 0;
        loop {
            let job = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                job = jobs.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };
            self.dispatch(&job.event, &job.snapshot).await;
            handled += 1;
        }

        jobs.close();
        let mut dropped = 0;
        while jobs.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            warn!(dropped, "dropped queued dispatches at shutdown");
        }
        handled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceState;
    use crate::rules::{ActionRule, DeviceFilter};
    use std::time::Duration;

    fn record(serial: &str) -> DeviceRecord {
        DeviceRecord::new(serial, DeviceState::Device)
    }

    fn dispatcher(rules: Vec<ActionRule>, timeout: Duration) -> Dispatcher {
        Dispatcher::new(
            RuleSet::new(rules, false),
            ActionRunner::new("/bin/sh", timeout),
        )
    }

    #[tokio::test]
    async fn test_connect_runs_matching_rules_only() {
        let d = dispatcher(
            vec![
                ActionRule::new(DeviceFilter::any().with("serial", "A"))
                    .on(EventKind::Connect, "true"),
                ActionRule::new(DeviceFilter::any().with("serial", "B"))
                    .on(EventKind::Connect, "true"),
                ActionRule::new(DeviceFilter::any()).on(EventKind::Connect, "true"),
            ],
            Duration::from_secs(5),
        );
        let report = d
            .dispatch(&DeviceEvent::Connect(record("A")), &DeviceSnapshot::empty())
            .await;
        assert_eq!(report.ran, 2);
        assert_eq!(report.succeeded, 2);
    }

    #[tokio::test]
    async fn test_stderr_on_success_is_still_success() {
        let d = dispatcher(
            vec![ActionRule::new(DeviceFilter::any())
                .on(EventKind::Connect, "echo 'warning: slow device' >&2")],
            Duration::from_secs(5),
        );
        let report = d
            .dispatch(&DeviceEvent::Connect(record("A")), &DeviceSnapshot::empty())
            .await;
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 0);
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_later_rules() {
        let d = dispatcher(
            vec![
                ActionRule::new(DeviceFilter::any()).on(EventKind::Disconnect, "exit 1"),
                ActionRule::new(DeviceFilter::any()).on(EventKind::Disconnect, "sleep 10"),
                ActionRule::new(DeviceFilter::any()).on(EventKind::Disconnect, "true"),
            ],
            Duration::from_millis(300),
        );
        let report = d
            .dispatch(
                &DeviceEvent::Disconnect(record("A").into_absent()),
                &DeviceSnapshot::empty(),
            )
            .await;
        assert_eq!(
            report,
            DispatchReport {
                ran: 3,
                succeeded: 1,
                failed: 1,
                timed_out: 1
            }
        );
    }

    #[tokio::test]
    async fn test_sleep_runs_once_per_matching_device() {
        let d = dispatcher(
            vec![ActionRule::new(DeviceFilter::any().with("serial", "B"))
                .on(EventKind::Sleep, "true")],
            Duration::from_secs(5),
        );
        let snapshot = DeviceSnapshot::from_records([record("A"), record("B")]);
        let report = d.dispatch(&DeviceEvent::Sleep, &snapshot).await;
        assert_eq!(report.ran, 1);
    }

    #[tokio::test]
    async fn test_wake_with_no_devices_runs_nothing() {
        let d = dispatcher(
            vec![ActionRule::new(DeviceFilter::any()).on(EventKind::Wake, "true")],
            Duration::from_secs(5),
        );
        let report = d.dispatch(&DeviceEvent::Wake, &DeviceSnapshot::empty()).await;
        assert_eq!(report.ran, 0);
    }

    #[tokio::test]
    async fn test_queue_handles_jobs_until_closed() {
        let d = dispatcher(
            vec![ActionRule::new(DeviceFilter::any()).on(EventKind::Connect, "true")],
            Duration::from_secs(5),
        );
        let (tx, rx) = mpsc::channel(8);
        let snapshot = Arc::new(DeviceSnapshot::empty());
        for serial in ["A", "B"] {
            tx.send(DispatchJob {
                event: DeviceEvent::Connect(record(serial)),
                snapshot: Arc::clone(&snapshot),
            })
            .await
            .unwrap();
        }
        drop(tx);
        assert_eq!(d.run_queue(rx, CancellationToken::new()).await, 2);
    }

    #[tokio::test]
    async fn test_cancelled_queue_drops_pending_jobs() {
        let d = dispatcher(Vec::new(), Duration::from_secs(5));
        let (tx, rx) = mpsc::channel(8);
        tx.send(DispatchJob {
            event: DeviceEvent::Wake,
            snapshot: Arc::new(DeviceSnapshot::empty()),
        })
        .await
        .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(d.run_queue(rx, cancel).await, 0);
    }
}
