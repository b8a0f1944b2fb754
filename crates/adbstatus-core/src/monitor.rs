//! The monitor loop.
//!
//! [`Monitor::run`] drives `Starting → Running → Stopping → Stopped`. While
//! running, three tasks make progress independently:
//!
//! - the poll task captures a snapshot every interval, diffs it against the
//!   previous one, publishes it and queues the resulting events;
//! - the power task waits on the sleep/wake source and queues its events with
//!   the snapshot current at that moment;
//! - the dispatcher task runs queued jobs one at a time.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::action::ActionRunner;
use crate::bridge::DeviceSource;
use crate::config::Config;
use crate::device::{DeviceEvent, DeviceSnapshot};
use crate::dispatch::{DispatchJob, Dispatcher};
use crate::error::AdbStatusError;
use crate::rules::RuleSet;
use crate::sleep::SleepWatcher;
use crate::state::{MonitorPhase, MonitorState, StateHandle};
use crate::tracker::DeviceTracker;

/// Timing knobs for [`Monitor`].
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    /// Time between polls.
    pub check_interval: Duration,
    /// How long poll and power tasks get to stop.
    pub shutdown_grace: Duration,
    /// Capacity of the dispatch queue.
    pub queue_capacity: usize,
    /// Fire Connect for devices present at startup.
    pub connect_on_startup: bool,
}

impl From<&Config> for MonitorSettings {
    fn from(config: &Config) -> Self {
        Self {
            check_interval: config.monitor.check_interval(),
            shutdown_grace: config.monitor.shutdown_grace(),
            queue_capacity: config.monitor.queue_capacity,
            connect_on_startup: config.monitor.connect_on_startup,
        }
    }
}

/// Ties a device source, the dispatcher and an optional sleep/wake source together.
pub struct Monitor<S> {
    source: S,
    dispatcher: Dispatcher,
    settings: MonitorSettings,
    state: Arc<MonitorState>,
    power: Option<SleepWatcher>,
}

impl<S: DeviceSource> Monitor<S> {
    /// Creates a monitor without a sleep/wake source.
    #[must_use]
    pub fn new(source: S, dispatcher: Dispatcher, settings: MonitorSettings) -> Self {
        Self {
            source,
            dispatcher,
            settings,
            state: Arc::new(MonitorState::new()),
            power: None,
        }
    }

    /// Creates a monitor with rules and action settings taken from `config`.
    #[must_use]
    pub fn from_config(config: &Config, source: S) -> Self {
        let rules = RuleSet::new(config.rules.clone(), config.monitor.unique_scripts);
        let runner = ActionRunner::new(&config.monitor.shell, config.monitor.action_timeout());
        Self::new(source, Dispatcher::new(rules, runner), MonitorSettings::from(config))
    }

    /// Adds a sleep/wake source.
    #[must_use]
    pub fn with_power_source(mut self, watcher: SleepWatcher) -> Self {
        self.power = Some(watcher);
        self
    }

    /// A read-only view of the state this monitor publishes.
    #[must_use]
    pub fn handle(&self) -> StateHandle {
        self.state.handle()
    }

    /// Runs until `cancel` fires, then drains and returns.
    pub async fn run(self, cancel: CancellationToken) {
        let Self {
            source,
            dispatcher,
            settings,
            state,
            power,
        } = self;

        state.set_phase(MonitorPhase::Starting);
        info!(
            interval_secs = settings.check_interval.as_secs_f64(),
            sleep_wake = power.is_some(),
            "monitor starting"
        );

        let (jobs, queue) = mpsc::channel(settings.queue_capacity.max(1));
        let dispatch_task = tokio::spawn(dispatcher.run_queue(queue, cancel.clone()));

        let mut tracker = DeviceTracker::new(settings.connect_on_startup);
        tokio::select! {
            () = cancel.cancelled() => {}
            () = poll_once(&source, &mut tracker, &state, &jobs, &cancel) => {}
        }
        if !tracker.is_seeded() {
            warn!("initial device capture failed; will seed on the next successful poll");
        }

        state.set_phase(MonitorPhase::Running);
        info!(devices = state.snapshot().len(), "monitor running");

        let poll_task = tokio::spawn(poll_loop(
            source,
            tracker,
            Arc::clone(&state),
            jobs.clone(),
            settings.check_interval,
            cancel.clone(),
        ));
        let power_task = power.map(|watcher| {
            tokio::spawn(power_loop(
                watcher,
                Arc::clone(&state),
                jobs.clone(),
                cancel.clone(),
            ))
        });
        drop(jobs);

        cancel.cancelled().await;
        state.set_phase(MonitorPhase::Stopping);
        info!("monitor stopping");

        join_within(settings.shutdown_grace, poll_task, "poll").await;
        if let Some(task) = power_task {
            join_within(settings.shutdown_grace, task, "power").await;
        }
        match dispatch_task.await {
            Ok(handled) => debug!(handled, "dispatcher stopped"),
            Err(e) => warn!(error = %e, "dispatcher ended abnormally"),
        }

        state.set_phase(MonitorPhase::Stopped);
        info!("monitor stopped");
    }
}

/// Captures once, publishes the snapshot and queues any events.
async fn poll_once<S: DeviceSource>(
    source: &S,
    tracker: &mut DeviceTracker,
    state: &MonitorState,
    jobs: &mpsc::Sender<DispatchJob>,
    cancel: &CancellationToken,
) {
    let snapshot = match source.capture().await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            let err = AdbStatusError::from(e);
            warn!(error_code = err.error_code(), error = %err, "device poll failed; skipping cycle");
            return;
        }
    };

    let events = tracker.update(snapshot);
    let current = tracker.current();
    state.publish(Arc::clone(&current));

    for event in events {
        log_event(&event);
        let job = DispatchJob {
            event,
            snapshot: Arc::clone(&current),
        };
        if !enqueue(jobs, job, cancel).await {
            return;
        }
    }
}

async fn poll_loop<S: DeviceSource>(
    source: S,
    mut tracker: DeviceTracker,
    state: Arc<MonitorState>,
    jobs: mpsc::Sender<DispatchJob>,
    every: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        tokio::select! {
            () = cancel.cancelled() => break,
            () = poll_once(&source, &mut tracker, &state, &jobs, &cancel) => {}
        }
    }
    debug!("poll task stopped");
}

async fn power_loop(
    mut watcher: SleepWatcher,
    state: Arc<MonitorState>,
    jobs: mpsc::Sender<DispatchJob>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => break,
            event = watcher.next_event() => event,
        };
        let Some(event) = event else {
            warn!("sleep/wake source closed");
            break;
        };
        state.record_power(event);
        let job = DispatchJob {
            event: DeviceEvent::from(event),
            snapshot: state.snapshot(),
        };
        if !enqueue(&jobs, job, &cancel).await {
            break;
        }
    }
    watcher.shutdown().await;
    debug!("power task stopped");
}

async fn enqueue(
    jobs: &mpsc::Sender<DispatchJob>,
    job: DispatchJob,
    cancel: &CancellationToken,
) -> bool {
    tokio::select! {
        () = cancel.cancelled() => false,
        sent = jobs.send(job) => sent.is_ok(),
    }
}

fn log_event(event: &DeviceEvent) {
    match event {
        DeviceEvent::Connect(device) => {
            info!(serial = %device.serial, state = %device.state, "device connected");
        }
        DeviceEvent::Disconnect(device) => info!(serial = %device.serial, "device disconnected"),
        DeviceEvent::Sleep | DeviceEvent::Wake => {}
    }
}

async fn join_within(grace: Duration, task: JoinHandle<()>, name: &str) {
    let abort = task.abort_handle();
    match tokio::time::timeout(grace, task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(task = name, error = %e, "task ended abnormally"),
        Err(_) => {
            warn!(task = name, "task did not stop within grace period; aborting");
            abort.abort();
        }
    }
}

/// A source that always reports the same snapshot. Useful when no bridge is
/// wanted, for example in API tests.
#[derive(Debug, Clone, Default)]
pub struct FixedSource(pub DeviceSnapshot);

impl DeviceSource for FixedSource {
    async fn capture(&self) -> crate::bridge::BridgeResult<DeviceSnapshot> {
        Ok(self.0.clone())
    }
}
