//! Observers that are notified of run events.
//!
//! The engine never calls observers directly. Its controller sends [Event]s down a channel while
//! it runs, and the [Runner](crate::runner::Runner) hands each event to every registered
//! [Callback] in turn, on the caller's thread. Callbacks therefore run one at a time, in event
//! order, and need not be [Send].

pub mod display;

use crate::stats::Stats;
use serde_json::Value;
use std::sync::{Arc, Mutex};

#[doc(inline)]
pub use display::Display;

/// The outcome of one task on one host, as reported by the engine.
#[derive(Clone, Debug, PartialEq)]
pub struct TaskResult {
    /// The host the task ran on.
    pub host: String,

    /// The task's display name.
    pub task: String,

    /// The raw result mapping the module returned (`msg`, `rc`, `results`, and so on).
    pub result: Value,
}

impl TaskResult {
    pub fn new(host: impl Into<String>, task: impl Into<String>, result: Value) -> Self {
        Self {
            host: host.into(),
            task: task.into(),
            result,
        }
    }

    /// The result's top-level `msg`, if it has a string one.
    pub fn msg(&self) -> Option<&str> {
        self.result.get("msg").and_then(Value::as_str)
    }
}

/// Run lifecycle and per-task events.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    PlaybookStart { playbook: String },
    PlayStart { name: String },
    TaskStart { name: String },
    RunnerOk(TaskResult),
    RunnerFailed {
        result: TaskResult,

        /// Whether the task was marked to have its failures ignored.
        ignore_errors: bool,
    },
    RunnerSkipped(TaskResult),
    RunnerUnreachable(TaskResult),
    Stats(Stats),
}

impl Event {
    /// Calls the [Callback] method that corresponds to this event.
    pub fn dispatch(&self, callback: &mut dyn Callback) {
        match self {
            Event::PlaybookStart { playbook } => callback.on_playbook_start(playbook),
            Event::PlayStart { name } => callback.on_play_start(name),
            Event::TaskStart { name } => callback.on_task_start(name),
            Event::RunnerOk(result) => callback.on_runner_ok(result),
            Event::RunnerFailed {
                result,
                ignore_errors,
            } => callback.on_runner_failed(result, *ignore_errors),
            Event::RunnerSkipped(result) => callback.on_runner_skipped(result),
            Event::RunnerUnreachable(result) => callback.on_runner_unreachable(result),
            Event::Stats(stats) => callback.on_stats(stats),
        }
    }
}

/// A run observer. Every method defaults to doing nothing; implement the ones you need.
#[allow(unused_variables)]
pub trait Callback {
    fn on_playbook_start(&mut self, playbook: &str) {}

    fn on_play_start(&mut self, name: &str) {}

    fn on_task_start(&mut self, name: &str) {}

    fn on_runner_ok(&mut self, result: &TaskResult) {}

    /// A task failed. `ignore_errors` is set when the task's failures were marked ignorable.
    fn on_runner_failed(&mut self, result: &TaskResult, ignore_errors: bool) {}

    fn on_runner_skipped(&mut self, result: &TaskResult) {}

    fn on_runner_unreachable(&mut self, result: &TaskResult) {}

    /// The run is over. Always the last event.
    fn on_stats(&mut self, stats: &Stats) {}
}

/// Collects every failure that was not marked ignorable, in the order they happened.
#[derive(Debug, Default)]
pub struct FailureCollector {
    failed_results: Vec<TaskResult>,
}

impl FailureCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failed_results(&self) -> &[TaskResult] {
        &self.failed_results
    }

    pub fn into_failed_results(self) -> Vec<TaskResult> {
        self.failed_results
    }
}

impl Callback for FailureCollector {
    fn on_runner_failed(&mut self, result: &TaskResult, ignore_errors: bool) {
        // Only failures that count are collected.
        if ignore_errors {
            return;
        }
        self.failed_results.push(result.clone());
    }
}

/// How far along a run is.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Progress {
    /// Name of the task that started most recently.
    pub current_task: Option<String>,

    /// Tasks started so far.
    pub tasks_started: usize,

    /// Per-host results received so far, of any outcome.
    pub results: usize,

    /// Whether the run has finished.
    pub finished: bool,
}

/// Tracks [Progress] for observers on other threads.
///
/// Clone the handle returned by [ProgressTracker::new] and read it with
/// [ProgressHandle::progress] while the run is in flight.
#[derive(Debug)]
pub struct ProgressTracker {
    progress: Arc<Mutex<Progress>>,
}

/// A shared, read-only view of a [ProgressTracker].
#[derive(Clone, Debug)]
pub struct ProgressHandle {
    progress: Arc<Mutex<Progress>>,
}

impl ProgressTracker {
    pub fn new() -> (Self, ProgressHandle) {
        let progress = Arc::new(Mutex::new(Progress::default()));
        let handle = ProgressHandle {
            progress: progress.clone(),
        };
        (Self { progress }, handle)
    }

    fn update(&self, f: impl FnOnce(&mut Progress)) {
        // A poisoned lock only means a reader panicked; the data is still usable.
        let mut progress = match self.progress.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut progress);
    }
}

impl ProgressHandle {
    /// Returns a snapshot of the current progress.
    pub fn progress(&self) -> Progress {
        match self.progress.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Callback for ProgressTracker {
    fn on_task_start(&mut self, name: &str) {
        self.update(|p| {
            p.current_task = Some(name.to_string());
            p.tasks_started += 1;
        });
    }

    fn on_runner_ok(&mut self, _: &TaskResult) {
        self.update(|p| p.results += 1);
    }

    fn on_runner_failed(&mut self, _: &TaskResult, _: bool) {
        self.update(|p| p.results += 1);
    }

    fn on_runner_skipped(&mut self, _: &TaskResult) {
        self.update(|p| p.results += 1);
    }

    fn on_runner_unreachable(&mut self, _: &TaskResult) {
        self.update(|p| p.results += 1);
    }

    fn on_stats(&mut self, _: &Stats) {
        self.update(|p| p.finished = true);
    }
}
