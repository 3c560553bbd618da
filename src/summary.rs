//! Flattens a run's statistics and failures into a [RunSummary].

use crate::callback::TaskResult;
use crate::stats::Stats;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Write;

/// The outcome of a run in plain terms.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct RunSummary {
    /// Human-readable description of everything that went wrong. Empty on full success.
    pub error_msg: String,

    /// Hosts that could not be reached, sorted.
    pub unreachable_hosts: Vec<String>,

    /// Hosts with at least one failed task, sorted.
    pub failed_hosts: Vec<String>,

    /// Names of the tasks that failed, one per failure, in the order they failed.
    pub failed_tasks: Vec<String>,
}

impl RunSummary {
    /// Whether every host was reached and no task failed.
    pub fn is_success(&self) -> bool {
        self.unreachable_hosts.is_empty() && self.failed_hosts.is_empty()
    }
}

/// Builds a [RunSummary] from a run's [Stats] and its non-ignored failures.
pub fn summarize(stats: &Stats, failed_results: &[TaskResult]) -> RunSummary {
    let unreachable_hosts = stats.dark();
    let failed_hosts = stats.failures();
    let mut error_msg = String::new();
    let mut failed_tasks = Vec::with_capacity(failed_results.len());

    // Writing to a String cannot fail.
    if !unreachable_hosts.is_empty() {
        let hosts: Vec<String> = unreachable_hosts.iter().map(|h| format!("'{h}'")).collect();
        let _ = writeln!(
            error_msg,
            "Following nodes were unreachable: [{}]",
            hosts.join(", ")
        );
    }
    for result in failed_results {
        let (task, msg, host) = process_task_result(result);
        let _ = writeln!(
            error_msg,
            "Task \"{task}\" failed on host \"{host}\" with message: {msg}"
        );
        failed_tasks.push(task.to_string());
    }

    RunSummary {
        error_msg,
        unreachable_hosts,
        failed_hosts,
        failed_tasks,
    }
}

/// Returns the task name, best-effort error message and host name of a failed result.
///
/// The message is the result's `msg`. Loop tasks report a `results` list instead; their message
/// is the `msg` of every sub-result that has one, joined with spaces.
pub fn process_task_result(result: &TaskResult) -> (&str, String, &str) {
    let msg = match result.result.get("msg") {
        Some(msg) => render(msg),
        None => result
            .result
            .get("results")
            .and_then(Value::as_array)
            .map(|results| {
                results
                    .iter()
                    .filter_map(|sub| sub.get("msg"))
                    .map(render)
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .unwrap_or_default(),
    };
    (&result.task, msg, &result.host)
}

// Messages are usually strings, but modules may return any JSON value.
fn render(msg: &Value) -> String {
    match msg {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
