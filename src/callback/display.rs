//! Prints a line per task result so a person can follow a run.
//!
//! The formatting logic lives in free functions that write to any [Write] implementation, so it
//! can be tested against in-memory buffers. [Display] wires them to the real stdout and stderr,
//! locking each only while a line is written.

use super::{Callback, TaskResult};
use crate::stats::Stats;
use std::io::{self, Write};

/// A [Callback] that reports results on stdout (successes) and stderr (everything that needs
/// attention).
#[derive(Clone, Debug, Default)]
pub struct Display;

impl Callback for Display {
    fn on_play_start(&mut self, name: &str) {
        log_io(_play_start(io::stdout().lock(), name));
    }

    fn on_runner_ok(&mut self, result: &TaskResult) {
        log_io(_outcome(io::stdout().lock(), "ok", result));
    }

    fn on_runner_failed(&mut self, result: &TaskResult, ignore_errors: bool) {
        let label = match ignore_errors {
            true => "failed (ignored)",
            false => "failed",
        };
        log_io(_outcome(io::stderr().lock(), label, result));
    }

    fn on_runner_skipped(&mut self, result: &TaskResult) {
        log_io(_outcome(io::stdout().lock(), "skipped", result));
    }

    fn on_runner_unreachable(&mut self, result: &TaskResult) {
        log_io(_outcome(io::stderr().lock(), "unreachable", result));
    }

    fn on_stats(&mut self, stats: &Stats) {
        log_io(_recap(io::stdout().lock(), stats));
    }
}

// A broken stdout must not abort a run.
fn log_io(result: io::Result<()>) {
    if let Err(err) = result {
        tracing::warn!(%err, "failed to write run output");
    }
}

/// Writes the header for a new play.
pub fn _play_start(mut out: impl Write, name: &str) -> io::Result<()> {
    writeln!(out, "PLAY [{name}]")
}

/// Writes one task result, with the module's message indented below it when there is one.
pub fn _outcome(mut out: impl Write, label: &str, result: &TaskResult) -> io::Result<()> {
    writeln!(out, "[{}] {label}: {}", result.host, result.task)?;
    if let Some(msg) = result.msg() {
        for line in msg.lines() {
            //             1234
            writeln!(out, "    {line}")?;
        }
    }
    Ok(())
}

/// Writes the end-of-run summary table.
pub fn _recap(mut out: impl Write, stats: &Stats) -> io::Result<()> {
    writeln!(out, "RECAP")?;
    for host in stats.processed() {
        let Some(s) = stats.host(host) else { continue };
        writeln!(
            out,
            "{host:<24} ok={} changed={} unreachable={} failed={} skipped={} rescued={} ignored={}",
            s.ok, s.changed, s.unreachable, s.failures, s.skipped, s.rescued, s.ignored,
        )?;
    }
    Ok(())
}
