//! The seam between this crate and the automation engine that does the real work.
//!
//! An [Engine] hands out a [RunController] per run. The controller executes a [Script] and
//! reports what happens as [Event]s on a channel; the [Runner](crate::runner::Runner) relays those
//! events to observers and turns the final [Stats] into a summary. Nothing in this module knows
//! how hosts are contacted; that is entirely the engine's business.
//!
//! [AnsibleCli] is the production engine. Tests substitute their own implementations.

pub mod ansible;

use crate::callback::Event;
use crate::inventory::Inventory;
use crate::loader::Loader;
use crate::options::{Passwords, RunOptions};
use crate::play::Play;
use crate::stats::Stats;
use crate::vars::VariableManager;
use crossbeam::channel::Sender;
use std::path::PathBuf;

#[doc(inline)]
pub use ansible::AnsibleCli;

/// What a controller should execute.
#[derive(Clone, Debug, PartialEq)]
pub enum Script {
    /// A playbook file on disk.
    Playbook(PathBuf),

    /// A play built in memory.
    Play(Play),
}

/// Everything a controller needs to know about a run besides the script itself.
#[derive(Clone, Debug)]
pub struct RunContext {
    pub options: RunOptions,
    pub passwords: Passwords,
    pub inventory: Inventory,
    pub variables: VariableManager,
}

/// An automation engine.
pub trait Engine {
    type Controller: RunController;

    /// Prepares a controller for one run.
    fn controller(&self, context: RunContext) -> anyhow::Result<Self::Controller>;

    /// Returns the engine's version string, e.g. `2.15.3`.
    fn version(&self) -> anyhow::Result<String>;
}

/// Executes one run on behalf of an [Engine].
///
/// A controller runs on a worker thread, so it must be [Send].
pub trait RunController: Send {
    /// Executes `script` and blocks until the engine is done.
    ///
    /// Events are sent on `events` in the order they happen. The final [Event::Stats] is sent by
    /// the caller, not the controller. Any temporary files the controller needs must be created
    /// through `loader` so the caller can remove them.
    ///
    /// Host-level problems (unreachable hosts, failed tasks) are reported through events and
    /// [Stats], not as errors. An error means the engine itself could not do its job.
    fn run(
        &mut self,
        script: &Script,
        loader: &mut Loader,
        events: &Sender<Event>,
    ) -> anyhow::Result<Stats>;

    /// Releases the controller's resources, e.g. stops an engine process that is still running.
    ///
    /// Called exactly once after every run, whether or not [RunController::run] succeeded.
    fn cleanup(&mut self);
}
