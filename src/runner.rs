//! The public entry points: run a playbook, or run a single module, and get a [RunSummary].
//!
//! A [Runner] owns the engine binding, the runner-wide options and the registered observers. Each
//! run resolves its options, hands them to a fresh [RunController], relays the controller's
//! events to the observers and flattens the final statistics with [summarize].

use crate::callback::{Callback, Event, FailureCollector};
use crate::config::{self, EngineDefaults};
use crate::engine::{AnsibleCli, Engine, RunContext, RunController, Script};
use crate::error::{Error, Result};
use crate::inventory::Inventory;
use crate::loader::Loader;
use crate::options::{self, Overrides, Passwords};
use crate::parsing;
use crate::play::Play;
use crate::stats::Stats;
use crate::summary::{summarize, RunSummary};
use crate::vars::{self, VariableManager};
use anyhow::anyhow;
use crossbeam::channel;
use std::path::{Path, PathBuf};
use std::thread;

/// What to run in [Runner::run_module].
#[derive(Clone, Debug, PartialEq)]
pub struct ModuleRequest {
    pub module_name: String,

    /// Arguments in `key=value` form. When `None` or empty, the engine's configured default module
    /// arguments are used.
    pub module_args: Option<String>,

    /// Host pattern the module runs against.
    pub hosts: String,

    /// Inventory source; the runner's inventory when `None`.
    pub inventory_file: Option<String>,
}

impl Default for ModuleRequest {
    fn default() -> Self {
        Self {
            module_name: "ping".to_string(),
            module_args: None,
            hosts: "all".to_string(),
            inventory_file: None,
        }
    }
}

impl ModuleRequest {
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            ..Self::default()
        }
    }

    pub fn args(mut self, module_args: impl Into<String>) -> Self {
        self.module_args = Some(module_args.into());
        self
    }

    pub fn hosts(mut self, hosts: impl Into<String>) -> Self {
        self.hosts = hosts.into();
        self
    }

    pub fn inventory(mut self, inventory_file: impl Into<String>) -> Self {
        self.inventory_file = Some(inventory_file.into());
        self
    }
}

/// Runs playbooks and modules through an [Engine].
pub struct Runner<E: Engine = AnsibleCli> {
    inventory_file: Option<String>,
    custom_opts: Overrides,
    callbacks: Vec<Box<dyn Callback>>,
    config_file: PathBuf,
    defaults: EngineDefaults,
    engine: E,
}

impl Runner {
    /// Creates a runner backed by the `ansible-playbook` found on `PATH`.
    ///
    /// `inventory_file` is used by every run that does not name its own inventory, and
    /// `custom_opts` apply to every run unless a call overrides them.
    pub fn new(inventory_file: Option<&str>, custom_opts: Overrides) -> Result<Self> {
        Self::with_engine(AnsibleCli::default(), inventory_file, custom_opts)
    }
}

impl<E: Engine> Runner<E> {
    pub fn with_engine(
        engine: E,
        inventory_file: Option<&str>,
        custom_opts: Overrides,
    ) -> Result<Self> {
        let config_file = PathBuf::from(config::ANSIBLE_CFG);
        Ok(Self {
            inventory_file: inventory_file.map(str::to_string),
            custom_opts,
            callbacks: Vec::new(),
            defaults: EngineDefaults::load_from(&config_file)?,
            config_file,
            engine,
        })
    }

    /// Reads engine defaults from `path` instead of the system-wide configuration file.
    pub fn with_config_file(mut self, path: impl Into<PathBuf>) -> Result<Self> {
        self.config_file = path.into();
        self.reset_defaults()?;
        Ok(self)
    }

    pub fn inventory_file(&self) -> Option<&str> {
        self.inventory_file.as_deref()
    }

    pub fn custom_opts(&self) -> &Overrides {
        &self.custom_opts
    }

    pub fn defaults(&self) -> &EngineDefaults {
        &self.defaults
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Registers an observer for every later run. Observers are called in registration order.
    pub fn add_callback(&mut self, callback: impl Callback + 'static) {
        self.callbacks.push(Box::new(callback));
    }

    /// Re-reads the engine defaults, picking up configuration changes made since the last run.
    pub fn reset_defaults(&mut self) -> Result<()> {
        self.defaults = EngineDefaults::load_from(&self.config_file)?;
        Ok(())
    }

    /// The engine's version string.
    pub fn engine_version(&self) -> Result<String> {
        Ok(self.engine.version()?)
    }

    /// Runs the playbook at `playbook` and summarizes the outcome.
    ///
    /// Unreachable hosts and failed tasks are reported in the summary, not as errors.
    ///
    /// # Errors
    ///
    /// - [Error::FileNotFound] if `playbook` is not an existing file. The engine is not touched.
    /// - [Error::InvalidParameter] if an option has a value of the wrong type.
    /// - [Error::Engine] if the engine could not be run or its output could not be read.
    pub fn run_playbook(
        &mut self,
        playbook: impl AsRef<Path>,
        inventory_file: Option<&str>,
        overrides: &Overrides,
    ) -> Result<RunSummary> {
        self.reset_defaults()?;

        let playbook = playbook.as_ref();
        if !playbook.is_file() {
            return Err(Error::FileNotFound {
                name: playbook.display().to_string(),
            });
        }

        let inventory_file = inventory_file
            .map(str::to_string)
            .or_else(|| self.inventory_file.clone());
        tracing::debug!(inventory = ?inventory_file, "running with inventory");
        tracing::debug!(playbook = %playbook.display(), "running with playbook");

        let mut collector = FailureCollector::new();
        let stats = self.run_script(
            &Script::Playbook(playbook.to_path_buf()),
            inventory_file.as_deref(),
            overrides,
            Some(&mut collector),
        )?;
        Ok(summarize(&stats, collector.failed_results()))
    }

    /// Runs a single module against a host pattern and summarizes the outcome.
    ///
    /// Failed tasks are not itemized: the summary's `failed_tasks` is always empty, while
    /// `failed_hosts` and `unreachable_hosts` are filled in as usual.
    ///
    /// # Errors
    ///
    /// - [Error::InvalidParameter] if an option has a value of the wrong type.
    /// - [Error::Engine] if the engine could not be run or its output could not be read.
    pub fn run_module(
        &mut self,
        request: &ModuleRequest,
        overrides: &Overrides,
    ) -> Result<RunSummary> {
        let check_raw = parsing::is_raw_module(&request.module_name);
        let module_args = match request.module_args.as_deref() {
            Some(args) if !args.trim().is_empty() => parsing::parse_kv(args, check_raw),
            _ => parsing::parse_kv(&self.defaults.module_args, check_raw),
        };
        let play = Play::for_module(
            &request.hosts,
            &request.module_name,
            module_args,
            self.defaults.poll_interval,
        );

        let inventory_file = request
            .inventory_file
            .clone()
            .or_else(|| self.inventory_file.clone());
        tracing::debug!(
            module = %request.module_name,
            hosts = %request.hosts,
            inventory = ?inventory_file,
            "running module",
        );

        let script = Script::Play(play);
        let stats = self.run_script(&script, inventory_file.as_deref(), overrides, None)?;
        Ok(summarize(&stats, &[]))
    }

    /// Runs `script` with temporary files that are removed again whatever the outcome.
    fn run_script(
        &mut self,
        script: &Script,
        inventory_file: Option<&str>,
        overrides: &Overrides,
        collector: Option<&mut FailureCollector>,
    ) -> Result<Stats> {
        let mut loader = Loader::new();
        let outcome =
            self.run_with_loader(script, inventory_file, overrides, collector, &mut loader);
        loader.cleanup_all_tmp_files();
        outcome
    }

    fn run_with_loader(
        &mut self,
        script: &Script,
        inventory_file: Option<&str>,
        overrides: &Overrides,
        collector: Option<&mut FailureCollector>,
        loader: &mut Loader,
    ) -> Result<Stats> {
        let context = self.prepare(inventory_file, overrides, loader)?;
        let mut controller = self.engine.controller(context)?;
        tracing::info!("run started");

        let mut observers: Vec<&mut dyn Callback> = self
            .callbacks
            .iter_mut()
            .map(|c| c.as_mut() as &mut dyn Callback)
            .collect();
        if let Some(collector) = collector {
            observers.push(collector);
        }

        let outcome = execute(&mut controller, script, loader, &mut observers);
        controller.cleanup();

        let stats = outcome?;
        tracing::info!(
            unreachable = stats.dark().len(),
            failed = stats.failures().len(),
            "run finished",
        );
        Ok(stats)
    }

    /// Resolves everything a controller needs for one run.
    fn prepare(
        &self,
        inventory_file: Option<&str>,
        overrides: &Overrides,
        loader: &Loader,
    ) -> Result<RunContext> {
        let options = options::build(inventory_file, &self.defaults, &self.custom_opts, overrides)?;
        let passwords = Passwords::from_overrides(overrides)?;

        let mut inventory = Inventory::new(options.inventory.as_deref());
        let variables = VariableManager {
            extra_vars: vars::load_extra_vars(loader, &options)?,
        };
        inventory.subset(options.subset.as_deref());

        Ok(RunContext {
            options,
            passwords,
            inventory,
            variables,
        })
    }
}

/// Runs `controller` on a worker thread and dispatches its events to `observers` on this thread.
/// [Event::Stats] is dispatched last, once the controller has succeeded.
fn execute<C: RunController>(
    controller: &mut C,
    script: &Script,
    loader: &mut Loader,
    observers: &mut [&mut dyn Callback],
) -> anyhow::Result<Stats> {
    let (sender, receiver) = channel::unbounded();

    let result = thread::scope(|scope| {
        let worker = scope.spawn(move || controller.run(script, loader, &sender));

        // Ends once the worker drops its sender.
        for event in receiver.iter() {
            dispatch(observers, &event);
        }
        worker.join()
    });

    let stats = result.map_err(|_| anyhow!("engine controller panicked"))??;
    dispatch(observers, &Event::Stats(stats.clone()));
    Ok(stats)
}

fn dispatch(observers: &mut [&mut dyn Callback], event: &Event) {
    for observer in observers.iter_mut() {
        event.dispatch(&mut **observer);
    }
}

/// The version of the `ansible` found on `PATH`.
pub fn engine_version() -> Result<String> {
    Ok(AnsibleCli::default().version()?)
}
