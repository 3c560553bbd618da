//! playrun - run Ansible playbooks and modules and print a JSON summary.
//!
//! Usage:
//!   playrun playbook <file>        Run a playbook
//!   playrun module [pattern]       Run a single module (ping by default)
//!   playrun encrypt [value]        Encrypt a value with the configured vault password
//!   playrun decrypt [value]        Decrypt a vault value
//!   playrun version                Print the engine version

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use playrun::callback::Display;
use playrun::{ModuleRequest, Overrides, RunSummary, Runner};
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter, e.g. `playrun=debug`.
const LOG_ENV: &str = "PLAYRUN_LOG";

#[derive(Parser)]
#[command(name = "playrun")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a playbook
    Playbook {
        /// Path to the playbook file
        #[arg(value_name = "PLAYBOOK")]
        playbook: PathBuf,

        #[command(flatten)]
        run: RunArgs,

        /// Only run tasks with these tags (comma separated)
        #[arg(short, long)]
        tags: Option<String>,

        /// Skip tasks with these tags (comma separated)
        #[arg(long)]
        skip_tags: Option<String>,
    },

    /// Run a single module against a host pattern
    Module {
        /// Host pattern to target
        #[arg(value_name = "PATTERN", default_value = "all")]
        pattern: String,

        /// Module name
        #[arg(short, long, default_value = "ping")]
        module_name: String,

        /// Module arguments in key=value form
        #[arg(short = 'a', long)]
        args: Option<String>,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Encrypt a value with the configured vault password (reads stdin when no value is given)
    Encrypt { value: Option<String> },

    /// Decrypt a vault value (reads stdin when no value is given)
    Decrypt { value: Option<String> },

    /// Print the engine version
    Version,
}

/// Options shared by playbook and module runs.
#[derive(Args)]
struct RunArgs {
    /// Inventory file, directory or comma-separated host list
    #[arg(short, long)]
    inventory: Option<String>,

    /// Further limit the hosts to this pattern
    #[arg(short, long)]
    limit: Option<String>,

    /// Extra variables as key=value or @file (repeatable)
    #[arg(short, long = "extra-vars")]
    extra_vars: Vec<String>,

    /// Number of parallel processes
    #[arg(short, long)]
    forks: Option<u32>,

    /// Connection timeout in seconds
    #[arg(short = 'T', long)]
    timeout: Option<u32>,

    /// Don't make any changes
    #[arg(short = 'C', long)]
    check: bool,

    /// Show differences in changed files
    #[arg(short = 'D', long)]
    diff: bool,

    /// Run operations with privilege escalation
    #[arg(short = 'b', long = "become")]
    r#become: bool,

    /// Engine verbosity (repeatable)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Print each task result as it arrives
    #[arg(long)]
    show: bool,
}

impl RunArgs {
    fn overrides(&self) -> Overrides {
        let mut overrides = Overrides::new();
        if let Some(ref limit) = self.limit {
            overrides.insert("subset", limit.as_str());
        }
        if !self.extra_vars.is_empty() {
            let vars: Vec<serde_yaml::Value> = self
                .extra_vars
                .iter()
                .map(|v| serde_yaml::Value::from(v.as_str()))
                .collect();
            overrides.insert("extra_vars", vars);
        }
        if let Some(forks) = self.forks {
            overrides.insert("forks", forks);
        }
        if let Some(timeout) = self.timeout {
            overrides.insert("timeout", timeout);
        }
        if self.check {
            overrides.insert("check", true);
        }
        if self.diff {
            overrides.insert("diff", true);
        }
        if self.r#become {
            overrides.insert("become", true);
        }
        if self.verbose > 0 {
            overrides.insert("verbosity", u64::from(self.verbose));
        }
        overrides
    }

    fn runner(&self) -> anyhow::Result<Runner> {
        let mut runner = Runner::new(self.inventory.as_deref(), Overrides::new())?;
        if self.show {
            runner.add_callback(Display);
        }
        Ok(runner)
    }
}

fn main() -> ExitCode {
    if let Err(err) = init_logging() {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    match run(Cli::parse()) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr so stdout stays machine-readable.
fn init_logging() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new("warn"))
        .context("failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .compact()
        .init();
    Ok(())
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    match cli.command {
        Commands::Playbook {
            playbook,
            run,
            tags,
            skip_tags,
        } => {
            let mut overrides = run.overrides();
            if let Some(tags) = tags {
                overrides.insert("tags", tags);
            }
            if let Some(skip_tags) = skip_tags {
                overrides.insert("skip_tags", skip_tags);
            }
            let summary = run.runner()?.run_playbook(&playbook, None, &overrides)?;
            report(&summary)
        }
        Commands::Module {
            pattern,
            module_name,
            args,
            run,
        } => {
            let mut request = ModuleRequest::new(module_name).hosts(pattern);
            request.module_args = args;
            let summary = run.runner()?.run_module(&request, &run.overrides())?;
            report(&summary)
        }
        Commands::Encrypt { value } => {
            let value = value_or_stdin(value)?;
            print!("{}", playrun::vault_encrypt(&value)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Decrypt { value } => {
            let value = value_or_stdin(value)?;
            match playrun::vault_decrypt(&value) {
                Some(plaintext) => {
                    println!("{plaintext}");
                    Ok(ExitCode::SUCCESS)
                }
                None => bail!("decryption failed"),
            }
        }
        Commands::Version => {
            println!("{}", playrun::engine_version()?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn report(summary: &RunSummary) -> anyhow::Result<ExitCode> {
    println!("{}", serde_json::to_string_pretty(summary)?);
    Ok(match summary.is_success() {
        true => ExitCode::SUCCESS,
        false => ExitCode::from(2),
    })
}

fn value_or_stdin(value: Option<String>) -> anyhow::Result<String> {
    match value {
        Some(value) => Ok(value),
        None => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("failed to read stdin")?;
            Ok(buffer.trim_end_matches('\n').to_string())
        }
    }
}
