//! Drives the Ansible command-line tools as child processes.
//!
//! Runs go through `ansible-playbook` with a stdout callback plugin that ships with this crate
//! ([CALLBACK_PLUGIN]). The plugin is written to the run's temporary directory and selected
//! through `ANSIBLE_CALLBACK_PLUGINS` and `ANSIBLE_STDOUT_CALLBACK`, so it works with a bare
//! `ansible-core` install. It prints one JSON [EngineRecord] per line as the run progresses;
//! [AnsibleController] forwards each one as an [Event] while the engine is still running.
//!
//! Failure records carry the engine's own `ignore_errors` verdict, so failures ignored inside
//! roles, included files or templated conditions are reported exactly as the engine saw them.

use super::{Engine, RunContext, RunController, Script};
use crate::callback::{Event, TaskResult};
use crate::loader::Loader;
use crate::stats::Stats;
use anyhow::{anyhow, bail, Context};
use crossbeam::channel::Sender;
use indexmap::IndexMap;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use shlex::Quoter;
use std::ffi::OsString;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::OnceLock;
use std::thread;

/// Name of the stdout callback plugin in [CALLBACK_PLUGIN].
pub const CALLBACK_NAME: &str = "playrun_events";

/// Source of the stdout callback plugin that reports run events as JSON lines.
pub const CALLBACK_PLUGIN: &str = include_str!("ansible/playrun_events.py");

/// Environment that every engine process gets.
const ENGINE_ENV: &[(&str, &str)] = &[
    ("ANSIBLE_RETRY_FILES_ENABLED", "False"),
    ("ANSIBLE_NOCOLOR", "1"),
];

/// The production [Engine]: the `ansible-playbook` and `ansible` executables.
///
/// Any `ansible-core` release with Python callback plugin support works; no collections are
/// needed.
#[derive(Clone, Debug)]
pub struct AnsibleCli {
    playbook_bin: PathBuf,
    ansible_bin: PathBuf,
}

impl Default for AnsibleCli {
    /// Uses the executables found on `PATH`.
    fn default() -> Self {
        Self {
            playbook_bin: "ansible-playbook".into(),
            ansible_bin: "ansible".into(),
        }
    }
}

impl AnsibleCli {
    /// Uses specific executables, e.g. from a virtual environment.
    pub fn with_binaries(
        playbook_bin: impl Into<PathBuf>,
        ansible_bin: impl Into<PathBuf>,
    ) -> Self {
        Self {
            playbook_bin: playbook_bin.into(),
            ansible_bin: ansible_bin.into(),
        }
    }
}

impl Engine for AnsibleCli {
    type Controller = AnsibleController;

    fn controller(&self, context: RunContext) -> anyhow::Result<AnsibleController> {
        if context.options.become_ask_pass && context.passwords.become_pass.is_none() {
            tracing::warn!("become_ask_pass is set, but runs cannot prompt; pass become_pass");
        }
        Ok(AnsibleController {
            bin: self.playbook_bin.clone(),
            context,
            child: None,
        })
    }

    fn version(&self) -> anyhow::Result<String> {
        let output = Command::new(&self.ansible_bin)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("failed to run {}", self.ansible_bin.display()))?;
        if !output.status.success() {
            bail!(
                "{} --version exited with {}:\n{}",
                self.ansible_bin.display(),
                exit_description(output.status),
                String::from_utf8_lossy(&output.stderr),
            );
        }
        parse_version(&String::from_utf8_lossy(&output.stdout))
            .ok_or_else(|| anyhow!("could not find a version in `ansible --version` output"))
    }
}

/// Extracts the version from the first line of `ansible --version`.
///
/// Handles both `ansible 2.9.27` and `ansible [core 2.15.3]`.
pub fn parse_version(output: &str) -> Option<String> {
    static VERSION: OnceLock<Option<Regex>> = OnceLock::new();
    let regex = VERSION
        .get_or_init(|| Regex::new(r"^ansible(?:-\w+)?\s+(?:\[core\s+)?([0-9][^\s\]]*)").ok())
        .as_ref()?;
    let first_line = output.lines().next()?;
    regex
        .captures(first_line.trim())
        .map(|captures| captures[1].to_string())
}

/// Runs one `ansible-playbook` process.
#[derive(Debug)]
pub struct AnsibleController {
    bin: PathBuf,
    context: RunContext,
    child: Option<Child>,
}

impl RunController for AnsibleController {
    fn run(
        &mut self,
        script: &Script,
        loader: &mut Loader,
        events: &Sender<Event>,
    ) -> anyhow::Result<Stats> {
        let playbook = match script {
            Script::Playbook(path) => path.clone(),
            Script::Play(play) => {
                let yaml = play
                    .to_playbook_yaml()
                    .context("failed to serialize the generated play")?;
                loader.write_tmp_file(".yml", yaml.as_bytes())?
            }
        };

        let plugin = loader.write_named_tmp_file(
            "callback_plugins",
            &format!("{CALLBACK_NAME}.py"),
            CALLBACK_PLUGIN.as_bytes(),
        )?;
        let plugin_dir = plugin
            .parent()
            .context("callback plugin has no directory")?
            .to_path_buf();
        let vars_files = self.write_vars_files(loader)?;
        let args = playbook_args(&self.context, &playbook, &vars_files);
        tracing::debug!(command = %display_command(&self.bin, &args), "starting engine");

        let mut command = Command::new(&self.bin);
        command
            .args(&args)
            .envs(ENGINE_ENV.iter().copied())
            .env("ANSIBLE_STDOUT_CALLBACK", CALLBACK_NAME)
            .env("ANSIBLE_CALLBACK_PLUGINS", &plugin_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let (status, stdout, stderr) = self.spawn_and_stream(command, events)?;

        if !stderr.is_empty() {
            tracing::debug!(stderr = %String::from_utf8_lossy(&stderr), "engine stderr");
        }

        let options = &self.context.options;
        if options.syntax || options.list_tasks || options.list_hosts || options.list_tags {
            // Listing modes print plain text instead of results.
            if !status.success() {
                bail!(
                    "{} exited with {}:\n{}",
                    self.bin.display(),
                    exit_description(status),
                    String::from_utf8_lossy(&stderr),
                );
            }
            tracing::info!("{}", stdout.text);
            return Ok(Stats::new());
        }

        let stats = stdout.stats.ok_or_else(|| {
            anyhow!(
                "{} exited with {} without reporting statistics:\n{}",
                self.bin.display(),
                exit_description(status),
                String::from_utf8_lossy(&stderr),
            )
        })?;
        tracing::debug!(status = %exit_description(status), "engine finished");
        Ok(stats)
    }

    fn cleanup(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        match child.try_wait() {
            Ok(Some(_)) => {}
            _ => {
                tracing::warn!(pid = child.id(), "stopping engine process");
                if let Err(err) = child.kill() {
                    tracing::warn!(%err, "failed to stop engine process");
                }
                let _ = child.wait();
            }
        }
    }
}

impl AnsibleController {
    /// Writes extra variables and credentials to private temporary files so they stay off the
    /// command line.
    fn write_vars_files(&self, loader: &mut Loader) -> anyhow::Result<Vec<PathBuf>> {
        let mut files = Vec::new();

        let extra_vars = &self.context.variables.extra_vars;
        if !extra_vars.is_empty() {
            let json = serde_json::to_vec(extra_vars).context("failed to encode extra vars")?;
            files.push(loader.write_tmp_file(".json", &json)?);
        }

        let passwords = &self.context.passwords;
        if !passwords.is_empty() {
            let mut vars = IndexMap::new();
            if let Some(ref pass) = passwords.conn_pass {
                vars.insert("ansible_password", pass);
            }
            if let Some(ref pass) = passwords.become_pass {
                vars.insert("ansible_become_password", pass);
            }
            let json = serde_json::to_vec(&vars).context("failed to encode credentials")?;
            files.push(loader.write_tmp_file(".json", &json)?);
        }

        Ok(files)
    }

    /// Starts the engine, forwards its records to `events` as they arrive and collects the rest
    /// of its output. The child is kept in `self` while it runs so that [RunController::cleanup]
    /// can stop it if anything goes wrong.
    fn spawn_and_stream(
        &mut self,
        mut command: Command,
        events: &Sender<Event>,
    ) -> anyhow::Result<(ExitStatus, EngineStdout, Vec<u8>)> {
        let mut child = command
            .spawn()
            .with_context(|| format!("failed to start {}", self.bin.display()))?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let child = self.child.insert(child);

        // Drain both pipes at once so a chatty engine cannot fill one and stall.
        let (stdout, stderr) = thread::scope(|scope| {
            let stderr = scope.spawn(move || read_pipe(stderr));
            let stdout = read_records(stdout, events);
            let stderr = stderr
                .join()
                .unwrap_or_else(|_| Err(io::Error::other("stderr reader panicked")));
            (stdout, stderr)
        });
        let stdout = stdout.context("failed to read engine stdout")?;
        let stderr = stderr.context("failed to read engine stderr")?;

        let status = child.wait().context("failed to wait for the engine")?;
        self.child = None;
        Ok((status, stdout, stderr))
    }
}

fn read_pipe(pipe: Option<impl Read>) -> io::Result<Vec<u8>> {
    let mut buffer = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buffer)?;
    }
    Ok(buffer)
}

/// Builds the `ansible-playbook` argument list for a run.
pub fn playbook_args(
    context: &RunContext,
    playbook: &Path,
    vars_files: &[PathBuf],
) -> Vec<OsString> {
    let options = &context.options;
    let mut args: Vec<OsString> = Vec::new();
    let mut push = |arg: OsString| args.push(arg);

    for source in context.inventory.sources() {
        push("--inventory".into());
        push(source.into());
    }
    if let Some(limit) = context.inventory.limit() {
        push("--limit".into());
        push(limit.into());
    }

    let tags = join_tags(&options.tags);
    if !tags.is_empty() {
        push("--tags".into());
        push(tags.into());
    }
    let skip_tags = join_tags(&options.skip_tags);
    if !skip_tags.is_empty() {
        push("--skip-tags".into());
        push(skip_tags.into());
    }

    push("--forks".into());
    push(options.forks.to_string().into());
    push("--timeout".into());
    push(options.timeout.to_string().into());
    push("--connection".into());
    push((&options.connection).into());

    if options.r#become {
        push("--become".into());
    }
    push("--become-method".into());
    push((&options.become_method).into());
    push("--become-user".into());
    push((&options.become_user).into());

    if let Some(ref key) = options.private_key_file {
        push("--private-key".into());
        push(key.into());
    }
    if let Some(ref path) = options.module_path {
        push("--module-path".into());
        push(path.into());
    }

    for (flag, set) in [
        ("--check", options.check),
        ("--diff", options.diff),
        ("--syntax-check", options.syntax),
        ("--list-tasks", options.list_tasks),
        ("--list-hosts", options.list_hosts),
        ("--list-tags", options.list_tags),
    ] {
        if set {
            push(flag.into());
        }
    }

    // These values usually start with a dash, so they must be attached with `=`.
    for (flag, value) in [
        ("--ssh-common-args", &options.ssh_common_args),
        ("--sftp-extra-args", &options.sftp_extra_args),
        ("--scp-extra-args", &options.scp_extra_args),
        ("--ssh-extra-args", &options.ssh_extra_args),
    ] {
        if !value.is_empty() {
            push(format!("{flag}={value}").into());
        }
    }

    for (name, value) in &options.other {
        match (name.as_str(), value) {
            ("start_at_task", serde_yaml::Value::String(task)) => {
                push("--start-at-task".into());
                push(task.into());
            }
            ("remote_user", serde_yaml::Value::String(user)) => {
                push("--user".into());
                push(user.into());
            }
            ("force_handlers", serde_yaml::Value::Bool(true)) => push("--force-handlers".into()),
            ("flush_cache", serde_yaml::Value::Bool(true)) => push("--flush-cache".into()),
            _ => {
                tracing::warn!(option = %name, "ignoring option with no ansible-playbook flag")
            }
        }
    }

    if options.verbosity > 0 {
        push(format!("-{}", "v".repeat(usize::from(options.verbosity))).into());
    }

    for file in vars_files {
        let mut arg = OsString::from("@");
        arg.push(file);
        push("--extra-vars".into());
        push(arg);
    }

    push(playbook.into());
    args
}

fn join_tags(tags: &[String]) -> String {
    tags.iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(",")
}

/// A shell-style rendering of a command for log messages.
fn display_command(bin: &Path, args: &[OsString]) -> String {
    let mut components = Vec::with_capacity(args.len() + 1);
    components.push(bin.to_string_lossy().to_string());
    components.extend(args.iter().map(|a| a.to_string_lossy().to_string()));

    // Try to use shlex to properly quote the string. If that fails, naively join with spaces.
    match Quoter::new().join(components.iter().map(|s| &s[..])) {
        Ok(s) => s,
        Err(_) => components.join(" "),
    }
}

fn exit_description(status: ExitStatus) -> String {
    match status.code() {
        Some(i) => format!("exit code {i}"),
        None => "a signal".to_string(),
    }
}

/// One line of output from the callback plugin.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineRecord {
    PlaybookStart { playbook: String },
    PlayStart { name: String },
    TaskStart { name: String },
    RunnerOk(HostResult),
    RunnerFailed(HostResult),
    RunnerSkipped(HostResult),
    RunnerUnreachable(HostResult),
    Stats { stats: Stats },
}

/// A task's result on one host.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct HostResult {
    pub host: String,
    pub task: String,
    #[serde(default)]
    pub result: Value,

    /// The engine's verdict on whether this failure is ignored. Only failures set it.
    #[serde(default)]
    pub ignore_errors: bool,
}

impl HostResult {
    fn into_task_result(self) -> TaskResult {
        TaskResult::new(self.host, self.task, self.result)
    }
}

impl From<EngineRecord> for Event {
    fn from(record: EngineRecord) -> Self {
        match record {
            EngineRecord::PlaybookStart { playbook } => Event::PlaybookStart { playbook },
            EngineRecord::PlayStart { name } => Event::PlayStart { name },
            EngineRecord::TaskStart { name } => Event::TaskStart { name },
            EngineRecord::RunnerOk(r) => Event::RunnerOk(r.into_task_result()),
            EngineRecord::RunnerFailed(r) => Event::RunnerFailed {
                ignore_errors: r.ignore_errors,
                result: r.into_task_result(),
            },
            EngineRecord::RunnerSkipped(r) => Event::RunnerSkipped(r.into_task_result()),
            EngineRecord::RunnerUnreachable(r) => Event::RunnerUnreachable(r.into_task_result()),
            EngineRecord::Stats { stats } => Event::Stats(stats),
        }
    }
}

/// Parses one line of engine stdout. Anything that is not a plugin record (warnings, listing
/// output) yields `None`.
pub fn parse_record(line: &str) -> Option<EngineRecord> {
    let line = line.trim();
    if !line.starts_with('{') {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(record) => Some(record),
        Err(err) => {
            tracing::debug!(%err, "skipping unrecognized JSON line");
            None
        }
    }
}

/// What remains of the engine's stdout once its records have been forwarded.
#[derive(Debug, Default)]
pub struct EngineStdout {
    /// The final statistics record, if the engine got that far.
    pub stats: Option<Stats>,

    /// Lines that were not records.
    pub text: String,
}

/// Reads `pipe` line by line, sending every record except the statistics to `events` as soon as
/// it is complete. Events that cannot be delivered are dropped; the receiver is only gone if the
/// run is being abandoned.
pub fn read_records(pipe: Option<impl Read>, events: &Sender<Event>) -> io::Result<EngineStdout> {
    let mut stdout = EngineStdout::default();
    let Some(pipe) = pipe else {
        return Ok(stdout);
    };

    let mut reader = BufReader::new(pipe);
    let mut buffer = Vec::new();
    while reader.read_until(b'\n', &mut buffer)? > 0 {
        let line = String::from_utf8_lossy(&buffer).into_owned();
        buffer.clear();
        match parse_record(&line) {
            Some(EngineRecord::Stats { stats }) => stdout.stats = Some(stats),
            Some(record) => {
                let _ = events.send(record.into());
            }
            None => stdout.text.push_str(&line),
        }
    }
    Ok(stdout)
}
