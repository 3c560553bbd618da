//! Exercises playrun from a [Runner] call through a simulated engine to the returned
//! [RunSummary].
//!
//! The simulated engine sends a scripted list of events, the way the real engine binding forwards
//! the records its callback plugin prints. Key behaviors under test are the runner's bookkeeping
//! around the engine: observers see every event, ignored failures stay out of the summary, and
//! temporary files never outlive a run.

use crossbeam::channel::Sender;
use playrun::callback::{Callback, Event, ProgressTracker, TaskResult};
use playrun::engine::{Engine, RunContext, RunController, Script};
use playrun::loader::Loader;
use playrun::stats::{HostStats, Stats};
use playrun::{Error, ModuleRequest, Overrides, RunSummary, Runner};
use serde_json::json;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

pub mod engine {
    use super::*;

    /// Everything the simulated engine was asked to do.
    #[derive(Debug, Default)]
    pub struct Journal {
        pub runs: usize,
        pub cleanups: usize,
        pub tmp_files: Vec<PathBuf>,
        pub credentials: Vec<Option<String>>,
    }

    /// An [Engine] that reports a fixed run without contacting any host.
    #[derive(Clone, Debug, Default)]
    pub struct SimulatedEngine {
        pub events: Vec<Event>,
        pub stats: Stats,
        pub error: Option<String>,
        pub journal: Arc<Mutex<Journal>>,
    }

    impl SimulatedEngine {
        pub fn journal(&self) -> std::sync::MutexGuard<'_, Journal> {
            self.journal.lock().unwrap()
        }
    }

    pub struct SimulatedController {
        engine: SimulatedEngine,
    }

    impl Engine for SimulatedEngine {
        type Controller = SimulatedController;

        fn controller(&self, context: RunContext) -> anyhow::Result<SimulatedController> {
            self.journal()
                .credentials
                .push(context.passwords.conn_pass.clone());
            Ok(SimulatedController {
                engine: self.clone(),
            })
        }

        fn version(&self) -> anyhow::Result<String> {
            Ok("2.16.0".to_string())
        }
    }

    impl RunController for SimulatedController {
        fn run(
            &mut self,
            script: &Script,
            loader: &mut Loader,
            events: &Sender<Event>,
        ) -> anyhow::Result<Stats> {
            if let Script::Play(play) = script {
                let yaml = play.to_playbook_yaml()?;
                let path = loader.write_tmp_file(".yml", yaml.as_bytes())?;
                self.engine.journal().tmp_files.push(path);
            }
            self.engine.journal().runs += 1;

            for event in &self.engine.events {
                events.send(event.clone())?;
            }
            match self.engine.error {
                Some(ref error) => anyhow::bail!("{error}"),
                None => Ok(self.engine.stats.clone()),
            }
        }

        fn cleanup(&mut self) {
            self.engine.journal().cleanups += 1;
        }
    }
}
use engine::*;

pub mod fixtures {
    use super::*;

    pub fn playbook() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("resources/playbooks/site.yml")
    }

    pub fn config_file() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("resources/etc/playrun/ansible.cfg")
    }

    pub fn runner(engine: &SimulatedEngine) -> Runner<SimulatedEngine> {
        Runner::with_engine(engine.clone(), Some("web1,web2,db1,db2,"), Overrides::new())
            .unwrap()
            .with_config_file(config_file())
            .unwrap()
    }

    pub fn result(host: &str, task: &str, result: serde_json::Value) -> TaskResult {
        TaskResult::new(host, task, result)
    }

    /// A run of the sample playbook over two web servers and two databases: `smoke test` fails
    /// but is ignored on web1, `deploy` fails on web2 with a loop of results, and both databases
    /// are unreachable.
    pub fn eventful_engine() -> SimulatedEngine {
        let host_stats = |ok, failures, unreachable| HostStats {
            ok,
            failures,
            unreachable,
            ..Default::default()
        };
        SimulatedEngine {
            events: vec![
                Event::PlaybookStart {
                    playbook: "site.yml".into(),
                },
                Event::PlayStart {
                    name: "web servers".into(),
                },
                Event::TaskStart {
                    name: "smoke test".into(),
                },
                Event::RunnerFailed {
                    result: result(
                        "web1",
                        "smoke test",
                        json!({"failed": true, "rc": 1, "msg": "non-zero return code"}),
                    ),
                    ignore_errors: true,
                },
                Event::RunnerOk(result("web2", "smoke test", json!({"changed": false}))),
                Event::TaskStart {
                    name: "deploy".into(),
                },
                Event::RunnerOk(result("web1", "deploy", json!({"changed": true}))),
                Event::RunnerFailed {
                    result: result(
                        "web2",
                        "deploy",
                        json!({"failed": true, "results": [
                            {"item": "a.conf", "msg": "Destination not writable"},
                            {"item": "b.conf", "changed": true},
                            {"item": "c.conf", "msg": "Source not found"}
                        ]}),
                    ),
                    ignore_errors: false,
                },
                Event::PlayStart {
                    name: "databases".into(),
                },
                Event::TaskStart {
                    name: "warm cache".into(),
                },
                Event::RunnerUnreachable(result("db2", "warm cache", json!({"unreachable": true}))),
                Event::RunnerUnreachable(result("db1", "warm cache", json!({"unreachable": true}))),
            ],
            stats: [
                ("web1".to_string(), host_stats(2, 0, 0)),
                ("web2".to_string(), host_stats(1, 1, 0)),
                ("db2".to_string(), host_stats(0, 0, 1)),
                ("db1".to_string(), host_stats(0, 0, 1)),
            ]
            .into_iter()
            .collect(),
            ..Default::default()
        }
    }

    /// Counts events by kind.
    #[derive(Clone, Default)]
    pub struct Tally(pub Arc<Mutex<Vec<&'static str>>>);

    impl Callback for Tally {
        fn on_runner_ok(&mut self, _result: &TaskResult) {
            self.0.lock().unwrap().push("ok");
        }

        fn on_runner_failed(&mut self, _result: &TaskResult, _ignore_errors: bool) {
            self.0.lock().unwrap().push("failed");
        }

        fn on_runner_unreachable(&mut self, _result: &TaskResult) {
            self.0.lock().unwrap().push("unreachable");
        }

        fn on_stats(&mut self, _stats: &Stats) {
            self.0.lock().unwrap().push("stats");
        }
    }
}
use fixtures::*;

#[test]
fn playbook_run_is_summarized() {
    let engine = eventful_engine();
    let mut runner = runner(&engine);

    let summary = runner
        .run_playbook(playbook(), None, &Overrides::new())
        .unwrap();

    assert_eq!(
        RunSummary {
            error_msg: "Following nodes were unreachable: ['db1', 'db2']\n\
                        Task \"deploy\" failed on host \"web2\" with message: \
                        Destination not writable Source not found\n"
                .to_string(),
            unreachable_hosts: vec!["db1".to_string(), "db2".to_string()],
            failed_hosts: vec!["web2".to_string()],
            failed_tasks: vec!["deploy".to_string()],
        },
        summary
    );
    assert!(!summary.is_success());
}

#[test]
fn summary_serializes_with_plain_keys() {
    let engine = eventful_engine();
    let summary = runner(&engine)
        .run_playbook(playbook(), None, &Overrides::new())
        .unwrap();

    let value = serde_json::to_value(&summary).unwrap();
    let mut keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
    keys.sort();
    assert_eq!(
        vec!["error_msg", "failed_hosts", "failed_tasks", "unreachable_hosts"],
        keys
    );
}

#[test]
fn observers_and_progress_follow_the_run() {
    let engine = eventful_engine();
    let mut runner = runner(&engine);
    let tally = Tally::default();
    let (tracker, progress) = ProgressTracker::new();
    runner.add_callback(tally.clone());
    runner.add_callback(tracker);

    runner
        .run_playbook(playbook(), None, &Overrides::new())
        .unwrap();

    assert_eq!(
        vec!["failed", "ok", "ok", "failed", "unreachable", "unreachable", "stats"],
        *tally.0.lock().unwrap()
    );
    let progress = progress.progress();
    assert!(progress.finished);
    assert_eq!(3, progress.tasks_started);
    assert_eq!(6, progress.results);
    assert_eq!(Some("warm cache".to_string()), progress.current_task);
}

#[test]
fn missing_playbook_is_rejected_up_front() {
    let engine = eventful_engine();
    let mut runner = runner(&engine);

    let result = runner.run_playbook("resources/playbooks/missing.yml", None, &Overrides::new());

    match result {
        Err(Error::FileNotFound { name }) => assert_eq!("resources/playbooks/missing.yml", name),
        other => panic!("expected FileNotFound, got {other:?}"),
    }
    assert_eq!(0, engine.journal().runs);
    assert!(engine.journal().credentials.is_empty());
}

#[test]
fn credentials_reach_the_engine() {
    let engine = SimulatedEngine::default();
    let mut runner = runner(&engine);

    runner
        .run_playbook(
            playbook(),
            None,
            &Overrides::new().with("conn_pass", "hunter2"),
        )
        .unwrap();

    assert_eq!(
        vec![Some("hunter2".to_string())],
        engine.journal().credentials
    );
}

#[test]
fn module_run_cleans_up_when_the_engine_fails() {
    let engine = SimulatedEngine {
        error: Some("connection plugin crashed".to_string()),
        ..Default::default()
    };
    let mut runner = runner(&engine);

    let err = runner
        .run_module(&ModuleRequest::new("shell").args("uptime"), &Overrides::new())
        .unwrap_err();

    assert!(err.to_string().contains("connection plugin crashed"));
    let journal = engine.journal();
    assert_eq!(1, journal.cleanups);
    assert_eq!(1, journal.tmp_files.len());
    assert!(!journal.tmp_files[0].exists());
}

#[test]
fn module_run_reports_hosts_only() {
    let engine = eventful_engine();
    let mut runner = runner(&engine);

    let summary = runner
        .run_module(&ModuleRequest::default(), &Overrides::new())
        .unwrap();

    assert_eq!(vec!["db1", "db2"], summary.unreachable_hosts);
    assert_eq!(vec!["web2"], summary.failed_hosts);
    assert!(summary.failed_tasks.is_empty());
    assert_eq!(
        "Following nodes were unreachable: ['db1', 'db2']\n",
        summary.error_msg
    );
    assert_eq!(1, engine.journal().cleanups);
}
