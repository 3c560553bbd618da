//! Run Ansible playbooks and ad-hoc modules from Rust, and get back a plain summary.
//!
//! # Runs
//!
//! A [Runner] executes either a playbook file ([Runner::run_playbook]) or a single module against
//! a host pattern ([Runner::run_module]). Options are passed as loosely typed [Overrides] using the
//! engine's own option names; anything not given falls back to the engine's configured defaults.
//! Every run returns a [RunSummary] listing unreachable hosts, failed hosts and failed tasks.
//! Problems with the managed hosts are data in that summary. Only problems with the request
//! itself (a missing playbook, an option of the wrong type) or with the engine are errors.
//!
//! # Program flow
//!
//! This section is meant for developers working on playrun itself.
//!
//! 1. [options::build] merges engine defaults, the runner's options and the call's overrides into
//!    a [RunOptions](options::RunOptions).
//!
//! 2. The runner resolves the inventory and extra variables and hands them to an
//!    [Engine](engine::Engine), which returns a [RunController](engine::RunController) for the
//!    run.
//!
//! 3. The controller runs on a worker thread and reports [Event](callback::Event)s over a channel.
//!    The runner relays each event to the registered [Callback]s on the caller's thread.
//!
//! 4. When the controller returns its [Stats](stats::Stats), [summary::summarize] flattens them,
//!    together with the failures collected along the way, into a [RunSummary].
//!
//! # Vault
//!
//! [vault_encrypt] and [vault_decrypt] read and write the engine's vault format with the password
//! file named in the engine configuration.

pub mod callback;
pub mod config;
pub mod engine;
pub mod error;
pub mod inventory;
pub mod loader;
pub mod options;
pub mod parsing;
pub mod play;
pub mod runner;
pub mod stats;
pub mod summary;
pub mod vars;
pub mod vault;

#[doc(inline)]
pub use callback::Callback;
#[doc(inline)]
pub use error::{Error, Result};
#[doc(inline)]
pub use options::Overrides;
#[doc(inline)]
pub use runner::{engine_version, ModuleRequest, Runner};
#[doc(inline)]
pub use summary::RunSummary;
#[doc(inline)]
pub use vault::{vault_decrypt, vault_encrypt};
