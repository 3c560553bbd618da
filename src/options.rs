//! Builds the option record that every engine run is configured with.
//!
//! Callers pass options as an open set of named, loosely typed [Overrides], the same names the
//! engine's own command line uses. [build] layers them over the [EngineDefaults], checks their
//! types, and produces a strongly typed [RunOptions].

use crate::config::{self, EngineDefaults};
use crate::error::{Error, Result};
use crate::parsing;
use indexmap::IndexMap;
use serde_yaml::Value;
use std::path::PathBuf;

/// Named option values supplied by a caller.
///
/// Later insertions replace earlier ones with the same name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Overrides(IndexMap<String, Value>);

impl Overrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [Self::insert].
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> indexmap::map::Iter<'_, String, Value> {
        self.0.iter()
    }

    /// Copies every entry of `other` into `self`, replacing entries with the same name.
    pub fn merge(&mut self, other: &Overrides) {
        for (name, value) in other.iter() {
            self.0.insert(name.clone(), value.clone());
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Overrides {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Connection and privilege escalation passwords for a run.
///
/// Deliberately not [std::fmt::Debug]-printable with its contents.
#[derive(Clone, Default, PartialEq)]
pub struct Passwords {
    pub conn_pass: Option<String>,
    pub become_pass: Option<String>,
}

impl std::fmt::Debug for Passwords {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Passwords")
            .field("conn_pass", &self.conn_pass.as_ref().map(|_| "<redacted>"))
            .field("become_pass", &self.become_pass.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Passwords {
    /// Takes the `conn_pass` and `become_pass` entries from `overrides`.
    pub fn from_overrides(overrides: &Overrides) -> Result<Self> {
        Ok(Self {
            conn_pass: optional_string(overrides.get("conn_pass"), "conn_pass")?,
            become_pass: optional_string(overrides.get("become_pass"), "become_pass")?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.conn_pass.is_none() && self.become_pass.is_none()
    }
}

/// The fully populated options for one engine run.
#[derive(Clone, Debug, PartialEq)]
pub struct RunOptions {
    pub check: bool,
    pub list_tasks: bool,
    pub list_hosts: bool,
    pub list_tags: bool,
    pub syntax: bool,
    pub module_path: Option<String>,
    pub skip_tags: Vec<String>,
    pub ssh_common_args: String,
    pub sftp_extra_args: String,
    pub scp_extra_args: String,
    pub ssh_extra_args: String,
    pub r#become: bool,
    pub become_user: String,
    pub become_ask_pass: bool,
    pub become_method: String,
    pub forks: u32,
    pub inventory: Option<String>,
    pub private_key_file: Option<PathBuf>,
    pub extra_vars: IndexMap<String, Value>,
    pub subset: Option<String>,
    pub tags: Vec<String>,
    pub verbosity: u8,
    pub connection: String,
    pub timeout: u32,
    pub diff: bool,

    /// Overrides this crate does not recognize, kept verbatim.
    pub other: IndexMap<String, Value>,
}

impl RunOptions {
    /// The options a run gets when nothing is overridden.
    pub fn defaults(inventory: Option<&str>, defaults: &EngineDefaults) -> Self {
        Self {
            check: false,
            list_tasks: false,
            list_hosts: false,
            list_tags: false,
            syntax: false,
            module_path: None,
            skip_tags: Vec::new(),
            ssh_common_args: String::new(),
            sftp_extra_args: String::new(),
            scp_extra_args: String::new(),
            ssh_extra_args: String::new(),
            r#become: defaults.r#become,
            become_user: defaults.become_user.clone(),
            become_ask_pass: defaults.become_ask_pass,
            become_method: defaults.become_method.clone(),
            forks: defaults.forks,
            inventory: inventory.map(str::to_string),
            private_key_file: defaults.private_key_file.clone(),
            extra_vars: IndexMap::new(),
            subset: None,
            tags: Vec::new(),
            verbosity: 0,
            connection: defaults.transport.clone(),
            timeout: defaults.timeout,
            diff: defaults.diff_always,
            other: IndexMap::new(),
        }
    }
}

/// Builds [RunOptions] for a run against `inventory`.
///
/// Values are layered in order of increasing precedence: `defaults`, then `custom` (options the
/// runner was configured with), then `overrides` (options for this call only).
///
/// # Errors
///
/// Returns [Error::InvalidParameter] if `tags` is neither a string nor a list, or if any other
/// recognized option has a value of the wrong type.
pub fn build(
    inventory: Option<&str>,
    defaults: &EngineDefaults,
    custom: &Overrides,
    overrides: &Overrides,
) -> Result<RunOptions> {
    let mut merged = custom.clone();
    merged.merge(overrides);

    let mut options = RunOptions::defaults(inventory, defaults);
    for (name, value) in merged.iter() {
        match name.as_str() {
            "check" => options.check = boolean(value, name)?,
            "listtasks" | "list_tasks" => options.list_tasks = boolean(value, name)?,
            "listhosts" | "list_hosts" => options.list_hosts = boolean(value, name)?,
            "listtags" | "list_tags" => options.list_tags = boolean(value, name)?,
            "syntax" => options.syntax = boolean(value, name)?,
            "module_path" => options.module_path = optional_string(Some(value), name)?,
            "skip_tags" => options.skip_tags = tag_list(value, "skip_tag")?,
            "ssh_common_args" => options.ssh_common_args = string(value, name)?,
            "sftp_extra_args" => options.sftp_extra_args = string(value, name)?,
            "scp_extra_args" => options.scp_extra_args = string(value, name)?,
            "ssh_extra_args" => options.ssh_extra_args = string(value, name)?,
            "become" => options.r#become = boolean(value, name)?,
            "become_user" => options.become_user = string(value, name)?,
            "become_ask_pass" => options.become_ask_pass = boolean(value, name)?,
            "become_method" => options.become_method = string(value, name)?,
            "forks" => options.forks = number(value, name)?,
            "inventory" => options.inventory = optional_string(Some(value), name)?,
            "private_key_file" => {
                options.private_key_file =
                    optional_string(Some(value), name)?.map(|p| config::expand_user(&p))
            }
            "extra_vars" => options.extra_vars = extra_vars(value)?,
            "subset" => options.subset = optional_string(Some(value), name)?,
            "tags" => options.tags = tag_list(value, "tag")?,
            "verbosity" => {
                let verbosity: u32 = number(value, name)?;
                options.verbosity = u8::try_from(verbosity).map_err(|_| invalid(value, name))?;
            }
            "connection" => options.connection = string(value, name)?,
            "timeout" => options.timeout = number(value, name)?,
            "diff" => options.diff = boolean(value, name)?,
            // Credentials travel separately; see Passwords.
            "conn_pass" | "become_pass" => {}
            _ => {
                tracing::debug!(option = %name, "passing through unrecognized option");
                options.other.insert(name.clone(), value.clone());
            }
        }
    }
    Ok(options)
}

/// The name reported for a value's type in [Error::InvalidParameter].
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "sequence",
        Value::Mapping(_) => "mapping",
        Value::Tagged(_) => "tagged",
    }
}

fn invalid(value: &Value, param: &str) -> Error {
    Error::InvalidParameter {
        name: type_name(value).to_string(),
        param: param.to_string(),
    }
}

/// Normalizes a tag option. A string is split on commas; a list is taken as is.
fn tag_list(value: &Value, param: &str) -> Result<Vec<String>> {
    match value {
        Value::String(s) => Ok(s.split(',').map(str::to_string).collect()),
        Value::Sequence(items) => items.iter().map(|item| scalar(item, param)).collect(),
        other => Err(invalid(other, param)),
    }
}

fn scalar(value: &Value, param: &str) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(invalid(other, param)),
    }
}

fn string(value: &Value, param: &str) -> Result<String> {
    match value {
        Value::Null => Ok(String::new()),
        other => scalar(other, param),
    }
}

fn optional_string(value: Option<&Value>, param: &str) -> Result<Option<String>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(other) => scalar(other, param).map(Some),
    }
}

fn boolean(value: &Value, param: &str) -> Result<bool> {
    match value {
        Value::Null => Ok(false),
        Value::Bool(b) => Ok(*b),
        Value::String(s) => Ok(config::parse_bool(s)),
        other => Err(invalid(other, param)),
    }
}

fn number<N: TryFrom<u64>>(value: &Value, param: &str) -> Result<N> {
    let parsed = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed
        .and_then(|n| N::try_from(n).ok())
        .ok_or_else(|| invalid(value, param))
}

/// Accepts extra variables as a mapping, a `key=value` string, or a list of such strings and
/// `@file` references.
fn extra_vars(value: &Value) -> Result<IndexMap<String, Value>> {
    fn add_string(s: &str, vars: &mut IndexMap<String, Value>) {
        if s.starts_with('@') {
            vars.insert(s.to_string(), Value::Null);
        } else {
            for (k, v) in parsing::parse_kv(s, false) {
                vars.insert(k, Value::String(v));
            }
        }
    }

    let mut vars = IndexMap::new();

    match value {
        Value::Null => {}
        Value::Mapping(mapping) => {
            for (k, v) in mapping {
                vars.insert(scalar(k, "extra_vars")?, v.clone());
            }
        }
        Value::String(s) => add_string(s, &mut vars),
        Value::Sequence(items) => {
            for item in items {
                match item {
                    Value::String(s) => add_string(s, &mut vars),
                    other => return Err(invalid(other, "extra_vars")),
                }
            }
        }
        other => return Err(invalid(other, "extra_vars")),
    }
    Ok(vars)
}

#[cfg(test)]
mod test;
