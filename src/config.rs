//! Locates configuration and resolves the engine defaults used to fill in run options.

use anyhow::Context;
use indexmap::IndexMap;
use std::fs;
use std::path::{Path, PathBuf};

/// The engine's system-wide configuration file.
pub const ANSIBLE_CFG: &str = "/etc/ansible/ansible.cfg";

/// Name of the vault password file inside [config_dir], used when the engine configuration does
/// not name one.
pub const VAULT_PASSWORD_FILE: &str = "vault_pass.txt";

/// Returns a [PathBuf] to the directory where playrun's configuration should live.
///
/// When compiled for testing, this returns `CARGO_MANIFEST_DIR` plus `resources/etc/playrun`.
/// Otherwise, it returns `/etc/playrun`.
pub fn config_dir() -> PathBuf {
    // Omit the leading slash so that PathBuf::push appends instead of replacing.
    const CONFIG_DIR: &str = "etc/playrun";

    let mut path = PathBuf::from("/");

    #[cfg(test)]
    {
        path.push(env!("CARGO_MANIFEST_DIR"));
        path.push("resources");
    }

    path.push(CONFIG_DIR);
    path
}

/// Returns the fallback vault password file, [VAULT_PASSWORD_FILE] inside [config_dir].
pub fn default_vault_password_file() -> PathBuf {
    config_dir().join(VAULT_PASSWORD_FILE)
}

/// An INI-style engine configuration file, e.g. `ansible.cfg`.
///
/// Only the subset of INI that the engine itself accepts is understood: `[section]` headers,
/// `key = value` or `key: value` pairs, indented continuation lines, and whole-line comments
/// starting with `#` or `;`. Keys are lowercased; section names are kept as written.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AnsibleConfig {
    sections: IndexMap<String, IndexMap<String, String>>,
}

impl AnsibleConfig {
    /// Loads the configuration at `path`.
    ///
    /// A missing file is not an error: it yields an empty configuration, just as the engine
    /// silently falls back to its built-in defaults.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(text) => Ok(Self::parse(&text)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no engine configuration file");
                Ok(Self::default())
            }
            Err(err) => {
                Err(err).with_context(|| format!("failed to read {}", path.display()))
            }
        }
    }

    /// Parses INI text. Lines that fit no rule are skipped.
    pub fn parse(text: &str) -> Self {
        let mut sections: IndexMap<String, IndexMap<String, String>> = IndexMap::new();
        let mut section: Option<String> = None;
        let mut last_key: Option<String> = None;

        for line in text.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
                continue;
            }

            // Continuation of the previous value.
            if line.starts_with(char::is_whitespace) {
                if let (Some(section), Some(key)) = (&section, &last_key) {
                    if let Some(value) = sections
                        .get_mut(section)
                        .and_then(|entries| entries.get_mut(key))
                    {
                        value.push('\n');
                        value.push_str(trimmed);
                    }
                    continue;
                }
            }

            if let Some(name) = trimmed
                .strip_prefix('[')
                .and_then(|rest| rest.strip_suffix(']'))
            {
                let name = name.trim().to_string();
                sections.entry(name.clone()).or_default();
                section = Some(name);
                last_key = None;
                continue;
            }

            let Some(section) = &section else {
                continue;
            };
            let Some(split) = trimmed.find(['=', ':']) else {
                continue;
            };
            let key = trimmed[..split].trim().to_lowercase();
            let value = trimmed[split + 1..].trim().to_string();
            sections
                .entry(section.clone())
                .or_default()
                .insert(key.clone(), value);
            last_key = Some(key);
        }

        Self { sections }
    }

    /// Looks up `key` in `section`. Empty values count as unset.
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)
            .and_then(|entries| entries.get(&key.to_lowercase()))
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }
}

/// Parses a boolean the way the engine does. Unrecognized text is `false`.
pub fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "y" | "yes" | "on" | "1" | "true" | "t"
    )
}

/// Expands a leading `~` to the current user's home directory.
pub fn expand_user(path: &str) -> PathBuf {
    match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => match home::home_dir() {
            Some(mut home) => {
                home.push(rest.trim_start_matches('/'));
                home
            }
            None => PathBuf::from(path),
        },
        _ => PathBuf::from(path),
    }
}

/// The engine configuration defaults that fill in any run option the caller leaves unset.
///
/// This is an immutable snapshot. It is resolved once per run and passed along explicitly, so two
/// runs never observe each other's configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineDefaults {
    pub forks: u32,
    pub timeout: u32,
    pub transport: String,
    pub r#become: bool,
    pub become_user: String,
    pub become_method: String,
    pub become_ask_pass: bool,
    pub private_key_file: Option<PathBuf>,
    pub module_args: String,
    pub poll_interval: u32,
    pub diff_always: bool,
    pub vault_password_file: Option<PathBuf>,
    pub vault_identity_list: Vec<String>,
}

impl Default for EngineDefaults {
    fn default() -> Self {
        Self {
            forks: 5,
            timeout: 10,
            transport: "smart".to_string(),
            r#become: false,
            become_user: "root".to_string(),
            become_method: "sudo".to_string(),
            become_ask_pass: false,
            private_key_file: None,
            module_args: String::new(),
            poll_interval: 15,
            diff_always: false,
            vault_password_file: None,
            vault_identity_list: Vec::new(),
        }
    }
}

impl EngineDefaults {
    /// Resolves the defaults from the process environment and the engine configuration file at
    /// [ANSIBLE_CFG].
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(ANSIBLE_CFG)
    }

    /// Like [Self::load], with the configuration file at `path`.
    pub fn load_from(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let config = AnsibleConfig::load(path)?;
        Ok(Self::resolve(&config, |name| std::env::var(name).ok()))
    }

    /// Resolves the defaults from `config`, letting `ANSIBLE_*` variables looked up through `env`
    /// take precedence, as the engine does.
    ///
    /// Values that fail to parse are ignored with a warning.
    pub fn resolve(config: &AnsibleConfig, env: impl Fn(&str) -> Option<String>) -> Self {
        let lookup = |var: &str, section: &str, key: &str| -> Option<String> {
            env(var)
                .filter(|value| !value.is_empty())
                .or_else(|| config.get(section, key).map(str::to_string))
        };
        let number = |var: &str, key: &str, fallback: u32| -> u32 {
            match lookup(var, "defaults", key) {
                Some(value) => value.trim().parse().unwrap_or_else(|_| {
                    tracing::warn!(key, value = %value, "ignoring non-numeric engine setting");
                    fallback
                }),
                None => fallback,
            }
        };

        let base = Self::default();
        Self {
            forks: number("ANSIBLE_FORKS", "forks", base.forks),
            timeout: number("ANSIBLE_TIMEOUT", "timeout", base.timeout),
            transport: lookup("ANSIBLE_TRANSPORT", "defaults", "transport")
                .unwrap_or(base.transport),
            r#become: lookup("ANSIBLE_BECOME", "privilege_escalation", "become")
                .map(|v| parse_bool(&v))
                .unwrap_or(base.r#become),
            become_user: lookup("ANSIBLE_BECOME_USER", "privilege_escalation", "become_user")
                .unwrap_or(base.become_user),
            become_method: lookup(
                "ANSIBLE_BECOME_METHOD",
                "privilege_escalation",
                "become_method",
            )
            .unwrap_or(base.become_method),
            become_ask_pass: lookup(
                "ANSIBLE_BECOME_ASK_PASS",
                "privilege_escalation",
                "become_ask_pass",
            )
            .map(|v| parse_bool(&v))
            .unwrap_or(base.become_ask_pass),
            private_key_file: lookup("ANSIBLE_PRIVATE_KEY_FILE", "defaults", "private_key_file")
                .map(|v| expand_user(&v)),
            module_args: lookup("ANSIBLE_MODULE_ARGS", "defaults", "module_args")
                .unwrap_or(base.module_args),
            poll_interval: number("ANSIBLE_POLL_INTERVAL", "poll_interval", base.poll_interval),
            diff_always: lookup("ANSIBLE_DIFF_ALWAYS", "diff", "always")
                .map(|v| parse_bool(&v))
                .unwrap_or(base.diff_always),
            vault_password_file: lookup(
                "ANSIBLE_VAULT_PASSWORD_FILE",
                "defaults",
                "vault_password_file",
            )
            .map(|v| expand_user(&v)),
            vault_identity_list: lookup(
                "ANSIBLE_VAULT_IDENTITY_LIST",
                "defaults",
                "vault_identity_list",
            )
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SAMPLE: &str = "\
# engine settings
[defaults]
forks = 20
timeout: 30
vault_password_file = /srv/vault/pass
module_args =
vault_identity_list = dev@/srv/dev, prod@/srv/prod

; escalation
[privilege_escalation]
become = yes
become_user = deploy

[diff]
always = True
";

    #[test]
    fn config_dir_works() {
        let mut expected = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        expected.push("resources");
        expected.push("etc");
        expected.push("playrun");

        assert_eq!(expected, config_dir());

        let config_dir_exists = expected.try_exists();
        assert!(config_dir_exists.expect("could not confirm or deny whether config dir exists"));
    }

    mod ansible_config {
        use super::*;

        #[test]
        fn reads_both_delimiters() {
            let config = AnsibleConfig::parse(SAMPLE);
            assert_eq!(Some("20"), config.get("defaults", "forks"));
            assert_eq!(Some("30"), config.get("defaults", "timeout"));
            assert_eq!(Some("deploy"), config.get("privilege_escalation", "become_user"));
        }

        #[test]
        fn empty_values_are_unset() {
            let config = AnsibleConfig::parse(SAMPLE);
            assert_eq!(None, config.get("defaults", "module_args"));
        }

        #[test]
        fn keys_are_case_insensitive() {
            let config = AnsibleConfig::parse("[defaults]\nVault_Password_File = /x\n");
            assert_eq!(Some("/x"), config.get("defaults", "vault_password_file"));
            assert_eq!(Some("/x"), config.get("defaults", "VAULT_PASSWORD_FILE"));
        }

        #[test]
        fn joins_continuation_lines() {
            let config = AnsibleConfig::parse("[defaults]\nkey = one\n  two\n");
            assert_eq!(Some("one\ntwo"), config.get("defaults", "key"));
        }

        #[test]
        fn ignores_keys_outside_sections() {
            let config = AnsibleConfig::parse("forks = 3\n[defaults]\n");
            assert_eq!(None, config.get("defaults", "forks"));
        }

        #[test]
        fn missing_file_is_empty() {
            let dir = tempfile::TempDir::with_prefix("playrun-").unwrap();
            let config = AnsibleConfig::load(dir.path().join("ansible.cfg")).unwrap();
            assert_eq!(AnsibleConfig::default(), config);
        }
    }

    mod engine_defaults {
        use super::*;

        fn no_env(_: &str) -> Option<String> {
            None
        }

        #[test]
        fn falls_back_to_builtins() {
            let defaults = EngineDefaults::resolve(&AnsibleConfig::default(), no_env);
            assert_eq!(EngineDefaults::default(), defaults);
        }

        #[test]
        fn reads_config_file() {
            let defaults = EngineDefaults::resolve(&AnsibleConfig::parse(SAMPLE), no_env);
            assert_eq!(20, defaults.forks);
            assert_eq!(30, defaults.timeout);
            assert!(defaults.r#become);
            assert_eq!("deploy", defaults.become_user);
            assert!(defaults.diff_always);
            assert_eq!(
                Some(PathBuf::from("/srv/vault/pass")),
                defaults.vault_password_file
            );
            assert_eq!(
                vec!["dev@/srv/dev".to_string(), "prod@/srv/prod".to_string()],
                defaults.vault_identity_list
            );
        }

        #[test]
        fn environment_wins() {
            let env: HashMap<&str, &str> = [("ANSIBLE_FORKS", "2"), ("ANSIBLE_BECOME", "no")]
                .into_iter()
                .collect();
            let defaults = EngineDefaults::resolve(&AnsibleConfig::parse(SAMPLE), |name| {
                env.get(name).map(|v| v.to_string())
            });
            assert_eq!(2, defaults.forks);
            assert!(!defaults.r#become);
        }

        #[test]
        fn ignores_bad_numbers() {
            let config = AnsibleConfig::parse("[defaults]\nforks = many\n");
            let defaults = EngineDefaults::resolve(&config, no_env);
            assert_eq!(5, defaults.forks);
        }
    }

    #[test]
    fn expand_user_leaves_other_paths_alone() {
        assert_eq!(PathBuf::from("/etc/x"), expand_user("/etc/x"));
        assert_eq!(PathBuf::from("~other/x"), expand_user("~other/x"));
    }
}
