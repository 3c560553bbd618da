//! Extra variables, the highest-precedence variables of a run.

use crate::loader::Loader;
use crate::options::RunOptions;
use anyhow::{bail, Context};
use indexmap::IndexMap;
use serde_yaml::Value;

/// Holds the variables shared by every play and host in a run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VariableManager {
    pub extra_vars: IndexMap<String, Value>,
}

impl VariableManager {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Resolves the `extra_vars` option into a flat mapping.
///
/// Entries whose key is `@<path>` are replaced by the top-level mapping loaded from that YAML (or
/// JSON) file. Later entries win over earlier ones.
pub fn load_extra_vars(
    loader: &Loader,
    options: &RunOptions,
) -> anyhow::Result<IndexMap<String, Value>> {
    let mut vars = IndexMap::new();
    for (key, value) in &options.extra_vars {
        match key.strip_prefix('@') {
            Some(path) => {
                let loaded: Value = loader
                    .load_from_file(path)
                    .with_context(|| format!("failed to load extra vars from {path}"))?;
                match loaded {
                    Value::Mapping(mapping) => {
                        for (k, v) in mapping {
                            let Value::String(k) = k else {
                                bail!("extra vars in {path} must have string keys");
                            };
                            vars.insert(k, v);
                        }
                    }
                    Value::Null => {}
                    _ => bail!("extra vars in {path} must be a mapping"),
                }
            }
            None => {
                vars.insert(key.clone(), value.clone());
            }
        }
    }
    Ok(vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineDefaults;

    fn options_with(vars: &[(&str, Value)]) -> RunOptions {
        let mut options = RunOptions::defaults(None, &EngineDefaults::default());
        options.extra_vars = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        options
    }

    #[test]
    fn inline_vars_pass_through() {
        let loader = Loader::new();
        let options = options_with(&[("release", Value::from("1.4"))]);
        let vars = load_extra_vars(&loader, &options).unwrap();
        assert_eq!(Some(&Value::from("1.4")), vars.get("release"));
    }

    #[test]
    fn file_vars_are_merged_in_order() {
        let mut loader = Loader::new();
        let path = loader
            .write_tmp_file(".yml", b"release: '2.0'\nregion: eu\n")
            .unwrap();
        let file_key = format!("@{}", path.display());
        let options = options_with(&[
            ("release", Value::from("1.4")),
            (file_key.as_str(), Value::Null),
            ("region", Value::from("us")),
        ]);

        let vars = load_extra_vars(&loader, &options).unwrap();
        assert_eq!(Some(&Value::from("2.0")), vars.get("release"));
        assert_eq!(Some(&Value::from("us")), vars.get("region"));
        assert!(!vars.contains_key(&file_key));
    }

    #[test]
    fn file_must_hold_a_mapping() {
        let mut loader = Loader::new();
        let path = loader.write_tmp_file(".yml", b"- a\n- b\n").unwrap();
        let file_key = format!("@{}", path.display());
        let options = options_with(&[(file_key.as_str(), Value::Null)]);
        assert!(load_extra_vars(&loader, &options).is_err());
    }
}
