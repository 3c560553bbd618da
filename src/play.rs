//! Plays built in memory for ad-hoc module runs.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// The name given to plays generated for ad-hoc module runs.
pub const MODULE_RUNNER_PLAY: &str = "Ansible module runner";

/// A single play, serializable in the engine's playbook format.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Play {
    pub name: String,
    pub hosts: String,
    pub gather_facts: bool,
    pub tasks: Vec<PlayTask>,
}

/// A task that invokes one module.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct PlayTask {
    pub action: ModuleCall,

    /// Seconds to let the task run in the background; zero runs it in the foreground.
    #[serde(rename = "async")]
    pub async_secs: u32,

    /// Seconds between status checks of background tasks.
    pub poll: u32,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ModuleCall {
    pub module: String,
    pub args: IndexMap<String, String>,
}

impl Play {
    /// Builds the one-task play behind an ad-hoc module run. Facts are not gathered.
    pub fn for_module(
        hosts: impl Into<String>,
        module: impl Into<String>,
        args: IndexMap<String, String>,
        poll: u32,
    ) -> Self {
        Self {
            name: MODULE_RUNNER_PLAY.to_string(),
            hosts: hosts.into(),
            gather_facts: false,
            tasks: vec![PlayTask {
                action: ModuleCall {
                    module: module.into(),
                    args,
                },
                async_secs: 0,
                poll,
            }],
        }
    }

    /// Renders the play as a playbook document (a one-element list of plays).
    pub fn to_playbook_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(&[self])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_yaml::Value;

    #[test]
    fn module_play_shape() {
        let mut args = IndexMap::new();
        args.insert("_raw_params".to_string(), "uptime".to_string());
        let play = Play::for_module("web", "shell", args, 15);
        let yaml: Value = serde_yaml::from_str(&play.to_playbook_yaml().unwrap()).unwrap();

        let play = &yaml[0];
        assert_eq!(Some(MODULE_RUNNER_PLAY), play["name"].as_str());
        assert_eq!(Some("web"), play["hosts"].as_str());
        assert_eq!(Some(false), play["gather_facts"].as_bool());

        let task = &play["tasks"][0];
        assert_eq!(Some("shell"), task["action"]["module"].as_str());
        assert_eq!(Some("uptime"), task["action"]["args"]["_raw_params"].as_str());
        assert_eq!(Some(0), task["async"].as_u64());
        assert_eq!(Some(15), task["poll"].as_u64());
    }
}
