//! The engine's per-run aggregate outcome record.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Outcome counters for one host.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct HostStats {
    pub ok: u32,
    pub changed: u32,
    pub failures: u32,
    pub unreachable: u32,
    pub skipped: u32,
    pub rescued: u32,
    pub ignored: u32,
}

/// Per-host counters for a whole run, keyed by host name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Stats {
    hosts: BTreeMap<String, HostStats>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the counters for `host`, creating them if needed.
    pub fn host_mut(&mut self, host: &str) -> &mut HostStats {
        self.hosts.entry(host.to_string()).or_default()
    }

    pub fn host(&self, host: &str) -> Option<&HostStats> {
        self.hosts.get(host)
    }

    /// Every host the run touched, in alphabetical order.
    pub fn processed(&self) -> impl Iterator<Item = &str> {
        self.hosts.keys().map(String::as_str)
    }

    /// Hosts that could not be reached, in alphabetical order.
    pub fn dark(&self) -> Vec<String> {
        self.hosts_where(|s| s.unreachable > 0)
    }

    /// Hosts with at least one failed task, in alphabetical order.
    pub fn failures(&self) -> Vec<String> {
        self.hosts_where(|s| s.failures > 0)
    }

    fn hosts_where(&self, predicate: impl Fn(&HostStats) -> bool) -> Vec<String> {
        self.hosts
            .iter()
            .filter(|(_, stats)| predicate(stats))
            .map(|(host, _)| host.clone())
            .collect()
    }
}

impl FromIterator<(String, HostStats)> for Stats {
    fn from_iter<I: IntoIterator<Item = (String, HostStats)>>(iter: I) -> Self {
        Self {
            hosts: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dark_and_failures_are_sorted_key_sets() {
        let mut stats = Stats::new();
        stats.host_mut("b").unreachable = 1;
        stats.host_mut("a").unreachable = 2;
        stats.host_mut("c").failures = 1;
        stats.host_mut("d").ok = 4;

        assert_eq!(vec!["a", "b"], stats.dark());
        assert_eq!(vec!["c"], stats.failures());
        assert_eq!(vec!["a", "b", "c", "d"], stats.processed().collect::<Vec<_>>());
    }

    #[test]
    fn deserializes_engine_stats() {
        let json = r#"{"web1": {"ok": 3, "changed": 1, "failures": 0, "unreachable": 0,
                       "skipped": 0, "rescued": 0, "ignored": 1},
                       "web2": {"ok": 0, "unreachable": 1}}"#;
        let stats: Stats = serde_json::from_str(json).unwrap();
        assert_eq!(3, stats.host("web1").unwrap().ok);
        assert_eq!(1, stats.host("web1").unwrap().ignored);
        assert_eq!(vec!["web2"], stats.dark());
    }
}
