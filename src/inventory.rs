//! The set of managed hosts a run targets.

use std::path::Path;

/// A view over the engine's inventory: where hosts come from, and which of them a run may touch.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Inventory {
    sources: Vec<String>,
    subset: Option<String>,
}

impl Inventory {
    /// Creates an inventory from a source string.
    ///
    /// A source is either a path (file, directory or script) or, when it contains a comma and
    /// is not an existing path, an inline host list such as `web1,web2,`. `None` leaves the
    /// choice to the engine's configured default inventory.
    pub fn new(source: Option<&str>) -> Self {
        let sources = match source {
            Some(source) if !source.is_empty() => {
                if !is_host_list(source) && !Path::new(source).exists() {
                    tracing::warn!(source, "inventory source does not exist");
                }
                vec![source.to_string()]
            }
            _ => Vec::new(),
        };
        Self {
            sources,
            subset: None,
        }
    }

    /// Restricts the run to hosts matching `pattern`; `None` lifts any restriction.
    pub fn subset(&mut self, pattern: Option<&str>) {
        self.subset = pattern
            .filter(|p| !p.trim().is_empty())
            .map(str::to_string);
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    pub fn limit(&self) -> Option<&str> {
        self.subset.as_deref()
    }
}

/// Whether `source` names hosts inline rather than pointing at a file.
pub fn is_host_list(source: &str) -> bool {
    source.contains(',') && !Path::new(source).exists()
}
