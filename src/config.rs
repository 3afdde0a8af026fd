use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::scenario::Scenario;
use crate::source::HttpConfig;
use crate::Result;

/// Synthetic 1 MiB stream, so a bare run works without network access.
pub const DEFAULT_URI: &str = "mem:1048576";

/// Settings for a probe run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// URI of the stream to probe.
    pub uri: String,
    pub http: HttpConfig,
    /// Scenarios to run, in order. Empty means all of them.
    pub scenarios: Vec<Scenario>,
    /// Print reports as JSON instead of text.
    pub json: bool,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            uri: DEFAULT_URI.to_owned(),
            http: HttpConfig::default(),
            scenarios: Vec::new(),
            json: false,
        }
    }
}

impl ProbeConfig {
    /// Load a config from a JSON file. Missing fields take their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = fs::read_to_string(path.as_ref())?;
        let config = serde_json::from_str(&raw)?;
        log::debug!("config: loaded {}", path.as_ref().display());
        Ok(config)
    }

    /// The scenarios to run, falling back to all of them.
    pub fn selected_scenarios(&self) -> Vec<Scenario> {
        if self.scenarios.is_empty() {
            Scenario::ALL.to_vec()
        } else {
            self.scenarios.clone()
        }
    }
}
