//! Run settings
//!
//! One YAML document describing how testies are loaded for a run: active
//! tags, variable and config overrides, expansion mode and the node table
//! used for interface references.
//!
//! Path resolution order:
//! 1. Explicit path (`--settings`)
//! 2. `NPF_SETTINGS` environment variable
//! 3. `npf.yaml` in the working directory
//! 4. Built-in defaults

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use testie_core::{parse_tags, ExpandMode, Tags, Testie};
use testie_subst::StaticNodes;
use tracing::{debug, info};

pub const SETTINGS_ENV: &str = "NPF_SETTINGS";
pub const DEFAULT_SETTINGS_FILE: &str = "npf.yaml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunSettings {
    /// Active tags
    pub tags: Vec<String>,
    /// `name=value` lines applied over each testie's `%variables`
    pub variables: Vec<String>,
    /// `name=value` lines applied over each testie's `%config`
    pub config: Vec<String>,
    /// Expansion mode name (`shuffle`, `rand`, `random`, anything else is brute)
    pub expand: Option<String>,
    /// Role → node table
    pub nodes: StaticNodes,
}

impl RunSettings {
    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        info!("Loading run settings from {}", path.display());
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_yaml(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        if let Ok(path) = std::env::var(SETTINGS_ENV) {
            return Self::load(Path::new(&path));
        }
        let local = Path::new(DEFAULT_SETTINGS_FILE);
        if local.exists() {
            return Self::load(local);
        }
        debug!("no run settings found, using defaults");
        Ok(Self::default())
    }

    /// Layer command-line values on top. Tags and override lines are
    /// appended, so command-line lines win over file lines.
    pub fn merge_cli(
        &mut self,
        tags: &[String],
        variables: &[String],
        config: &[String],
        expand: Option<String>,
    ) {
        for list in tags {
            self.tags.extend(parse_tags(list));
        }
        self.variables.extend(variables.iter().cloned());
        self.config.extend(config.iter().cloned());
        if expand.is_some() {
            self.expand = expand;
        }
    }

    pub fn tags(&self) -> Tags {
        self.tags.iter().cloned().collect()
    }

    pub fn expand_mode(&self) -> ExpandMode {
        self.expand
            .as_deref()
            .and_then(|mode| mode.parse().ok())
            .unwrap_or_default()
    }

    /// Parse testie text and apply the overrides
    pub fn parse_testie(&self, name: &str, text: &str) -> Result<Testie> {
        let mut testie = Testie::parse(name, text, self.tags())
            .with_context(|| format!("Failed to parse testie {}", name))?;
        testie
            .override_variables(&self.variables)
            .with_context(|| format!("Invalid variable override for {}", name))?;
        testie
            .override_config(&self.config)
            .with_context(|| format!("Invalid config override for {}", name))?;
        Ok(testie)
    }

    /// Read, parse and override a testie file. The testie is named after
    /// the file stem.
    pub fn load_testie(&self, path: &Path) -> Result<Testie> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        self.parse_testie(&name, &text)
    }
}
