use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::net::NetClassifier;

/// Engine settings, loadable from a JSON file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Fraction of anchors that must agree to reuse a remembered designator
    pub match_threshold: f64,
    pub power_keywords: Vec<String>,
    pub ground_keywords: Vec<String>,
    pub anonymous_net_prefix: String,
    /// Source lines on each side of a declaration hashed into its code anchor
    pub context_lines: usize,
    /// Designator history; `None` disables remembering
    pub history_file: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let classifier = NetClassifier::default();
        EngineConfig {
            match_threshold: 0.6,
            power_keywords: classifier.power_keywords,
            ground_keywords: classifier.ground_keywords,
            anonymous_net_prefix: "ANON_NET".to_string(),
            context_lines: 2,
            history_file: None,
        }
    }
}

impl EngineConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
        let config: EngineConfig = serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file '{}'", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.match_threshold) {
            anyhow::bail!(
                "match_threshold must be between 0 and 1, got {}",
                self.match_threshold
            );
        }
        if self.anonymous_net_prefix.is_empty() {
            anyhow::bail!("anonymous_net_prefix can't be empty");
        }
        Ok(())
    }

    pub fn with_history(mut self, path: impl Into<PathBuf>) -> Self {
        self.history_file = Some(path.into());
        self
    }

    pub fn classifier(&self) -> NetClassifier {
        NetClassifier {
            power_keywords: self.power_keywords.clone(),
            ground_keywords: self.ground_keywords.clone(),
        }
    }
}
