use serde::{Deserialize, Serialize};
use tree_em::EmConfig;

/// Search settings, readable from a JSON file. Every field is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    /// Worker threads; 0 uses every core. Default: 0
    pub threads: usize,
    /// Base seed for random restarts. Default: 42
    pub seed: u64,
    /// Minimum improvement to accept a step; must not be negative. Default: 0.01
    pub threshold: f64,
    /// Candidates kept after screening. Default: 10
    pub screening_size: usize,
    /// Rounds of expand, adjust, simplify. Default: 20
    pub max_rounds: usize,
    /// Accepted steps per procedure. Default: 100
    pub max_iterations: usize,
    /// Show progress bars over candidate estimation. Default: false
    pub show_progress: bool,
    pub screening: EmConfig,
    pub selection: EmConfig,
    pub estimation: EmConfig,
}

impl Default for SearchSettings {
    fn default() -> Self {
        SearchSettings {
            threads: 0,
            seed: 42,
            threshold: 0.01,
            screening_size: 10,
            max_rounds: 20,
            max_iterations: 100,
            show_progress: false,
            screening: EmConfig::screening(),
            selection: EmConfig::selection(),
            estimation: EmConfig::estimation(),
        }
    }
}

impl SearchSettings {
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        let settings: SearchSettings = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_json_file(file: &str) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(file)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {}", file, e))?;
        Self::from_json_str(&json).map_err(|e| anyhow::anyhow!("{}: {}", file, e))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.threshold >= 0.0) {
            anyhow::bail!("threshold must be non-negative, got {}", self.threshold);
        }
        if self.screening_size == 0 {
            anyhow::bail!("screening_size must be positive");
        }
        Ok(())
    }

    /// Threads to build the pool with
    pub fn num_threads(&self) -> usize {
        if self.threads == 0 {
            num_cpus::get()
        } else {
            self.threads
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json() {
        let s = SearchSettings::from_json_str(r#"{"threads": 2, "selection": {"restarts": 7}}"#)
            .unwrap();
        assert_eq!(s.threads, 2);
        assert_eq!(s.selection.restarts, 7);
        // fields absent from the nested object fall back to EmConfig::default
        assert_eq!(s.selection.max_steps, EmConfig::default().max_steps);
        assert_eq!(s.screening_size, 10);
        assert!(SearchSettings::from_json_str(r#"{"threshold": -1}"#).is_err());
    }
}
