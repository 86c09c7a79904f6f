//! Runtime settings management

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Runtime settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub simulation: SimulationSettings,
    pub snapshot: SnapshotSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationSettings {
    pub ticks: u64,
    pub spawn_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotSettings {
    pub write_on_exit: bool,
    pub path: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            simulation: SimulationSettings {
                ticks: 60,
                spawn_count: 100,
            },
            snapshot: SnapshotSettings {
                write_on_exit: false,
                path: "world.snapshot".to_string(),
            },
        }
    }
}

impl Settings {
    /// Load settings from a JSON file, falling back to defaults when
    /// the file does not exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!(?path, "settings file not found, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading settings from {}", path.display()))?;
        let settings = serde_json::from_str(&text)
            .with_context(|| format!("parsing settings from {}", path.display()))?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_round_trip() {
        let settings = Settings::default();
        let text = serde_json::to_string(&settings).unwrap();
        let back: Settings = serde_json::from_str(&text).unwrap();
        assert_eq!(back.simulation.ticks, settings.simulation.ticks);
        assert_eq!(back.snapshot.path, settings.snapshot.path);
    }

    #[test]
    fn test_missing_file_falls_back() {
        let settings = Settings::load(Path::new("/nonexistent/strata.json")).unwrap();
        assert_eq!(settings.simulation.ticks, 60);
    }
}
