// lib/src/config.rs

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// What happens to the residue measured in a returned container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResiduePolicy {
    /// Residue is destroyed: the source bottle is debited and the return
    /// ledger entry carries a negative quantity.
    WriteOff,
    /// Residue re-enters usable stock: the source bottle is credited.
    Restock,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Formulation concentration used to convert daily_dose_mg to ml.
    pub concentration_mg_per_ml: f64,
    /// Residue above this estimate triggers an excessive_residue hold.
    pub residue_threshold_ml: f64,
    pub residue_policy: ResiduePolicy,
    /// Upper bound on one dispensing-device round trip.
    pub device_timeout_ms: u64,
    /// Age after which a pending dose event is picked up by reconciliation.
    pub stale_dose_event_secs: i64,
    pub reconcile_interval_secs: u64,
    /// Dispensing device line identifier reported on dose events.
    pub device_id: String,
    /// Address of the RS-232 bridge; the simulated gateway is used when absent.
    pub device_addr: Option<String>,
    /// MessagePack snapshot path for the in-memory store.
    pub snapshot_path: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            concentration_mg_per_ml: 10.0,
            residue_threshold_ml: 1.0,
            residue_policy: ResiduePolicy::WriteOff,
            device_timeout_ms: 5_000,
            stale_dose_event_secs: 300,
            reconcile_interval_secs: 60,
            device_id: "disp-01".to_string(),
            device_addr: None,
            snapshot_path: None,
        }
    }
}

// Wrapper matching the `dosing:` key in dosing_config.yaml.
#[derive(Debug, Deserialize)]
struct EngineConfigWrapper {
    dosing: EngineConfig,
}

/// Loads the engine configuration from `dosing_config.yaml`. Falls back to
/// defaults when no file exists at the default location; an explicitly
/// provided path must parse.
pub fn load_engine_config(config_file_path: Option<PathBuf>) -> Result<EngineConfig> {
    let explicit = config_file_path.is_some();
    let path_to_use = config_file_path.unwrap_or_else(|| PathBuf::from("dosing_config.yaml"));

    if !path_to_use.exists() && !explicit {
        log::info!(
            "no engine config at {}; using defaults",
            path_to_use.display()
        );
        return Ok(EngineConfig::default());
    }

    let config_content = fs::read_to_string(&path_to_use)
        .with_context(|| format!("Failed to read engine config file {}", path_to_use.display()))?;

    let wrapper: EngineConfigWrapper = serde_yaml2::from_str(&config_content)
        .map_err(|e| anyhow::anyhow!("Failed to parse engine config file {}: {}", path_to_use.display(), e))?;

    Ok(wrapper.dosing)
}
