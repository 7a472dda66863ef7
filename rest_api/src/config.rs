// rest_api/src/config.rs

use std::fs;
use std::path::PathBuf;

use anyhow::Result;
use serde::Deserialize;

use models::{MedicationOrder, TakeHomeOrder};

/// Represents the configuration for the REST API server itself.
#[derive(Debug, Deserialize)]
pub struct RestApiConfig {
    pub port: u16,
    pub host: String,
}

/// Loads the REST API configuration. Defaults are used when no
/// `rest_api_config.yaml` is present next to the binary.
pub fn load_rest_api_config() -> Result<RestApiConfig> {
    let path = PathBuf::from("rest_api_config.yaml");
    if path.exists() {
        let content = fs::read_to_string(&path)?;
        let wrapper: RestApiConfigWrapper = serde_yaml2::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))?;
        return Ok(wrapper.rest_api);
    }
    Ok(RestApiConfig {
        port: 8082,
        host: "127.0.0.1".to_string(),
    })
}

#[derive(Debug, Deserialize)]
struct RestApiConfigWrapper {
    rest_api: RestApiConfig,
}

/// Operator-provided bootstrap data: inventory bottles, take-home orders
/// and directory rows to load into the in-memory backend at startup.
#[derive(Debug, Default, Deserialize)]
pub struct SeedData {
    #[serde(default)]
    pub bottles: Vec<BottleSeed>,
    /// Bottle loaded into the (simulated) dispensing line at startup.
    #[serde(default)]
    pub active_bottle: Option<String>,
    #[serde(default)]
    pub orders: Vec<TakeHomeOrder>,
    #[serde(default)]
    pub medication_orders: Vec<MedicationOrder>,
}

#[derive(Debug, Deserialize)]
pub struct BottleSeed {
    pub serial_no: String,
    pub volume_ml: f64,
}

#[derive(Debug, Deserialize)]
struct SeedWrapper {
    seed: SeedData,
}

/// Loads seed data from `dosing_seed.yaml` (or an explicit path). A missing
/// default file simply yields an empty seed.
pub fn load_seed_data(seed_file_path: Option<PathBuf>) -> Result<SeedData> {
    let explicit = seed_file_path.is_some();
    let path = seed_file_path.unwrap_or_else(|| PathBuf::from("dosing_seed.yaml"));
    if !path.exists() && !explicit {
        return Ok(SeedData::default());
    }
    let content = fs::read_to_string(&path)
        .map_err(|e| anyhow::anyhow!("Failed to read seed file {}: {}", path.display(), e))?;
    let wrapper: SeedWrapper = serde_yaml2::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse seed file {}: {}", path.display(), e))?;
    Ok(wrapper.seed)
}
