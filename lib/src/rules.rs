// lib/src/rules.rs

use std::collections::HashMap;

use models::{DosingError, DosingResult};

use crate::config::EngineConfig;

pub const RESIDUE_THRESHOLD_ML: &str = "residue_threshold_ml";
pub const CONCENTRATION_MG_PER_ML: &str = "concentration_mg_per_ml";

/// Read-only lookup of named numeric constants. The clinical rule store is
/// an external collaborator; the engine only ever reads through this seam.
pub trait RuleStore: Send + Sync + std::fmt::Debug {
    fn numeric(&self, key: &str) -> DosingResult<f64>;
}

#[derive(Debug, Clone, Default)]
pub struct StaticRuleStore {
    values: HashMap<String, f64>,
}

impl StaticRuleStore {
    pub fn from_config(config: &EngineConfig) -> Self {
        let mut values = HashMap::new();
        values.insert(RESIDUE_THRESHOLD_ML.to_string(), config.residue_threshold_ml);
        values.insert(
            CONCENTRATION_MG_PER_ML.to_string(),
            config.concentration_mg_per_ml,
        );
        StaticRuleStore { values }
    }

    pub fn with_value(mut self, key: &str, value: f64) -> Self {
        self.values.insert(key.to_string(), value);
        self
    }
}

impl RuleStore for StaticRuleStore {
    fn numeric(&self, key: &str) -> DosingResult<f64> {
        self.values
            .get(key)
            .copied()
            .ok_or_else(|| DosingError::ConfigError(format!("no rule named '{}'", key)))
    }
}
