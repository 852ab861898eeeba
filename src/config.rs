//! Session configuration.
//!
//! ```toml
//! model = "2PL"
//!
//! [estimator]
//! method = "maximum_a_posteriori"
//! prior = { mean = 0.0, sd = 1.0 }
//!
//! [stopping]
//! min_items = 5
//! max_items = 20
//! min_sem = 0.3
//!
//! [selection]
//! criterion = "max_information"
//! max_exposure_rate = 0.4
//! content_quotas = { algebra = 6 }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CatError, Result};
use crate::estimation::EstimatorSettings;
use crate::item::{ItemBank, ModelFamily, DEFAULT_THRESHOLD_GAP};
use crate::selection::SelectionSettings;
use crate::stopping::StoppingRule;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatConfig {
    pub model: ModelFamily,
    /// Minimum gap enforced between GRM thresholds when loading a bank.
    pub threshold_gap: f64,
    pub estimator: EstimatorSettings,
    pub selection: SelectionSettings,
    pub stopping: StoppingRule,
}

impl Default for CatConfig {
    fn default() -> Self {
        Self {
            model: ModelFamily::TwoPl,
            threshold_gap: DEFAULT_THRESHOLD_GAP,
            estimator: EstimatorSettings::default(),
            selection: SelectionSettings::default(),
            stopping: StoppingRule::default(),
        }
    }
}

impl CatConfig {
    pub fn new(model: ModelFamily) -> Self {
        Self {
            model,
            ..Default::default()
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: CatConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| CatError::InvalidConfig(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        self.estimator.validate()?;
        self.selection.validate()?;
        self.stopping.validate()?;
        if !(self.threshold_gap > 0.0) {
            return Err(CatError::InvalidConfig(format!(
                "threshold_gap must be positive, got {}",
                self.threshold_gap
            )));
        }
        Ok(())
    }

    /// Validate the configuration together with the bank it will run on.
    pub fn validate_for(&self, bank: &ItemBank) -> Result<()> {
        self.validate()?;
        if bank.model() != self.model {
            return Err(CatError::ModelMismatch {
                bank: bank.model(),
                config: self.model,
            });
        }
        Ok(())
    }

    /// Load an item bank for the configured model.
    pub fn load_bank(&self, path: impl AsRef<Path>) -> Result<ItemBank> {
        let json = std::fs::read_to_string(path)?;
        let rows = serde_json::from_str(&json)?;
        ItemBank::from_rows_with_gap(self.model, rows, self.threshold_gap)
    }
}
