//! # Engine configuration
//!
//! Limits and the global month-close rule, loadable from a YAML file:
//!
//! ```yaml
//! month_close_rule:
//!   type: last_business_day
//!   value: 0
//! max_recurrence_instances: 12
//! min_installments: 2
//! max_installments: 48
//! min_installment_value: "10.00"
//! ```
//!
//! Every field is optional; missing fields take their defaults.

use anyhow::{bail, Context, Result};
use log::{debug, info};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shared::MonthCloseRule;
use std::fs;
use std::path::Path;

use crate::domain::fiscal_calendar::validate_close_rule;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Close rule for cash and debit entries
    pub month_close_rule: MonthCloseRule,
    /// Upper bound on generated instances for end-date recurrences
    pub max_recurrence_instances: usize,
    pub min_installments: u32,
    pub max_installments: u32,
    /// Smallest allowed per-installment amount
    pub min_installment_value: Decimal,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            month_close_rule: MonthCloseRule::default(),
            max_recurrence_instances: 12,
            min_installments: 2,
            max_installments: 48,
            min_installment_value: Decimal::new(1000, 2),
        }
    }
}

impl EngineConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: EngineConfig =
            serde_yaml::from_str(yaml).context("Failed to parse engine configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = fs::read_to_string(path)
            .with_context(|| format!("Failed to read engine configuration from {:?}", path))?;
        let config = Self::from_yaml_str(&yaml)?;
        info!("Loaded engine configuration from {:?}", path);
        debug!("Engine configuration: {:?}", config);
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_recurrence_instances == 0 {
            bail!("max_recurrence_instances must be at least 1");
        }
        if self.min_installments < 1 || self.min_installments > self.max_installments {
            bail!(
                "Installment limits are inconsistent: min {} / max {}",
                self.min_installments,
                self.max_installments
            );
        }
        if self.min_installment_value < Decimal::ZERO {
            bail!("min_installment_value cannot be negative");
        }
        validate_close_rule(&self.month_close_rule)?;
        Ok(())
    }
}
