//! Configuration structures for the auction replay system.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Main configuration for a replay run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Auction record column names.
    pub columns: ColumnConfig,
    /// Partner reference table column names.
    pub partners: PartnerColumnConfig,
    /// Output configuration.
    pub output: OutputConfig,
}

impl Config {
    /// Load a configuration override from a JSON file.
    ///
    /// Any field left out of the file keeps its default.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that column names are usable.
    pub fn validate(&self) -> Result<()> {
        let record_columns = [
            ("timestamp", &self.columns.timestamp),
            ("summary", &self.columns.summary),
            ("model_output", &self.columns.model_output),
            ("winner_id", &self.columns.winner_id),
            ("winning_bid", &self.columns.winning_bid),
            ("lead_id", &self.columns.lead_id),
        ];
        for (field, name) in record_columns {
            if name.trim().is_empty() {
                return Err(Error::config(format!("columns.{field} must not be empty")));
            }
            if *name == self.output.result_column {
                return Err(Error::config(format!(
                    "output.result_column '{}' collides with columns.{field}",
                    name
                )));
            }
        }

        let partner_columns = [
            ("id", &self.partners.id),
            ("target_cpa", &self.partners.target_cpa),
            ("budget", &self.partners.budget),
        ];
        for (field, name) in partner_columns {
            if name.trim().is_empty() {
                return Err(Error::config(format!("partners.{field} must not be empty")));
            }
        }

        if self.output.result_column.trim().is_empty() {
            return Err(Error::config("output.result_column must not be empty"));
        }
        Ok(())
    }
}

/// Column names in the auction record table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnConfig {
    /// Sortable timestamp column.
    pub timestamp: String,
    /// Auction summary (JSON or Python literal list of `{BID, BROKER_ID}`).
    pub summary: String,
    /// Model payload JSON with the per-bidder `bids` mapping.
    pub model_output: String,
    /// Historical winner id.
    pub winner_id: String,
    /// Historical winning bid.
    pub winning_bid: String,
    /// Lead identifier (optional in the data, used by loss analysis).
    pub lead_id: String,
}

impl Default for ColumnConfig {
    fn default() -> Self {
        Self {
            timestamp: "RECORD_DATE_TIME_UTC".to_string(),
            summary: "AUCTION_SUMMARY".to_string(),
            model_output: "MODEL_OUTPUT".to_string(),
            winner_id: "BROKER_ID".to_string(),
            winning_bid: "BID_VALUE".to_string(),
            lead_id: "LEAD_ID".to_string(),
        }
    }
}

/// Column names in the partner reference table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PartnerColumnConfig {
    /// Partner id.
    pub id: String,
    /// Target CPA used in bid recalculation.
    pub target_cpa: String,
    /// Starting budget.
    pub budget: String,
}

impl Default for PartnerColumnConfig {
    fn default() -> Self {
        Self {
            id: "PARTNER_ID".to_string(),
            target_cpa: "Simulated CPA".to_string(),
            budget: "Budget".to_string(),
        }
    }
}

/// Output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Name of the appended per-auction result column.
    pub result_column: String,
    /// Number of partners with the most remaining budget to log at run end.
    pub top_n_budgets: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            result_column: "CUMULATIVE_RERUN_SUMMARY".to_string(),
            top_n_budgets: 10,
        }
    }
}
