use std::{error::Error, path::Path};

use opgraph::ValidationLevel;
use serde::Deserialize;

/// Settings shared by all subcommands. Also defines the config file format
/// (Option fields can be omitted).
#[derive(Debug, Default, Deserialize)]
pub struct AppConfig {
  /// Checking performed on every emitted model
  pub validation: Option<ValidationLevel>,
  /// Fold known values while building
  pub propagate: Option<bool>,
  /// Iteration cap of the reference evaluator
  pub max_iterations: Option<usize>,
}

impl AppConfig {
  pub fn load(path: &Path) -> Result<Self, Box<dyn Error>> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&text)?)
  }

  // merge configs where the second overwrites the first
  pub fn merge(self, other: Self) -> Self {
    Self {
      validation: other.validation.or(self.validation),
      propagate: other.propagate.or(self.propagate),
      max_iterations: other.max_iterations.or(self.max_iterations),
    }
  }
}
