//! File I/O for feature requests.

use super::FeatureRequest;
use crate::error::{FlowError, Result};
use std::path::Path;

impl FeatureRequest {
    /// Load a feature request from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            FlowError::UserError(format!(
                "failed to read feature file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_yaml(&content).map_err(|e| match e {
            FlowError::UserError(msg) => {
                FlowError::UserError(format!("{} ({})", msg, path.display()))
            }
            other => other,
        })
    }

    /// Parse a feature request from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let request: FeatureRequest = serde_yaml::from_str(yaml)
            .map_err(|e| FlowError::UserError(format!("failed to parse feature YAML: {}", e)))?;
        if request.title.trim().is_empty() {
            return Err(FlowError::UserError(
                "feature request has an empty title\n\nFix: add a `title:` line describing the feature."
                    .to_string(),
            ));
        }
        Ok(request)
    }

    /// Serialize the feature request to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| {
            FlowError::UserError(format!("failed to serialize feature request: {}", e))
        })
    }
}
