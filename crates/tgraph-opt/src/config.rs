//! Pipeline configuration loaded from JSON.

use serde::{Deserialize, Serialize};

use crate::PassError;

/// A named pass schedule plus pass-manager switches.
///
/// ```json
/// { "passes": ["eliminate_pad", "dead_code_elimination"], "trace": true }
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub passes: Vec<String>,
    /// Run `Module::validate` after every pass.
    #[serde(default = "default_true")]
    pub validate: bool,
    /// Log the module text after every pass at trace level.
    #[serde(default)]
    pub trace: bool,
    /// Finish with a dead-code sweep over every module.
    #[serde(default = "default_true")]
    pub final_dce: bool,
}

fn default_true() -> bool {
    true
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            passes: Vec::new(),
            validate: true,
            trace: false,
            final_dce: true,
        }
    }
}

impl PipelineConfig {
    pub fn with_passes<I, S>(passes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            passes: passes.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn from_json(text: &str) -> Result<Self, PassError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, PassError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_missing_fields() {
        let config = PipelineConfig::from_json(r#"{"passes": ["eliminate_pad"]}"#).unwrap();
        assert_eq!(config.passes, ["eliminate_pad"]);
        assert!(config.validate);
        assert!(!config.trace);
        assert!(config.final_dce);
    }

    #[test]
    fn json_round_trip_keeps_switches() {
        let mut config = PipelineConfig::with_passes(["simplify_algebra"]);
        config.trace = true;
        config.final_dce = false;
        let back = PipelineConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let err = PipelineConfig::from_json("{\"passes\": 3}").unwrap_err();
        assert!(matches!(err, PassError::Config(_)));
    }
}
