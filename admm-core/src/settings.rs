//! Evaluator configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::admm::AdmmSettings;
use crate::gate::CommandCertifierConfig;
use crate::problem::InstanceShape;

/// Evaluator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorSettings {
    // === Instance ===
    /// Seed of the synthetic instance; shared by every candidate.
    pub seed: u64,

    /// Instance shape and constants.
    pub instance: InstanceShape,

    // === Solver ===
    /// ADMM settings.
    pub admm: AdmmSettings,

    // === Gate ===
    /// Time limit of the proof verifier in seconds.
    pub proof_timeout_secs: u64,

    // === Output ===
    /// Attach diagnostics, hint, timings and the instance fingerprint to
    /// converged results.
    pub rich_feedback: bool,
}

impl Default for EvaluatorSettings {
    fn default() -> Self {
        Self {
            seed: 0,
            instance: InstanceShape::default(),
            admm: AdmmSettings::default(),
            proof_timeout_secs: 120,
            rich_feedback: false,
        }
    }
}

impl EvaluatorSettings {
    pub fn with_rich_feedback(mut self, enabled: bool) -> Self {
        self.rich_feedback = enabled;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_admm(mut self, admm: AdmmSettings) -> Self {
        self.admm = admm;
        self
    }

    pub fn proof_timeout(&self) -> Duration {
        Duration::from_secs(self.proof_timeout_secs)
    }

    /// Reject settings the solver cannot run with.
    pub fn validate(&self) -> Result<(), InvalidSettings> {
        self.instance.validate().map_err(InvalidSettings)?;
        if self.admm.max_iters == 0 {
            return Err(InvalidSettings("max_iters must be positive".to_string()));
        }
        if !(self.admm.rho0.is_finite() && self.admm.rho0 > 0.0) {
            return Err(InvalidSettings(format!(
                "rho0 must be finite and positive, got {}",
                self.admm.rho0
            )));
        }
        if !(self.admm.abstol >= 0.0 && self.admm.reltol >= 0.0) {
            return Err(InvalidSettings("tolerances must be non-negative".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("Invalid settings: {0}")]
pub struct InvalidSettings(pub String);

/// Layout of a JSON config file: evaluator settings plus an optional
/// external certifier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HarnessConfig {
    #[serde(flatten)]
    pub evaluator: EvaluatorSettings,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certifier: Option<CommandCertifierConfig>,
}

impl HarnessConfig {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admm::RhoPolicy;

    #[test]
    fn test_defaults() {
        let s = EvaluatorSettings::default();
        assert_eq!(s.seed, 0);
        assert!(!s.rich_feedback);
        assert_eq!(s.admm.max_iters, 2000);
        assert_eq!(s.admm.rho0, 0.5);
        assert_eq!(s.admm.rule_params.mu, 3.0);
        assert_eq!(s.admm.rho_policy, RhoPolicy::Reject);
        assert_eq!(s.proof_timeout(), Duration::from_secs(120));
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = HarnessConfig::from_json(
            r#"{"rich_feedback": true, "admm": {"max_iters": 500, "rho_policy": "pass_through"}}"#,
        )
        .unwrap();
        assert!(config.evaluator.rich_feedback);
        assert_eq!(config.evaluator.admm.max_iters, 500);
        assert_eq!(config.evaluator.admm.rho_policy, RhoPolicy::PassThrough);
        assert_eq!(config.evaluator.admm.rho0, 0.5);
        assert_eq!(config.evaluator.instance, InstanceShape::default());
        assert!(config.certifier.is_none());
    }

    #[test]
    fn test_certifier_section() {
        let config = HarnessConfig::from_json(
            r#"{
                "seed": 3,
                "certifier": {
                    "translate": {"program": "t"},
                    "check": {"program": "c"},
                    "prove": {"program": "p"},
                    "verify": {"program": "lake", "args": ["env", "lean"]},
                    "proof_dir": "proofs"
                }
            }"#,
        )
        .unwrap();
        assert_eq!(config.evaluator.seed, 3);
        let certifier = config.certifier.unwrap();
        assert_eq!(certifier.verify.program, "lake");
        assert_eq!(certifier.proof_dir, std::path::PathBuf::from("proofs"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut s = EvaluatorSettings::default();
        s.admm.rho0 = 0.0;
        assert!(s.validate().is_err());

        let s = EvaluatorSettings::default().with_admm(AdmmSettings::default().with_max_iters(0));
        assert!(s.validate().is_err());

        let mut s = EvaluatorSettings::default();
        s.instance.sparsity = 100;
        assert!(s.validate().is_err());
    }
}
