use std::sync::Arc;

use admm_core::rule::{ClippedBalancing, FixedRho, ResidualBalancing};
use admm_core::{Certifier, CommandCertifier, CommandCertifierConfig, FixedCertifier, PenaltyUpdateRule};
use anyhow::{bail, Result};
use clap::ValueEnum;

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum RuleChoice {
    /// Residual balancing with τ_k = c / (k + 1)^p
    Reference,
    /// Constant ρ
    Fixed,
    /// Ratio balancing clipped into [1e-6, 1e6]
    Clipped,
}

pub fn rule_for_choice(choice: RuleChoice) -> Box<dyn PenaltyUpdateRule> {
    match choice {
        RuleChoice::Reference => Box::new(ResidualBalancing::default()),
        RuleChoice::Fixed => Box::new(FixedRho),
        RuleChoice::Clipped => Box::new(ClippedBalancing::default()),
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CertifierChoice {
    /// Accept every rule without a proof (weight 0.5)
    #[default]
    FixedAccept,
    /// Reject every rule before solving
    FixedReject,
    /// External tool chain from the config file's `certifier` section
    Command,
}

pub fn certifier_for_choice(
    choice: CertifierChoice,
    config: Option<&CommandCertifierConfig>,
) -> Result<Arc<dyn Certifier>> {
    match choice {
        CertifierChoice::FixedAccept => Ok(Arc::new(FixedCertifier::accept_unproven())),
        CertifierChoice::FixedReject => Ok(Arc::new(FixedCertifier::reject(["rejected by --certifier fixed-reject"]))),
        CertifierChoice::Command => match config {
            Some(config) => Ok(Arc::new(CommandCertifier::new(config.clone()))),
            None => bail!("--certifier command needs a `certifier` section in the --config file"),
        },
    }
}
