//! Penalty-update rule contract.
//!
//! A rule maps the current penalty ρ, the iteration index and the two
//! residual norms to the next ρ:
//!
//! ```text
//! (ρ_k, k, ‖r_k‖, ‖s_k‖; μ, c, p)  ↦  (ρ_{k+1}, aux, mode)
//! ```
//!
//! `aux` and `mode` are descriptive only. The solver records them and never
//! branches on them.

pub mod builtin;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::catch_panic;

pub use builtin::{ClippedBalancing, FixedRho, ResidualBalancing};

/// Fixed hyperparameters handed to every rule invocation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleParams {
    /// Residual-imbalance threshold μ
    pub mu: f64,

    /// Step-size scale c
    pub c: f64,

    /// Step-size decay exponent p (> 1 keeps the steps summable)
    pub p: f64,
}

impl Default for RuleParams {
    fn default() -> Self {
        Self { mu: 3.0, c: 1.0, p: 1.2 }
    }
}

/// Arguments of one rule invocation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RhoInput {
    pub rho: f64,
    pub k: usize,
    pub r_norm: f64,
    pub s_norm: f64,
    pub params: RuleParams,
}

/// Label a rule attaches to its update.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RhoMode {
    Mul,
    Div,
    Keep,
    /// Any label outside {mul, div, keep}; accepted as-is.
    Other(String),
}

impl RhoMode {
    pub fn from_label(label: &str) -> Self {
        match label {
            "mul" => RhoMode::Mul,
            "div" => RhoMode::Div,
            "keep" => RhoMode::Keep,
            other => RhoMode::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            RhoMode::Mul => "mul",
            RhoMode::Div => "div",
            RhoMode::Keep => "keep",
            RhoMode::Other(label) => label,
        }
    }
}

impl fmt::Display for RhoMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one rule invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct RhoUpdate {
    pub rho: f64,
    pub aux: f64,
    pub mode: RhoMode,
}

/// What went wrong inside a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultKind {
    /// The rule raised deliberately.
    Raised,
    /// The rule hit a runtime error (type error, unknown name, limits).
    Runtime,
    /// The rule returned something other than `(number, number, string)`.
    BadReturn,
    /// Rule code panicked.
    Panicked,
}

/// A fault raised by rule code, with its diagnostic trace.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct RuleFault {
    pub kind: FaultKind,
    pub message: String,
    pub traceback: String,
}

impl RuleFault {
    pub fn new(kind: FaultKind, message: impl Into<String>, traceback: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            traceback: traceback.into(),
        }
    }
}

/// A penalty-update rule.
///
/// Implementations must be stateless across calls: repeated evaluations of
/// the same rule on the same instance have to reproduce the same trace.
pub trait PenaltyUpdateRule {
    /// Short human-readable name.
    fn name(&self) -> &str;

    /// Compute the next penalty.
    fn update(&self, input: &RhoInput) -> Result<RhoUpdate, RuleFault>;
}

/// Invoke `rule`, converting a panic inside it into a [`RuleFault`].
pub fn invoke_guarded(rule: &dyn PenaltyUpdateRule, input: &RhoInput) -> Result<RhoUpdate, RuleFault> {
    match catch_panic(|| rule.update(input)) {
        Ok(result) => result,
        Err(caught) => Err(RuleFault::new(
            FaultKind::Panicked,
            format!("rule `{}` panicked: {}", rule.name(), caught.message),
            caught.backtrace,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Panicky;

    impl PenaltyUpdateRule for Panicky {
        fn name(&self) -> &str {
            "panicky"
        }

        fn update(&self, _input: &RhoInput) -> Result<RhoUpdate, RuleFault> {
            panic!("index out of bounds")
        }
    }

    fn input() -> RhoInput {
        RhoInput {
            rho: 1.0,
            k: 0,
            r_norm: 1.0,
            s_norm: 1.0,
            params: RuleParams::default(),
        }
    }

    #[test]
    fn test_mode_labels() {
        assert_eq!(RhoMode::from_label("mul"), RhoMode::Mul);
        assert_eq!(RhoMode::from_label("div"), RhoMode::Div);
        assert_eq!(RhoMode::from_label("keep"), RhoMode::Keep);
        assert_eq!(RhoMode::from_label("grow"), RhoMode::Other("grow".into()));
        assert_eq!(RhoMode::from_label("grow").as_str(), "grow");
    }

    #[test]
    fn test_guarded_invocation_catches_panic() {
        let fault = invoke_guarded(&Panicky, &input()).unwrap_err();
        assert_eq!(fault.kind, FaultKind::Panicked);
        assert!(fault.message.contains("index out of bounds"));
        assert!(!fault.traceback.is_empty());
    }

    #[test]
    fn test_guarded_invocation_passes_result() {
        let update = invoke_guarded(&FixedRho, &input()).unwrap();
        assert_eq!(update.rho, 1.0);
        assert_eq!(update.mode, RhoMode::Keep);
    }
}
