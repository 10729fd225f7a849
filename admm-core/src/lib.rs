//! admm-core: a scoring harness for adaptive-ρ ADMM penalty rules
//!
//! The library evaluates candidate *penalty-update rules* for the Alternating
//! Direction Method of Multipliers applied to a fixed synthetic LASSO
//! instance, and turns each run into a bounded scalar fitness for an outer
//! program-search loop.
//!
//! # Pipeline
//!
//! - **Loading**: a candidate is a `.rho` script (see [`script`]) that must
//!   define `update_rho(rho, k, r_norm, s_norm, mu = .., c = .., p = ..)`.
//! - **Formal gate**: an external certifier checks the rule for conformance
//!   before solving and tries to prove it afterwards (see [`gate`]).
//! - **Solve**: deterministic ADMM on the instance generated from a fixed
//!   seed, with ρ adapted by the candidate after every non-terminal
//!   iteration (see [`admm`]).
//! - **Score**: `weight · (1 / iters)` for converged runs, `0` otherwise
//!   (see [`scoring`]).
//!
//! Faults in candidate code never escape: every outcome is an
//! [`EvaluationResult`] with status `CONVERGED`, `DID NOT CONVERGE`,
//! `FORMAL_REJECTED`, `ERROR` or `EXCEPTION`.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use admm_core::{Evaluator, EvaluatorSettings, FixedCertifier};
//!
//! let evaluator = Evaluator::new(
//!     EvaluatorSettings::default().with_rich_feedback(true),
//!     Arc::new(FixedCertifier::accept_unproven()),
//! )?;
//! let result = evaluator.evaluate("candidates/reference.rho");
//!
//! println!("{}", result.to_json());
//! ```

#![allow(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::too_many_arguments)]

pub mod admm;
pub mod evaluator;
pub mod gate;
pub mod linalg;
pub mod loader;
pub mod problem;
pub mod result;
pub mod rule;
pub mod scoring;
pub mod script;
pub mod settings;
pub mod util;

use std::path::Path;
use std::sync::Arc;

// Re-export main types
pub use admm::{AdmmSettings, AdmmSolver, RhoPolicy, SolveError, Trace};
pub use evaluator::Evaluator;
pub use gate::{
    Certification, Certifier, CommandCertifier, CommandCertifierConfig, FixedCertifier, FormalGate, ProofVerdict,
};
pub use loader::{load_candidate, LoadError, LoadedCandidate, ScriptRule};
pub use problem::{InstanceShape, ProblemInstance};
pub use result::{EvalStatus, EvaluationResult, Metrics};
pub use rule::{PenaltyUpdateRule, RhoInput, RhoMode, RhoUpdate, RuleFault, RuleParams};
pub use scoring::{combined_score, ConvergenceScorer, Diagnostics};
pub use settings::{EvaluatorSettings, HarnessConfig, InvalidSettings};

/// Evaluate a candidate with default settings, accepting every rule
/// without a proof (certification weight 0.5).
pub fn evaluate(program_path: impl AsRef<Path>) -> EvaluationResult {
    match Evaluator::new(EvaluatorSettings::default(), Arc::new(FixedCertifier::accept_unproven())) {
        Ok(evaluator) => evaluator.evaluate(program_path),
        Err(err) => EvaluationResult::exception(err.to_string(), String::new()),
    }
}
