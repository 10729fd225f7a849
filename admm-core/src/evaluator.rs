//! Evaluation entry point.
//!
//! ```text
//! load ──► pre-check ──► solve ──► prove ──► score
//!  │           │            │
//!  ▼           ▼            ▼
//! ERROR or   FORMAL_      EXCEPTION
//! EXCEPTION  REJECTED
//! ```
//!
//! Every path ends in an [`EvaluationResult`]; nothing escapes to the caller.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde_json::{Map, Value};

use crate::admm::AdmmSolver;
use crate::gate::{Certifier, FormalGate, Precheck};
use crate::loader::load_candidate;
use crate::problem::ProblemInstance;
use crate::result::{format_eval_time, EvalStatus, EvaluationResult};
use crate::scoring::ConvergenceScorer;
use crate::settings::{EvaluatorSettings, InvalidSettings};
use crate::util::{catch_panic, Phase, PhaseTimers};

/// Scores candidate files. Shareable across worker threads.
pub struct Evaluator {
    settings: EvaluatorSettings,
    gate: FormalGate,
    scorer: ConvergenceScorer,
}

impl Evaluator {
    /// Fails when `settings` describe an instance or solver the harness
    /// cannot run.
    pub fn new(settings: EvaluatorSettings, certifier: Arc<dyn Certifier>) -> Result<Self, InvalidSettings> {
        settings.validate()?;
        let gate = FormalGate::new(certifier, settings.proof_timeout());
        let scorer = ConvergenceScorer::new(settings.rich_feedback);
        Ok(Self { settings, gate, scorer })
    }

    pub fn settings(&self) -> &EvaluatorSettings {
        &self.settings
    }

    /// Evaluate the candidate at `program_path`.
    pub fn evaluate(&self, program_path: impl AsRef<Path>) -> EvaluationResult {
        let path = program_path.as_ref();
        let result = match catch_panic(|| self.evaluate_inner(path)) {
            Ok(result) => result,
            Err(caught) => EvaluationResult::exception(format!("evaluator panicked: {}", caught.message), caught.backtrace),
        };

        match result.status() {
            EvalStatus::Converged | EvalStatus::DidNotConverge => tracing::info!(
                path = %path.display(),
                status = %result.status(),
                iters = result.metrics.iters,
                score = result.combined_score,
                "candidate evaluated"
            ),
            status => tracing::warn!(path = %path.display(), %status, "candidate scored zero"),
        }
        result
    }

    fn evaluate_inner(&self, path: &Path) -> EvaluationResult {
        let start = Instant::now();
        let mut timers = PhaseTimers::default();

        let loaded = {
            let _t = timers.scoped(Phase::Load);
            load_candidate(path)
        };
        let candidate = match loaded {
            Ok(candidate) => candidate,
            Err(err) if err.is_contract_violation() => return EvaluationResult::contract_missing(err.to_string()),
            Err(err) => return EvaluationResult::exception(err.to_string(), err.traceback()),
        };

        let precheck = {
            let _t = timers.scoped(Phase::Precheck);
            self.gate.precheck(candidate.source())
        };
        let form = match precheck {
            Precheck::Accepted(form) => form,
            Precheck::Rejected(issues) => return EvaluationResult::formal_rejected(issues, start.elapsed()),
        };

        let (instance, solved) = {
            let _t = timers.scoped(Phase::Solve);
            let instance = ProblemInstance::generate_with_shape(self.settings.seed, &self.settings.instance);
            let solved = AdmmSolver::new(&instance, &self.settings.admm).run(&candidate.rule);
            (instance, solved)
        };
        let trace = match solved {
            Ok(trace) => trace,
            Err(err) => return EvaluationResult::exception(err.to_string(), err.traceback()),
        };
        let eval_time = start.elapsed();

        let certification = {
            let _t = timers.scoped(Phase::Prove);
            self.gate.certify(&form)
        };

        let (score, diagnostics) = {
            let _t = timers.scoped(Phase::Score);
            (self.scorer.score(&trace, certification), self.scorer.diagnostics(&trace))
        };

        let status = if trace.converged {
            EvalStatus::Converged
        } else {
            EvalStatus::DidNotConverge
        };
        let mut artifacts = Map::new();
        artifacts.insert("status".into(), Value::from(status.as_str()));
        artifacts.insert("iterations".into(), Value::from(trace.iters));
        artifacts.insert("eval_time".into(), Value::from(format_eval_time(eval_time)));

        if let Some(diag) = diagnostics {
            artifacts.insert("hint".into(), Value::from(diag.hint.text()));
            artifacts.insert("diagnostics".into(), serde_json::to_value(&diag).unwrap_or(Value::Null));
            artifacts.insert("instance_fingerprint".into(), Value::from(instance.fingerprint()));
            artifacts.insert("timings".into(), timers.to_json());
        }

        EvaluationResult::completed(trace.converged, trace.iters, score, certification.label(), artifacts)
    }
}
