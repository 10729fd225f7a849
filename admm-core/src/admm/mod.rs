//! Adaptive-ρ ADMM for the LASSO instance.
//!
//! The recursion is fixed; only the penalty ρ is adapted, by the supplied
//! [`PenaltyUpdateRule`]:
//!
//! ```text
//! x⁺ = (AᵀA + ρI)⁻¹ (Aᵀb + ρz − y)
//! z⁺ = S_{λ/ρ}(x⁺ + y/ρ)
//! y⁺ = y + ρ(x⁺ − z⁺)
//! ```
//!
//! with primal residual r = x⁺ − z⁺ and dual residual s = ρ(z⁺ − z).

pub mod termination;

use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::linalg::{LinalgError, NormalEqnsSolver};
use crate::problem::ProblemInstance;
use crate::rule::{invoke_guarded, PenaltyUpdateRule, RhoInput, RhoMode, RuleFault, RuleParams};

pub use termination::{StoppingCriteria, Tolerances};

/// What to do with the ρ a rule returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RhoPolicy {
    /// Abort the run on a non-positive or non-finite ρ.
    #[default]
    Reject,

    /// Feed any ρ to the next iteration unchanged.
    PassThrough,
}

/// ADMM solver settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmmSettings {
    /// Maximum number of iterations
    pub max_iters: usize,

    /// Initial penalty ρ₀
    pub rho0: f64,

    /// Absolute stopping tolerance
    pub abstol: f64,

    /// Relative stopping tolerance
    pub reltol: f64,

    /// Fixed hyperparameters passed to the rule
    pub rule_params: RuleParams,

    /// Validation of rule-returned ρ
    pub rho_policy: RhoPolicy,

    /// Emit per-iteration debug events
    pub verbose: bool,

    /// Iteration stride for debug events
    pub log_every: usize,
}

impl Default for AdmmSettings {
    fn default() -> Self {
        Self {
            max_iters: 2000,
            rho0: 0.5,
            abstol: 1e-4,
            reltol: 1e-3,
            rule_params: RuleParams::default(),
            rho_policy: RhoPolicy::Reject,
            verbose: false,
            log_every: 50,
        }
    }
}

impl AdmmSettings {
    pub fn with_max_iters(mut self, max_iters: usize) -> Self {
        self.max_iters = max_iters;
        self
    }

    pub fn with_rho_policy(mut self, policy: RhoPolicy) -> Self {
        self.rho_policy = policy;
        self
    }

    pub fn verbose(mut self) -> Self {
        self.verbose = true;
        self
    }

    pub fn criteria(&self) -> StoppingCriteria {
        StoppingCriteria {
            abstol: self.abstol,
            reltol: self.reltol,
            ..Default::default()
        }
    }

    #[inline]
    fn should_log(&self, k: usize) -> bool {
        self.verbose && self.log_every > 0 && k % self.log_every == 0
    }
}

/// Counts of the mode labels a rule returned over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ModeCounts {
    pub mul: usize,
    pub div: usize,
    pub keep: usize,
    pub other: usize,
}

/// Convergence trace of one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trace {
    /// Primal residual norm per iteration
    pub r_hist: Vec<f64>,

    /// Dual residual norm per iteration
    pub s_hist: Vec<f64>,

    /// ρ used in each iteration
    pub rho_hist: Vec<f64>,

    /// aux value of each rule invocation
    pub aux_hist: Vec<f64>,

    /// Mode label of each rule invocation
    pub mode_hist: Vec<RhoMode>,

    /// Whether the stopping criteria were met
    pub converged: bool,

    /// Terminating iteration count
    pub iters: usize,
}

impl Trace {
    fn with_capacity(n: usize) -> Self {
        Self {
            r_hist: Vec::with_capacity(n),
            s_hist: Vec::with_capacity(n),
            rho_hist: Vec::with_capacity(n),
            aux_hist: Vec::with_capacity(n),
            mode_hist: Vec::with_capacity(n),
            converged: false,
            iters: 0,
        }
    }

    pub fn final_r_norm(&self) -> Option<f64> {
        self.r_hist.last().copied()
    }

    pub fn final_s_norm(&self) -> Option<f64> {
        self.s_hist.last().copied()
    }

    /// Population variance of the ρ trajectory.
    pub fn rho_variance(&self) -> f64 {
        let n = self.rho_hist.len();
        if n == 0 {
            return 0.0;
        }
        let mean = self.rho_hist.iter().sum::<f64>() / n as f64;
        self.rho_hist.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n as f64
    }

    pub fn mode_counts(&self) -> ModeCounts {
        let mut counts = ModeCounts::default();
        for mode in &self.mode_hist {
            match mode {
                RhoMode::Mul => counts.mul += 1,
                RhoMode::Div => counts.div += 1,
                RhoMode::Keep => counts.keep += 1,
                RhoMode::Other(_) => counts.other += 1,
            }
        }
        counts
    }
}

/// Reasons a run ends without a trace.
#[derive(Debug, Error)]
pub enum SolveError {
    /// The rule faulted.
    #[error("penalty rule failed at iteration {k}: {fault}")]
    Rule { k: usize, fault: RuleFault },

    /// The rule returned a ρ rejected by [`RhoPolicy::Reject`].
    #[error("penalty rule returned invalid rho {rho} at iteration {k}")]
    InvalidRho { k: usize, rho: f64 },

    /// The x-update could not be solved.
    #[error("x-update failed at iteration {k}: {error}")]
    Linalg { k: usize, error: LinalgError },
}

impl SolveError {
    /// Diagnostic trace for the EXCEPTION result.
    pub fn traceback(&self) -> String {
        match self {
            SolveError::Rule { fault, .. } => fault.traceback.clone(),
            SolveError::InvalidRho { k, rho } => format!(
                "rule output rejected after iteration {k}: rho must be finite and positive, got {rho}"
            ),
            SolveError::Linalg { k, error } => format!("linear solve at iteration {k}: {error}"),
        }
    }
}

/// Iterates owned by one run.
struct SolverState {
    x: DVector<f64>,
    z: DVector<f64>,
    y: DVector<f64>,
    rho: f64,
}

impl SolverState {
    fn new(d: usize, rho0: f64) -> Self {
        Self {
            x: DVector::zeros(d),
            z: DVector::zeros(d),
            y: DVector::zeros(d),
            rho: rho0,
        }
    }
}

/// Elementwise soft-threshold S_κ(u) = sign(u)·max(|u| − κ, 0).
pub fn soft_threshold(u: &DVector<f64>, kappa: f64) -> DVector<f64> {
    u.map(|v| {
        let shrunk = (v.abs() - kappa).max(0.0);
        if v > 0.0 {
            shrunk
        } else if v < 0.0 {
            -shrunk
        } else {
            0.0
        }
    })
}

/// ADMM solver bound to one instance.
pub struct AdmmSolver<'a> {
    instance: &'a ProblemInstance,
    settings: &'a AdmmSettings,
}

impl<'a> AdmmSolver<'a> {
    pub fn new(instance: &'a ProblemInstance, settings: &'a AdmmSettings) -> Self {
        Self { instance, settings }
    }

    /// Run to convergence or `max_iters`, adapting ρ with `rule`.
    pub fn run(&self, rule: &dyn PenaltyUpdateRule) -> Result<Trace, SolveError> {
        let settings = self.settings;
        let inst = self.instance;
        let d = inst.num_features();
        let lambda = inst.lambda;
        let criteria = settings.criteria();

        let mut normal = NormalEqnsSolver::new(&inst.A, &inst.b);
        let mut state = SolverState::new(d, settings.rho0);
        let mut trace = Trace::with_capacity(settings.max_iters.min(4096));

        for k in 0..settings.max_iters {
            let rho = state.rho;

            let rhs = normal.atb() + &state.z * rho - &state.y;
            state.x = normal
                .solve(rho, &rhs)
                .map_err(|error| SolveError::Linalg { k, error })?;

            let z_old = std::mem::replace(
                &mut state.z,
                soft_threshold(&(&state.x + &state.y / rho), lambda / rho),
            );

            let r = &state.x - &state.z;
            let s = (&state.z - &z_old) * rho;
            state.y += &r * rho;

            let r_norm = r.norm();
            let s_norm = s.norm();

            trace.r_hist.push(r_norm);
            trace.s_hist.push(s_norm);
            trace.rho_hist.push(rho);

            let tol = criteria.tolerances(d, state.x.norm(), state.z.norm(), state.y.norm(), rho);

            if settings.should_log(k) {
                tracing::debug!(
                    k,
                    r_norm,
                    s_norm,
                    eps_pri = tol.eps_pri,
                    eps_dual = tol.eps_dual,
                    rho,
                    "admm iteration"
                );
            }

            if criteria.is_met(r_norm, s_norm, &tol) {
                trace.converged = true;
                trace.iters = k + 1;
                tracing::debug!(
                    rule = rule.name(),
                    iters = trace.iters,
                    factorizations = normal.factorizations(),
                    "admm converged"
                );
                return Ok(trace);
            }

            let input = RhoInput {
                rho,
                k,
                r_norm,
                s_norm,
                params: settings.rule_params,
            };
            let update = invoke_guarded(rule, &input).map_err(|fault| SolveError::Rule { k, fault })?;

            if settings.rho_policy == RhoPolicy::Reject && !(update.rho.is_finite() && update.rho > 0.0) {
                return Err(SolveError::InvalidRho { k, rho: update.rho });
            }

            trace.aux_hist.push(update.aux);
            trace.mode_hist.push(update.mode);
            state.rho = update.rho;
        }

        trace.converged = false;
        trace.iters = settings.max_iters;
        tracing::debug!(rule = rule.name(), iters = trace.iters, "admm hit max_iters");
        Ok(trace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::InstanceShape;
    use crate::rule::{FaultKind, FixedRho, ResidualBalancing, RhoUpdate};

    /// Returns ρ unchanged but with an arbitrary label.
    struct Labelled(&'static str);

    impl PenaltyUpdateRule for Labelled {
        fn name(&self) -> &str {
            "labelled"
        }

        fn update(&self, input: &RhoInput) -> Result<RhoUpdate, RuleFault> {
            let inner = ResidualBalancing::default().update(input)?;
            Ok(RhoUpdate {
                mode: RhoMode::from_label(self.0),
                ..inner
            })
        }
    }

    struct Constant(f64);

    impl PenaltyUpdateRule for Constant {
        fn name(&self) -> &str {
            "constant"
        }

        fn update(&self, _input: &RhoInput) -> Result<RhoUpdate, RuleFault> {
            Ok(RhoUpdate {
                rho: self.0,
                aux: 0.0,
                mode: RhoMode::Keep,
            })
        }
    }

    struct FailsAt(usize);

    impl PenaltyUpdateRule for FailsAt {
        fn name(&self) -> &str {
            "fails"
        }

        fn update(&self, input: &RhoInput) -> Result<RhoUpdate, RuleFault> {
            if input.k == self.0 {
                return Err(RuleFault::new(FaultKind::Raised, "nope", "in fails"));
            }
            FixedRho.update(input)
        }
    }

    fn small_instance() -> ProblemInstance {
        let shape = InstanceShape {
            m: 40,
            d: 20,
            sparsity: 4,
            ..Default::default()
        };
        ProblemInstance::generate_with_shape(5, &shape)
    }

    #[test]
    fn test_soft_threshold() {
        let u = DVector::from_vec(vec![3.0, -3.0, 0.5, -0.5, 0.0]);
        let out = soft_threshold(&u, 1.0);
        assert_eq!(out.as_slice(), &[2.0, -2.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_soft_threshold_zero_with_negative_level() {
        // sign(0) = 0 keeps zeros at zero even for a negative level.
        let u = DVector::from_vec(vec![0.0]);
        assert_eq!(soft_threshold(&u, -1.0)[0], 0.0);
    }

    #[test]
    fn test_reference_rule_converges() {
        let inst = small_instance();
        let settings = AdmmSettings::default();
        let trace = AdmmSolver::new(&inst, &settings).run(&ResidualBalancing::default()).unwrap();

        assert!(trace.converged);
        assert!(trace.iters >= 1 && trace.iters < settings.max_iters);
        assert_eq!(trace.r_hist.len(), trace.iters);
        assert_eq!(trace.s_hist.len(), trace.iters);
        assert_eq!(trace.rho_hist.len(), trace.iters);
        // The rule is not invoked after the terminal iteration.
        assert_eq!(trace.mode_hist.len(), trace.iters - 1);
        assert_eq!(trace.rho_hist[0], settings.rho0);
    }

    #[test]
    fn test_fixed_rho_converges() {
        let inst = small_instance();
        let settings = AdmmSettings::default();
        let solver = AdmmSolver::new(&inst, &settings);
        let trace = solver.run(&FixedRho).unwrap();
        assert!(trace.converged);
        assert!(trace.final_r_norm().unwrap() <= 1e-2);
    }

    #[test]
    fn test_max_iters_reports_not_converged() {
        let inst = small_instance();
        let settings = AdmmSettings::default().with_max_iters(2);
        let trace = AdmmSolver::new(&inst, &settings).run(&FixedRho).unwrap();
        assert!(!trace.converged);
        assert_eq!(trace.iters, 2);
        assert_eq!(trace.r_hist.len(), 2);
    }

    #[test]
    fn test_mode_label_does_not_change_trajectory() {
        let inst = small_instance();
        let settings = AdmmSettings::default();
        let solver = AdmmSolver::new(&inst, &settings);

        let base = solver.run(&Labelled("mul")).unwrap();
        for label in ["div", "keep", "sideways", ""] {
            let other = solver.run(&Labelled(label)).unwrap();
            assert_eq!(other.rho_hist, base.rho_hist, "label {:?}", label);
            assert_eq!(other.r_hist, base.r_hist);
            assert_eq!(other.iters, base.iters);
        }
    }

    #[test]
    fn test_rule_fault_stops_run() {
        let inst = small_instance();
        let settings = AdmmSettings::default();
        let err = AdmmSolver::new(&inst, &settings).run(&FailsAt(0)).unwrap_err();
        match err {
            SolveError::Rule { k, fault } => {
                assert_eq!(k, 0);
                assert_eq!(fault.message, "nope");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_invalid_rho_rejected_by_default() {
        let inst = small_instance();
        let settings = AdmmSettings::default();
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let err = AdmmSolver::new(&inst, &settings).run(&Constant(bad)).unwrap_err();
            assert!(matches!(err, SolveError::InvalidRho { k: 0, .. }), "rho {bad}: {err:?}");
            assert!(!err.traceback().is_empty());
        }
    }

    #[test]
    fn test_pass_through_feeds_invalid_rho_forward() {
        let inst = small_instance();
        let settings = AdmmSettings::default()
            .with_rho_policy(RhoPolicy::PassThrough)
            .with_max_iters(5);
        let trace = AdmmSolver::new(&inst, &settings).run(&Constant(f64::NAN)).unwrap();
        assert!(!trace.converged);
        assert!(trace.rho_hist[1].is_nan());
    }

    #[test]
    fn test_rho_variance_and_mode_counts() {
        let trace = Trace {
            r_hist: vec![1.0, 0.5],
            s_hist: vec![0.1, 0.05],
            rho_hist: vec![1.0, 3.0],
            aux_hist: vec![0.0],
            mode_hist: vec![RhoMode::Mul],
            converged: true,
            iters: 2,
        };
        assert_eq!(trace.rho_variance(), 1.0);
        assert_eq!(trace.mode_counts(), ModeCounts { mul: 1, ..Default::default() });
        assert_eq!(trace.final_r_norm(), Some(0.5));
    }
}
