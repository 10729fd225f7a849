//! Fitness and diagnostics.
//!
//! ```text
//! score = 0                      if the run did not converge
//!       = weight · (1 / iters)   otherwise
//! ```
//!
//! with `weight` ∈ {1.0, 0.5} from the certification. Diagnostics are
//! descriptive and never feed back into the score.

use serde::Serialize;

use crate::admm::{ModeCounts, Trace};
use crate::gate::Certification;

/// ρ variance above which the trajectory counts as oscillating.
pub const OSCILLATION_VARIANCE: f64 = 1.0;

/// Iteration count above which convergence counts as slow.
pub const SLOW_ITERS: usize = 800;

/// Added to the dual residual in the final primal/dual ratio.
const RATIO_EPS: f64 = 1e-12;

/// Combine convergence and certification weight into the fitness.
pub fn combined_score(converged: bool, iters: usize, weight: f64) -> f64 {
    if !converged || iters == 0 {
        return 0.0;
    }
    weight * (1.0 / iters as f64)
}

/// Qualitative hint attached to rich diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hint {
    Oscillating,
    Slow,
    Stable,
}

impl Hint {
    pub fn text(self) -> &'static str {
        match self {
            Hint::Oscillating => "ρ oscillates heavily; consider smoother updates.",
            Hint::Slow => "Converges slowly; try more aggressive early adaptation.",
            Hint::Stable => "Stable convergence.",
        }
    }

    pub fn classify(rho_variance: f64, iters: usize) -> Self {
        if rho_variance > OSCILLATION_VARIANCE {
            Hint::Oscillating
        } else if iters > SLOW_ITERS {
            Hint::Slow
        } else {
            Hint::Stable
        }
    }
}

/// Rich diagnostics of a converged run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostics {
    pub final_r_norm: f64,
    pub final_s_norm: f64,
    pub rho_variance: f64,
    pub primal_dual_ratio_final: f64,
    pub mode_counts: ModeCounts,
    #[serde(skip)]
    pub hint: Hint,
}

impl Diagnostics {
    /// `None` unless the run converged.
    pub fn from_trace(trace: &Trace) -> Option<Self> {
        if !trace.converged {
            return None;
        }
        let r = trace.final_r_norm()?;
        let s = trace.final_s_norm()?;
        let rho_variance = trace.rho_variance();
        Some(Self {
            final_r_norm: r,
            final_s_norm: s,
            rho_variance,
            primal_dual_ratio_final: r / (s + RATIO_EPS),
            mode_counts: trace.mode_counts(),
            hint: Hint::classify(rho_variance, trace.iters),
        })
    }
}

/// Scores traces; builds diagnostics when enabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConvergenceScorer {
    pub rich_feedback: bool,
}

impl ConvergenceScorer {
    pub fn new(rich_feedback: bool) -> Self {
        Self { rich_feedback }
    }

    pub fn score(&self, trace: &Trace, certification: Certification) -> f64 {
        combined_score(trace.converged, trace.iters, certification.weight())
    }

    pub fn diagnostics(&self, trace: &Trace) -> Option<Diagnostics> {
        if !self.rich_feedback {
            return None;
        }
        Diagnostics::from_trace(trace)
    }
}
