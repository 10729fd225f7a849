//! Built-in penalty rules.
//!
//! These serve as baselines for the command-line front end and as
//! references in tests. Candidates supplied by the search loop are script
//! rules (see [`crate::script`]).

use super::{PenaltyUpdateRule, RhoInput, RhoMode, RhoUpdate, RuleFault};

/// Summable step τ_k = c / (k + 1)^p.
#[inline]
pub fn tau(k: usize, c: f64, p: f64) -> f64 {
    c / (k as f64 + 1.0).powf(p)
}

/// Residual balancing with a summable step.
///
/// ```text
/// ρ_{k+1} = ρ_k (1 + τ_k)   if ‖r‖ > μ max(‖s‖, ε)
///         = ρ_k / (1 + τ_k) if ‖s‖ > μ max(‖r‖, ε)
///         = ρ_k             otherwise
/// ```
///
/// aux = τ_k.
#[derive(Debug, Clone, Copy)]
pub struct ResidualBalancing {
    pub eps: f64,
}

impl Default for ResidualBalancing {
    fn default() -> Self {
        Self { eps: 1e-12 }
    }
}

impl PenaltyUpdateRule for ResidualBalancing {
    fn name(&self) -> &str {
        "residual-balancing"
    }

    fn update(&self, input: &RhoInput) -> Result<RhoUpdate, RuleFault> {
        let params = &input.params;
        let t = tau(input.k, params.c, params.p);

        let (rho, mode) = if input.r_norm > params.mu * input.s_norm.max(self.eps) {
            (input.rho * (1.0 + t), RhoMode::Mul)
        } else if input.s_norm > params.mu * input.r_norm.max(self.eps) {
            (input.rho / (1.0 + t), RhoMode::Div)
        } else {
            (input.rho, RhoMode::Keep)
        };

        Ok(RhoUpdate { rho, aux: t, mode })
    }
}

/// Never changes ρ.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedRho;

impl PenaltyUpdateRule for FixedRho {
    fn name(&self) -> &str {
        "fixed"
    }

    fn update(&self, input: &RhoInput) -> Result<RhoUpdate, RuleFault> {
        Ok(RhoUpdate {
            rho: input.rho,
            aux: 0.0,
            mode: RhoMode::Keep,
        })
    }
}

/// Residual balancing on ratios, followed by clipping ρ into
/// `[rho_min, rho_max]`.
///
/// The clipping step makes this rule non-conformant with the formal
/// requirements (post-hoc modification of the update), which is useful for
/// exercising the gate.
#[derive(Debug, Clone, Copy)]
pub struct ClippedBalancing {
    pub eps: f64,
    pub rho_min: f64,
    pub rho_max: f64,
}

impl Default for ClippedBalancing {
    fn default() -> Self {
        Self {
            eps: 1e-12,
            rho_min: 1e-6,
            rho_max: 1e6,
        }
    }
}

impl PenaltyUpdateRule for ClippedBalancing {
    fn name(&self) -> &str {
        "clipped-balancing"
    }

    fn update(&self, input: &RhoInput) -> Result<RhoUpdate, RuleFault> {
        let params = &input.params;
        let t = tau(input.k, params.c, params.p);

        let r_ratio = input.r_norm / input.s_norm.max(self.eps);
        let s_ratio = input.s_norm / input.r_norm.max(self.eps);

        let (rho, mode) = if r_ratio > params.mu {
            (input.rho * (1.0 + t), RhoMode::Mul)
        } else if s_ratio > params.mu {
            (input.rho / (1.0 + t), RhoMode::Div)
        } else {
            (input.rho, RhoMode::Keep)
        };

        Ok(RhoUpdate {
            rho: rho.min(self.rho_max).max(self.rho_min),
            aux: r_ratio.max(s_ratio),
            mode,
        })
    }
}
