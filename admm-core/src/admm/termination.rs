//! Stopping criteria for the ADMM iteration.
//!
//! Boyd-style adaptive tolerances:
//!
//! ```text
//! eps_pri  = √d·abstol + reltol·max(‖x‖, ‖z‖)
//! eps_dual = √d·abstol + reltol·‖y‖ / max(ρ, tiny)
//! ```
//!
//! The run stops when ‖r‖ ≤ eps_pri and ‖s‖ ≤ eps_dual.

/// Termination criteria.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoppingCriteria {
    /// Absolute tolerance
    pub abstol: f64,

    /// Relative tolerance
    pub reltol: f64,

    /// Floor on ρ in the dual tolerance
    pub tiny: f64,
}

impl Default for StoppingCriteria {
    fn default() -> Self {
        Self {
            abstol: 1e-4,
            reltol: 1e-3,
            tiny: 1e-12,
        }
    }
}

/// Tolerances for one iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerances {
    pub eps_pri: f64,
    pub eps_dual: f64,
}

impl StoppingCriteria {
    /// Compute the tolerances from the iterate norms.
    pub fn tolerances(&self, d: usize, x_norm: f64, z_norm: f64, y_norm: f64, rho: f64) -> Tolerances {
        let floor = (d as f64).sqrt() * self.abstol;
        Tolerances {
            eps_pri: floor + self.reltol * x_norm.max(z_norm),
            eps_dual: floor + self.reltol * (y_norm / rho.max(self.tiny)),
        }
    }

    /// Check the residuals against the tolerances.
    ///
    /// NaN residuals never satisfy the criteria.
    pub fn is_met(&self, r_norm: f64, s_norm: f64, tol: &Tolerances) -> bool {
        r_norm <= tol.eps_pri && s_norm <= tol.eps_dual
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tolerance_formulas() {
        let crit = StoppingCriteria::default();
        let tol = crit.tolerances(100, 2.0, 3.0, 4.0, 0.5);
        assert!((tol.eps_pri - (10.0 * 1e-4 + 1e-3 * 3.0)).abs() < 1e-15);
        assert!((tol.eps_dual - (10.0 * 1e-4 + 1e-3 * 8.0)).abs() < 1e-15);
    }

    #[test]
    fn test_dual_tolerance_floors_rho() {
        let crit = StoppingCriteria::default();
        let tol = crit.tolerances(1, 0.0, 0.0, 1.0, 0.0);
        assert!((tol.eps_dual - (1e-4 + 1e-3 * 1e12)).abs() < 1.0);
    }

    #[test]
    fn test_nan_residual_never_meets() {
        let crit = StoppingCriteria::default();
        let tol = crit.tolerances(4, 1.0, 1.0, 1.0, 1.0);
        assert!(crit.is_met(0.0, 0.0, &tol));
        assert!(!crit.is_met(f64::NAN, 0.0, &tol));
        assert!(!crit.is_met(0.0, f64::NAN, &tol));
    }
}
