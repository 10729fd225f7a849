//! Regularized normal equations for the ADMM x-update.
//!
//! Each iteration solves the d × d system
//!
//! ```text
//! (AᵀA + ρI) x = Aᵀb + ρz − y
//! ```
//!
//! AᵀA and Aᵀb are formed once per run. For ρ > 0 the matrix is symmetric
//! positive definite and a dense Cholesky factorization is used; the factor
//! is kept until ρ changes, so "keep" steps of the penalty rule cost only a
//! pair of triangular solves.

use nalgebra::{Cholesky, DMatrix, DVector, Dyn, LU};
use thiserror::Error;

/// Failure of the x-update linear solve.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LinalgError {
    /// Neither Cholesky nor LU could solve the system.
    #[error("regularized normal matrix is singular (rho = {rho})")]
    Singular { rho: f64 },

    /// Right-hand side has the wrong length.
    #[error("right-hand side has length {got}, expected {expected}")]
    DimensionMismatch { expected: usize, got: usize },
}

enum Factor {
    Cholesky(Cholesky<f64, Dyn>),
    Lu(LU<f64, Dyn, Dyn>),
}

/// Normal-equations solver with a ρ-keyed factorization cache.
pub struct NormalEqnsSolver {
    n: usize,

    /// Gram matrix AᵀA
    gram: DMatrix<f64>,

    /// Aᵀb
    atb: DVector<f64>,

    /// Current factorization and the bit pattern of the ρ it was built for
    factor: Option<(u64, Factor)>,

    /// Number of factorizations performed
    factorizations: usize,
}

impl NormalEqnsSolver {
    /// Form AᵀA and Aᵀb for the given data.
    pub fn new(a: &DMatrix<f64>, b: &DVector<f64>) -> Self {
        let gram = a.tr_mul(a);
        let atb = a.tr_mul(b);
        Self {
            n: a.ncols(),
            gram,
            atb,
            factor: None,
            factorizations: 0,
        }
    }

    /// Aᵀb.
    pub fn atb(&self) -> &DVector<f64> {
        &self.atb
    }

    /// Number of factorizations performed so far.
    pub fn factorizations(&self) -> usize {
        self.factorizations
    }

    /// Factor AᵀA + ρI unless a factor for exactly this ρ is cached.
    pub fn factor(&mut self, rho: f64) -> Result<(), LinalgError> {
        let key = rho.to_bits();
        if matches!(&self.factor, Some((cached, _)) if *cached == key) {
            return Ok(());
        }

        let mut shifted = self.gram.clone();
        for i in 0..self.n {
            shifted[(i, i)] += rho;
        }

        // Cholesky only fails when ρ has pushed the matrix out of the
        // positive-definite cone; fall back to LU like a general solve.
        let factor = match Cholesky::new(shifted.clone()) {
            Some(chol) => Factor::Cholesky(chol),
            None => {
                let lu = shifted.lu();
                if !lu.is_invertible() {
                    self.factor = None;
                    return Err(LinalgError::Singular { rho });
                }
                Factor::Lu(lu)
            }
        };

        self.factor = Some((key, factor));
        self.factorizations += 1;
        Ok(())
    }

    /// Solve (AᵀA + ρI) x = rhs.
    pub fn solve(&mut self, rho: f64, rhs: &DVector<f64>) -> Result<DVector<f64>, LinalgError> {
        if rhs.len() != self.n {
            return Err(LinalgError::DimensionMismatch {
                expected: self.n,
                got: rhs.len(),
            });
        }

        self.factor(rho)?;
        match &self.factor {
            Some((_, Factor::Cholesky(chol))) => Ok(chol.solve(rhs)),
            Some((_, Factor::Lu(lu))) => lu.solve(rhs).ok_or(LinalgError::Singular { rho }),
            None => Err(LinalgError::Singular { rho }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_system() -> (DMatrix<f64>, DVector<f64>) {
        // A = [[1, 0], [0, 1], [1, 1], [1, -1]]
        let a = DMatrix::from_row_slice(4, 2, &[1.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0, -1.0]);
        let b = DVector::from_vec(vec![1.0, 2.0, 3.0, 0.5]);
        (a, b)
    }

    #[test]
    fn test_normal_eqns_residual() {
        let (a, b) = small_system();
        let mut solver = NormalEqnsSolver::new(&a, &b);
        let rho = 0.5;

        let rhs = solver.atb().clone();
        let x = solver.solve(rho, &rhs).unwrap();

        // Check (AᵀA + ρI) x ≈ Aᵀb
        let lhs = a.tr_mul(&a) * &x + &x * rho;
        let resid = (lhs - &rhs).norm();
        assert!(resid < 1e-12, "Residual too large: {}", resid);
    }

    #[test]
    fn test_factor_reused_while_rho_unchanged() {
        let (a, b) = small_system();
        let mut solver = NormalEqnsSolver::new(&a, &b);
        let rhs = solver.atb().clone();

        solver.solve(1.0, &rhs).unwrap();
        solver.solve(1.0, &rhs).unwrap();
        assert_eq!(solver.factorizations(), 1);

        solver.solve(2.0, &rhs).unwrap();
        assert_eq!(solver.factorizations(), 2);
    }

    #[test]
    fn test_negative_rho_falls_back_to_lu() {
        // AᵀA = 3I, so ρ = -4 gives -I: invertible but not positive definite.
        let (a, b) = small_system();
        let mut solver = NormalEqnsSolver::new(&a, &b);
        let rhs = solver.atb().clone();

        let x = solver.solve(-4.0, &rhs).unwrap();
        let lhs = a.tr_mul(&a) * &x - &x * 4.0;
        assert!((lhs - &rhs).norm() < 1e-12);
    }

    #[test]
    fn test_singular_system_is_reported() {
        // AᵀA = 3I, so ρ = -3 makes the shifted matrix exactly zero.
        let (a, b) = small_system();
        let mut solver = NormalEqnsSolver::new(&a, &b);
        let rhs = solver.atb().clone();

        let err = solver.solve(-3.0, &rhs).unwrap_err();
        assert_eq!(err, LinalgError::Singular { rho: -3.0 });
    }

    #[test]
    fn test_dimension_mismatch() {
        let (a, b) = small_system();
        let mut solver = NormalEqnsSolver::new(&a, &b);
        let err = solver.solve(1.0, &DVector::zeros(3)).unwrap_err();
        assert_eq!(err, LinalgError::DimensionMismatch { expected: 2, got: 3 });
    }
}
