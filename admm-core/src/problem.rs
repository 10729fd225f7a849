//! Synthetic LASSO problem instances.
//!
//! Every evaluation regenerates its instance from a fixed seed so that all
//! candidates are scored against bit-identical data:
//!
//! ```text
//! minimize    (1/2) ||A x - b||² + λ ||x||₁
//! ```
//!
//! where A is m × d with standard-normal entries scaled by 1/√m, and
//! b = A x_true + σ·noise for a sparse ground truth x_true.

use nalgebra::{DMatrix, DVector};
use rand::seq::index;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Shape and constants of the synthetic instance.
///
/// The evaluator always uses [`InstanceShape::default`]; other shapes exist
/// for tests and experiments.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceShape {
    /// Number of observations (rows of A)
    pub m: usize,

    /// Number of features (columns of A)
    pub d: usize,

    /// Support size of the ground truth
    pub sparsity: usize,

    /// Scale of the observation noise
    pub noise_scale: f64,

    /// L1 regularization weight λ
    pub lambda: f64,
}

impl Default for InstanceShape {
    fn default() -> Self {
        Self {
            m: 120,
            d: 60,
            sparsity: 8,
            noise_scale: 0.05,
            lambda: 0.15,
        }
    }
}

impl InstanceShape {
    /// Check that the shape describes a well-posed instance.
    pub fn validate(&self) -> Result<(), String> {
        if self.m == 0 || self.d == 0 {
            return Err(format!("instance dimensions must be positive (m={}, d={})", self.m, self.d));
        }
        if self.sparsity > self.d {
            return Err(format!(
                "support size {} exceeds feature count {}",
                self.sparsity, self.d
            ));
        }
        if !(self.lambda.is_finite() && self.lambda >= 0.0) {
            return Err(format!("lambda must be finite and non-negative, got {}", self.lambda));
        }
        if !self.noise_scale.is_finite() {
            return Err(format!("noise scale must be finite, got {}", self.noise_scale));
        }
        Ok(())
    }
}

/// A generated LASSO instance.
#[derive(Debug, Clone, PartialEq)]
#[allow(non_snake_case)] // A is standard mathematical notation
pub struct ProblemInstance {
    /// Design matrix A (m × d)
    pub A: DMatrix<f64>,

    /// Observations b (length m)
    pub b: DVector<f64>,

    /// Sparse ground truth (length d)
    pub x_true: DVector<f64>,

    /// Support indices of x_true, in draw order
    pub support: Vec<usize>,

    /// Regularization weight λ
    pub lambda: f64,

    /// Seed the instance was generated from
    pub seed: u64,
}

impl ProblemInstance {
    /// Generate the default-shaped instance for `seed`.
    pub fn generate(seed: u64) -> Self {
        Self::generate_with_shape(seed, &InstanceShape::default())
    }

    /// Generate an instance of the given shape.
    ///
    /// Draw order is fixed: A (row-major), support indices, support
    /// magnitudes, observation noise. Reordering these draws changes every
    /// instance.
    pub fn generate_with_shape(seed: u64, shape: &InstanceShape) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let m = shape.m;
        let d = shape.d;
        let sparsity = shape.sparsity.min(d);

        let scale = 1.0 / (m as f64).sqrt();
        let entries: Vec<f64> = (0..m * d)
            .map(|_| standard_normal(&mut rng) * scale)
            .collect();
        let a = DMatrix::from_row_slice(m, d, &entries);

        let support = index::sample(&mut rng, d, sparsity).into_vec();
        let mut x_true = DVector::zeros(d);
        for &j in &support {
            x_true[j] = standard_normal(&mut rng);
        }

        let noise = DVector::from_fn(m, |_, _| standard_normal(&mut rng));
        let b = &a * &x_true + noise * shape.noise_scale;

        Self {
            A: a,
            b,
            x_true,
            support,
            lambda: shape.lambda,
            seed,
        }
    }

    /// Number of observations m.
    pub fn num_samples(&self) -> usize {
        self.A.nrows()
    }

    /// Number of features d.
    pub fn num_features(&self) -> usize {
        self.A.ncols()
    }

    /// SHA-256 over the little-endian bytes of A (column-major), b and λ,
    /// as lowercase hex.
    ///
    /// Two instances with equal fingerprints were, for all practical
    /// purposes, generated identically.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for v in self.A.iter().chain(self.b.iter()) {
            hasher.update(v.to_le_bytes());
        }
        hasher.update(self.lambda.to_le_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Standard-normal draw (Marsaglia polar method).
fn standard_normal<R: Rng>(rng: &mut R) -> f64 {
    loop {
        let u = 2.0 * rng.gen::<f64>() - 1.0;
        let v = 2.0 * rng.gen::<f64>() - 1.0;
        let s = u * u + v * v;
        if s > 0.0 && s < 1.0 {
            return u * (-2.0 * s.ln() / s).sqrt();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_shape() {
        let inst = ProblemInstance::generate(0);
        assert_eq!(inst.num_samples(), 120);
        assert_eq!(inst.num_features(), 60);
        assert_eq!(inst.b.len(), 120);
        assert_eq!(inst.support.len(), 8);
        assert_eq!(inst.lambda, 0.15);
    }

    #[test]
    fn test_same_seed_is_bit_identical() {
        let a = ProblemInstance::generate(7);
        let b = ProblemInstance::generate(7);
        assert!(a.A.iter().zip(b.A.iter()).all(|(x, y)| x.to_bits() == y.to_bits()));
        assert!(a.b.iter().zip(b.b.iter()).all(|(x, y)| x.to_bits() == y.to_bits()));
        assert_eq!(a.support, b.support);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_different_seeds_differ() {
        let a = ProblemInstance::generate(0);
        let b = ProblemInstance::generate(1);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_fingerprint_is_sha256_hex() {
        let inst = ProblemInstance::generate(0);
        let fp = inst.fingerprint();
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));

        let mut bytes = Vec::new();
        for v in inst.A.iter().chain(inst.b.iter()) {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        bytes.extend_from_slice(&inst.lambda.to_le_bytes());
        assert_eq!(fp, hex::encode(Sha256::digest(&bytes)));

        let mut other = inst.clone();
        other.lambda = 0.2;
        assert_ne!(other.fingerprint(), fp);
    }

    #[test]
    fn test_support_is_distinct_and_in_range() {
        let inst = ProblemInstance::generate(3);
        let mut sorted = inst.support.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), inst.support.len());
        assert!(inst.support.iter().all(|&j| j < inst.num_features()));

        let nonzeros = inst.x_true.iter().filter(|v| **v != 0.0).count();
        assert_eq!(nonzeros, 8);
    }

    #[test]
    fn test_column_scaling() {
        // Columns have squared norm ≈ 1 after the 1/√m scaling.
        let inst = ProblemInstance::generate(11);
        let mean_sq: f64 = (0..inst.num_features())
            .map(|j| inst.A.column(j).norm_squared())
            .sum::<f64>()
            / inst.num_features() as f64;
        assert!((mean_sq - 1.0).abs() < 0.15, "mean squared column norm {}", mean_sq);
    }

    #[test]
    fn test_shape_validation() {
        assert!(InstanceShape::default().validate().is_ok());

        let bad = InstanceShape { sparsity: 100, ..Default::default() };
        assert!(bad.validate().is_err());

        let empty = InstanceShape { d: 0, ..Default::default() };
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_standard_normal_moments() {
        let mut rng = ChaCha8Rng::seed_from_u64(12345);
        let n = 20_000;
        let draws: Vec<f64> = (0..n).map(|_| standard_normal(&mut rng)).collect();
        let mean = draws.iter().sum::<f64>() / n as f64;
        let var = draws.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;
        assert!(mean.abs() < 0.03, "mean {}", mean);
        assert!((var - 1.0).abs() < 0.05, "variance {}", var);
    }
}
