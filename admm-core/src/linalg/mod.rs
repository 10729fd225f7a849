//! Dense linear algebra for the ADMM x-update.

pub mod normal_eqns;

pub use normal_eqns::{LinalgError, NormalEqnsSolver};
