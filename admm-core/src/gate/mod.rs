//! Formal conformance gate.
//!
//! A candidate passes through two external collaborators:
//!
//! 1. **Pre-check** (before solving): the source is translated into a
//!    mathematical formulation and checked against the conformance
//!    requirements (non-negative summable step sequence depending only on
//!    the iteration index, eventual restriction to multiply/divide/keep by
//!    `1 + step`, branch logic separated from the numeric factor, no post-hoc
//!    clipping or smoothing, determinism). A rejection short-circuits the
//!    evaluation.
//! 2. **Proof** (after solving): a proof is generated from the accepted
//!    formulation and handed to a verifier under a bounded timeout.
//!
//! Failures of the collaborators are never surfaced as harness errors. A
//! failed pre-check call counts as a rejection and a failed proof as
//! "not auto-proven".

pub mod command;
pub mod fixed;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::catch_panic;

pub use command::{CommandCertifier, CommandCertifierConfig, CommandSpec};
pub use fixed::FixedCertifier;

/// Opaque mathematical formulation of a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MathForm(pub String);

/// Opaque proof text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofSource(pub String);

/// Outcome of the conformance check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConformanceReport {
    pub is_valid: bool,
    pub issues: Vec<String>,
}

impl ConformanceReport {
    pub fn accepted() -> Self {
        Self {
            is_valid: true,
            issues: Vec::new(),
        }
    }

    pub fn rejected(issues: Vec<String>) -> Self {
        Self { is_valid: false, issues }
    }
}

/// Verdict of the proof verifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProofVerdict {
    Proven,
    NotProven,
    TimedOut,
    TransportError(String),
}

/// Certification level of an accepted rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Certification {
    AutoProven,
    NotAutoProven,
}

impl Certification {
    /// Multiplier applied to the convergence score.
    pub fn weight(self) -> f64 {
        match self {
            Certification::AutoProven => 1.0,
            Certification::NotAutoProven => 0.5,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Certification::AutoProven => "Lean4_Auto_Proven",
            Certification::NotAutoProven => "Lean4_Not_Auto_Proven",
        }
    }
}

impl From<ProofVerdict> for Certification {
    fn from(verdict: ProofVerdict) -> Self {
        match verdict {
            ProofVerdict::Proven => Certification::AutoProven,
            ProofVerdict::NotProven | ProofVerdict::TimedOut | ProofVerdict::TransportError(_) => {
                Certification::NotAutoProven
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum GateError {
    #[error("{stage} timed out after {}s", .timeout.as_secs_f64())]
    Timeout { stage: &'static str, timeout: Duration },

    #[error("{stage} exited with {status}: {stderr}")]
    Failed {
        stage: &'static str,
        status: String,
        stderr: String,
    },

    #[error("{stage} could not be run: {source}")]
    Io {
        stage: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{stage} panicked: {message}")]
    Panicked { stage: &'static str, message: String },

    #[error("{0}")]
    Unavailable(String),
}

/// External certifier and prover.
pub trait Certifier: Send + Sync {
    /// Translate rule source into a mathematical formulation.
    fn translate(&self, source: &str) -> Result<MathForm, GateError>;

    /// Check the formulation against the conformance requirements.
    fn check(&self, form: &MathForm) -> Result<ConformanceReport, GateError>;

    /// Generate a proof from an accepted formulation.
    fn prove(&self, form: &MathForm) -> Result<ProofSource, GateError>;

    /// Run the verifier on `proof`, giving up after `timeout`.
    fn verify(&self, proof: &ProofSource, timeout: Duration) -> ProofVerdict;
}

/// Result of the pre-solve stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precheck {
    Accepted(MathForm),
    Rejected(Vec<String>),
}

/// Drives a [`Certifier`] through the two gate stages.
#[derive(Clone)]
pub struct FormalGate {
    certifier: Arc<dyn Certifier>,
    proof_timeout: Duration,
}

impl FormalGate {
    pub fn new(certifier: Arc<dyn Certifier>, proof_timeout: Duration) -> Self {
        Self {
            certifier,
            proof_timeout,
        }
    }

    /// Translate and check `source`. Collaborator failures reject.
    pub fn precheck(&self, source: &str) -> Precheck {
        let certifier = &self.certifier;
        let outcome = guarded("check", || {
            let form = certifier.translate(source)?;
            let report = certifier.check(&form)?;
            Ok((form, report))
        });

        match outcome {
            Ok((form, report)) if report.is_valid => Precheck::Accepted(form),
            Ok((_, report)) => Precheck::Rejected(report.issues),
            Err(err) => {
                tracing::warn!(error = %err, "conformance check failed; treating as rejection");
                Precheck::Rejected(vec![format!("conformance check unavailable: {err}")])
            }
        }
    }

    /// Generate and verify a proof for an accepted formulation.
    pub fn certify(&self, form: &MathForm) -> Certification {
        let certifier = &self.certifier;
        let timeout = self.proof_timeout;
        let verdict = guarded("prove", || {
            let proof = certifier.prove(form)?;
            let proof = ProofSource(strip_code_fence(&proof.0));
            Ok(certifier.verify(&proof, timeout))
        });

        match verdict {
            Ok(verdict) => {
                match &verdict {
                    ProofVerdict::TimedOut => tracing::warn!(?timeout, "proof verification timed out"),
                    ProofVerdict::TransportError(msg) => tracing::warn!(error = %msg, "proof verifier failed"),
                    _ => {}
                }
                Certification::from(verdict)
            }
            Err(err) => {
                tracing::warn!(error = %err, "proof generation failed");
                Certification::NotAutoProven
            }
        }
    }
}

fn guarded<T>(stage: &'static str, f: impl FnOnce() -> Result<T, GateError>) -> Result<T, GateError> {
    match catch_panic(f) {
        Ok(result) => result,
        Err(caught) => Err(GateError::Panicked {
            stage,
            message: caught.message,
        }),
    }
}

/// Parse checker output: the verdict is the last non-empty line, which must
/// be exactly `True`; all earlier lines are the issue report.
pub fn parse_check_output(text: &str) -> ConformanceReport {
    let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    let Some((last, issues)) = lines.split_last() else {
        return ConformanceReport::rejected(vec!["Empty checker output".to_string()]);
    };
    ConformanceReport {
        is_valid: *last == "True",
        issues: issues.iter().map(|s| s.to_string()).collect(),
    }
}

/// Drop a leading and a trailing Markdown fence line.
pub fn strip_code_fence(text: &str) -> String {
    let mut lines: Vec<&str> = text.lines().collect();
    if lines.first().is_some_and(|l| l.starts_with("```")) {
        lines.remove(0);
    }
    if lines.last().is_some_and(|l| l.starts_with("```")) {
        lines.pop();
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Broken;

    impl Certifier for Broken {
        fn translate(&self, _source: &str) -> Result<MathForm, GateError> {
            Err(GateError::Unavailable("no network".into()))
        }

        fn check(&self, _form: &MathForm) -> Result<ConformanceReport, GateError> {
            unreachable!()
        }

        fn prove(&self, _form: &MathForm) -> Result<ProofSource, GateError> {
            panic!("prover crashed")
        }

        fn verify(&self, _proof: &ProofSource, _timeout: Duration) -> ProofVerdict {
            ProofVerdict::Proven
        }
    }

    /// Records the proof text handed to the verifier.
    struct Recording(std::sync::Mutex<Option<String>>);

    impl Certifier for Recording {
        fn translate(&self, source: &str) -> Result<MathForm, GateError> {
            Ok(MathForm(source.to_string()))
        }

        fn check(&self, _form: &MathForm) -> Result<ConformanceReport, GateError> {
            Ok(ConformanceReport::accepted())
        }

        fn prove(&self, _form: &MathForm) -> Result<ProofSource, GateError> {
            Ok(ProofSource("```lean\ntheorem t : True := trivial\n```".into()))
        }

        fn verify(&self, proof: &ProofSource, _timeout: Duration) -> ProofVerdict {
            *self.0.lock().unwrap() = Some(proof.0.clone());
            ProofVerdict::Proven
        }
    }

    fn gate(certifier: impl Certifier + 'static) -> FormalGate {
        FormalGate::new(Arc::new(certifier), Duration::from_secs(1))
    }

    #[test]
    fn test_parse_check_output() {
        let report = parse_check_output("R1 ok\n\n  R6 violated: clipping  \nTrue\n");
        assert!(report.is_valid);
        assert_eq!(report.issues, vec!["R1 ok", "R6 violated: clipping"]);

        let report = parse_check_output("R6 violated\nFalse");
        assert!(!report.is_valid);
        assert_eq!(report.issues, vec!["R6 violated"]);

        let report = parse_check_output("True.");
        assert!(!report.is_valid);

        let report = parse_check_output("  \n\n");
        assert!(!report.is_valid);
        assert_eq!(report.issues, vec!["Empty checker output"]);
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```lean\na\nb\n```"), "a\nb");
        assert_eq!(strip_code_fence("a\nb"), "a\nb");
        assert_eq!(strip_code_fence("```\n```"), "");
        assert_eq!(strip_code_fence(""), "");
    }

    #[test]
    fn test_certification_weights() {
        assert_eq!(Certification::from(ProofVerdict::Proven), Certification::AutoProven);
        assert_eq!(Certification::from(ProofVerdict::NotProven), Certification::NotAutoProven);
        assert_eq!(Certification::from(ProofVerdict::TimedOut), Certification::NotAutoProven);
        assert_eq!(
            Certification::from(ProofVerdict::TransportError("broken pipe".into())),
            Certification::NotAutoProven
        );
        assert_eq!(Certification::AutoProven.weight(), 1.0);
        assert_eq!(Certification::NotAutoProven.weight(), 0.5);
        assert_eq!(Certification::AutoProven.label(), "Lean4_Auto_Proven");
        assert_eq!(Certification::NotAutoProven.label(), "Lean4_Not_Auto_Proven");
    }

    #[test]
    fn test_transport_failure_rejects() {
        match gate(Broken).precheck("fn update_rho() {}") {
            Precheck::Rejected(issues) => assert!(issues[0].contains("no network")),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_prover_panic_is_not_auto_proven() {
        let form = MathForm("rho_{k+1} = rho_k".into());
        assert_eq!(gate(Broken).certify(&form), Certification::NotAutoProven);
    }

    #[test]
    fn test_fence_stripped_before_verify() {
        let certifier = Arc::new(Recording(std::sync::Mutex::new(None)));
        let gate = FormalGate::new(certifier.clone(), Duration::from_secs(1));
        let form = match gate.precheck("src") {
            Precheck::Accepted(form) => form,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(gate.certify(&form), Certification::AutoProven);
        assert_eq!(
            certifier.0.lock().unwrap().as_deref(),
            Some("theorem t : True := trivial")
        );
    }
}
