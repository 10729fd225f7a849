//! Certifier with preconfigured answers, for tests and offline runs.

use std::time::Duration;

use super::{Certifier, ConformanceReport, GateError, MathForm, ProofSource, ProofVerdict};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedCertifier {
    report: ConformanceReport,
    verdict: ProofVerdict,
}

impl FixedCertifier {
    pub fn new(report: ConformanceReport, verdict: ProofVerdict) -> Self {
        Self { report, verdict }
    }

    /// Accept every rule without a proof (weight 0.5).
    pub fn accept_unproven() -> Self {
        Self::new(ConformanceReport::accepted(), ProofVerdict::NotProven)
    }

    /// Accept every rule and report it as proven (weight 1.0).
    pub fn accept_proven() -> Self {
        Self::new(ConformanceReport::accepted(), ProofVerdict::Proven)
    }

    /// Reject every rule with `issues`.
    pub fn reject<I, S>(issues: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            ConformanceReport::rejected(issues.into_iter().map(Into::into).collect()),
            ProofVerdict::NotProven,
        )
    }
}

impl Certifier for FixedCertifier {
    fn translate(&self, source: &str) -> Result<MathForm, GateError> {
        Ok(MathForm(source.to_string()))
    }

    fn check(&self, _form: &MathForm) -> Result<ConformanceReport, GateError> {
        Ok(self.report.clone())
    }

    fn prove(&self, form: &MathForm) -> Result<ProofSource, GateError> {
        Ok(ProofSource(form.0.clone()))
    }

    fn verify(&self, _proof: &ProofSource, _timeout: Duration) -> ProofVerdict {
        self.verdict.clone()
    }
}
