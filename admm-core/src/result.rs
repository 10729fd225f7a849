//! Evaluation result returned to the search loop.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};

/// Outcome class of an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EvalStatus {
    #[serde(rename = "CONVERGED")]
    Converged,
    #[serde(rename = "DID NOT CONVERGE")]
    DidNotConverge,
    #[serde(rename = "FORMAL_REJECTED")]
    FormalRejected,
    /// The candidate does not honour the entry-point contract.
    #[serde(rename = "ERROR")]
    Error,
    /// The candidate faulted while loading or solving.
    #[serde(rename = "EXCEPTION")]
    Exception,
}

impl EvalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EvalStatus::Converged => "CONVERGED",
            EvalStatus::DidNotConverge => "DID NOT CONVERGE",
            EvalStatus::FormalRejected => "FORMAL_REJECTED",
            EvalStatus::Error => "ERROR",
            EvalStatus::Exception => "EXCEPTION",
        }
    }
}

impl fmt::Display for EvalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metrics {
    pub converged: bool,
    pub iters: usize,
    pub combined_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formal_valid: Option<bool>,
}

impl Metrics {
    fn failed() -> Self {
        Self {
            converged: false,
            iters: 0,
            combined_score: 0.0,
            formal_valid: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationResult {
    pub combined_score: f64,
    pub metrics: Metrics,
    pub artifacts: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formal_certification: Option<String>,
    #[serde(skip)]
    pub status: EvalStatus,
}

/// Seconds with millisecond precision, e.g. `"0.123s"`.
pub fn format_eval_time(elapsed: Duration) -> String {
    format!("{:.3}s", elapsed.as_secs_f64())
}

impl EvaluationResult {
    /// The candidate lacks `update_rho` or its signature is unusable.
    pub fn contract_missing(message: impl Into<String>) -> Self {
        let status = EvalStatus::Error;
        let mut artifacts = Map::new();
        artifacts.insert("error".into(), Value::from(message.into()));
        artifacts.insert("status".into(), Value::from(status.as_str()));
        Self {
            combined_score: 0.0,
            metrics: Metrics::failed(),
            artifacts,
            formal_certification: None,
            status,
        }
    }

    /// A fault while loading or running the candidate.
    pub fn exception(message: impl Into<String>, traceback: impl Into<String>) -> Self {
        let status = EvalStatus::Exception;
        let mut artifacts = Map::new();
        artifacts.insert("exception".into(), Value::from(message.into()));
        artifacts.insert("traceback".into(), Value::from(traceback.into()));
        artifacts.insert("status".into(), Value::from(status.as_str()));
        Self {
            combined_score: 0.0,
            metrics: Metrics::failed(),
            artifacts,
            formal_certification: None,
            status,
        }
    }

    /// The conformance check rejected the rule; the solver never ran.
    pub fn formal_rejected(issues: Vec<String>, elapsed: Duration) -> Self {
        let status = EvalStatus::FormalRejected;
        let mut artifacts = Map::new();
        artifacts.insert("formal_check".into(), Value::Bool(false));
        artifacts.insert("issues".into(), Value::from(issues));
        artifacts.insert("eval_time".into(), Value::from(format_eval_time(elapsed)));
        artifacts.insert("status".into(), Value::from(status.as_str()));
        Self {
            combined_score: 0.0,
            metrics: Metrics {
                formal_valid: Some(false),
                ..Metrics::failed()
            },
            artifacts,
            formal_certification: None,
            status,
        }
    }

    /// A run that reached the scorer. `artifacts` must already carry the
    /// base entries.
    pub fn completed(
        converged: bool,
        iters: usize,
        combined_score: f64,
        certification: &str,
        artifacts: Map<String, Value>,
    ) -> Self {
        let status = if converged {
            EvalStatus::Converged
        } else {
            EvalStatus::DidNotConverge
        };
        Self {
            combined_score,
            metrics: Metrics {
                converged,
                iters,
                combined_score,
                formal_valid: None,
            },
            artifacts,
            formal_certification: Some(certification.to_string()),
            status,
        }
    }

    pub fn status(&self) -> EvalStatus {
        self.status
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
