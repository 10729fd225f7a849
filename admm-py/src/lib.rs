//! Python bindings for the adaptive-ρ ADMM evaluator.
//!
//! The evolutionary loop runs in Python and calls `evaluate(path)` once per
//! candidate; results come back as plain dicts with the same layout as the
//! JSON the command-line tool prints.

use std::sync::Arc;

use admm_core::{
    AdmmSettings, Certifier, CommandCertifier, Evaluator, EvaluatorSettings, FixedCertifier, HarnessConfig,
};
use pyo3::exceptions::{PyIOError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;

fn load_config(path: &str) -> PyResult<HarnessConfig> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| PyErr::new::<PyIOError, _>(format!("Failed to read config {}: {}", path, e)))?;
    let config = HarnessConfig::from_json(&text)
        .map_err(|e| PyErr::new::<PyValueError, _>(format!("Invalid config {}: {}", path, e)))?;
    Ok(config)
}

/// Evaluate a candidate rule file.
///
/// # Arguments
///
/// * `program_path` - Path of the `.rho` candidate
/// * `rich_feedback` - Attach diagnostics to converged results
/// * `config` - Optional JSON settings file; its `certifier` section, when
///   present, replaces the default accept-without-proof certifier
///
/// # Returns
///
/// A dict with `combined_score`, `metrics`, `artifacts` and, when the rule
/// reached the prover, `formal_certification`.
#[pyfunction]
#[pyo3(signature = (program_path, rich_feedback = false, config = None))]
fn evaluate<'py>(
    py: Python<'py>,
    program_path: String,
    rich_feedback: bool,
    config: Option<String>,
) -> PyResult<Bound<'py, PyAny>> {
    let config = match config {
        Some(path) => load_config(&path)?,
        None => HarnessConfig::default(),
    };

    let certifier: Arc<dyn Certifier> = match config.certifier {
        Some(command) => Arc::new(CommandCertifier::new(command)),
        None => Arc::new(FixedCertifier::accept_unproven()),
    };
    let evaluator = Evaluator::new(config.evaluator.with_rich_feedback(rich_feedback), certifier)
        .map_err(|e| PyErr::new::<PyValueError, _>(e.to_string()))?;

    // Candidate scripts and certifier subprocesses run without the GIL
    let result = py.allow_threads(|| evaluator.evaluate(&program_path));

    let text = serde_json::to_string(&result)
        .map_err(|e| PyErr::new::<PyValueError, _>(format!("Failed to encode result: {}", e)))?;
    PyModule::import_bound(py, "json")?.call_method1("loads", (text,))
}

/// Get version information.
#[pyfunction]
fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Get default evaluator settings as a dict.
#[pyfunction]
fn default_settings(py: Python<'_>) -> PyResult<Bound<'_, PyDict>> {
    let settings = EvaluatorSettings::default();
    let admm = AdmmSettings::default();
    let dict = PyDict::new_bound(py);
    dict.set_item("seed", settings.seed)?;
    dict.set_item("rich_feedback", settings.rich_feedback)?;
    dict.set_item("proof_timeout_secs", settings.proof_timeout_secs)?;
    dict.set_item("max_iters", admm.max_iters)?;
    dict.set_item("rho0", admm.rho0)?;
    dict.set_item("abstol", admm.abstol)?;
    dict.set_item("reltol", admm.reltol)?;
    dict.set_item("mu", admm.rule_params.mu)?;
    dict.set_item("c", admm.rule_params.c)?;
    dict.set_item("p", admm.rule_params.p)?;
    Ok(dict)
}

/// Python module definition.
#[pymodule]
fn _native(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(evaluate, m)?)?;
    m.add_function(wrap_pyfunction!(version, m)?)?;
    m.add_function(wrap_pyfunction!(default_settings, m)?)?;
    Ok(())
}
