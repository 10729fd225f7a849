//! Candidate loading and the script-backed rule.
//!
//! Loading reads the file, compiles it and validates the `update_rho`
//! signature once, before any solver iteration. Every fault on the way is a
//! [`LoadError`]; nothing unwinds past [`load_candidate`].

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::rule::{FaultKind, PenaltyUpdateRule, RhoInput, RhoMode, RhoUpdate, RuleFault};
use crate::script::{self, ErrorCode, Function, Interpreter, Limits, Program, ScriptError, Value};
use crate::util::catch_panic;

/// Name of the function every candidate must define.
pub const ENTRY_POINT: &str = "update_rho";

/// Keyword hyperparameters passed on every call.
pub const KEYWORD_PARAMS: [&str; 3] = ["mu", "c", "p"];

/// Number of leading positional parameters: `rho, k, r_norm, s_norm`.
pub const POSITIONAL_PARAMS: usize = 4;

/// Largest accepted candidate file.
pub const MAX_SOURCE_BYTES: u64 = 1 << 20;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{path} is {size} bytes, larger than the {limit} byte limit")]
    TooLarge { path: PathBuf, size: u64, limit: u64 },

    #[error("{error}")]
    Script { error: ScriptError, traceback: String },

    #[error("Program must define update_rho()")]
    MissingEntryPoint,

    #[error("update_rho has an invalid signature: {0}")]
    Signature(String),

    #[error("loader panicked: {message}")]
    Panicked { message: String, backtrace: String },
}

impl LoadError {
    /// Whether the candidate compiled but does not honour the entry-point
    /// contract (reported as ERROR rather than EXCEPTION).
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, LoadError::MissingEntryPoint | LoadError::Signature(_))
    }

    pub fn traceback(&self) -> String {
        match self {
            LoadError::Script { traceback, .. } => traceback.clone(),
            LoadError::Panicked { backtrace, .. } => backtrace.clone(),
            other => other.to_string(),
        }
    }
}

/// A compiled candidate whose entry point passed the signature check.
pub struct ScriptRule {
    name: String,
    source: Arc<str>,
    program: Program,
    limits: Limits,
}

impl std::fmt::Debug for ScriptRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptRule")
            .field("name", &self.name)
            .field("functions", &self.program.functions.len())
            .finish()
    }
}

impl ScriptRule {
    /// Compile `source` and validate its entry point.
    pub fn compile(name: impl Into<String>, source: &str) -> Result<Self, LoadError> {
        let program = script::compile(source).map_err(|error| LoadError::Script {
            traceback: error.render(source),
            error,
        })?;

        let entry = program.function(ENTRY_POINT).ok_or(LoadError::MissingEntryPoint)?;
        check_signature(entry).map_err(LoadError::Signature)?;

        Ok(Self {
            name: name.into(),
            source: Arc::from(source),
            program,
            limits: Limits::default(),
        })
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    fn fault_from(&self, error: ScriptError) -> RuleFault {
        let kind = if error.code == ErrorCode::Raised {
            FaultKind::Raised
        } else {
            FaultKind::Runtime
        };
        let traceback = error.render(&self.source);
        RuleFault::new(kind, error.message, traceback)
    }
}

impl PenaltyUpdateRule for ScriptRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn update(&self, input: &RhoInput) -> Result<RhoUpdate, RuleFault> {
        let positional = vec![
            Value::Number(input.rho),
            Value::Number(input.k as f64),
            Value::Number(input.r_norm),
            Value::Number(input.s_norm),
        ];
        let keywords = vec![
            ("mu".to_string(), Value::Number(input.params.mu)),
            ("c".to_string(), Value::Number(input.params.c)),
            ("p".to_string(), Value::Number(input.params.p)),
        ];

        let mut interp = Interpreter::with_limits(&self.program, self.limits);
        let value = interp
            .call(ENTRY_POINT, positional, keywords)
            .map_err(|error| self.fault_from(error))?;

        if let Value::Tuple(items) = &value {
            if let [Value::Number(rho), Value::Number(aux), Value::Str(mode)] = items.as_slice() {
                return Ok(RhoUpdate {
                    rho: *rho,
                    aux: *aux,
                    mode: RhoMode::from_label(mode),
                });
            }
        }
        Err(bad_return(&value))
    }
}

fn bad_return(value: &Value) -> RuleFault {
    let message = format!("{ENTRY_POINT} must return (number, number, string), got {value}");
    let traceback = format!("  in {ENTRY_POINT}\nTypeError: {message}");
    RuleFault::new(FaultKind::BadReturn, message, traceback)
}

/// Check the entry point against the call the solver makes:
/// four positional arguments plus `mu`, `c` and `p` by keyword.
pub fn check_signature(entry: &Function) -> Result<(), String> {
    if entry.params.len() < POSITIONAL_PARAMS {
        return Err(format!(
            "expected at least {POSITIONAL_PARAMS} positional parameters (rho, k, r_norm, s_norm), found {}",
            entry.params.len()
        ));
    }

    for name in KEYWORD_PARAMS {
        match entry.params.iter().position(|p| p.name == name) {
            None => return Err(format!("missing keyword parameter `{name}`")),
            Some(i) if i < POSITIONAL_PARAMS => {
                return Err(format!("`{name}` must come after the {POSITIONAL_PARAMS} positional parameters"))
            }
            Some(_) => {}
        }
    }

    if let Some(param) = entry.params[POSITIONAL_PARAMS..].iter().find(|p| p.default.is_none()) {
        return Err(format!("parameter `{}` needs a default value", param.name));
    }

    Ok(())
}

/// A candidate loaded from disk.
#[derive(Debug)]
pub struct LoadedCandidate {
    pub path: PathBuf,
    pub rule: ScriptRule,
}

impl LoadedCandidate {
    pub fn source(&self) -> &str {
        self.rule.source()
    }
}

/// Read and compile the candidate at `path`.
pub fn load_candidate(path: impl AsRef<Path>) -> Result<LoadedCandidate, LoadError> {
    let path = path.as_ref();
    match catch_panic(|| load_inner(path)) {
        Ok(result) => result,
        Err(caught) => Err(LoadError::Panicked {
            message: caught.message,
            backtrace: caught.backtrace,
        }),
    }
}

fn load_inner(path: &Path) -> Result<LoadedCandidate, LoadError> {
    let io_err = |source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    };

    let size = fs::metadata(path).map_err(io_err)?.len();
    if size > MAX_SOURCE_BYTES {
        return Err(LoadError::TooLarge {
            path: path.to_path_buf(),
            size,
            limit: MAX_SOURCE_BYTES,
        });
    }

    let source = fs::read_to_string(path).map_err(io_err)?;
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| ENTRY_POINT.to_string());
    let rule = ScriptRule::compile(name, &source)?;

    tracing::debug!(path = %path.display(), functions = rule.program.functions.len(), "candidate loaded");
    Ok(LoadedCandidate {
        path: path.to_path_buf(),
        rule,
    })
}
