//! Candidate rule language.
//!
//! A small sandboxed expression language used to express penalty-update
//! rules: numbers, strings, booleans and tuples; `let` bindings; `if` chains;
//! `return` and `raise`; helper functions and a fixed set of math builtins.
//! There are no loops and no I/O. Recursion is bounded by a call-depth limit
//! and total work by a step budget.
//!
//! [`compile`] turns source text into a [`Program`]; an [`Interpreter`]
//! evaluates functions of a program.

pub mod ast;
pub mod interp;
pub mod lexer;
pub mod parser;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use ast::{Function, Param, Program};
pub use interp::{Interpreter, Limits, Value};

pub type ScriptResult<T> = Result<T, ScriptError>;

/// 1-based source position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub line: u32,
    pub column: u32,
}

impl Span {
    pub const fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

/// Stable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    UnexpectedCharacter,
    UnterminatedString,
    InvalidNumber,
    UnexpectedToken,
    UnexpectedEnd,
    NestingTooDeep,
    DuplicateFunction,
    DuplicateParameter,
    UnknownVariable,
    UnknownFunction,
    ArityMismatch,
    TypeMismatch,
    DepthLimit,
    StepLimit,
    Raised,
}

impl ErrorCode {
    /// Whether the error arises while running code rather than reading it.
    pub fn is_runtime(self) -> bool {
        matches!(
            self,
            ErrorCode::UnknownVariable
                | ErrorCode::UnknownFunction
                | ErrorCode::ArityMismatch
                | ErrorCode::TypeMismatch
                | ErrorCode::DepthLimit
                | ErrorCode::StepLimit
                | ErrorCode::Raised
        )
    }

    fn kind_label(self) -> &'static str {
        match self {
            ErrorCode::UnexpectedCharacter
            | ErrorCode::UnterminatedString
            | ErrorCode::InvalidNumber
            | ErrorCode::UnexpectedToken
            | ErrorCode::UnexpectedEnd
            | ErrorCode::NestingTooDeep
            | ErrorCode::DuplicateFunction
            | ErrorCode::DuplicateParameter => "SyntaxError",
            ErrorCode::UnknownVariable | ErrorCode::UnknownFunction => "NameError",
            ErrorCode::ArityMismatch | ErrorCode::TypeMismatch => "TypeError",
            ErrorCode::DepthLimit | ErrorCode::StepLimit => "LimitError",
            ErrorCode::Raised => "RuleError",
        }
    }
}

/// A frame of the interpreter call stack at the time of an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub function: String,
    pub span: Span,
}

/// Lexing, parsing or runtime error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptError {
    pub code: ErrorCode,
    pub message: String,
    pub span: Option<Span>,
    /// Call stack, innermost first. Empty for load-time errors.
    pub stack: Vec<Frame>,
}

impl ScriptError {
    pub fn new(code: ErrorCode, message: impl Into<String>, span: Option<Span>) -> Self {
        Self {
            code,
            message: message.into(),
            span,
            stack: Vec::new(),
        }
    }

    pub(crate) fn with_stack(mut self, stack: Vec<Frame>) -> Self {
        self.stack = stack;
        self
    }

    /// Human-readable diagnostic: the call stack for runtime errors, the
    /// offending source line for load errors.
    pub fn render(&self, source: &str) -> String {
        let mut out = String::new();
        if !self.stack.is_empty() {
            out.push_str("Call stack (innermost first):\n");
            for frame in &self.stack {
                out.push_str(&format!("  in {}, {}\n", frame.function, frame.span));
                if let Some(text) = source_line(source, frame.span.line) {
                    out.push_str(&format!("    {}\n", text.trim()));
                }
            }
        } else if let Some(span) = self.span {
            out.push_str(&format!("  at {span}\n"));
            if let Some(text) = source_line(source, span.line) {
                out.push_str(&format!("    {text}\n"));
                let pad = " ".repeat(span.column.saturating_sub(1) as usize);
                out.push_str(&format!("    {pad}^\n"));
            }
        }
        out.push_str(&format!("{}: {}", self.code.kind_label(), self.message));
        out
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.span {
            Some(span) => write!(f, "{:?}: {} ({})", self.code, self.message, span),
            None => write!(f, "{:?}: {}", self.code, self.message),
        }
    }
}

impl std::error::Error for ScriptError {}

fn source_line(source: &str, line: u32) -> Option<&str> {
    source.lines().nth(line.checked_sub(1)? as usize)
}

/// Lex and parse `source` into a program.
pub fn compile(source: &str) -> ScriptResult<Program> {
    let tokens = lexer::tokenize(source)?;
    parser::Parser::new(tokens).parse_program()
}
