//! Tree-walking interpreter.
//!
//! Evaluation is deterministic and side-effect free: the only state is the
//! per-call variable map of each active frame, discarded when the frame
//! returns. Arithmetic is plain IEEE-754 on `f64`.

use std::collections::HashMap;
use std::fmt;

use super::ast::{BinaryOp, Block, Expr, ExprKind, Function, Program, Stmt, UnaryOp};
use super::{ErrorCode, Frame, ScriptError, ScriptResult, Span};

/// Names resolved by the interpreter when no user function matches.
pub const BUILTINS: &[&str] = &[
    "max", "min", "abs", "sqrt", "exp", "log", "log10", "log1p", "pow", "floor", "ceil", "is_finite",
];

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Str(String),
    Bool(bool),
    Tuple(Vec<Value>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Bool(_) => "bool",
            Value::Tuple(_) => "tuple",
        }
    }

    fn truthy(&self) -> bool {
        match self {
            Value::Number(n) => *n != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Bool(b) => *b,
            Value::Tuple(items) => !items.is_empty(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{n}"),
            Value::Str(s) => f.write_str(s),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Tuple(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    match item {
                        Value::Str(s) => write!(f, "{s:?}")?,
                        other => write!(f, "{other}")?,
                    }
                }
                f.write_str(")")
            }
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

/// Resource limits for one top-level call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Maximum number of simultaneously active user-function frames
    pub max_call_depth: usize,

    /// Maximum number of evaluated statements and expressions
    pub max_steps: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_call_depth: 64,
            max_steps: 200_000,
        }
    }
}

enum Flow {
    Normal,
    Return(Value),
}

struct ActiveFrame<'p> {
    function: &'p str,
    called_at: Span,
    vars: HashMap<String, Value>,
}

/// Evaluates functions of one program.
pub struct Interpreter<'p> {
    program: &'p Program,
    limits: Limits,
    steps: u64,
    frames: Vec<ActiveFrame<'p>>,
}

impl<'p> Interpreter<'p> {
    pub fn new(program: &'p Program) -> Self {
        Self::with_limits(program, Limits::default())
    }

    pub fn with_limits(program: &'p Program, limits: Limits) -> Self {
        Self {
            program,
            limits,
            steps: 0,
            frames: Vec::new(),
        }
    }

    /// Call `name` with positional and keyword arguments.
    ///
    /// The step budget is reset for every top-level call.
    pub fn call(&mut self, name: &str, positional: Vec<Value>, keywords: Vec<(String, Value)>) -> ScriptResult<Value> {
        self.steps = 0;
        self.frames.clear();
        let function = self.program.function(name).ok_or_else(|| {
            ScriptError::new(ErrorCode::UnknownFunction, format!("no function named `{name}`"), None)
        })?;
        let site = function.span;
        self.invoke(function, positional, keywords, site)
    }

    fn fault(&self, code: ErrorCode, message: impl Into<String>, span: Span) -> ScriptError {
        let mut stack = Vec::with_capacity(self.frames.len());
        let mut location = span;
        for frame in self.frames.iter().rev() {
            stack.push(Frame {
                function: frame.function.to_string(),
                span: location,
            });
            location = frame.called_at;
        }
        ScriptError::new(code, message, Some(span)).with_stack(stack)
    }

    fn tick(&mut self, span: Span) -> ScriptResult<()> {
        self.steps += 1;
        if self.steps > self.limits.max_steps {
            return Err(self.fault(
                ErrorCode::StepLimit,
                format!("step budget of {} exhausted", self.limits.max_steps),
                span,
            ));
        }
        Ok(())
    }

    fn invoke(
        &mut self,
        function: &'p Function,
        positional: Vec<Value>,
        keywords: Vec<(String, Value)>,
        site: Span,
    ) -> ScriptResult<Value> {
        if self.frames.len() >= self.limits.max_call_depth {
            return Err(self.fault(
                ErrorCode::DepthLimit,
                format!("maximum call depth of {} exceeded", self.limits.max_call_depth),
                site,
            ));
        }

        let vars = self.bind(function, positional, keywords, site)?;
        self.frames.push(ActiveFrame {
            function: &function.name,
            called_at: site,
            vars,
        });

        let flow = self.exec_block(&function.body);
        let result = match flow {
            Ok(Flow::Return(value)) => Ok(value),
            Ok(Flow::Normal) => Err(self.fault(
                ErrorCode::TypeMismatch,
                format!("function `{}` ended without returning a value", function.name),
                function.span,
            )),
            Err(err) => Err(err),
        };
        self.frames.pop();
        result
    }

    fn bind(
        &self,
        function: &Function,
        positional: Vec<Value>,
        keywords: Vec<(String, Value)>,
        site: Span,
    ) -> ScriptResult<HashMap<String, Value>> {
        if positional.len() > function.params.len() {
            return Err(self.fault(
                ErrorCode::ArityMismatch,
                format!(
                    "`{}` takes at most {} arguments but {} were given",
                    function.name,
                    function.params.len(),
                    positional.len()
                ),
                site,
            ));
        }

        let mut vars = HashMap::with_capacity(function.params.len());
        for (param, value) in function.params.iter().zip(positional) {
            vars.insert(param.name.clone(), value);
        }

        for (name, value) in keywords {
            if function.param(&name).is_none() {
                return Err(self.fault(
                    ErrorCode::ArityMismatch,
                    format!("`{}` got an unexpected keyword argument `{name}`", function.name),
                    site,
                ));
            }
            if vars.contains_key(&name) {
                return Err(self.fault(
                    ErrorCode::ArityMismatch,
                    format!("`{}` got multiple values for argument `{name}`", function.name),
                    site,
                ));
            }
            vars.insert(name, value);
        }

        for param in &function.params {
            if vars.contains_key(&param.name) {
                continue;
            }
            match param.default {
                Some(default) => {
                    vars.insert(param.name.clone(), Value::Number(default));
                }
                None => {
                    return Err(self.fault(
                        ErrorCode::ArityMismatch,
                        format!("`{}` is missing argument `{}`", function.name, param.name),
                        site,
                    ))
                }
            }
        }

        Ok(vars)
    }

    fn exec_block(&mut self, block: &'p Block) -> ScriptResult<Flow> {
        for stmt in block {
            if let Flow::Return(value) = self.exec_stmt(stmt)? {
                return Ok(Flow::Return(value));
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &'p Stmt) -> ScriptResult<Flow> {
        match stmt {
            Stmt::Let { name, value, span } => {
                self.tick(*span)?;
                let value = self.eval(value)?;
                self.vars_mut().insert(name.clone(), value);
            }
            Stmt::Assign { name, value, span } => {
                self.tick(*span)?;
                let value = self.eval(value)?;
                match self.vars_mut().get_mut(name) {
                    Some(slot) => *slot = value,
                    None => {
                        return Err(self.fault(
                            ErrorCode::UnknownVariable,
                            format!("assignment to undeclared variable `{name}`"),
                            *span,
                        ))
                    }
                }
            }
            Stmt::If { branches, otherwise } => {
                for (cond, block) in branches {
                    if self.eval(cond)?.truthy() {
                        return self.exec_block(block);
                    }
                }
                if let Some(block) = otherwise {
                    return self.exec_block(block);
                }
            }
            Stmt::Return { value, span } => {
                self.tick(*span)?;
                return Ok(Flow::Return(self.eval(value)?));
            }
            Stmt::Raise { value, span } => {
                self.tick(*span)?;
                let value = self.eval(value)?;
                return Err(self.fault(ErrorCode::Raised, value.to_string(), *span));
            }
            Stmt::Expr(expr) => {
                self.eval(expr)?;
            }
        }
        Ok(Flow::Normal)
    }

    fn vars_mut(&mut self) -> &mut HashMap<String, Value> {
        // exec_* only runs inside invoke, which always pushes a frame
        let last = self.frames.len() - 1;
        &mut self.frames[last].vars
    }

    fn eval(&mut self, expr: &'p Expr) -> ScriptResult<Value> {
        self.tick(expr.span)?;
        match &expr.kind {
            ExprKind::Number(n) => Ok(Value::Number(*n)),
            ExprKind::Str(s) => Ok(Value::Str(s.clone())),
            ExprKind::Bool(b) => Ok(Value::Bool(*b)),
            ExprKind::Var(name) => self
                .frames
                .last()
                .and_then(|frame| frame.vars.get(name))
                .cloned()
                .ok_or_else(|| {
                    self.fault(ErrorCode::UnknownVariable, format!("name `{name}` is not defined"), expr.span)
                }),
            ExprKind::Tuple(items) => {
                let values = items.iter().map(|item| self.eval(item)).collect::<ScriptResult<Vec<_>>>()?;
                Ok(Value::Tuple(values))
            }
            ExprKind::Unary { op, operand } => {
                let value = self.eval(operand)?;
                match (op, value) {
                    (UnaryOp::Neg, Value::Number(n)) => Ok(Value::Number(-n)),
                    (UnaryOp::Not, value) => Ok(Value::Bool(!value.truthy())),
                    (UnaryOp::Neg, other) => Err(self.fault(
                        ErrorCode::TypeMismatch,
                        format!("cannot negate a {}", other.type_name()),
                        expr.span,
                    )),
                }
            }
            ExprKind::Binary { op: BinaryOp::And, lhs, rhs } => {
                if !self.eval(lhs)?.truthy() {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(self.eval(rhs)?.truthy()))
            }
            ExprKind::Binary { op: BinaryOp::Or, lhs, rhs } => {
                if self.eval(lhs)?.truthy() {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(self.eval(rhs)?.truthy()))
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                self.binary(*op, lhs, rhs, expr.span)
            }
            ExprKind::Call { name, args } => {
                let values = args.iter().map(|arg| self.eval(arg)).collect::<ScriptResult<Vec<_>>>()?;
                match self.program.function(name) {
                    Some(function) => self.invoke(function, values, Vec::new(), expr.span),
                    None => self.builtin(name, values, expr.span),
                }
            }
        }
    }

    fn binary(&self, op: BinaryOp, lhs: Value, rhs: Value, span: Span) -> ScriptResult<Value> {
        use Value::{Bool, Number, Str};

        let value = match (op, &lhs, &rhs) {
            (BinaryOp::Add, Number(a), Number(b)) => Number(a + b),
            (BinaryOp::Add, Str(a), Str(b)) => Str(format!("{a}{b}")),
            (BinaryOp::Sub, Number(a), Number(b)) => Number(a - b),
            (BinaryOp::Mul, Number(a), Number(b)) => Number(a * b),
            (BinaryOp::Div, Number(a), Number(b)) => Number(a / b),
            (BinaryOp::Rem, Number(a), Number(b)) => Number(a - b * (a / b).floor()),
            (BinaryOp::Pow, Number(a), Number(b)) => Number(a.powf(*b)),
            (BinaryOp::Lt, Number(a), Number(b)) => Bool(a < b),
            (BinaryOp::Le, Number(a), Number(b)) => Bool(a <= b),
            (BinaryOp::Gt, Number(a), Number(b)) => Bool(a > b),
            (BinaryOp::Ge, Number(a), Number(b)) => Bool(a >= b),
            (BinaryOp::Lt, Str(a), Str(b)) => Bool(a < b),
            (BinaryOp::Le, Str(a), Str(b)) => Bool(a <= b),
            (BinaryOp::Gt, Str(a), Str(b)) => Bool(a > b),
            (BinaryOp::Ge, Str(a), Str(b)) => Bool(a >= b),
            (BinaryOp::Eq, a, b) => Bool(a == b),
            (BinaryOp::Ne, a, b) => Bool(a != b),
            _ => {
                return Err(self.fault(
                    ErrorCode::TypeMismatch,
                    format!(
                        "unsupported operand types for {}: {} and {}",
                        op.symbol(),
                        lhs.type_name(),
                        rhs.type_name()
                    ),
                    span,
                ))
            }
        };
        Ok(value)
    }

    fn builtin(&self, name: &str, args: Vec<Value>, span: Span) -> ScriptResult<Value> {
        if !BUILTINS.contains(&name) {
            return Err(self.fault(ErrorCode::UnknownFunction, format!("name `{name}` is not defined"), span));
        }

        let mut numbers = Vec::with_capacity(args.len());
        for (i, arg) in args.iter().enumerate() {
            match arg {
                Value::Number(n) => numbers.push(*n),
                other => {
                    return Err(self.fault(
                        ErrorCode::TypeMismatch,
                        format!("argument {} of `{name}` must be a number, got {}", i + 1, other.type_name()),
                        span,
                    ))
                }
            }
        }

        let arity = |expected: usize| -> ScriptResult<()> {
            if numbers.len() == expected {
                Ok(())
            } else {
                Err(self.fault(
                    ErrorCode::ArityMismatch,
                    format!("`{name}` takes {expected} argument(s) but {} were given", numbers.len()),
                    span,
                ))
            }
        };

        let value = match name {
            "max" | "min" => {
                let Some((&first, rest)) = numbers.split_first() else {
                    return Err(self.fault(
                        ErrorCode::ArityMismatch,
                        format!("`{name}` expects at least one argument"),
                        span,
                    ));
                };
                // keep the first operand unless a later one strictly wins,
                // so a leading NaN propagates
                let pick_max = name == "max";
                rest.iter().fold(first, |best, &v| {
                    let wins = if pick_max { v > best } else { v < best };
                    if wins {
                        v
                    } else {
                        best
                    }
                })
            }
            "pow" => {
                arity(2)?;
                numbers[0].powf(numbers[1])
            }
            "is_finite" => {
                arity(1)?;
                return Ok(Value::Bool(numbers[0].is_finite()));
            }
            unary => {
                arity(1)?;
                let x = numbers[0];
                match unary {
                    "abs" => x.abs(),
                    "sqrt" => x.sqrt(),
                    "exp" => x.exp(),
                    "log" => x.ln(),
                    "log10" => x.log10(),
                    "log1p" => x.ln_1p(),
                    "floor" => x.floor(),
                    "ceil" => x.ceil(),
                    _ => {
                        return Err(self.fault(
                            ErrorCode::UnknownFunction,
                            format!("name `{name}` is not defined"),
                            span,
                        ))
                    }
                }
            }
        };
        Ok(Value::Number(value))
    }
}
