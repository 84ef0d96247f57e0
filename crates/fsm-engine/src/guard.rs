//! Guard expressions.
//!
//! A guard is a side-effect-free predicate over the current cycle's inputs,
//! the controller's timers and the fault latch status. Guards are plain data
//! (no closures) so definitions can be validated, printed and compared.
//!
//! The expression language:
//!
//! - `start` - input is truthy (`TRUE` or non-zero)
//! - `speed > 40.5` - numeric comparison (`==`, `!=`, `>`, `>=`, `<`, `<=`)
//! - `expired(T1)` - timer `T1` has reached its preset
//! - `faulted` - the fault latch is not clear
//! - `retry_exceeded` - the fault latch needs manual intervention
//! - `fault_code == 2001`, `retries >= 2` - fault latch fields
//! - `true`, `false` - constants
//! - `!expr`, `expr && expr`, `expr || expr`, `(expr)`
//!
//! `&&` binds tighter than `||`.
//!
//! # Example
//!
//! ```
//! use fsm_engine::guard::Guard;
//!
//! let guard: Guard = "start && !estop".parse().unwrap();
//! assert_eq!(guard.to_string(), "(start && !estop)");
//! assert!(guard.is_input_only());
//! ```

use crate::fault_latch::{FaultStatus, LatchState};
use fsm_common::error::ConfigError;
use fsm_common::signal::Inputs;
use fsm_stdlib::timers::TimerService;
use std::fmt;
use std::str::FromStr;

/// Words with a meaning in the guard language; they cannot name inputs.
pub const RESERVED_WORDS: &[&str] = &[
    "true",
    "false",
    "expired",
    "faulted",
    "retry_exceeded",
    "fault_code",
    "retries",
];

/// Left-hand side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// Numeric view of an input.
    Input(String),
    /// Code of the latched fault (`0` when clear).
    FaultCode,
    /// Retry count of the fault latch.
    Retries,
}

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `<`
    Lt,
    /// `<=`
    Le,
}

impl CmpOp {
    fn apply(self, lhs: f64, rhs: f64) -> bool {
        match self {
            Self::Eq => (lhs - rhs).abs() < f64::EPSILON,
            Self::Ne => (lhs - rhs).abs() >= f64::EPSILON,
            Self::Gt => lhs > rhs,
            Self::Ge => lhs >= rhs,
            Self::Lt => lhs < rhs,
            Self::Le => lhs <= rhs,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
        }
    }
}

/// A parsed guard expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Guard {
    /// Constant.
    Const(bool),
    /// Input is truthy.
    Input(String),
    /// Numeric comparison.
    Compare(Operand, CmpOp, f64),
    /// Timer has expired.
    Expired(String),
    /// Fault latch is not clear.
    Faulted,
    /// Fault latch is in manual-intervention state.
    RetryExceeded,
    /// Logical NOT.
    Not(Box<Guard>),
    /// Logical AND.
    And(Box<Guard>, Box<Guard>),
    /// Logical OR.
    Or(Box<Guard>, Box<Guard>),
}

/// Everything a guard may look at during one cycle.
#[derive(Debug, Clone, Copy)]
pub struct GuardContext<'a> {
    /// Input snapshot of the current cycle.
    pub inputs: &'a Inputs,
    /// Timers of the evaluating controller.
    pub timers: &'a TimerService,
    /// Fault latch status at the start of evaluation.
    pub fault: FaultStatus,
}

impl Guard {
    /// Truthiness check on an input.
    #[must_use]
    pub fn input(name: impl Into<String>) -> Self {
        Self::Input(name.into())
    }

    /// Expiry check on a timer.
    #[must_use]
    pub fn expired(timer: impl Into<String>) -> Self {
        Self::Expired(timer.into())
    }

    /// Numeric comparison on an input.
    #[must_use]
    pub fn compare(name: impl Into<String>, op: CmpOp, value: f64) -> Self {
        Self::Compare(Operand::Input(name.into()), op, value)
    }

    /// Conjunction.
    #[must_use]
    pub fn and(self, other: Guard) -> Self {
        Self::And(Box::new(self), Box::new(other))
    }

    /// Disjunction.
    #[must_use]
    pub fn or(self, other: Guard) -> Self {
        Self::Or(Box::new(self), Box::new(other))
    }

    /// Parse a guard expression.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidGuard`] on syntax errors, on empty
    /// input and on trailing text after a complete expression.
    pub fn parse(expr: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidGuard {
            expr: expr.to_string(),
            reason,
        };

        let trimmed = expr.trim();
        if trimmed.is_empty() {
            return Err(invalid("empty guard expression".to_string()));
        }

        let mut parser = Parser::new(trimmed);
        let guard = parser.parse_expr().map_err(invalid)?;
        parser.skip_whitespace();
        if parser.pos < trimmed.len() {
            return Err(invalid(format!(
                "unexpected '{}' at offset {}",
                &trimmed[parser.pos..],
                parser.pos
            )));
        }
        Ok(guard)
    }

    /// Evaluate the guard.
    #[must_use]
    pub fn evaluate(&self, ctx: &GuardContext<'_>) -> bool {
        self.eval(ctx.inputs, Some(ctx.timers), &ctx.fault)
    }

    /// Evaluate against inputs alone: timers read as not expired and the
    /// fault latch as clear. Meant for guards that pass [`Guard::is_input_only`].
    #[must_use]
    pub fn evaluate_inputs(&self, inputs: &Inputs) -> bool {
        self.eval(inputs, None, &FaultStatus::default())
    }

    fn eval(&self, inputs: &Inputs, timers: Option<&TimerService>, fault: &FaultStatus) -> bool {
        match self {
            Self::Const(value) => *value,
            Self::Input(name) => inputs.digital(name),
            Self::Compare(operand, op, rhs) => {
                let lhs = match operand {
                    Operand::Input(name) => inputs.analog(name),
                    Operand::FaultCode => f64::from(fault.code.unwrap_or(0)),
                    Operand::Retries => f64::from(fault.retries),
                };
                op.apply(lhs, *rhs)
            }
            Self::Expired(timer) => timers.is_some_and(|t| t.is_expired(timer)),
            Self::Faulted => fault.state != LatchState::Clear,
            Self::RetryExceeded => fault.state == LatchState::RetryExceeded,
            Self::Not(inner) => !inner.eval(inputs, timers, fault),
            Self::And(left, right) => {
                left.eval(inputs, timers, fault) && right.eval(inputs, timers, fault)
            }
            Self::Or(left, right) => {
                left.eval(inputs, timers, fault) || right.eval(inputs, timers, fault)
            }
        }
    }

    /// Whether the guard depends on nothing but inputs.
    #[must_use]
    pub fn is_input_only(&self) -> bool {
        let mut input_only = true;
        self.walk(&mut |g| {
            if matches!(
                g,
                Self::Expired(_)
                    | Self::Faulted
                    | Self::RetryExceeded
                    | Self::Compare(Operand::FaultCode | Operand::Retries, _, _)
            ) {
                input_only = false;
            }
        });
        input_only
    }

    /// Names of every input the guard reads.
    #[must_use]
    pub fn input_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.walk(&mut |g| match g {
            Self::Input(name) | Self::Compare(Operand::Input(name), _, _) => {
                names.push(name.as_str());
            }
            _ => {}
        });
        names
    }

    /// Names of every timer the guard reads.
    #[must_use]
    pub fn timer_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.walk(&mut |g| {
            if let Self::Expired(name) = g {
                names.push(name.as_str());
            }
        });
        names
    }

    fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Guard)) {
        f(self);
        match self {
            Self::Not(inner) => inner.walk(f),
            Self::And(left, right) | Self::Or(left, right) => {
                left.walk(f);
                right.walk(f);
            }
            _ => {}
        }
    }
}

impl std::ops::Not for Guard {
    type Output = Guard;

    fn not(self) -> Guard {
        Guard::Not(Box::new(self))
    }
}

impl From<Guard> for String {
    fn from(guard: Guard) -> Self {
        guard.to_string()
    }
}

impl FromStr for Guard {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Const(value) => write!(f, "{value}"),
            Self::Input(name) => write!(f, "{name}"),
            Self::Compare(operand, op, rhs) => {
                match operand {
                    Operand::Input(name) => write!(f, "{name}")?,
                    Operand::FaultCode => write!(f, "fault_code")?,
                    Operand::Retries => write!(f, "retries")?,
                }
                write!(f, " {} {rhs}", op.symbol())
            }
            Self::Expired(timer) => write!(f, "expired({timer})"),
            Self::Faulted => write!(f, "faulted"),
            Self::RetryExceeded => write!(f, "retry_exceeded"),
            Self::Not(inner) => write!(f, "!{inner}"),
            Self::And(left, right) => write!(f, "({left} && {right})"),
            Self::Or(left, right) => write!(f, "({left} || {right})"),
        }
    }
}

/// Deepest operator nesting a guard may have. Bounds the parser's
/// recursion and the depth of the resulting tree.
const MAX_DEPTH: usize = 128;

/// Recursive descent parser. Errors are plain reasons; [`Guard::parse`]
/// attaches the expression text.
struct Parser<'a> {
    input: &'a str,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            depth: 0,
        }
    }

    fn descend(&mut self) -> Result<(), String> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(format!("nesting too deep (limit {MAX_DEPTH})"));
        }
        Ok(())
    }

    fn parse_expr(&mut self) -> Result<Guard, String> {
        self.parse_or()
    }

    // Each chained operator nests the tree one level deeper on the left.
    fn parse_or(&mut self) -> Result<Guard, String> {
        let entry = self.depth;
        let mut left = self.parse_and()?;
        self.skip_whitespace();

        while self.eat("||") {
            self.descend()?;
            let right = self.parse_and()?;
            left = left.or(right);
            self.skip_whitespace();
        }

        self.depth = entry;
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Guard, String> {
        let entry = self.depth;
        let mut left = self.parse_unary()?;
        self.skip_whitespace();

        while self.eat("&&") {
            self.descend()?;
            let right = self.parse_unary()?;
            left = left.and(right);
            self.skip_whitespace();
        }

        self.depth = entry;
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Guard, String> {
        self.skip_whitespace();

        // `!=` never starts an operand, so a leading `!` is always NOT.
        if self.eat("!") {
            self.descend()?;
            let inner = self.parse_unary()?;
            self.depth -= 1;
            return Ok(!inner);
        }

        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Guard, String> {
        self.skip_whitespace();

        if self.eat("(") {
            self.descend()?;
            let expr = self.parse_expr()?;
            self.skip_whitespace();
            if !self.eat(")") {
                return Err(format!("expected ')' at offset {}", self.pos));
            }
            self.depth -= 1;
            return Ok(expr);
        }

        let word = self.parse_ident()?;
        match word {
            "true" => Ok(Guard::Const(true)),
            "false" => Ok(Guard::Const(false)),
            "faulted" => Ok(Guard::Faulted),
            "retry_exceeded" => Ok(Guard::RetryExceeded),
            "expired" => {
                self.skip_whitespace();
                if !self.eat("(") {
                    return Err("expected '(' after 'expired'".to_string());
                }
                self.skip_whitespace();
                let timer = self.parse_ident()?.to_string();
                self.skip_whitespace();
                if !self.eat(")") {
                    return Err(format!("expected ')' after timer '{timer}'"));
                }
                Ok(Guard::Expired(timer))
            }
            "fault_code" => self.parse_comparison(Operand::FaultCode),
            "retries" => self.parse_comparison(Operand::Retries),
            name => self.parse_comparison(Operand::Input(name.to_string())),
        }
    }

    fn parse_comparison(&mut self, operand: Operand) -> Result<Guard, String> {
        self.skip_whitespace();

        // Two-character operators first so `>=` is not read as `>`.
        let op = if self.eat("==") {
            CmpOp::Eq
        } else if self.eat("!=") {
            CmpOp::Ne
        } else if self.eat(">=") {
            CmpOp::Ge
        } else if self.eat("<=") {
            CmpOp::Le
        } else if self.eat(">") {
            CmpOp::Gt
        } else if self.eat("<") {
            CmpOp::Lt
        } else {
            return Ok(match operand {
                Operand::Input(name) => Guard::Input(name),
                other => Guard::Compare(other, CmpOp::Ne, 0.0),
            });
        };

        let value = self.parse_number()?;
        Ok(Guard::Compare(operand, op, value))
    }

    fn parse_ident(&mut self) -> Result<&'a str, String> {
        self.skip_whitespace();
        let start = self.pos;

        match self.peek_char() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => self.pos += 1,
            Some(c) => return Err(format!("unexpected '{c}' at offset {start}")),
            None => return Err("unexpected end of expression".to_string()),
        }

        while let Some(c) = self.peek_char() {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
                self.pos += 1;
            } else {
                break;
            }
        }

        Ok(&self.input[start..self.pos])
    }

    fn parse_number(&mut self) -> Result<f64, String> {
        self.skip_whitespace();
        let start = self.pos;

        // Booleans compare as 1/0.
        let rest = &self.input[self.pos..];
        for (word, value) in [("true", 1.0), ("false", 0.0)] {
            if rest.starts_with(word)
                && !rest[word.len()..]
                    .starts_with(|c: char| c.is_ascii_alphanumeric() || c == '_')
            {
                self.pos += word.len();
                return Ok(value);
            }
        }

        if self.peek_char() == Some('-') {
            self.pos += 1;
        }
        while let Some(c) = self.peek_char() {
            if c.is_ascii_digit() || c == '.' {
                self.pos += 1;
            } else {
                break;
            }
        }

        let text = &self.input[start..self.pos];
        text.parse::<f64>()
            .map_err(|_| format!("expected number at offset {start}"))
    }

    fn eat(&mut self, token: &str) -> bool {
        if self.input[self.pos..].starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek_char() {
            if c.is_whitespace() {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
    }
}
