//! Error types for program decoding and symbolic execution.
//!
//! The two taxonomies are deliberately disjoint: a `ParserError` is fatal at
//! load time, while an `ExecError` only fails the path that raised it. The
//! exploration engine catches `ExecError` at step boundaries and routes the
//! offending state to the `errored` stash; every other path keeps running.

use std::fmt;
use std::io;

/// Errors raised while decoding Whitespace source text.
#[derive(Debug)]
pub enum ParserError {
    /// No instruction category matches the tokens at `offset`.
    UnknownImp { offset: usize },
    /// The category decoded at `offset` has no opcode with the following
    /// token pattern.
    UnknownOpcode { offset: usize },
    /// A parameter was expected but no space/tab run terminated by a newline
    /// was found.
    UnknownParameter { offset: usize },
    /// A parameter bit run does not fit a machine integer.
    ParameterDecode { offset: usize },
    /// The program file could not be read.
    Io(io::Error),
}

impl fmt::Display for ParserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParserError::UnknownImp { offset } => {
                write!(f, "unknown instruction category at token {}", offset)
            }
            ParserError::UnknownOpcode { offset } => {
                write!(f, "unknown opcode at token {}", offset)
            }
            ParserError::UnknownParameter { offset } => {
                write!(f, "expected a parameter at token {}", offset)
            }
            ParserError::ParameterDecode { offset } => {
                write!(f, "parameter at token {} does not fit an integer", offset)
            }
            ParserError::Io(e) => write!(f, "failed to read program: {}", e),
        }
    }
}

impl std::error::Error for ParserError {}

impl From<io::Error> for ParserError {
    fn from(e: io::Error) -> Self {
        ParserError::Io(e)
    }
}

/// Per-state errors raised during symbolic execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecError {
    /// A pop or peek on an empty operand stack.
    EmptyStack,
    /// RETURN with no saved return address.
    EmptyCallstack,
    /// Division or modulo whose divisor evaluates to zero.
    DivideByZero,
    /// A jump, call, or conditional names a label with no MARK.
    UnknownLabel(i64),
    /// A term failed to evaluate to a numeral or Boolean under the cached
    /// model.
    Solver(String),
    /// Any other semantic violation, e.g. printing a value outside 0..=255
    /// as a character.
    Execution(String),
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecError::EmptyStack => write!(f, "pop from an empty stack"),
            ExecError::EmptyCallstack => write!(f, "return with an empty callstack"),
            ExecError::DivideByZero => write!(f, "division by zero"),
            ExecError::UnknownLabel(label) => write!(f, "jump to unknown label {}", label),
            ExecError::Solver(message) => write!(f, "solver error: {}", message),
            ExecError::Execution(message) => write!(f, "{}", message),
        }
    }
}

impl std::error::Error for ExecError {}
