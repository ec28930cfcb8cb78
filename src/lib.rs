//! SchemeXP - Scheme interpreter core
//!
//! This crate provides the core of a Scheme interpreter: a dynamically typed
//! value domain with a full numeric tower, lexically scoped environments with
//! separate variable and macro namespaces, and a continuation-passing
//! evaluator that supports first-class continuations (`call/cc`) and proper
//! tail calls.
//!
//! ## Quick start
//!
//! ```scheme
//! (define (count n acc)
//!   (if (= n 0) acc (count (- n 1) (+ acc 1))))
//! (count 100000 0)              ; runs in constant continuation depth
//! (call/cc (lambda (k) (k 42))) ; => 42
//! ```
//!
//! ```rust
//! use schemexp::builtinops::create_global_env;
//! use schemexp::evaluator::eval;
//! use schemexp::scheme::parse_scheme;
//!
//! let env = create_global_env();
//! let expr = parse_scheme("(+ 1 2 3)").unwrap();
//! let result = eval(&env, &expr).unwrap();
//! assert_eq!(format!("{result}"), "6");
//! ```
//!
//! ## Architecture
//!
//! The evaluator never recurses into the host stack for Scheme-level control
//! flow. Every reduction is a state transition of an explicit trampoline, and
//! the continuation is an ordinary value. Capturing a continuation with
//! `call/cc` and invoking it later are both plain value moves, which is what
//! makes re-entrant control transfer and unbounded tail recursion work.
//!
//! Bindings live in mutable cells. A binding whose value is an aggregate can
//! be aliased by other bindings through internal pointer values; rebinding the
//! canonical holder relocates the aggregate so every alias keeps seeing it.
//!
//! ## Modules
//!
//! - `ast`: the `Value` type, equality, ordering and canonical printing
//! - `number`: numeric tower promotion and arithmetic
//! - `env`: environment frames, namespaces and the aliasing protocol
//! - `evaluator`: the trampoline, continuations and special forms
//! - `builtinops`: the built-in operation registry and global environment
//! - `scheme`: S-expression parsing from text

use std::fmt;

use crate::ast::Value;

/// Maximum parsing depth to prevent stack overflow from hostile input.
/// This limits nesting of lists, vectors and quote sugar in the parser.
pub const MAX_PARSE_DEPTH: usize = 64;

/// Categorizes the different kinds of parsing errors.
#[derive(Debug, PartialEq, Clone)]
pub enum ParseErrorKind {
    /// Invalid or unexpected syntax (bad tokens, malformed expressions)
    InvalidSyntax,
    /// Input ended before the expression was complete (EOF, unterminated string, unclosed parens)
    Incomplete,
    /// Expression nesting exceeded the maximum parse depth
    TooDeeplyNested,
    /// Extra input found after a complete, valid expression
    TrailingContent,
}

/// A structured error providing detailed information about a parsing failure.
#[derive(Debug, PartialEq, Clone)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    /// Context snippet from the input showing where the error occurred (max 100 chars)
    pub context: Option<String>,
    /// The problematic token or character encountered, if identifiable
    pub found: Option<String>,
}

impl ParseError {
    /// Create a ParseError with all fields
    pub fn new(
        kind: ParseErrorKind,
        message: impl Into<String>,
        context: Option<String>,
        found: Option<String>,
    ) -> Self {
        ParseError {
            kind,
            message: message.into(),
            context,
            found,
        }
    }

    /// Create a simple ParseError with a kind and message but no context
    pub fn from_message(kind: ParseErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message, None, None)
    }

    /// Create a ParseError with context extracted from input at a given offset
    pub fn with_context(
        kind: ParseErrorKind,
        message: impl Into<String>,
        input: &str,
        error_offset: usize,
    ) -> Self {
        const MAX_CONTEXT: usize = 100;

        // Show some context before the error position as well.
        let context_start = error_offset.saturating_sub(20);

        let context_str: String = input
            .chars()
            .skip(context_start)
            .take(MAX_CONTEXT)
            .collect();

        let mut display_context = String::new();
        if context_start > 0 {
            display_context.push_str("[...]");
        }
        display_context.push_str(&context_str);
        if context_start + context_str.len() < input.len() {
            display_context.push_str("[...]");
        }

        // Replace newlines with visible markers for better error display
        let display_context = display_context.replace('\n', "\\n").replace('\r', "");

        Self::new(kind, message, Some(display_context), None)
    }
}

/// Error taxonomy for the interpreter.
///
/// Every fallible operation in the crate returns one of these. Errors raised
/// during evaluation bubble up the continuation chain, bypassing intermediate
/// CPS steps, and surface from [`evaluator::eval`] as an `Err`; no Scheme code
/// can intercept them.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Arity mismatch at application
    NumArgs { expected: usize, got: usize },
    /// A primitive received a value of the wrong type
    TypeMismatch(String, Value),
    /// Parser failure, surfaced through the evaluator
    Parser(ParseError),
    /// Syntactic misuse of a special form
    BadSpecialForm(String, Value),
    /// Attempted to apply a non-procedure
    NotFunction(String, String),
    /// Lookup or mutation of an unknown variable
    UnboundVar(String, String),
    /// Division by an exact zero
    DivideByZero,
    /// Feature gap
    NotImplemented(String),
    /// Fallback
    Default(String),
}

impl Error {
    /// Create a NumArgs error
    pub fn num_args(expected: usize, got: usize) -> Self {
        Error::NumArgs { expected, got }
    }

    /// Create a TypeMismatch error from the expected description and the offending value
    pub fn type_mismatch(expected: impl Into<String>, found: &Value) -> Self {
        Error::TypeMismatch(expected.into(), found.clone())
    }

    /// Create an UnboundVar error for a failed variable read
    pub fn unbound(name: impl Into<String>) -> Self {
        Error::UnboundVar("Getting an unbound variable".into(), name.into())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::NumArgs { expected, got } => {
                write!(f, "Expected {expected} args; found {got}")
            }
            Error::TypeMismatch(expected, found) => {
                write!(f, "Invalid type: expected {expected}, found {found}")
            }
            Error::Parser(e) => {
                write!(f, "Parse error: {}", e.message)?;
                if let Some(found) = &e.found {
                    write!(f, "\nFound: {found}")?;
                }
                if let Some(context) = &e.context {
                    write!(f, "\nContext: {context}")?;
                }
                Ok(())
            }
            Error::BadSpecialForm(msg, form) => write!(f, "{msg}: {form}"),
            Error::NotFunction(msg, name) => write!(f, "{msg}: {name}"),
            Error::UnboundVar(msg, name) => write!(f, "{msg}: {name}"),
            Error::DivideByZero => write!(f, "Division by zero"),
            Error::NotImplemented(msg) => write!(f, "Not implemented: {msg}"),
            Error::Default(msg) => write!(f, "{msg}"),
        }
    }
}

pub mod ast;
pub mod builtinops;
pub mod env;
pub mod evaluator;
pub mod number;

#[cfg(feature = "scheme")]
pub mod scheme;
