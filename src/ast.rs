//! This module defines the core value types and helper functions for
//! representing data in the interpreter. The main enum, [`Value`], covers all
//! Scheme data types: the numeric tower (exact integers and rationals, inexact
//! reals and complex numbers), symbols, strings, characters, booleans, proper
//! and improper lists, vectors, hash tables, ports, host primitives, closures,
//! reified continuations and internal alias pointers. Ergonomic helper
//! functions such as [`val`], [`sym`], and [`nil`] are provided for convenient
//! value construction in both code and tests, along with conversion traits for
//! common Rust types. Equality and display logic follow Scheme semantics,
//! including round-trip compatibility of the printed form for every value that
//! has a source-text representation.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::rc::Rc;
use std::sync::Arc;

use num_bigint::BigInt;
use num_complex::Complex64;
use num_rational::BigRational;

use crate::Error;
use crate::env::Env;
use crate::evaluator::Continuation;

/// Allowed non-alphanumeric characters in Scheme symbol names.
/// Most represent mathematical symbols or predicates ("?"); "$" is accepted
/// for host-style identifiers.
pub(crate) const SYMBOL_SPECIAL_CHARS: &str = "+-*/<>=!?_$";

/// Check if a string is a valid symbol name.
/// Valid: non-empty, no leading digit, no "-digit" prefix, alphanumeric + SYMBOL_SPECIAL_CHARS
pub(crate) fn is_valid_symbol(name: &str) -> bool {
    let mut chars = name.chars();

    match chars.next() {
        None => false, // name is empty
        Some(first_char) => {
            if first_char.is_ascii_digit() {
                return false;
            }

            if first_char == '-'
                && let Some(second_char) = chars.next()
                && second_char.is_ascii_digit()
            {
                return false;
            }

            name.chars()
                .all(|c| c.is_alphanumeric() || SYMBOL_SPECIAL_CHARS.contains(c))
        }
    }
}

/// Canonical signature of a host primitive: evaluated arguments in, value or
/// error out. Both pure and I/O primitives use this shape; the registry
/// decides how the arguments are prepared (see `builtinops`).
pub type PrimitiveFn = dyn Fn(&[Value]) -> Result<Value, Error>;

/// The state behind an I/O port handle.
pub enum PortKind {
    /// Process standard input
    Stdin,
    /// Process standard output
    Stdout,
    /// Buffered reader over a file
    Input(BufReader<File>),
    /// Buffered writer over a file
    Output(BufWriter<File>),
    /// Explicitly closed; any further operation errors
    Closed,
}

/// An opaque I/O handle. Ports are shared by reference: cloning a port value
/// clones the handle, not the underlying stream. Dropping the last handle
/// closes the stream; the `close-*` primitives close it early.
#[derive(Clone)]
pub struct Port(pub(crate) Rc<RefCell<PortKind>>);

impl Port {
    pub fn stdin() -> Self {
        Port(Rc::new(RefCell::new(PortKind::Stdin)))
    }

    pub fn stdout() -> Self {
        Port(Rc::new(RefCell::new(PortKind::Stdout)))
    }

    pub fn from_reader(file: File) -> Self {
        Port(Rc::new(RefCell::new(PortKind::Input(BufReader::new(file)))))
    }

    pub fn from_writer(file: File) -> Self {
        Port(Rc::new(RefCell::new(PortKind::Output(BufWriter::new(
            file,
        )))))
    }

    pub fn is_input(&self) -> bool {
        matches!(*self.0.borrow(), PortKind::Stdin | PortKind::Input(_))
    }

    pub fn is_output(&self) -> bool {
        matches!(*self.0.borrow(), PortKind::Stdout | PortKind::Output(_))
    }

    /// Read one line, without the trailing newline. `None` at EOF.
    pub fn read_line(&self) -> Result<Option<String>, Error> {
        let mut line = String::new();
        let n = match &mut *self.0.borrow_mut() {
            PortKind::Stdin => std::io::stdin()
                .read_line(&mut line)
                .map_err(|e| Error::Default(format!("read error: {e}")))?,
            PortKind::Input(reader) => reader
                .read_line(&mut line)
                .map_err(|e| Error::Default(format!("read error: {e}")))?,
            _ => return Err(Error::Default("port is not open for input".into())),
        };
        if n == 0 {
            return Ok(None);
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(Some(line))
    }

    /// Write a string to the port.
    pub fn write_str(&self, s: &str) -> Result<(), Error> {
        match &mut *self.0.borrow_mut() {
            PortKind::Stdout => {
                print!("{s}");
                Ok(())
            }
            PortKind::Output(writer) => writer
                .write_all(s.as_bytes())
                .map_err(|e| Error::Default(format!("write error: {e}"))),
            _ => Err(Error::Default("port is not open for output".into())),
        }
    }

    /// Flush and drop the underlying stream. Idempotent.
    pub fn close(&self) {
        let mut kind = self.0.borrow_mut();
        if let PortKind::Output(writer) = &mut *kind {
            let _ = writer.flush();
        }
        *kind = PortKind::Closed;
    }
}

/// A function value: parameter names, optional rest parameter, body forms,
/// the captured lexical environment, and whether the body is evaluated in
/// tail position (reusing the caller's continuation). Ordinary lambdas are
/// tail-evaluating; macro transformers are not, so that the expansion step
/// installed by the evaluator always runs after the body.
pub struct Closure {
    pub params: Vec<String>,
    pub rest: Option<String>,
    pub body: Vec<Value>,
    pub env: Env,
    pub tail: bool,
}

/// Core value type of the interpreter.
///
/// To build a value, use the ergonomic helper functions:
/// - `val(42)` for values, `sym("name")` for symbols, `nil()` for empty lists
/// - `val([1, 2, 3])` for homogeneous lists
/// - `val(vec![sym("op"), val(42)])` for mixed lists
#[derive(Clone)]
pub enum Value {
    /// Symbols (identifiers); equality by name
    Symbol(String),
    /// Proper lists; the empty list is `List(vec![])`
    List(Vec<Value>),
    /// Improper lists `(a b . c)`: head elements plus a non-list tail
    Pair(Vec<Value>, Box<Value>),
    /// Vectors `#(...)`: fixed length, elements mutable through cells
    Vector(Vec<Value>),
    /// Hash tables with a stable, order-independent-equality mapping
    HashTable(BTreeMap<HashKey, Value>),
    /// Exact unbounded integers
    Integer(BigInt),
    /// Exact rationals in canonical form (denominator > 0, reduced, never integral)
    Rational(BigRational),
    /// Inexact reals
    Real(f64),
    /// Inexact complex numbers
    Complex(Complex64),
    /// Mutable strings
    String(String),
    /// Unicode characters
    Char(char),
    /// Booleans; only `#f` is falsy
    Bool(bool),
    /// Pure host primitive; compared by id
    PrimFn {
        id: String,
        func: Arc<PrimitiveFn>,
    },
    /// I/O-capable host primitive; compared by id
    IoFn {
        id: String,
        func: Arc<PrimitiveFn>,
    },
    /// Opaque I/O handle
    Port(Port),
    /// User-defined function closing over its environment
    Closure(Rc<Closure>),
    /// Reified continuation
    Continuation(Rc<Continuation>),
    /// Internal alias: a view onto the binding `name` in `env`.
    /// Never produced by the parser; see the `env` module for the protocol.
    Pointer { name: String, env: Env },
    /// Internal sentinel (also the unspecified value); never user-visible
    Nil(String),
}

impl Value {
    /// The unspecified value, delivered by forms with no useful result.
    pub fn unspecified() -> Value {
        Value::Nil(String::new())
    }

    /// Check if a value is the empty list
    pub fn is_empty_list(&self) -> bool {
        matches!(self, Value::List(list) if list.is_empty())
    }

    /// Scheme truthiness: everything except `#f` is true
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Bool(false))
    }

    /// True exactly for the variants that can participate in aliasing:
    /// lists, pairs, strings, vectors, hash tables and pointers.
    pub fn is_object(&self) -> bool {
        matches!(
            self,
            Value::List(_)
                | Value::Pair(_, _)
                | Value::String(_)
                | Value::Vector(_)
                | Value::HashTable(_)
                | Value::Pointer { .. }
        )
    }

    /// Build a possibly-improper list, normalising so that a `Pair` tail is
    /// never itself a list: `(a b . (c d))` collapses to `(a b c d)`.
    pub fn pair(mut head: Vec<Value>, tail: Value) -> Value {
        match tail {
            Value::List(rest) => {
                head.extend(rest);
                Value::List(head)
            }
            Value::Pair(mid, end) => {
                head.extend(mid);
                Value::Pair(head, end)
            }
            other if head.is_empty() => other,
            other => Value::Pair(head, Box::new(other)),
        }
    }

    /// Short type description used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Symbol(_) => "symbol",
            Value::List(_) => "list",
            Value::Pair(_, _) => "pair",
            Value::Vector(_) => "vector",
            Value::HashTable(_) => "hash table",
            Value::Integer(_) => "integer",
            Value::Rational(_) => "rational",
            Value::Real(_) => "real",
            Value::Complex(_) => "complex",
            Value::String(_) => "string",
            Value::Char(_) => "character",
            Value::Bool(_) => "boolean",
            Value::PrimFn { .. } => "primitive",
            Value::IoFn { .. } => "IO primitive",
            Value::Port(_) => "port",
            Value::Closure(_) => "procedure",
            Value::Continuation(_) => "continuation",
            Value::Pointer { .. } => "pointer",
            Value::Nil(_) => "nil",
        }
    }

    /// Stable rank of the variant tag, used by the cross-variant total order
    fn tag_rank(&self) -> u8 {
        match self {
            Value::Bool(_) => 0,
            Value::Char(_) => 1,
            Value::Integer(_) => 2,
            Value::Rational(_) => 3,
            Value::Real(_) => 4,
            Value::Complex(_) => 5,
            Value::Symbol(_) => 6,
            Value::String(_) => 7,
            Value::List(_) => 8,
            Value::Pair(_, _) => 9,
            Value::Vector(_) => 10,
            Value::HashTable(_) => 11,
            Value::PrimFn { .. } => 12,
            Value::IoFn { .. } => 13,
            Value::Closure(_) => 14,
            Value::Continuation(_) => 15,
            Value::Port(_) => 16,
            Value::Pointer { .. } => 17,
            Value::Nil(_) => 18,
        }
    }

    /// Total order over all values.
    ///
    /// Within a variant the natural order applies (numeric for numbers,
    /// lexicographic for symbols, strings, characters and booleans); across
    /// variants the stable tag order decides. Aggregates and procedures
    /// without a natural order fall back to comparing their canonical printed
    /// forms. This is the order behind hash-table keys and sorting.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        let rank = self.tag_rank().cmp(&other.tag_rank());
        if rank != Ordering::Equal {
            return rank;
        }
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Char(a), Value::Char(b)) => a.cmp(b),
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Rational(a), Value::Rational(b)) => a.cmp(b),
            (Value::Real(a), Value::Real(b)) => a.total_cmp(b),
            (Value::Complex(a), Value::Complex(b)) => a
                .re
                .total_cmp(&b.re)
                .then_with(|| a.im.total_cmp(&b.im)),
            (Value::Symbol(a), Value::Symbol(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            _ => self.to_string().cmp(&other.to_string()),
        }
    }

    /// Value equality (`eqv?`): equal payloads for primitive values of the
    /// same concrete variant, structural equality for aggregates, identity
    /// for procedures, ports and continuations. Heterogeneous variants are
    /// never equal; in particular `1` and `1.0` differ.
    pub fn eqv(&self, other: &Value) -> bool {
        self == other
    }

    /// Structural equality (`equal?`). Aggregates already compare
    /// structurally under `eqv`, so the two predicates coincide here; the
    /// separate entry point documents intent at call sites.
    pub fn is_equal(&self, other: &Value) -> bool {
        self == other
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Pair(a, at), Value::Pair(b, bt)) => a == b && at == bt,
            (Value::Vector(a), Value::Vector(b)) => a == b,
            (Value::HashTable(a), Value::HashTable(b)) => {
                // BTreeMap iterates in key order, so entrywise comparison is
                // order-independent by construction.
                a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|((ka, va), (kb, vb))| ka == kb && va == vb)
            }
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Rational(a), Value::Rational(b)) => a == b,
            (Value::Real(a), Value::Real(b)) => a == b,
            (Value::Complex(a), Value::Complex(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::PrimFn { id: a, .. }, Value::PrimFn { id: b, .. }) => a == b,
            (Value::IoFn { id: a, .. }, Value::IoFn { id: b, .. }) => a == b,
            (Value::Port(a), Value::Port(b)) => Rc::ptr_eq(&a.0, &b.0),
            (Value::Closure(a), Value::Closure(b)) => Rc::ptr_eq(a, b),
            (Value::Continuation(a), Value::Continuation(b)) => Rc::ptr_eq(a, b),
            (Value::Pointer { name: a, env: ea }, Value::Pointer { name: b, env: eb }) => {
                a == b && ea == eb
            }
            (Value::Nil(a), Value::Nil(b)) => a == b,
            _ => false, // Different variants are never equal
        }
    }
}

/// A wrapper giving [`Value`] the `Eq`/`Ord` instances required for use as an
/// ordered-map key, via [`Value::total_cmp`].
#[derive(Debug, Clone)]
pub struct HashKey(pub Value);

impl PartialEq for HashKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == Ordering::Equal
    }
}

impl Eq for HashKey {}

impl PartialOrd for HashKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HashKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

// From trait implementations for Value - enables .into() conversion

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<char> for Value {
    fn from(c: char) -> Self {
        Value::Char(c)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Real(x)
    }
}

impl From<BigInt> for Value {
    fn from(n: BigInt) -> Self {
        Value::Integer(n)
    }
}

macro_rules! impl_from_integer {
    ($int_type:ty) => {
        impl From<$int_type> for Value {
            fn from(n: $int_type) -> Self {
                Value::Integer(BigInt::from(n))
            }
        }
    };
}

// Generate From implementations for the common integer types
impl_from_integer!(i8);
impl_from_integer!(i16);
impl_from_integer!(i32);
impl_from_integer!(i64);
impl_from_integer!(u8);
impl_from_integer!(u16);
impl_from_integer!(u32);
impl_from_integer!(u64);
impl_from_integer!(usize);

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(|x| x.into()).collect())
    }
}

impl<T: Into<Value>, const N: usize> From<[T; N]> for Value {
    fn from(arr: [T; N]) -> Self {
        Value::List(arr.into_iter().map(|x| x.into()).collect())
    }
}

impl<T: Into<Value> + Clone> From<&[T]> for Value {
    fn from(slice: &[T]) -> Self {
        Value::List(slice.iter().cloned().map(|x| x.into()).collect())
    }
}

/// Helper function for creating symbols - works great in mixed lists!
pub(crate) fn sym<S: AsRef<str>>(name: S) -> Value {
    Value::Symbol(name.as_ref().to_owned())
}

/// Helper function for creating Values from any convertible type
pub(crate) fn val<T: Into<Value>>(value: T) -> Value {
    value.into()
}

/// Helper function for creating empty lists (nil)
pub(crate) fn nil() -> Value {
    Value::List(vec![])
}

/// Print a real so it survives a round trip: a finite float with no
/// fractional part keeps an explicit decimal point, so `1.0` never reads
/// back as the exact integer `1`.
fn write_real(f: &mut fmt::Formatter<'_>, x: f64) -> fmt::Result {
    if x.is_finite() && x.fract() == 0.0 {
        write!(f, "{x:.1}")
    } else {
        write!(f, "{x}")
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Symbol(s) => write!(f, "{s}"),
            Value::List(elements) => {
                write!(f, "(")?;
                for (i, elem) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{elem}")?;
                }
                write!(f, ")")
            }
            Value::Pair(head, tail) => {
                write!(f, "(")?;
                for (i, elem) in head.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{elem}")?;
                }
                write!(f, " . {tail})")
            }
            Value::Vector(elements) => {
                write!(f, "#(")?;
                for (i, elem) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{elem}")?;
                }
                write!(f, ")")
            }
            Value::HashTable(table) => {
                write!(f, "#hash(")?;
                for (i, (key, value)) in table.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "({} . {value})", key.0)?;
                }
                write!(f, ")")
            }
            Value::Integer(n) => write!(f, "{n}"),
            Value::Rational(r) => write!(f, "{}/{}", r.numer(), r.denom()),
            Value::Real(x) => write_real(f, *x),
            Value::Complex(z) => {
                write_real(f, z.re)?;
                if z.im.is_sign_negative() {
                    write!(f, "-")?;
                } else {
                    write!(f, "+")?;
                }
                write_real(f, z.im.abs())?;
                write!(f, "i")
            }
            Value::String(s) => {
                write!(f, "\"")?;
                for ch in s.chars() {
                    match ch {
                        '"' => write!(f, "\\\"")?,
                        '\\' => write!(f, "\\\\")?,
                        '\n' => write!(f, "\\n")?,
                        '\t' => write!(f, "\\t")?,
                        '\r' => write!(f, "\\r")?,
                        c => write!(f, "{c}")?,
                    }
                }
                write!(f, "\"")
            }
            Value::Char(c) => match c {
                ' ' => write!(f, "#\\space"),
                '\n' => write!(f, "#\\newline"),
                '\t' => write!(f, "#\\tab"),
                c => write!(f, "#\\{c}"),
            },
            Value::Bool(b) => write!(f, "{}", if *b { "#t" } else { "#f" }),
            Value::PrimFn { .. } => write!(f, "<primitive>"),
            Value::IoFn { .. } => write!(f, "<IO primitive>"),
            Value::Port(_) => write!(f, "<IO port>"),
            Value::Closure(c) => {
                write!(f, "(lambda ")?;
                match (&c.params[..], &c.rest) {
                    ([], Some(rest)) => write!(f, "{rest}")?,
                    (params, rest) => {
                        write!(f, "(")?;
                        for (i, p) in params.iter().enumerate() {
                            if i > 0 {
                                write!(f, " ")?;
                            }
                            write!(f, "{p}")?;
                        }
                        if let Some(rest) = rest {
                            write!(f, " . {rest}")?;
                        }
                        write!(f, ")")?;
                    }
                }
                write!(f, " ...)")
            }
            Value::Continuation(_) => write!(f, "<continuation>"),
            // An alias prints as whatever it points at; a dangling alias
            // (unbound target) is only reachable through internal misuse.
            Value::Pointer { name, .. } => match crate::env::deref(self) {
                Ok(target) => write!(f, "{target}"),
                Err(_) => write!(f, "<pointer {name}>"),
            },
            Value::Nil(_) => Ok(()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Symbol(s) => write!(f, "Symbol({s})"),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::Char(c) => write!(f, "Char({c:?})"),
            Value::Integer(n) => write!(f, "Integer({n})"),
            Value::Rational(r) => write!(f, "Rational({}/{})", r.numer(), r.denom()),
            Value::Real(x) => write!(f, "Real({x})"),
            Value::Complex(z) => write!(f, "Complex({}, {})", z.re, z.im),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::List(elements) => f.debug_tuple("List").field(elements).finish(),
            Value::Pair(head, tail) => f.debug_tuple("Pair").field(head).field(tail).finish(),
            Value::Vector(elements) => f.debug_tuple("Vector").field(elements).finish(),
            Value::HashTable(table) => write!(f, "HashTable({} entries)", table.len()),
            Value::PrimFn { id, .. } => write!(f, "PrimFn({id})"),
            Value::IoFn { id, .. } => write!(f, "IoFn({id})"),
            Value::Port(_) => write!(f, "Port"),
            Value::Closure(c) => write!(f, "Closure(params={:?}, rest={:?})", c.params, c.rest),
            Value::Continuation(_) => write!(f, "Continuation"),
            // Deliberately shallow: printing the target env would recurse
            // through shared frames.
            Value::Pointer { name, .. } => write!(f, "Pointer({name})"),
            Value::Nil(tag) => write!(f, "Nil({tag:?})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::One;

    fn rational(n: i64, d: i64) -> Value {
        Value::Rational(BigRational::new(BigInt::from(n), BigInt::from(d)))
    }

    #[test]
    fn test_helper_functions_data_driven() {
        // Test cases as (Value, Value) tuples: (helper_result, expected_value)
        let test_cases = vec![
            (val(42), Value::Integer(BigInt::from(42))),
            (val(-17i64), Value::Integer(BigInt::from(-17))),
            (val(true), Value::Bool(true)),
            (val(2.5), Value::Real(2.5)),
            (val('x'), Value::Char('x')),
            (val("hello"), Value::String("hello".to_owned())),
            (val(""), Value::String(String::new())),
            (sym("foo-bar?"), Value::Symbol("foo-bar?".to_owned())),
            (sym("-"), Value::Symbol("-".to_owned())),
            (sym(String::from("test")), Value::Symbol("test".to_owned())),
            (nil(), Value::List(vec![])),
            (
                val([1, 2, 3]),
                Value::List(vec![val(1), val(2), val(3)]),
            ),
            (
                val(vec![sym("op"), val(42), val("x"), val(true)]),
                Value::List(vec![sym("op"), val(42), val("x"), val(true)]),
            ),
        ];

        for (i, (actual, expected)) in test_cases.iter().enumerate() {
            assert_eq!(actual, expected, "Helper test case {} failed", i + 1);
        }
    }

    #[test]
    fn test_symbol_validity() {
        for name in ["foo", "+", "-", "-abc", "call/cc", "set!", "a->b", "x1"] {
            assert!(is_valid_symbol(name), "{name} should be a valid symbol");
        }
        for name in ["", "1abc", "-1x", "has space", "a#b", "a@b"] {
            assert!(!is_valid_symbol(name), "{name} should be invalid");
        }
    }

    #[test]
    fn test_display_canonical_forms() {
        let mut table = BTreeMap::new();
        table.insert(HashKey(sym("b")), val(2));
        table.insert(HashKey(sym("a")), val(1));

        // (value, expected printed form)
        let test_cases: Vec<(Value, &str)> = vec![
            (val(42), "42"),
            (val(-7i64), "-7"),
            (rational(1, 2), "1/2"),
            (rational(-3, 4), "-3/4"),
            (val(2.5), "2.5"),
            (val(1.0), "1.0"),
            (val(-0.5), "-0.5"),
            (Value::Complex(Complex64::new(3.0, 2.0)), "3.0+2.0i"),
            (Value::Complex(Complex64::new(1.5, -0.5)), "1.5-0.5i"),
            (val("hi\nthere"), "\"hi\\nthere\""),
            (val("quote\"d"), "\"quote\\\"d\""),
            (val('a'), "#\\a"),
            (val(' '), "#\\space"),
            (val('\n'), "#\\newline"),
            (val(true), "#t"),
            (val(false), "#f"),
            (sym("foo"), "foo"),
            (nil(), "()"),
            (val([1, 2, 3]), "(1 2 3)"),
            (
                Value::Pair(vec![val(1), val(2)], Box::new(val(3))),
                "(1 2 . 3)",
            ),
            (Value::Vector(vec![val(0), val(42), val(0)]), "#(0 42 0)"),
            (Value::HashTable(table), "#hash((a . 1) (b . 2))"),
            (Value::unspecified(), ""),
        ];

        for (i, (value, expected)) in test_cases.iter().enumerate() {
            assert_eq!(
                &format!("{value}"),
                expected,
                "Display test case {} failed",
                i + 1
            );
        }
    }

    #[test]
    fn test_pair_normalisation() {
        // A list tail collapses into a proper list
        assert_eq!(
            Value::pair(vec![val(1), val(2)], Value::List(vec![val(3)])),
            val([1, 2, 3])
        );
        // A pair tail merges its head
        assert_eq!(
            Value::pair(
                vec![val(1)],
                Value::Pair(vec![val(2)], Box::new(val(3)))
            ),
            Value::Pair(vec![val(1), val(2)], Box::new(val(3)))
        );
        // A non-list tail stays a pair
        assert_eq!(
            Value::pair(vec![val(1)], val(2)),
            Value::Pair(vec![val(1)], Box::new(val(2)))
        );
    }

    #[test]
    fn test_eqv_semantics() {
        // Same concrete type, equal payloads
        assert!(val(1).eqv(&val(1)));
        assert!(rational(1, 2).eqv(&rational(2, 4)));
        assert!(val("abc").eqv(&val("abc")));
        // Heterogeneous numeric types are not eqv
        assert!(!val(1).eqv(&val(1.0)));
        assert!(!rational(1, 1).eqv(&val(1)));
        // Aggregates compare structurally
        assert!(val([1, 2]).eqv(&val([1, 2])));
        assert!(!val([1, 2]).eqv(&val([2, 1])));
    }

    #[test]
    fn test_hash_table_equality_is_order_independent() {
        let mut a = BTreeMap::new();
        a.insert(HashKey(val(1)), sym("one"));
        a.insert(HashKey(val(2)), sym("two"));

        let mut b = BTreeMap::new();
        b.insert(HashKey(val(2)), sym("two"));
        b.insert(HashKey(val(1)), sym("one"));

        assert_eq!(Value::HashTable(a), Value::HashTable(b));
    }

    #[test]
    fn test_total_order() {
        // Within a variant: natural order
        assert_eq!(val(1).total_cmp(&val(2)), Ordering::Less);
        assert_eq!(sym("a").total_cmp(&sym("b")), Ordering::Less);
        assert_eq!(val(2.5).total_cmp(&val(2.5)), Ordering::Equal);
        // Across variants: stable tag order (booleans before numbers before symbols)
        assert_eq!(val(true).total_cmp(&val(0)), Ordering::Less);
        assert_eq!(val(99).total_cmp(&sym("a")), Ordering::Less);
        // Aggregates fall back to the printed form
        assert_eq!(val([1, 2]).total_cmp(&val([1, 3])), Ordering::Less);
    }

    #[test]
    fn test_is_object() {
        assert!(val([1]).is_object());
        assert!(Value::Pair(vec![val(1)], Box::new(val(2))).is_object());
        assert!(val("s").is_object());
        assert!(Value::Vector(vec![]).is_object());
        assert!(Value::HashTable(BTreeMap::new()).is_object());
        assert!(!val(1).is_object());
        assert!(!val(true).is_object());
        assert!(!sym("x").is_object());
        assert!(!Value::unspecified().is_object());
    }

    #[test]
    fn test_rational_canonical_display() {
        // BigRational::new reduces on construction
        let r = BigRational::new(BigInt::from(2), BigInt::from(4));
        assert!(r.numer().is_one());
        assert_eq!(format!("{}", Value::Rational(r)), "1/2");
    }
}
