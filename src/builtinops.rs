//! Built-in operations registry.
//!
//! This module provides the registry of built-in procedures loaded into the
//! global environment, plus the [`create_global_env`] / [`load_primitives`]
//! embedding API.
//!
//! ## Argument styles
//!
//! Every builtin has the canonical signature `fn(&[Value]) -> Result<Value,
//! Error>`. What the slice contains depends on the registered argument style:
//!
//! - **Deref**: arguments are deeply dereferenced before the call, so the
//!   procedure sees concrete data. This is the default for data operations
//!   (`car`, `+`, `equal?`, ...).
//! - **Raw**: arguments are passed as evaluated, alias pointers included.
//!   The mutating procedures (`vector-set!`, `string-set!`,
//!   `hash-table-set!`, ...) use this so they can write through the pointer
//!   chain into the canonical cell, making the update visible to every alias
//!   of the object.
//!
//! ## Errors
//!
//! Builtins enforce their own types and raise `TypeMismatch`; arity is
//! validated by the registry wrapper before the implementation runs.
//!
//! ## Adding a new operation
//!
//! 1. Implement the function with the canonical signature
//! 2. Add it to `BUILTIN_OPS` with identifier, kind, arity and argument style
//! 3. Add tests covering types, edge cases and error conditions

use std::collections::BTreeMap;
use std::fs::File;
use std::sync::{Arc, LazyLock};

use num_bigint::BigInt;
use num_traits::ToPrimitive;

use crate::Error;
use crate::ast::{HashKey, Port, PrimitiveFn, Value};
use crate::env::{self, Env, Namespace};
use crate::number;

/// Expected number of arguments for a built-in operation
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Arity {
    /// Exactly this many arguments
    Exact(usize),
    /// At least this many arguments
    AtLeast(usize),
    /// Between min and max arguments inclusive
    Range(usize, usize),
    /// Any number of arguments
    Any,
}

impl Arity {
    /// Check if the given number of arguments is valid
    pub fn validate(self, arg_count: usize) -> Result<(), Error> {
        match self {
            Arity::Exact(n) if arg_count != n => Err(Error::num_args(n, arg_count)),
            Arity::AtLeast(n) if arg_count < n => Err(Error::num_args(n, arg_count)),
            Arity::Range(min, _) if arg_count < min => Err(Error::num_args(min, arg_count)),
            Arity::Range(_, max) if arg_count > max => Err(Error::num_args(max, arg_count)),
            _ => Ok(()),
        }
    }
}

/// Whether a builtin is pure or may touch ports / process state
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpKind {
    Pure,
    Io,
}

/// How the evaluated arguments are prepared for the implementation
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ArgStyle {
    /// Deeply dereference: the implementation wants concrete data
    Deref,
    /// Pass through as evaluated, alias pointers intact
    Raw,
}

/// Definition of a built-in operation
#[derive(Clone)]
pub struct BuiltinOp {
    /// The Scheme identifier for this operation
    pub scheme_id: &'static str,
    /// Pure or I/O-capable
    pub kind: OpKind,
    /// Expected number of arguments, validated before the call
    pub arity: Arity,
    /// How arguments are prepared
    pub args: ArgStyle,
    /// The implementation
    func: fn(&[Value]) -> Result<Value, Error>,
}

/// Wrap a registry entry into a callable environment value. The wrapper
/// validates arity and prepares the arguments per the entry's style.
fn instantiate(op: &'static BuiltinOp) -> Value {
    let wrapped: Arc<PrimitiveFn> = Arc::new(move |args: &[Value]| {
        op.arity.validate(args.len())?;
        match op.args {
            ArgStyle::Deref => {
                let concrete: Vec<Value> = args
                    .iter()
                    .map(env::deref_deep)
                    .collect::<Result<_, _>>()?;
                (op.func)(&concrete)
            }
            ArgStyle::Raw => (op.func)(args),
        }
    });
    match op.kind {
        OpKind::Pure => Value::PrimFn {
            id: op.scheme_id.to_owned(),
            func: wrapped,
        },
        OpKind::Io => Value::IoFn {
            id: op.scheme_id.to_owned(),
            func: wrapped,
        },
    }
}

//
// Builtin implementations
//

fn to_index(v: &Value) -> Result<usize, Error> {
    match v {
        Value::Integer(n) => n
            .to_usize()
            .ok_or_else(|| Error::type_mismatch("index", v)),
        other => Err(Error::type_mismatch("index", other)),
    }
}

fn builtin_add(args: &[Value]) -> Result<Value, Error> {
    let mut sum = Value::Integer(BigInt::from(0));
    for arg in args {
        sum = number::add(&sum, arg)?;
    }
    Ok(sum)
}

fn builtin_sub(args: &[Value]) -> Result<Value, Error> {
    let (first, rest) = split_first(args)?;
    if rest.is_empty() {
        return number::neg(first);
    }
    let mut result = first.clone();
    for arg in rest {
        result = number::sub(&result, arg)?;
    }
    Ok(result)
}

fn builtin_mul(args: &[Value]) -> Result<Value, Error> {
    let mut product = Value::Integer(BigInt::from(1));
    for arg in args {
        product = number::mul(&product, arg)?;
    }
    Ok(product)
}

fn builtin_div(args: &[Value]) -> Result<Value, Error> {
    let (first, rest) = split_first(args)?;
    if rest.is_empty() {
        return number::div(&Value::Integer(BigInt::from(1)), first);
    }
    let mut result = first.clone();
    for arg in rest {
        result = number::div(&result, arg)?;
    }
    Ok(result)
}

fn split_first(args: &[Value]) -> Result<(&Value, &[Value]), Error> {
    args.split_first().ok_or(Error::NumArgs {
        expected: 1,
        got: 0,
    })
}

fn builtin_num_eq(args: &[Value]) -> Result<Value, Error> {
    let (first, rest) = split_first(args)?;
    let mut prev = first;
    for current in rest {
        if !number::num_eq(prev, current)? {
            return Ok(Value::Bool(false));
        }
        prev = current;
    }
    Ok(Value::Bool(true))
}

// Chained numeric comparisons: all adjacent pairs must satisfy the operator
macro_rules! numeric_comparison {
    ($name:ident, $($ord:pat_param)|+) => {
        fn $name(args: &[Value]) -> Result<Value, Error> {
            let (first, rest) = split_first(args)?;
            let mut prev = first;
            for current in rest {
                if !matches!(number::num_cmp(prev, current)?, $($ord)|+) {
                    return Ok(Value::Bool(false));
                }
                prev = current;
            }
            Ok(Value::Bool(true))
        }
    };
}

numeric_comparison!(builtin_lt, std::cmp::Ordering::Less);
numeric_comparison!(builtin_gt, std::cmp::Ordering::Greater);
numeric_comparison!(
    builtin_le,
    std::cmp::Ordering::Less | std::cmp::Ordering::Equal
);
numeric_comparison!(
    builtin_ge,
    std::cmp::Ordering::Greater | std::cmp::Ordering::Equal
);

fn builtin_quotient(args: &[Value]) -> Result<Value, Error> {
    number::quotient(&args[0], &args[1])
}

fn builtin_remainder(args: &[Value]) -> Result<Value, Error> {
    number::remainder(&args[0], &args[1])
}

fn builtin_modulo(args: &[Value]) -> Result<Value, Error> {
    number::modulo(&args[0], &args[1])
}

fn builtin_abs(args: &[Value]) -> Result<Value, Error> {
    number::abs(&args[0])
}

fn builtin_numerator(args: &[Value]) -> Result<Value, Error> {
    number::numerator(&args[0])
}

fn builtin_denominator(args: &[Value]) -> Result<Value, Error> {
    number::denominator(&args[0])
}

fn builtin_exact_to_inexact(args: &[Value]) -> Result<Value, Error> {
    number::to_inexact(&args[0])
}

fn builtin_inexact_to_exact(args: &[Value]) -> Result<Value, Error> {
    number::to_exact(&args[0])
}

fn builtin_number_to_string(args: &[Value]) -> Result<Value, Error> {
    if !number::is_number(&args[0]) {
        return Err(Error::type_mismatch("number", &args[0]));
    }
    Ok(Value::String(args[0].to_string()))
}

fn builtin_string_to_number(args: &[Value]) -> Result<Value, Error> {
    let Value::String(text) = &args[0] else {
        return Err(Error::type_mismatch("string", &args[0]));
    };
    let text = text.trim();
    if let Some(n) = BigInt::parse_bytes(text.as_bytes(), 10) {
        return Ok(Value::Integer(n));
    }
    if let Some((numer, denom)) = text.split_once('/')
        && let Some(n) = BigInt::parse_bytes(numer.as_bytes(), 10)
        && let Some(d) = BigInt::parse_bytes(denom.as_bytes(), 10)
        && d != BigInt::from(0)
    {
        return number::div(&Value::Integer(n), &Value::Integer(d));
    }
    if let Ok(x) = text.parse::<f64>() {
        return Ok(Value::Real(x));
    }
    Ok(Value::Bool(false))
}

// Type predicates

fn builtin_is_number(args: &[Value]) -> Result<Value, Error> {
    Ok(Value::Bool(number::is_number(&args[0])))
}

fn builtin_is_integer(args: &[Value]) -> Result<Value, Error> {
    Ok(Value::Bool(matches!(args[0], Value::Integer(_))))
}

fn builtin_is_rational(args: &[Value]) -> Result<Value, Error> {
    Ok(Value::Bool(matches!(
        args[0],
        Value::Integer(_) | Value::Rational(_)
    )))
}

fn builtin_is_real(args: &[Value]) -> Result<Value, Error> {
    Ok(Value::Bool(matches!(
        args[0],
        Value::Integer(_) | Value::Rational(_) | Value::Real(_)
    )))
}

fn builtin_is_complex(args: &[Value]) -> Result<Value, Error> {
    Ok(Value::Bool(number::is_number(&args[0])))
}

fn builtin_is_exact(args: &[Value]) -> Result<Value, Error> {
    if !number::is_number(&args[0]) {
        return Err(Error::type_mismatch("number", &args[0]));
    }
    Ok(Value::Bool(number::is_exact(&args[0])))
}

fn builtin_is_inexact(args: &[Value]) -> Result<Value, Error> {
    if !number::is_number(&args[0]) {
        return Err(Error::type_mismatch("number", &args[0]));
    }
    Ok(Value::Bool(!number::is_exact(&args[0])))
}

fn builtin_is_boolean(args: &[Value]) -> Result<Value, Error> {
    Ok(Value::Bool(matches!(args[0], Value::Bool(_))))
}

fn builtin_is_symbol(args: &[Value]) -> Result<Value, Error> {
    Ok(Value::Bool(matches!(args[0], Value::Symbol(_))))
}

fn builtin_is_string(args: &[Value]) -> Result<Value, Error> {
    Ok(Value::Bool(matches!(args[0], Value::String(_))))
}

fn builtin_is_char(args: &[Value]) -> Result<Value, Error> {
    Ok(Value::Bool(matches!(args[0], Value::Char(_))))
}

fn builtin_is_vector(args: &[Value]) -> Result<Value, Error> {
    Ok(Value::Bool(matches!(args[0], Value::Vector(_))))
}

fn builtin_is_list(args: &[Value]) -> Result<Value, Error> {
    Ok(Value::Bool(matches!(args[0], Value::List(_))))
}

fn builtin_is_pair(args: &[Value]) -> Result<Value, Error> {
    // non-empty proper lists are pairs too
    Ok(Value::Bool(match &args[0] {
        Value::Pair(_, _) => true,
        Value::List(items) => !items.is_empty(),
        _ => false,
    }))
}

fn builtin_is_null(args: &[Value]) -> Result<Value, Error> {
    Ok(Value::Bool(args[0].is_empty_list()))
}

fn builtin_is_procedure(args: &[Value]) -> Result<Value, Error> {
    Ok(Value::Bool(matches!(
        args[0],
        Value::PrimFn { .. } | Value::IoFn { .. } | Value::Closure(_) | Value::Continuation(_)
    )))
}

fn builtin_is_port(args: &[Value]) -> Result<Value, Error> {
    Ok(Value::Bool(matches!(args[0], Value::Port(_))))
}

fn builtin_is_hash_table(args: &[Value]) -> Result<Value, Error> {
    Ok(Value::Bool(matches!(args[0], Value::HashTable(_))))
}

// Equivalence

fn builtin_eqv(args: &[Value]) -> Result<Value, Error> {
    Ok(Value::Bool(args[0].eqv(&args[1])))
}

fn builtin_equal(args: &[Value]) -> Result<Value, Error> {
    Ok(Value::Bool(args[0].is_equal(&args[1])))
}

fn builtin_not(args: &[Value]) -> Result<Value, Error> {
    Ok(Value::Bool(!args[0].is_truthy()))
}

// List operations

fn builtin_car(args: &[Value]) -> Result<Value, Error> {
    match &args[0] {
        Value::List(items) if !items.is_empty() => Ok(items[0].clone()),
        Value::Pair(head, _) if !head.is_empty() => Ok(head[0].clone()),
        other => Err(Error::type_mismatch("pair", other)),
    }
}

fn builtin_cdr(args: &[Value]) -> Result<Value, Error> {
    match &args[0] {
        Value::List(items) if !items.is_empty() => Ok(Value::List(items[1..].to_vec())),
        Value::Pair(head, tail) if !head.is_empty() => {
            if head.len() == 1 {
                Ok((**tail).clone())
            } else {
                Ok(Value::Pair(head[1..].to_vec(), tail.clone()))
            }
        }
        other => Err(Error::type_mismatch("pair", other)),
    }
}

fn builtin_cons(args: &[Value]) -> Result<Value, Error> {
    Ok(Value::pair(vec![args[0].clone()], args[1].clone()))
}

fn builtin_list(args: &[Value]) -> Result<Value, Error> {
    Ok(Value::List(args.to_vec()))
}

fn builtin_length(args: &[Value]) -> Result<Value, Error> {
    match &args[0] {
        Value::List(items) => Ok(Value::Integer(BigInt::from(items.len()))),
        other => Err(Error::type_mismatch("list", other)),
    }
}

fn builtin_append(args: &[Value]) -> Result<Value, Error> {
    let mut out = Vec::new();
    for arg in args {
        match arg {
            Value::List(items) => out.extend(items.iter().cloned()),
            other => return Err(Error::type_mismatch("list", other)),
        }
    }
    Ok(Value::List(out))
}

fn builtin_reverse(args: &[Value]) -> Result<Value, Error> {
    match &args[0] {
        Value::List(items) => Ok(Value::List(items.iter().rev().cloned().collect())),
        other => Err(Error::type_mismatch("list", other)),
    }
}

fn builtin_set_car(args: &[Value]) -> Result<Value, Error> {
    let value = env::deref_deep(&args[1])?;
    match env::deref(&args[0])? {
        Value::List(mut items) if !items.is_empty() => {
            items[0] = value;
            env::update_object(&args[0], Value::List(items))?;
            Ok(Value::unspecified())
        }
        Value::Pair(mut head, tail) if !head.is_empty() => {
            head[0] = value;
            env::update_object(&args[0], Value::Pair(head, tail))?;
            Ok(Value::unspecified())
        }
        other => Err(Error::type_mismatch("pair", &other)),
    }
}

fn builtin_set_cdr(args: &[Value]) -> Result<Value, Error> {
    let value = env::deref_deep(&args[1])?;
    match env::deref(&args[0])? {
        Value::List(items) | Value::Pair(items, _) if !items.is_empty() => {
            let updated = Value::pair(vec![items[0].clone()], value);
            env::update_object(&args[0], updated)?;
            Ok(Value::unspecified())
        }
        other => Err(Error::type_mismatch("pair", &other)),
    }
}

// Vector operations

fn builtin_make_vector(args: &[Value]) -> Result<Value, Error> {
    let len = to_index(&args[0])?;
    let fill = args.get(1).cloned().unwrap_or_else(Value::unspecified);
    Ok(Value::Vector(vec![fill; len]))
}

fn builtin_vector(args: &[Value]) -> Result<Value, Error> {
    Ok(Value::Vector(args.to_vec()))
}

fn builtin_vector_length(args: &[Value]) -> Result<Value, Error> {
    match &args[0] {
        Value::Vector(items) => Ok(Value::Integer(BigInt::from(items.len()))),
        other => Err(Error::type_mismatch("vector", other)),
    }
}

fn builtin_vector_ref(args: &[Value]) -> Result<Value, Error> {
    let index = to_index(&args[1])?;
    match &args[0] {
        Value::Vector(items) => items
            .get(index)
            .cloned()
            .ok_or_else(|| Error::Default(format!("vector index {index} out of range"))),
        other => Err(Error::type_mismatch("vector", other)),
    }
}

fn builtin_vector_set(args: &[Value]) -> Result<Value, Error> {
    let index = to_index(&env::deref_deep(&args[1])?)?;
    let value = env::deref_deep(&args[2])?;
    match env::deref(&args[0])? {
        Value::Vector(mut items) => {
            if index >= items.len() {
                return Err(Error::Default(format!(
                    "vector index {index} out of range"
                )));
            }
            items[index] = value;
            env::update_object(&args[0], Value::Vector(items))?;
            Ok(Value::unspecified())
        }
        other => Err(Error::type_mismatch("vector", &other)),
    }
}

fn builtin_vector_fill(args: &[Value]) -> Result<Value, Error> {
    let value = env::deref_deep(&args[1])?;
    match env::deref(&args[0])? {
        Value::Vector(items) => {
            let filled = Value::Vector(vec![value; items.len()]);
            env::update_object(&args[0], filled)?;
            Ok(Value::unspecified())
        }
        other => Err(Error::type_mismatch("vector", &other)),
    }
}

fn builtin_vector_to_list(args: &[Value]) -> Result<Value, Error> {
    match &args[0] {
        Value::Vector(items) => Ok(Value::List(items.clone())),
        other => Err(Error::type_mismatch("vector", other)),
    }
}

fn builtin_list_to_vector(args: &[Value]) -> Result<Value, Error> {
    match &args[0] {
        Value::List(items) => Ok(Value::Vector(items.clone())),
        other => Err(Error::type_mismatch("list", other)),
    }
}

// String operations

fn builtin_string_length(args: &[Value]) -> Result<Value, Error> {
    match &args[0] {
        Value::String(s) => Ok(Value::Integer(BigInt::from(s.chars().count()))),
        other => Err(Error::type_mismatch("string", other)),
    }
}

fn builtin_string_ref(args: &[Value]) -> Result<Value, Error> {
    let index = to_index(&args[1])?;
    match &args[0] {
        Value::String(s) => s
            .chars()
            .nth(index)
            .map(Value::Char)
            .ok_or_else(|| Error::Default(format!("string index {index} out of range"))),
        other => Err(Error::type_mismatch("string", other)),
    }
}

fn builtin_string_set(args: &[Value]) -> Result<Value, Error> {
    let index = to_index(&env::deref_deep(&args[1])?)?;
    let Value::Char(replacement) = env::deref_deep(&args[2])? else {
        return Err(Error::type_mismatch("character", &args[2]));
    };
    match env::deref(&args[0])? {
        Value::String(s) => {
            let mut chars: Vec<char> = s.chars().collect();
            if index >= chars.len() {
                return Err(Error::Default(format!(
                    "string index {index} out of range"
                )));
            }
            chars[index] = replacement;
            env::update_object(&args[0], Value::String(chars.into_iter().collect()))?;
            Ok(Value::unspecified())
        }
        other => Err(Error::type_mismatch("string", &other)),
    }
}

fn builtin_string_append(args: &[Value]) -> Result<Value, Error> {
    let mut result = String::new();
    for arg in args {
        match arg {
            Value::String(s) => result.push_str(s),
            other => return Err(Error::type_mismatch("string", other)),
        }
    }
    Ok(Value::String(result))
}

fn builtin_substring(args: &[Value]) -> Result<Value, Error> {
    let start = to_index(&args[1])?;
    let end = to_index(&args[2])?;
    match &args[0] {
        Value::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            if start > end || end > chars.len() {
                return Err(Error::Default(format!(
                    "substring range {start}..{end} out of bounds"
                )));
            }
            Ok(Value::String(chars[start..end].iter().collect()))
        }
        other => Err(Error::type_mismatch("string", other)),
    }
}

fn builtin_string_to_symbol(args: &[Value]) -> Result<Value, Error> {
    match &args[0] {
        Value::String(s) => Ok(Value::Symbol(s.clone())),
        other => Err(Error::type_mismatch("string", other)),
    }
}

fn builtin_symbol_to_string(args: &[Value]) -> Result<Value, Error> {
    match &args[0] {
        Value::Symbol(s) => Ok(Value::String(s.clone())),
        other => Err(Error::type_mismatch("symbol", other)),
    }
}

// Character operations

fn builtin_char_to_integer(args: &[Value]) -> Result<Value, Error> {
    match &args[0] {
        Value::Char(c) => Ok(Value::Integer(BigInt::from(*c as u32))),
        other => Err(Error::type_mismatch("character", other)),
    }
}

fn builtin_integer_to_char(args: &[Value]) -> Result<Value, Error> {
    match &args[0] {
        Value::Integer(n) => n
            .to_u32()
            .and_then(char::from_u32)
            .map(Value::Char)
            .ok_or_else(|| Error::type_mismatch("character code", &args[0])),
        other => Err(Error::type_mismatch("integer", other)),
    }
}

// Hash table operations

fn builtin_make_hash_table(_args: &[Value]) -> Result<Value, Error> {
    Ok(Value::HashTable(BTreeMap::new()))
}

fn builtin_hash_table_set(args: &[Value]) -> Result<Value, Error> {
    let key = env::deref_deep(&args[1])?;
    let value = env::deref_deep(&args[2])?;
    match env::deref(&args[0])? {
        Value::HashTable(mut table) => {
            table.insert(HashKey(key), value);
            env::update_object(&args[0], Value::HashTable(table))?;
            Ok(Value::unspecified())
        }
        other => Err(Error::type_mismatch("hash table", &other)),
    }
}

fn builtin_hash_table_ref(args: &[Value]) -> Result<Value, Error> {
    let key = HashKey(args[1].clone());
    match &args[0] {
        Value::HashTable(table) => match table.get(&key) {
            Some(value) => Ok(value.clone()),
            None => match args.get(2) {
                Some(default) => Ok(default.clone()),
                None => Err(Error::Default(format!(
                    "hash table has no key {}",
                    key.0
                ))),
            },
        },
        other => Err(Error::type_mismatch("hash table", other)),
    }
}

fn builtin_hash_table_delete(args: &[Value]) -> Result<Value, Error> {
    let key = HashKey(env::deref_deep(&args[1])?);
    match env::deref(&args[0])? {
        Value::HashTable(mut table) => {
            table.remove(&key);
            env::update_object(&args[0], Value::HashTable(table))?;
            Ok(Value::unspecified())
        }
        other => Err(Error::type_mismatch("hash table", &other)),
    }
}

fn builtin_hash_table_keys(args: &[Value]) -> Result<Value, Error> {
    match &args[0] {
        Value::HashTable(table) => Ok(Value::List(
            table.keys().map(|key| key.0.clone()).collect(),
        )),
        other => Err(Error::type_mismatch("hash table", other)),
    }
}

fn builtin_hash_table_values(args: &[Value]) -> Result<Value, Error> {
    match &args[0] {
        Value::HashTable(table) => Ok(Value::List(table.values().cloned().collect())),
        other => Err(Error::type_mismatch("hash table", other)),
    }
}

fn builtin_hash_table_to_alist(args: &[Value]) -> Result<Value, Error> {
    match &args[0] {
        Value::HashTable(table) => Ok(Value::List(
            table
                .iter()
                .map(|(key, value)| Value::pair(vec![key.0.clone()], value.clone()))
                .collect(),
        )),
        other => Err(Error::type_mismatch("hash table", other)),
    }
}

// I/O operations

/// `display` renders strings and characters without their read syntax
fn display_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Char(c) => c.to_string(),
        other => other.to_string(),
    }
}

fn write_to(args: &[Value], text: &str) -> Result<Value, Error> {
    match args.get(1) {
        Some(Value::Port(port)) => port.write_str(text)?,
        Some(other) => return Err(Error::type_mismatch("port", other)),
        None => print!("{text}"),
    }
    Ok(Value::unspecified())
}

fn builtin_display(args: &[Value]) -> Result<Value, Error> {
    write_to(args, &display_string(&args[0]))
}

fn builtin_write(args: &[Value]) -> Result<Value, Error> {
    write_to(args, &args[0].to_string())
}

fn builtin_newline(args: &[Value]) -> Result<Value, Error> {
    match args.first() {
        Some(Value::Port(port)) => port.write_str("\n")?,
        Some(other) => return Err(Error::type_mismatch("port", other)),
        None => println!(),
    }
    Ok(Value::unspecified())
}

fn builtin_open_input_file(args: &[Value]) -> Result<Value, Error> {
    match &args[0] {
        Value::String(path) => File::open(path)
            .map(|file| Value::Port(Port::from_reader(file)))
            .map_err(|e| Error::Default(format!("cannot open {path}: {e}"))),
        other => Err(Error::type_mismatch("string", other)),
    }
}

fn builtin_open_output_file(args: &[Value]) -> Result<Value, Error> {
    match &args[0] {
        Value::String(path) => File::create(path)
            .map(|file| Value::Port(Port::from_writer(file)))
            .map_err(|e| Error::Default(format!("cannot open {path}: {e}"))),
        other => Err(Error::type_mismatch("string", other)),
    }
}

fn builtin_close_port(args: &[Value]) -> Result<Value, Error> {
    match &args[0] {
        Value::Port(port) => {
            port.close();
            Ok(Value::unspecified())
        }
        other => Err(Error::type_mismatch("port", other)),
    }
}

/// Reads one line; `#f` at end of input
fn builtin_read_line(args: &[Value]) -> Result<Value, Error> {
    let line = match args.first() {
        Some(Value::Port(port)) => port.read_line()?,
        Some(other) => return Err(Error::type_mismatch("port", other)),
        None => Port::stdin().read_line()?,
    };
    Ok(line.map(Value::String).unwrap_or(Value::Bool(false)))
}

fn builtin_error(args: &[Value]) -> Result<Value, Error> {
    let parts: Vec<String> = args.iter().map(display_string).collect();
    let message = if parts.is_empty() {
        "error".to_owned()
    } else {
        parts.join(" ")
    };
    Err(Error::Default(message))
}

fn builtin_exit(args: &[Value]) -> Result<Value, Error> {
    let code = match args.first() {
        Some(Value::Integer(n)) => n.to_i32().unwrap_or(1),
        Some(Value::Bool(false)) => 1,
        _ => 0,
    };
    std::process::exit(code)
}

/// Global registry of all built-in operations.
///
/// The table stores plain function pointers; [`instantiate`] wraps each entry
/// with its arity check and argument preparation when the operation is loaded
/// into an environment.
static BUILTIN_OPS: LazyLock<Vec<BuiltinOp>> = LazyLock::new(|| {
    use ArgStyle::{Deref, Raw};
    use OpKind::{Io, Pure};

    fn op(
        scheme_id: &'static str,
        kind: OpKind,
        arity: Arity,
        args: ArgStyle,
        func: fn(&[Value]) -> Result<Value, Error>,
    ) -> BuiltinOp {
        BuiltinOp {
            scheme_id,
            kind,
            arity,
            args,
            func,
        }
    }

    vec![
        // Arithmetic
        op("+", Pure, Arity::Any, Deref, builtin_add),
        op("-", Pure, Arity::AtLeast(1), Deref, builtin_sub),
        op("*", Pure, Arity::Any, Deref, builtin_mul),
        op("/", Pure, Arity::AtLeast(1), Deref, builtin_div),
        op("=", Pure, Arity::AtLeast(2), Deref, builtin_num_eq),
        op("<", Pure, Arity::AtLeast(2), Deref, builtin_lt),
        op(">", Pure, Arity::AtLeast(2), Deref, builtin_gt),
        op("<=", Pure, Arity::AtLeast(2), Deref, builtin_le),
        op(">=", Pure, Arity::AtLeast(2), Deref, builtin_ge),
        op("quotient", Pure, Arity::Exact(2), Deref, builtin_quotient),
        op("remainder", Pure, Arity::Exact(2), Deref, builtin_remainder),
        op("modulo", Pure, Arity::Exact(2), Deref, builtin_modulo),
        op("abs", Pure, Arity::Exact(1), Deref, builtin_abs),
        op("numerator", Pure, Arity::Exact(1), Deref, builtin_numerator),
        op("denominator", Pure, Arity::Exact(1), Deref, builtin_denominator),
        op("exact->inexact", Pure, Arity::Exact(1), Deref, builtin_exact_to_inexact),
        op("inexact->exact", Pure, Arity::Exact(1), Deref, builtin_inexact_to_exact),
        op("number->string", Pure, Arity::Exact(1), Deref, builtin_number_to_string),
        op("string->number", Pure, Arity::Exact(1), Deref, builtin_string_to_number),
        // Type predicates
        op("number?", Pure, Arity::Exact(1), Deref, builtin_is_number),
        op("integer?", Pure, Arity::Exact(1), Deref, builtin_is_integer),
        op("rational?", Pure, Arity::Exact(1), Deref, builtin_is_rational),
        op("real?", Pure, Arity::Exact(1), Deref, builtin_is_real),
        op("complex?", Pure, Arity::Exact(1), Deref, builtin_is_complex),
        op("exact?", Pure, Arity::Exact(1), Deref, builtin_is_exact),
        op("inexact?", Pure, Arity::Exact(1), Deref, builtin_is_inexact),
        op("boolean?", Pure, Arity::Exact(1), Deref, builtin_is_boolean),
        op("symbol?", Pure, Arity::Exact(1), Deref, builtin_is_symbol),
        op("string?", Pure, Arity::Exact(1), Deref, builtin_is_string),
        op("char?", Pure, Arity::Exact(1), Deref, builtin_is_char),
        op("vector?", Pure, Arity::Exact(1), Deref, builtin_is_vector),
        op("list?", Pure, Arity::Exact(1), Deref, builtin_is_list),
        op("pair?", Pure, Arity::Exact(1), Deref, builtin_is_pair),
        op("null?", Pure, Arity::Exact(1), Deref, builtin_is_null),
        op("procedure?", Pure, Arity::Exact(1), Deref, builtin_is_procedure),
        op("port?", Pure, Arity::Exact(1), Deref, builtin_is_port),
        op("hash-table?", Pure, Arity::Exact(1), Deref, builtin_is_hash_table),
        // Equivalence
        op("eq?", Pure, Arity::Exact(2), Deref, builtin_eqv),
        op("eqv?", Pure, Arity::Exact(2), Deref, builtin_eqv),
        op("equal?", Pure, Arity::Exact(2), Deref, builtin_equal),
        op("not", Pure, Arity::Exact(1), Deref, builtin_not),
        // Lists
        op("car", Pure, Arity::Exact(1), Deref, builtin_car),
        op("cdr", Pure, Arity::Exact(1), Deref, builtin_cdr),
        op("cons", Pure, Arity::Exact(2), Deref, builtin_cons),
        op("list", Pure, Arity::Any, Deref, builtin_list),
        op("length", Pure, Arity::Exact(1), Deref, builtin_length),
        op("append", Pure, Arity::Any, Deref, builtin_append),
        op("reverse", Pure, Arity::Exact(1), Deref, builtin_reverse),
        op("set-car!", Pure, Arity::Exact(2), Raw, builtin_set_car),
        op("set-cdr!", Pure, Arity::Exact(2), Raw, builtin_set_cdr),
        // Vectors
        op("make-vector", Pure, Arity::Range(1, 2), Deref, builtin_make_vector),
        op("vector", Pure, Arity::Any, Deref, builtin_vector),
        op("vector-length", Pure, Arity::Exact(1), Deref, builtin_vector_length),
        op("vector-ref", Pure, Arity::Exact(2), Deref, builtin_vector_ref),
        op("vector-set!", Pure, Arity::Exact(3), Raw, builtin_vector_set),
        op("vector-fill!", Pure, Arity::Exact(2), Raw, builtin_vector_fill),
        op("vector->list", Pure, Arity::Exact(1), Deref, builtin_vector_to_list),
        op("list->vector", Pure, Arity::Exact(1), Deref, builtin_list_to_vector),
        // Strings
        op("string-length", Pure, Arity::Exact(1), Deref, builtin_string_length),
        op("string-ref", Pure, Arity::Exact(2), Deref, builtin_string_ref),
        op("string-set!", Pure, Arity::Exact(3), Raw, builtin_string_set),
        op("string-append", Pure, Arity::Any, Deref, builtin_string_append),
        op("substring", Pure, Arity::Exact(3), Deref, builtin_substring),
        op("string->symbol", Pure, Arity::Exact(1), Deref, builtin_string_to_symbol),
        op("symbol->string", Pure, Arity::Exact(1), Deref, builtin_symbol_to_string),
        // Characters
        op("char->integer", Pure, Arity::Exact(1), Deref, builtin_char_to_integer),
        op("integer->char", Pure, Arity::Exact(1), Deref, builtin_integer_to_char),
        // Hash tables
        op("make-hash-table", Pure, Arity::Exact(0), Deref, builtin_make_hash_table),
        op("hash-table-set!", Pure, Arity::Exact(3), Raw, builtin_hash_table_set),
        op("hash-table-ref", Pure, Arity::Range(2, 3), Deref, builtin_hash_table_ref),
        op("hash-table-delete!", Pure, Arity::Exact(2), Raw, builtin_hash_table_delete),
        op("hash-table-keys", Pure, Arity::Exact(1), Deref, builtin_hash_table_keys),
        op("hash-table-values", Pure, Arity::Exact(1), Deref, builtin_hash_table_values),
        op("hash-table->alist", Pure, Arity::Exact(1), Deref, builtin_hash_table_to_alist),
        // I/O
        op("display", Io, Arity::Range(1, 2), Deref, builtin_display),
        op("write", Io, Arity::Range(1, 2), Deref, builtin_write),
        op("newline", Io, Arity::Range(0, 1), Deref, builtin_newline),
        op("open-input-file", Io, Arity::Exact(1), Deref, builtin_open_input_file),
        op("open-output-file", Io, Arity::Exact(1), Deref, builtin_open_output_file),
        op("close-input-port", Io, Arity::Exact(1), Deref, builtin_close_port),
        op("close-output-port", Io, Arity::Exact(1), Deref, builtin_close_port),
        op("read-line", Io, Arity::Range(0, 1), Deref, builtin_read_line),
        // Errors and process control
        op("error", Pure, Arity::Any, Deref, builtin_error),
        op("exit", Io, Arity::Range(0, 1), Deref, builtin_exit),
    ]
});

/// Get all builtin operations
pub fn get_builtin_ops() -> &'static [BuiltinOp] {
    BUILTIN_OPS.as_slice()
}

/// Load a table of primitives into an environment. The table maps
/// `(namespace, name)` to `PrimFn` / `IoFn` values.
pub fn load_primitives<I>(env: &Env, table: I)
where
    I: IntoIterator<Item = ((Namespace, String), Value)>,
{
    for ((ns, name), func) in table {
        env.define(ns, &name, func);
    }
}

/// Create a global environment with all built-in operations loaded.
pub fn create_global_env() -> Env {
    let env = Env::empty();
    load_primitives(
        &env,
        BUILTIN_OPS
            .iter()
            .map(|op| ((Namespace::Var, op.scheme_id.to_owned()), instantiate(op))),
    );

    #[cfg(feature = "scheme")]
    install_load(&env);

    env
}

/// `load` evaluates a source file in the global environment. Installed as a
/// closure so the file's definitions land in the environment it was loaded
/// into; this is the one primitive that re-enters the evaluator.
#[cfg(feature = "scheme")]
fn install_load(env: &Env) {
    let global = env.clone();
    let func: Arc<PrimitiveFn> = Arc::new(move |args: &[Value]| {
        Arity::Exact(1).validate(args.len())?;
        let path = match env::deref_deep(&args[0])? {
            Value::String(path) => path,
            other => return Err(Error::type_mismatch("string", &other)),
        };
        let source = std::fs::read_to_string(&path)
            .map_err(|e| Error::Default(format!("cannot load {path}: {e}")))?;
        let mut last = Value::unspecified();
        for form in crate::scheme::parse_program(&source)? {
            last = crate::evaluator::eval(&global, &form)?;
        }
        Ok(last)
    });
    env.define(
        Namespace::Var,
        "load",
        Value::IoFn {
            id: "load".to_owned(),
            func,
        },
    );
}

#[cfg(test)]
mod arity_tests {
    use super::*;

    #[test]
    fn test_arity_validation() {
        assert!(Arity::Exact(2).validate(2).is_ok());
        assert!(Arity::Exact(2).validate(1).is_err());
        assert!(Arity::AtLeast(1).validate(5).is_ok());
        assert!(Arity::AtLeast(1).validate(0).is_err());
        assert!(Arity::Range(1, 2).validate(1).is_ok());
        assert!(Arity::Range(1, 2).validate(2).is_ok());
        assert!(Arity::Range(1, 2).validate(3).is_err());
        assert!(Arity::Any.validate(0).is_ok());
        assert_eq!(
            Arity::Exact(2).validate(4).unwrap_err(),
            Error::num_args(2, 4)
        );
    }
}

#[cfg(all(test, feature = "scheme"))]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::evaluator::eval;
    use crate::scheme::parse_program;

    fn eval_all(env: &Env, source: &str) -> Result<Value, Error> {
        let mut last = Value::unspecified();
        for form in parse_program(source)? {
            last = eval(env, &form)?;
        }
        env::deref_deep(&last)
    }

    fn shows(source: &str) -> String {
        let env = create_global_env();
        format!("{}", eval_all(&env, source).unwrap())
    }

    fn fails(source: &str) -> Error {
        let env = create_global_env();
        eval_all(&env, source).unwrap_err()
    }

    #[test]
    fn test_arithmetic_tower() {
        // (input, expected printed result)
        let test_cases = vec![
            ("(+ 1 2 3)", "6"),
            ("(+)", "0"),
            ("(*)", "1"),
            ("(- 5)", "-5"),
            ("(/ 2)", "1/2"),
            ("(/ 2 4)", "1/2"),
            ("(/ 4 2)", "2"),
            ("(+ 1/2 1/2)", "1"),
            ("(+ 1/2 0.5)", "1.0"),
            ("(* 2 3.5)", "7.0"),
            ("(= 1 1.0)", "#t"),
            ("(= 1/2 0.5)", "#t"),
            ("(< 1 2 3)", "#t"),
            ("(< 1 3 2)", "#f"),
            ("(<= 1 1 2)", "#t"),
            ("(> 3 2 1)", "#t"),
            ("(>= 3 3 1)", "#t"),
            ("(quotient 7 2)", "3"),
            ("(remainder -7 2)", "-1"),
            ("(modulo -7 2)", "1"),
            ("(abs -7)", "7"),
            ("(numerator 3/4)", "3"),
            ("(denominator 3/4)", "4"),
            ("(exact->inexact 1/2)", "0.5"),
            ("(inexact->exact 0.5)", "1/2"),
            ("(number->string 42)", "\"42\""),
            ("(string->number \"42\")", "42"),
            ("(string->number \"1/2\")", "1/2"),
            ("(string->number \"2.5\")", "2.5"),
            ("(string->number \"junk\")", "#f"),
        ];
        for (source, expected) in test_cases {
            assert_eq!(shows(source), expected, "for {source}");
        }
    }

    #[test]
    fn test_rational_canonicalisation_is_eqv() {
        assert_eq!(shows("(eqv? 1/2 (/ 2 4))"), "#t");
        assert_eq!(shows("(eqv? 1 (/ 4 4))"), "#t");
        // exactness differences are not eqv
        assert_eq!(shows("(eqv? 1 1.0)"), "#f");
    }

    #[test]
    fn test_division_errors() {
        assert_eq!(fails("(/ 1 0)"), Error::DivideByZero);
        assert_eq!(fails("(quotient 1 0)"), Error::DivideByZero);
        assert!(matches!(fails("(+ 1 'a)"), Error::TypeMismatch(_, _)));
    }

    #[test]
    fn test_list_operations() {
        let test_cases = vec![
            ("(car '(1 2 3))", "1"),
            ("(cdr '(1 2 3))", "(2 3)"),
            ("(cdr '(1))", "()"),
            ("(car '(a . b))", "a"),
            ("(cdr '(a . b))", "b"),
            ("(cdr '(a b . c))", "(b . c)"),
            ("(cons 1 '(2 3))", "(1 2 3)"),
            ("(cons 1 2)", "(1 . 2)"),
            ("(list 1 'a \"s\")", "(1 a \"s\")"),
            ("(length '(1 2 3))", "3"),
            ("(length '())", "0"),
            ("(append '(1 2) '(3) '())", "(1 2 3)"),
            ("(reverse '(1 2 3))", "(3 2 1)"),
            ("(null? '())", "#t"),
            ("(null? '(1))", "#f"),
            ("(pair? '(1))", "#t"),
            ("(pair? '())", "#f"),
            ("(pair? '(a . b))", "#t"),
            ("(list? '(1 2))", "#t"),
            ("(list? '(a . b))", "#f"),
        ];
        for (source, expected) in test_cases {
            assert_eq!(shows(source), expected, "for {source}");
        }
        assert!(matches!(fails("(car '())"), Error::TypeMismatch(_, _)));
        assert!(matches!(fails("(length 5)"), Error::TypeMismatch(_, _)));
    }

    #[test]
    fn test_vector_aliasing_through_define() {
        // mutation through the alias is visible through the original
        assert_eq!(
            shows(
                "(define v (make-vector 3 0))
                 (define w v)
                 (vector-set! w 1 42)
                 v"
            ),
            "#(0 42 0)"
        );
        // and the other way around
        assert_eq!(
            shows(
                "(define v (vector 1 2))
                 (define w v)
                 (vector-set! v 0 9)
                 w"
            ),
            "#(9 2)"
        );
    }

    #[test]
    fn test_vector_operations() {
        let test_cases = vec![
            ("(make-vector 3 7)", "#(7 7 7)"),
            ("(vector 1 'a)", "#(1 a)"),
            ("(vector-length (vector 1 2))", "2"),
            ("(vector-ref (vector 'a 'b) 1)", "b"),
            ("(vector->list (vector 1 2))", "(1 2)"),
            ("(list->vector '(1 2))", "#(1 2)"),
            (
                "(define v (vector 1 2 3)) (vector-fill! v 0) v",
                "#(0 0 0)",
            ),
        ];
        for (source, expected) in test_cases {
            assert_eq!(shows(source), expected, "for {source}");
        }
        let err = fails("(vector-ref (vector 1) 5)");
        assert!(format!("{err}").contains("out of range"));
    }

    #[test]
    fn test_string_operations() {
        let test_cases = vec![
            ("(string-length \"abc\")", "3"),
            ("(string-ref \"abc\" 1)", "#\\b"),
            ("(string-append \"foo\" \"bar\")", "\"foobar\""),
            ("(substring \"hello\" 1 3)", "\"el\""),
            ("(string->symbol \"abc\")", "abc"),
            ("(symbol->string 'abc)", "\"abc\""),
            ("(char->integer #\\a)", "97"),
            ("(integer->char 97)", "#\\a"),
            // string mutation through an alias
            (
                "(define s \"abc\") (define t s) (string-set! t 0 #\\x) s",
                "\"xbc\"",
            ),
        ];
        for (source, expected) in test_cases {
            assert_eq!(shows(source), expected, "for {source}");
        }
    }

    #[test]
    fn test_hash_table_operations() {
        let test_cases = vec![
            ("(make-hash-table)", "#hash()"),
            (
                "(define h (make-hash-table)) (hash-table-set! h 'a 1) h",
                "#hash((a . 1))",
            ),
            (
                "(define h (make-hash-table))
                 (hash-table-set! h 'b 2)
                 (hash-table-set! h 'a 1)
                 (hash-table->alist h)",
                "((a . 1) (b . 2))",
            ),
            (
                "(define h (make-hash-table)) (hash-table-set! h 1 'one) (hash-table-ref h 1)",
                "one",
            ),
            (
                "(define h (make-hash-table)) (hash-table-ref h 'missing 'fallback)",
                "fallback",
            ),
            (
                "(define h (make-hash-table))
                 (hash-table-set! h 'a 1)
                 (hash-table-delete! h 'a)
                 (hash-table-keys h)",
                "()",
            ),
            // hash tables participate in aliasing like other objects
            (
                "(define h (make-hash-table))
                 (define g h)
                 (hash-table-set! g 'k 'v)
                 (hash-table-ref h 'k)",
                "v",
            ),
            ("(hash-table? (make-hash-table))", "#t"),
            ("(hash-table? '())", "#f"),
        ];
        for (source, expected) in test_cases {
            assert_eq!(shows(source), expected, "for {source}");
        }
        let err = fails("(hash-table-ref (make-hash-table) 'k)");
        assert!(format!("{err}").contains("no key"));
    }

    #[test]
    fn test_equivalence_and_predicates() {
        let test_cases = vec![
            ("(eq? 'a 'a)", "#t"),
            ("(eqv? 2 2)", "#t"),
            ("(eqv? 2 2.0)", "#f"),
            ("(equal? '(1 (2)) '(1 (2)))", "#t"),
            ("(equal? \"ab\" \"ab\")", "#t"),
            ("(equal? (vector 1) (vector 1))", "#t"),
            ("(not #f)", "#t"),
            ("(not 0)", "#f"),
            ("(number? 1/2)", "#t"),
            ("(integer? 1/2)", "#f"),
            ("(rational? 1/2)", "#t"),
            ("(rational? 2)", "#t"),
            ("(real? 2.5)", "#t"),
            ("(real? 1)", "#t"),
            ("(exact? 1/2)", "#t"),
            ("(exact? 0.5)", "#f"),
            ("(inexact? 0.5)", "#t"),
            ("(boolean? #f)", "#t"),
            ("(symbol? 'a)", "#t"),
            ("(string? \"a\")", "#t"),
            ("(char? #\\a)", "#t"),
            ("(vector? (vector))", "#t"),
            ("(procedure? car)", "#t"),
            ("(procedure? (lambda (x) x))", "#t"),
            ("(procedure? 'car)", "#f"),
            ("(procedure? (call/cc (lambda (k) k)))", "#t"),
        ];
        for (source, expected) in test_cases {
            assert_eq!(shows(source), expected, "for {source}");
        }
    }

    #[test]
    fn test_set_car_and_set_cdr() {
        assert_eq!(
            shows("(define p (list 1 2)) (define q p) (set-car! q 9) p"),
            "(9 2)"
        );
        assert_eq!(
            shows("(define p (list 1 2)) (set-cdr! p 3) p"),
            "(1 . 3)"
        );
    }

    #[test]
    fn test_error_primitive() {
        let err = fails("(error \"boom\" 42)");
        assert_eq!(format!("{err}"), "boom 42");
    }

    #[test]
    fn test_load_primitive() {
        let dir = std::env::temp_dir().join("schemexp-builtinops-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("lib.scm");
        std::fs::write(&path, "(define loaded-answer 42)\n(+ loaded-answer 0)\n").unwrap();

        let env = create_global_env();
        let result = eval_all(&env, &format!("(load \"{}\")", path.display())).unwrap();
        assert_eq!(format!("{result}"), "42");
        // definitions land in the loading environment
        assert_eq!(format!("{}", eval_all(&env, "loaded-answer").unwrap()), "42");
    }
}
