//! S-expression parsing from text.
//!
//! [`parse_scheme`] reads exactly one expression (trailing input is an
//! error); [`parse_program`] reads a whole source file as a sequence of
//! top-level forms. The accepted syntax covers every value with a printed
//! form: the numeric tower (`42`, `#x2a`, `1/2`, `2.5`, `3.0+2.0i`),
//! booleans, characters (`#\a`, `#\space`), strings with escapes, symbols,
//! proper and dotted lists, vectors `#(...)`, hash-table literals
//! `#hash((k . v) ...)`, the `'` / `` ` `` / `,` reader sugar, and `;` line
//! comments. Nesting is limited by [`MAX_PARSE_DEPTH`].

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{anychar, char, digit1, hex_digit1, multispace1, one_of},
    combinator::{opt, recognize, value},
    error::ErrorKind,
};

use num_bigint::BigInt;
use num_complex::Complex64;
use num_rational::BigRational;

use crate::ast::{SYMBOL_SPECIAL_CHARS, HashKey, Value, is_valid_symbol};
use crate::{Error, MAX_PARSE_DEPTH, ParseError, ParseErrorKind};

type PResult<'a, T> = IResult<&'a str, T>;

fn fail<T>(input: &str, code: ErrorKind) -> PResult<'_, T> {
    Err(nom::Err::Error(nom::error::Error::new(input, code)))
}

/// Skip whitespace and `;` line comments.
fn ws0(input: &str) -> PResult<'_, ()> {
    let mut rest = input;
    loop {
        let trimmed = rest.trim_start();
        if let Some(comment) = trimmed.strip_prefix(';') {
            let end = comment.find('\n').map_or(comment.len(), |i| i + 1);
            rest = &comment[end..];
        } else {
            return Ok((trimmed, ()));
        }
    }
}

/// At least one whitespace character, then any further whitespace/comments.
/// This is the separator between adjacent tokens, so `12abc` is a parse
/// error instead of two tokens.
fn ws1(input: &str) -> PResult<'_, ()> {
    let (rest, _) = multispace1.parse(input)?;
    ws0(rest)
}

fn close_paren(input: &str) -> PResult<'_, ()> {
    value((), char(')')).parse(input)
}

/// The `.` of a dotted tail: a lone dot followed by whitespace.
fn dot_marker(input: &str) -> PResult<'_, ()> {
    let (rest, _) = char('.').parse(input)?;
    ws1(rest)
}

//
// Atoms
//

/// Unsigned real or integer digits: `12` or `12.5`
fn unsigned_real_text(input: &str) -> PResult<'_, &str> {
    recognize((digit1, opt((char('.'), digit1)))).parse(input)
}

/// Optionally signed real or integer digits
fn signed_real_text(input: &str) -> PResult<'_, &str> {
    recognize((opt(one_of("+-")), unsigned_real_text)).parse(input)
}

/// Complex literal `a+bi` / `a-bi`
fn parse_complex(input: &str) -> PResult<'_, Value> {
    let (rest, re_text) = signed_real_text(input)?;
    let (rest, sign) = one_of("+-").parse(rest)?;
    let (rest, im_text) = unsigned_real_text(rest)?;
    let (rest, _) = char('i').parse(rest)?;

    let (Ok(re), Ok(im)) = (re_text.parse::<f64>(), im_text.parse::<f64>()) else {
        return fail(input, ErrorKind::Float);
    };
    let im = if sign == '-' { -im } else { im };
    Ok((rest, Value::Complex(Complex64::new(re, im))))
}

/// Exact rational literal `n/d`, canonicalised on construction
fn parse_rational(input: &str) -> PResult<'_, Value> {
    let (rest, numer_text) = recognize((opt(one_of("+-")), digit1)).parse(input)?;
    let (rest, _) = char('/').parse(rest)?;
    let (rest, denom_text) = digit1.parse(rest)?;

    let (Ok(numer), Ok(denom)) = (numer_text.parse::<BigInt>(), denom_text.parse::<BigInt>())
    else {
        return fail(input, ErrorKind::Digit);
    };
    if denom == BigInt::from(0) {
        return fail(input, ErrorKind::Digit);
    }
    let ratio = BigRational::new(numer, denom);
    let value = if ratio.is_integer() {
        Value::Integer(ratio.to_integer())
    } else {
        Value::Rational(ratio)
    };
    Ok((rest, value))
}

/// Inexact real literal with a mandatory decimal point
fn parse_real(input: &str) -> PResult<'_, Value> {
    let (rest, text) =
        recognize((opt(one_of("+-")), digit1, char('.'), digit1)).parse(input)?;
    match text.parse::<f64>() {
        Ok(x) => Ok((rest, Value::Real(x))),
        Err(_) => fail(input, ErrorKind::Float),
    }
}

/// Exact integer literal, decimal
fn parse_decimal(input: &str) -> PResult<'_, Value> {
    let (rest, text) = recognize((opt(one_of("+-")), digit1)).parse(input)?;
    match text.parse::<BigInt>() {
        Ok(n) => Ok((rest, Value::Integer(n))),
        Err(_) => fail(input, ErrorKind::Digit),
    }
}

/// Exact integer literal, hexadecimal (`#x` / `#X` prefix)
fn parse_hexadecimal(input: &str) -> PResult<'_, Value> {
    let (rest, _) = char('#').parse(input)?;
    let (rest, _) = one_of("xX").parse(rest)?;
    let (rest, digits) = hex_digit1.parse(rest)?;
    match BigInt::parse_bytes(digits.as_bytes(), 16) {
        Some(n) => Ok((rest, Value::Integer(n))),
        None => fail(input, ErrorKind::HexDigit),
    }
}

/// `#t` or `#f`
fn parse_bool(input: &str) -> PResult<'_, Value> {
    alt((
        value(Value::Bool(true), tag("#t")),
        value(Value::Bool(false), tag("#f")),
    ))
    .parse(input)
}

/// `#\a`, `#\space`, `#\newline`, `#\tab`
fn parse_char(input: &str) -> PResult<'_, Value> {
    let (rest, _) = tag("#\\").parse(input)?;
    alt((
        value(Value::Char(' '), tag("space")),
        value(Value::Char('\n'), tag("newline")),
        value(Value::Char('\t'), tag("tab")),
        anychar.map(Value::Char),
    ))
    .parse(rest)
}

/// Symbol (identifier)
fn parse_symbol(input: &str) -> PResult<'_, Value> {
    let (remaining, candidate) =
        take_while1(|c: char| c.is_alphanumeric() || SYMBOL_SPECIAL_CHARS.contains(c))
            .parse(input)?;

    if is_valid_symbol(candidate) {
        Ok((remaining, Value::Symbol(candidate.into())))
    } else {
        fail(input, ErrorKind::Alpha)
    }
}

/// String literal with escape sequences
fn parse_string(input: &str) -> PResult<'_, Value> {
    let (mut remaining, _) = char('"').parse(input)?;
    let mut chars = Vec::new();

    loop {
        let mut char_iter = remaining.chars();
        match char_iter.next() {
            Some('"') => {
                return Ok((
                    char_iter.as_str(),
                    Value::String(chars.into_iter().collect()),
                ));
            }
            Some('\\') => {
                match char_iter.next() {
                    Some('n') => chars.push('\n'),
                    Some('t') => chars.push('\t'),
                    Some('r') => chars.push('\r'),
                    Some('\\') => chars.push('\\'),
                    Some('"') => chars.push('"'),
                    // unknown or dangling escape sequence
                    _ => return fail(remaining, ErrorKind::Char),
                }
                remaining = char_iter.as_str();
            }
            Some(ch) => {
                chars.push(ch);
                remaining = char_iter.as_str();
            }
            // end of input without a closing quote
            None => return fail(remaining, ErrorKind::Char),
        }
    }
}

//
// Compound forms
//

/// Proper or dotted list
fn parse_list(input: &str, depth: usize) -> PResult<'_, Value> {
    let (rest, _) = char('(').parse(input)?;
    let (rest, _) = ws0(rest)?;
    if let Ok((rest, ())) = close_paren(rest) {
        return Ok((rest, Value::List(Vec::new())));
    }

    let (mut rest, first) = parse_sexpr(rest, depth + 1)?;
    let mut elements = vec![first];
    loop {
        // every element is followed by ')' or a separator
        if let Ok((next, ())) = close_paren(rest) {
            return Ok((next, Value::List(elements)));
        }
        let (after_sep, _) = ws1(rest)?;
        if let Ok((next, ())) = close_paren(after_sep) {
            return Ok((next, Value::List(elements)));
        }
        if let Ok((after_dot, ())) = dot_marker(after_sep) {
            let (after_tail, tail) = parse_sexpr(after_dot, depth + 1)?;
            let (after_tail, _) = ws0(after_tail)?;
            let (next, _) = char(')').parse(after_tail)?;
            return Ok((next, Value::pair(elements, tail)));
        }
        let (next, element) = parse_sexpr(after_sep, depth + 1)?;
        elements.push(element);
        rest = next;
    }
}

/// Vector literal `#(...)`
fn parse_vector(input: &str, depth: usize) -> PResult<'_, Value> {
    let (rest, _) = tag("#(").parse(input)?;
    let (rest, _) = ws0(rest)?;
    if let Ok((rest, ())) = close_paren(rest) {
        return Ok((rest, Value::Vector(Vec::new())));
    }

    let (mut rest, first) = parse_sexpr(rest, depth + 1)?;
    let mut elements = vec![first];
    loop {
        if let Ok((next, ())) = close_paren(rest) {
            return Ok((next, Value::Vector(elements)));
        }
        let (after_sep, _) = ws1(rest)?;
        if let Ok((next, ())) = close_paren(after_sep) {
            return Ok((next, Value::Vector(elements)));
        }
        let (next, element) = parse_sexpr(after_sep, depth + 1)?;
        elements.push(element);
        rest = next;
    }
}

/// Hash-table literal `#hash((key . value) ...)`. Each entry is read as an
/// ordinary (possibly dotted) list and split back into key and value, which
/// is exactly the inverse of how hash tables print.
fn parse_hash_table(input: &str, depth: usize) -> PResult<'_, Value> {
    let (rest, _) = tag("#hash(").parse(input)?;
    let (mut rest, _) = ws0(rest)?;
    let mut table = std::collections::BTreeMap::new();

    loop {
        if let Ok((next, ())) = close_paren(rest) {
            return Ok((next, Value::HashTable(table)));
        }
        let (next, entry) = parse_sexpr(rest, depth + 1)?;
        let (key, value) = match entry {
            Value::Pair(head, tail) if !head.is_empty() => (
                head[0].clone(),
                Value::pair(head[1..].to_vec(), *tail),
            ),
            Value::List(items) if !items.is_empty() => {
                (items[0].clone(), Value::List(items[1..].to_vec()))
            }
            _ => return fail(rest, ErrorKind::Tag),
        };
        table.insert(HashKey(key), value);
        let (next, _) = ws0(next)?;
        rest = next;
    }
}

/// Reader sugar: `'x`, `` `x ``, `,x`
fn parse_sugar(input: &str, depth: usize) -> PResult<'_, Value> {
    let (rest, marker) = one_of("'`,").parse(input)?;
    let (rest, _) = ws0(rest)?;
    let (rest, expr) = parse_sexpr(rest, depth + 1)?;
    let keyword = match marker {
        '\'' => "quote",
        '`' => "quasiquote",
        _ => "unquote",
    };
    Ok((
        rest,
        Value::List(vec![Value::Symbol(keyword.into()), expr]),
    ))
}

/// Parse one expression. The caller has already skipped leading whitespace.
fn parse_sexpr(input: &str, depth: usize) -> PResult<'_, Value> {
    if depth >= MAX_PARSE_DEPTH {
        return fail(input, ErrorKind::TooLarge);
    }
    alt((
        |i| parse_sugar(i, depth),
        |i| parse_vector(i, depth),
        |i| parse_hash_table(i, depth),
        |i| parse_list(i, depth),
        parse_complex,
        parse_rational,
        parse_real,
        parse_hexadecimal,
        parse_decimal,
        parse_bool,
        parse_char,
        parse_string,
        parse_symbol,
    ))
    .parse(input)
}

/// Convert nom errors to structured parse errors with input context.
fn convert_error(input: &str, error: nom::Err<nom::error::Error<&str>>) -> Error {
    match error {
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            let position = input.len().saturating_sub(e.input.len());
            let (kind, message) = match e.code {
                ErrorKind::TooLarge => (
                    ParseErrorKind::TooDeeplyNested,
                    format!("expression nested deeper than {MAX_PARSE_DEPTH} levels"),
                ),
                ErrorKind::Char => (
                    ParseErrorKind::InvalidSyntax,
                    format!("expected character at position {position}"),
                ),
                _ => {
                    if position < input.len() {
                        let near: String = input.chars().skip(position).take(10).collect();
                        (
                            ParseErrorKind::InvalidSyntax,
                            format!("invalid syntax near '{near}'"),
                        )
                    } else {
                        (
                            ParseErrorKind::Incomplete,
                            "unexpected end of input".to_owned(),
                        )
                    }
                }
            };
            Error::Parser(ParseError::with_context(kind, message, input, position))
        }
        nom::Err::Incomplete(_) => Error::Parser(ParseError::from_message(
            ParseErrorKind::Incomplete,
            "incomplete input",
        )),
    }
}

/// Can `boundary` legally follow a completed token?
fn is_token_boundary(rest: &str) -> bool {
    match rest.chars().next() {
        None => true,
        Some(c) => c.is_whitespace() || matches!(c, ';' | '(' | ')' | '"' | '\''),
    }
}

/// Parse a complete S-expression from input. Trailing input is an error.
pub fn parse_scheme(input: &str) -> Result<Value, Error> {
    let (rest, _) = ws0(input).map_err(|e| convert_error(input, e))?;
    let (rest, value) = parse_sexpr(rest, 0).map_err(|e| convert_error(input, e))?;
    let (rest, _) = ws0(rest).map_err(|e| convert_error(input, e))?;
    if rest.is_empty() {
        Ok(value)
    } else {
        let position = input.len().saturating_sub(rest.len());
        Err(Error::Parser(ParseError::with_context(
            ParseErrorKind::TrailingContent,
            format!("unexpected remaining input: '{rest}'"),
            input,
            position,
        )))
    }
}

/// Parse a whole source text as a sequence of top-level forms.
pub fn parse_program(input: &str) -> Result<Vec<Value>, Error> {
    let mut forms = Vec::new();
    let mut rest = input;
    loop {
        let (next, _) = ws0(rest).map_err(|e| convert_error(input, e))?;
        if next.is_empty() {
            return Ok(forms);
        }
        let (next, form) = parse_sexpr(next, 0).map_err(|e| convert_error(input, e))?;
        if !is_token_boundary(next) {
            let position = input.len().saturating_sub(next.len());
            return Err(Error::Parser(ParseError::with_context(
                ParseErrorKind::InvalidSyntax,
                "expected a delimiter after expression",
                input,
                position,
            )));
        }
        forms.push(form);
        rest = next;
    }
}
