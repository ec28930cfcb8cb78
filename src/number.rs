//! Numeric tower operations.
//!
//! Four numeric variants form a promotion lattice
//! `Integer < Rational < Real < Complex`. Arithmetic promotes both operands to
//! their join, performs the operation, then canonicalises downward where
//! exactness is preserved: a rational with denominator 1 collapses to an
//! integer, a complex with zero imaginary part collapses to a real. Division
//! by an exact zero raises `DivideByZero`; division by an inexact zero yields
//! the IEEE-754 result.

use std::cmp::Ordering;

use num_bigint::BigInt;
use num_complex::Complex64;
use num_rational::BigRational;
use num_traits::{Signed, ToPrimitive, Zero};

use crate::Error;
use crate::ast::Value;

/// A numeric value lifted out of [`Value`], one level per rung of the lattice.
#[derive(Clone)]
enum Tower {
    Integer(BigInt),
    Rational(BigRational),
    Real(f64),
    Complex(Complex64),
}

impl Tower {
    fn rank(&self) -> u8 {
        match self {
            Tower::Integer(_) => 0,
            Tower::Rational(_) => 1,
            Tower::Real(_) => 2,
            Tower::Complex(_) => 3,
        }
    }

    /// Lift one rung. Callers only ever lift below Complex.
    fn lift(self) -> Tower {
        match self {
            Tower::Integer(n) => Tower::Rational(BigRational::from_integer(n)),
            Tower::Rational(r) => Tower::Real(ratio_to_f64(&r)),
            Tower::Real(x) => Tower::Complex(Complex64::new(x, 0.0)),
            Tower::Complex(z) => Tower::Complex(z),
        }
    }

    fn is_zero(&self) -> bool {
        match self {
            Tower::Integer(n) => n.is_zero(),
            Tower::Rational(r) => r.is_zero(),
            Tower::Real(x) => *x == 0.0,
            Tower::Complex(z) => z.is_zero(),
        }
    }

    fn is_exact(&self) -> bool {
        matches!(self, Tower::Integer(_) | Tower::Rational(_))
    }
}

fn ratio_to_f64(r: &BigRational) -> f64 {
    r.to_f64().unwrap_or(f64::NAN)
}

fn tower(v: &Value) -> Result<Tower, Error> {
    match v {
        Value::Integer(n) => Ok(Tower::Integer(n.clone())),
        Value::Rational(r) => Ok(Tower::Rational(r.clone())),
        Value::Real(x) => Ok(Tower::Real(*x)),
        Value::Complex(z) => Ok(Tower::Complex(*z)),
        other => Err(Error::type_mismatch("number", other)),
    }
}

/// Promote both operands to their join in the lattice.
fn promote(mut a: Tower, mut b: Tower) -> (Tower, Tower) {
    while a.rank() < b.rank() {
        a = a.lift();
    }
    while b.rank() < a.rank() {
        b = b.lift();
    }
    (a, b)
}

/// Canonicalise downward where exactness is preserved.
fn canonical(t: Tower) -> Value {
    match t {
        Tower::Integer(n) => Value::Integer(n),
        Tower::Rational(r) => {
            if r.is_integer() {
                Value::Integer(r.to_integer())
            } else {
                Value::Rational(r)
            }
        }
        Tower::Real(x) => Value::Real(x),
        Tower::Complex(z) => {
            if z.im == 0.0 {
                Value::Real(z.re)
            } else {
                Value::Complex(z)
            }
        }
    }
}

macro_rules! binary_arith {
    ($name:ident, $op:tt) => {
        pub fn $name(a: &Value, b: &Value) -> Result<Value, Error> {
            let (a, b) = promote(tower(a)?, tower(b)?);
            Ok(canonical(match (a, b) {
                (Tower::Integer(a), Tower::Integer(b)) => Tower::Integer(a $op b),
                (Tower::Rational(a), Tower::Rational(b)) => Tower::Rational(a $op b),
                (Tower::Real(a), Tower::Real(b)) => Tower::Real(a $op b),
                (Tower::Complex(a), Tower::Complex(b)) => Tower::Complex(a $op b),
                // promote() leaves both operands at the same rank
                _ => unreachable!("operands promoted to different ranks"),
            }))
        }
    };
}

binary_arith!(add, +);
binary_arith!(sub, -);
binary_arith!(mul, *);

/// Division. An exact zero divisor raises `DivideByZero`; an inexact zero
/// falls through to IEEE-754 arithmetic.
pub fn div(a: &Value, b: &Value) -> Result<Value, Error> {
    let (a, b) = promote(tower(a)?, tower(b)?);
    if b.is_exact() && b.is_zero() {
        return Err(Error::DivideByZero);
    }
    Ok(canonical(match (a, b) {
        (Tower::Integer(a), Tower::Integer(b)) => Tower::Rational(BigRational::new(a, b)),
        (Tower::Rational(a), Tower::Rational(b)) => Tower::Rational(a / b),
        (Tower::Real(a), Tower::Real(b)) => Tower::Real(a / b),
        (Tower::Complex(a), Tower::Complex(b)) => Tower::Complex(a / b),
        _ => unreachable!("operands promoted to different ranks"),
    }))
}

/// Numeric negation
pub fn neg(a: &Value) -> Result<Value, Error> {
    match tower(a)? {
        Tower::Integer(n) => Ok(Value::Integer(-n)),
        Tower::Rational(r) => Ok(Value::Rational(-r)),
        Tower::Real(x) => Ok(Value::Real(-x)),
        Tower::Complex(z) => Ok(Value::Complex(-z)),
    }
}

/// Numeric equality (`=`): compares after promotion, so `1`, `1/1` and `1.0`
/// are all numerically equal even though they are not `eqv?`.
pub fn num_eq(a: &Value, b: &Value) -> Result<bool, Error> {
    match promote(tower(a)?, tower(b)?) {
        (Tower::Integer(a), Tower::Integer(b)) => Ok(a == b),
        (Tower::Rational(a), Tower::Rational(b)) => Ok(a == b),
        (Tower::Real(a), Tower::Real(b)) => Ok(a == b),
        (Tower::Complex(a), Tower::Complex(b)) => Ok(a == b),
        _ => unreachable!("operands promoted to different ranks"),
    }
}

/// Numeric ordering for `<`, `>`, `<=`, `>=`. Complex numbers have no
/// ordering and are rejected.
pub fn num_cmp(a: &Value, b: &Value) -> Result<Ordering, Error> {
    match promote(tower(a)?, tower(b)?) {
        (Tower::Integer(a), Tower::Integer(b)) => Ok(a.cmp(&b)),
        (Tower::Rational(a), Tower::Rational(b)) => Ok(a.cmp(&b)),
        (Tower::Real(x), Tower::Real(y)) => x
            .partial_cmp(&y)
            .ok_or_else(|| Error::Default("cannot order NaN".into())),
        (Tower::Complex(_), _) | (_, Tower::Complex(_)) => {
            Err(Error::type_mismatch("real number", a))
        }
        _ => unreachable!("operands promoted to different ranks"),
    }
}

fn integer_operand(v: &Value) -> Result<BigInt, Error> {
    match v {
        Value::Integer(n) => Ok(n.clone()),
        other => Err(Error::type_mismatch("integer", other)),
    }
}

/// Truncating integer division
pub fn quotient(a: &Value, b: &Value) -> Result<Value, Error> {
    let (a, b) = (integer_operand(a)?, integer_operand(b)?);
    if b.is_zero() {
        return Err(Error::DivideByZero);
    }
    Ok(Value::Integer(a / b))
}

/// Remainder with the sign of the dividend
pub fn remainder(a: &Value, b: &Value) -> Result<Value, Error> {
    let (a, b) = (integer_operand(a)?, integer_operand(b)?);
    if b.is_zero() {
        return Err(Error::DivideByZero);
    }
    Ok(Value::Integer(a % b))
}

/// Modulo with the sign of the divisor
pub fn modulo(a: &Value, b: &Value) -> Result<Value, Error> {
    let (a, b) = (integer_operand(a)?, integer_operand(b)?);
    if b.is_zero() {
        return Err(Error::DivideByZero);
    }
    Ok(Value::Integer(((&a % &b) + &b) % &b))
}

/// Absolute value
pub fn abs(a: &Value) -> Result<Value, Error> {
    match tower(a)? {
        Tower::Integer(n) => Ok(Value::Integer(n.abs())),
        Tower::Rational(r) => Ok(Value::Rational(r.abs())),
        Tower::Real(x) => Ok(Value::Real(x.abs())),
        Tower::Complex(z) => Ok(Value::Real(z.norm())),
    }
}

/// Numerator of an exact number; an integer is its own numerator.
pub fn numerator(a: &Value) -> Result<Value, Error> {
    match a {
        Value::Integer(n) => Ok(Value::Integer(n.clone())),
        Value::Rational(r) => Ok(Value::Integer(r.numer().clone())),
        other => Err(Error::type_mismatch("exact number", other)),
    }
}

/// Denominator of an exact number; an integer has denominator 1.
pub fn denominator(a: &Value) -> Result<Value, Error> {
    match a {
        Value::Integer(_) => Ok(Value::Integer(BigInt::from(1))),
        Value::Rational(r) => Ok(Value::Integer(r.denom().clone())),
        other => Err(Error::type_mismatch("exact number", other)),
    }
}

/// `exact->inexact`: drop to a real (complex numbers are already inexact)
pub fn to_inexact(a: &Value) -> Result<Value, Error> {
    match tower(a)? {
        Tower::Integer(n) => Ok(Value::Real(n.to_f64().unwrap_or(f64::NAN))),
        Tower::Rational(r) => Ok(Value::Real(ratio_to_f64(&r))),
        Tower::Real(x) => Ok(Value::Real(x)),
        Tower::Complex(z) => Ok(Value::Complex(z)),
    }
}

/// `inexact->exact`: lift a real to the exact rational with the same value
pub fn to_exact(a: &Value) -> Result<Value, Error> {
    match tower(a)? {
        Tower::Integer(n) => Ok(Value::Integer(n)),
        Tower::Rational(r) => Ok(canonical(Tower::Rational(r))),
        Tower::Real(x) => BigRational::from_float(x)
            .map(|r| canonical(Tower::Rational(r)))
            .ok_or_else(|| Error::type_mismatch("finite real", a)),
        Tower::Complex(_) => Err(Error::type_mismatch("real number", a)),
    }
}

/// Is the value exact (integer or rational)?
pub fn is_exact(a: &Value) -> bool {
    matches!(a, Value::Integer(_) | Value::Rational(_))
}

/// Is the value any number?
pub fn is_number(a: &Value) -> bool {
    matches!(
        a,
        Value::Integer(_) | Value::Rational(_) | Value::Real(_) | Value::Complex(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::val;

    fn rational(n: i64, d: i64) -> Value {
        Value::Rational(BigRational::new(BigInt::from(n), BigInt::from(d)))
    }

    #[test]
    fn test_promotion_lattice() {
        // integer + integer stays exact
        assert_eq!(add(&val(2), &val(3)).unwrap(), val(5));
        // integer + rational joins at rational
        assert_eq!(add(&val(1), &rational(1, 2)).unwrap(), rational(3, 2));
        // rational + real joins at real
        assert_eq!(add(&rational(1, 2), &val(0.5)).unwrap(), val(1.0));
        // anything + complex joins at complex
        assert_eq!(
            add(&val(1), &Value::Complex(Complex64::new(0.0, 2.0))).unwrap(),
            Value::Complex(Complex64::new(1.0, 2.0))
        );
    }

    #[test]
    fn test_downward_canonicalisation() {
        // 1/2 + 1/2 collapses to the exact integer 1
        assert_eq!(add(&rational(1, 2), &rational(1, 2)).unwrap(), val(1));
        // 3/2 * 2 collapses too
        assert_eq!(mul(&rational(3, 2), &val(2)).unwrap(), val(3));
        // complex arithmetic that cancels the imaginary part yields a real
        let z = Value::Complex(Complex64::new(2.0, 3.0));
        let w = Value::Complex(Complex64::new(1.0, -3.0));
        assert_eq!(add(&z, &w).unwrap(), val(3.0));
    }

    #[test]
    fn test_exact_division_produces_canonical_rationals() {
        assert_eq!(div(&val(2), &val(4)).unwrap(), rational(1, 2));
        assert_eq!(div(&val(4), &val(2)).unwrap(), val(2));
        assert_eq!(div(&val(-2), &val(4)).unwrap(), rational(-1, 2));
        // denominator is kept positive
        assert_eq!(div(&val(2), &val(-4)).unwrap(), rational(-1, 2));
    }

    #[test]
    fn test_division_by_zero() {
        // exact zero divisor raises
        assert_eq!(div(&val(1), &val(0)).unwrap_err(), Error::DivideByZero);
        assert_eq!(
            div(&rational(1, 2), &val(0)).unwrap_err(),
            Error::DivideByZero
        );
        // inexact zero divisor follows IEEE-754
        assert_eq!(div(&val(1.0), &val(0.0)).unwrap(), val(f64::INFINITY));
        assert_eq!(div(&val(1), &val(0.0)).unwrap(), val(f64::INFINITY));
    }

    #[test]
    fn test_numeric_equality_promotes() {
        assert!(num_eq(&val(1), &val(1.0)).unwrap());
        assert!(num_eq(&rational(2, 4), &rational(1, 2)).unwrap());
        assert!(num_eq(&rational(1, 2), &val(0.5)).unwrap());
        assert!(!num_eq(&val(1), &val(2)).unwrap());
        assert!(num_eq(&val(1), &val("x")).is_err());
    }

    #[test]
    fn test_ordering() {
        assert_eq!(num_cmp(&val(1), &val(2)).unwrap(), Ordering::Less);
        assert_eq!(
            num_cmp(&rational(1, 2), &rational(1, 3)).unwrap(),
            Ordering::Greater
        );
        assert_eq!(num_cmp(&val(1), &val(1.0)).unwrap(), Ordering::Equal);
        // complex numbers cannot be ordered
        let z = Value::Complex(Complex64::new(1.0, 1.0));
        assert!(num_cmp(&z, &val(1)).is_err());
    }

    #[test]
    fn test_integer_division_ops() {
        assert_eq!(quotient(&val(7), &val(2)).unwrap(), val(3));
        assert_eq!(quotient(&val(-7), &val(2)).unwrap(), val(-3));
        // remainder takes the dividend's sign, modulo the divisor's
        assert_eq!(remainder(&val(-7), &val(2)).unwrap(), val(-1));
        assert_eq!(modulo(&val(-7), &val(2)).unwrap(), val(1));
        assert_eq!(modulo(&val(7), &val(-2)).unwrap(), val(-1));
        assert_eq!(quotient(&val(1), &val(0)).unwrap_err(), Error::DivideByZero);
        assert!(quotient(&rational(1, 2), &val(2)).is_err());
    }

    #[test]
    fn test_exactness_conversions() {
        assert_eq!(to_inexact(&val(1)).unwrap(), val(1.0));
        assert_eq!(to_inexact(&rational(1, 2)).unwrap(), val(0.5));
        assert_eq!(to_exact(&val(0.5)).unwrap(), rational(1, 2));
        assert_eq!(to_exact(&val(2.0)).unwrap(), val(2));
        assert!(to_exact(&val(f64::INFINITY)).is_err());
        assert!(is_exact(&val(1)));
        assert!(is_exact(&rational(1, 2)));
        assert!(!is_exact(&val(1.0)));
    }

    #[test]
    fn test_unary_ops() {
        assert_eq!(neg(&val(5)).unwrap(), val(-5i64));
        assert_eq!(neg(&rational(1, 2)).unwrap(), rational(-1, 2));
        assert_eq!(abs(&val(-5i64)).unwrap(), val(5));
        assert_eq!(abs(&rational(-1, 2)).unwrap(), rational(1, 2));
        assert_eq!(numerator(&rational(3, 4)).unwrap(), val(3));
        assert_eq!(denominator(&rational(3, 4)).unwrap(), val(4));
        assert_eq!(denominator(&val(7)).unwrap(), val(1));
    }
}
