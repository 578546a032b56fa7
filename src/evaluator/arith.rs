use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive, Zero};

use crate::ast::{InfixOp, PrefixOp};
use crate::errors::ZexusError;
use crate::object::Object;

/// Shared operator semantics for both execution engines.
///
/// Integer arithmetic is arbitrary-precision; any Float operand promotes the
/// operation to IEEE doubles. `/` on two Integers is integer division and `%`
/// is the truncated remainder; both raise ArithmeticError on a zero divisor.
/// String `+` concatenates only when both operands are strings.
pub fn binary_op(op: InfixOp, left: Object, right: Object) -> Result<Object, ZexusError> {
    use Object::*;
    match op {
        InfixOp::Add => match (left, right) {
            (Integer(a), Integer(b)) => Ok(Integer(a + b)),
            (Str(a), Str(b)) => Ok(Str(a + &b)),
            (a, b) => float_pair(op, a, b).map(|(x, y)| Float(x + y)),
        },
        InfixOp::Sub => match (left, right) {
            (Integer(a), Integer(b)) => Ok(Integer(a - b)),
            (a, b) => float_pair(op, a, b).map(|(x, y)| Float(x - y)),
        },
        InfixOp::Mul => match (left, right) {
            (Integer(a), Integer(b)) => Ok(Integer(a * b)),
            (a, b) => float_pair(op, a, b).map(|(x, y)| Float(x * y)),
        },
        InfixOp::Div => match (left, right) {
            (Integer(_), Integer(b)) if b.is_zero() => {
                Err(ZexusError::arithmetic("division by zero"))
            }
            (Integer(a), Integer(b)) => Ok(Integer(truncated_div(a, b))),
            (a, b) => float_pair(op, a, b).map(|(x, y)| Float(x / y)),
        },
        InfixOp::Mod => match (left, right) {
            (Integer(_), Integer(b)) if b.is_zero() => {
                Err(ZexusError::arithmetic("modulo by zero"))
            }
            (Integer(a), Integer(b)) => Ok(Integer(a % b)),
            (a, b) => float_pair(op, a, b).map(|(x, y)| Float(x % y)),
        },
        InfixOp::Eq => Ok(Boolean(left == right)),
        InfixOp::NotEq => Ok(Boolean(left != right)),
        InfixOp::Lt | InfixOp::Gt | InfixOp::Le | InfixOp::Ge => compare(op, left, right),
        InfixOp::And => Ok(Boolean(left.is_truthy() && right.is_truthy())),
        InfixOp::Or => Ok(Boolean(left.is_truthy() || right.is_truthy())),
    }
}

pub fn unary_op(op: PrefixOp, operand: Object) -> Result<Object, ZexusError> {
    match (op, operand) {
        (PrefixOp::Neg, Object::Integer(n)) => Ok(Object::Integer(-n)),
        (PrefixOp::Neg, Object::Float(f)) => Ok(Object::Float(-f)),
        (PrefixOp::Not, value) => Ok(Object::Boolean(!value.is_truthy())),
        (PrefixOp::Neg, value) => Err(ZexusError::type_error(format!(
            "unary '-' not supported for {}",
            value.type_name()
        ))),
    }
}

/// Ordered comparison: numerics against numerics, strings against strings.
fn compare(op: InfixOp, left: Object, right: Object) -> Result<Object, ZexusError> {
    use std::cmp::Ordering;
    let ordering = match (&left, &right) {
        (Object::Integer(a), Object::Integer(b)) => a.cmp(b),
        (Object::Str(a), Object::Str(b)) => a.cmp(b),
        (a, b) => {
            let (x, y) = float_pair(op, a.clone(), b.clone())?;
            x.partial_cmp(&y).ok_or_else(|| {
                ZexusError::arithmetic("comparison with NaN has no ordering")
            })?
        }
    };
    let result = match op {
        InfixOp::Lt => ordering == Ordering::Less,
        InfixOp::Gt => ordering == Ordering::Greater,
        InfixOp::Le => ordering != Ordering::Greater,
        InfixOp::Ge => ordering != Ordering::Less,
        _ => unreachable!("compare only handles relational operators"),
    };
    Ok(Object::Boolean(result))
}

/// Promote a numeric pair to doubles, or report the type error for `op`.
fn float_pair(op: InfixOp, left: Object, right: Object) -> Result<(f64, f64), ZexusError> {
    let coerce = |value: &Object| match value {
        Object::Integer(n) => n.to_f64(),
        Object::Float(f) => Some(*f),
        _ => None,
    };
    match (coerce(&left), coerce(&right)) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(ZexusError::type_error(format!(
            "'{}' not supported for {} and {}",
            op.symbol(),
            left.type_name(),
            right.type_name()
        ))),
    }
}

/// BigInt division truncates toward zero, matching the `%` remainder sign.
fn truncated_div(a: BigInt, b: BigInt) -> BigInt {
    let quotient = &a / &b;
    // num-bigint already truncates toward zero; keep the sign audit cheap.
    debug_assert!({
        let remainder = &a - &quotient * &b;
        remainder.is_zero() || remainder.is_negative() == a.is_negative()
    });
    quotient
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_plus_integer_stays_integer() {
        let result = binary_op(InfixOp::Add, Object::integer(10), Object::integer(5)).unwrap();
        assert_eq!(result, Object::integer(15));
    }

    #[test]
    fn float_operand_promotes() {
        let result = binary_op(InfixOp::Add, Object::integer(1), Object::Float(0.5)).unwrap();
        assert_eq!(result, Object::Float(1.5));
    }

    #[test]
    fn integer_division_truncates() {
        let result = binary_op(InfixOp::Div, Object::integer(7), Object::integer(2)).unwrap();
        assert_eq!(result, Object::integer(3));
        let negative =
            binary_op(InfixOp::Div, Object::integer(-7), Object::integer(2)).unwrap();
        assert_eq!(negative, Object::integer(-3));
    }

    #[test]
    fn division_by_zero_is_arithmetic_error() {
        let err = binary_op(InfixOp::Div, Object::integer(10), Object::integer(0)).unwrap_err();
        assert_eq!(err.kind, crate::errors::ErrorKind::ArithmeticError);
        assert_eq!(err.message, "division by zero");
    }

    #[test]
    fn string_plus_requires_both_strings() {
        let ok = binary_op(
            InfixOp::Add,
            Object::string("a"),
            Object::string("b"),
        )
        .unwrap();
        assert_eq!(ok, Object::string("ab"));
        let err =
            binary_op(InfixOp::Add, Object::string("a"), Object::integer(1)).unwrap_err();
        assert_eq!(err.kind, crate::errors::ErrorKind::TypeError);
    }

    #[test]
    fn comparisons_order_numbers_and_strings() {
        assert_eq!(
            binary_op(InfixOp::Lt, Object::integer(1), Object::Float(1.5)).unwrap(),
            Object::Boolean(true)
        );
        assert_eq!(
            binary_op(InfixOp::Ge, Object::string("b"), Object::string("a")).unwrap(),
            Object::Boolean(true)
        );
        assert!(binary_op(InfixOp::Lt, Object::Boolean(true), Object::integer(2)).is_err());
    }

    #[test]
    fn modulo_is_truncated_remainder() {
        let result = binary_op(InfixOp::Mod, Object::integer(-7), Object::integer(2)).unwrap();
        assert_eq!(result, Object::integer(-1));
    }
}
