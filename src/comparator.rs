//! Output comparator
//!
//! Decides whether a program's return value matches the expected output under
//! one of the judge policies. Every function here is pure and never panics on
//! malformed data; anything that cannot be compared is simply a mismatch.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::str::FromStr;

use bigdecimal::{BigDecimal, ToPrimitive};
use serde_json::Value;
use tracing::debug;

use crate::problem::JudgeType;

/// Compare `actual` against `expected` using the given judge policy
pub fn compare_outputs(
    actual: &Value,
    expected: &Value,
    judge_type: JudgeType,
    epsilon: &BigDecimal,
) -> bool {
    match judge_type {
        JudgeType::Equal => json_equal(actual, expected),
        JudgeType::UnorderedEqual => unordered_equal(actual, expected),
        JudgeType::FloatEps => float_eps(actual, expected, epsilon),
        JudgeType::Unknown => {
            debug!("Unknown judge type, treating as mismatch");
            false
        }
    }
}

/// Strict structural equality.
///
/// Numbers compare by value (`9` equals `9.0`), but there is no coercion
/// across kinds: `"5"` is not `5` and `true` is not `1`.
pub fn json_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(_), Value::Number(_)) => {
            compare_numbers(a, b).is_some_and(|ord| ord == Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| json_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| json_equal(x, y)))
        }
        _ => false,
    }
}

fn unordered_equal(actual: &Value, expected: &Value) -> bool {
    let (Value::Array(actual), Value::Array(expected)) = (actual, expected) else {
        debug!("Unordered compare failed: one or both operands are not lists");
        return false;
    };
    if actual.len() != expected.len() {
        debug!(
            "Unordered compare failed: lengths differ ({} vs {})",
            actual.len(),
            expected.len()
        );
        return false;
    }

    match (sorted(actual), sorted(expected)) {
        (Some(a), Some(b)) => a.iter().zip(&b).all(|(x, y)| json_equal(x, y)),
        _ => {
            debug!("Unordered compare: using frequency map due to unorderable elements");
            frequencies(actual) == frequencies(expected)
        }
    }
}

/// Sort a copy of `items`, or None if some pair of elements has no ordering.
fn sorted(items: &[Value]) -> Option<Vec<&Value>> {
    if !mutually_orderable(items) {
        return None;
    }
    let mut refs: Vec<&Value> = items.iter().collect();
    refs.sort_by(|a, b| order(a, b).unwrap_or(Ordering::Equal));
    Some(refs)
}

/// Whether `order` is total over `items`.
///
/// Holds when every item is a number, every item a string, every item a
/// boolean, or every item a list whose pooled elements satisfy the same rule.
fn mutually_orderable<'a>(items: impl IntoIterator<Item = &'a Value>) -> bool {
    let mut items = items.into_iter().peekable();
    match items.peek() {
        None => true,
        Some(Value::Number(_)) => items.all(Value::is_number),
        Some(Value::String(_)) => items.all(Value::is_string),
        Some(Value::Bool(_)) => items.all(Value::is_boolean),
        Some(Value::Array(_)) => {
            let mut elements = Vec::new();
            for item in items {
                let Value::Array(xs) = item else {
                    return false;
                };
                elements.extend(xs);
            }
            mutually_orderable(elements)
        }
        _ => false,
    }
}

/// Natural ordering between two values of the same kind.
///
/// Numbers, strings and booleans order among themselves; lists order
/// lexicographically. Null, objects and mixed kinds are unorderable.
fn order(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => compare_numbers(a, b),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Array(xs), Value::Array(ys)) => {
            for (x, y) in xs.iter().zip(ys) {
                match order(x, y)? {
                    Ordering::Equal => continue,
                    other => return Some(other),
                }
            }
            Some(xs.len().cmp(&ys.len()))
        }
        _ => None,
    }
}

fn compare_numbers(a: &Value, b: &Value) -> Option<Ordering> {
    match (as_i128(a), as_i128(b)) {
        (Some(x), Some(y)) => Some(x.cmp(&y)),
        (Some(x), None) => Some(cmp_int_float(x, b.as_f64()?)),
        (None, Some(y)) => Some(cmp_int_float(y, a.as_f64()?).reverse()),
        (None, None) => a.as_f64()?.partial_cmp(&b.as_f64()?),
    }
}

/// Exact comparison of an integer with a float.
///
/// Going through `f64` would make `2^63` equal to both `2^63 as f64` and
/// `2^63 + 1`, which breaks transitivity when sorting.
fn cmp_int_float(int: i128, float: f64) -> Ordering {
    // JSON integers fit in 65 bits
    const BOUND: f64 = 1.0e30;
    if float >= BOUND {
        return Ordering::Less;
    }
    if float <= -BOUND {
        return Ordering::Greater;
    }
    let whole = float.floor();
    match int.cmp(&(whole as i128)) {
        Ordering::Equal if float > whole => Ordering::Less,
        ord => ord,
    }
}

fn as_i128(v: &Value) -> Option<i128> {
    v.as_i64()
        .map(i128::from)
        .or_else(|| v.as_u64().map(i128::from))
}

/// Multiset of elements keyed by their canonical (sorted-key) serialization
fn frequencies(items: &[Value]) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for item in items {
        *counts.entry(canonical_json(item)).or_insert(0) += 1;
    }
    counts
}

/// Serialization with object keys in sorted order.
///
/// `serde_json::Map` is a BTreeMap unless `preserve_order` is enabled, so the
/// default serializer already emits keys sorted.
fn canonical_json(value: &Value) -> String {
    value.to_string()
}

fn float_eps(actual: &Value, expected: &Value, epsilon: &BigDecimal) -> bool {
    let (Some(a), Some(e)) = (to_decimal(actual), to_decimal(expected)) else {
        debug!("Float compare failed: operand is not numeric");
        return false;
    };
    if ![&a, &e, epsilon].into_iter().all(has_bounded_scale) {
        return float_eps_approx(actual, expected, epsilon);
    }
    let diff = (&a - &e).abs();
    let matched = diff <= *epsilon;
    debug!("Float compare: |{} - {}| <= {} -> {}", a, e, epsilon, matched);
    matched
}

/// Largest decimal exponent, either way, that is compared exactly.
///
/// Subtraction aligns both scales, so `"1e-200000000"` would otherwise build a
/// two hundred million digit integer.
const MAX_EXACT_SCALE: i64 = 1_000;

fn has_bounded_scale(value: &BigDecimal) -> bool {
    let (_, scale) = value.as_bigint_and_exponent();
    (-MAX_EXACT_SCALE..=MAX_EXACT_SCALE).contains(&scale)
}

/// Binary floating point fallback for operands with extreme exponents
fn float_eps_approx(actual: &Value, expected: &Value, epsilon: &BigDecimal) -> bool {
    let (Some(a), Some(e), Some(eps)) = (to_f64(actual), to_f64(expected), epsilon.to_f64())
    else {
        return false;
    };
    // Overflowed operands give a NaN or infinite difference and never match
    let matched = (a - e).abs() <= eps;
    debug!(
        "Float compare (extreme exponent): |{:e} - {:e}| <= {:e} -> {}",
        a, e, eps, matched
    );
    matched
}

fn to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Decimal from the value's string form, so binary float artifacts are kept
/// out of the comparison.
fn to_decimal(value: &Value) -> Option<BigDecimal> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return None,
    };
    BigDecimal::from_str(&text).ok()
}
