use std::fmt;

use serde_json::Number;

/// Product of two JSON numbers.
#[derive(Debug, Clone, PartialEq)]
pub enum Product {
    /// Exact product of two integer operands.
    Integer(i128),
    Float(Number),
}

impl fmt::Display for Product {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(n) => write!(f, "{n}"),
            Self::Float(n) => write!(f, "{n}"),
        }
    }
}

fn as_integer(n: &Number) -> Option<i128> {
    n.as_i64()
        .map(i128::from)
        .or_else(|| n.as_u64().map(i128::from))
}

/// Multiplies two JSON numbers, keeping integers integral.
///
/// Any `i64` or `u64` pair multiplies exactly except `u64` pairs whose
/// product exceeds `i128`, which fall back to floating point along with
/// every float operand.
pub fn multiply(x: &Number, y: &Number) -> Product {
    if let (Some(a), Some(b)) = (as_integer(x), as_integer(y)) {
        if let Some(product) = a.checked_mul(b) {
            return Product::Integer(product);
        }
    }

    let a = x.as_f64().unwrap_or_default();
    let b = y.as_f64().unwrap_or_default();
    Product::Float(Number::from_f64(a * b).unwrap_or_else(|| Number::from(0)))
}

pub fn describe_product(x: &Number, y: &Number) -> String {
    format!("The result of {} * {} is {}", x, y, multiply(x, y))
}
