//! Best-effort numeric coercion for values produced by the extraction model.
//!
//! Every financial figure goes through [`coerce`] before any arithmetic. The
//! function is total: malformed input yields `None`, never an error.

use serde_json::Value;
use std::ops::RangeInclusive;

/// Coerces a raw JSON value into a float.
///
/// - `null` → `None`
/// - numbers → their `f64` value
/// - strings → every character other than digits, `.`, `,` and `-` is dropped,
///   `,` becomes `.`, and the remainder is parsed
/// - anything else (booleans, arrays, objects) → `None`
pub fn coerce(value: &Value) -> Option<f64> {
    match value {
        Value::Null => None,
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => coerce_str(s),
        _ => None,
    }
}

pub fn coerce_str(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-'))
        .map(|c| if c == ',' { '.' } else { c })
        .collect();

    if cleaned.is_empty() || cleaned == "." || cleaned == "-" {
        return None;
    }

    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Fiscal years outside this range are rejected as misreads.
pub const FISCAL_YEAR_RANGE: RangeInclusive<i32> = 1900..=2100;

/// Coerces a fiscal-year field. Accepts integers, integral floats and numeric
/// strings within [`FISCAL_YEAR_RANGE`].
pub fn coerce_year(value: &Value) -> Option<i32> {
    let year = match value.as_i64() {
        Some(year) => i32::try_from(year).ok()?,
        None => {
            let year = coerce(value)?;
            if year.fract() != 0.0 || year < i32::MIN as f64 || year > i32::MAX as f64 {
                return None;
            }
            year as i32
        }
    };
    FISCAL_YEAR_RANGE.contains(&year).then_some(year)
}

/// Renders a float the way the extraction model tends to: plain decimal text.
pub fn coerce_as_string(value: f64) -> String {
    format!("{}", value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_null_and_numbers() {
        assert_eq!(coerce(&Value::Null), None);
        assert_eq!(coerce(&json!(42)), Some(42.0));
        assert_eq!(coerce(&json!(-12.5)), Some(-12.5));
    }

    #[test]
    fn test_formatted_strings() {
        assert_eq!(coerce(&json!("1 234 567")), Some(1_234_567.0));
        assert_eq!(coerce(&json!("12,5 MAD")), Some(12.5));
        assert_eq!(coerce(&json!("-350 DH")), Some(-350.0));
        assert_eq!(coerce(&json!("  98.75 ")), Some(98.75));
    }

    #[test]
    fn test_garbage_yields_none() {
        assert_eq!(coerce(&json!("")), None);
        assert_eq!(coerce(&json!("n/a")), None);
        assert_eq!(coerce(&json!(".")), None);
        assert_eq!(coerce(&json!("-")), None);
        // Thousands separators written with commas collapse into an invalid float.
        assert_eq!(coerce(&json!("1,234,567")), None);
        assert_eq!(coerce(&json!("1-2")), None);
        assert_eq!(coerce(&json!(true)), None);
        assert_eq!(coerce(&json!([1, 2])), None);
        assert_eq!(coerce(&json!({"N": 1})), None);
    }

    #[test]
    fn test_coerce_idempotent_through_string() {
        for x in [0.0, 1.0, -1.0, 1234.5678, -0.001, 1e12, 987_654_321.125] {
            let direct = coerce(&json!(x));
            let through = coerce(&json!(coerce_as_string(x)));
            assert_eq!(direct, through, "value {}", x);
        }
    }

    #[test]
    fn test_coerce_year() {
        assert_eq!(coerce_year(&json!(2023)), Some(2023));
        assert_eq!(coerce_year(&json!("2022")), Some(2022));
        assert_eq!(coerce_year(&json!(2021.0)), Some(2021));
        assert_eq!(coerce_year(&json!(2021.5)), None);
        assert_eq!(coerce_year(&Value::Null), None);
        assert_eq!(coerce_year(&json!("unknown")), None);
    }

    #[test]
    fn test_coerce_year_rejects_implausible_years() {
        assert_eq!(coerce_year(&json!(-2147483648i64)), None);
        assert_eq!(coerce_year(&json!(i32::MAX)), None);
        assert_eq!(coerce_year(&json!(23)), None);
        assert_eq!(coerce_year(&json!("1899")), None);
        assert_eq!(coerce_year(&json!(2101.0)), None);
        assert_eq!(coerce_year(&json!(1900)), Some(1900));
        assert_eq!(coerce_year(&json!("2100")), Some(2100));
    }
}
