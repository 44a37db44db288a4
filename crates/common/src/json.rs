//! Canonical JSON and a deterministic total order over JSON values.
//!
//! Content refs are hashes of the canonical form, so canonicalization is part
//! of the storage contract: mapping keys are serialized in sorted order,
//! sequences keep their order, and floats use `serde_json`'s shortest
//! round-trip rendering.

use std::cmp::Ordering;

use serde_json::{
    Number,
    Value as JsonValue,
};

/// Serialize `value` with object keys sorted at every nesting level. Two
/// structurally equal values always produce identical bytes.
pub fn canonical_json(value: &JsonValue) -> anyhow::Result<String> {
    let mut out = String::new();
    write_canonical(value, &mut out)?;
    Ok(out)
}

fn write_canonical(value: &JsonValue, out: &mut String) -> anyhow::Result<()> {
    match value {
        JsonValue::Array(values) => {
            out.push('[');
            for (i, element) in values.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(element, out)?;
            }
            out.push(']');
        },
        JsonValue::Object(fields) => {
            let mut keys: Vec<&String> = fields.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key)?);
                out.push(':');
                if let Some(field_value) = fields.get(key) {
                    write_canonical(field_value, out)?;
                }
            }
            out.push('}');
        },
        // Scalars already have a single rendering (ryu shortest form for
        // floats, JSON string escaping).
        scalar => out.push_str(&serde_json::to_string(scalar)?),
    }
    Ok(())
}

/// Deterministic total order over JSON values, used by query predicates and
/// orderings. Values of different types are ranked
/// null < bool < number < string < array < object; numbers compare exactly
/// (integers are never routed through lossy float conversion unless one side
/// is a float already).
pub fn cmp_json(a: &JsonValue, b: &JsonValue) -> Ordering {
    match (a, b) {
        (JsonValue::Null, JsonValue::Null) => Ordering::Equal,
        (JsonValue::Bool(x), JsonValue::Bool(y)) => x.cmp(y),
        (JsonValue::Number(x), JsonValue::Number(y)) => cmp_numbers(x, y),
        (JsonValue::String(x), JsonValue::String(y)) => x.cmp(y),
        (JsonValue::Array(x), JsonValue::Array(y)) => {
            for (ex, ey) in x.iter().zip(y.iter()) {
                let ordering = cmp_json(ex, ey);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            x.len().cmp(&y.len())
        },
        (JsonValue::Object(x), JsonValue::Object(y)) => {
            let mut x_keys: Vec<&String> = x.keys().collect();
            let mut y_keys: Vec<&String> = y.keys().collect();
            x_keys.sort();
            y_keys.sort();
            for (kx, ky) in x_keys.iter().zip(y_keys.iter()) {
                let ordering = kx.cmp(ky);
                if ordering != Ordering::Equal {
                    return ordering;
                }
                if let (Some(vx), Some(vy)) = (x.get(*kx), y.get(*ky)) {
                    let ordering = cmp_json(vx, vy);
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
            }
            x_keys.len().cmp(&y_keys.len())
        },
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn type_rank(value: &JsonValue) -> u8 {
    match value {
        JsonValue::Null => 0,
        JsonValue::Bool(_) => 1,
        JsonValue::Number(_) => 2,
        JsonValue::String(_) => 3,
        JsonValue::Array(_) => 4,
        JsonValue::Object(_) => 5,
    }
}

fn cmp_numbers(a: &Number, b: &Number) -> Ordering {
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        return x.cmp(&y);
    }
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x.cmp(&y);
    }
    // Mixed-sign integers beyond i64 range.
    if let (Some(x), Some(_)) = (a.as_i64(), b.as_u64()) {
        if x < 0 {
            return Ordering::Less;
        }
    }
    if let (Some(_), Some(y)) = (a.as_u64(), b.as_i64()) {
        if y < 0 {
            return Ordering::Greater;
        }
    }
    let x = a.as_f64().unwrap_or(f64::NAN);
    let y = b.as_f64().unwrap_or(f64::NAN);
    x.total_cmp(&y)
}

#[cfg(test)]
mod tests {
    use std::cmp::Ordering;

    use serde_json::json;

    use super::{
        canonical_json,
        cmp_json,
    };

    #[test]
    fn test_canonical_sorts_keys_at_every_level() -> anyhow::Result<()> {
        let a = json!({"b": {"y": 1, "x": 2}, "a": [3, {"q": 4, "p": 5}]});
        let b = json!({"a": [3, {"p": 5, "q": 4}], "b": {"x": 2, "y": 1}});
        assert_eq!(canonical_json(&a)?, canonical_json(&b)?);
        assert_eq!(
            canonical_json(&a)?,
            r#"{"a":[3,{"p":5,"q":4}],"b":{"x":2,"y":1}}"#,
        );
        Ok(())
    }

    #[test]
    fn test_canonical_preserves_sequence_order() -> anyhow::Result<()> {
        assert_ne!(
            canonical_json(&json!([1, 2]))?,
            canonical_json(&json!([2, 1]))?,
        );
        Ok(())
    }

    #[test]
    fn test_canonical_float_form() -> anyhow::Result<()> {
        assert_eq!(canonical_json(&json!(0.1))?, "0.1");
        assert_eq!(canonical_json(&json!(1e300))?, "1e300");
        Ok(())
    }

    #[test]
    fn test_cmp_numbers_exact_for_large_integers() {
        // Adjacent u64s collapse under f64 conversion; the comparator must
        // still distinguish them.
        let a = json!(u64::MAX - 1);
        let b = json!(u64::MAX);
        assert_eq!(cmp_json(&a, &b), Ordering::Less);
        assert_eq!(cmp_json(&b, &a), Ordering::Greater);
        assert_eq!(cmp_json(&a, &a), Ordering::Equal);
    }

    #[test]
    fn test_cmp_mixed_sign() {
        assert_eq!(cmp_json(&json!(-1), &json!(u64::MAX)), Ordering::Less);
        assert_eq!(cmp_json(&json!(u64::MAX), &json!(-1)), Ordering::Greater);
        assert_eq!(cmp_json(&json!(-1.5), &json!(2)), Ordering::Less);
    }

    #[test]
    fn test_cmp_type_ranks() {
        let ordered = [
            json!(null),
            json!(false),
            json!(0),
            json!("a"),
            json!([]),
            json!({}),
        ];
        for window in ordered.windows(2) {
            assert_eq!(cmp_json(&window[0], &window[1]), Ordering::Less);
        }
    }
}
