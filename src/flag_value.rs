use std::collections::HashMap;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::util::f64_to_i64_safe;

/// A full snapshot of evaluated flags, keyed by flag key.
///
/// A flag set is always replaced as a whole; it is never patched with a partial update.
pub type FlagSet = HashMap<String, FlagValue>;

/// The evaluated value of a single flag, as delivered by the evaluation client.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum FlagValue {
    Bool(bool),
    Str(String),
    Float(f64),
    Int(i64),
    Json(serde_json::Value),
}

impl From<bool> for FlagValue {
    fn from(b: bool) -> FlagValue {
        FlagValue::Bool(b)
    }
}

impl From<String> for FlagValue {
    fn from(s: String) -> FlagValue {
        FlagValue::Str(s)
    }
}

impl From<&str> for FlagValue {
    fn from(s: &str) -> FlagValue {
        FlagValue::Str(s.to_owned())
    }
}

impl From<f64> for FlagValue {
    fn from(f: f64) -> FlagValue {
        FlagValue::Float(f)
    }
}

impl From<i64> for FlagValue {
    fn from(i: i64) -> FlagValue {
        FlagValue::Int(i)
    }
}

impl From<serde_json::Value> for FlagValue {
    fn from(v: serde_json::Value) -> Self {
        use serde_json::Value;
        match v {
            Value::Bool(b) => b.into(),
            Value::Number(n) => {
                if let Some(f) = n.as_f64() {
                    f.into()
                } else if let Some(i) = n.as_i64() {
                    i.into()
                } else {
                    warn!("unrepresentable number {}, converting to string", n);
                    FlagValue::Json(format!("{}", n).into())
                }
            }
            Value::String(s) => s.into(),
            Value::Null | Value::Object(_) | Value::Array(_) => FlagValue::Json(v),
        }
    }
}

impl FlagValue {
    /// Returns whether the value counts as "on".
    ///
    /// `false`, `0`, `NaN`, the empty string and `null` are off. Every other value, including
    /// empty arrays and objects, is on.
    pub fn is_truthy(&self) -> bool {
        use serde_json::Value;
        match self {
            FlagValue::Bool(b) => *b,
            FlagValue::Str(s) => !s.is_empty(),
            FlagValue::Float(f) => *f != 0.0 && !f.is_nan(),
            FlagValue::Int(i) => *i != 0,
            FlagValue::Json(Value::Null) => false,
            FlagValue::Json(Value::Bool(b)) => *b,
            FlagValue::Json(Value::String(s)) => !s.is_empty(),
            FlagValue::Json(Value::Number(n)) => n.as_f64().map_or(true, |f| f != 0.0),
            FlagValue::Json(Value::Array(_) | Value::Object(_)) => true,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FlagValue::Bool(b) => Some(*b),
            _ => {
                warn!("flag value is not bool but {:?}", self);
                None
            }
        }
    }

    pub fn as_string(&self) -> Option<String> {
        match self {
            FlagValue::Str(s) => Some(s.clone()),
            _ => {
                warn!("flag value is not str but {:?}", self);
                None
            }
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            FlagValue::Float(f) => Some(*f),
            FlagValue::Int(i) => Some(*i as f64),
            _ => {
                warn!("flag value is not a number but {:?}", self);
                None
            }
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            FlagValue::Int(i) => Some(*i),
            FlagValue::Float(f) => f64_to_i64_safe(*f),
            _ => None,
        }
    }

    pub fn as_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            FlagValue::Bool(b) => Value::from(*b),
            FlagValue::Str(s) => Value::from(s.as_str()),
            FlagValue::Float(f) => Value::from(*f),
            FlagValue::Int(i) => Value::from(*i),
            FlagValue::Json(v) => v.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use spectral::prelude::*;
    use test_case::test_case;

    #[test_case(FlagValue::Bool(true), true ; "true bool")]
    #[test_case(FlagValue::Bool(false), false ; "false bool")]
    #[test_case(FlagValue::Str("on".into()), true ; "non-empty string")]
    #[test_case(FlagValue::Str("".into()), false ; "empty string")]
    #[test_case(FlagValue::Float(0.5), true ; "non-zero float")]
    #[test_case(FlagValue::Float(0.0), false ; "zero float")]
    #[test_case(FlagValue::Float(f64::NAN), false ; "nan")]
    #[test_case(FlagValue::Int(-3), true ; "non-zero int")]
    #[test_case(FlagValue::Int(0), false ; "zero int")]
    #[test_case(FlagValue::Json(json!(null)), false ; "null")]
    #[test_case(FlagValue::Json(json!([])), true ; "empty array")]
    #[test_case(FlagValue::Json(json!({})), true ; "empty object")]
    #[test_case(FlagValue::Json(json!({"variant": "b"})), true ; "object")]
    fn truthiness(value: FlagValue, expected: bool) {
        assert_that!(value.is_truthy()).is_equal_to(expected);
    }

    #[test]
    fn deserializes_flag_set_from_json() {
        let flags: FlagSet = serde_json::from_str(
            r#"{"flag1": true, "flag2": "on", "flag3": 3, "flag4": null, "flag5": {"a": [1]}}"#,
        )
        .unwrap();

        assert_that!(flags.get("flag1")).contains_value(&FlagValue::Bool(true));
        assert_that!(flags.get("flag2")).contains_value(&FlagValue::Str("on".into()));
        assert_that!(flags.get("flag3").and_then(FlagValue::as_int)).contains_value(3);
        assert_that!(flags.get("flag4")).contains_value(&FlagValue::Json(json!(null)));
        assert_that!(flags.get("flag5").map(FlagValue::as_json)).contains_value(json!({"a": [1]}));
    }

    #[test]
    fn from_json_normalizes_scalars() {
        assert_that!(FlagValue::from(json!(true))).is_equal_to(FlagValue::Bool(true));
        assert_that!(FlagValue::from(json!("x"))).is_equal_to(FlagValue::Str("x".into()));
        assert_that!(FlagValue::from(json!(2.5))).is_equal_to(FlagValue::Float(2.5));
        assert_that!(FlagValue::from(json!([1, 2]))).is_equal_to(FlagValue::Json(json!([1, 2])));
    }

    #[test]
    fn float_bounds() {
        let test_cases = vec![
            (1.99, Some(1)),
            (9007199254740991.0, Some(9007199254740991)),
            (9007199254740992.0, None),
            (-9007199254740991.0, Some(-9007199254740991)),
            (-9007199254740992.0, None),
        ];
        for (have, expect) in test_cases {
            assert_that!(FlagValue::Float(have).as_int()).is_equal_to(expect);
        }
    }

    #[test]
    fn typed_accessors_reject_other_types() {
        assert_that!(FlagValue::Str("true".into()).as_bool()).is_none();
        assert_that!(FlagValue::Bool(true).as_string()).is_none();
        assert_that!(FlagValue::Int(4).as_float()).contains_value(4.0);
    }
}
