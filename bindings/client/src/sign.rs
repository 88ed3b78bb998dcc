//! Request signing for the order API.
//!
//! The service recomputes the signature over the fields it receives and rejects any mismatch, so
//! the canonical string must match byte for byte:
//!
//! 1. drop the `sign` field and every null field,
//! 2. sort the remaining keys by byte value,
//! 3. join them as `key=value` pairs with `&` and append `&key=<secret>`,
//! 4. MD5 the UTF-8 bytes and hex encode the digest in upper case.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde_json::Value;

/// The field that carries the signature. It is never part of its own input.
pub const SIGN_FIELD: &str = "sign";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SignError {
    #[error("Signed parameters must be a JSON object")]
    NotAnObject,
    #[error("Field `{field}` is not a scalar and cannot be signed")]
    NonScalar { field: String },
}

/// A scalar parameter value in its canonical textual form.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    /// Rendered as `{}`
    EmptyObject,
}

impl Display for ParamValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamValue::Str(s) => f.write_str(s),
            ParamValue::Int(i) => write!(f, "{i}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Bool(b) => write!(f, "{b}"),
            ParamValue::EmptyObject => f.write_str("{}"),
        }
    }
}

impl ParamValue {
    fn to_json(&self) -> Value {
        match self {
            ParamValue::Str(s) => Value::from(s.as_str()),
            ParamValue::Int(i) => Value::from(*i),
            ParamValue::Float(v) => Value::from(*v),
            ParamValue::Bool(b) => Value::from(*b),
            ParamValue::EmptyObject => Value::Object(Default::default()),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Str(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Str(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        ParamValue::Int(value.into())
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

/// Request parameters keyed by field name. A `None` value is a null field, which is sent but never
/// signed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterMap {
    fields: BTreeMap<String, Option<ParamValue>>,
}

impl ParameterMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<ParamValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<ParamValue>) {
        self.fields.insert(key.to_string(), Some(value.into()));
    }

    pub fn insert_null(&mut self, key: &str) {
        self.fields.insert(key.to_string(), None);
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.fields.get(key).and_then(Option::as_ref)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Read the parameters from a JSON object. Nested arrays and non-empty objects are rejected.
    pub fn from_json(value: &Value) -> Result<Self, SignError> {
        let object = value.as_object().ok_or(SignError::NotAnObject)?;

        let mut params = Self::new();
        for (key, value) in object {
            let value = match value {
                Value::Null => None,
                Value::Bool(b) => Some(ParamValue::Bool(*b)),
                Value::Number(n) => match n.as_i64() {
                    Some(i) => Some(ParamValue::Int(i)),
                    None => n.as_f64().map(ParamValue::Float),
                },
                Value::String(s) => Some(ParamValue::Str(s.clone())),
                Value::Object(o) if o.is_empty() => Some(ParamValue::EmptyObject),
                Value::Object(_) | Value::Array(_) => {
                    return Err(SignError::NonScalar { field: key.clone() })
                }
            };
            params.fields.insert(key.clone(), value);
        }

        Ok(params)
    }

    /// The exact string that is digested, secret included.
    pub fn canonical_string(&self, secret: &str) -> String {
        let mut out = String::new();
        for (key, value) in &self.fields {
            let Some(value) = value else {
                continue;
            };
            if key == SIGN_FIELD {
                continue;
            }
            out.push_str(key);
            out.push('=');
            out.push_str(&value.to_string());
            out.push('&');
        }
        out.push_str("key=");
        out.push_str(secret);
        out
    }

    fn to_json(&self) -> serde_json::Map<String, Value> {
        self.fields
            .iter()
            .map(|(key, value)| {
                (
                    key.clone(),
                    value.as_ref().map_or(Value::Null, ParamValue::to_json),
                )
            })
            .collect()
    }
}

/// Compute the upper-case hex MD5 signature of `params` with `secret`.
pub fn sign(params: &ParameterMap, secret: &str) -> String {
    format!("{:X}", md5::compute(params.canonical_string(secret).as_bytes()))
}

/// Parameters together with their signature, ready to send.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedParameterSet {
    params: ParameterMap,
    sign: String,
}

impl SignedParameterSet {
    pub fn new(params: ParameterMap, secret: &str) -> Self {
        let sign = sign(&params, secret);
        Self { params, sign }
    }

    pub fn params(&self) -> &ParameterMap {
        &self.params
    }

    pub fn sign(&self) -> &str {
        &self.sign
    }

    /// The request body, with the signature in the `sign` field.
    pub fn to_json(&self) -> Value {
        let mut body = self.params.to_json();
        body.insert(SIGN_FIELD.to_string(), Value::from(self.sign.as_str()));
        Value::Object(body)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn order_params() -> ParameterMap {
        ParameterMap::new()
            .with("mchId", 20001)
            .with("channelId", 8008)
            .with("mchOrderNo", "TEST_1700000000000_42")
            .with("amount", 10000)
            .with("notifyUrl", "https://example.com/notify")
            .with("jumpUrl", "https://example.com/jump")
            .with("extra", "{}")
            .with("compatible", 0)
            .with("test", false)
    }

    #[test]
    fn test_should_match_known_vector() {
        let params = ParameterMap::new().with("a", "1").with("b", "2");

        assert_eq!("a=1&b=2&key=k", params.canonical_string("k"));
        assert_eq!("F8F06AFA2E241A36469B9DAC959B3474", sign(&params, "k"));
    }

    #[test]
    fn test_should_render_booleans_literally() {
        let params = ParameterMap::new()
            .with("b", "2")
            .with("c", true)
            .with("a", "1");

        assert_eq!("a=1&b=2&c=true&key=k", params.canonical_string("k"));
        assert_eq!("4D5C8BBA8F4EE2B625F01B41EAF00583", sign(&params, "k"));
    }

    #[test]
    fn test_should_sign_order_request() {
        let params = order_params();

        assert_eq!(
            "amount=10000&channelId=8008&compatible=0&extra={}&jumpUrl=https://example.com/jump&mchId=20001&mchOrderNo=TEST_1700000000000_42&notifyUrl=https://example.com/notify&test=false&key=your_merchant_key",
            params.canonical_string("your_merchant_key")
        );
        assert_eq!(
            "D5C935602DD3CFE595F7DC4AD723F1C2",
            sign(&params, "your_merchant_key")
        );
    }

    #[test]
    fn test_should_ignore_sign_and_null_fields() {
        let mut params = ParameterMap::new().with("a", "1").with("b", "2");
        let expected = sign(&params, "k");

        params.insert("sign", "stale");
        params.insert_null("c");

        assert_eq!(expected, sign(&params, "k"));
    }

    #[test]
    fn test_should_change_when_any_value_changes() {
        let params = order_params();
        let changed = order_params().with("amount", 10001);

        assert_ne!(sign(&params, "k"), sign(&changed, "k"));
        assert_ne!(sign(&params, "k"), sign(&params, "other"));
    }

    #[test]
    fn test_should_not_depend_on_insertion_order() {
        let forward = ParameterMap::new().with("a", 1).with("b", true).with("c", "x");
        let backward = ParameterMap::new().with("c", "x").with("b", true).with("a", 1);

        assert_eq!(sign(&forward, "k"), sign(&backward, "k"));
    }

    #[test]
    fn test_should_sort_by_byte_value() {
        let params = ParameterMap::new().with("b", 1).with("B", 2).with("a", 3);

        assert_eq!("B=2&a=3&b=1&key=k", params.canonical_string("k"));
    }

    #[test]
    fn test_should_read_json_parameters() {
        let params = ParameterMap::from_json(&json!({
            "mchId": 20001,
            "channelId": 8008,
            "mchOrderNo": "TEST_1700000000000_42",
            "amount": 10000,
            "notifyUrl": "https://example.com/notify",
            "jumpUrl": "https://example.com/jump",
            "extra": "{}",
            "compatible": 0,
            "test": false,
            "sign": "ignored",
            "memo": null,
        }))
        .unwrap();

        assert_eq!(
            "D5C935602DD3CFE595F7DC4AD723F1C2",
            sign(&params, "your_merchant_key")
        );
    }

    #[test]
    fn test_should_render_empty_object() {
        let params = ParameterMap::from_json(&json!({ "extra": {} })).unwrap();

        assert_eq!(Some(&ParamValue::EmptyObject), params.get("extra"));
        assert_eq!("extra={}&key=k", params.canonical_string("k"));
    }

    #[test]
    fn test_should_reject_non_scalar_values() {
        assert_eq!(
            Err(SignError::NonScalar {
                field: "items".to_string()
            }),
            ParameterMap::from_json(&json!({ "items": [1, 2] }))
        );
        assert_eq!(
            Err(SignError::NonScalar {
                field: "extra".to_string()
            }),
            ParameterMap::from_json(&json!({ "extra": { "a": 1 } }))
        );
        assert_eq!(
            Err(SignError::NotAnObject),
            ParameterMap::from_json(&json!("a=1"))
        );
    }

    #[test]
    fn test_should_include_sign_in_body() {
        let signed = SignedParameterSet::new(order_params(), "your_merchant_key");
        let body = signed.to_json();

        assert_eq!("D5C935602DD3CFE595F7DC4AD723F1C2", body["sign"]);
        assert_eq!(20001, body["mchId"]);
        assert_eq!(false, body["test"]);
        assert_eq!("{}", body["extra"]);
    }
}
