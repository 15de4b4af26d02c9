//! JSON codec for call arguments and response envelopes.
//!
//! Request payload: `[<arg0>, <arg1>, ...]`.
//! Response payload: `{"Error": string|null, "Data": any|null}`.

use crate::error::{CodecError, Error};

use bytes::Bytes;
use derive_more::Display;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Declared type of a function parameter.
///
/// Argument conversion is a lookup over these tags, one per position.
#[derive(Clone, Debug, Display, Eq, Hash, PartialEq)]
pub enum ParamType {
    /// JSON boolean.
    #[display("bool")]
    Bool,

    /// JSON integer representable as `i64` or `u64`.
    #[display("int")]
    Int,

    /// Any JSON number.
    #[display("float")]
    Float,

    /// JSON string.
    #[display("string")]
    String,

    /// JSON array.
    #[display("array")]
    Array,

    /// JSON object.
    #[display("object")]
    Object,

    /// Any JSON value, including null.
    #[display("any")]
    Any,

    /// The inner type or null.
    #[display("nullable<{_0}>")]
    Nullable(Box<ParamType>),
}

impl ParamType {
    /// Wraps `inner` so that null is also accepted.
    #[must_use]
    pub fn nullable(inner: Self) -> Self {
        Self::Nullable(Box::new(inner))
    }

    /// Whether `value` converts to this type.
    #[must_use]
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (Self::Any, _)
            | (Self::Nullable(_), Value::Null)
            | (Self::Bool, Value::Bool(_))
            | (Self::Float, Value::Number(_))
            | (Self::String, Value::String(_))
            | (Self::Array, Value::Array(_))
            | (Self::Object, Value::Object(_)) => true,
            (Self::Int, Value::Number(number)) => number.is_i64() || number.is_u64(),
            (Self::Nullable(inner), value) => inner.accepts(value),
            _ => false,
        }
    }
}

const fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Outcome of one call as carried on the wire.
///
/// A non-null `error` marks failure; `data` is ignored in that case.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ResponseEnvelope {
    /// Error message, if the call failed.
    #[serde(rename = "Error", default)]
    pub error: Option<String>,

    /// Result value, if the call succeeded.
    #[serde(rename = "Data", default)]
    pub data: Option<Value>,
}

impl ResponseEnvelope {
    /// A successful outcome.
    #[must_use]
    pub fn success(data: Value) -> Self {
        Self {
            error: None,
            data: Some(data),
        }
    }

    /// A failed outcome.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            data: None,
        }
    }
}

/// Ordered call arguments.
pub trait IntoArgs {
    /// Converts into JSON values, preserving order.
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be represented as JSON.
    fn into_args(self) -> Result<Vec<Value>, CodecError>;
}

impl IntoArgs for () {
    fn into_args(self) -> Result<Vec<Value>, CodecError> {
        Ok(Vec::new())
    }
}

impl IntoArgs for Vec<Value> {
    fn into_args(self) -> Result<Vec<Value>, CodecError> {
        Ok(self)
    }
}

fn to_arg<A: Serialize>(arg: A) -> Result<Value, CodecError> {
    serde_json::to_value(arg).map_err(|e| CodecError::Serialization(e.to_string()))
}

macro_rules! impl_into_args {
    ($($ty:ident => $arg:ident),+) => {
        impl<$($ty: Serialize),+> IntoArgs for ($($ty,)+) {
            fn into_args(self) -> Result<Vec<Value>, CodecError> {
                let ($($arg,)+) = self;
                Ok(vec![$(to_arg($arg)?),+])
            }
        }
    };
}

impl_into_args!(A => a);
impl_into_args!(A => a, B => b);
impl_into_args!(A => a, B => b, C => c);
impl_into_args!(A => a, B => b, C => c, D => d);
impl_into_args!(A => a, B => b, C => c, D => d, E => e);
impl_into_args!(A => a, B => b, C => c, D => d, E => e, F => f);
impl_into_args!(A => a, B => b, C => c, D => d, E => e, F => f, G => g);
impl_into_args!(A => a, B => b, C => c, D => d, E => e, F => f, G => g, H => h);

/// Encodes call arguments as a JSON array.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_args(args: &[Value]) -> Result<Bytes, CodecError> {
    serde_json::to_vec(args)
        .map(Bytes::from)
        .map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a JSON array and converts element `i` to `params[i]`.
///
/// # Errors
///
/// Returns an error if the payload is not a JSON array, the arity differs
/// from the signature, or an element does not convert to its parameter type.
pub fn decode_args(payload: &[u8], params: &[ParamType]) -> Result<Vec<Value>, CodecError> {
    let args: Vec<Value> = serde_json::from_slice(payload)
        .map_err(|e| CodecError::Deserialization(e.to_string()))?;

    if args.len() != params.len() {
        return Err(CodecError::ArityMismatch {
            expected: params.len(),
            actual: args.len(),
        });
    }

    if let Some((index, (arg, param))) = args
        .iter()
        .zip(params)
        .enumerate()
        .find(|(_, (arg, param))| !param.accepts(arg))
    {
        return Err(CodecError::ParameterConversion {
            index,
            expected: param.clone(),
            actual: kind(arg),
        });
    }

    Ok(args)
}

/// Encodes a response envelope.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_response(envelope: &ResponseEnvelope) -> Result<Bytes, CodecError> {
    serde_json::to_vec(envelope)
        .map(Bytes::from)
        .map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a response envelope.
///
/// # Errors
///
/// Returns an error if the payload is not a well-formed envelope.
pub fn decode_response(payload: &[u8]) -> Result<ResponseEnvelope, CodecError> {
    serde_json::from_slice(payload).map_err(|e| CodecError::Deserialization(e.to_string()))
}

/// Resolves an envelope into the caller's result type.
///
/// # Errors
///
/// Returns [`Error::RemoteInvocation`] when the envelope carries an error and
/// [`Error::ResultConversion`] when `data` does not fit `T`.
pub fn decode_result<T: DeserializeOwned>(envelope: ResponseEnvelope) -> Result<T, Error> {
    if let Some(message) = envelope.error {
        return Err(Error::RemoteInvocation(message));
    }

    serde_json::from_value(envelope.data.unwrap_or(Value::Null))
        .map_err(|e| Error::ResultConversion(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq, Serialize)]
    struct V {
        z: String,
        x: String,
    }

    #[test]
    fn test_encode_args_preserves_order() {
        let args = ("a", 2).into_args().unwrap();
        assert_eq!(&encode_args(&args).unwrap()[..], br#"["a",2]"#);
    }

    #[test]
    fn test_encode_struct_argument() {
        let v = V {
            z: "6".to_string(),
            x: "8888v".to_string(),
        };
        let args = ("string", 2, v).into_args().unwrap();

        assert_eq!(
            &encode_args(&args).unwrap()[..],
            br#"["string",2,{"z":"6","x":"8888v"}]"#
        );
    }

    #[test]
    fn test_decode_args() {
        let args = decode_args(
            br#"["a", 2, 2.5, true, null, [1], {"k": 1}]"#,
            &[
                ParamType::String,
                ParamType::Int,
                ParamType::Float,
                ParamType::Bool,
                ParamType::nullable(ParamType::String),
                ParamType::Array,
                ParamType::Any,
            ],
        )
        .unwrap();

        assert_eq!(
            args,
            vec![
                json!("a"),
                json!(2),
                json!(2.5),
                json!(true),
                Value::Null,
                json!([1]),
                json!({"k": 1})
            ]
        );
    }

    #[test]
    fn test_decode_args_arity_mismatch() {
        assert_eq!(
            decode_args(br#"["a"]"#, &[ParamType::String, ParamType::Int]),
            Err(CodecError::ArityMismatch {
                expected: 2,
                actual: 1
            })
        );
        assert_eq!(
            decode_args(b"[]", &[ParamType::Int]),
            Err(CodecError::ArityMismatch {
                expected: 1,
                actual: 0
            })
        );
    }

    #[test]
    fn test_decode_args_conversion_failure() {
        assert_eq!(
            decode_args(br#"["a", 2.5]"#, &[ParamType::String, ParamType::Int]),
            Err(CodecError::ParameterConversion {
                index: 1,
                expected: ParamType::Int,
                actual: "number",
            })
        );
        assert!(decode_args(br#"[null]"#, &[ParamType::String]).is_err());
    }

    #[test]
    fn test_decode_args_rejects_malformed_payload() {
        assert!(matches!(
            decode_args(b"not json", &[]),
            Err(CodecError::Deserialization(_))
        ));
        assert!(matches!(
            decode_args(br#"{"a": 1}"#, &[ParamType::Int]),
            Err(CodecError::Deserialization(_))
        ));
    }

    #[test]
    fn test_response_wire_format() {
        let success = encode_response(&ResponseEnvelope::success(json!("a2"))).unwrap();
        assert_eq!(&success[..], br#"{"Error":null,"Data":"a2"}"#);

        let failure = encode_response(&ResponseEnvelope::failure("boom")).unwrap();
        assert_eq!(&failure[..], br#"{"Error":"boom","Data":null}"#);
    }

    #[test]
    fn test_decode_result() {
        let value: String = decode_result(ResponseEnvelope::success(json!("a2"))).unwrap();
        assert_eq!(value, "a2");

        let error = decode_result::<String>(ResponseEnvelope::failure("boom")).unwrap_err();
        assert!(matches!(error, Error::RemoteInvocation(message) if message == "boom"));

        let error = decode_result::<i64>(ResponseEnvelope::success(json!("a2"))).unwrap_err();
        assert!(matches!(error, Error::ResultConversion(_)));
    }

    #[test]
    fn test_error_wins_over_data() {
        let envelope = decode_response(br#"{"Error":"boom","Data":1}"#).unwrap();
        assert!(matches!(
            decode_result::<i64>(envelope),
            Err(Error::RemoteInvocation(_))
        ));
    }

    #[test]
    fn test_nullable_display() {
        assert_eq!(
            ParamType::nullable(ParamType::Int).to_string(),
            "nullable<int>"
        );
    }

    fn json_leaf() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            "[a-z ]{0,12}".prop_map(Value::String),
        ]
    }

    fn typed_arg() -> impl Strategy<Value = (Value, ParamType)> {
        prop_oneof![
            any::<bool>().prop_map(|b| (Value::Bool(b), ParamType::Bool)),
            any::<i64>().prop_map(|n| (Value::from(n), ParamType::Int)),
            (-1_000_000i32..1_000_000)
                .prop_map(|n| (Value::from(f64::from(n) / 4.0), ParamType::Float)),
            ".{0,16}".prop_map(|s| (Value::String(s), ParamType::String)),
            prop::collection::vec(json_leaf(), 0..4)
                .prop_map(|items| (Value::Array(items), ParamType::Array)),
            json_leaf().prop_map(|v| (v, ParamType::Any)),
        ]
    }

    proptest! {
        #[test]
        fn prop_args_round_trip(typed in prop::collection::vec(typed_arg(), 0..6)) {
            let (values, params): (Vec<_>, Vec<_>) = typed.into_iter().unzip();
            let encoded = encode_args(&values).unwrap();
            prop_assert_eq!(decode_args(&encoded, &params).unwrap(), values);
        }

        #[test]
        fn prop_response_round_trip(data in json_leaf(), message in ".{0,16}") {
            let success = ResponseEnvelope::success(data);
            prop_assert_eq!(decode_response(&encode_response(&success).unwrap()).unwrap(), success);

            let failure = ResponseEnvelope::failure(message);
            prop_assert_eq!(decode_response(&encode_response(&failure).unwrap()).unwrap(), failure);
        }
    }
}
