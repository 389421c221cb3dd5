//! Reading numbers and points out of JSON documents.

use serde_json::Value as JsonValue;

use crate::codec::{encode_f64, encode_i64, KeyType};

/// A JSON number as the codec sees it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub(crate) fn from_json(value: &JsonValue) -> Option<Self> {
        let JsonValue::Number(n) = value else {
            return None;
        };
        if let Some(i) = n.as_i64() {
            Some(Number::Int(i))
        } else {
            n.as_f64().map(Number::Float)
        }
    }

    /// The key type a dimension gets when this is the first value seen.
    pub(crate) fn natural_type(self) -> KeyType {
        match self {
            Number::Int(_) => KeyType::Integer,
            Number::Float(_) => KeyType::Float,
        }
    }

    pub(crate) fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }

    /// Encode as a key of type `ty`, or `None` when the conversion would lose information.
    pub(crate) fn to_key(self, ty: KeyType) -> Option<u64> {
        match (self, ty) {
            (Number::Int(i), KeyType::Integer) => Some(encode_i64(i)),
            (Number::Float(f), KeyType::Float) => Some(encode_f64(f)),
            (Number::Float(f), KeyType::Integer) => {
                // i64::MAX is not representable, 2^63 is the first float out of range
                let in_range = f >= -(2f64.powi(63)) && f < 2f64.powi(63);
                (f.fract() == 0.0 && in_range).then(|| encode_i64(f as i64))
            }
            (Number::Int(i), KeyType::Float) => {
                let f = i as f64;
                (f < 2f64.powi(63) && f as i64 == i).then(|| encode_f64(f))
            }
        }
    }
}

/// Follow a dotted path through nested objects.
pub(crate) fn lookup<'a>(document: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    path.split('.')
        .try_fold(document, |value, name| value.as_object()?.get(name))
}

/// A 2D point given as `{"x": .., "y": ..}` or `[x, y]`.
pub(crate) fn point(value: &JsonValue) -> Option<[Number; 2]> {
    match value {
        JsonValue::Object(map) => Some([
            Number::from_json(map.get("x")?)?,
            Number::from_json(map.get("y")?)?,
        ]),
        JsonValue::Array(items) if items.len() == 2 => Some([
            Number::from_json(&items[0])?,
            Number::from_json(&items[1])?,
        ]),
        _ => None,
    }
}
