use serde_json::Value as JsonValue;

use crate::codec::KeyType;
use crate::error::{KdError, Result};

/// A scalar field and the key type it was pinned to, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalarField {
    pub name: String,
    pub key_type: Option<KeyType>,
}

/// The fields an index is declared over, parsed from a key pattern.
///
/// ```json
/// {"type": "kdtree", "pickup": "2d", "dropoff": "2d", "time": 1, "fare": "float"}
/// ```
///
/// `"2d"` declares a field holding a point, indexed as two dimensions `<field>.x` and
/// `<field>.y`. A number declares a scalar whose key type is taken from the first value seen
/// during the build, turning to float once a fractional value shows up; `"int"` and `"float"`
/// pin the type. The `type` entry names the index kind and
/// is not a field.
///
/// Dimensions are numbered 2D fields first, then scalars, each in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    geo_fields: Vec<String>,
    scalar_fields: Vec<ScalarField>,
}

impl IndexSpec {
    pub fn new(geo_fields: Vec<String>, scalar_fields: Vec<ScalarField>) -> Result<Self> {
        let spec = Self {
            geo_fields,
            scalar_fields,
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Parse a key pattern document.
    pub fn from_key_pattern(pattern: &JsonValue) -> Result<Self> {
        let JsonValue::Object(entries) = pattern else {
            return Err(KdError::Config(format!(
                "key pattern must be an object, got {}",
                pattern
            )));
        };

        let mut geo_fields = vec![];
        let mut scalar_fields = vec![];
        for (name, kind) in entries {
            if name == "type" {
                continue;
            }
            match kind {
                JsonValue::String(s) if s == "2d" => geo_fields.push(name.clone()),
                JsonValue::String(s) if s == "int" => scalar_fields.push(ScalarField {
                    name: name.clone(),
                    key_type: Some(KeyType::Integer),
                }),
                JsonValue::String(s) if s == "float" => scalar_fields.push(ScalarField {
                    name: name.clone(),
                    key_type: Some(KeyType::Float),
                }),
                JsonValue::Number(_) => scalar_fields.push(ScalarField {
                    name: name.clone(),
                    key_type: None,
                }),
                other => {
                    return Err(KdError::Config(format!(
                        "field {:?} has unsupported index kind {}",
                        name, other
                    )))
                }
            }
        }
        Self::new(geo_fields, scalar_fields)
    }

    /// Parse a key pattern from JSON text.
    pub fn from_json(json: &str) -> Result<Self> {
        let pattern: JsonValue = serde_json::from_str(json)
            .map_err(|e| KdError::Config(format!("invalid key pattern: {}", e)))?;
        Self::from_key_pattern(&pattern)
    }

    fn validate(&self) -> Result<()> {
        if self.geo_fields.is_empty() && self.scalar_fields.is_empty() {
            return Err(KdError::Config("key pattern declares no fields".into()));
        }
        let names = self.dimension_names();
        for (i, name) in names.iter().enumerate() {
            if name.is_empty()
                || name.starts_with('$')
                || name.split('.').any(str::is_empty)
                || name.contains(char::is_whitespace)
            {
                return Err(KdError::Config(format!("invalid field name {:?}", name)));
            }
            if names[..i].contains(name) {
                return Err(KdError::Config(format!("field {:?} declared twice", name)));
            }
        }
        Ok(())
    }

    pub fn geo_fields(&self) -> &[String] {
        &self.geo_fields
    }

    pub fn scalar_fields(&self) -> &[ScalarField] {
        &self.scalar_fields
    }

    pub fn dims(&self) -> usize {
        2 * self.geo_fields.len() + self.scalar_fields.len()
    }

    /// Name of every dimension, in dimension order.
    pub fn dimension_names(&self) -> Vec<String> {
        dimension_names(&self.geo_fields, self.scalar_fields.iter().map(|f| &f.name))
    }

    /// The pinned key type of every dimension; 2D dimensions are never pinned.
    pub fn pinned_types(&self) -> Vec<Option<KeyType>> {
        std::iter::repeat(None)
            .take(2 * self.geo_fields.len())
            .chain(self.scalar_fields.iter().map(|f| f.key_type))
            .collect()
    }
}

pub(crate) fn dimension_names<'a>(
    geo_fields: &[String],
    scalar_fields: impl Iterator<Item = &'a String>,
) -> Vec<String> {
    geo_fields
        .iter()
        .flat_map(|f| [format!("{}.x", f), format!("{}.y", f)])
        .chain(scalar_fields.cloned())
        .collect()
}
