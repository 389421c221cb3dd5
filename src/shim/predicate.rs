//! Translating predicate documents into engine queries.
//!
//! ```json
//! {
//!     "time": {"$gte": 1356998400, "$lt": 1357084800},
//!     "pickup": {"$within": {"$box": [[-74.0, 40.7], [-73.9, 40.8]]}},
//!     "$or": [{"passengers": 1}, {"fare": {"$gt": 20.5}}]
//! }
//! ```
//!
//! Every top-level entry constrains one field. A single top-level `$or` splits the predicate
//! into one sub-query per branch, each branch combined with the other top-level entries.

use float_next_after::NextAfter;
use serde_json::{Map, Value as JsonValue};

use crate::codec::{encode_f64, encode_i64, KeyType};
use crate::error::{KdError, Result};
use crate::query::{QueryBox, QuerySpec, Region};
use crate::shim::document::{point, Number};
use crate::shim::IndexMeta;

/// How well an index can answer a predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Suitability {
    /// The predicate touches fields the index does not hold.
    Useless,
    /// Usable, but without pruning.
    Helpful,
    /// Every field of the predicate is indexed.
    Optimal,
}

/// Rate `predicate` for the index described by `meta`.
pub fn suitability(meta: &IndexMeta, predicate: &JsonValue) -> Suitability {
    let JsonValue::Object(entries) = predicate else {
        return Suitability::Useless;
    };
    if entries.is_empty() {
        return Suitability::Helpful;
    }

    let mut fields: Vec<&str> = vec![];
    for (name, value) in entries {
        if name == "$or" {
            let Some(branches) = value.as_array().filter(|b| !b.is_empty()) else {
                return Suitability::Useless;
            };
            for branch in branches {
                match branch.as_object() {
                    Some(branch) => fields.extend(branch.keys().map(String::as_str)),
                    None => return Suitability::Useless,
                }
            }
        } else {
            fields.push(name);
        }
    }
    if fields.iter().all(|f| meta.is_indexed(f)) {
        Suitability::Optimal
    } else {
        Suitability::Useless
    }
}

/// Parse `predicate` into one query per sub-query.
///
/// Every error is an [`KdError::InvalidPredicate`]; nothing reaches the engine unless the whole
/// predicate parses.
pub fn parse_predicate(meta: &IndexMeta, predicate: &JsonValue) -> Result<Vec<QuerySpec>> {
    let JsonValue::Object(entries) = predicate else {
        return Err(invalid(format!(
            "predicate must be an object, got {}",
            predicate
        )));
    };

    let mut common = QuerySpec::open(meta.dims());
    let mut branches: Option<&Vec<JsonValue>> = None;
    for (name, value) in entries {
        if name == "$or" {
            let list = value
                .as_array()
                .ok_or_else(|| invalid("$or takes an array of conditions".into()))?;
            if list.is_empty() {
                return Err(invalid("$or needs at least one branch".into()));
            }
            branches = Some(list);
        } else {
            apply_condition(meta, &mut common, name, value)?;
        }
    }

    let Some(branches) = branches else {
        return Ok(vec![common]);
    };
    branches
        .iter()
        .map(|branch| {
            let JsonValue::Object(conditions) = branch else {
                return Err(invalid(format!("$or branch must be an object, got {}", branch)));
            };
            let mut query = common.clone();
            for (name, value) in conditions {
                if name == "$or" {
                    return Err(invalid("nested $or is not supported".into()));
                }
                apply_condition(meta, &mut query, name, value)?;
            }
            Ok(query)
        })
        .collect()
}

fn invalid(message: String) -> KdError {
    KdError::InvalidPredicate(message)
}

fn apply_condition(
    meta: &IndexMeta,
    query: &mut QuerySpec,
    name: &str,
    value: &JsonValue,
) -> Result<()> {
    if name.starts_with('$') {
        return Err(invalid(format!("unknown top-level operator {}", name)));
    }
    match value {
        JsonValue::Number(_) => {
            let dim = scalar_dimension(meta, name)?;
            let n = number(value, name)?;
            Bound::Equal.apply(&mut query.query_box, dim, meta.key_type(dim), n);
            Ok(())
        }
        JsonValue::Object(operators) => apply_operators(meta, query, name, operators),
        JsonValue::Array(_) => Err(invalid(format!(
            "array values are not supported (field {})",
            name
        ))),
        other => Err(invalid(format!(
            "field {} compares against unsupported value {}",
            name, other
        ))),
    }
}

fn apply_operators(
    meta: &IndexMeta,
    query: &mut QuerySpec,
    name: &str,
    operators: &Map<String, JsonValue>,
) -> Result<()> {
    if operators.is_empty() {
        return Err(invalid(format!("field {} has an empty condition", name)));
    }
    for (op, operand) in operators {
        let bound = match op.as_str() {
            "$lt" => Bound::Below,
            "$lte" => Bound::AtMost,
            "$gt" => Bound::Above,
            "$gte" => Bound::AtLeast,
            "$within" => {
                within(meta, query, name, operand)?;
                continue;
            }
            other => {
                return Err(invalid(format!(
                    "unknown operator {} on field {}",
                    other, name
                )))
            }
        };
        let dim = scalar_dimension(meta, name)?;
        let n = number(operand, name)?;
        bound.apply(&mut query.query_box, dim, meta.key_type(dim), n);
    }
    Ok(())
}

fn within(meta: &IndexMeta, query: &mut QuerySpec, name: &str, shape: &JsonValue) -> Result<()> {
    let x_dim = meta
        .geo_dimension(name)
        .ok_or_else(|| invalid(format!("$within needs a 2d field, {} is not one", name)))?;
    let y_dim = x_dim + 1;
    let (x_type, y_type) = (meta.key_type(x_dim), meta.key_type(y_dim));

    let JsonValue::Object(shape) = shape else {
        return Err(invalid(format!("$within on {} takes a shape object", name)));
    };
    let mut entries = shape.iter();
    let (kind, corners) = match (entries.next(), entries.next()) {
        (Some(entry), None) => entry,
        _ => {
            return Err(invalid(format!(
                "$within on {} takes exactly one shape",
                name
            )))
        }
    };
    let points = corners
        .as_array()
        .ok_or_else(|| invalid(format!("{} on {} takes an array of points", kind, name)))?
        .iter()
        .map(|p| {
            point(p).ok_or_else(|| invalid(format!("{} is not a point (field {})", p, name)))
        })
        .collect::<Result<Vec<_>>>()?;

    match kind.as_str() {
        "$box" => {
            let [a, b] = points.as_slice() else {
                return Err(invalid(format!("$box on {} takes two corners", name)));
            };
            for (axis, dim, ty) in [(0, x_dim, x_type), (1, y_dim, y_type)] {
                let (lower, upper) = if a[axis].as_f64() <= b[axis].as_f64() {
                    (a[axis], b[axis])
                } else {
                    (b[axis], a[axis])
                };
                Bound::AtLeast.apply(&mut query.query_box, dim, ty, lower);
                Bound::AtMost.apply(&mut query.query_box, dim, ty, upper);
            }
        }
        "$polygon" => {
            let ring: Vec<[f64; 2]> = points
                .iter()
                .map(|[x, y]| [x.as_f64(), y.as_f64()])
                .collect();
            let region = Region::new(x_dim, y_dim, x_type, y_type, &ring)?;
            let (min, max) = region.bounds();
            for (axis, dim, ty) in [(0, x_dim, x_type), (1, y_dim, y_type)] {
                Bound::AtLeast.apply(&mut query.query_box, dim, ty, Number::Float(min[axis]));
                Bound::AtMost.apply(&mut query.query_box, dim, ty, Number::Float(max[axis]));
            }
            query.regions.push(region);
        }
        other => {
            return Err(invalid(format!(
                "unknown shape {} in $within on {}",
                other, name
            )))
        }
    }
    Ok(())
}

fn scalar_dimension(meta: &IndexMeta, name: &str) -> Result<usize> {
    meta.dimension(name).ok_or_else(|| {
        if meta.geo_dimension(name).is_some() {
            invalid(format!(
                "2d field {} only supports $within; compare {}.x or {}.y instead",
                name, name, name
            ))
        } else {
            invalid(format!("field {} is not indexed", name))
        }
    })
}

fn number(value: &JsonValue, name: &str) -> Result<Number> {
    Number::from_json(value)
        .ok_or_else(|| invalid(format!("field {} compares against non-number {}", name, value)))
}

/// A one-sided or two-sided bound on one dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bound {
    Equal,
    Below,
    AtMost,
    Above,
    AtLeast,
}

impl Bound {
    /// Narrow `dim` of `query_box` to the keys of type `ty` satisfying this bound against `n`.
    ///
    /// Strict bounds are exact: integer dimensions step by one and float dimensions step to the
    /// adjacent double. A bound no key satisfies empties the dimension.
    fn apply(self, query_box: &mut QueryBox, dim: usize, ty: KeyType, n: Number) {
        let (lower, upper) = match ty {
            KeyType::Integer => integer_range(self, n),
            KeyType::Float => float_range(self, n.as_f64()),
        }
        .unwrap_or((u64::MAX, 0));
        query_box.intersect(dim, lower, upper);
    }
}

fn integer_range(bound: Bound, n: Number) -> Option<(u64, u64)> {
    // i128 holds every i64 and every float rounded to an integer within i128 range
    let (floor, ceil) = match n {
        Number::Int(i) => (i as i128, i as i128),
        Number::Float(f) => (f.floor() as i128, f.ceil() as i128),
    };
    let (lower, upper) = match bound {
        Bound::Equal => (ceil, floor),
        Bound::Below => (i128::MIN, ceil - 1),
        Bound::AtMost => (i128::MIN, floor),
        Bound::Above => (floor + 1, i128::MAX),
        Bound::AtLeast => (ceil, i128::MAX),
    };
    let lower = lower.max(i64::MIN as i128);
    let upper = upper.min(i64::MAX as i128);
    (lower <= upper).then(|| (encode_i64(lower as i64), encode_i64(upper as i64)))
}

fn float_range(bound: Bound, f: f64) -> Option<(u64, u64)> {
    // both zeros compare equal, so inclusive bounds at zero take in both
    let low = |f: f64| if f == 0.0 { -0.0 } else { f };
    let high = |f: f64| if f == 0.0 { 0.0 } else { f };
    let (lower, upper) = match bound {
        Bound::Equal => (low(f), high(f)),
        Bound::Below => (f64::NEG_INFINITY, f.next_after(f64::NEG_INFINITY)),
        Bound::AtMost => (f64::NEG_INFINITY, high(f)),
        Bound::Above => (f.next_after(f64::INFINITY), f64::INFINITY),
        Bound::AtLeast => (low(f), f64::INFINITY),
    };
    // NaN keys sort outside the infinities and are never matched by a bound
    (lower <= upper).then(|| (encode_f64(lower), encode_f64(upper)))
}
