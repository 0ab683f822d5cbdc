//! Path-component JSON OT type.
//!
//! A delta is a JSON array of components. Each component names a path into
//! the document and exactly one mutation:
//!
//! - `{"p": [...], "na": n}` - add `n` to the number at the path
//! - `{"p": [...], "oi": v}` - insert `v` at an object key (`od` records a
//!   replaced value, so a component may carry both)
//! - `{"p": [...], "od": v}` - remove an object key
//! - `{"p": [..., i], "li": v}` - insert `v` into a list at index `i`
//! - `{"p": [..., i], "ld": v}` - remove the list element at index `i`
//!
//! A single component object is also accepted where a delta is expected and
//! is treated as a one-element list.

use super::{Capabilities, OtType, TransformSide};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

/// One step of a path: object key or list index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathKey {
    Index(usize),
    Key(String),
}

/// Distinguishes an absent field from an explicit `null` payload: `null` is
/// a legal document value, so `"od": null` must parse as present.
fn present_value<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
struct Component {
    #[serde(default)]
    p: Vec<PathKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    na: Option<Number>,
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    oi: Option<Value>,
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    od: Option<Value>,
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    li: Option<Value>,
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    ld: Option<Value>,
}

impl Component {
    fn is_noop(&self) -> bool {
        let na_zero = match &self.na {
            Some(n) => n.as_f64() == Some(0.0),
            None => false,
        };
        let empty = self.na.is_none()
            && self.oi.is_none()
            && self.od.is_none()
            && self.li.is_none()
            && self.ld.is_none();
        empty || (na_zero && self.oi.is_none() && self.od.is_none())
    }

    fn validate(&self) -> Result<()> {
        let arithmetic = self.na.is_some();
        let object = self.oi.is_some() || self.od.is_some();
        let list_insert = self.li.is_some();
        let list_delete = self.ld.is_some();
        let kinds =
            arithmetic as u8 + object as u8 + list_insert as u8 + list_delete as u8;
        if kinds > 1 {
            return Err(Error::InvalidDelta(
                "component mixes mutation kinds".into(),
            ));
        }
        Ok(())
    }
}

fn parse_delta(delta: &Value) -> Result<Vec<Component>> {
    let listed = match delta {
        Value::Array(_) => delta.clone(),
        Value::Object(_) => Value::Array(vec![delta.clone()]),
        other => {
            return Err(Error::InvalidDelta(format!(
                "expected a component list, got {other}"
            )))
        }
    };
    let components: Vec<Component> =
        serde_json::from_value(listed).map_err(|e| Error::InvalidDelta(e.to_string()))?;
    for component in &components {
        component.validate()?;
    }
    Ok(components)
}

fn encode_delta(components: Vec<Component>) -> Result<Value> {
    serde_json::to_value(components).map_err(|e| Error::InvalidDelta(e.to_string()))
}

fn path_str(path: &[PathKey]) -> String {
    let parts: Vec<String> = path
        .iter()
        .map(|key| match key {
            PathKey::Key(k) => k.clone(),
            PathKey::Index(i) => i.to_string(),
        })
        .collect();
    format!("/{}", parts.join("/"))
}

fn resolve_mut<'a>(data: &'a mut Value, path: &[PathKey]) -> Result<&'a mut Value> {
    let mut current = data;
    for key in path {
        current = match (key, current) {
            (PathKey::Key(k), Value::Object(map)) => map
                .get_mut(k)
                .ok_or_else(|| Error::InvalidDelta(format!("missing path {}", path_str(path))))?,
            (PathKey::Index(i), Value::Array(list)) => list
                .get_mut(*i)
                .ok_or_else(|| Error::InvalidDelta(format!("missing path {}", path_str(path))))?,
            _ => {
                return Err(Error::InvalidDelta(format!(
                    "path {} does not match document shape",
                    path_str(path)
                )))
            }
        };
    }
    Ok(current)
}

fn add_numbers(a: &Number, b: &Number) -> Result<Number> {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        if let Some(sum) = x.checked_add(y) {
            return Ok(Number::from(sum));
        }
    }
    let sum = a.as_f64().unwrap_or(0.0) + b.as_f64().unwrap_or(0.0);
    Number::from_f64(sum).ok_or_else(|| Error::InvalidDelta("non-finite na result".into()))
}

fn negate(n: &Number) -> Result<Number> {
    if let Some(i) = n.as_i64() {
        if let Some(neg) = i.checked_neg() {
            return Ok(Number::from(neg));
        }
    }
    Number::from_f64(-n.as_f64().unwrap_or(0.0))
        .ok_or_else(|| Error::InvalidDelta("non-finite na result".into()))
}

fn apply_component(data: &mut Value, c: &Component) -> Result<()> {
    if let Some(n) = &c.na {
        let target = resolve_mut(data, &c.p)?;
        match target {
            Value::Number(existing) => {
                let sum = add_numbers(existing, n)?;
                *target = Value::Number(sum);
            }
            _ => {
                return Err(Error::InvalidDelta(format!(
                    "na target at {} is not a number",
                    path_str(&c.p)
                )))
            }
        }
        return Ok(());
    }

    if c.oi.is_some() || c.od.is_some() {
        let (parent_path, key) = match c.p.split_last() {
            Some((PathKey::Key(k), parent)) => (parent, k),
            _ => {
                return Err(Error::InvalidDelta(format!(
                    "object op at non-key path {}",
                    path_str(&c.p)
                )))
            }
        };
        let parent = resolve_mut(data, parent_path)?;
        let map = parent.as_object_mut().ok_or_else(|| {
            Error::InvalidDelta(format!("object op at {} on non-object", path_str(&c.p)))
        })?;
        match &c.oi {
            Some(value) => {
                map.insert(key.clone(), value.clone());
            }
            None => {
                map.remove(key);
            }
        }
        return Ok(());
    }

    if c.li.is_some() || c.ld.is_some() {
        let (parent_path, index) = match c.p.split_last() {
            Some((PathKey::Index(i), parent)) => (parent, *i),
            _ => {
                return Err(Error::InvalidDelta(format!(
                    "list op at non-index path {}",
                    path_str(&c.p)
                )))
            }
        };
        let parent = resolve_mut(data, parent_path)?;
        let list = parent.as_array_mut().ok_or_else(|| {
            Error::InvalidDelta(format!("list op at {} on non-list", path_str(&c.p)))
        })?;
        if let Some(value) = &c.li {
            let index = index.min(list.len());
            list.insert(index, value.clone());
        } else {
            if index >= list.len() {
                return Err(Error::InvalidDelta(format!(
                    "ld index out of range at {}",
                    path_str(&c.p)
                )));
            }
            list.remove(index);
        }
    }

    Ok(())
}

fn is_strict_prefix(prefix: &[PathKey], path: &[PathKey]) -> bool {
    prefix.len() < path.len() && path[..prefix.len()] == *prefix
}

/// Transform component `c` to apply after component `a`. Returns `None` when
/// `a` obsoletes `c` entirely.
fn transform_component(
    mut c: Component,
    a: &Component,
    side: TransformSide,
) -> Result<Option<Component>> {
    // Arithmetic never moves or removes structure.
    if a.na.is_some() {
        return Ok(Some(c));
    }

    // List insert/delete shifts indices of everything routed through the
    // same array position.
    if a.li.is_some() || a.ld.is_some() {
        let (a_parent, a_index) = match a.p.split_last() {
            Some((PathKey::Index(i), parent)) => (parent, *i),
            _ => return Err(Error::InvalidDelta("list op at non-index path".into())),
        };
        if c.p.len() > a_parent.len() && c.p[..a_parent.len()] == *a_parent {
            if let PathKey::Index(j) = c.p[a_parent.len()] {
                let same_depth_insert =
                    c.li.is_some() && c.p.len() == a_parent.len() + 1;
                let shifted = if a.li.is_some() {
                    if j > a_index {
                        Some(j + 1)
                    } else if j == a_index {
                        if same_depth_insert {
                            // both insert at the same slot: left goes first
                            match side {
                                TransformSide::Left => Some(j),
                                TransformSide::Right => Some(j + 1),
                            }
                        } else {
                            // the element we target moved right
                            Some(j + 1)
                        }
                    } else {
                        Some(j)
                    }
                } else {
                    // a deleted at a_index
                    if j > a_index {
                        Some(j - 1)
                    } else if j == a_index {
                        if same_depth_insert {
                            // inserting where the deleted element was
                            Some(j)
                        } else {
                            // our target is gone
                            return Ok(None);
                        }
                    } else {
                        Some(j)
                    }
                };
                if let Some(j) = shifted {
                    c.p[a_parent.len()] = PathKey::Index(j);
                }
            }
        }
        return Ok(Some(c));
    }

    // Object insert/remove.
    if a.oi.is_some() || a.od.is_some() {
        if a.od.is_some() && is_strict_prefix(&a.p, &c.p) {
            // a removed or replaced a subtree containing c's target
            return Ok(None);
        }
        if a.p == c.p {
            if c.na.is_some() || c.li.is_some() || c.ld.is_some() {
                // the value c meant to mutate was removed or replaced
                return Ok(None);
            }
            if a.od.is_some() {
                c.od = None;
            }
            if let Some(their_insert) = &a.oi {
                if c.oi.is_some() {
                    match side {
                        TransformSide::Left => c.od = Some(their_insert.clone()),
                        TransformSide::Right => return Ok(None),
                    }
                } else {
                    // their insert stands; nothing of c survives
                    return Ok(None);
                }
            }
            if c.oi.is_none() && c.od.is_none() {
                return Ok(None);
            }
        }
    }

    Ok(Some(c))
}

fn transform_delta(delta: &Value, over: &Value, side: TransformSide) -> Result<Value> {
    let mut components = parse_delta(delta)?;
    for a in parse_delta(over)? {
        let mut survivors = Vec::with_capacity(components.len());
        for c in components {
            if let Some(transformed) = transform_component(c, &a, side)? {
                survivors.push(transformed);
            }
        }
        components = survivors;
    }
    encode_delta(components)
}

/// The built-in JSON OT type, registered as `"json"`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonOt;

impl OtType for JsonOt {
    fn name(&self) -> &str {
        "json"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            compose: true,
            invert: true,
            normalize: true,
        }
    }

    fn create(&self, data: Value) -> Result<Value> {
        Ok(data)
    }

    fn apply(&self, mut data: Value, delta: &Value) -> Result<Value> {
        for component in parse_delta(delta)? {
            apply_component(&mut data, &component)?;
        }
        Ok(data)
    }

    fn transform(&self, delta: &Value, over: &Value, side: TransformSide) -> Result<Value> {
        transform_delta(delta, over, side)
    }

    fn compose(&self, first: &Value, second: &Value) -> Result<Value> {
        let mut components = parse_delta(first)?;
        for next in parse_delta(second)? {
            // fold consecutive additions on the same path
            if let (Some(last), Some(n)) = (components.last_mut(), &next.na) {
                if last.p == next.p {
                    if let Some(m) = &last.na {
                        last.na = Some(add_numbers(m, n)?);
                        continue;
                    }
                }
            }
            components.push(next);
        }
        encode_delta(components)
    }

    fn invert(&self, delta: &Value) -> Result<Value> {
        let components = parse_delta(delta)?;
        let mut inverted = Vec::with_capacity(components.len());
        for c in components.into_iter().rev() {
            let mut inv = Component {
                p: c.p,
                ..Component::default()
            };
            if let Some(n) = &c.na {
                inv.na = Some(negate(n)?);
            }
            inv.oi = c.od;
            inv.od = c.oi;
            inv.li = c.ld;
            inv.ld = c.li;
            inverted.push(inv);
        }
        encode_delta(inverted)
    }

    fn normalize(&self, delta: Value) -> Value {
        match parse_delta(&delta) {
            Ok(components) => {
                let kept: Vec<Component> =
                    components.into_iter().filter(|c| !c.is_noop()).collect();
                encode_delta(kept).unwrap_or(delta)
            }
            Err(_) => delta,
        }
    }
}
