/// Typed access to a flat JSON input map.
///
/// Numbers and booleans are accepted either natively or as strings, matching what
/// the engine sends for secret and computed values.

use common::{Error, Result};
use serde_json::{Map, Value};

pub type Inputs = Map<String, Value>;

#[derive(Clone, Copy)]
pub struct Properties<'a> {
    inputs: &'a Inputs,
}

impl<'a> Properties<'a> {
    pub fn new(inputs: &'a Inputs) -> Self {
        Self { inputs }
    }

    pub fn has(&self, key: &str) -> bool {
        matches!(self.inputs.get(key), Some(v) if !v.is_null())
    }

    pub fn value(&self, key: &str) -> Option<&'a Value> {
        self.inputs.get(key).filter(|v| !v.is_null())
    }

    pub fn string(&self, key: &str) -> Option<String> {
        match self.value(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn required_string(&self, key: &str) -> Result<String> {
        self.string(key)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::InvalidArgument(format!("missing required property '{}'", key)))
    }

    pub fn number(&self, key: &str) -> Result<Option<u64>> {
        let Some(value) = self.value(key) else {
            return Ok(None);
        };
        let parsed = match value {
            Value::Number(n) => n.as_u64().or_else(|| {
                n.as_f64()
                    .filter(|f| *f >= 0.0 && f.fract() == 0.0)
                    .map(|f| f as u64)
            }),
            Value::String(s) if s.is_empty() => return Ok(None),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        };
        parsed.map(Some).ok_or_else(|| {
            Error::InvalidArgument(format!(
                "property '{}' must be a non-negative integer, got {}",
                key, value
            ))
        })
    }

    pub fn number_u32(&self, key: &str) -> Result<Option<u32>> {
        self.number(key)?
            .map(|n| {
                u32::try_from(n).map_err(|_| {
                    Error::InvalidArgument(format!("property '{}' is out of range: {}", key, n))
                })
            })
            .transpose()
    }

    pub fn boolean(&self, key: &str) -> Result<Option<bool>> {
        let Some(value) = self.value(key) else {
            return Ok(None);
        };
        match value {
            Value::Bool(b) => Ok(Some(*b)),
            Value::String(s) if s.is_empty() => Ok(None),
            Value::String(s) => match s.as_str() {
                "true" => Ok(Some(true)),
                "false" => Ok(Some(false)),
                _ => Err(Error::InvalidArgument(format!(
                    "property '{}' must be true or false, got '{}'",
                    key, s
                ))),
            },
            other => Err(Error::InvalidArgument(format!(
                "property '{}' must be true or false, got {}",
                key, other
            ))),
        }
    }

    /// Items of an array property, each viewed as an object; non-objects are skipped.
    pub fn objects(&self, key: &str) -> Vec<Properties<'a>> {
        match self.value(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_object)
                .map(Properties::new)
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn array_len(&self, key: &str) -> usize {
        self.value(key)
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn inputs(value: Value) -> Inputs {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_numbers_accept_strings() {
        let map = inputs(json!({ "a": 64, "b": "128", "c": 1.0, "d": "x", "e": "" }));
        let props = Properties::new(&map);
        assert_eq!(props.number("a").unwrap(), Some(64));
        assert_eq!(props.number("b").unwrap(), Some(128));
        assert_eq!(props.number("c").unwrap(), Some(1));
        assert!(props.number("d").is_err());
        assert_eq!(props.number("e").unwrap(), None);
        assert_eq!(props.number("missing").unwrap(), None);
    }

    #[test]
    fn test_booleans() {
        let map = inputs(json!({ "a": true, "b": "false", "c": "", "d": "yes" }));
        let props = Properties::new(&map);
        assert_eq!(props.boolean("a").unwrap(), Some(true));
        assert_eq!(props.boolean("b").unwrap(), Some(false));
        assert_eq!(props.boolean("c").unwrap(), None);
        assert!(props.boolean("d").is_err());
    }

    #[test]
    fn test_objects_and_required() {
        let map = inputs(json!({ "list": [{ "name": "vmnic0" }, 3], "name": "" }));
        let props = Properties::new(&map);
        let items = props.objects("list");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].string("name").as_deref(), Some("vmnic0"));
        assert!(props.required_string("name").is_err());
    }
}
