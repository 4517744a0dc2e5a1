//! Resolved parameter sets

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A resolved mapping of option name to value.
///
/// There is no mutating API: a set is produced whole by the resolver (or
/// built up front with [`ParameterSet::with_param`]) and then only read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSet {
    values: Map<String, Value>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self { values: Map::new() }
    }

    pub fn from_map(values: Map<String, Value>) -> Self {
        Self { values }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.values.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_as<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Option<T> {
        self.values
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.values.get(key).and_then(Value::as_f64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.values.get(key).and_then(Value::as_bool)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_params_builder() {
        let params = ParameterSet::new()
            .with_param("minSNR", 3.5)
            .with_param("extractRaw", true)
            .with_param("ephysKilosortPath", "/data/ks");

        assert_eq!(params.get_f64("minSNR"), Some(3.5));
        assert_eq!(params.get_bool("extractRaw"), Some(true));
        assert_eq!(params.get_str("ephysKilosortPath"), Some("/data/ks"));
        assert_eq!(params.get_as::<u32>("missing"), None);
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn test_serializes_as_plain_object() {
        let params = ParameterSet::new().with_param("maxDrift", 80);
        assert_eq!(serde_json::to_value(&params).unwrap(), json!({ "maxDrift": 80 }));
    }
}
