//! Engine-echoed parameter values and their JSON-safe conversion
//!
//! The metrics engine hands back its parameters as loosely typed values:
//! numeric arrays, paths, whole tables, and mappings that may be shared (or
//! even cyclic). [`to_jsonable`] turns any of these into plain JSON.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::rc::Rc;

use serde_json::{Map, Number, Value};

use crate::metrics::UnitMetrics;

/// Marker written in place of a mapping or list seen a second time.
pub const CIRCULAR_REF: &str = "<CIRCULAR_REF>";

pub type SharedMap = Rc<RefCell<BTreeMap<String, ParamValue>>>;
pub type SharedList = Rc<RefCell<Vec<ParamValue>>>;

/// Engine parameters keyed by name.
pub type EngineParams = BTreeMap<String, ParamValue>;

#[derive(Clone)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Path(PathBuf),
    /// Dense numeric array
    Array(Vec<f64>),
    Table(UnitMetrics),
    List(SharedList),
    Map(SharedMap),
    /// Anything with no structured representation
    Opaque(Rc<dyn fmt::Debug>),
}

impl ParamValue {
    pub fn list(items: Vec<ParamValue>) -> Self {
        ParamValue::List(Rc::new(RefCell::new(items)))
    }

    pub fn map(entries: BTreeMap<String, ParamValue>) -> Self {
        ParamValue::Map(Rc::new(RefCell::new(entries)))
    }

    /// Integer view of a numeric array or list, used for cluster ids.
    pub fn as_int_vec(&self) -> Option<Vec<i64>> {
        match self {
            ParamValue::Array(values) => values
                .iter()
                .map(|v| (v.fract() == 0.0 && v.is_finite()).then_some(*v as i64))
                .collect(),
            ParamValue::List(items) => items
                .borrow()
                .iter()
                .map(|item| match item {
                    ParamValue::Int(i) => Some(*i),
                    ParamValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
                    _ => None,
                })
                .collect(),
            _ => None,
        }
    }
}

// Containers are summarised so a cyclic value can still be printed.
impl fmt::Debug for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Null => write!(f, "Null"),
            ParamValue::Bool(b) => write!(f, "Bool({})", b),
            ParamValue::Int(i) => write!(f, "Int({})", i),
            ParamValue::Float(x) => write!(f, "Float({})", x),
            ParamValue::Text(s) => write!(f, "Text({:?})", s),
            ParamValue::Path(p) => write!(f, "Path({:?})", p),
            ParamValue::Array(values) => write!(f, "Array(len={})", values.len()),
            ParamValue::Table(table) => write!(f, "Table(units={})", table.len()),
            ParamValue::List(items) => write!(f, "List(len={})", items.borrow().len()),
            ParamValue::Map(entries) => write!(f, "Map(keys={})", entries.borrow().len()),
            ParamValue::Opaque(inner) => write!(f, "Opaque({:?})", inner),
        }
    }
}

impl From<&Value> for ParamValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => ParamValue::Null,
            Value::Bool(b) => ParamValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => ParamValue::Int(i),
                None => ParamValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => ParamValue::Text(s.clone()),
            Value::Array(items) => ParamValue::list(items.iter().map(ParamValue::from).collect()),
            Value::Object(entries) => ParamValue::map(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), ParamValue::from(v)))
                    .collect(),
            ),
        }
    }
}

/// Convert a JSON object into engine parameters.
pub fn params_from_json(map: &Map<String, Value>) -> EngineParams {
    map.iter()
        .map(|(k, v)| (k.clone(), ParamValue::from(v)))
        .collect()
}

/// Convert one value into plain JSON.
pub fn to_jsonable(value: &ParamValue) -> Value {
    let mut seen = HashSet::new();
    convert(value, &mut seen)
}

/// Convert a whole parameter mapping into a JSON object.
///
/// Shared structure is tracked across all entries, so a mapping referenced
/// from two keys is written once and marked the second time.
pub fn params_to_json(params: &EngineParams) -> Value {
    let mut seen = HashSet::new();
    Value::Object(
        params
            .iter()
            .map(|(k, v)| (k.clone(), convert(v, &mut seen)))
            .collect(),
    )
}

fn float(x: f64) -> Value {
    Number::from_f64(x).map(Value::Number).unwrap_or(Value::Null)
}

fn convert(value: &ParamValue, seen: &mut HashSet<usize>) -> Value {
    match value {
        ParamValue::Null => Value::Null,
        ParamValue::Bool(b) => Value::Bool(*b),
        ParamValue::Int(i) => Value::from(*i),
        ParamValue::Float(x) => float(*x),
        ParamValue::Text(s) => Value::String(s.clone()),
        ParamValue::Path(p) => Value::String(p.to_string_lossy().into_owned()),
        ParamValue::Array(values) => Value::Array(values.iter().map(|x| float(*x)).collect()),
        ParamValue::Table(table) => table.to_column_map(),
        ParamValue::List(items) => {
            if !seen.insert(Rc::as_ptr(items) as *const () as usize) {
                return Value::String(CIRCULAR_REF.to_string());
            }
            let items = items.borrow();
            Value::Array(items.iter().map(|item| convert(item, seen)).collect())
        }
        ParamValue::Map(entries) => {
            if !seen.insert(Rc::as_ptr(entries) as *const () as usize) {
                return Value::String(CIRCULAR_REF.to_string());
            }
            let entries = entries.borrow();
            Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), convert(v, seen)))
                    .collect(),
            )
        }
        ParamValue::Opaque(inner) => Value::String(format!("{:?}", inner)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Column;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[derive(Debug)]
    #[allow(dead_code)]
    struct ProbeHandle {
        serial: u32,
    }

    #[test]
    fn test_plain_values_convert() {
        let mut params = EngineParams::new();
        params.insert("ks_dir".into(), ParamValue::Path(PathBuf::from("/staged/kilosort4_A")));
        params.insert("tauR".into(), ParamValue::Array(vec![0.0015, 0.002]));
        params.insert("nan".into(), ParamValue::Float(f64::NAN));
        params.insert("handle".into(), ParamValue::Opaque(Rc::new(ProbeHandle { serial: 7 })));

        assert_eq!(
            params_to_json(&params),
            json!({
                "ks_dir": "/staged/kilosort4_A",
                "tauR": [0.0015, 0.002],
                "nan": null,
                "handle": "ProbeHandle { serial: 7 }"
            })
        );
    }

    #[test]
    fn test_table_becomes_column_mapping() {
        let mut table = UnitMetrics::new(vec![0, 1]);
        table
            .insert_column("maxChannels", Column::Numeric(vec![3.0, 4.0]))
            .unwrap();
        assert_eq!(
            to_jsonable(&ParamValue::Table(table)),
            json!({ "cluster_id": [0, 1], "maxChannels": [3.0, 4.0] })
        );
    }

    #[test]
    fn test_self_referencing_map_is_marked() {
        let inner: SharedMap = Rc::new(RefCell::new(BTreeMap::new()));
        inner
            .borrow_mut()
            .insert("name".into(), ParamValue::Text("loop".into()));
        inner
            .borrow_mut()
            .insert("me".into(), ParamValue::Map(Rc::clone(&inner)));

        let json = to_jsonable(&ParamValue::Map(Rc::clone(&inner)));
        assert_eq!(json, json!({ "me": CIRCULAR_REF, "name": "loop" }));

        // break the cycle so the test does not leak
        inner.borrow_mut().clear();
    }

    #[test]
    fn test_self_referencing_list_is_marked() {
        let list: SharedList = Rc::new(RefCell::new(vec![ParamValue::Int(1)]));
        list.borrow_mut().push(ParamValue::List(Rc::clone(&list)));

        let json = to_jsonable(&ParamValue::List(Rc::clone(&list)));
        assert_eq!(json, json!([1, CIRCULAR_REF]));

        list.borrow_mut().clear();
    }

    #[test]
    fn test_json_roundtrip_keeps_scalars() {
        let source = json!({ "minSNR": 3.5, "maxNPeaks": 2, "somatic": true, "label": "C" });
        let params = params_from_json(source.as_object().unwrap());
        assert_eq!(params_to_json(&params), source);
    }

    #[test]
    fn test_as_int_vec() {
        assert_eq!(
            ParamValue::Array(vec![4.0, 9.0]).as_int_vec(),
            Some(vec![4, 9])
        );
        assert_eq!(ParamValue::Array(vec![4.5]).as_int_vec(), None);
        assert_eq!(ParamValue::Text("x".into()).as_int_vec(), None);
    }
}
