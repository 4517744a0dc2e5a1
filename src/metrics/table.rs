//! Column-oriented per-unit metrics table

use serde_json::{Map, Value};

use crate::error::{QcError, Result};

/// Column holding the unit id of each row.
pub const UNIT_ID_COLUMN: &str = "cluster_id";
/// Column holding each unit's peak-amplitude channel.
pub const MAX_CHANNEL_COLUMN: &str = "maxChannels";
/// Engine-provided phy cluster ids, used when no id list is echoed.
pub const PHY_CLUSTER_ID_COLUMN: &str = "phy_clusterID";

/// One column of values, one per unit.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Numeric(Vec<f64>),
    Text(Vec<String>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Numeric(values) => values.len(),
            Column::Text(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_numeric(&self) -> Option<&[f64]> {
        match self {
            Column::Numeric(values) => Some(values),
            Column::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&[String]> {
        match self {
            Column::Text(values) => Some(values),
            Column::Numeric(_) => None,
        }
    }

    /// Render one cell for CSV output. Missing numbers are left empty.
    pub fn cell(&self, row: usize) -> String {
        match self {
            Column::Numeric(values) => match values.get(row) {
                Some(v) if v.is_nan() => String::new(),
                Some(v) => v.to_string(),
                None => String::new(),
            },
            Column::Text(values) => values.get(row).cloned().unwrap_or_default(),
        }
    }

    fn to_json(&self) -> Value {
        match self {
            Column::Numeric(values) => Value::Array(
                values
                    .iter()
                    .map(|v| serde_json::Number::from_f64(*v).map_or(Value::Null, Value::Number))
                    .collect(),
            ),
            Column::Text(values) => {
                Value::Array(values.iter().cloned().map(Value::String).collect())
            }
        }
    }

    fn from_json(name: &str, cells: &[Value]) -> Result<Self> {
        let numeric = cells
            .iter()
            .all(|c| matches!(c, Value::Number(_) | Value::Null));
        if numeric {
            return Ok(Column::Numeric(
                cells
                    .iter()
                    .map(|c| c.as_f64().unwrap_or(f64::NAN))
                    .collect(),
            ));
        }
        cells
            .iter()
            .map(|c| match c {
                Value::Null => Ok(String::new()),
                Value::String(s) => Ok(s.clone()),
                Value::Bool(b) => Ok(b.to_string()),
                Value::Number(n) => Ok(n.to_string()),
                other => Err(QcError::InvalidMetrics {
                    reason: format!("column '{}' has a nested value: {}", name, other),
                }),
            })
            .collect::<Result<Vec<_>>>()
            .map(Column::Text)
    }
}

/// Per-unit metrics keyed by unit id.
///
/// Columns keep their insertion order, which is the order they are exported in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnitMetrics {
    unit_ids: Vec<i64>,
    columns: Vec<(String, Column)>,
}

impl UnitMetrics {
    pub fn new(unit_ids: Vec<i64>) -> Self {
        Self {
            unit_ids,
            columns: Vec::new(),
        }
    }

    /// Table whose unit ids are the row positions `0..n`.
    pub fn with_sequential_ids(n: usize) -> Self {
        Self::new((0..n as i64).collect())
    }

    /// Number of units (rows).
    pub fn len(&self) -> usize {
        self.unit_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.unit_ids.is_empty()
    }

    pub fn unit_ids(&self) -> &[i64] {
        &self.unit_ids
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, column)| column)
    }

    pub fn numeric(&self, name: &str) -> Option<&[f64]> {
        self.column(name).and_then(Column::as_numeric)
    }

    pub fn text(&self, name: &str) -> Option<&[String]> {
        self.column(name).and_then(Column::as_text)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(n, _)| n.as_str())
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.columns.iter().map(|(n, c)| (n.as_str(), c))
    }

    /// Add a column, or replace one with the same name in place.
    pub fn insert_column(&mut self, name: &str, column: Column) -> Result<()> {
        if column.len() != self.len() {
            return Err(QcError::ColumnLength {
                column: name.to_string(),
                expected: self.len(),
                actual: column.len(),
            });
        }
        match self.columns.iter_mut().find(|(n, _)| n == name) {
            Some((_, existing)) => *existing = column,
            None => self.columns.push((name.to_string(), column)),
        }
        Ok(())
    }

    /// Builder form of [`insert_column`](Self::insert_column).
    pub fn with_column(mut self, name: &str, column: Column) -> Result<Self> {
        self.insert_column(name, column)?;
        Ok(self)
    }

    /// Column name to value list, with the unit ids first.
    pub fn to_column_map(&self) -> Value {
        let mut map = Map::new();
        map.insert(
            UNIT_ID_COLUMN.to_string(),
            Value::Array(self.unit_ids.iter().map(|id| Value::from(*id)).collect()),
        );
        for (name, column) in &self.columns {
            map.insert(name.clone(), column.to_json());
        }
        Value::Object(map)
    }

    /// Parse a column-name to value-list mapping.
    ///
    /// A `cluster_id` column, when present, supplies the unit ids; otherwise
    /// rows are numbered from zero.
    pub fn from_column_map(map: &Map<String, Value>) -> Result<Self> {
        let mut rows: Option<usize> = None;
        let mut parsed = Vec::with_capacity(map.len());

        for (name, cells) in map {
            let cells = cells.as_array().ok_or_else(|| QcError::InvalidMetrics {
                reason: format!("column '{}' is not a list", name),
            })?;
            match rows {
                Some(n) if n != cells.len() => {
                    return Err(QcError::ColumnLength {
                        column: name.clone(),
                        expected: n,
                        actual: cells.len(),
                    })
                }
                _ => rows = Some(cells.len()),
            }
            parsed.push((name.as_str(), cells));
        }

        let n = rows.unwrap_or(0);
        let mut table = match parsed.iter().find(|(name, _)| *name == UNIT_ID_COLUMN) {
            Some((_, cells)) => {
                let ids = cells
                    .iter()
                    .map(|c| c.as_i64())
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(|| QcError::InvalidMetrics {
                        reason: format!("'{}' must contain integers", UNIT_ID_COLUMN),
                    })?;
                Self::new(ids)
            }
            None => Self::with_sequential_ids(n),
        };

        for (name, cells) in parsed {
            if name == UNIT_ID_COLUMN {
                continue;
            }
            table.insert_column(name, Column::from_json(name, cells)?)?;
        }
        Ok(table)
    }
}
