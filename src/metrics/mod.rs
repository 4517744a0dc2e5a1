//! Per-unit quality metrics

mod table;

pub use table::{Column, UnitMetrics, MAX_CHANNEL_COLUMN, PHY_CLUSTER_ID_COLUMN, UNIT_ID_COLUMN};
