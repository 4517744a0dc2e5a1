//! Distance-from-tip ROI labeling

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{QcError, Result};
use crate::metrics::{Column, UnitMetrics, MAX_CHANNEL_COLUMN};

pub const DISTANCE_COLUMN: &str = "distance_from_tip_um";
pub const ROI_LABEL_COLUMN: &str = "roi_label";
pub const IN_ROI: &str = "IN_ROI";
pub const OUTSIDE_ROI: &str = "OUTSIDE_ROI";

/// Which end of the shank is the physical tip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TipEnd {
    /// Tip sits at the smallest along-probe coordinate
    Min,
    /// Tip sits at the largest along-probe coordinate
    Max,
}

impl FromStr for TipEnd {
    type Err = QcError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "min" | "min_y" => Ok(TipEnd::Min),
            "max" | "max_y" => Ok(TipEnd::Max),
            other => Err(QcError::InvalidTipEnd {
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for TipEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TipEnd::Min => f.write_str("min_y"),
            TipEnd::Max => f.write_str("max_y"),
        }
    }
}

/// Physical (x, y) position of every recording channel, y along the shank.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelGeometry {
    positions: Vec<[f64; 2]>,
    source: Option<PathBuf>,
}

impl ChannelGeometry {
    pub fn new(positions: Vec<[f64; 2]>) -> Self {
        Self {
            positions,
            source: None,
        }
    }

    /// Remember where the positions were read from, for error messages.
    pub fn with_source(mut self, source: &Path) -> Self {
        self.source = Some(source.to_path_buf());
        self
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn positions(&self) -> &[[f64; 2]] {
        &self.positions
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Along-probe coordinate of one channel.
    pub fn y(&self, channel: usize) -> Option<f64> {
        self.positions.get(channel).map(|p| p[1])
    }

    /// Tip coordinate, ignoring NaN channels.
    pub fn tip(&self, tip_end: TipEnd) -> Option<f64> {
        let ys = self.positions.iter().map(|p| p[1]).filter(|y| !y.is_nan());
        match tip_end {
            TipEnd::Min => ys.reduce(f64::min),
            TipEnd::Max => ys.reduce(f64::max),
        }
    }

    fn context(&self) -> String {
        match &self.source {
            Some(path) => format!("ks_dir={}", path.display()),
            None => "in-memory channel geometry".to_string(),
        }
    }
}

/// Validate the max-channel column and return it as channel indices.
fn channel_indices(metrics: &UnitMetrics, geometry: &ChannelGeometry) -> Result<Vec<usize>> {
    let max_channels = metrics
        .numeric(MAX_CHANNEL_COLUMN)
        .ok_or_else(|| QcError::MissingColumn {
            column: MAX_CHANNEL_COLUMN.to_string(),
            context: geometry.context(),
        })?;

    let count = geometry.len();
    let valid = |v: f64| v.fract() == 0.0 && v >= 0.0 && v < count as f64;

    let offending: Vec<f64> = max_channels.iter().copied().filter(|v| !valid(*v)).collect();
    if !offending.is_empty() {
        return Err(QcError::ChannelOutOfRange {
            context: geometry.context(),
            channel_count: count,
            offending,
        });
    }
    Ok(max_channels.iter().map(|v| *v as usize).collect())
}

/// Label every unit as in or outside the ROI by its distance from the tip.
///
/// Returns a copy of `metrics` with [`DISTANCE_COLUMN`] and
/// [`ROI_LABEL_COLUMN`] added. The boundary is inclusive.
pub fn label_units(
    metrics: &UnitMetrics,
    geometry: &ChannelGeometry,
    roi_boundary_um: f64,
    tip_end: TipEnd,
) -> Result<UnitMetrics> {
    let channels = channel_indices(metrics, geometry)?;
    let tip = geometry.tip(tip_end).unwrap_or(f64::NAN);

    let distances: Vec<f64> = channels
        .iter()
        .map(|&ch| {
            let unit_y = geometry.positions[ch][1];
            match tip_end {
                TipEnd::Min => unit_y - tip,
                TipEnd::Max => tip - unit_y,
            }
        })
        .collect();

    let labels: Vec<String> = distances
        .iter()
        .map(|d| {
            if *d <= roi_boundary_um {
                IN_ROI.to_string()
            } else {
                OUTSIDE_ROI.to_string()
            }
        })
        .collect();

    let mut labeled = metrics.clone();
    labeled.insert_column(DISTANCE_COLUMN, Column::Numeric(distances))?;
    labeled.insert_column(ROI_LABEL_COLUMN, Column::Text(labels))?;
    Ok(labeled)
}
