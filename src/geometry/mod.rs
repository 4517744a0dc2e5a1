//! Probe geometry
//!
//! Channel positions along the shank and the ROI labeler built on them.

pub mod labeler;
pub mod positions;

pub use labeler::{
    label_units, ChannelGeometry, TipEnd, DISTANCE_COLUMN, IN_ROI, OUTSIDE_ROI, ROI_LABEL_COLUMN,
};
pub use positions::{GeometrySource, KilosortGeometry, CHANNEL_POSITIONS_FILE};
