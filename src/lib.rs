//! stereofill: Tiled Disparity Hole Filling for Stereo Pipelines
//!
//! This library reconstructs plausible disparity values inside masked
//! holes of tiled epipolar disparity maps (clouds, water, occlusions),
//! fitting a local plane per hole region and marking every estimated
//! pixel so downstream consumers can tell measured values from filled
//! ones.

pub mod core;
pub mod orchestrator;
pub mod types;

// Re-export main types and functions for easier access
pub use types::{
    ClassifBands, DispTile, DisparityDataset, FillError, FillResult, ImageDataset, ImageTile,
    Overlap, SavingInfo, TilePair, Window, MASK_FILLED, MASK_INVALID, MASK_VALID,
};

pub use core::{
    filling_from_config, localize_masked_areas, DisparityFilling, PlaneFill, PlaneFillConfig,
    RegionPolygon,
};

pub use orchestrator::{scheduler_from_mode, SequentialScheduler, TileScheduler};
