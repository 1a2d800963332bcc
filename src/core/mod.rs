//! Core disparity filling modules

pub mod corresponding_tiles;
pub mod fill_disp;
pub mod holes_detection;
pub mod plane;
pub mod polygon;

// Re-export main types
pub use corresponding_tiles::{CombinedWindow, CorrespondingTile};
pub use fill_disp::{FillParams, InterpOptions};
pub use holes_detection::localize_masked_areas;
pub use plane::{PlaneFill, PlaneFillConfig};
pub use polygon::{estimate_poly_with_disp, merge_intersecting_polygons, RegionPolygon};

use crate::orchestrator::TileScheduler;
use crate::types::{DisparityDataset, FillError, FillResult, ImageDataset};

/// Common interface of the disparity filling applications.
pub trait DisparityFilling {
    /// Registered name of the method, e.g. "plane".
    fn method_name(&self) -> &'static str;

    /// Margin to apply when extracting hole polygons upstream.
    fn poly_margin(&self) -> usize;

    /// Fill both sides of a tiled disparity pair, returning new datasets.
    #[allow(clippy::too_many_arguments)]
    fn run(
        &self,
        epipolar_disparity_map_left: &DisparityDataset,
        epipolar_disparity_map_right: &DisparityDataset,
        epipolar_images_left: &ImageDataset,
        holes_bbox_left: Option<&[RegionPolygon]>,
        holes_bbox_right: Option<&[RegionPolygon]>,
        disp_min: i32,
        disp_max: i32,
        scheduler: Option<&dyn TileScheduler>,
    ) -> FillResult<(DisparityDataset, DisparityDataset)>;
}

impl DisparityFilling for PlaneFill {
    fn method_name(&self) -> &'static str {
        "plane"
    }

    fn poly_margin(&self) -> usize {
        PlaneFill::poly_margin(self)
    }

    fn run(
        &self,
        epipolar_disparity_map_left: &DisparityDataset,
        epipolar_disparity_map_right: &DisparityDataset,
        epipolar_images_left: &ImageDataset,
        holes_bbox_left: Option<&[RegionPolygon]>,
        holes_bbox_right: Option<&[RegionPolygon]>,
        disp_min: i32,
        disp_max: i32,
        scheduler: Option<&dyn TileScheduler>,
    ) -> FillResult<(DisparityDataset, DisparityDataset)> {
        PlaneFill::run(
            self,
            epipolar_disparity_map_left,
            epipolar_disparity_map_right,
            epipolar_images_left,
            holes_bbox_left,
            holes_bbox_right,
            disp_min,
            disp_max,
            scheduler,
        )
    }
}

/// Instantiate a filling application from its JSON configuration,
/// dispatching on the "method" key ("plane" when absent).
pub fn filling_from_config(conf: &serde_json::Value) -> FillResult<Box<dyn DisparityFilling>> {
    let method = conf
        .get("method")
        .and_then(|v| v.as_str())
        .unwrap_or("plane");
    match method {
        "plane" => {
            let conf = PlaneFillConfig::from_json(conf)?;
            Ok(Box::new(PlaneFill::new(Some(conf))?))
        }
        other => Err(FillError::Configuration(format!(
            "No filling method named {} registered",
            other
        ))),
    }
}
