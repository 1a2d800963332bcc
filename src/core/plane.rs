use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::core::corresponding_tiles::{
    crop_dataset, find_tile_dataset, get_corresponding_holes, get_corresponding_tiles,
    reconstruct_data, CorrespondingTile,
};
use crate::core::fill_disp::{fill_disp_using_plane, FillParams, InterpOptions};
use crate::core::polygon::{estimate_poly_with_disp, merge_intersecting_polygons, RegionPolygon};
use crate::orchestrator::{SequentialScheduler, TileJob, TileScheduler};
use crate::types::{
    ColorImage, DispTile, DisparityDataset, FillError, FillResult, ImageDataset, ImageTile,
    Overlap, SavingInfo, TilePair, Window, MASK_INVALID,
};

fn default_method() -> String {
    "plane".to_string()
}
fn default_interpolation_type() -> Option<String> {
    Some("pandora".to_string())
}
fn default_interpolation_method() -> Option<String> {
    Some("mc_cnn".to_string())
}
fn default_max_search_distance() -> Option<usize> {
    Some(100)
}
fn default_smoothing_iterations() -> Option<usize> {
    Some(1)
}
fn default_true() -> bool {
    true
}
fn default_nb_pix() -> Option<usize> {
    Some(20)
}
fn default_percent_to_erode() -> Option<f64> {
    Some(0.2)
}

/// Validated configuration surface of the plane filling application.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlaneFillConfig {
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default = "default_interpolation_type")]
    pub interpolation_type: Option<String>,
    #[serde(default = "default_interpolation_method")]
    pub interpolation_method: Option<String>,
    #[serde(default = "default_max_search_distance")]
    pub max_search_distance: Option<usize>,
    #[serde(default = "default_smoothing_iterations")]
    pub smoothing_iterations: Option<usize>,
    #[serde(default = "default_true")]
    pub ignore_nodata_at_disp_mask_borders: bool,
    #[serde(default = "default_true")]
    pub ignore_zero_fill_disp_mask_values: bool,
    #[serde(default = "default_true")]
    pub ignore_extrema_disp_values: bool,
    #[serde(default = "default_nb_pix")]
    pub nb_pix: Option<usize>,
    #[serde(default = "default_percent_to_erode")]
    pub percent_to_erode: Option<f64>,
    /// `None` or an empty list disables the whole filling subsystem
    #[serde(default)]
    pub classification: Option<Vec<String>>,
    #[serde(default)]
    pub save_disparity_map: bool,
}

impl Default for PlaneFillConfig {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({}))
            .unwrap_or_else(|_| unreachable!("empty config always deserializes"))
    }
}

impl PlaneFillConfig {
    /// Parse and validate a JSON configuration fragment.
    pub fn from_json(value: &serde_json::Value) -> FillResult<Self> {
        let conf: Self = serde_json::from_value(value.clone())?;
        conf.validate()?;
        Ok(conf)
    }

    /// Fail fast on out-of-range values before any tile work starts.
    pub fn validate(&self) -> FillResult<()> {
        if self.method != "plane" {
            return Err(FillError::Configuration(format!(
                "No filling method named {} registered",
                self.method
            )));
        }
        if let Some(percent) = self.percent_to_erode {
            if !(0.0..=1.0).contains(&percent) {
                return Err(FillError::Configuration(format!(
                    "percent_to_erode must lie in [0, 1], got {}",
                    percent
                )));
            }
        }
        if self.max_search_distance == Some(0) {
            return Err(FillError::Configuration(
                "max_search_distance must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Fill invalid areas of tiled disparity maps using the plane method.
pub struct PlaneFill {
    interpolation_type: Option<String>,
    interpolation_method: Option<String>,
    max_search_distance: usize,
    smoothing_iterations: usize,
    ignore_nodata_at_disp_mask_borders: bool,
    ignore_zero_fill_disp_mask_values: bool,
    ignore_extrema_disp_values: bool,
    nb_pix: usize,
    percent_to_erode: f64,
    classification: Option<Vec<String>>,
    save_disparity_map: bool,
}

impl PlaneFill {
    pub fn new(conf: Option<PlaneFillConfig>) -> FillResult<Self> {
        let conf = conf.unwrap_or_default();
        conf.validate()?;
        Ok(Self {
            interpolation_type: conf.interpolation_type,
            interpolation_method: conf.interpolation_method,
            max_search_distance: conf.max_search_distance.unwrap_or(100),
            smoothing_iterations: conf.smoothing_iterations.unwrap_or(1),
            ignore_nodata_at_disp_mask_borders: conf.ignore_nodata_at_disp_mask_borders,
            ignore_zero_fill_disp_mask_values: conf.ignore_zero_fill_disp_mask_values,
            ignore_extrema_disp_values: conf.ignore_extrema_disp_values,
            nb_pix: conf.nb_pix.unwrap_or(20),
            percent_to_erode: conf.percent_to_erode.unwrap_or(0.2),
            classification: conf.classification,
            save_disparity_map: conf.save_disparity_map,
        })
    }

    /// Margin used when extracting hole polygons, so the fill later
    /// finds enough surrounding disparity context.
    pub fn poly_margin(&self) -> usize {
        self.nb_pix
    }

    fn fill_params(&self) -> FillParams {
        FillParams {
            ignore_nodata_at_disp_mask_borders: self.ignore_nodata_at_disp_mask_borders,
            ignore_zero_fill_disp_mask_values: self.ignore_zero_fill_disp_mask_values,
            ignore_extrema_disp_values: self.ignore_extrema_disp_values,
            nb_pix: self.nb_pix,
            percent_to_erode: self.percent_to_erode,
            interp_options: InterpOptions {
                interp_type: self.interpolation_type.clone(),
                method: self.interpolation_method.clone(),
                smoothing_iterations: self.smoothing_iterations,
                max_search_distance: self.max_search_distance,
            },
            classification: self.classification.clone().unwrap_or_default(),
        }
    }

    /// Run the filling application over a tiled stereo pair.
    ///
    /// Returns new left and right disparity datasets; input datasets
    /// are never mutated. When the classification filter is disabled
    /// the inputs pass through unchanged and no tile task is created.
    #[allow(clippy::too_many_arguments)]
    pub fn run(
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
        let (holes_left, holes_right) = match (holes_bbox_left, holes_bbox_right) {
            (Some(left), Some(right)) => (left, right),
            _ => {
                return Err(FillError::MissingInput(
                    "Disparity holes bbox are inconsistent".to_string(),
                ))
            }
        };

        // global bypass: an empty classification filter disables the
        // whole subsystem, not individual tiles
        if self.classification.as_ref().map_or(true, |c| c.is_empty()) {
            log::info!("Disparity holes filling was not activated");
            return Ok((
                epipolar_disparity_map_left.clone(),
                epipolar_disparity_map_right.clone(),
            ));
        }

        if epipolar_disparity_map_left.shape() != epipolar_disparity_map_right.shape() {
            log::error!("Plane filling does not support mismatched tiling grids");
            return Err(FillError::UnsupportedLayout(
                "Left and right disparity datasets must share one tiling grid".to_string(),
            ));
        }

        let default_scheduler = SequentialScheduler;
        let scheduler = scheduler.unwrap_or(&default_scheduler);

        let (n_rows, n_cols) = epipolar_disparity_map_left.shape();
        log::info!(
            "Fill missing disparity with plane model: number of tiles: {}",
            n_rows * n_cols
        );

        // estimate right holes on the left view and vice versa using the
        // disparity range, then merge everything per side
        let holes_right_on_left: Vec<RegionPolygon> = holes_right
            .iter()
            .map(|p| estimate_poly_with_disp(p, -disp_max as f64, -disp_min as f64))
            .collect();
        let holes_left_on_right: Vec<RegionPolygon> = holes_left
            .iter()
            .map(|p| estimate_poly_with_disp(p, disp_min as f64, disp_max as f64))
            .collect();
        let merged_left = merge_intersecting_polygons(
            holes_left.iter().cloned().chain(holes_right_on_left).collect(),
        );
        let merged_right = merge_intersecting_polygons(
            holes_right.iter().cloned().chain(holes_left_on_right).collect(),
        );
        log::info!(
            "Disparity filling: {} hole(s) on left to fill, {} on right",
            merged_left.len(),
            merged_right.len()
        );

        let tile_polys = Array2::from_shape_fn((n_rows, n_cols), |(row, col)| {
            RegionPolygon::from_window(&epipolar_disparity_map_left.tiling_grid[[row, col]])
        });

        let saving_info_left = SavingInfo::new("disparity_left", self.save_disparity_map);
        let saving_info_right = SavingInfo::new("disparity_right", self.save_disparity_map);

        let mut jobs: Vec<TileJob> = Vec::with_capacity(n_rows * n_cols);
        let mut slots: Vec<(usize, usize)> = Vec::with_capacity(n_rows * n_cols);
        for row in 0..n_rows {
            for col in 0..n_cols {
                let tile_poly = &tile_polys[[row, col]];
                let corresponding_holes_left = get_corresponding_holes(tile_poly, &merged_left);
                let corresponding_holes_right = get_corresponding_holes(tile_poly, &merged_right);
                // always read neighbor data from the un-filled inputs so
                // sibling tasks stay order-independent
                let corresponding_tiles_left = get_corresponding_tiles(
                    &tile_polys,
                    &corresponding_holes_left,
                    epipolar_disparity_map_left,
                );
                let corresponding_tiles_right = get_corresponding_tiles(
                    &tile_polys,
                    &corresponding_holes_right,
                    epipolar_disparity_map_right,
                );

                let window = epipolar_disparity_map_left.tiling_grid[[row, col]];
                let overlap_left = epipolar_disparity_map_left.overlaps[[row, col]];
                let overlap_right = epipolar_disparity_map_right.overlaps[[row, col]];
                let info_left = saving_info_left.at_tile(row, col);
                let info_right = saving_info_right.at_tile(row, col);
                slots.push((row, col));

                if corresponding_tiles_left.len() + corresponding_tiles_right.len() == 0 {
                    let left_tile = epipolar_disparity_map_left.tile(row, col).cloned();
                    let right_tile = epipolar_disparity_map_right.tile(row, col).cloned();
                    jobs.push(Box::new(move || {
                        wrapper_copy_disparity(
                            left_tile,
                            right_tile,
                            window,
                            overlap_left,
                            overlap_right,
                            info_left,
                            info_right,
                        )
                    }));
                } else {
                    let input_left = epipolar_disparity_map_left.tile(row, col).cloned();
                    let input_right = epipolar_disparity_map_right.tile(row, col).cloned();
                    let left_epi_image = epipolar_images_left.tile(row, col).cloned();
                    let params = self.fill_params();
                    jobs.push(Box::new(move || {
                        wrapper_fill_disparity(
                            corresponding_tiles_left,
                            corresponding_tiles_right,
                            corresponding_holes_left,
                            corresponding_holes_right,
                            input_left,
                            input_right,
                            window,
                            overlap_left,
                            overlap_right,
                            left_epi_image,
                            params,
                            info_left,
                            info_right,
                        )
                    }));
                }
            }
        }

        let results = scheduler.run_tiles(jobs);
        let mut new_left: DisparityDataset = DisparityDataset::new(
            epipolar_disparity_map_left.tiling_grid.clone(),
            epipolar_disparity_map_left.overlaps.clone(),
        );
        let mut new_right: DisparityDataset = DisparityDataset::new(
            epipolar_disparity_map_right.tiling_grid.clone(),
            epipolar_disparity_map_right.overlaps.clone(),
        );
        for ((row, col), result) in slots.into_iter().zip(results) {
            let (left_tile, right_tile) = result?;
            if let Some(tile) = left_tile {
                new_left.set_tile(row, col, tile);
            }
            if let Some(tile) = right_tile {
                new_right.set_tile(row, col, tile);
            }
        }
        Ok((new_left, new_right))
    }
}

/// Fill the holes of one tile pair: reconstruct the oversized working
/// windows from the corresponding tiles, fill them in place, crop back
/// to the tile's own extent and stamp provenance. A side whose holes
/// do not reach this tile falls back to copying its input data through
/// unchanged, so the tile always emits whatever it received; after a
/// right fill the right color is recomputed from the left epipolar
/// image.
#[allow(clippy::too_many_arguments)]
pub fn wrapper_fill_disparity(
    corresponding_tiles_left: Vec<CorrespondingTile>,
    corresponding_tiles_right: Vec<CorrespondingTile>,
    corresponding_poly_left: Vec<RegionPolygon>,
    corresponding_poly_right: Vec<RegionPolygon>,
    input_left: Option<DispTile>,
    input_right: Option<DispTile>,
    window: Window,
    overlap_left: Overlap,
    overlap_right: Overlap,
    left_epi_image: Option<ImageTile>,
    params: FillParams,
    saving_info_left: SavingInfo,
    saving_info_right: SavingInfo,
) -> FillResult<TilePair> {
    let mut cropped_disp_left = None;
    if let Some(matched_left) = find_tile_dataset(&corresponding_tiles_left, &window) {
        let mut combined = reconstruct_data(&corresponding_tiles_left)?;
        fill_disp_using_plane(&mut combined, &corresponding_poly_left, &params);
        let mut cropped = crop_dataset(&combined, &matched_left.data, &window, &overlap_left)?;
        cropped.stamp_attributes(window, overlap_left, saving_info_left);
        cropped_disp_left = Some(cropped);
    } else if let Some(mut tile) = input_left {
        // only the other side of this tile is concerned by the holes;
        // the tile's own data still has to reach the output
        tile.stamp_attributes(window, overlap_left, saving_info_left);
        cropped_disp_left = Some(tile);
    }

    let mut cropped_disp_right = None;
    if let Some(matched_right) = find_tile_dataset(&corresponding_tiles_right, &window) {
        let mut combined = reconstruct_data(&corresponding_tiles_right)?;
        fill_disp_using_plane(&mut combined, &corresponding_poly_right, &params);
        let mut cropped = crop_dataset(&combined, &matched_right.data, &window, &overlap_right)?;
        if let Some(epi) = left_epi_image.as_ref() {
            cropped.color = Some(estimate_color_from_disparity(&cropped, epi));
            cropped.color_bands = Some(epi.color_bands.clone());
        }
        cropped.stamp_attributes(window, overlap_right, saving_info_right);
        cropped_disp_right = Some(cropped);
    } else if let Some(mut tile) = input_right {
        tile.stamp_attributes(window, overlap_right, saving_info_right);
        cropped_disp_right = Some(tile);
    }

    Ok((cropped_disp_left, cropped_disp_right))
}

/// Pass a tile pair through unchanged, only stamping provenance.
pub fn wrapper_copy_disparity(
    left_disp: Option<DispTile>,
    right_disp: Option<DispTile>,
    window: Window,
    overlap_left: Overlap,
    overlap_right: Overlap,
    saving_info_left: SavingInfo,
    saving_info_right: SavingInfo,
) -> FillResult<TilePair> {
    let mut left_disp = left_disp;
    let mut right_disp = right_disp;
    if let Some(tile) = left_disp.as_mut() {
        tile.stamp_attributes(window, overlap_left, saving_info_left);
    }
    if let Some(tile) = right_disp.as_mut() {
        tile.stamp_attributes(window, overlap_right, saving_info_right);
    }
    Ok((left_disp, right_disp))
}

/// Recompute a right tile's color bands by sampling the left epipolar
/// image through the right disparity map: each valid right pixel reads
/// the left color at `col + disp` (nearest neighbor). Pixels without a
/// usable disparity, or whose source falls outside the image, get NaN.
pub fn estimate_color_from_disparity(disp_tile: &DispTile, left_image: &ImageTile) -> ColorImage {
    let (rows, cols) = disp_tile.shape();
    let (bands, img_rows, img_cols) = left_image.color.dim();
    let mut color = ColorImage::from_elem((bands, rows, cols), f32::NAN);
    for r in 0..rows {
        for c in 0..cols {
            if disp_tile.msk[[r, c]] == MASK_INVALID || r >= img_rows {
                continue;
            }
            let disp = disp_tile.disp[[r, c]];
            if !disp.is_finite() {
                continue;
            }
            let src_col = (c as f32 + disp).round();
            if src_col < 0.0 || src_col >= img_cols as f32 {
                continue;
            }
            for b in 0..bands {
                color[[b, r, c]] = left_image.color[[b, r, src_col as usize]];
            }
        }
    }
    color
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MASK_FILLED, MASK_VALID};
    use ndarray::Array3;

    #[test]
    fn test_config_defaults() {
        let conf = PlaneFillConfig::from_json(&serde_json::json!({})).unwrap();
        assert_eq!(conf.method, "plane");
        assert_eq!(conf.interpolation_type.as_deref(), Some("pandora"));
        assert_eq!(conf.interpolation_method.as_deref(), Some("mc_cnn"));
        assert_eq!(conf.max_search_distance, Some(100));
        assert_eq!(conf.smoothing_iterations, Some(1));
        assert!(conf.ignore_nodata_at_disp_mask_borders);
        assert!(conf.ignore_zero_fill_disp_mask_values);
        assert!(conf.ignore_extrema_disp_values);
        assert_eq!(conf.nb_pix, Some(20));
        assert_eq!(conf.percent_to_erode, Some(0.2));
        assert!(conf.classification.is_none());
        assert!(!conf.save_disparity_map);
    }

    #[test]
    fn test_config_rejects_bad_values() {
        assert!(PlaneFillConfig::from_json(&serde_json::json!({"method": "poisson"})).is_err());
        assert!(
            PlaneFillConfig::from_json(&serde_json::json!({"percent_to_erode": 1.5})).is_err()
        );
        assert!(
            PlaneFillConfig::from_json(&serde_json::json!({"max_search_distance": 0})).is_err()
        );
        // schema check: unknown keys are rejected
        assert!(PlaneFillConfig::from_json(&serde_json::json!({"nb_pixels": 3})).is_err());
    }

    #[test]
    fn test_copy_wrapper_stamps_provenance() {
        let disp = Array2::zeros((4, 4));
        let msk = Array2::from_elem((4, 4), MASK_VALID);
        let tile = DispTile::new(disp, msk);
        let window = Window::new(0, 4, 0, 4);
        let info = SavingInfo::new("disparity_left", true).at_tile(2, 3);
        let (left, right) = wrapper_copy_disparity(
            Some(tile),
            None,
            window,
            Overlap::default(),
            Overlap::default(),
            info,
            SavingInfo::new("disparity_right", true).at_tile(2, 3),
        )
        .unwrap();
        assert!(right.is_none());
        let attrs = left.unwrap().attributes.unwrap();
        assert_eq!(attrs.window, window);
        assert_eq!(attrs.saving_info.row, 2);
        assert_eq!(attrs.saving_info.col, 3);
        assert!(attrs.saving_info.save_disparity_map);
        assert!(!attrs.saving_info.produced_at.is_empty());
    }

    #[test]
    fn test_estimate_color_samples_through_disparity() {
        let mut disp = Array2::from_elem((2, 4), 1.0f32);
        disp[[0, 3]] = 10.0; // falls outside the image
        let mut msk = Array2::from_elem((2, 4), MASK_VALID);
        msk[[1, 0]] = MASK_INVALID;
        let tile = DispTile::new(disp, msk);
        let color = Array3::from_shape_fn((1, 2, 4), |(_, r, c)| (r * 10 + c) as f32);
        let image = ImageTile {
            color,
            color_bands: vec!["gray".to_string()],
        };
        let out = estimate_color_from_disparity(&tile, &image);
        // (0, 0) samples left color at col 0 + 1
        assert_eq!(out[[0, 0, 0]], 1.0);
        assert!(out[[0, 0, 3]].is_nan());
        assert!(out[[0, 1, 0]].is_nan());
    }

    #[test]
    fn test_estimate_color_skips_rows_outside_image() {
        let disp = Array2::from_elem((3, 4), 0.0f32);
        let msk = Array2::from_elem((3, 4), MASK_VALID);
        let mut tile = DispTile::new(disp, msk);
        tile.disp.fill(1.0);
        // the image covers only the first row of the disparity tile
        let image = ImageTile {
            color: Array3::from_elem((1, 1, 4), 2.0),
            color_bands: vec!["gray".to_string()],
        };
        let out = estimate_color_from_disparity(&tile, &image);
        assert_eq!(out[[0, 0, 0]], 2.0);
        assert!(out[[0, 1, 0]].is_nan());
        assert!(out[[0, 2, 3]].is_nan());

        // a zero-row image yields no color at all
        let empty = ImageTile {
            color: Array3::from_elem((1, 0, 4), 0.0),
            color_bands: vec!["gray".to_string()],
        };
        let out = estimate_color_from_disparity(&tile, &empty);
        assert!(out.iter().all(|value| value.is_nan()));
    }

    #[test]
    fn test_filled_mask_code_is_distinct() {
        assert_ne!(MASK_FILLED, MASK_VALID);
        assert_ne!(MASK_FILLED, MASK_INVALID);
    }
}
