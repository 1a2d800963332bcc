use ndarray::{s, Array2};

use crate::core::polygon::RegionPolygon;
use crate::types::{
    ClassifBands, DispTile, DisparityDataset, FillError, FillResult, MaskImage, Overlap, Window,
    MASK_INVALID,
};

/// A neighbor tile relevant to a hole: its grid window, halo margins
/// and a copy of its (un-filled) input data.
#[derive(Debug, Clone)]
pub struct CorrespondingTile {
    pub window: Window,
    pub overlap: Overlap,
    pub data: DispTile,
}

/// Oversized working grid stitched from corresponding tiles, with the
/// global offset of its upper-left corner. Task-local: it is mutated
/// by the fill engine and discarded after cropping.
#[derive(Debug, Clone)]
pub struct CombinedWindow {
    pub disp: Array2<f32>,
    pub msk: MaskImage,
    pub classif: Option<ClassifBands>,
    pub row_min: usize,
    pub col_min: usize,
}

/// Subset of the merged hole polygons that geometrically intersect a
/// tile's window polygon.
pub fn get_corresponding_holes(
    tile_poly: &RegionPolygon,
    merged_holes: &[RegionPolygon],
) -> Vec<RegionPolygon> {
    merged_holes
        .iter()
        .filter(|hole| tile_poly.intersects(hole))
        .cloned()
        .collect()
}

/// All grid tiles whose window polygon intersects any of the given
/// holes, with data sourced from the ORIGINAL input disparity dataset
/// so that filling never reads the output of sibling tasks. Tiles with
/// empty slots (legitimate on the right side) are skipped.
pub fn get_corresponding_tiles(
    tile_polys: &Array2<RegionPolygon>,
    holes: &[RegionPolygon],
    dataset: &DisparityDataset,
) -> Vec<CorrespondingTile> {
    let mut tiles = Vec::new();
    if holes.is_empty() {
        return tiles;
    }
    let (n_rows, n_cols) = dataset.shape();
    for row in 0..n_rows {
        for col in 0..n_cols {
            let poly = &tile_polys[[row, col]];
            if !holes.iter().any(|hole| poly.intersects(hole)) {
                continue;
            }
            if let Some(data) = dataset.tile(row, col) {
                tiles.push(CorrespondingTile {
                    window: dataset.tiling_grid[[row, col]],
                    overlap: dataset.overlaps[[row, col]],
                    data: data.clone(),
                });
            }
        }
    }
    tiles
}

/// Recover the entry whose window matches `window` exactly. `None` is
/// a legal outcome: the right-side tile may be absent when right
/// filling is not required.
pub fn find_tile_dataset<'a>(
    tiles: &'a [CorrespondingTile],
    window: &Window,
) -> Option<&'a CorrespondingTile> {
    tiles.iter().find(|tile| tile.window == *window)
}

/// Stitch the corresponding tiles into one combined working grid
/// covering their bounding envelope. Overlapping halo regions are
/// written last-tile-wins; neighbor halos hold consistent data there.
pub fn reconstruct_data(tiles: &[CorrespondingTile]) -> FillResult<CombinedWindow> {
    if tiles.is_empty() {
        return Err(FillError::Processing(
            "Cannot reconstruct a combined window from zero tiles".to_string(),
        ));
    }

    let extents: Vec<Window> = tiles
        .iter()
        .map(|tile| tile.window.extended(&tile.overlap))
        .collect();
    let row_min = extents.iter().map(|w| w.row_min).min().unwrap_or(0);
    let row_max = extents.iter().map(|w| w.row_max).max().unwrap_or(0);
    let col_min = extents.iter().map(|w| w.col_min).min().unwrap_or(0);
    let col_max = extents.iter().map(|w| w.col_max).max().unwrap_or(0);
    let rows = row_max - row_min;
    let cols = col_max - col_min;
    log::debug!(
        "Reconstructing combined window {}x{} from {} tile(s) at offset ({}, {})",
        rows,
        cols,
        tiles.len(),
        row_min,
        col_min
    );

    let mut disp = Array2::from_elem((rows, cols), f32::NAN);
    let mut msk = Array2::from_elem((rows, cols), MASK_INVALID);

    // stitch classification only when every tile carries the same bands
    let classif_names: Option<Vec<String>> = tiles[0]
        .data
        .classif
        .as_ref()
        .map(|bands| bands.names().map(str::to_string).collect());
    let stitch_classif = classif_names.as_ref().map_or(false, |names| {
        tiles.iter().all(|tile| {
            tile.data
                .classif
                .as_ref()
                .map_or(false, |bands| names.iter().all(|n| bands.band(n).is_some()))
        })
    });
    let mut classif_layers: Vec<(String, Array2<bool>)> = if stitch_classif {
        classif_names
            .clone()
            .unwrap_or_default()
            .into_iter()
            .map(|name| (name, Array2::from_elem((rows, cols), false)))
            .collect()
    } else {
        Vec::new()
    };

    for (tile, extent) in tiles.iter().zip(extents.iter()) {
        let (tile_rows, tile_cols) = tile.data.shape();
        if tile_rows != extent.rows() || tile_cols != extent.cols() {
            return Err(FillError::UnsupportedLayout(format!(
                "Tile data {}x{} does not match its window+overlap extent {}x{}",
                tile_rows,
                tile_cols,
                extent.rows(),
                extent.cols()
            )));
        }
        let r_off = extent.row_min - row_min;
        let c_off = extent.col_min - col_min;
        disp.slice_mut(s![r_off..r_off + tile_rows, c_off..c_off + tile_cols])
            .assign(&tile.data.disp);
        msk.slice_mut(s![r_off..r_off + tile_rows, c_off..c_off + tile_cols])
            .assign(&tile.data.msk);
        if stitch_classif {
            if let Some(bands) = tile.data.classif.as_ref() {
                for (name, layer) in classif_layers.iter_mut() {
                    if let Some(band) = bands.band(name) {
                        layer
                            .slice_mut(s![r_off..r_off + tile_rows, c_off..c_off + tile_cols])
                            .assign(band);
                    }
                }
            }
        }
    }

    Ok(CombinedWindow {
        disp,
        msk,
        classif: if stitch_classif {
            Some(ClassifBands::new(classif_layers))
        } else {
            None
        },
        row_min,
        col_min,
    })
}

/// Extract from the (filled) combined window the sub-array matching
/// the target tile's own window+overlap extent. The original input
/// tile provides the shape reference and the untouched color bands.
pub fn crop_dataset(
    combined: &CombinedWindow,
    input_tile: &DispTile,
    window: &Window,
    overlap: &Overlap,
) -> FillResult<DispTile> {
    let target = window.extended(overlap);
    let (rows, cols) = combined.disp.dim();
    if target.row_min < combined.row_min
        || target.col_min < combined.col_min
        || target.row_max > combined.row_min + rows
        || target.col_max > combined.col_min + cols
    {
        return Err(FillError::Processing(format!(
            "Target window {:?} exceeds the combined window extent",
            target
        )));
    }
    let r0 = target.row_min - combined.row_min;
    let c0 = target.col_min - combined.col_min;
    let (t_rows, t_cols) = (target.rows(), target.cols());
    if input_tile.shape() != (t_rows, t_cols) {
        return Err(FillError::UnsupportedLayout(format!(
            "Input tile shape {:?} does not match the target extent {}x{}",
            input_tile.shape(),
            t_rows,
            t_cols
        )));
    }

    let disp = combined
        .disp
        .slice(s![r0..r0 + t_rows, c0..c0 + t_cols])
        .to_owned();
    let msk = combined
        .msk
        .slice(s![r0..r0 + t_rows, c0..c0 + t_cols])
        .to_owned();
    let classif = combined.classif.as_ref().map(|bands| {
        ClassifBands::new(
            bands
                .layers()
                .iter()
                .map(|(name, layer)| {
                    (
                        name.clone(),
                        layer.slice(s![r0..r0 + t_rows, c0..c0 + t_cols]).to_owned(),
                    )
                })
                .collect(),
        )
    });

    Ok(DispTile {
        disp,
        msk,
        classif,
        color: input_tile.color.clone(),
        color_bands: input_tile.color_bands.clone(),
        attributes: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TiledDataset, MASK_VALID};
    use ndarray::Array2;

    fn tile_with_value(window: Window, overlap: Overlap, value: f32) -> CorrespondingTile {
        let extent = window.extended(&overlap);
        let disp = Array2::from_elem((extent.rows(), extent.cols()), value);
        let msk = Array2::from_elem((extent.rows(), extent.cols()), MASK_VALID);
        CorrespondingTile {
            window,
            overlap,
            data: DispTile::new(disp, msk),
        }
    }

    #[test]
    fn test_reconstruct_envelope_and_offsets() {
        let t00 = tile_with_value(Window::new(0, 10, 0, 10), Overlap::new(0, 2, 0, 2), 1.0);
        let t01 = tile_with_value(Window::new(0, 10, 10, 20), Overlap::new(0, 2, 2, 0), 2.0);
        let combined = reconstruct_data(&[t00, t01]).unwrap();
        assert_eq!(combined.row_min, 0);
        assert_eq!(combined.col_min, 0);
        assert_eq!(combined.disp.dim(), (12, 20));
        // left of the halo boundary comes from tile (0,0)
        assert_eq!(combined.disp[[5, 5]], 1.0);
        // beyond both halos only tile (0,1) wrote data
        assert_eq!(combined.disp[[5, 15]], 2.0);
    }

    #[test]
    fn test_reconstruct_empty_fails() {
        assert!(reconstruct_data(&[]).is_err());
    }

    #[test]
    fn test_crop_round_trip_preserves_untouched_pixels() {
        let window = Window::new(10, 20, 10, 20);
        let overlap = Overlap::new(2, 2, 2, 2);
        let extent = window.extended(&overlap);
        let disp = Array2::from_shape_fn((extent.rows(), extent.cols()), |(r, c)| {
            (r * 100 + c) as f32
        });
        let msk = Array2::from_elem((extent.rows(), extent.cols()), MASK_VALID);
        let tile = CorrespondingTile {
            window,
            overlap,
            data: DispTile::new(disp.clone(), msk),
        };
        let neighbor = tile_with_value(Window::new(10, 20, 20, 30), Overlap::new(2, 2, 2, 2), 9.0);

        let combined = reconstruct_data(&[tile.clone(), neighbor]).unwrap();
        let cropped = crop_dataset(&combined, &tile.data, &window, &overlap).unwrap();
        assert_eq!(cropped.shape(), (extent.rows(), extent.cols()));
        for r in 0..extent.rows() {
            // the right halo columns were overwritten by the neighbor's
            // halo; everything the neighbor did not cover is unchanged
            for c in 0..extent.cols() - 4 {
                assert_eq!(cropped.disp[[r, c]], disp[[r, c]]);
            }
        }
    }

    #[test]
    fn test_find_tile_dataset_identity_lookup() {
        let window = Window::new(0, 5, 0, 5);
        let tiles = vec![tile_with_value(window, Overlap::default(), 3.0)];
        assert!(find_tile_dataset(&tiles, &window).is_some());
        assert!(find_tile_dataset(&tiles, &Window::new(0, 5, 5, 10)).is_none());
    }

    #[test]
    fn test_get_corresponding_tiles_spanning_hole() {
        let mut dataset: DisparityDataset = TiledDataset::regular_grid(10, 30, 10, 0);
        for col in 0..3 {
            let disp = Array2::zeros((10, 10));
            let msk = Array2::from_elem((10, 10), MASK_VALID);
            dataset.set_tile(0, col, DispTile::new(disp, msk));
        }
        let tile_polys = Array2::from_shape_fn(dataset.shape(), |(r, c)| {
            RegionPolygon::from_window(&dataset.tiling_grid[[r, c]])
        });
        // hole straddling the border between tiles 0 and 1
        let hole = RegionPolygon::new(vec![(2.0, 8.0), (2.0, 12.0), (6.0, 12.0), (6.0, 8.0)]);
        let tiles = get_corresponding_tiles(&tile_polys, &[hole], &dataset);
        assert_eq!(tiles.len(), 2);
        assert_eq!(tiles[0].window, Window::new(0, 10, 0, 10));
        assert_eq!(tiles[1].window, Window::new(0, 10, 10, 20));
    }

    #[test]
    fn test_get_corresponding_holes_filters() {
        let tile_poly = RegionPolygon::from_window(&Window::new(0, 10, 0, 10));
        let inside = RegionPolygon::new(vec![(1.0, 1.0), (1.0, 3.0), (3.0, 3.0), (3.0, 1.0)]);
        let outside = RegionPolygon::new(vec![
            (50.0, 50.0),
            (50.0, 53.0),
            (53.0, 53.0),
            (53.0, 50.0),
        ]);
        let holes = vec![inside, outside];
        let matched = get_corresponding_holes(&tile_poly, &holes);
        assert_eq!(matched.len(), 1);
    }
}
