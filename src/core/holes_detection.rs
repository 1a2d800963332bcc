use ndarray::Array2;

use crate::core::polygon::{trace_exterior_ring, RegionPolygon};

/// Binarize a classification raster: a pixel is set when its class
/// code matches any of the requested codes.
pub fn get_msk_roi_to_fill(msk_values: &Array2<u16>, key_id: &[u16]) -> Array2<bool> {
    msk_values.mapv(|value| key_id.iter().any(|&key| value == key))
}

/// Binary dilation with 8-connectivity (diagonal-touching pixels
/// count as connected), repeated `iterations` times.
pub fn binary_dilation(mask: &Array2<bool>, iterations: usize) -> Array2<bool> {
    let (rows, cols) = mask.dim();
    let mut current = mask.clone();
    for _ in 0..iterations {
        let mut dilated = current.clone();
        for r in 0..rows {
            for c in 0..cols {
                if current[[r, c]] {
                    continue;
                }
                'neighbors: for dr in -1i64..=1 {
                    for dc in -1i64..=1 {
                        let (nr, nc) = (r as i64 + dr, c as i64 + dc);
                        if nr >= 0
                            && nr < rows as i64
                            && nc >= 0
                            && nc < cols as i64
                            && current[[nr as usize, nc as usize]]
                        {
                            dilated[[r, c]] = true;
                            break 'neighbors;
                        }
                    }
                }
            }
        }
        current = dilated;
    }
    current
}

/// Binary erosion with 8-connectivity; pixels beyond the array edge
/// count as background, so the selection shrinks at the borders too.
pub fn binary_erosion(mask: &Array2<bool>, iterations: usize) -> Array2<bool> {
    let (rows, cols) = mask.dim();
    let mut current = mask.clone();
    for _ in 0..iterations {
        let mut eroded = current.clone();
        for r in 0..rows {
            for c in 0..cols {
                if !current[[r, c]] {
                    continue;
                }
                'neighbors: for dr in -1i64..=1 {
                    for dc in -1i64..=1 {
                        let (nr, nc) = (r as i64 + dr, c as i64 + dc);
                        let outside = nr < 0 || nr >= rows as i64 || nc < 0 || nc >= cols as i64;
                        if outside || !current[[nr as usize, nc as usize]] {
                            eroded[[r, c]] = false;
                            break 'neighbors;
                        }
                    }
                }
            }
        }
        current = eroded;
    }
    current
}

/// Label connected components with 8-connectivity. Returns the label
/// array (0 is background) and the number of components found.
pub fn label_regions(mask: &Array2<bool>) -> (Array2<u32>, u32) {
    let (rows, cols) = mask.dim();
    let mut labels = Array2::zeros((rows, cols));
    let mut next_label = 0u32;
    let mut stack = Vec::new();
    for r in 0..rows {
        for c in 0..cols {
            if !mask[[r, c]] || labels[[r, c]] != 0 {
                continue;
            }
            next_label += 1;
            labels[[r, c]] = next_label;
            stack.push((r, c));
            while let Some((sr, sc)) = stack.pop() {
                for dr in -1i64..=1 {
                    for dc in -1i64..=1 {
                        let (nr, nc) = (sr as i64 + dr, sc as i64 + dc);
                        if nr < 0 || nr >= rows as i64 || nc < 0 || nc >= cols as i64 {
                            continue;
                        }
                        let (nr, nc) = (nr as usize, nc as usize);
                        if mask[[nr, nc]] && labels[[nr, nc]] == 0 {
                            labels[[nr, nc]] = next_label;
                            stack.push((nr, nc));
                        }
                    }
                }
            }
        }
    }
    (labels, next_label)
}

/// Convert the coverage of a binary mask into closed polygons, one per
/// connected component, optionally dilated by `margin` iterations so
/// regions at a tile border keep enough surrounding disparity for the
/// later fill. Vertices are shifted into the global frame by the
/// given offsets. An all-false mask yields an empty list.
pub fn get_roi_coverage_as_poly_with_margins(
    msk_values: &Array2<bool>,
    row_offset: i64,
    col_offset: i64,
    margin: usize,
) -> Vec<RegionPolygon> {
    if msk_values.iter().all(|&set| !set) {
        return Vec::new();
    }
    let dilated = if margin > 0 {
        binary_dilation(msk_values, margin)
    } else {
        msk_values.clone()
    };
    let (labels, count) = label_regions(&dilated);
    let mut polygons = Vec::with_capacity(count as usize);
    for region in 1..=count {
        let component = labels.mapv(|label| label == region);
        if let Some(ring) = trace_exterior_ring(&component) {
            polygons.push(RegionPolygon::new(ring).translate(row_offset as f64, col_offset as f64));
        }
    }
    log::debug!(
        "Extracted {} hole polygon(s) from mask (margin: {} px)",
        polygons.len(),
        margin
    );
    polygons
}

/// Localize masked areas of one epipolar tile as global-frame polygons.
/// The mask layer is binarized against the configured class codes, then
/// each connected region's coverage becomes a polygon.
pub fn localize_masked_areas(
    msk_values: &Array2<u16>,
    key_id: &[u16],
    row_offset: i64,
    col_offset: i64,
    margin: usize,
) -> Vec<RegionPolygon> {
    let binary = get_msk_roi_to_fill(msk_values, key_id);
    get_roi_coverage_as_poly_with_margins(&binary, row_offset, col_offset, margin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_msk_roi_multiple_classes_or() {
        let msk = Array2::from_shape_vec((2, 3), vec![0u16, 1, 2, 3, 1, 0]).unwrap();
        let binary = get_msk_roi_to_fill(&msk, &[1, 3]);
        let expected = [false, true, false, true, true, false];
        for (value, want) in binary.iter().zip(expected.iter()) {
            assert_eq!(value, want);
        }
    }

    #[test]
    fn test_empty_mask_yields_no_polygons() {
        let msk = Array2::from_elem((8, 8), false);
        assert!(get_roi_coverage_as_poly_with_margins(&msk, 0, 0, 2).is_empty());
    }

    #[test]
    fn test_single_component_area() {
        let mut msk = Array2::from_elem((10, 10), false);
        for r in 2..5 {
            for c in 3..7 {
                msk[[r, c]] = true;
            }
        }
        let polys = get_roi_coverage_as_poly_with_margins(&msk, 0, 0, 0);
        assert_eq!(polys.len(), 1);
        assert_relative_eq!(polys[0].area(), 12.0);
    }

    #[test]
    fn test_dilation_never_decreases_area() {
        let mut msk = Array2::from_elem((12, 12), false);
        msk[[6, 6]] = true;
        let base = get_roi_coverage_as_poly_with_margins(&msk, 0, 0, 0);
        let mut previous = base[0].area();
        for margin in 1..4 {
            let dilated = get_roi_coverage_as_poly_with_margins(&msk, 0, 0, margin);
            assert_eq!(dilated.len(), 1);
            assert!(dilated[0].area() >= previous);
            previous = dilated[0].area();
        }
        // one 8-connectivity dilation of a point covers a 3x3 square
        let one = get_roi_coverage_as_poly_with_margins(&msk, 0, 0, 1);
        assert_relative_eq!(one[0].area(), 9.0);
    }

    #[test]
    fn test_diagonal_pixels_are_one_component() {
        let mut msk = Array2::from_elem((4, 4), false);
        msk[[1, 1]] = true;
        msk[[2, 2]] = true;
        let (_, count) = label_regions(&msk);
        assert_eq!(count, 1);
    }

    #[test]
    fn test_offset_translates_polygons() {
        let mut msk = Array2::from_elem((5, 5), false);
        msk[[0, 0]] = true;
        let polys = get_roi_coverage_as_poly_with_margins(&msk, 100, 200, 0);
        let (r0, r1, c0, c1) = polys[0].bounding_box();
        assert_relative_eq!(r0, 100.0);
        assert_relative_eq!(r1, 101.0);
        assert_relative_eq!(c0, 200.0);
        assert_relative_eq!(c1, 201.0);
    }

    #[test]
    fn test_erosion_shrinks_and_vanishes() {
        let mut msk = Array2::from_elem((8, 8), false);
        for r in 2..6 {
            for c in 2..6 {
                msk[[r, c]] = true;
            }
        }
        let eroded = binary_erosion(&msk, 1);
        assert_eq!(eroded.iter().filter(|&&set| set).count(), 4);
        let gone = binary_erosion(&msk, 2);
        assert_eq!(gone.iter().filter(|&&set| set).count(), 0);
    }

    #[test]
    fn test_localize_masked_areas_end_to_end() {
        let mut msk = Array2::zeros((6, 6));
        msk[[2, 2]] = 5u16;
        msk[[2, 3]] = 7u16;
        let polys = localize_masked_areas(&msk, &[5, 7], 10, 0, 0);
        assert_eq!(polys.len(), 1);
        assert_relative_eq!(polys[0].area(), 2.0);
    }
}
