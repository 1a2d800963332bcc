use std::collections::VecDeque;

use ndarray::Array2;

use crate::core::corresponding_tiles::CombinedWindow;
use crate::core::holes_detection::{binary_dilation, binary_erosion, label_regions};
use crate::core::polygon::RegionPolygon;
use crate::types::{MASK_FILLED, MASK_INVALID, MASK_VALID};

/// Interpolation scheme used for the border ring around each plane-
/// filled central area.
#[derive(Debug, Clone)]
pub struct InterpOptions {
    pub interp_type: Option<String>,
    pub method: Option<String>,
    pub smoothing_iterations: usize,
    pub max_search_distance: usize,
}

impl Default for InterpOptions {
    fn default() -> Self {
        Self {
            interp_type: Some("pandora".to_string()),
            method: Some("mc_cnn".to_string()),
            smoothing_iterations: 1,
            max_search_distance: 100,
        }
    }
}

/// Parameters of one plane-fill invocation.
#[derive(Debug, Clone)]
pub struct FillParams {
    /// Exclude seeds adjacent to no-data regions, to avoid fabricating
    /// values past real sensor coverage
    pub ignore_nodata_at_disp_mask_borders: bool,
    /// Exclude seeds holding the exact zero-fill placeholder
    pub ignore_zero_fill_disp_mask_values: bool,
    /// Exclude seeds saturated at the disparity search bounds
    pub ignore_extrema_disp_values: bool,
    /// Margin around each hole used to gather plane-fit context
    pub nb_pix: usize,
    /// Fraction of a hole's extent eroded off the plane-filled center
    pub percent_to_erode: f64,
    pub interp_options: InterpOptions,
    /// Classification band names gating which pixels are genuine holes
    pub classification: Vec<String>,
}

impl Default for FillParams {
    fn default() -> Self {
        Self {
            ignore_nodata_at_disp_mask_borders: true,
            ignore_zero_fill_disp_mask_values: true,
            ignore_extrema_disp_values: true,
            nb_pix: 20,
            percent_to_erode: 0.2,
            interp_options: InterpOptions::default(),
            classification: Vec::new(),
        }
    }
}

/// Fill the hole polygons of a combined working window in place.
///
/// The disparity and mask arrays of `combined` are mutated: hole
/// pixels within `max_search_distance` of a usable seed receive a
/// plane-fitted (central area) or nearest-seed interpolated (border
/// ring) value and their mask code becomes [`MASK_FILLED`]. Pixels
/// with no reachable seed are left as no-data; a hole with zero valid
/// surroundings is not an error.
pub fn fill_disp_using_plane(
    combined: &mut CombinedWindow,
    corresponding_polys: &[RegionPolygon],
    params: &FillParams,
) {
    let (rows, cols) = combined.disp.dim();
    if corresponding_polys.is_empty() {
        return;
    }

    let fill_mask = eligible_fill_mask(combined, corresponding_polys, params);
    let seed_mask = usable_seed_mask(combined, &fill_mask, params);

    let n_fill = fill_mask.iter().filter(|&&set| set).count();
    let n_seed = seed_mask.iter().filter(|&&set| set).count();
    log::debug!(
        "Plane fill ({}x{} window): {} candidate pixel(s), {} seed(s), interpolation {:?}/{:?}",
        rows,
        cols,
        n_fill,
        n_seed,
        params.interp_options.interp_type,
        params.interp_options.method
    );
    if n_fill == 0 {
        return;
    }

    // nearest usable seed value and hop distance, computed once
    let (distances, nearest) = nearest_seed_values(
        &combined.disp,
        &seed_mask,
        &fill_mask,
        params.interp_options.max_search_distance,
    );

    let (region_labels, n_regions) = label_regions(&fill_mask);
    let mut filled_mask = Array2::from_elem((rows, cols), false);
    let mut n_filled = 0usize;

    for region in 1..=n_regions {
        let region_mask = region_labels.mapv(|label| label == region);
        let (r0, r1, c0, c1) = match mask_bbox(&region_mask) {
            Some(bbox) => bbox,
            None => continue,
        };

        // shrink the plane-filled center away from uncertain edges
        let extent = (r1 - r0 + 1).min(c1 - c0 + 1);
        let erode_iters = (params.percent_to_erode * extent as f64 / 2.0).round() as usize;
        let central = binary_erosion(&region_mask, erode_iters);

        // plane fit over seeds gathered in the nb_pix-expanded context
        let ctx_r0 = r0.saturating_sub(params.nb_pix);
        let ctx_c0 = c0.saturating_sub(params.nb_pix);
        let ctx_r1 = (r1 + params.nb_pix).min(rows - 1);
        let ctx_c1 = (c1 + params.nb_pix).min(cols - 1);
        let plane = fit_plane(&combined.disp, &seed_mask, ctx_r0, ctx_r1, ctx_c0, ctx_c1);

        for r in r0..=r1 {
            for c in c0..=c1 {
                if !region_mask[[r, c]] || distances[[r, c]] == usize::MAX {
                    continue;
                }
                let value = if central[[r, c]] {
                    match plane {
                        Some((a, b, e)) => (a * r as f64 + b * c as f64 + e) as f32,
                        None => nearest[[r, c]],
                    }
                } else {
                    nearest[[r, c]]
                };
                combined.disp[[r, c]] = value;
                combined.msk[[r, c]] = MASK_FILLED;
                filled_mask[[r, c]] = true;
                n_filled += 1;
            }
        }
    }

    smooth_filled_pixels(
        &mut combined.disp,
        &filled_mask,
        &seed_mask,
        params.interp_options.smoothing_iterations,
    );

    log::info!(
        "Plane fill: {} of {} hole pixel(s) filled across {} region(s)",
        n_filled,
        n_fill,
        n_regions
    );
}

/// Pixels eligible for filling: inside a hole polygon and flagged as a
/// genuine hole, either by the gating classification bands or by the
/// validity mask.
fn eligible_fill_mask(
    combined: &CombinedWindow,
    polys: &[RegionPolygon],
    params: &FillParams,
) -> Array2<bool> {
    let (rows, cols) = combined.disp.dim();
    let mut poly_mask = Array2::from_elem((rows, cols), false);
    for poly in polys {
        let local = poly.translate(-(combined.row_min as f64), -(combined.col_min as f64));
        let raster = local.rasterize(0, 0, rows, cols);
        for (dst, src) in poly_mask.iter_mut().zip(raster.iter()) {
            *dst = *dst || *src;
        }
    }

    let gate = combined
        .classif
        .as_ref()
        .and_then(|bands| bands.union_of(&params.classification));
    match gate {
        Some(gate) => {
            for (dst, flagged) in poly_mask.iter_mut().zip(gate.iter()) {
                *dst = *dst && *flagged;
            }
        }
        None => {
            for (dst, code) in poly_mask.iter_mut().zip(combined.msk.iter()) {
                *dst = *dst && *code == MASK_INVALID;
            }
        }
    }
    poly_mask
}

/// Valid measured pixels trusted as fill seeds, after applying the
/// three ignore policies.
fn usable_seed_mask(
    combined: &CombinedWindow,
    fill_mask: &Array2<bool>,
    params: &FillParams,
) -> Array2<bool> {
    let (rows, cols) = combined.disp.dim();
    let mut seeds = Array2::from_shape_fn((rows, cols), |(r, c)| {
        combined.msk[[r, c]] == MASK_VALID
            && combined.disp[[r, c]].is_finite()
            && !fill_mask[[r, c]]
    });

    if params.ignore_zero_fill_disp_mask_values {
        for (seed, &disp) in seeds.iter_mut().zip(combined.disp.iter()) {
            if disp == 0.0 {
                *seed = false;
            }
        }
    }

    if params.ignore_extrema_disp_values {
        let mut dmin = f32::INFINITY;
        let mut dmax = f32::NEG_INFINITY;
        for (&seed, &disp) in seeds.iter().zip(combined.disp.iter()) {
            if seed {
                dmin = dmin.min(disp);
                dmax = dmax.max(disp);
            }
        }
        // a flat window has no saturated extrema to discard
        if dmax > dmin {
            for (seed, &disp) in seeds.iter_mut().zip(combined.disp.iter()) {
                if disp == dmin || disp == dmax {
                    *seed = false;
                }
            }
        }
    }

    if params.ignore_nodata_at_disp_mask_borders {
        let nodata =
            Array2::from_shape_fn((rows, cols), |(r, c)| !combined.disp[[r, c]].is_finite());
        let near_nodata = binary_dilation(&nodata, 1);
        for (seed, &near) in seeds.iter_mut().zip(near_nodata.iter()) {
            if near {
                *seed = false;
            }
        }
    }

    seeds
}

/// Multi-source BFS from the seed pixels through the fillable region.
/// Returns per-pixel hop distance (usize::MAX when unreachable within
/// `max_search_distance`) and the nearest seed's disparity value.
/// Distances propagate only through hole pixels, so a fill cannot
/// reach around no-data coverage.
fn nearest_seed_values(
    disp: &Array2<f32>,
    seed_mask: &Array2<bool>,
    fill_mask: &Array2<bool>,
    max_search_distance: usize,
) -> (Array2<usize>, Array2<f32>) {
    let (rows, cols) = seed_mask.dim();
    let mut distances = Array2::from_elem((rows, cols), usize::MAX);
    let mut nearest = Array2::from_elem((rows, cols), f32::NAN);
    let mut queue = VecDeque::new();
    for r in 0..rows {
        for c in 0..cols {
            if seed_mask[[r, c]] {
                distances[[r, c]] = 0;
                nearest[[r, c]] = disp[[r, c]];
                queue.push_back((r, c));
            }
        }
    }
    while let Some((r, c)) = queue.pop_front() {
        let dist = distances[[r, c]];
        if dist >= max_search_distance {
            continue;
        }
        for dr in -1i64..=1 {
            for dc in -1i64..=1 {
                let (nr, nc) = (r as i64 + dr, c as i64 + dc);
                if nr < 0 || nr >= rows as i64 || nc < 0 || nc >= cols as i64 {
                    continue;
                }
                let (nr, nc) = (nr as usize, nc as usize);
                // first visit is the shortest hop count
                if !fill_mask[[nr, nc]] || distances[[nr, nc]] != usize::MAX {
                    continue;
                }
                distances[[nr, nc]] = dist + 1;
                nearest[[nr, nc]] = nearest[[r, c]];
                queue.push_back((nr, nc));
            }
        }
    }
    (distances, nearest)
}

/// Bounding box of the set pixels as (row0, row1, col0, col1), inclusive.
fn mask_bbox(mask: &Array2<bool>) -> Option<(usize, usize, usize, usize)> {
    let mut bbox: Option<(usize, usize, usize, usize)> = None;
    for ((r, c), &set) in mask.indexed_iter() {
        if !set {
            continue;
        }
        bbox = Some(match bbox {
            None => (r, r, c, c),
            Some((r0, r1, c0, c1)) => (r0.min(r), r1.max(r), c0.min(c), c1.max(c)),
        });
    }
    bbox
}

/// Least-squares plane `d = a*row + b*col + e` over the seed pixels of
/// one context box. Falls back to the seed mean when fewer than three
/// seeds are available or the normal equations are singular; returns
/// `None` with zero seeds.
fn fit_plane(
    disp: &Array2<f32>,
    seed_mask: &Array2<bool>,
    r0: usize,
    r1: usize,
    c0: usize,
    c1: usize,
) -> Option<(f64, f64, f64)> {
    let mut n = 0.0f64;
    let (mut sr, mut sc, mut sd) = (0.0f64, 0.0f64, 0.0f64);
    let (mut srr, mut scc, mut src) = (0.0f64, 0.0f64, 0.0f64);
    let (mut srd, mut scd) = (0.0f64, 0.0f64);
    for r in r0..=r1 {
        for c in c0..=c1 {
            if !seed_mask[[r, c]] {
                continue;
            }
            let (rf, cf, df) = (r as f64, c as f64, disp[[r, c]] as f64);
            n += 1.0;
            sr += rf;
            sc += cf;
            sd += df;
            srr += rf * rf;
            scc += cf * cf;
            src += rf * cf;
            srd += rf * df;
            scd += cf * df;
        }
    }
    if n == 0.0 {
        return None;
    }
    if n < 3.0 {
        return Some((0.0, 0.0, sd / n));
    }
    match solve_3x3(
        [[srr, src, sr], [src, scc, sc], [sr, sc, n]],
        [srd, scd, sd],
    ) {
        Some([a, b, e]) => Some((a, b, e)),
        None => Some((0.0, 0.0, sd / n)),
    }
}

/// Gaussian elimination with partial pivoting.
fn solve_3x3(mut m: [[f64; 3]; 3], mut rhs: [f64; 3]) -> Option<[f64; 3]> {
    for col in 0..3 {
        let pivot = (col..3)
            .max_by(|&a, &b| {
                m[a][col]
                    .abs()
                    .partial_cmp(&m[b][col].abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(col);
        if m[pivot][col].abs() < 1e-9 {
            return None;
        }
        m.swap(col, pivot);
        rhs.swap(col, pivot);
        for row in col + 1..3 {
            let factor = m[row][col] / m[col][col];
            for k in col..3 {
                m[row][k] -= factor * m[col][k];
            }
            rhs[row] -= factor * rhs[col];
        }
    }
    let mut out = [0.0f64; 3];
    for col in (0..3).rev() {
        let mut acc = rhs[col];
        for k in col + 1..3 {
            acc -= m[col][k] * out[k];
        }
        out[col] = acc / m[col][col];
    }
    Some(out)
}

/// Iterative 3x3 mean smoothing over the filled pixels only, blending
/// them with their measured neighbors.
fn smooth_filled_pixels(
    disp: &mut Array2<f32>,
    filled_mask: &Array2<bool>,
    seed_mask: &Array2<bool>,
    iterations: usize,
) {
    let (rows, cols) = disp.dim();
    for _ in 0..iterations {
        let previous = disp.clone();
        for r in 0..rows {
            for c in 0..cols {
                if !filled_mask[[r, c]] {
                    continue;
                }
                let mut sum = 0.0f32;
                let mut count = 0usize;
                for dr in -1i64..=1 {
                    for dc in -1i64..=1 {
                        let (nr, nc) = (r as i64 + dr, c as i64 + dc);
                        if nr < 0 || nr >= rows as i64 || nc < 0 || nc >= cols as i64 {
                            continue;
                        }
                        let (nr, nc) = (nr as usize, nc as usize);
                        if filled_mask[[nr, nc]] || seed_mask[[nr, nc]] {
                            sum += previous[[nr, nc]];
                            count += 1;
                        }
                    }
                }
                if count > 0 {
                    disp[[r, c]] = sum / count as f32;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ClassifBands;
    use approx::assert_relative_eq;

    fn window_with_hole(
        rows: usize,
        cols: usize,
        hole: (usize, usize, usize, usize),
        seed_value: f32,
    ) -> (CombinedWindow, RegionPolygon) {
        let (hr0, hr1, hc0, hc1) = hole;
        let disp = Array2::from_shape_fn((rows, cols), |(r, c)| {
            if r >= hr0 && r < hr1 && c >= hc0 && c < hc1 {
                0.0
            } else {
                seed_value
            }
        });
        let msk = Array2::from_shape_fn((rows, cols), |(r, c)| {
            if r >= hr0 && r < hr1 && c >= hc0 && c < hc1 {
                MASK_INVALID
            } else {
                MASK_VALID
            }
        });
        let poly = RegionPolygon::new(vec![
            (hr0 as f64, hc0 as f64),
            (hr0 as f64, hc1 as f64),
            (hr1 as f64, hc1 as f64),
            (hr1 as f64, hc0 as f64),
        ]);
        (
            CombinedWindow {
                disp,
                msk,
                classif: None,
                row_min: 0,
                col_min: 0,
            },
            poly,
        )
    }

    #[test]
    fn test_fill_constant_hole_recovers_constant() {
        let (mut combined, poly) = window_with_hole(20, 20, (8, 13, 8, 13), 7.0);
        fill_disp_using_plane(&mut combined, &[poly], &FillParams::default());
        for r in 8..13 {
            for c in 8..13 {
                assert_eq!(combined.msk[[r, c]], MASK_FILLED);
                assert_relative_eq!(combined.disp[[r, c]], 7.0, epsilon = 1e-4);
            }
        }
        // measured pixels keep their code and value
        assert_eq!(combined.msk[[0, 0]], MASK_VALID);
        assert_relative_eq!(combined.disp[[0, 0]], 7.0);
    }

    #[test]
    fn test_pixels_beyond_search_distance_stay_invalid() {
        let (mut combined, poly) = window_with_hole(15, 40, (2, 13, 3, 37), 7.0);
        let params = FillParams {
            interp_options: InterpOptions {
                max_search_distance: 3,
                ..InterpOptions::default()
            },
            ..FillParams::default()
        };
        fill_disp_using_plane(&mut combined, &[poly], &params);
        // the middle of the wide hole is out of reach
        assert_eq!(combined.msk[[7, 20]], MASK_INVALID);
        // pixels adjacent to the seeds are filled
        assert_eq!(combined.msk[[7, 3]], MASK_FILLED);
        assert_relative_eq!(combined.disp[[7, 3]], 7.0, epsilon = 1e-4);
    }

    #[test]
    fn test_hole_without_seeds_is_left_alone() {
        let (mut combined, poly) = window_with_hole(10, 10, (2, 8, 2, 8), 7.0);
        combined.msk.fill(MASK_INVALID);
        combined.disp.fill(0.0);
        fill_disp_using_plane(&mut combined, &[poly], &FillParams::default());
        assert!(combined.msk.iter().all(|&code| code == MASK_INVALID));
    }

    #[test]
    fn test_classification_bands_gate_eligibility() {
        let (mut combined, poly) = window_with_hole(20, 20, (8, 13, 8, 13), 5.0);
        // only the top two hole rows are flagged as cloud
        let cloud = Array2::from_shape_fn((20, 20), |(r, c)| {
            r >= 8 && r < 10 && c >= 8 && c < 13
        });
        combined.classif = Some(ClassifBands::new(vec![("cloud".to_string(), cloud)]));
        let params = FillParams {
            classification: vec!["cloud".to_string()],
            ..FillParams::default()
        };
        fill_disp_using_plane(&mut combined, &[poly], &params);
        assert_eq!(combined.msk[[8, 10]], MASK_FILLED);
        // inside the polygon but outside the gating band
        assert_eq!(combined.msk[[12, 10]], MASK_INVALID);
    }

    #[test]
    fn test_fit_plane_recovers_tilted_plane() {
        let disp = Array2::from_shape_fn((10, 10), |(r, c)| (2.0 * r as f64 + 3.0 * c as f64 + 1.0) as f32);
        let seeds = Array2::from_elem((10, 10), true);
        let (a, b, e) = fit_plane(&disp, &seeds, 0, 9, 0, 9).unwrap();
        assert_relative_eq!(a, 2.0, epsilon = 1e-6);
        assert_relative_eq!(b, 3.0, epsilon = 1e-6);
        assert_relative_eq!(e, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_solve_3x3_identity() {
        let out = solve_3x3(
            [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            [4.0, 5.0, 6.0],
        )
        .unwrap();
        assert_relative_eq!(out[0], 4.0);
        assert_relative_eq!(out[1], 5.0);
        assert_relative_eq!(out[2], 6.0);
        assert!(solve_3x3(
            [[1.0, 1.0, 0.0], [2.0, 2.0, 0.0], [0.0, 0.0, 1.0]],
            [1.0, 2.0, 3.0]
        )
        .is_none());
    }
}
