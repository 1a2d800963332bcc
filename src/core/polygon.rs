use std::collections::BTreeMap;

use ndarray::Array2;

use crate::types::Window;

/// Closed planar polygon in the global pixel frame.
/// Vertices are (row, col) pairs and the ring is closed
/// (first vertex == last vertex).
#[derive(Debug, Clone, PartialEq)]
pub struct RegionPolygon {
    ring: Vec<(f64, f64)>,
}

impl RegionPolygon {
    /// Build a polygon from a vertex ring, closing it if needed.
    pub fn new(mut ring: Vec<(f64, f64)>) -> Self {
        if let (Some(&first), Some(&last)) = (ring.first(), ring.last()) {
            if first != last {
                ring.push(first);
            }
        }
        Self { ring }
    }

    /// Axis-aligned rectangle polygon covering a tile window.
    pub fn from_window(window: &Window) -> Self {
        let (r0, r1) = (window.row_min as f64, window.row_max as f64);
        let (c0, c1) = (window.col_min as f64, window.col_max as f64);
        Self::new(vec![(r0, c0), (r0, c1), (r1, c1), (r1, c0), (r0, c0)])
    }

    /// Closed vertex ring, (row, col) ordered.
    pub fn ring(&self) -> &[(f64, f64)] {
        &self.ring
    }

    /// Translate every vertex by (d_row, d_col).
    pub fn translate(&self, d_row: f64, d_col: f64) -> Self {
        Self {
            ring: self
                .ring
                .iter()
                .map(|&(r, c)| (r + d_row, c + d_col))
                .collect(),
        }
    }

    /// Enclosed area via the shoelace formula.
    pub fn area(&self) -> f64 {
        let n = self.ring.len();
        if n < 4 {
            return 0.0;
        }
        let mut acc = 0.0;
        for i in 0..n - 1 {
            let (r0, c0) = self.ring[i];
            let (r1, c1) = self.ring[i + 1];
            acc += c0 * r1 - c1 * r0;
        }
        acc.abs() / 2.0
    }

    /// Bounding box as (row_min, row_max, col_min, col_max).
    pub fn bounding_box(&self) -> (f64, f64, f64, f64) {
        let mut row_min = f64::INFINITY;
        let mut row_max = f64::NEG_INFINITY;
        let mut col_min = f64::INFINITY;
        let mut col_max = f64::NEG_INFINITY;
        for &(r, c) in &self.ring {
            row_min = row_min.min(r);
            row_max = row_max.max(r);
            col_min = col_min.min(c);
            col_max = col_max.max(c);
        }
        (row_min, row_max, col_min, col_max)
    }

    /// Even-odd point-in-polygon test.
    pub fn contains_point(&self, row: f64, col: f64) -> bool {
        let n = self.ring.len().saturating_sub(1);
        if n < 3 {
            return false;
        }
        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let (ri, ci) = self.ring[i];
            let (rj, cj) = self.ring[j];
            if (ri > row) != (rj > row) && col < (cj - ci) * (row - ri) / (rj - ri) + ci {
                inside = !inside;
            }
            j = i;
        }
        inside
    }

    /// Geometric intersection test, touching boundaries included.
    pub fn intersects(&self, other: &RegionPolygon) -> bool {
        let (ar0, ar1, ac0, ac1) = self.bounding_box();
        let (br0, br1, bc0, bc1) = other.bounding_box();
        if ar1 < br0 || br1 < ar0 || ac1 < bc0 || bc1 < ac0 {
            return false;
        }
        // any crossing or touching edge pair
        for i in 0..self.ring.len() - 1 {
            for j in 0..other.ring.len() - 1 {
                if segments_intersect(
                    self.ring[i],
                    self.ring[i + 1],
                    other.ring[j],
                    other.ring[j + 1],
                ) {
                    return true;
                }
            }
        }
        // full containment either way
        let (ar, ac) = self.ring[0];
        let (br, bc) = other.ring[0];
        other.contains_point(ar, ac) || self.contains_point(br, bc)
    }

    /// Rasterize onto a pixel grid: `mask[[r, c]]` is true when the
    /// center of global pixel `(row0 + r, col0 + c)` lies inside.
    pub fn rasterize(&self, row0: i64, col0: i64, rows: usize, cols: usize) -> Array2<bool> {
        Array2::from_shape_fn((rows, cols), |(r, c)| {
            self.contains_point((row0 + r as i64) as f64 + 0.5, (col0 + c as i64) as f64 + 0.5)
        })
    }

    /// Union with an intersecting polygon. The two rings are rasterized
    /// over their joint bounding box, OR-ed, and the exterior ring of
    /// the combined coverage is traced back into a polygon. Falls back
    /// to the joint bounding rectangle when the raster coverage
    /// degenerates (sub-pixel thin shapes).
    pub fn union(&self, other: &RegionPolygon) -> RegionPolygon {
        let (ar0, ar1, ac0, ac1) = self.bounding_box();
        let (br0, br1, bc0, bc1) = other.bounding_box();
        let row0 = ar0.min(br0).floor() as i64;
        let row1 = ar1.max(br1).ceil() as i64;
        let col0 = ac0.min(bc0).floor() as i64;
        let col1 = ac1.max(bc1).ceil() as i64;
        let rows = (row1 - row0).max(1) as usize;
        let cols = (col1 - col0).max(1) as usize;

        let mut merged = self.rasterize(row0, col0, rows, cols);
        let other_mask = other.rasterize(row0, col0, rows, cols);
        for (dst, src) in merged.iter_mut().zip(other_mask.iter()) {
            *dst = *dst || *src;
        }

        match trace_exterior_ring(&merged) {
            Some(ring) => RegionPolygon::new(ring).translate(row0 as f64, col0 as f64),
            None => RegionPolygon::new(vec![
                (row0 as f64, col0 as f64),
                (row0 as f64, col1 as f64),
                (row1 as f64, col1 as f64),
                (row1 as f64, col0 as f64),
            ]),
        }
    }
}

fn cross(o: (f64, f64), a: (f64, f64), b: (f64, f64)) -> f64 {
    (a.1 - o.1) * (b.0 - o.0) - (a.0 - o.0) * (b.1 - o.1)
}

fn on_segment(p: (f64, f64), q: (f64, f64), r: (f64, f64)) -> bool {
    q.0 <= p.0.max(r.0) && q.0 >= p.0.min(r.0) && q.1 <= p.1.max(r.1) && q.1 >= p.1.min(r.1)
}

/// Segment intersection including endpoint touching and collinear overlap.
fn segments_intersect(p1: (f64, f64), p2: (f64, f64), p3: (f64, f64), p4: (f64, f64)) -> bool {
    let d1 = cross(p3, p4, p1);
    let d2 = cross(p3, p4, p2);
    let d3 = cross(p1, p2, p3);
    let d4 = cross(p1, p2, p4);

    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }
    (d1 == 0.0 && on_segment(p3, p1, p4))
        || (d2 == 0.0 && on_segment(p3, p2, p4))
        || (d3 == 0.0 && on_segment(p1, p3, p2))
        || (d4 == 0.0 && on_segment(p1, p4, p2))
}

/// Trace the exterior boundary ring of the true pixels in `mask`,
/// as lattice-point vertices in mask-local coordinates. Pixel (r, c)
/// occupies the unit square [r, r+1] x [c, c+1]. Returns `None` for
/// an all-false mask. When the coverage encloses interior holes only
/// the exterior ring is kept.
pub fn trace_exterior_ring(mask: &Array2<bool>) -> Option<Vec<(f64, f64)>> {
    let (rows, cols) = mask.dim();
    // directed border edges, oriented so each ring closes on itself:
    // start lattice point -> candidate end points
    let mut edges: BTreeMap<(i64, i64), Vec<(i64, i64)>> = BTreeMap::new();
    let mut push = |a: (i64, i64), b: (i64, i64)| edges.entry(a).or_default().push(b);
    for r in 0..rows {
        for c in 0..cols {
            if !mask[[r, c]] {
                continue;
            }
            let (ri, ci) = (r as i64, c as i64);
            if r == 0 || !mask[[r - 1, c]] {
                push((ri, ci), (ri, ci + 1));
            }
            if c + 1 == cols || !mask[[r, c + 1]] {
                push((ri, ci + 1), (ri + 1, ci + 1));
            }
            if r + 1 == rows || !mask[[r + 1, c]] {
                push((ri + 1, ci + 1), (ri + 1, ci));
            }
            if c == 0 || !mask[[r, c - 1]] {
                push((ri + 1, ci), (ri, ci));
            }
        }
    }
    if edges.is_empty() {
        return None;
    }

    let mut best: Option<(f64, Vec<(f64, f64)>)> = None;
    while let Some((&start, _)) = edges.iter().find(|(_, ends)| !ends.is_empty()) {
        let mut ring: Vec<(i64, i64)> = vec![start];
        let mut current = start;
        let mut dir: Option<(i64, i64)> = None;
        loop {
            let ends = match edges.get_mut(&current) {
                Some(ends) if !ends.is_empty() => ends,
                _ => break,
            };
            // at a pinch point two outgoing edges exist; keep the ring on
            // the exterior by taking the sharpest turn toward the interior
            let pick = match dir {
                None => 0,
                Some((dr, dc)) => {
                    let mut best_idx = 0;
                    let mut best_turn = f64::NEG_INFINITY;
                    for (idx, &(er, ec)) in ends.iter().enumerate() {
                        let (ndr, ndc) = (er - current.0, ec - current.1);
                        let turn = (dr * ndc - dc * ndr) as f64;
                        if turn > best_turn {
                            best_turn = turn;
                            best_idx = idx;
                        }
                    }
                    best_idx
                }
            };
            let next = ends.swap_remove(pick);
            dir = Some((next.0 - current.0, next.1 - current.1));
            ring.push(next);
            current = next;
            if current == start {
                break;
            }
        }
        if ring.len() < 4 || *ring.last().unwrap() != start {
            continue;
        }
        let ring_f: Vec<(f64, f64)> =
            simplify_ring(&ring).iter().map(|&(r, c)| (r as f64, c as f64)).collect();
        let area = RegionPolygon::new(ring_f.clone()).area();
        if best.as_ref().map_or(true, |(a, _)| area > *a) {
            best = Some((area, ring_f));
        }
    }
    best.map(|(_, ring)| ring)
}

/// Drop vertices lying on a straight run of boundary edges.
fn simplify_ring(ring: &[(i64, i64)]) -> Vec<(i64, i64)> {
    let n = ring.len();
    if n < 4 {
        return ring.to_vec();
    }
    let mut out = Vec::with_capacity(n);
    out.push(ring[0]);
    for i in 1..n - 1 {
        let prev = *out.last().unwrap();
        let cur = ring[i];
        let next = ring[i + 1];
        let d1 = (cur.0 - prev.0, cur.1 - prev.1);
        let d2 = (next.0 - cur.0, next.1 - cur.1);
        if d1.0 * d2.1 - d1.1 * d2.0 != 0 {
            out.push(cur);
        }
    }
    out.push(ring[n - 1]);
    out
}

/// Project a hole polygon into the opposite stereo view given the
/// disparity search range. Each vertex contributes candidates at
/// `col + dmin` and `col + dmax`; the convex hull of all candidates is
/// a conservative superset of every pixel reachable under the range.
/// A degenerate range (`dmin == dmax`) reduces to an exact column
/// translation, so a zero range returns the input polygon unchanged.
pub fn estimate_poly_with_disp(poly: &RegionPolygon, dmin: f64, dmax: f64) -> RegionPolygon {
    if (dmax - dmin).abs() < f64::EPSILON {
        return poly.translate(0.0, dmin);
    }
    let mut points = Vec::with_capacity(2 * poly.ring().len());
    for &(r, c) in poly.ring() {
        points.push((r, c + dmin));
        points.push((r, c + dmax));
    }
    RegionPolygon::new(convex_hull(&mut points))
}

/// Andrew monotone chain on (row, col) points.
fn convex_hull(points: &mut Vec<(f64, f64)>) -> Vec<(f64, f64)> {
    points.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    points.dedup();
    let n = points.len();
    if n < 3 {
        return points.clone();
    }
    let mut hull: Vec<(f64, f64)> = Vec::with_capacity(2 * n);
    for &p in points.iter() {
        while hull.len() >= 2 && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0 {
            hull.pop();
        }
        hull.push(p);
    }
    let lower_len = hull.len() + 1;
    for &p in points.iter().rev() {
        while hull.len() >= lower_len && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0
        {
            hull.pop();
        }
        hull.push(p);
    }
    hull.pop();
    hull
}

/// Merge touching or overlapping polygons into a disjoint set by
/// replacing intersecting pairs with their union until a fixed point.
pub fn merge_intersecting_polygons(polys: Vec<RegionPolygon>) -> Vec<RegionPolygon> {
    let mut merged = polys;
    loop {
        let mut pair = None;
        'search: for i in 0..merged.len() {
            for j in i + 1..merged.len() {
                if merged[i].intersects(&merged[j]) {
                    pair = Some((i, j));
                    break 'search;
                }
            }
        }
        match pair {
            Some((i, j)) => {
                let union = merged[i].union(&merged[j]);
                merged.swap_remove(j);
                merged.swap_remove(i);
                merged.push(union);
            }
            None => break,
        }
    }
    merged
}
