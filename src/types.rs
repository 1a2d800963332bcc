use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};

/// Real-valued disparity data
pub type DispReal = f32;

/// 2D disparity array (row x col)
pub type DispImage = Array2<DispReal>;

/// 2D validity mask array (row x col)
pub type MaskImage = Array2<u8>;

/// 3D color array (band x row x col)
pub type ColorImage = Array3<f32>;

/// Mask code for invalid (hole / no-data) pixels
pub const MASK_INVALID: u8 = 0;

/// Mask code for valid, measured disparity pixels
pub const MASK_VALID: u8 = 255;

/// Mask code for pixels whose disparity was reconstructed by filling.
/// Distinct from [`MASK_VALID`] so downstream consumers can tell
/// measured values from estimated ones.
pub const MASK_FILLED: u8 = 128;

/// Rectangular pixel extent in the global epipolar frame.
/// Bounds are half-open: rows span `row_min..row_max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub row_min: usize,
    pub row_max: usize,
    pub col_min: usize,
    pub col_max: usize,
}

impl Window {
    pub fn new(row_min: usize, row_max: usize, col_min: usize, col_max: usize) -> Self {
        Self {
            row_min,
            row_max,
            col_min,
            col_max,
        }
    }

    pub fn rows(&self) -> usize {
        self.row_max - self.row_min
    }

    pub fn cols(&self) -> usize {
        self.col_max - self.col_min
    }

    /// Extend this window by the halo margins of `overlap`.
    pub fn extended(&self, overlap: &Overlap) -> Window {
        Window {
            row_min: self.row_min.saturating_sub(overlap.row_min),
            row_max: self.row_max + overlap.row_max,
            col_min: self.col_min.saturating_sub(overlap.col_min),
            col_max: self.col_max + overlap.col_max,
        }
    }
}

/// Halo margins around a tile window, one non-negative amount per side.
/// Border tiles carry zero margin on their outer sides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Overlap {
    pub row_min: usize,
    pub row_max: usize,
    pub col_min: usize,
    pub col_max: usize,
}

impl Overlap {
    pub fn new(row_min: usize, row_max: usize, col_min: usize, col_max: usize) -> Self {
        Self {
            row_min,
            row_max,
            col_min,
            col_max,
        }
    }
}

/// Per-class binary layers extracted from a classification raster.
#[derive(Debug, Clone, Default)]
pub struct ClassifBands {
    layers: Vec<(String, Array2<bool>)>,
}

impl ClassifBands {
    pub fn new(layers: Vec<(String, Array2<bool>)>) -> Self {
        Self { layers }
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.layers.iter().map(|(name, _)| name.as_str())
    }

    pub fn band(&self, name: &str) -> Option<&Array2<bool>> {
        self.layers
            .iter()
            .find(|(band_name, _)| band_name == name)
            .map(|(_, band)| band)
    }

    pub fn layers(&self) -> &[(String, Array2<bool>)] {
        &self.layers
    }

    /// Logical OR of the layers whose names appear in `names`.
    /// Returns `None` when no requested layer is present.
    pub fn union_of(&self, names: &[String]) -> Option<Array2<bool>> {
        let mut combined: Option<Array2<bool>> = None;
        for (band_name, band) in &self.layers {
            if !names.iter().any(|n| n == band_name) {
                continue;
            }
            match combined.as_mut() {
                None => combined = Some(band.clone()),
                Some(acc) => {
                    for (dst, src) in acc.iter_mut().zip(band.iter()) {
                        *dst = *dst || *src;
                    }
                }
            }
        }
        combined
    }
}

/// Save-routing metadata attached to an emitted tile for the
/// downstream persistence collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavingInfo {
    /// Product tag, e.g. "disparity_left" or "disparity_right"
    pub product: String,
    pub row: usize,
    pub col: usize,
    pub save_disparity_map: bool,
    /// UTC timestamp of tile production
    pub produced_at: String,
}

impl SavingInfo {
    pub fn new(product: &str, save_disparity_map: bool) -> Self {
        Self {
            product: product.to_string(),
            row: 0,
            col: 0,
            save_disparity_map,
            produced_at: String::new(),
        }
    }

    /// Bind this saving info to one tile slot and stamp the production time.
    pub fn at_tile(&self, row: usize, col: usize) -> Self {
        Self {
            product: self.product.clone(),
            row,
            col,
            save_disparity_map: self.save_disparity_map,
            produced_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Provenance attached to every emitted tile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TileAttributes {
    pub window: Window,
    pub overlap: Overlap,
    pub saving_info: SavingInfo,
}

/// One disparity tile: the working arrays cover the tile's
/// window extended by its halo margins.
#[derive(Debug, Clone)]
pub struct DispTile {
    pub disp: DispImage,
    pub msk: MaskImage,
    pub classif: Option<ClassifBands>,
    pub color: Option<ColorImage>,
    pub color_bands: Option<Vec<String>>,
    pub attributes: Option<TileAttributes>,
}

impl DispTile {
    pub fn new(disp: DispImage, msk: MaskImage) -> Self {
        Self {
            disp,
            msk,
            classif: None,
            color: None,
            color_bands: None,
            attributes: None,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        self.disp.dim()
    }

    /// Attach provenance metadata, replacing any previous stamp.
    pub fn stamp_attributes(&mut self, window: Window, overlap: Overlap, saving_info: SavingInfo) {
        self.attributes = Some(TileAttributes {
            window,
            overlap,
            saving_info,
        });
    }
}

/// One epipolar image tile, used as the color source for
/// right-disparity color recomputation.
#[derive(Debug, Clone)]
pub struct ImageTile {
    pub color: ColorImage,
    pub color_bands: Vec<String>,
}

/// A tiled dataset: an immutable tiling grid plus per-tile payloads.
/// Tile slots may legitimately be empty, e.g. the right disparity
/// side when right filling is not required.
#[derive(Debug, Clone)]
pub struct TiledDataset<T: Clone> {
    pub tiling_grid: Array2<Window>,
    pub overlaps: Array2<Overlap>,
    pub tiles: Array2<Option<T>>,
}

impl<T: Clone> TiledDataset<T> {
    pub fn new(tiling_grid: Array2<Window>, overlaps: Array2<Overlap>) -> Self {
        let shape = tiling_grid.dim();
        Self {
            tiling_grid,
            overlaps,
            tiles: Array2::from_shape_fn(shape, |_| None),
        }
    }

    /// Build a regular tiling of `total_rows x total_cols` pixels with
    /// square tiles of `tile_size` and a constant halo of `overlap`
    /// pixels on interior sides.
    pub fn regular_grid(
        total_rows: usize,
        total_cols: usize,
        tile_size: usize,
        overlap: usize,
    ) -> Self {
        let n_rows = (total_rows + tile_size - 1) / tile_size;
        let n_cols = (total_cols + tile_size - 1) / tile_size;
        let tiling_grid = Array2::from_shape_fn((n_rows, n_cols), |(r, c)| {
            Window::new(
                r * tile_size,
                ((r + 1) * tile_size).min(total_rows),
                c * tile_size,
                ((c + 1) * tile_size).min(total_cols),
            )
        });
        let overlaps = Array2::from_shape_fn((n_rows, n_cols), |(r, c)| {
            Overlap::new(
                if r > 0 { overlap } else { 0 },
                if r + 1 < n_rows { overlap } else { 0 },
                if c > 0 { overlap } else { 0 },
                if c + 1 < n_cols { overlap } else { 0 },
            )
        });
        Self::new(tiling_grid, overlaps)
    }

    /// Grid shape as (tile rows, tile cols).
    pub fn shape(&self) -> (usize, usize) {
        self.tiling_grid.dim()
    }

    pub fn tile(&self, row: usize, col: usize) -> Option<&T> {
        self.tiles[[row, col]].as_ref()
    }

    pub fn set_tile(&mut self, row: usize, col: usize, tile: T) {
        self.tiles[[row, col]] = Some(tile);
    }

    /// An empty dataset of another payload type sharing this grid.
    pub fn empty_like<U: Clone>(&self) -> TiledDataset<U> {
        TiledDataset::new(self.tiling_grid.clone(), self.overlaps.clone())
    }
}

/// Tiled disparity dataset
pub type DisparityDataset = TiledDataset<DispTile>;

/// Tiled epipolar image dataset
pub type ImageDataset = TiledDataset<ImageTile>;

/// Per-tile output of the filling stage: left tile, optional right tile.
pub type TilePair = (Option<DispTile>, Option<DispTile>);

/// Error types for disparity filling
#[derive(Debug, thiserror::Error)]
pub enum FillError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Unsupported data layout: {0}")]
    UnsupportedLayout(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("No scheduler mode named {0} registered")]
    UnknownSchedulerMode(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for filling operations
pub type FillResult<T> = Result<T, FillError>;
