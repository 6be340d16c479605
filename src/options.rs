use serde::{Deserialize, Serialize};

use crate::error::PlotMatchError;

const MM_PER_INCH: f64 = 25.4;

/// Minimum polygon area, expressed independently of the rasterisation resolution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum AreaThreshold {
    /// Physical area on the page.
    SquareMillimetres(f64),
    /// A pixel area measured on a page rendered at `dpi`.
    Pixels { pixels: f64, dpi: u32 },
}

impl AreaThreshold {
    /// The threshold in square pixels for a page rendered at `dpi`.
    pub fn to_pixels(&self, dpi: u32) -> f64 {
        match *self {
            Self::SquareMillimetres(area) => {
                let pixels_per_mm = dpi as f64 / MM_PER_INCH;
                area * pixels_per_mm * pixels_per_mm
            }
            Self::Pixels {
                pixels,
                dpi: reference,
            } => {
                let scale = dpi as f64 / reference as f64;
                pixels * scale * scale
            }
        }
    }

    fn is_valid(&self) -> bool {
        match *self {
            Self::SquareMillimetres(area) => area.is_finite() && area >= 0.0,
            Self::Pixels { pixels, dpi } => pixels.is_finite() && pixels >= 0.0 && dpi > 0,
        }
    }
}

impl Default for AreaThreshold {
    fn default() -> Self {
        Self::Pixels {
            pixels: 1000.0,
            dpi: 300,
        }
    }
}

/// Tuning for [`crate::PolygonExtractor`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionOptions {
    pub min_area: AreaThreshold,
    /// Simplification tolerance as a fraction of each contour's perimeter.
    pub simplification_ratio: f64,
    /// Side of the square closing kernel. Must be odd.
    pub kernel_size: u32,
    /// The adaptive threshold compares each pixel against the mean of the
    /// `(2 * radius + 1)` square around it.
    pub threshold_block_radius: u32,
    /// A pixel is linework when it is at least this much darker than its local mean.
    pub threshold_offset: i16,
    pub max_candidates: usize,
}

impl Default for ExtractionOptions {
    fn default() -> Self {
        Self {
            min_area: AreaThreshold::default(),
            simplification_ratio: 0.02,
            kernel_size: 5,
            threshold_block_radius: 5,
            threshold_offset: 2,
            max_candidates: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchOptions {
    /// Rasterisation resolution for both documents.
    pub dpi: u32,
    pub extraction: ExtractionOptions,
    /// Process plot pages on the rayon thread pool. Output order is unaffected.
    pub parallel: bool,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            dpi: 300,
            extraction: ExtractionOptions::default(),
            parallel: false,
        }
    }
}

impl MatchOptions {
    pub fn validate(&self) -> Result<(), PlotMatchError> {
        let invalid = |msg: String| Err(PlotMatchError::InvalidConfig(msg));
        let extraction = &self.extraction;

        if self.dpi == 0 {
            return invalid("dpi must be greater than zero".into());
        }
        if extraction.kernel_size == 0 || extraction.kernel_size % 2 == 0 {
            return invalid(format!(
                "kernel_size must be odd, got {}",
                extraction.kernel_size
            ));
        }
        if extraction.kernel_size / 2 > u8::MAX as u32 {
            return invalid(format!(
                "kernel_size {} is too large",
                extraction.kernel_size
            ));
        }
        if !(extraction.simplification_ratio > 0.0 && extraction.simplification_ratio < 1.0) {
            return invalid(format!(
                "simplification_ratio must be in (0, 1), got {}",
                extraction.simplification_ratio
            ));
        }
        if extraction.threshold_block_radius == 0 {
            return invalid("threshold_block_radius must be greater than zero".into());
        }
        if !(-255..=255).contains(&extraction.threshold_offset) {
            return invalid(format!(
                "threshold_offset must be within -255..=255, got {}",
                extraction.threshold_offset
            ));
        }
        if !extraction.min_area.is_valid() {
            return invalid(format!("invalid min_area {:?}", extraction.min_area));
        }
        Ok(())
    }
}
