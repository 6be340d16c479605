use geo::{EuclideanLength, LineString, Polygon, Simplify};
use image::{GrayImage, Luma};
use imageproc::{
    contours::{find_contours, BorderType, Contour},
    distance_transform::Norm,
    filter::box_filter,
    morphology::close,
};
use tracing::instrument;

use crate::{
    geometry::{Outline, OutlineSet},
    options::ExtractionOptions,
    raster::RasterImage,
};

const FOREGROUND: u8 = 255;
const MIN_VERTICES: usize = 4;

/// Finds candidate shape outlines on a rendered page.
#[derive(Debug, Clone, Default)]
pub struct PolygonExtractor {
    options: ExtractionOptions,
}

impl PolygonExtractor {
    pub fn new(options: ExtractionOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ExtractionOptions {
        &self.options
    }

    /// Extracts outlines with the area threshold resolved at the image's own DPI.
    pub fn extract(&self, image: &RasterImage) -> OutlineSet {
        let min_area = self.options.min_area.to_pixels(image.dpi());
        self.extract_with_min_area(image, min_area)
    }

    #[instrument(level = "debug", skip(self, image), fields(page = %image.page()))]
    pub fn extract_with_min_area(&self, image: &RasterImage, min_area: f64) -> OutlineSet {
        let page = image.page();
        if image.is_empty() {
            return OutlineSet::empty(page);
        }
        let options = &self.options;

        let binary = binarize(
            &image.to_luma8(),
            options.threshold_block_radius,
            options.threshold_offset,
        );
        let closed = close_gaps(&binary, options.kernel_size);

        let contours = external_contours(&closed);
        let found = contours.len();
        let outlines = contours
            .into_iter()
            .take(options.max_candidates)
            .filter(|it| it.points.len() > 2)
            .filter_map(|it| simplify(&it, options.simplification_ratio))
            .map(|polygon| Outline::from_polygon(polygon, page))
            .filter(|outline| keep(outline, min_area))
            .collect::<Vec<_>>();

        log::debug!(
            "{page}: {} of {found} external contours kept (min area {min_area:.1} px)",
            outlines.len()
        );
        OutlineSet::new(page, outlines)
    }
}

/// Shorthand for a one-off extraction with an explicit pixel area threshold.
pub fn extract(image: &RasterImage, min_area: f64) -> OutlineSet {
    PolygonExtractor::default().extract_with_min_area(image, min_area)
}

/// Adaptive mean threshold with inverted polarity: a pixel becomes foreground when it is
/// at least `offset` darker than the mean of its neighbourhood.
#[instrument(level = "trace", skip(gray))]
pub fn binarize(gray: &GrayImage, block_radius: u32, offset: i16) -> GrayImage {
    let mean = box_filter(gray, block_radius, block_radius);
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        let value = i32::from(gray.get_pixel(x, y)[0]);
        let local = i32::from(mean.get_pixel(x, y)[0]);
        if value <= local - i32::from(offset) {
            Luma([FOREGROUND])
        } else {
            Luma([0])
        }
    })
}

/// Morphological closing with a `kernel_size` square, bridging small breaks in linework.
#[instrument(level = "trace", skip(binary))]
pub fn close_gaps(binary: &GrayImage, kernel_size: u32) -> GrayImage {
    let radius = (kernel_size / 2).min(u8::MAX as u32) as u8;
    if radius == 0 {
        return binary.clone();
    }
    close(binary, Norm::LInf, radius)
}

/// Outer borders of top-level foreground regions. Holes and anything nested inside
/// another region are skipped.
pub fn external_contours(binary: &GrayImage) -> Vec<Contour<i32>> {
    find_contours::<i32>(binary)
        .into_iter()
        .filter(|it| it.border_type == BorderType::Outer && it.parent.is_none())
        .collect()
}

/// Douglas-Peucker simplification with a tolerance proportional to the contour perimeter.
pub fn simplify(contour: &Contour<i32>, ratio: f64) -> Option<Polygon<f64>> {
    let ring = contour
        .points
        .iter()
        .map(|point| (f64::from(point.x), f64::from(point.y)))
        .collect::<LineString<f64>>();
    let polygon = Polygon::new(ring, vec![]);
    let perimeter = polygon.exterior().euclidean_length();
    if perimeter <= 0.0 {
        return None;
    }
    Some(polygon.simplify(&(ratio * perimeter)))
}

fn keep(outline: &Outline, min_area: f64) -> bool {
    outline.vertex_count() >= MIN_VERTICES && outline.area() > 0.0 && outline.area() >= min_area
}
