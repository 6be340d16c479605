use image::{DynamicImage, GrayImage, ImageBuffer, Luma, Pixel, Primitive};
use imageproc::drawing::draw_polygon_mut;
use tracing::instrument;

use crate::{geometry::Outline, raster::RasterImage};

const KEEP: u8 = 255;

/// Blanks every pixel outside `outline`, keeping the input's size and channel layout.
///
/// Pixels on the outline's boundary are kept. A degenerate outline (fewer than three
/// vertices or zero area) produces an all-blank image.
#[instrument(level = "debug", skip_all, fields(page = %image.page()))]
pub fn mask_region(image: &RasterImage, outline: &Outline) -> RasterImage {
    let mask = polygon_mask(image.width(), image.height(), outline);
    let pixels = apply_mask(image.pixels(), &mask);
    RasterImage::new(image.page(), image.dpi(), pixels)
}

/// A single-channel mask with the filled outline set to 255.
pub fn polygon_mask(width: u32, height: u32, outline: &Outline) -> GrayImage {
    let mut mask = GrayImage::new(width, height);
    let mut vertices = outline.vertices();
    // the polygon fill rejects an explicitly closed ring
    while vertices.len() > 1 && vertices.last() == vertices.first() {
        vertices.pop();
    }
    if vertices.len() < 3 || outline.area() <= 0.0 || width == 0 || height == 0 {
        log::debug!("Degenerate outline with {} vertices, mask is blank", vertices.len());
        return mask;
    }
    draw_polygon_mut(&mut mask, &vertices, Luma([KEEP]));
    mask
}

fn apply_mask(image: &DynamicImage, mask: &GrayImage) -> DynamicImage {
    match image {
        DynamicImage::ImageLuma8(buffer) => DynamicImage::ImageLuma8(blank_outside(buffer, mask)),
        DynamicImage::ImageLumaA8(buffer) => {
            DynamicImage::ImageLumaA8(blank_outside(buffer, mask))
        }
        DynamicImage::ImageRgb8(buffer) => DynamicImage::ImageRgb8(blank_outside(buffer, mask)),
        DynamicImage::ImageRgba8(buffer) => DynamicImage::ImageRgba8(blank_outside(buffer, mask)),
        DynamicImage::ImageLuma16(buffer) => {
            DynamicImage::ImageLuma16(blank_outside(buffer, mask))
        }
        DynamicImage::ImageLumaA16(buffer) => {
            DynamicImage::ImageLumaA16(blank_outside(buffer, mask))
        }
        DynamicImage::ImageRgb16(buffer) => DynamicImage::ImageRgb16(blank_outside(buffer, mask)),
        DynamicImage::ImageRgba16(buffer) => {
            DynamicImage::ImageRgba16(blank_outside(buffer, mask))
        }
        DynamicImage::ImageRgb32F(buffer) => {
            DynamicImage::ImageRgb32F(blank_outside(buffer, mask))
        }
        DynamicImage::ImageRgba32F(buffer) => {
            DynamicImage::ImageRgba32F(blank_outside(buffer, mask))
        }
        other => DynamicImage::ImageRgba8(blank_outside(&other.to_rgba8(), mask)),
    }
}

fn blank_outside<P: Pixel>(
    buffer: &ImageBuffer<P, Vec<P::Subpixel>>,
    mask: &GrayImage,
) -> ImageBuffer<P, Vec<P::Subpixel>> {
    let mut out = buffer.clone();
    for (pixel, keep) in out.pixels_mut().zip(mask.pixels()) {
        if keep[0] != KEEP {
            for channel in pixel.channels_mut() {
                *channel = <P::Subpixel as Primitive>::DEFAULT_MIN_VALUE;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use image::{ColorType, Rgb, RgbImage};
    use imageproc::point::Point;

    use super::*;
    use crate::{geometry::rect, raster::PageRef};

    fn white_page() -> RasterImage {
        RasterImage::new(
            PageRef::master(0),
            300,
            DynamicImage::ImageRgb8(RgbImage::from_pixel(50, 40, Rgb([255, 255, 255]))),
        )
    }

    #[test]
    fn keeps_inside_and_blanks_outside() {
        let masked = mask_region(&white_page(), &rect(10, 10, 20, 10, PageRef::master(0)));
        let pixels = masked.pixels().to_rgb8();

        assert_eq!((masked.width(), masked.height()), (50, 40));
        assert_eq!(masked.color(), ColorType::Rgb8);
        assert_eq!(pixels.get_pixel(20, 15), &Rgb([255, 255, 255]));
        assert_eq!(pixels.get_pixel(10, 10), &Rgb([255, 255, 255]));
        assert_eq!(pixels.get_pixel(5, 5), &Rgb([0, 0, 0]));
        assert_eq!(pixels.get_pixel(45, 35), &Rgb([0, 0, 0]));
    }

    #[test]
    fn degenerate_outline_blanks_everything() {
        let line = Outline::new(
            &[Point::new(0, 0), Point::new(10, 10), Point::new(20, 20)],
            PageRef::master(0),
        );
        let masked = mask_region(&white_page(), &line);
        assert!(masked.pixels().to_luma8().pixels().all(|p| p[0] == 0));
    }

    #[test]
    fn repeated_closing_vertices_are_filled_normally() {
        let outline = Outline::new(
            &[
                Point::new(0, 0),
                Point::new(20, 0),
                Point::new(20, 20),
                Point::new(0, 20),
                Point::new(0, 0),
                Point::new(0, 0),
            ],
            PageRef::master(0),
        );
        let masked = mask_region(&white_page(), &outline).pixels().to_rgb8();
        assert_eq!(masked.get_pixel(10, 10), &Rgb([255, 255, 255]));
        assert_eq!(masked.get_pixel(30, 30), &Rgb([0, 0, 0]));
    }

    #[test]
    fn consecutive_duplicate_vertices_are_filled_normally() {
        let outline = Outline::new(
            &[
                Point::new(5, 5),
                Point::new(5, 5),
                Point::new(25, 5),
                Point::new(25, 25),
                Point::new(25, 25),
                Point::new(5, 25),
            ],
            PageRef::master(0),
        );
        let mask = polygon_mask(50, 40, &outline);
        assert_eq!(mask.get_pixel(15, 15)[0], KEEP);
        assert_eq!(mask.get_pixel(40, 35)[0], 0);
    }

    #[test]
    fn source_image_is_untouched() {
        let page = white_page();
        let _ = mask_region(&page, &rect(0, 0, 5, 5, PageRef::master(0)));
        assert!(page.pixels().to_luma8().pixels().all(|p| p[0] == 255));
    }

    #[test]
    fn grayscale_layout_is_preserved() {
        let page = RasterImage::new(
            PageRef::master(0),
            300,
            DynamicImage::ImageLuma8(GrayImage::from_pixel(10, 10, Luma([200]))),
        );
        let masked = mask_region(&page, &rect(2, 2, 4, 4, PageRef::master(0)));
        assert_eq!(masked.color(), ColorType::L8);
        let gray = masked.pixels().to_luma8();
        assert_eq!(gray.get_pixel(3, 3)[0], 200);
        assert_eq!(gray.get_pixel(9, 9)[0], 0);
    }
}
