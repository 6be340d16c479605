use std::{fmt, sync::Arc};

use image::{ColorType, DynamicImage, GrayImage};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::error::{PageError, PlotMatchError};

/// Which of the two input documents a page came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentKind {
    Plot,
    Master,
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plot => f.write_str("plot"),
            Self::Master => f.write_str("master"),
        }
    }
}

/// Identity of a rendered page: the document it belongs to and its 0-based index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageRef {
    pub document: DocumentKind,
    pub index: usize,
}

impl PageRef {
    pub fn plot(index: usize) -> Self {
        Self {
            document: DocumentKind::Plot,
            index,
        }
    }

    pub fn master(index: usize) -> Self {
        Self {
            document: DocumentKind::Master,
            index,
        }
    }
}

impl fmt::Display for PageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} page {}", self.document, self.index)
    }
}

/// An immutable rendered page.
///
/// Cloning is cheap; the pixel buffer is shared.
#[derive(Debug, Clone)]
pub struct RasterImage {
    page: PageRef,
    dpi: u32,
    pixels: Arc<DynamicImage>,
}

impl RasterImage {
    pub fn new(page: PageRef, dpi: u32, pixels: DynamicImage) -> Self {
        Self {
            page,
            dpi,
            pixels: Arc::new(pixels),
        }
    }

    pub fn page(&self) -> PageRef {
        self.page
    }

    pub fn dpi(&self) -> u32 {
        self.dpi
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Channel layout of the underlying buffer.
    pub fn color(&self) -> ColorType {
        self.pixels.color()
    }

    pub fn pixels(&self) -> &DynamicImage {
        &self.pixels
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    pub(crate) fn to_luma8(&self) -> GrayImage {
        self.pixels.to_luma8()
    }
}

/// Outcome of rendering one page.
pub type PageRender = Result<RasterImage, PageError>;

/// Turns document bytes into one raster image per page.
///
/// Failing to open the document at all is fatal for the run. A page that cannot be
/// rendered is reported through its own [`PageRender`] so the other pages still
/// get processed.
pub trait Rasterizer {
    fn rasterize(
        &self,
        document: &[u8],
        kind: DocumentKind,
        dpi: u32,
    ) -> Result<Vec<PageRender>, PlotMatchError>;
}

/// Treats an encoded raster image (PNG, JPEG, TIFF, ...) as a single-page document.
///
/// The image is taken to be already rendered at the requested DPI.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageRasterizer;

impl Rasterizer for ImageRasterizer {
    #[instrument(level = "debug", skip(self, document))]
    fn rasterize(
        &self,
        document: &[u8],
        kind: DocumentKind,
        dpi: u32,
    ) -> Result<Vec<PageRender>, PlotMatchError> {
        if document.is_empty() {
            return Err(PlotMatchError::EmptyDocument { kind });
        }
        let image =
            image::load_from_memory(document).map_err(|e| PlotMatchError::UnreadableDocument {
                kind,
                detail: e.to_string(),
            })?;
        log::debug!(
            "Decoded {kind} image {}x{} ({:?})",
            image.width(),
            image.height(),
            image.color()
        );
        let page = PageRef { document: kind, index: 0 };
        Ok(vec![Ok(RasterImage::new(page, dpi, image))])
    }
}

/// Renders PDF pages through pdfium.
#[cfg(feature = "pdf")]
#[derive(Debug, Clone, Default)]
pub struct PdfRasterizer {
    library_path: Option<std::path::PathBuf>,
    max_dimension: Option<u32>,
}

#[cfg(feature = "pdf")]
impl PdfRasterizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory containing the pdfium shared library. The system library is used when unset.
    pub fn library_path(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.library_path = Some(path.into());
        self
    }

    /// Caps the longest rendered edge in pixels, scaling the page down if needed.
    pub fn max_dimension(mut self, max_dimension: u32) -> Self {
        self.max_dimension = Some(max_dimension);
        self
    }

    fn bind(&self) -> Result<pdfium_render::prelude::Pdfium, PlotMatchError> {
        use pdfium_render::prelude::Pdfium;

        let bindings = match &self.library_path {
            Some(path) => {
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(path))
            }
            None => Pdfium::bind_to_system_library(),
        }
        .map_err(|e| PlotMatchError::RasterizerUnavailable(e.to_string()))?;
        Ok(Pdfium::new(bindings))
    }

    fn target_size(&self, width_points: f32, height_points: f32, dpi: u32) -> (u32, u32) {
        let scale = dpi as f32 / 72.0;
        let mut width = (width_points * scale) as u32;
        let mut height = (height_points * scale) as u32;
        if let Some(max) = self.max_dimension {
            let longest = width.max(height);
            if longest > max {
                let ratio = max as f32 / longest as f32;
                width = (width as f32 * ratio) as u32;
                height = (height as f32 * ratio) as u32;
            }
        }
        (width, height)
    }
}

#[cfg(feature = "pdf")]
impl Rasterizer for PdfRasterizer {
    #[instrument(level = "debug", skip(self, document))]
    fn rasterize(
        &self,
        document: &[u8],
        kind: DocumentKind,
        dpi: u32,
    ) -> Result<Vec<PageRender>, PlotMatchError> {
        use pdfium_render::prelude::PdfRenderConfig;

        let pdfium = self.bind()?;
        let pdf = pdfium
            .load_pdf_from_byte_slice(document, None)
            .map_err(|e| PlotMatchError::UnreadableDocument {
                kind,
                detail: e.to_string(),
            })?;
        let pages = pdf.pages();
        if pages.len() == 0 {
            return Err(PlotMatchError::EmptyDocument { kind });
        }
        log::debug!("{kind} document has {} pages", pages.len());

        let renders = pages
            .iter()
            .enumerate()
            .map(|(index, page)| {
                let (width, height) =
                    self.target_size(page.width().value, page.height().value, dpi);
                let config = PdfRenderConfig::new()
                    .set_target_width(width as i32)
                    .set_target_height(height as i32);
                page.render_with_config(&config)
                    .map(|bitmap| {
                        RasterImage::new(PageRef { document: kind, index }, dpi, bitmap.as_image())
                    })
                    .map_err(|e| PageError::RenderFailed {
                        page: index,
                        detail: e.to_string(),
                    })
            })
            .collect();
        Ok(renders)
    }
}

/// Picks a rasteriser from the document's leading bytes: PDF when it starts with
/// `%PDF`, an encoded raster image otherwise.
#[derive(Debug, Clone, Default)]
pub struct AutoRasterizer {
    #[cfg(feature = "pdf")]
    pdf: PdfRasterizer,
}

impl AutoRasterizer {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(feature = "pdf")]
    pub fn with_pdf(pdf: PdfRasterizer) -> Self {
        Self { pdf }
    }
}

pub fn is_pdf(document: &[u8]) -> bool {
    document.starts_with(b"%PDF")
}

impl Rasterizer for AutoRasterizer {
    fn rasterize(
        &self,
        document: &[u8],
        kind: DocumentKind,
        dpi: u32,
    ) -> Result<Vec<PageRender>, PlotMatchError> {
        if is_pdf(document) {
            #[cfg(feature = "pdf")]
            return self.pdf.rasterize(document, kind, dpi);
            #[cfg(not(feature = "pdf"))]
            return Err(PlotMatchError::UnsupportedFormat {
                kind,
                detail: "PDF input requires the `pdf` feature".into(),
            });
        }
        ImageRasterizer.rasterize(document, kind, dpi)
    }
}
