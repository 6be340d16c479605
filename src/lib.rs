use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use rayon::prelude::*;
use tracing::instrument;

mod error;
pub mod extract;
mod geometry;
mod line_recognizer;
mod mask;
pub mod matcher;
mod ocr;
mod options;
mod orientation;
mod pipeline;
pub mod raster;
mod recognizer;
mod result;
mod session;
mod text_detector;
mod util;

pub use error::*;
pub use extract::PolygonExtractor;
pub use geometry::{Outline, OutlineSet};
pub use line_recognizer::TextLine;
pub use mask::{mask_region, polygon_mask};
pub use ocr::{DetectionOptions, OcrLine, OnnxRecognizer, OnnxRecognizerBuilder};
pub use options::*;
pub use orientation::Angle;
pub use pipeline::{MatchProgress, Stage};
pub use raster::{
    AutoRasterizer, DocumentKind, ImageRasterizer, PageRef, PageRender, RasterImage, Rasterizer,
};
#[cfg(feature = "pdf")]
pub use raster::PdfRasterizer;
pub use recognizer::TextRecognizer;
pub use result::*;
pub use session::ExecutionProvider;
pub use text_detector::TextBox;

pub use ort as runtime;

use pipeline::{PageContext, PageOutcome};

/// Cooperative cancellation, checked before each plot page.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct PlotMatcherBuilder {
    options: MatchOptions,
    rasterizer: Option<Box<dyn Rasterizer>>,
    recognizer: Option<Box<dyn TextRecognizer>>,
    progress: Option<Arc<dyn MatchProgress>>,
}

impl PlotMatcherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn options(mut self, options: MatchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.options.dpi = dpi;
        self
    }

    pub fn min_area(mut self, min_area: AreaThreshold) -> Self {
        self.options.extraction.min_area = min_area;
        self
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.options.parallel = parallel;
        self
    }

    /// Defaults to [`AutoRasterizer`].
    pub fn rasterizer(mut self, rasterizer: impl Rasterizer + 'static) -> Self {
        self.rasterizer = Some(Box::new(rasterizer));
        self
    }

    pub fn recognizer(mut self, recognizer: impl TextRecognizer + 'static) -> Self {
        self.recognizer = Some(Box::new(recognizer));
        self
    }

    pub fn progress(mut self, progress: Arc<dyn MatchProgress>) -> Self {
        self.progress = Some(progress);
        self
    }

    #[instrument(skip(self))]
    pub fn build(self) -> Result<PlotMatcher, PlotMatchError> {
        self.options.validate()?;
        let recognizer = self.recognizer.ok_or_else(|| {
            PlotMatchError::InvalidConfig("a text recognizer is required".into())
        })?;
        let matcher = PlotMatcher {
            extractor: PolygonExtractor::new(self.options.extraction),
            options: self.options,
            rasterizer: self
                .rasterizer
                .unwrap_or_else(|| Box::new(AutoRasterizer::new())),
            recognizer,
            progress: self.progress,
        };
        matcher.enter(Stage::Idle);
        Ok(matcher)
    }
}

impl Default for PlotMatcherBuilder {
    fn default() -> Self {
        Self {
            options: MatchOptions::default(),
            rasterizer: None,
            recognizer: None,
            progress: None,
        }
    }
}

/// Matches every outline on every plot page against the master page's outlines
/// and reads the label inside each matched master region.
pub struct PlotMatcher {
    options: MatchOptions,
    extractor: PolygonExtractor,
    rasterizer: Box<dyn Rasterizer>,
    recognizer: Box<dyn TextRecognizer>,
    progress: Option<Arc<dyn MatchProgress>>,
}

impl PlotMatcher {
    pub fn builder() -> PlotMatcherBuilder {
        PlotMatcherBuilder::new()
    }

    pub fn options(&self) -> &MatchOptions {
        &self.options
    }

    pub fn run(&self, plots: &[u8], master: &[u8]) -> Result<MatchReport, PlotMatchError> {
        self.run_with_cancellation(plots, master, &CancellationToken::new())
    }

    /// Only document-level failures are returned as errors; page failures end up in
    /// [`MatchReport::errors`].
    #[instrument(skip_all, fields(plot_bytes = plots.len(), master_bytes = master.len()))]
    pub fn run_with_cancellation(
        &self,
        plots: &[u8],
        master: &[u8],
        cancel: &CancellationToken,
    ) -> Result<MatchReport, PlotMatchError> {
        let dpi = self.options.dpi;

        self.enter(Stage::RasterizingPlots);
        let plot_pages = self.rasterizer.rasterize(plots, DocumentKind::Plot, dpi)?;
        if plot_pages.is_empty() {
            return Err(PlotMatchError::EmptyDocument {
                kind: DocumentKind::Plot,
            });
        }

        self.enter(Stage::RasterizingMaster);
        let master_image = self.rasterize_master(master)?;

        Ok(self.match_pages(plot_pages, &master_image, cancel))
    }

    /// Runs matching over pages that were already rasterised.
    #[instrument(skip_all, fields(pages = plot_pages.len()))]
    pub fn match_pages(
        &self,
        plot_pages: Vec<PageRender>,
        master_image: &RasterImage,
        cancel: &CancellationToken,
    ) -> MatchReport {
        self.enter(Stage::ExtractingMasterPolygons);
        let masters = self.extractor.extract(master_image);
        log::info!("{} master outlines found", masters.len());

        let total = plot_pages.len();
        self.enter(Stage::ProcessingPages { total });
        let context = PageContext {
            extractor: &self.extractor,
            masters: &masters,
            master_image,
            recognizer: &*self.recognizer,
            progress: self.progress.as_deref(),
            cancel,
            total,
        };
        let outcomes: Vec<Option<PageOutcome>> = if self.options.parallel {
            plot_pages
                .into_par_iter()
                .enumerate()
                .map(|(page, render)| context.run_page(page, render))
                .collect()
        } else {
            plot_pages
                .into_iter()
                .enumerate()
                .map(|(page, render)| context.run_page(page, render))
                .collect()
        };

        let mut report = MatchReport {
            pages: total,
            ..Default::default()
        };
        for outcome in outcomes {
            match outcome {
                Some(Ok(matches)) => report.matches.extend(matches),
                Some(Err(error)) => report.errors.push(error),
                None => report.cancelled = true,
            }
        }

        log::info!(
            "{} matches, {} page errors across {total} plot pages{}",
            report.matches.len(),
            report.errors.len(),
            if report.cancelled { " (cancelled)" } else { "" }
        );
        self.enter(Stage::Done);
        report
    }

    fn rasterize_master(&self, master: &[u8]) -> Result<RasterImage, PlotMatchError> {
        let mut pages = self
            .rasterizer
            .rasterize(master, DocumentKind::Master, self.options.dpi)?;
        if pages.len() > 1 {
            log::warn!(
                "Master document has {} pages; only the first is used",
                pages.len()
            );
        }
        if pages.is_empty() {
            return Err(PlotMatchError::EmptyDocument {
                kind: DocumentKind::Master,
            });
        }
        pages
            .swap_remove(0)
            .map_err(|e| PlotMatchError::MasterPage {
                detail: e.to_string(),
            })
    }

    fn enter(&self, stage: Stage) {
        log::info!("Stage: {stage}");
        if let Some(progress) = &self.progress {
            progress.on_stage(stage);
        }
    }
}
