//! Per-page processing and run progress.
//!
//! A run moves through [`Stage`]s in order. Inside `ProcessingPages` every plot page
//! goes through extraction, containment matching, masking and recognition on its own;
//! the only state shared between pages is the master page and its outline set.

use std::fmt;

use tracing::instrument;

use crate::{
    error::PageError,
    extract::PolygonExtractor,
    geometry::OutlineSet,
    mask::mask_region,
    matcher::match_all,
    raster::{PageRender, RasterImage},
    recognizer::TextRecognizer,
    result::MatchResult,
    CancellationToken,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Built and waiting for a run. Reported once by [`crate::PlotMatcherBuilder::build`].
    Idle,
    RasterizingPlots,
    RasterizingMaster,
    ExtractingMasterPolygons,
    ProcessingPages { total: usize },
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::RasterizingPlots => f.write_str("rasterizing plot pages"),
            Self::RasterizingMaster => f.write_str("rasterizing master page"),
            Self::ExtractingMasterPolygons => f.write_str("extracting master polygons"),
            Self::ProcessingPages { total } => write!(f, "processing {total} plot pages"),
            Self::Done => f.write_str("done"),
        }
    }
}

/// Run observer. All methods default to no-ops.
///
/// With parallel page processing the page callbacks arrive from worker threads and
/// out of page order.
pub trait MatchProgress: Send + Sync {
    fn on_stage(&self, stage: Stage) {
        let _ = stage;
    }

    fn on_page_complete(&self, page: usize, total: usize, matches: usize) {
        let _ = (page, total, matches);
    }

    fn on_page_error(&self, error: &PageError) {
        let _ = error;
    }
}

pub(crate) type PageOutcome = Result<Vec<MatchResult>, PageError>;

/// Read-only state shared by every page of a run.
pub(crate) struct PageContext<'a> {
    pub extractor: &'a PolygonExtractor,
    pub masters: &'a OutlineSet,
    pub master_image: &'a RasterImage,
    pub recognizer: &'a dyn TextRecognizer,
    pub progress: Option<&'a dyn MatchProgress>,
    pub cancel: &'a CancellationToken,
    pub total: usize,
}

impl PageContext<'_> {
    /// Processes one page, or returns `None` when the run was cancelled before it started.
    pub fn run_page(&self, page: usize, render: PageRender) -> Option<PageOutcome> {
        if self.cancel.is_cancelled() {
            log::debug!("Skipping plot page {page}: run cancelled");
            return None;
        }
        let outcome = render.and_then(|image| self.process(page, &image));
        match &outcome {
            Ok(matches) => {
                if let Some(progress) = self.progress {
                    progress.on_page_complete(page, self.total, matches.len());
                }
            }
            Err(error) => {
                log::warn!("{error}");
                if let Some(progress) = self.progress {
                    progress.on_page_error(error);
                }
            }
        }
        Some(outcome)
    }

    #[instrument(level = "debug", skip(self, image))]
    fn process(&self, page: usize, image: &RasterImage) -> PageOutcome {
        if image.is_empty() {
            return Err(PageError::EmptyPage { page });
        }
        let plots = self.extractor.extract(image);
        let results = match_all(&plots, self.masters)
            .into_iter()
            .enumerate()
            .map(|(index, matched)| {
                let region = mask_region(self.master_image, matched.master);
                #[cfg(feature = "debug")]
                save_region(page, index, &region);
                #[cfg(not(feature = "debug"))]
                let _ = index;
                let (tokens, recognition_error) = match self.recognizer.recognize(&region) {
                    Ok(tokens) => (tokens, None),
                    Err(e) => {
                        log::warn!("plot page {page}: text recognition failed: {e}");
                        (Vec::new(), Some(e.to_string()))
                    }
                };
                MatchResult {
                    page,
                    plot: matched.plot.clone(),
                    master: matched.master.clone(),
                    text: tokens.join(" "),
                    tokens,
                    plot_image: image.clone(),
                    recognition_error,
                }
            })
            .collect::<Vec<_>>();
        log::debug!(
            "plot page {page}: {} outlines, {} matched",
            plots.len(),
            results.len()
        );
        Ok(results)
    }
}

#[cfg(any(feature = "debug", test))]
fn region_path(page: usize, index: usize) -> std::path::PathBuf {
    std::path::Path::new("part_images").join(format!("page{page}_match{index}.png"))
}

/// Dumps a masked region for inspection.
#[cfg(feature = "debug")]
fn save_region(page: usize, index: usize, region: &RasterImage) {
    let path = region_path(page, index);
    if let Err(e) = region.pixels().save(&path) {
        log::warn!("Failed to save {}: {e}", path.display());
    }
}
