use crate::{error::PageError, geometry::Outline, raster::RasterImage};

/// A plot outline paired with the master outline containing it, and the text read
/// from that master region.
#[derive(Debug, Clone)]
pub struct MatchResult {
    /// 0-based plot page index.
    pub page: usize,
    pub plot: Outline,
    pub master: Outline,
    /// Recognised tokens joined with single spaces.
    pub text: String,
    pub tokens: Vec<String>,
    pub plot_image: RasterImage,
    /// Set when the recognizer failed on the master region; `text` is then empty.
    pub recognition_error: Option<String>,
}

/// Everything a run produced: matches and page failures, both ordered by page.
#[derive(Debug, Clone, Default)]
pub struct MatchReport {
    pub matches: Vec<MatchResult>,
    pub errors: Vec<PageError>,
    /// Number of plot pages in the document.
    pub pages: usize,
    /// The run stopped early; pages after the last processed one have no entries.
    pub cancelled: bool,
}

impl MatchReport {
    /// Distinct plot pages with at least one match.
    pub fn matched_pages(&self) -> Vec<usize> {
        let mut pages = self.matches.iter().map(|it| it.page).collect::<Vec<_>>();
        pages.dedup();
        pages
    }

    pub fn recognition_failures(&self) -> impl Iterator<Item = &MatchResult> {
        self.matches
            .iter()
            .filter(|it| it.recognition_error.is_some())
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && !self.cancelled && self.recognition_failures().next().is_none()
    }
}
