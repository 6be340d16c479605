//! Error types.
//!
//! [`PlotMatchError`] is fatal: one of the two input documents cannot be used
//! at all, or the matcher is misconfigured, so no page is processed.
//! [`PageError`] is scoped to a single plot page and ends up in
//! [`crate::MatchReport::errors`] while the remaining pages carry on.
//! [`RecognitionError`] never leaves the page either; it is attached to the
//! [`crate::MatchResult`] whose region could not be read.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::raster::DocumentKind;

/// Fatal errors that abort a run before any plot page is processed.
#[derive(Debug, Error)]
pub enum PlotMatchError {
    /// The document bytes could not be parsed by the rasteriser.
    #[error("{kind} document could not be read: {detail}")]
    UnreadableDocument { kind: DocumentKind, detail: String },

    /// The document parsed but contains no pages.
    #[error("{kind} document has no pages")]
    EmptyDocument { kind: DocumentKind },

    /// The document is in a format no compiled-in rasteriser understands.
    #[error("{kind} document format is not supported: {detail}")]
    UnsupportedFormat { kind: DocumentKind, detail: String },

    /// The rasteriser backend (e.g. the pdfium library) could not be loaded.
    #[error("rasteriser unavailable: {0}")]
    RasterizerUnavailable(String),

    /// The single master page could not be rendered.
    #[error("master page could not be rasterised: {detail}")]
    MasterPage { detail: String },

    /// Option validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// A failure scoped to one plot page. Page indices are 0-based.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum PageError {
    #[error("page {page}: rasterisation failed: {detail}")]
    RenderFailed { page: usize, detail: String },

    #[error("page {page}: rendered image is empty")]
    EmptyPage { page: usize },
}

impl PageError {
    pub fn page(&self) -> usize {
        match self {
            Self::RenderFailed { page, .. } | Self::EmptyPage { page } => *page,
        }
    }
}

/// Failure of a [`crate::TextRecognizer`] on one masked region.
#[derive(Debug, Error)]
pub enum RecognitionError {
    #[error(transparent)]
    Runtime(#[from] ort::Error),

    #[error("failed to read recognition keys '{path}': {source}")]
    Keys {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unexpected model output: {0}")]
    UnexpectedOutput(String),

    #[error("{0}")]
    Engine(String),
}
