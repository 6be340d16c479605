use std::sync::Arc;

use crate::{error::RecognitionError, raster::RasterImage};

/// Reads text from a masked region.
///
/// Tokens are returned in the engine's own reading order. A region with no readable
/// text yields an empty list, not an error.
pub trait TextRecognizer: Send + Sync {
    fn recognize(&self, region: &RasterImage) -> Result<Vec<String>, RecognitionError>;
}

impl<T: TextRecognizer + ?Sized> TextRecognizer for Arc<T> {
    fn recognize(&self, region: &RasterImage) -> Result<Vec<String>, RecognitionError> {
        (**self).recognize(region)
    }
}

impl<T: TextRecognizer + ?Sized> TextRecognizer for Box<T> {
    fn recognize(&self, region: &RasterImage) -> Result<Vec<String>, RecognitionError> {
        (**self).recognize(region)
    }
}
