use std::path::Path;

use float_ord::FloatOrd;
use image::{imageops::FilterType, DynamicImage};
use ndarray::Axis;
use ort::{inputs, Session};
use tracing::instrument;

use crate::{
    error::RecognitionError,
    session::{self, ExecutionProvider},
    util::subtract_mean_normalize,
};

const DEST_WIDTH: u32 = 192;
const DEST_HEIGHT: u32 = 48;

const MEAN_VALUES: [f32; 3] = [0.5, 0.5, 0.5];
const NORM_VALUES: [f32; 3] = [2.0, 2.0, 2.0];

/// Class 1 means the line is upside down.
#[derive(Debug, Clone, Copy)]
pub struct Angle {
    pub index: usize,
    pub score: f32,
}

impl Angle {
    pub fn is_flipped(&self) -> bool {
        self.index == 1
    }
}

/// Upright / upside-down classifier for cropped text lines.
pub struct OrientationClassifier {
    session: Session,
}

impl OrientationClassifier {
    pub fn init(path: &Path, threads: usize, providers: &[ExecutionProvider]) -> ort::Result<Self> {
        Ok(Self {
            session: session::load(path, threads, providers)?,
        })
    }

    /// With `most_angle`, every line gets the majority orientation.
    #[instrument(level = "debug", skip(self, images))]
    pub fn classify(
        &self,
        images: &[DynamicImage],
        most_angle: bool,
    ) -> Result<Vec<Angle>, RecognitionError> {
        let mut angles = images
            .iter()
            .map(|image| self.classify_one(image))
            .collect::<Result<Vec<_>, _>>()?;

        if most_angle && !angles.is_empty() {
            let flipped = angles.iter().filter(|angle| angle.is_flipped()).count();
            let majority = if flipped * 2 > angles.len() { 1 } else { 0 };
            for angle in angles.iter_mut() {
                angle.index = majority;
            }
        }

        Ok(angles)
    }

    #[instrument(level = "trace", skip(self, image))]
    fn classify_one(&self, image: &DynamicImage) -> Result<Angle, RecognitionError> {
        let image = image.resize_exact(DEST_WIDTH, DEST_HEIGHT, FilterType::Nearest);
        let image =
            subtract_mean_normalize(&image, &MEAN_VALUES, &NORM_VALUES).insert_axis(Axis(0));
        let outputs = self.session.run(inputs!["x" => image]?)?;
        let (_, output) = outputs
            .first_key_value()
            .ok_or_else(|| RecognitionError::UnexpectedOutput("classifier has no outputs".into()))?;

        output
            .try_extract_tensor::<f32>()?
            .iter()
            .enumerate()
            .max_by_key(|(_, score)| FloatOrd(**score))
            .map(|(index, score)| Angle {
                index,
                score: *score,
            })
            .ok_or_else(|| RecognitionError::UnexpectedOutput("empty classifier output".into()))
    }
}
