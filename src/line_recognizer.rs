use std::path::Path;

use float_ord::FloatOrd;
use image::{imageops::FilterType, DynamicImage};
use ndarray::{ArrayView2, Axis, Ix2};
use ort::{inputs, Session};
use tracing::instrument;

use crate::{
    error::RecognitionError,
    session::{self, ExecutionProvider},
    util::subtract_mean_normalize,
};

const MEAN_VALUES: [f32; 3] = [0.5, 0.5, 0.5];
const NORM_VALUES: [f32; 3] = [2.0, 2.0, 2.0];
const DEST_HEIGHT: u32 = 48;

/// One recognised line with per-character confidences.
#[derive(Debug, Clone, Default)]
pub struct TextLine {
    pub text: String,
    pub character_scores: Vec<f32>,
}

/// CRNN line recognition model with CTC greedy decoding.
pub struct LineRecognizer {
    session: Session,
    keys: Vec<String>,
}

impl LineRecognizer {
    pub fn init(
        model_path: &Path,
        keys_path: &Path,
        threads: usize,
        providers: &[ExecutionProvider],
    ) -> Result<Self, RecognitionError> {
        let session = session::load(model_path, threads, providers)?;

        let keys =
            std::fs::read_to_string(keys_path).map_err(|source| RecognitionError::Keys {
                path: keys_path.to_path_buf(),
                source,
            })?;
        // index 0 is the CTC blank, the last class is a space
        let keys = ["#".to_string()]
            .into_iter()
            .chain(keys.lines().map(str::to_string))
            .chain([" ".to_string()])
            .collect::<Vec<_>>();
        log::debug!("Loaded {} recognition keys", keys.len());

        Ok(Self { session, keys })
    }

    #[instrument(level = "debug", skip(self, images))]
    pub fn recognize_lines(&self, images: &[DynamicImage]) -> Result<Vec<TextLine>, RecognitionError> {
        images
            .iter()
            .map(|image| self.recognize_line(image))
            .collect()
    }

    #[instrument(level = "trace", skip(self, image))]
    fn recognize_line(&self, image: &DynamicImage) -> Result<TextLine, RecognitionError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(TextLine::default());
        }
        let scale = DEST_HEIGHT as f32 / image.height() as f32;
        let dest_width = ((image.width() as f32 * scale) as u32).clamp(1, u16::MAX as u32);
        let image = image.resize_exact(dest_width, DEST_HEIGHT, FilterType::Nearest);

        let tensor_values =
            subtract_mean_normalize(&image, &MEAN_VALUES, &NORM_VALUES).insert_axis(Axis(0));
        let outputs = self.session.run(inputs!["x" => tensor_values]?)?;
        let (_, output) = outputs
            .first_key_value()
            .ok_or_else(|| RecognitionError::UnexpectedOutput("recognizer has no outputs".into()))?;

        // (1, T, classes)
        let scores = output
            .try_extract_tensor::<f32>()?
            .remove_axis(Axis(0))
            .into_dimensionality::<Ix2>()
            .map_err(|e| RecognitionError::UnexpectedOutput(e.to_string()))?;
        log::trace!("Recognition scores: {:?}", scores.dim());

        Ok(ctc_decode(scores, &self.keys))
    }
}

/// Greedy CTC decoding: best class per step, blanks dropped, repeats collapsed.
fn ctc_decode(scores: ArrayView2<f32>, keys: &[String]) -> TextLine {
    let mut line = TextLine::default();
    let mut previous = None;
    for step in scores.outer_iter() {
        let Some((index, score)) = step
            .indexed_iter()
            .max_by_key(|(_, value)| FloatOrd(**value))
            .map(|(index, value)| (index, *value))
        else {
            continue;
        };
        if index > 0 && index < keys.len() && previous != Some(index) {
            line.text.push_str(&keys[index]);
            line.character_scores.push(score);
        }
        previous = Some(index);
    }
    line
}
