//! ONNX Runtime text recognizer: DB detection, optional orientation
//! classification and CRNN line recognition.

use std::path::PathBuf;

use float_ord::FloatOrd;
use geo::BoundingRect;
use image::DynamicImage;
use tracing::instrument;

use crate::{
    error::RecognitionError,
    line_recognizer::{LineRecognizer, TextLine},
    orientation::OrientationClassifier,
    raster::RasterImage,
    recognizer::TextRecognizer,
    session::{ExecutionProvider, DEFAULT_PROVIDERS},
    text_detector::{TextBox, TextDetector},
    util::{crop_to_box, scale_normalized},
};

/// Boxes whose tops fall in the same band of this height are read left to right.
const LINE_BAND: f32 = 16.0;

#[derive(Debug, Clone, Copy)]
pub struct DetectionOptions {
    /// Longest side fed to the detector; 0 keeps the recognizer's default.
    pub max_side_len: u32,
    /// Minimum mean probability for a box to be kept.
    pub box_score_threshold: f32,
    /// Binarisation threshold on the probability map.
    pub box_threshold: f32,
    pub unclip_ratio: f32,
    pub most_angle: bool,
}

impl Default for DetectionOptions {
    fn default() -> Self {
        Self {
            max_side_len: 0,
            box_score_threshold: 0.5,
            box_threshold: 0.3,
            unclip_ratio: 1.6,
            most_angle: true,
        }
    }
}

/// A recognised line and where it was found.
#[derive(Debug, Clone)]
pub struct OcrLine {
    pub bounds: TextBox,
    pub text: TextLine,
}

pub struct OnnxRecognizerBuilder {
    threads: usize,
    det_path: Option<PathBuf>,
    cls_path: Option<PathBuf>,
    rec_paths: Option<(PathBuf, PathBuf)>,
    max_side_len: u32,
    options: DetectionOptions,
    execution_providers: Vec<ExecutionProvider>,
}

impl OnnxRecognizerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn det_model(mut self, path: impl Into<PathBuf>) -> Self {
        self.det_path = Some(path.into());
        self
    }

    pub fn cls_model(mut self, path: impl Into<PathBuf>) -> Self {
        self.cls_path = Some(path.into());
        self
    }

    pub fn rec_model(
        mut self,
        model_path: impl Into<PathBuf>,
        keys_path: impl Into<PathBuf>,
    ) -> Self {
        self.rec_paths = Some((model_path.into(), keys_path.into()));
        self
    }

    pub fn max_side_len(mut self, max_side_len: u32) -> Self {
        self.max_side_len = max_side_len;
        self
    }

    pub fn detection_options(mut self, options: DetectionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_execution_providers(
        mut self,
        providers: impl IntoIterator<Item = ExecutionProvider>,
    ) -> Self {
        self.execution_providers = providers.into_iter().collect();
        self
    }

    #[instrument(skip(self))]
    pub fn build(self) -> Result<OnnxRecognizer, RecognitionError> {
        let det_path = self
            .det_path
            .unwrap_or_else(|| "models/ch_PP-OCRv4_det_infer/ch_PP-OCRv4_det_infer.onnx".into());
        let (rec_path, keys_path) = self.rec_paths.unwrap_or_else(|| {
            (
                "models/ch_PP-OCRv4_rec_infer/ch_PP-OCRv4_rec_infer.onnx".into(),
                "models/ppocr_keys_v1.txt".into(),
            )
        });
        let providers = &self.execution_providers;

        let detector = TextDetector::init(&det_path, self.threads, providers)?;
        let classifier = self
            .cls_path
            .map(|path| OrientationClassifier::init(&path, self.threads, providers))
            .transpose()?;
        let lines = LineRecognizer::init(&rec_path, &keys_path, self.threads, providers)?;

        Ok(OnnxRecognizer {
            detector,
            classifier,
            lines,
            max_side_len: self.max_side_len,
            options: self.options,
        })
    }
}

impl Default for OnnxRecognizerBuilder {
    fn default() -> Self {
        Self {
            threads: 4,
            det_path: None,
            cls_path: None,
            rec_paths: None,
            max_side_len: 1024,
            options: DetectionOptions::default(),
            execution_providers: DEFAULT_PROVIDERS.to_vec(),
        }
    }
}

pub struct OnnxRecognizer {
    detector: TextDetector,
    classifier: Option<OrientationClassifier>,
    lines: LineRecognizer,
    max_side_len: u32,
    options: DetectionOptions,
}

impl OnnxRecognizer {
    /// Detects and reads every text line in `image`, in reading order.
    #[instrument(skip(self, image))]
    pub fn read(&self, image: &DynamicImage) -> Result<Vec<OcrLine>, RecognitionError> {
        let max_side_len = match self.options.max_side_len {
            0 => self.max_side_len,
            requested => requested.min(self.max_side_len),
        };
        let scale = scale_normalized(image, max_side_len);
        let mut boxes = self.detector.detect(image, scale, &self.options)?;
        boxes.sort_by_key(reading_key);

        let (boxes, mut crops): (Vec<_>, Vec<_>) = boxes
            .into_iter()
            .filter_map(|it| crop_to_box(image, &it.rect).map(|crop| (it, crop)))
            .unzip();
        #[cfg(feature = "debug")]
        for (i, crop) in crops.iter().enumerate() {
            if let Err(e) = crop.save(format!("part_images/line{i}.png")) {
                log::warn!("Failed to save line crop {i}: {e}");
            }
        }

        if let Some(classifier) = &self.classifier {
            let angles = classifier.classify(&crops, self.options.most_angle)?;
            for (crop, angle) in crops.iter_mut().zip(angles) {
                if angle.is_flipped() {
                    *crop = crop.rotate180();
                }
            }
        }

        let text_lines = self.lines.recognize_lines(&crops)?;

        Ok(boxes
            .into_iter()
            .zip(text_lines)
            .map(|(bounds, text)| OcrLine { bounds, text })
            .collect())
    }
}

impl TextRecognizer for OnnxRecognizer {
    fn recognize(&self, region: &RasterImage) -> Result<Vec<String>, RecognitionError> {
        Ok(self
            .read(region.pixels())?
            .into_iter()
            .map(|line| line.text.text.trim().to_string())
            .filter(|text| !text.is_empty())
            .collect())
    }
}

fn reading_key(it: &TextBox) -> (i64, FloatOrd<f32>) {
    let (top, left) = it
        .rect
        .bounding_rect()
        .map(|rect| (rect.min().y, rect.min().x))
        .unwrap_or_default();
    ((top / LINE_BAND).floor() as i64, FloatOrd(left))
}
