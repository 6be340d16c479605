use std::path::Path;

use geo::{Coord, MinimumRotatedRect, Polygon, Scale};
use image::{imageops::FilterType, DynamicImage, GrayImage};
use imageproc::{
    contours::find_contours,
    contrast::{threshold_mut, ThresholdType},
    distance_transform::Norm,
    morphology::dilate_mut,
};
use ndarray::{ArrayView2, Axis, Ix2};
use ort::{inputs, Session};
use tracing::instrument;

use crate::{
    error::RecognitionError,
    ocr::DetectionOptions,
    session::{self, ExecutionProvider},
    util::{self, box_score_fast, max_side, subtract_mean_normalize, to_geo_poly, to_luma_image, unclip},
};

const MEAN_VALUES: [f32; 3] = [0.485, 0.456, 0.406];
const NORM_VALUES: [f32; 3] = [1.0 / 0.229, 1.0 / 0.224, 1.0 / 0.225];

const MAX_CANDIDATES: usize = 1000;
const LONG_SIDE_THRESHOLD: f32 = 3.0;

/// A detected text box in source image coordinates.
#[derive(Debug, Clone)]
pub struct TextBox {
    pub score: f32,
    pub rect: Polygon<f32>,
}

/// DB text detection model.
pub struct TextDetector {
    session: Session,
}

impl TextDetector {
    pub fn init(
        path: &Path,
        threads: usize,
        providers: &[ExecutionProvider],
    ) -> ort::Result<Self> {
        Ok(Self {
            session: session::load(path, threads, providers)?,
        })
    }

    #[instrument(skip(self, image), level = "debug")]
    pub fn detect(
        &self,
        image: &DynamicImage,
        scale: util::Scale,
        options: &DetectionOptions,
    ) -> Result<Vec<TextBox>, RecognitionError> {
        let image =
            image.resize_exact(scale.target_width, scale.target_height, FilterType::Nearest);
        let input_values =
            subtract_mean_normalize(&image, &MEAN_VALUES, &NORM_VALUES).insert_axis(Axis(0));
        let outputs = self.session.run(inputs!["x" => input_values]?)?;
        let (_, output) = outputs
            .first_key_value()
            .ok_or_else(|| RecognitionError::UnexpectedOutput("detector has no outputs".into()))?;

        // (1, 1, H, W) probability map
        let pred_data = output
            .try_extract_tensor::<f32>()?
            .to_owned()
            .remove_axis(Axis(0))
            .remove_axis(Axis(0))
            .into_dimensionality::<Ix2>()
            .map_err(|e| RecognitionError::UnexpectedOutput(e.to_string()))?;

        let mut binary = to_luma_image(pred_data.view()).ok_or_else(|| {
            RecognitionError::UnexpectedOutput("probability map has no pixels".into())
        })?;
        let threshold = (options.box_threshold * 255.0) as u8;
        threshold_mut(&mut binary, threshold, ThresholdType::Binary);
        dilate_mut(&mut binary, Norm::L1, 2);

        Ok(find_boxes(pred_data.view(), binary, scale, options))
    }
}

#[instrument(skip(pred_data, image), level = "trace")]
fn find_boxes(
    pred_data: ArrayView2<f32>,
    image: GrayImage,
    util::Scale {
        factor_x, factor_y, ..
    }: util::Scale,
    options: &DetectionOptions,
) -> Vec<TextBox> {
    find_contours::<i32>(&image)
        .into_iter()
        .take(MAX_CANDIDATES)
        .filter(|it| it.points.len() > 2)
        .filter_map(|it| to_geo_poly(&it.points).minimum_rotated_rect())
        .map(|rect| {
            let side = max_side(&rect);
            (rect, side)
        })
        .filter(|(_, side)| *side >= LONG_SIDE_THRESHOLD)
        .map(|(rect, _)| {
            let score = box_score_fast(&rect, pred_data.view());
            (rect, score)
        })
        .filter(|(_, score)| *score >= options.box_score_threshold)
        .filter_map(|(rect, score)| Some((unclip(rect, options.unclip_ratio)?, score)))
        .filter(|(rect, _)| max_side(rect) >= LONG_SIDE_THRESHOLD + 2.0)
        .map(|(rect, score)| TextBox {
            score,
            rect: rect.scale_around_point(factor_x, factor_y, Coord::zero()),
        })
        .collect()
}
