use std::{
    io::Cursor,
    sync::{Arc, Mutex},
};

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use imageproc::{
    drawing::{draw_filled_rect_mut, draw_hollow_rect_mut},
    rect::Rect,
};
use plotmatch::{
    CancellationToken, DocumentKind, MatchOptions, MatchProgress, PageError, PageRef, PageRender,
    PlotMatchError, PlotMatcher, RasterImage, Rasterizer, RecognitionError, Stage, TextRecognizer,
};

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const BLACK: Rgb<u8> = Rgb([0, 0, 0]);
const RED: Rgb<u8> = Rgb([255, 0, 0]);
const BLUE: Rgb<u8> = Rgb([0, 0, 255]);

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn blank_page() -> RgbImage {
    RgbImage::from_pixel(400, 300, WHITE)
}

/// Three pixel wide rectangle outline.
fn outline(image: &mut RgbImage, x: i32, y: i32, width: u32, height: u32) {
    for inset in 0..3 {
        let shrink = 2 * inset as u32;
        let rect = Rect::at(x + inset, y + inset).of_size(width - shrink, height - shrink);
        draw_hollow_rect_mut(image, rect, BLACK);
    }
}

/// Master plan with two parcels, A on the left and B on the right. Each parcel holds
/// a coloured label standing in for printed text.
fn master_page(labels: bool) -> RgbImage {
    let mut image = blank_page();
    outline(&mut image, 20, 20, 160, 200);
    outline(&mut image, 220, 20, 160, 200);
    if labels {
        draw_filled_rect_mut(&mut image, Rect::at(70, 160).of_size(40, 40), RED);
        draw_filled_rect_mut(&mut image, Rect::at(270, 160).of_size(40, 40), BLUE);
    }
    image
}

fn plot_in_a() -> RgbImage {
    let mut image = blank_page();
    outline(&mut image, 60, 60, 80, 80);
    image
}

fn plot_in_b() -> RgbImage {
    let mut image = blank_page();
    outline(&mut image, 260, 60, 80, 80);
    image
}

fn raster(document: DocumentKind, index: usize, image: RgbImage) -> PageRender {
    Ok(RasterImage::new(
        PageRef { document, index },
        300,
        DynamicImage::ImageRgb8(image),
    ))
}

fn png(image: RgbImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("Failed to encode test image");
    bytes
}

/// Hands out prepared pages regardless of the document bytes.
struct PreparedPages {
    plots: Vec<PageRender>,
    master: Vec<PageRender>,
}

impl PreparedPages {
    fn new(plots: Vec<RgbImage>, master: RgbImage) -> Self {
        Self {
            plots: plots
                .into_iter()
                .enumerate()
                .map(|(i, image)| raster(DocumentKind::Plot, i, image))
                .collect(),
            master: vec![raster(DocumentKind::Master, 0, master)],
        }
    }
}

impl Rasterizer for PreparedPages {
    fn rasterize(
        &self,
        _document: &[u8],
        kind: DocumentKind,
        _dpi: u32,
    ) -> Result<Vec<PageRender>, PlotMatchError> {
        Ok(match kind {
            DocumentKind::Plot => self.plots.clone(),
            DocumentKind::Master => self.master.clone(),
        })
    }
}

/// Reads the coloured labels drawn by [`master_page`].
struct ColourLabels;

impl TextRecognizer for ColourLabels {
    fn recognize(&self, region: &RasterImage) -> Result<Vec<String>, RecognitionError> {
        let pixels = region.pixels().to_rgb8();
        let has = |colour: Rgb<u8>| pixels.pixels().any(|p| *p == colour);
        let mut tokens = Vec::new();
        if has(RED) {
            tokens.extend(["LOT".to_string(), "A".to_string()]);
        }
        if has(BLUE) {
            tokens.extend(["LOT".to_string(), "B".to_string()]);
        }
        Ok(tokens)
    }
}

struct Broken;

impl TextRecognizer for Broken {
    fn recognize(&self, _region: &RasterImage) -> Result<Vec<String>, RecognitionError> {
        Err(RecognitionError::Engine("engine crashed".into()))
    }
}

fn matcher(pages: PreparedPages) -> PlotMatcher {
    PlotMatcher::builder()
        .rasterizer(pages)
        .recognizer(ColourLabels)
        .build()
        .expect("Failed to build matcher")
}

#[test]
fn matches_each_plot_page_to_its_parcel() {
    init_logger();
    let matcher = matcher(PreparedPages::new(
        vec![plot_in_a(), plot_in_b()],
        master_page(true),
    ));

    let report = matcher.run(b"plots", b"master").expect("Run failed");

    assert!(report.is_clean());
    assert_eq!(report.pages, 2);
    assert_eq!(report.matches.len(), 2);
    assert_eq!(report.matches[0].page, 0);
    assert_eq!(report.matches[0].text, "LOT A");
    assert_eq!(report.matches[0].tokens, ["LOT", "A"]);
    assert_eq!(report.matches[1].page, 1);
    assert_eq!(report.matches[1].text, "LOT B");
    assert_eq!(report.matched_pages(), [0, 1]);

    for result in &report.matches {
        assert!(result.master.contains(&result.plot));
        assert_eq!(result.plot_image.page(), PageRef::plot(result.page));
        assert_eq!(result.master.page(), PageRef::master(0));
    }
}

#[test]
fn unrenderable_page_does_not_stop_the_run() {
    init_logger();
    let mut pages = PreparedPages::new(vec![plot_in_a(), plot_in_a(), plot_in_b()], master_page(true));
    pages.plots[1] = Err(PageError::RenderFailed {
        page: 1,
        detail: "corrupt content stream".into(),
    });

    let report = matcher(pages).run(b"plots", b"master").expect("Run failed");

    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].page(), 1);
    assert_eq!(report.matched_pages(), [0, 2]);
    assert_eq!(report.matches[0].text, "LOT A");
    assert_eq!(report.matches[1].text, "LOT B");
    assert!(!report.is_clean());
}

#[test]
fn empty_page_is_a_page_error() {
    init_logger();
    let mut pages = PreparedPages::new(vec![plot_in_a(), plot_in_b()], master_page(true));
    pages.plots[0] = Ok(RasterImage::new(
        PageRef::plot(0),
        300,
        DynamicImage::new_rgb8(0, 0),
    ));

    let report = matcher(pages).run(b"plots", b"master").expect("Run failed");

    assert_eq!(report.errors, [PageError::EmptyPage { page: 0 }]);
    assert_eq!(report.matched_pages(), [1]);
}

#[test]
fn master_without_outlines_matches_nothing() {
    init_logger();
    let matcher = matcher(PreparedPages::new(vec![plot_in_a(), plot_in_b()], blank_page()));

    let report = matcher.run(b"plots", b"master").expect("Run failed");

    assert!(report.matches.is_empty());
    assert!(report.errors.is_empty());
    assert_eq!(report.pages, 2);
}

#[test]
fn plot_outside_every_parcel_is_left_out() {
    init_logger();
    let mut straddling = blank_page();
    outline(&mut straddling, 140, 60, 120, 80);
    let matcher = matcher(PreparedPages::new(
        vec![straddling, plot_in_b()],
        master_page(true),
    ));

    let report = matcher.run(b"plots", b"master").expect("Run failed");

    assert!(report.errors.is_empty());
    assert_eq!(report.matched_pages(), [1]);
}

#[test]
fn unlabelled_parcel_yields_empty_text() {
    init_logger();
    let matcher = matcher(PreparedPages::new(vec![plot_in_a()], master_page(false)));

    let report = matcher.run(b"plots", b"master").expect("Run failed");

    assert_eq!(report.matches.len(), 1);
    assert_eq!(report.matches[0].text, "");
    assert!(report.matches[0].tokens.is_empty());
    assert!(report.matches[0].recognition_error.is_none());
}

#[test]
fn recognition_failure_is_attached_to_the_match() {
    init_logger();
    let matcher = PlotMatcher::builder()
        .rasterizer(PreparedPages::new(vec![plot_in_a(), plot_in_b()], master_page(true)))
        .recognizer(Broken)
        .build()
        .expect("Failed to build matcher");

    let report = matcher.run(b"plots", b"master").expect("Run failed");

    assert_eq!(report.matches.len(), 2);
    assert!(report.errors.is_empty());
    assert_eq!(report.recognition_failures().count(), 2);
    for result in &report.matches {
        assert_eq!(result.text, "");
        let error = result.recognition_error.as_deref().unwrap_or_default();
        assert!(error.contains("engine crashed"), "{error}");
    }
}

#[test]
fn parallel_run_keeps_page_order() {
    init_logger();
    let plots = (0..6)
        .map(|i| if i % 2 == 0 { plot_in_a() } else { plot_in_b() })
        .collect();
    let matcher = PlotMatcher::builder()
        .parallel(true)
        .rasterizer(PreparedPages::new(plots, master_page(true)))
        .recognizer(ColourLabels)
        .build()
        .expect("Failed to build matcher");

    let report = matcher.run(b"plots", b"master").expect("Run failed");

    assert_eq!(report.matched_pages(), [0, 1, 2, 3, 4, 5]);
    for result in &report.matches {
        let expected = if result.page % 2 == 0 { "LOT A" } else { "LOT B" };
        assert_eq!(result.text, expected);
    }
}

#[derive(Default)]
struct Recorder {
    stages: Mutex<Vec<Stage>>,
    completed: Mutex<Vec<(usize, usize)>>,
    failed: Mutex<Vec<usize>>,
    cancel_after_first: Option<CancellationToken>,
}

impl MatchProgress for Recorder {
    fn on_stage(&self, stage: Stage) {
        self.stages.lock().unwrap().push(stage);
    }

    fn on_page_complete(&self, page: usize, _total: usize, matches: usize) {
        self.completed.lock().unwrap().push((page, matches));
        if let Some(token) = &self.cancel_after_first {
            token.cancel();
        }
    }

    fn on_page_error(&self, error: &PageError) {
        self.failed.lock().unwrap().push(error.page());
    }
}

#[test]
fn progress_reports_stages_and_pages() {
    init_logger();
    let recorder = Arc::new(Recorder::default());
    let mut pages = PreparedPages::new(vec![plot_in_a(), plot_in_b(), plot_in_a()], master_page(true));
    pages.plots[2] = Err(PageError::RenderFailed {
        page: 2,
        detail: "bad page".into(),
    });
    let matcher = PlotMatcher::builder()
        .rasterizer(pages)
        .recognizer(ColourLabels)
        .progress(recorder.clone())
        .build()
        .expect("Failed to build matcher");

    assert_eq!(*recorder.stages.lock().unwrap(), [Stage::Idle]);

    matcher.run(b"plots", b"master").expect("Run failed");

    assert_eq!(
        *recorder.stages.lock().unwrap(),
        [
            Stage::Idle,
            Stage::RasterizingPlots,
            Stage::RasterizingMaster,
            Stage::ExtractingMasterPolygons,
            Stage::ProcessingPages { total: 3 },
            Stage::Done,
        ]
    );
    assert_eq!(*recorder.completed.lock().unwrap(), [(0, 1), (1, 1)]);
    assert_eq!(*recorder.failed.lock().unwrap(), [2]);
}

#[test]
fn cancelled_run_skips_remaining_pages() {
    init_logger();
    let token = CancellationToken::new();
    let recorder = Arc::new(Recorder {
        cancel_after_first: Some(token.clone()),
        ..Default::default()
    });
    let matcher = PlotMatcher::builder()
        .rasterizer(PreparedPages::new(
            vec![plot_in_a(), plot_in_b(), plot_in_a()],
            master_page(true),
        ))
        .recognizer(ColourLabels)
        .progress(recorder.clone())
        .build()
        .expect("Failed to build matcher");

    let report = matcher
        .run_with_cancellation(b"plots", b"master", &token)
        .expect("Run failed");

    assert!(report.cancelled);
    assert_eq!(report.matched_pages(), [0]);
    assert!(report.errors.is_empty());
    assert_eq!(*recorder.completed.lock().unwrap(), [(0, 1)]);
}

#[test]
fn cancelled_before_start_processes_nothing() {
    init_logger();
    let token = CancellationToken::new();
    token.cancel();
    let matcher = matcher(PreparedPages::new(vec![plot_in_a()], master_page(true)));

    let report = matcher
        .run_with_cancellation(b"plots", b"master", &token)
        .expect("Run failed");

    assert!(report.cancelled);
    assert!(report.matches.is_empty());
    assert_eq!(report.pages, 1);
}

#[test]
fn reads_encoded_images() {
    init_logger();
    let matcher = PlotMatcher::builder()
        .recognizer(ColourLabels)
        .build()
        .expect("Failed to build matcher");

    let report = matcher
        .run(&png(plot_in_b()), &png(master_page(true)))
        .expect("Run failed");

    assert_eq!(report.matches.len(), 1);
    assert_eq!(report.matches[0].text, "LOT B");
}

#[test]
fn unreadable_documents_abort_the_run() {
    init_logger();
    let matcher = PlotMatcher::builder()
        .recognizer(ColourLabels)
        .build()
        .expect("Failed to build matcher");
    let master = png(master_page(true));

    let err = matcher.run(b"not an image", &master).unwrap_err();
    assert!(matches!(
        err,
        PlotMatchError::UnreadableDocument {
            kind: DocumentKind::Plot,
            ..
        }
    ));

    let err = matcher.run(&png(plot_in_a()), b"").unwrap_err();
    assert!(matches!(
        err,
        PlotMatchError::EmptyDocument {
            kind: DocumentKind::Master
        }
    ));
}

#[test]
fn unrenderable_master_is_fatal() {
    init_logger();
    let mut pages = PreparedPages::new(vec![plot_in_a()], master_page(true));
    pages.master = vec![Err(PageError::RenderFailed {
        page: 0,
        detail: "broken".into(),
    })];

    let err = matcher(pages).run(b"plots", b"master").unwrap_err();

    assert!(matches!(err, PlotMatchError::MasterPage { .. }));
}

#[test]
fn builder_rejects_bad_configuration() {
    let missing_recognizer = PlotMatcher::builder().build();
    assert!(matches!(
        missing_recognizer,
        Err(PlotMatchError::InvalidConfig(_))
    ));

    let zero_dpi = PlotMatcher::builder()
        .dpi(0)
        .recognizer(ColourLabels)
        .build();
    assert!(matches!(zero_dpi, Err(PlotMatchError::InvalidConfig(_))));

    let mut options = MatchOptions::default();
    options.extraction.kernel_size = 4;
    let even_kernel = PlotMatcher::builder()
        .options(options)
        .recognizer(ColourLabels)
        .build();
    assert!(matches!(even_kernel, Err(PlotMatchError::InvalidConfig(_))));
}

// Needs the PP-OCR models under tests/data/models and an ONNX Runtime library.
#[test]
#[ignore]
fn onnx_recognizer_reads_a_parcel_label() {
    init_logger();

    let recognizer = plotmatch::OnnxRecognizerBuilder::new()
        .det_model("tests/data/models/det.onnx")
        .cls_model("tests/data/models/cls.onnx")
        .rec_model(
            "tests/data/models/rec.onnx",
            "tests/data/models/ppocr_keys_v1.txt",
        )
        .build()
        .expect("Failed to build engine");
    let label = image::open("tests/data/test_image.png").expect("Failed to load test image");
    let region = RasterImage::new(PageRef::master(0), 300, label);

    let tokens = recognizer.recognize(&region).expect("Failed recognition");
    assert!(!tokens.is_empty());
}
