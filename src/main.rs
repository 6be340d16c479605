use std::{path::PathBuf, time::Instant};

use anyhow::{Context, Result};
use clap::Parser;
use plotmatch::{
    AreaThreshold, AutoRasterizer, MatchOptions, MatchReport, OnnxRecognizerBuilder, PlotMatcher,
};
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

/// Match plot outlines against a master plan and read the label of each match.
#[derive(Debug, Parser)]
#[command(name = "plotmatch", version)]
struct Args {
    /// Multi-page plot document (PDF or raster image)
    plots: PathBuf,

    /// Master plan document; only its first page is used
    master: PathBuf,

    /// JSON file with match options; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Rasterisation resolution
    #[arg(long)]
    dpi: Option<u32>,

    /// Minimum outline area in square millimetres
    #[arg(long)]
    min_area_mm2: Option<f64>,

    /// Process plot pages in parallel
    #[arg(long)]
    parallel: bool,

    #[arg(long, env = "PLOTMATCH_DET_MODEL")]
    det_model: Option<PathBuf>,

    #[arg(long, env = "PLOTMATCH_CLS_MODEL")]
    cls_model: Option<PathBuf>,

    #[arg(long, env = "PLOTMATCH_REC_MODEL", requires = "keys")]
    rec_model: Option<PathBuf>,

    #[arg(long, env = "PLOTMATCH_KEYS", requires = "rec_model")]
    keys: Option<PathBuf>,

    /// ONNX Runtime threads per model
    #[arg(long, default_value_t = 4)]
    threads: usize,

    /// Directory containing the pdfium library
    #[cfg(feature = "pdf")]
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium: Option<PathBuf>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let options = options(&args)?;

    let mut recognizer = OnnxRecognizerBuilder::new().threads(args.threads);
    if let Some(path) = &args.det_model {
        recognizer = recognizer.det_model(path);
    }
    if let Some(path) = &args.cls_model {
        recognizer = recognizer.cls_model(path);
    }
    if let (Some(model), Some(keys)) = (&args.rec_model, &args.keys) {
        recognizer = recognizer.rec_model(model, keys);
    }
    let recognizer = recognizer
        .build()
        .context("Failed to load text recognition models")?;

    let matcher = PlotMatcher::builder()
        .options(options)
        .rasterizer(rasterizer(&args))
        .recognizer(recognizer)
        .build()?;

    let plots = std::fs::read(&args.plots)
        .with_context(|| format!("Failed to read {}", args.plots.display()))?;
    let master = std::fs::read(&args.master)
        .with_context(|| format!("Failed to read {}", args.master.display()))?;

    let start = Instant::now();
    let report = matcher.run(&plots, &master)?;
    log::debug!("Matched in {:?}", start.elapsed());

    if args.json {
        println!("{}", serde_json::to_string_pretty(&to_json(&report))?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn options(args: &Args) -> Result<MatchOptions> {
    let mut options = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str::<MatchOptions>(&text)
                .with_context(|| format!("Invalid options in {}", path.display()))?
        }
        None => MatchOptions::default(),
    };
    if let Some(dpi) = args.dpi {
        options.dpi = dpi;
    }
    if let Some(area) = args.min_area_mm2 {
        options.extraction.min_area = AreaThreshold::SquareMillimetres(area);
    }
    options.parallel |= args.parallel;
    Ok(options)
}

#[cfg(feature = "pdf")]
fn rasterizer(args: &Args) -> AutoRasterizer {
    let mut pdf = plotmatch::PdfRasterizer::new();
    if let Some(path) = &args.pdfium {
        pdf = pdf.library_path(path);
    }
    AutoRasterizer::with_pdf(pdf)
}

#[cfg(not(feature = "pdf"))]
fn rasterizer(_: &Args) -> AutoRasterizer {
    AutoRasterizer::new()
}

fn print_report(report: &MatchReport) {
    for result in &report.matches {
        match &result.recognition_error {
            None => println!("page {}: {}", result.page + 1, result.text),
            Some(error) => println!("page {}: <unreadable: {error}>", result.page + 1),
        }
    }
    for error in &report.errors {
        eprintln!("error: {error}");
    }
    eprintln!(
        "{} matches on {} of {} pages{}",
        report.matches.len(),
        report.matched_pages().len(),
        report.pages,
        if report.cancelled { ", cancelled" } else { "" }
    );
}

fn to_json(report: &MatchReport) -> serde_json::Value {
    let matches = report
        .matches
        .iter()
        .map(|result| {
            serde_json::json!({
                "page": result.page,
                "text": result.text,
                "tokens": result.tokens,
                "plot_polygon": points(&result.plot),
                "master_polygon": points(&result.master),
                "recognition_error": result.recognition_error,
            })
        })
        .collect::<Vec<_>>();
    serde_json::json!({
        "pages": report.pages,
        "cancelled": report.cancelled,
        "matches": matches,
        "errors": report.errors,
    })
}

fn points(outline: &plotmatch::Outline) -> Vec<[i32; 2]> {
    outline.vertices().iter().map(|p| [p.x, p.y]).collect()
}
