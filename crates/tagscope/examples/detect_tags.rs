use image::ImageReader;
use tagscope::draw::{render_detections, RenderOptions, Visualization};
use tagscope::{CameraParams, Detector, DetectorOptions, SearchPaths};

#[cfg(feature = "tracing")]
use tagscope::core::init_tracing;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    #[cfg(feature = "tracing")]
    init_tracing(false);
    #[cfg(not(feature = "tracing"))]
    tagscope::core::init_from_env()?;

    let mut args = std::env::args().skip(1);
    let Some(path) = args.next() else {
        eprintln!("Usage: detect_tags <image_path> [overlay_path]");
        return Ok(());
    };
    let overlay_path = args.next();

    let detector = Detector::new(DetectorOptions::default(), &SearchPaths::from_env())?;
    let frame = ImageReader::open(&path)?.decode()?;

    let camera = CameraParams::new(3156.71852, 3129.52243, 359.097908, 239.736909)?;
    let opts = RenderOptions {
        visualization: Visualization::BoxesAndAxes,
        annotate: true,
        ..RenderOptions::new(camera, 0.0762)
    };
    let (reports, overlay) = render_detections(&detector, &frame, &opts)?;

    println!("Detected {} tags in {path}\n", reports.len());
    for (i, report) in reports.iter().enumerate() {
        println!("Detection {} of {}:\n", i + 1, reports.len());
        println!("{:2}\n{:2}\n", report.detection, report.pose);
    }

    if let Some(out) = overlay_path {
        overlay.save(&out)?;
        println!("overlay written to {out}");
    }
    Ok(())
}
