use inference::{
    DetectorBuilder, DetectorConfig, annotate::draw_detections, backend::ort::OrtProvider,
    logging::setup_logging,
};
use preprocess::Frame;
use std::env;

fn main() -> anyhow::Result<()> {
    let config = DetectorConfig::from_env()?;

    setup_logging(&config);

    tracing::info!(
        config = ?config,
        "Loaded configuration"
    );

    let image_path = env::args()
        .nth(1)
        .or_else(|| env::var("INPUT_IMAGE").ok())
        .ok_or_else(|| anyhow::anyhow!("Usage: detect <image> (or set INPUT_IMAGE)"))?;

    let mut image = image::open(&image_path)?.to_rgb8();
    tracing::info!(
        path = %image_path,
        width = image.width(),
        height = image.height(),
        "Image loaded"
    );

    let mut detector = DetectorBuilder::new(OrtProvider::default(), config).build()?;

    let frame = Frame::rgb(image.as_raw(), image.width(), image.height());
    let detections = match detector.detect(&frame) {
        Ok(detections) => detections,
        Err(e) => {
            tracing::error!(error = %e, "Detection failed");
            Vec::new()
        }
    };

    tracing::info!(count = detections.len(), "Detection finished");

    for d in &detections {
        tracing::info!(
            label = detector.labels().name(d.label),
            class_id = d.label,
            confidence = d.confidence,
            x = d.x,
            y = d.y,
            width = d.width,
            height = d.height,
            inference_ms = d.processing_time.as_secs_f64() * 1000.0,
            "Detection"
        );
    }

    if let Ok(output_path) = env::var("OUTPUT_IMAGE") {
        draw_detections(&mut image, &detections, 3);
        image.save(&output_path)?;
        tracing::info!(path = %output_path, "Annotated image written");
    }

    detector.deinit();
    Ok(())
}
