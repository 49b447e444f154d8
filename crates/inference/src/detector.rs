use crate::backend::BackendProvider;
use crate::config::DetectorConfig;
use crate::engine::InferenceEngine;
use crate::error::DetectError;
use crate::labels::Labels;
use crate::processing::anchors::{ANCHORS_PER_SCALE, per_anchor};
use crate::processing::{DecodeContext, DetectionBox, PostProcessor};
use crate::tensor::{TensorBufferSet, TensorShape};
use common::span;
use preprocess::{Frame, LetterboxPreProcessor, LetterboxTransform, Preprocess, Roi};
use std::time::Instant;

/// Caller-supplied replacement for the letterbox step.
pub trait PreProcessHook {
    /// Fill `input` (laid out as `shape`) from `frame` and return the mapping
    /// back to `frame` coordinates.
    fn preprocess(
        &mut self,
        frame: &Frame<'_>,
        input: &mut [f32],
        shape: &TensorShape,
    ) -> anyhow::Result<LetterboxTransform>;
}

/// Caller-supplied replacement for anchor decoding.
///
/// `ctx.roi` is set when the frame was cropped; adding its origin to the
/// returned boxes is up to the hook.
pub trait PostProcessHook {
    fn postprocess(
        &mut self,
        outputs: &TensorBufferSet,
        ctx: &DecodeContext,
    ) -> anyhow::Result<Vec<DetectionBox>>;
}

enum PreProcessStrategy {
    Letterbox(LetterboxPreProcessor),
    Custom(Box<dyn PreProcessHook + Send>),
}

enum PostProcessStrategy {
    AnchorDecode(PostProcessor),
    Custom(Box<dyn PostProcessHook + Send>),
}

pub struct DetectorBuilder<P: BackendProvider> {
    provider: P,
    config: DetectorConfig,
    pre: Option<Box<dyn PreProcessHook + Send>>,
    post: Option<Box<dyn PostProcessHook + Send>>,
}

impl<P: BackendProvider> DetectorBuilder<P> {
    pub fn new(provider: P, config: DetectorConfig) -> Self {
        Self {
            provider,
            config,
            pre: None,
            post: None,
        }
    }

    pub fn with_pre_process(mut self, hook: impl PreProcessHook + Send + 'static) -> Self {
        self.pre = Some(Box::new(hook));
        self
    }

    pub fn with_post_process(mut self, hook: impl PostProcessHook + Send + 'static) -> Self {
        self.post = Some(Box::new(hook));
        self
    }

    /// Validate the configuration, load the model and check its tensor shapes.
    pub fn build(self) -> Result<Detector<P>, DetectError> {
        let _s = span!("detector_build");
        let config = self.config;

        config
            .validate()
            .map_err(|e| DetectError::Config(format!("{:#}", e)))?;

        let labels = match &config.labels_path {
            Some(path) => {
                Labels::load(path).map_err(|e| DetectError::Config(format!("{:#}", e)))?
            }
            None => Labels::default(),
        };

        let mut engine = InferenceEngine::new(self.provider);
        engine.set_output_layers(config.output_layers.clone())?;
        engine.init(&config.model_path, config.runtime)?;

        let input_layer = config.input_layers[0].clone();
        let input_shape = engine.input_shape(&input_layer);
        let (width, height) = match input_shape.dims() {
            &[1, h, w, 3] => (w, h),
            _ => {
                return Err(DetectError::Config(format!(
                    "Input '{}' has shape {}, expected [1, H, W, 3]",
                    input_layer, input_shape
                )));
            }
        };

        let pre = match self.pre {
            Some(hook) => PreProcessStrategy::Custom(hook),
            None => PreProcessStrategy::Letterbox(LetterboxPreProcessor::new((
                width as u32,
                height as u32,
            ))),
        };

        let post = match self.post {
            Some(hook) => PostProcessStrategy::Custom(hook),
            None => {
                check_output_shapes(&engine, &config)?;
                PostProcessStrategy::AnchorDecode(PostProcessor::new(
                    config.num_labels,
                    config.grids,
                ))
            }
        };

        if !labels.is_empty() && labels.len() != config.num_labels {
            tracing::warn!(
                labels = labels.len(),
                num_labels = config.num_labels,
                "Label file size differs from number of labels"
            );
        }

        tracing::info!(
            input = %input_layer,
            input_shape = %input_shape,
            output_tensors = ?config.output_tensors,
            roi = ?config.roi,
            "Detector ready"
        );

        Ok(Detector {
            engine,
            input_layer,
            input_shape,
            output_tensors: config.output_tensors,
            confidence_threshold: config.confidence_threshold,
            nms_threshold: config.nms_threshold,
            min_box_border: config.min_box_border,
            roi: config.roi.filter(|r| !r.is_empty()),
            pre,
            post,
            crop_buffer: Vec::new(),
            labels,
        })
    }
}

fn check_output_shapes<P: BackendProvider>(
    engine: &InferenceEngine<P>,
    config: &DetectorConfig,
) -> Result<(), DetectError> {
    let channels = ANCHORS_PER_SCALE * per_anchor(config.num_labels);

    for name in &config.output_tensors {
        let shape = engine.output_shape(name);
        match shape.dims() {
            &[1, h, w, c] if h > 0 && w > 0 && c == channels => {}
            _ => {
                return Err(DetectError::Config(format!(
                    "Output '{}' has shape {}, expected [1, H, W, {}]",
                    name, shape, channels
                )));
            }
        }
    }

    Ok(())
}

/// Single-model detection pipeline: crop, pre-process, execute, post-process.
///
/// Not safe for concurrent use; hold one detector per worker.
pub struct Detector<P: BackendProvider> {
    engine: InferenceEngine<P>,
    input_layer: String,
    input_shape: TensorShape,
    output_tensors: Vec<String>,
    confidence_threshold: f32,
    nms_threshold: f32,
    min_box_border: f32,
    roi: Option<Roi>,
    pre: PreProcessStrategy,
    post: PostProcessStrategy,
    crop_buffer: Vec<u8>,
    labels: Labels,
}

impl<P: BackendProvider> Detector<P> {
    /// Run detection on one RGB frame.
    ///
    /// Boxes are in `frame` pixel coordinates, in suppression order.
    pub fn detect(&mut self, frame: &Frame<'_>) -> Result<Vec<DetectionBox>, DetectError> {
        let _s = span!("detect");

        if !self.engine.is_initialized() {
            return Err(DetectError::NotInitialized);
        }

        frame.validate()?;

        let source = match &self.roi {
            Some(roi) => frame.crop(roi, &mut self.crop_buffer)?,
            None => *frame,
        };

        let input = self
            .engine
            .input_tensor_mut(&self.input_layer)
            .ok_or(DetectError::NotInitialized)?;

        let transform = match &mut self.pre {
            PreProcessStrategy::Letterbox(letterbox) => letterbox.preprocess(&source, input),
            PreProcessStrategy::Custom(hook) => {
                hook.preprocess(&source, input, &self.input_shape)
            }
        }
        .map_err(|e| DetectError::PreProcess(format!("{:#}", e)))?;

        let start = Instant::now();
        self.engine.execute()?;
        let processing_time = start.elapsed();

        let outputs = self.engine.outputs().ok_or(DetectError::NotInitialized)?;

        let ctx = DecodeContext {
            transform,
            roi: self.roi,
            processing_time,
            confidence_threshold: self.confidence_threshold,
            nms_threshold: self.nms_threshold,
            min_box_border: self.min_box_border,
        };

        let detections = match &mut self.post {
            PostProcessStrategy::AnchorDecode(post) => {
                post.decode(outputs, &self.output_tensors, &ctx)
            }
            PostProcessStrategy::Custom(hook) => hook.postprocess(outputs, &ctx),
        }
        .map_err(|e| DetectError::PostProcess(format!("{:#}", e)))?;

        tracing::debug!(
            detections = detections.len(),
            inference_ms = processing_time.as_secs_f64() * 1000.0,
            "Frame processed"
        );

        Ok(detections)
    }

    /// Replace the score and NMS thresholds used by subsequent calls.
    pub fn set_score_threshold(
        &mut self,
        confidence_threshold: f32,
        nms_threshold: f32,
    ) -> Result<(), DetectError> {
        for value in [confidence_threshold, nms_threshold] {
            if !(0.0..=1.0).contains(&value) {
                return Err(DetectError::Config(format!(
                    "Threshold {} outside [0, 1]",
                    value
                )));
            }
        }
        self.confidence_threshold = confidence_threshold;
        self.nms_threshold = nms_threshold;
        Ok(())
    }

    /// Restrict subsequent calls to `roi`. `None` or a zero-area ROI clears it.
    pub fn set_roi(&mut self, roi: Option<Roi>) {
        self.roi = roi.filter(|r| !r.is_empty());
    }

    pub fn roi(&self) -> Option<Roi> {
        self.roi
    }

    pub fn thresholds(&self) -> (f32, f32) {
        (self.confidence_threshold, self.nms_threshold)
    }

    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    pub fn engine(&self) -> &InferenceEngine<P> {
        &self.engine
    }

    pub fn is_initialized(&self) -> bool {
        self.engine.is_initialized()
    }

    /// Release the model. Later `detect` calls fail with `NotInitialized`.
    pub fn deinit(&mut self) {
        self.engine.deinit();
    }
}
