use crate::config::{DEFAULT_INPUT_SIZE, LETTERBOX_COLOR, RGB_CHANNELS};
use crate::{Frame, LetterboxTransform, Preprocess};
use common::span;
use fast_image_resize::{
    FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer,
    images::{Image, ImageRef},
};

/// Aspect-preserving resize onto a gray canvas, written as normalized
/// `f32` HWC straight into the model input buffer.
pub struct LetterboxPreProcessor {
    pub input_size: (u32, u32),
    letterboxed_buffer: Vec<u8>,
    resizer: Resizer,
}

impl LetterboxPreProcessor {
    /// `input_size` is (width, height) of the model input.
    pub fn new(input_size: (u32, u32)) -> Self {
        Self {
            input_size,
            letterboxed_buffer: vec![
                LETTERBOX_COLOR;
                input_size.0 as usize * input_size.1 as usize * RGB_CHANNELS
            ],
            resizer: Resizer::new(),
        }
    }

    /// Letterbox `frame` into `input` and return the inverse-mapping parameters.
    pub fn preprocess_into(
        &mut self,
        frame: &Frame<'_>,
        input: &mut [f32],
    ) -> anyhow::Result<LetterboxTransform> {
        let _s = span!("preprocess_frame");

        tracing::trace!(
            width = frame.width(),
            height = frame.height(),
            pixel_bytes = frame.pixels().len(),
            "Preprocessing frame dimensions"
        );

        frame.validate()?;

        let expected = self.letterboxed_buffer.len();
        if input.len() != expected {
            anyhow::bail!(
                "Input tensor size mismatch: expected {} floats for {}x{}x3, got {}",
                expected,
                self.input_size.1,
                self.input_size.0,
                input.len()
            );
        }

        let transform = self.resize_and_letterbox(frame)?;
        Self::normalize_into(&self.letterboxed_buffer, input);

        Ok(transform)
    }

    /// Compute the letterbox geometry for a `width`x`height` source.
    ///
    /// Returns the transform plus the scaled (width, height).
    pub fn letterbox_geometry(&self, width: u32, height: u32) -> (LetterboxTransform, u32, u32) {
        let (input_width, input_height) = self.input_size;

        let scale = (input_height as f32 / height as f32).min(input_width as f32 / width as f32);
        let new_width = ((width as f32 * scale) as u32).clamp(1, input_width);
        let new_height = ((height as f32 * scale) as u32).clamp(1, input_height);

        let transform = LetterboxTransform {
            scale,
            offset_x: (input_width - new_width) / 2,
            offset_y: (input_height - new_height) / 2,
        };

        (transform, new_width, new_height)
    }

    fn resize_and_letterbox(&mut self, frame: &Frame<'_>) -> anyhow::Result<LetterboxTransform> {
        let _s = span!("resize_and_letterbox");

        let (transform, new_width, new_height) =
            self.letterbox_geometry(frame.width(), frame.height());

        let src = ImageRef::new(
            frame.width(),
            frame.height(),
            frame.pixels(),
            PixelType::U8x3,
        )?;

        let mut resized = Image::new(new_width, new_height, PixelType::U8x3);

        self.resizer.resize(
            &src,
            &mut resized,
            &ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::Bilinear)),
        )?;

        self.letterboxed_buffer.fill(LETTERBOX_COLOR);

        let resized_data = resized.buffer();
        let stride = self.input_size.0 as usize * RGB_CHANNELS;
        let row_bytes = new_width as usize * RGB_CHANNELS;

        for y in 0..new_height as usize {
            let src_row = y * row_bytes;
            let dst_row = (y + transform.offset_y as usize) * stride
                + transform.offset_x as usize * RGB_CHANNELS;

            self.letterboxed_buffer[dst_row..dst_row + row_bytes]
                .copy_from_slice(&resized_data[src_row..src_row + row_bytes]);
        }

        Ok(transform)
    }

    fn normalize_into(letterboxed: &[u8], input: &mut [f32]) {
        let _s = span!("normalize");

        for (dst, &px) in input.iter_mut().zip(letterboxed) {
            *dst = px as f32 / 255.0;
        }
    }
}

impl Default for LetterboxPreProcessor {
    fn default() -> Self {
        Self::new(DEFAULT_INPUT_SIZE)
    }
}

impl Preprocess for LetterboxPreProcessor {
    fn preprocess(
        &mut self,
        frame: &Frame<'_>,
        input: &mut [f32],
    ) -> anyhow::Result<LetterboxTransform> {
        self.preprocess_into(frame, input)
    }

    fn input_size(&self) -> (u32, u32) {
        self.input_size
    }
}
