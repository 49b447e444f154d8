/// Default model input as (width, height).
pub const DEFAULT_INPUT_SIZE: (u32, u32) = (640, 640);

/// Gray value used for the padded border around the resized image.
pub const LETTERBOX_COLOR: u8 = 128;

/// Number of interleaved channels the pipeline accepts.
pub const RGB_CHANNELS: usize = 3;
