//! Seek bar mappings used by preference screens.
//!
//! The frame delay slider shows frame rate as a percentage: full progress is
//! the shortest delay. The line scale slider moves in fifths of a pixel.

pub const FRAME_DELAY_MIN_MILLIS: u32 = 10;
pub const FRAME_DELAY_SEEKBAR_MAX: u32 = 80;
pub const LINE_SCALE_SEEKBAR_MAX: u32 = 70;

/// Seek bar progress to frame delay: 80 maps to 10ms, 0 maps to 90ms.
pub fn frame_delay_from_progress(progress: u32) -> u32 {
    let max = FRAME_DELAY_SEEKBAR_MAX as f32;
    let progress = progress.min(FRAME_DELAY_SEEKBAR_MAX) as f32;
    (FRAME_DELAY_MIN_MILLIS as f32 + max * (1.0 - progress / max)) as u32
}

pub fn frame_delay_to_progress(delay_millis: u32) -> u32 {
    let max = FRAME_DELAY_SEEKBAR_MAX as f32;
    let percent = (delay_millis as f32 - FRAME_DELAY_MIN_MILLIS as f32) / max;
    // `as` saturates negative values to zero
    (((1.0 - percent) * max) as u32).min(FRAME_DELAY_SEEKBAR_MAX)
}

pub fn line_scale_from_progress(progress: u32) -> f32 {
    progress.min(LINE_SCALE_SEEKBAR_MAX) as f32 / 5.0 + 1.0
}

pub fn line_scale_to_progress(scale: f32) -> u32 {
    (((scale - 1.0) * 5.0) as u32).min(LINE_SCALE_SEEKBAR_MAX)
}
