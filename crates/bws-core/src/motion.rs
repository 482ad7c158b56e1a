//! Local liveness screening via motion detection between two frames.
//!
//! A reference frame is compared against a follow-up frame. Only the central
//! half of the image is examined, which keeps background movement out of the
//! measurement. Pixels whose luminance changed by more than the mean change
//! (never less than a fixed noise floor) are treated as moved, and a rough
//! head-shaped bounding box is grown around them. The frames count as showing
//! genuine movement when that box is large enough and densely filled with
//! moved pixels.
//!
//! The arithmetic below (integer mean, quarter-margin crop, the 3/5 shoulder
//! cut-off and the 4/3 aspect limit) is shared with other clients of the same
//! webservice and must not drift.
//!
//! # Threat Coverage
//!
//! - **Blocks:** a photograph held still in front of the camera.
//! - **Does not block:** a photograph or screen that is moved around. The
//!   webservice runs its own liveness scoring on the uploaded pairs.

use crate::frame::GrayscaleImage;

/// Minimum per-pixel difference treated as movement rather than sensor noise.
pub const MIN_NOISE_THRESHOLD: u32 = 36;

/// Percentage of changed pixels inside the head box required to trigger.
pub const MOVED_PERCENT_THRESHOLD: u32 = 18;

/// Result of comparing a reference frame with a follow-up frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionResult {
    /// Whether the pair shows qualifying movement.
    pub triggered: bool,
    /// Per-pixel threshold actually used (mean difference, at least the noise floor).
    pub threshold: u32,
    /// Width and height of the estimated head box, in pixels.
    pub box_width: u32,
    pub box_height: u32,
    /// Changed pixels inside the box, as an integer percentage of its area.
    pub moved_percent: u32,
}

impl MotionResult {
    fn untriggered() -> Self {
        Self {
            triggered: false,
            threshold: MIN_NOISE_THRESHOLD,
            box_width: 1,
            box_height: 1,
            moved_percent: 0,
        }
    }
}

/// Return whether `current` differs from `first` by a head-sized movement.
pub fn detect(first: &GrayscaleImage, current: &GrayscaleImage) -> bool {
    analyse(first, current).triggered
}

/// Full motion analysis of a frame pair. Pure and deterministic.
pub fn analyse(first: &GrayscaleImage, current: &GrayscaleImage) -> MotionResult {
    if first.width() != current.width() || first.height() != current.height() {
        return MotionResult::untriggered();
    }

    let width = first.width() as usize;
    let height = first.height() as usize;

    // Central half of the image.
    let left = width / 4;
    let right = width * 3 / 4;
    let top = height / 4;
    let bottom = height * 3 / 4;
    let roi_width = right - left;
    let roi_height = bottom - top;
    if roi_width == 0 || roi_height == 0 {
        return MotionResult::untriggered();
    }

    let a = first.data();
    let b = current.data();
    let mut diff = Vec::with_capacity(roi_width * roi_height);
    let mut sum: u64 = 0;
    for y in top..bottom {
        let row = y * width;
        for x in left..right {
            let d = a[row + x].abs_diff(b[row + x]);
            sum += u64::from(d);
            diff.push(d);
        }
    }

    let mean = (sum / diff.len() as u64) as u32;
    let threshold = mean.max(MIN_NOISE_THRESHOLD);

    // Estimate the head box. Horizontal extent only grows in the upper 3/5 of
    // the region (shoulders below), vertical extent only while the box stays
    // narrower than 3:4 (width:height).
    let shoulder_line = roi_height * 3 / 5;
    let mut min_x = usize::MAX;
    let mut max_x = 0usize;
    let mut min_y = usize::MAX;
    let mut max_y = 0usize;

    for y in 0..roi_height {
        for x in 0..roi_width {
            if u32::from(diff[y * roi_width + x]) <= threshold {
                continue;
            }
            if min_y == usize::MAX {
                min_y = y;
                max_y = y;
            }
            if y < shoulder_line {
                min_x = min_x.min(x);
                max_x = max_x.max(x);
            }
            if min_x <= max_x {
                let box_w = max_x - min_x + 1;
                let box_h = y - min_y + 1;
                if box_h * 3 < box_w * 4 {
                    max_y = y;
                }
            }
        }
    }

    if min_x > max_x || min_y == usize::MAX {
        return MotionResult {
            threshold,
            ..MotionResult::untriggered()
        };
    }

    let box_width = max_x - min_x + 1;
    let box_height = max_y - min_y + 1;

    let mut changed = 0usize;
    for y in min_y..=max_y {
        let row = y * roi_width;
        for x in min_x..=max_x {
            if u32::from(diff[row + x]) > threshold {
                changed += 1;
            }
        }
    }

    let moved_percent = (changed * 100 / (box_width * box_height)) as u32;
    let triggered = box_width >= width / 20
        && box_height >= height / 20
        && moved_percent > MOVED_PERCENT_THRESHOLD;

    MotionResult {
        triggered,
        threshold,
        box_width: box_width as u32,
        box_height: box_height as u32,
        moved_percent,
    }
}
