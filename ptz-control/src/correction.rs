//! The axis correction transform.
//!
//! Corrections account for how the mount is installed relative to command
//! space (camera upside down, rotated 90°, mirrored). The same transform
//! applies to positions, deltas and velocities, always in the same order:
//! invert pan, invert tilt, then swap pan/tilt (together with their paired
//! speeds).

use director_types::PtzCorrection;

/// Apply the correction to a pan/tilt value pair.
pub fn correct_axes(correction: &PtzCorrection, pan: f64, tilt: f64) -> (f64, f64) {
    let pan = if correction.invert_pan { -pan } else { pan };
    let tilt = if correction.invert_tilt { -tilt } else { tilt };
    if correction.swap_pan_tilt {
        (tilt, pan)
    } else {
        (pan, tilt)
    }
}

/// Apply the correction to a pan/tilt value pair and its paired speeds.
pub fn correct_axes_with_speeds(
    correction: &PtzCorrection,
    pan: f64,
    tilt: f64,
    pan_speed: f64,
    tilt_speed: f64,
) -> ((f64, f64), (f64, f64)) {
    let (pan, tilt) = correct_axes(correction, pan, tilt);
    // correct_axes already swapped the values; the speed pair follows the
    // same swap.
    let (pan_speed, tilt_speed) = if correction.swap_pan_tilt {
        (tilt_speed, pan_speed)
    } else {
        (pan_speed, tilt_speed)
    };
    ((pan, tilt), (pan_speed, tilt_speed))
}
