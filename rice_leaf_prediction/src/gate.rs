//! Colour heuristic that rejects images which are clearly not a leaf before
//! any model time is spent on them.

use image::RgbImage;

/// Green band, in degrees.
const HUE_MIN: f32 = 35.0;
const HUE_MAX: f32 = 85.0;
/// Saturation and value floors on the 0..=255 scale.
const SATURATION_MIN: u8 = 40;
const VALUE_MIN: u8 = 40;
/// Share of green pixels an image needs to pass.
const MIN_GREEN_RATIO: f64 = 0.25;

/// Hue in degrees [0, 360), saturation and value on 0..=255.
fn rgb_to_hsv([r, g, b]: [u8; 3]) -> (f32, u8, u8) {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = (max - min) as f32;

    let value = max;
    let saturation = if max == 0 {
        0
    } else {
        (delta * 255.0 / max as f32).round() as u8
    };

    if delta == 0.0 {
        return (0.0, saturation, value);
    }

    let (r, g, b) = (r as f32, g as f32, b as f32);
    let hue = if max as f32 == r {
        60.0 * ((g - b) / delta)
    } else if max as f32 == g {
        60.0 * ((b - r) / delta) + 120.0
    } else {
        60.0 * ((r - g) / delta) + 240.0
    };

    (hue.rem_euclid(360.0), saturation, value)
}

fn is_green(pixel: [u8; 3]) -> bool {
    let (hue, saturation, value) = rgb_to_hsv(pixel);
    (HUE_MIN..=HUE_MAX).contains(&hue) && saturation >= SATURATION_MIN && value >= VALUE_MIN
}

/// Counts past 2^24 no longer fit an `f32` mantissa, so the division is done in `f64`.
fn ratio(green: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    green as f64 / total as f64
}

/// Fraction of pixels inside the green band.
pub fn green_ratio(image: &RgbImage) -> f64 {
    let total = image.width() as u64 * image.height() as u64;
    let green = image.pixels().filter(|pixel| is_green(pixel.0)).count() as u64;
    ratio(green, total)
}

/// Runs on the decoded image at its original resolution.
pub fn is_plausible_leaf(image: &RgbImage) -> bool {
    let ratio = green_ratio(image);
    tracing::debug!(green_ratio = ratio, "Leaf gate evaluated");
    ratio > MIN_GREEN_RATIO
}
