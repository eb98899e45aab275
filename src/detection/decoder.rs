//! Belief-map decoding: from a raw confidence grid to candidate
//! keypoints.
//!
//! The raw channel is smoothed with a small Gaussian to suppress
//! checkerboard noise, strict 8-connected local maxima above the
//! confidence threshold are kept, and each peak is refined to sub-pixel
//! precision by taking the weighted centroid of a 5×5 window around it.
//! An empty result is a normal outcome, not an error.

use nalgebra::Vector2;
use ndarray::Array2;

use super::maps::{BeliefMap, Keypoint};

/// Half-width of the sub-pixel refinement window (5×5 total).
const REFINE_RADIUS: i64 = 2;

/// Fixed offset applied to decoded peaks, compensating the systematic
/// shift introduced by the network's output downsampling.
const UPSAMPLE_OFFSET: f64 = 0.4395;

/// Tuning knobs for peak extraction.
#[derive(Debug, Clone, Copy)]
pub struct DecoderConfig {
    /// Gaussian smoothing sigma, in map pixels. Zero disables smoothing.
    pub sigma: f64,
    /// Minimum smoothed peak value to keep a candidate.
    pub confidence_threshold: f64,
    /// Secondary threshold for window samples contributing to the
    /// sub-pixel centroid.
    pub window_threshold: f64,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            sigma: 3.0,
            confidence_threshold: 0.1,
            window_threshold: 0.01,
        }
    }
}

/// Extract candidate keypoints from one belief-map channel.
///
/// Output is unordered; zero keypoints is normal when nothing clears the
/// confidence threshold.
pub fn decode(map: &BeliefMap, channel: usize, config: &DecoderConfig) -> Vec<Keypoint> {
    let smoothed = gaussian_smooth(map.data(), config.sigma);
    let smoothed = BeliefMap::new(smoothed);

    let mut keypoints = Vec::new();
    for y in 0..smoothed.height() as i64 {
        for x in 0..smoothed.width() as i64 {
            let value = match smoothed.get(x, y) {
                Some(v) => v as f64,
                None => continue,
            };
            if value < config.confidence_threshold {
                continue;
            }
            if !is_strict_local_maximum(&smoothed, x, y, value) {
                continue;
            }

            let position = refine_subpixel(&smoothed, x, y, config.window_threshold)
                + Vector2::new(UPSAMPLE_OFFSET, UPSAMPLE_OFFSET);

            // Report the unsmoothed belief at the peak as confidence
            let confidence = map.get(x, y).unwrap_or(value as f32) as f64;
            keypoints.push(Keypoint {
                position,
                confidence,
                channel,
            });
        }
    }
    keypoints
}

/// Strictly greater than all 8-connected neighbors. Out-of-range
/// neighbors never veto, so peaks on the map border survive.
fn is_strict_local_maximum(map: &BeliefMap, x: i64, y: i64, value: f64) -> bool {
    for dy in -1..=1i64 {
        for dx in -1..=1i64 {
            if dx == 0 && dy == 0 {
                continue;
            }
            if let Some(neighbor) = map.get(x + dx, y + dy) {
                if neighbor as f64 >= value {
                    return false;
                }
            }
        }
    }
    true
}

/// Weighted centroid of the window around an integer peak. Falls back to
/// the integer location when no window sample clears the threshold.
fn refine_subpixel(map: &BeliefMap, px: i64, py: i64, window_threshold: f64) -> Vector2<f64> {
    let mut weight_sum = 0.0;
    let mut centroid = Vector2::zeros();
    for dy in -REFINE_RADIUS..=REFINE_RADIUS {
        for dx in -REFINE_RADIUS..=REFINE_RADIUS {
            let Some(v) = map.get(px + dx, py + dy) else {
                continue;
            };
            let v = v as f64;
            if v <= window_threshold {
                continue;
            }
            weight_sum += v;
            centroid += v * Vector2::new((px + dx) as f64, (py + dy) as f64);
        }
    }
    if weight_sum > 0.0 {
        centroid / weight_sum
    } else {
        Vector2::new(px as f64, py as f64)
    }
}

/// Separable Gaussian smoothing with clamped borders.
fn gaussian_smooth(data: &Array2<f32>, sigma: f64) -> Array2<f32> {
    if sigma <= 0.0 {
        return data.clone();
    }
    let radius = (3.0 * sigma).ceil() as i64;
    let mut kernel = Vec::with_capacity((2 * radius + 1) as usize);
    let mut sum = 0.0f64;
    for i in -radius..=radius {
        let w = (-(i as f64).powi(2) / (2.0 * sigma * sigma)).exp();
        kernel.push(w);
        sum += w;
    }
    for w in &mut kernel {
        *w /= sum;
    }

    let (rows, cols) = data.dim();
    let clamp = |v: i64, hi: usize| v.clamp(0, hi as i64 - 1) as usize;

    // Horizontal pass
    let mut tmp = Array2::<f32>::zeros((rows, cols));
    for y in 0..rows {
        for x in 0..cols {
            let mut acc = 0.0f64;
            for (k, w) in kernel.iter().enumerate() {
                let sx = clamp(x as i64 + k as i64 - radius, cols);
                acc += w * data[[y, sx]] as f64;
            }
            tmp[[y, x]] = acc as f32;
        }
    }
    // Vertical pass
    let mut out = Array2::<f32>::zeros((rows, cols));
    for y in 0..rows {
        for x in 0..cols {
            let mut acc = 0.0f64;
            for (k, w) in kernel.iter().enumerate() {
                let sy = clamp(y as i64 + k as i64 - radius, rows);
                acc += w * tmp[[sy, x]] as f64;
            }
            out[[y, x]] = acc as f32;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Paint an isotropic Gaussian blob of the given amplitude.
    fn splat_gaussian(map: &mut BeliefMap, cx: f64, cy: f64, amplitude: f32, sigma: f64) {
        let (h, w) = map.data().dim();
        for y in 0..h {
            for x in 0..w {
                let d2 = (x as f64 - cx).powi(2) + (y as f64 - cy).powi(2);
                let v = amplitude * (-d2 / (2.0 * sigma * sigma)).exp() as f32;
                let cell = &mut map.data_mut()[[y, x]];
                *cell = cell.max(v);
            }
        }
    }

    #[test]
    fn test_single_peak_decoded_within_one_pixel() {
        let mut map = BeliefMap::zeros(80, 60);
        splat_gaussian(&mut map, 41.3, 22.7, 0.9, 2.0);

        let config = DecoderConfig {
            sigma: 1.5,
            ..DecoderConfig::default()
        };
        let kps = decode(&map, 0, &config);
        assert_eq!(kps.len(), 1);
        let kp = &kps[0];
        assert_eq!(kp.channel, 0);
        assert!((kp.position.x - UPSAMPLE_OFFSET - 41.3).abs() < 1.0);
        assert!((kp.position.y - UPSAMPLE_OFFSET - 22.7).abs() < 1.0);
        assert!(kp.confidence > 0.5);
    }

    #[test]
    fn test_all_below_threshold_yields_empty() {
        let mut map = BeliefMap::zeros(40, 40);
        splat_gaussian(&mut map, 20.0, 20.0, 0.05, 2.0);

        let kps = decode(&map, 3, &DecoderConfig::default());
        assert!(kps.is_empty());
    }

    #[test]
    fn test_two_separated_peaks_both_found() {
        let mut map = BeliefMap::zeros(100, 50);
        splat_gaussian(&mut map, 20.0, 25.0, 0.8, 2.0);
        splat_gaussian(&mut map, 75.0, 25.0, 0.6, 2.0);

        let config = DecoderConfig {
            sigma: 1.5,
            ..DecoderConfig::default()
        };
        let mut kps = decode(&map, 0, &config);
        kps.sort_by(|a, b| a.position.x.partial_cmp(&b.position.x).unwrap());
        assert_eq!(kps.len(), 2);
        assert!((kps[0].position.x - 20.0).abs() < 1.5);
        assert!((kps[1].position.x - 75.0).abs() < 1.5);
        assert!(kps[0].confidence > kps[1].confidence);
    }

    #[test]
    fn test_flat_map_has_no_peaks() {
        // A constant map has no strict maxima, so nothing is emitted
        // even though every value clears the threshold.
        let map = BeliefMap::new(Array2::from_elem((20, 20), 0.5f32));
        let config = DecoderConfig {
            sigma: 0.0,
            ..DecoderConfig::default()
        };
        assert!(decode(&map, 0, &config).is_empty());
    }
}
