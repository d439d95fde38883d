//! IMIX (mix of frame sizes) helpers.
//!
//! An IMIX is given as weights keyed by frame size, e.g. `{"64B": 70, "1518B": 30}`.
//! Weights are relative, they need not sum to 100.

use std::collections::BTreeMap;

/// Frame size used when an IMIX has no usable entries.
pub const DEFAULT_FRAME_SIZE: u32 = 64;

/// Parse a frame size key like `"64B"` or `"128"`.
pub fn parse_frame_size(key: &str) -> Option<u32> {
    let key = key.trim();
    let digits = key.strip_suffix(|c| c == 'B' || c == 'b').unwrap_or(key);
    digits.parse().ok()
}

fn weights(imix: &BTreeMap<String, u32>) -> Vec<(u32, u64)> {
    imix.iter()
        .filter_map(|(key, weight)| match parse_frame_size(key) {
            Some(size) => Some((size, u64::from(*weight))),
            None => {
                warn!("Ignoring unknown frame size: {}", key);
                None
            }
        })
        .collect()
}

/// Weighted average frame size and the sum of the weights.
///
/// An empty IMIX, or one whose weights are all zero, counts as 64 byte frames
/// with weight 100.
pub fn calculate_frame_size(imix: &BTreeMap<String, u32>) -> (f64, u64) {
    let weights = weights(imix);
    let sum: u64 = weights.iter().map(|(_, w)| w).sum();

    if sum == 0 {
        return (f64::from(DEFAULT_FRAME_SIZE), 100);
    }

    // Frame sizes and weights are both u32, the products fit in u128.
    let total: u128 = weights
        .iter()
        .map(|(size, w)| u128::from(*size) * u128::from(*w))
        .sum();

    (total as f64 / sum as f64, sum)
}

/// Share of packets per frame size, in percent, summing to 100.
pub fn create_imix_data(imix: &BTreeMap<String, u32>) -> BTreeMap<u32, f64> {
    let mut weights = weights(imix);
    let mut sum: u64 = weights.iter().map(|(_, w)| w).sum();

    if sum == 0 {
        weights = vec![(DEFAULT_FRAME_SIZE, 100)];
        sum = 100;
    }

    let mut data = BTreeMap::new();
    for (size, weight) in weights {
        if weight > 0 {
            *data.entry(size).or_insert(0.0) += weight as f64 * 100.0 / sum as f64;
        }
    }
    data
}
