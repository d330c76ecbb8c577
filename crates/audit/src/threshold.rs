use crate::collector::NodeProfile;

/// Bytes of a write block reserved for the record header.
pub const RECORD_OVERHEAD: u64 = 16;

/// Device size at or above which a record on this node is considered
/// oversized.
///
/// Without compression this is the largest payload a write block can hold,
/// `write_block_size - 16`. With compression the average ratio is scaled
/// down by `margin` (a fraction of the write block) since individual records
/// may compress worse than the average:
///
/// ```text
/// write_block_size * ratio - write_block_size * margin
/// ```
///
/// Fractions truncate toward zero and negative results clamp to 0.
#[must_use]
pub fn threshold(profile: &NodeProfile, margin: f64) -> u64 {
    let wbs = profile.write_block_size;
    match profile.compression {
        None => wbs.saturating_sub(RECORD_OVERHEAD),
        Some(ratio) => {
            let wbs = wbs as f64;
            let t = wbs * ratio - wbs * margin;
            if t.is_nan() || t <= 0.0 {
                0
            } else {
                // `as` saturates at u64::MAX
                t as u64
            }
        }
    }
}
