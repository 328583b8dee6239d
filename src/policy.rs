//! Rules deciding which of two nearby records is kept.

use crate::keypoint::KeypointRecord;
use crate::params::DedupParams;

/// Comparison hooks of the deduplication engine.
///
/// The engine only ever asks these questions; geometry and ranking live entirely in the
/// implementation.
pub trait ComparePolicy {
    /// True when at most one of the two records may survive.
    fn conflicts(&self, a: &KeypointRecord, b: &KeypointRecord) -> bool;

    /// Decides a conflicting pair. `earlier` entered the engine first.
    /// Returns `(keep_earlier, keep_later)`.
    fn resolve(&self, earlier: &KeypointRecord, later: &KeypointRecord) -> (bool, bool);

    /// Records that compete but are never emitted.
    fn should_discard(&self, record: &KeypointRecord) -> bool;

    /// True when `older` can conflict neither with `newer` nor with anything scanned after it.
    fn beyond_reach(&self, older: &KeypointRecord, newer: &KeypointRecord) -> bool;
}

/// Radius suppression as used for AKAZE keypoints: euclidean distance in fixed point, higher
/// response wins, the earlier record wins ties. Records of other pyramid levels and records
/// outside the border box are discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AkazePolicy {
    radius_sq: u64,
    current_level: u8,
    lower: u32,
    upper_x: u32,
    upper_y: u32,
}

impl AkazePolicy {
    pub fn new(params: &DedupParams) -> Self {
        let format = params.format();
        let border = u32::from(params.border_margin);
        let width = u32::from(params.image_width);
        let height = u32::from(params.image_height);
        Self {
            radius_sq: format.radius_sq(params.search_radius),
            current_level: params.current_level,
            lower: format.pixels_to_fixed(border),
            upper_x: format.pixels_to_fixed(width.saturating_sub(border)),
            upper_y: format.pixels_to_fixed(height.saturating_sub(border)),
        }
    }

    pub fn radius_sq(&self) -> u64 {
        self.radius_sq
    }

    fn inside_border(&self, record: &KeypointRecord) -> bool {
        let (x, y) = (u32::from(record.x), u32::from(record.y));
        x > self.lower && x < self.upper_x && y > self.lower && y < self.upper_y
    }
}

impl ComparePolicy for AkazePolicy {
    #[inline]
    fn conflicts(&self, a: &KeypointRecord, b: &KeypointRecord) -> bool {
        a.distance_sq(b) <= self.radius_sq
    }

    #[inline]
    fn resolve(&self, earlier: &KeypointRecord, later: &KeypointRecord) -> (bool, bool) {
        if later.response > earlier.response {
            (false, true)
        } else {
            (true, false)
        }
    }

    fn should_discard(&self, record: &KeypointRecord) -> bool {
        record.level != self.current_level || !self.inside_border(record)
    }

    #[inline]
    fn beyond_reach(&self, older: &KeypointRecord, newer: &KeypointRecord) -> bool {
        let dy = u64::from(newer.y.saturating_sub(older.y));
        dy * dy > self.radius_sq
    }
}
