use log::debug;

use crate::error::{Error, Result};
use crate::keypoint::{radius_from_pixels, CoordinateFormat};
use crate::merger::StreamOrigin;

/// Lane counts the engine can be built with.
pub const SUPPORTED_LANE_COUNTS: [usize; 4] = [1, 2, 4, 8];

/// Smallest prefetch window a lane gets, even for single element vectors.
pub const MIN_PREFETCH_DEPTH: usize = 2;

/// Maximum number of vectors read from each input. A limit of zero means the input is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    any(test, feature = "serde"),
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct InputLimits {
    pub current: u32,
    pub previous: u32,
    pub next: u32,
}

impl InputLimits {
    pub fn get(&self, origin: StreamOrigin) -> u32 {
        match origin {
            StreamOrigin::Current => self.current,
            StreamOrigin::Previous => self.previous,
            StreamOrigin::Next => self.next,
        }
    }

    pub fn total(&self) -> u64 {
        u64::from(self.current) + u64::from(self.previous) + u64::from(self.next)
    }

    /// Inputs that can deliver records at the same time.
    pub fn active_inputs(&self) -> u32 {
        1 + u32::from(self.previous > 0) + u32::from(self.next > 0)
    }
}

impl Default for InputLimits {
    fn default() -> Self {
        Self {
            current: 4096,
            previous: 0,
            next: 0,
        }
    }
}

/// Everything the deduplication engine needs to know before it sees the first record.
#[derive(Debug, Clone)]
#[cfg_attr(
    any(test, feature = "serde"),
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct DedupParams {
    /// Suppression radius in pixels, 16 integer and 16 fraction bits.
    pub search_radius: u32,
    /// Pyramid level whose records may survive. Everything else only suppresses.
    pub current_level: u8,
    /// Records within this many pixels of the image edge are discarded.
    pub border_margin: u16,
    /// Size of the full resolution image; defines the coordinate format.
    pub image_width: u16,
    pub image_height: u16,
    pub lane_count: usize,
    /// Records per input vector.
    pub vector_width: usize,
    pub max_output: u32,
    /// Caps the number of steps below the derived bound. 0 keeps the derived bound.
    pub max_iterations: u64,
    /// Hard cap on buffered records. 0 uses the derived requirement.
    pub max_buffer_capacity: u32,
    /// Minimum distance in pixels, along x or y, between two records of the same input.
    /// Sizes the derived buffer. Input that crowds more records into the search window than
    /// that buffer holds, such as co-located duplicates, is rejected at construction.
    pub keypoint_spacing: u16,
    pub limits: InputLimits,
}

impl Default for DedupParams {
    fn default() -> Self {
        Self {
            search_radius: radius_from_pixels(4),
            current_level: 0,
            border_margin: 0,
            image_width: 640,
            image_height: 480,
            lane_count: 1,
            vector_width: 1,
            max_output: 4096,
            max_iterations: 0,
            max_buffer_capacity: 0,
            keypoint_spacing: 1,
            limits: InputLimits::default(),
        }
    }
}

/// Sizes derived from [`DedupParams`] once, at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityPlan {
    pub format: CoordinateFormat,
    /// Records held by all rings together, a multiple of the lane count.
    pub buffer_capacity: usize,
    pub lane_capacity: usize,
    pub prefetch_depth: usize,
    /// Records one lane holds, ring and prefetch window together.
    pub lane_slots: usize,
    /// Upper bound on steps for any input the limits admit.
    pub max_steps: u64,
    /// `max_steps`, possibly lowered by `max_iterations`.
    pub step_limit: u64,
}

impl DedupParams {
    pub fn format(&self) -> CoordinateFormat {
        CoordinateFormat::for_image(self.image_width, self.image_height)
    }

    pub fn validate(&self) -> Result<()> {
        if !SUPPORTED_LANE_COUNTS.contains(&self.lane_count) {
            return Err(Error::InvalidParameters(format!(
                "lane count must be one of {SUPPORTED_LANE_COUNTS:?}, got {}",
                self.lane_count
            )));
        }
        if self.vector_width == 0 {
            return Err(Error::InvalidParameters(
                "vector width must be at least 1".into(),
            ));
        }
        if self.image_width == 0 || self.image_height == 0 {
            return Err(Error::InvalidParameters(format!(
                "image must not be empty, got {}x{}",
                self.image_width, self.image_height
            )));
        }
        if self.keypoint_spacing == 0 {
            return Err(Error::InvalidParameters(
                "keypoint spacing must be at least 1 pixel".into(),
            ));
        }
        let current_records = u64::from(self.limits.current) * self.vector_width as u64;
        if u64::from(self.max_output) > current_records {
            return Err(Error::InvalidParameters(format!(
                "max output {} exceeds the {current_records} records of the current level",
                self.max_output
            )));
        }
        Ok(())
    }

    /// Number of records that can be inside the search window at once.
    ///
    /// Records of one input are at least `keypoint_spacing` apart, so every
    /// `spacing x spacing` cell holds at most one of them. The window spans the full image
    /// width and `radius` rows above the newest record.
    pub fn required_capacity(&self) -> u64 {
        let spacing = u64::from(self.keypoint_spacing.max(1));
        let per_span = |span: u64| span / spacing + 1;
        let radius_px = u64::from(self.search_radius).div_ceil(1 << 16);
        let geometry_bound = per_span(u64::from(self.image_width))
            .saturating_mul(per_span(radius_px))
            .saturating_mul(u64::from(self.limits.active_inputs()));
        let input_records = self
            .limits
            .total()
            .saturating_mul(self.vector_width as u64);
        geometry_bound
            .min(input_records)
            .max(self.lane_count as u64)
    }

    pub fn plan(&self) -> Result<CapacityPlan> {
        self.validate()?;
        let required = self.required_capacity();
        if self.max_buffer_capacity != 0 && u64::from(self.max_buffer_capacity) < required {
            return Err(Error::CapacityTooSmall {
                required: u32::try_from(required).unwrap_or(u32::MAX),
                configured: self.max_buffer_capacity,
            });
        }
        let lanes = self.lane_count;
        let lane_capacity = usize::try_from(required)
            .map_err(|_| Error::InvalidParameters(format!("buffer of {required} records")))?
            .div_ceil(lanes);
        let buffer_capacity = lane_capacity * lanes;
        let prefetch_depth = self.vector_width.div_ceil(lanes).max(MIN_PREFETCH_DEPTH);
        let lane_slots = lane_capacity + prefetch_depth;

        let max_steps = max_steps(
            self.limits.total(),
            self.vector_width as u64,
            lane_slots as u64,
            lanes as u64,
        );
        let step_limit = match self.max_iterations {
            0 => max_steps,
            cap => cap.min(max_steps),
        };

        let plan = CapacityPlan {
            format: self.format(),
            buffer_capacity,
            lane_capacity,
            prefetch_depth,
            lane_slots,
            max_steps,
            step_limit,
        };
        debug!(
            "dedup plan: {} lanes x {} slots, prefetch {}, at most {} steps ({} fraction bits)",
            lanes,
            lane_capacity,
            prefetch_depth,
            step_limit,
            plan.format.fraction_bits()
        );
        Ok(plan)
    }
}

impl CapacityPlan {
    /// Records all lanes hold together before a write has to push one out.
    pub fn resident_capacity(&self) -> usize {
        self.lane_slots * (self.buffer_capacity / self.lane_capacity)
    }
}

/// A vector takes one comparison step per record of its fullest lane, `lane_slots` at most,
/// and one write step per record, the first of which shares a step with the last
/// comparison. One more step notices the end of the input, then the drain retires one
/// buffered record per step and the final step writes the sentinel.
pub fn max_steps(input_vectors: u64, vector_width: u64, lane_slots: u64, lanes: u64) -> u64 {
    input_vectors
        .saturating_mul(lane_slots.saturating_add(vector_width))
        .saturating_add(1)
        .saturating_add(lanes.saturating_mul(lane_slots))
        .saturating_add(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> DedupParams {
        DedupParams {
            image_width: 64,
            image_height: 64,
            search_radius: radius_from_pixels(4),
            max_output: 64,
            limits: InputLimits {
                current: 64,
                previous: 0,
                next: 0,
            },
            ..DedupParams::default()
        }
    }

    #[test]
    fn capacity_limited_by_input_size() {
        // 65 columns x 5 rows > 64 records
        assert_eq!(params().required_capacity(), 64);
    }

    #[test]
    fn capacity_limited_by_geometry() {
        let p = DedupParams {
            keypoint_spacing: 4,
            limits: InputLimits {
                current: 1000,
                previous: 1000,
                next: 0,
            },
            ..params()
        };
        // (64 / 4 + 1) * (4 / 4 + 1) * 2 inputs
        assert_eq!(p.required_capacity(), 17 * 2 * 2);
    }

    #[test]
    fn fractional_radius_rounds_rows_up() {
        let p = DedupParams {
            search_radius: radius_from_pixels(2) + 1,
            keypoint_spacing: 1,
            limits: InputLimits {
                current: 10_000,
                previous: 0,
                next: 0,
            },
            ..params()
        };
        assert_eq!(p.required_capacity(), 65 * 4);
    }

    #[test]
    fn plan_rounds_capacity_to_lanes() {
        let p = DedupParams {
            lane_count: 8,
            max_output: 61,
            limits: InputLimits {
                current: 61,
                previous: 0,
                next: 0,
            },
            ..params()
        };
        let plan = p.plan().unwrap();
        assert_eq!(plan.buffer_capacity, 64);
        assert_eq!(plan.lane_capacity, 8);
        assert_eq!(plan.prefetch_depth, 2);
        assert_eq!(plan.lane_slots, 10);
        assert_eq!(plan.resident_capacity(), 80);
        assert_eq!(plan.max_steps, 61 * (10 + 1) + 1 + 8 * 10 + 1);
        assert_eq!(plan.step_limit, plan.max_steps);
    }

    #[test]
    fn wide_vectors_deepen_prefetch() {
        let p = DedupParams {
            lane_count: 2,
            vector_width: 8,
            ..params()
        };
        assert_eq!(p.plan().unwrap().prefetch_depth, 4);
    }

    #[test]
    fn max_iterations_only_lowers_limit() {
        let p = DedupParams {
            max_iterations: 10,
            ..params()
        };
        assert_eq!(p.plan().unwrap().step_limit, 10);
        let p = DedupParams {
            max_iterations: u64::MAX,
            ..params()
        };
        let plan = p.plan().unwrap();
        assert_eq!(plan.step_limit, plan.max_steps);
    }

    #[test]
    fn undersized_hard_cap_is_rejected() {
        let p = DedupParams {
            max_buffer_capacity: 8,
            ..params()
        };
        match p.plan() {
            Err(Error::CapacityTooSmall {
                required,
                configured,
            }) => {
                assert_eq!(required, 64);
                assert_eq!(configured, 8);
            }
            other => panic!("expected capacity error, got {other:?}"),
        }
    }

    #[test]
    fn sufficient_hard_cap_is_accepted() {
        let p = DedupParams {
            max_buffer_capacity: 256,
            ..params()
        };
        assert_eq!(p.plan().unwrap().buffer_capacity, 64);
    }

    #[test]
    fn unsupported_lane_count_is_rejected() {
        let p = DedupParams {
            lane_count: 3,
            ..params()
        };
        assert!(matches!(p.plan(), Err(Error::InvalidParameters(_))));
    }

    #[test]
    fn output_limit_follows_current_input() {
        let p = DedupParams {
            max_output: 65,
            ..params()
        };
        assert!(matches!(p.plan(), Err(Error::InvalidParameters(_))));
        let p = DedupParams {
            max_output: 65,
            vector_width: 2,
            ..params()
        };
        assert!(p.plan().is_ok());
    }

    #[test]
    fn zero_output_limit_is_accepted() {
        let p = DedupParams {
            max_output: 0,
            ..params()
        };
        assert!(p.plan().is_ok());
    }

    #[test]
    fn step_bound_saturates() {
        assert_eq!(max_steps(u64::MAX, 1, 3, 1), u64::MAX);
    }
}
