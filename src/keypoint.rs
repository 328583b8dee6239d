//! Keypoint record layout and the fixed-point coordinate system shared by every stage.

use std::cmp::Ordering;

/// Level value marking an invalidated or absent record.
pub const INVALID_LEVEL: u8 = 255;

/// Number of bits a coordinate occupies, integer and fraction part together.
const COORDINATE_BITS: u32 = 16;

/// A detected keypoint.
///
/// `x` and `y` are fixed point in the coordinate system of the full resolution image, see
/// [`CoordinateFormat`]. Records are plain values: the only mutation the deduplication engine
/// performs is [`KeypointRecord::invalidate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    any(test, feature = "serde"),
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct KeypointRecord {
    pub x: u16,
    pub y: u16,
    pub response: u16,
    pub level: u8,
    pub orientation: u8,
}

impl KeypointRecord {
    /// All bits set. Terminates streams and pads partially filled vectors.
    pub const SENTINEL: KeypointRecord = KeypointRecord {
        x: u16::MAX,
        y: u16::MAX,
        response: u16::MAX,
        level: INVALID_LEVEL,
        orientation: u8::MAX,
    };

    pub fn new(x: u16, y: u16, response: u16, level: u8) -> Self {
        Self {
            x,
            y,
            response,
            level,
            orientation: 0,
        }
    }

    pub fn with_orientation(self, orientation: u8) -> Self {
        Self {
            orientation,
            ..self
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.level != INVALID_LEVEL
    }

    #[inline]
    pub fn is_sentinel(&self) -> bool {
        *self == Self::SENTINEL
    }

    /// An invalid level with anything but the sentinel payload means an upstream stage
    /// produced garbage.
    #[inline]
    pub fn is_malformed(&self) -> bool {
        !self.is_valid() && !self.is_sentinel()
    }

    /// Marks the record as suppressed. Position and response are left untouched.
    #[inline]
    pub fn invalidate(&mut self) {
        self.level = INVALID_LEVEL;
    }

    /// Position in a row-major scan.
    #[inline]
    pub fn scan_key(&self) -> (u16, u16) {
        (self.y, self.x)
    }

    /// Order in which streams are interleaved: by row only, so records of one row compare
    /// equal whatever their column.
    #[inline]
    pub fn row_order(&self, other: &KeypointRecord) -> Ordering {
        self.y.cmp(&other.y)
    }

    /// Squared euclidean distance in fixed-point units.
    #[inline]
    pub fn distance_sq(&self, other: &KeypointRecord) -> u64 {
        let dx = i64::from(self.x) - i64::from(other.x);
        let dy = i64::from(self.y) - i64::from(other.y);
        (dx * dx + dy * dy) as u64
    }
}

/// Split of the 16 coordinate bits into integer and fraction part.
///
/// The integer part is just wide enough to hold the larger image dimension, every remaining
/// bit goes to the fraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    any(test, feature = "serde"),
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct CoordinateFormat {
    fraction_bits: u32,
}

impl CoordinateFormat {
    pub fn for_image(width: u16, height: u16) -> Self {
        let largest = width.max(height).max(1);
        // ceil(log2(largest))
        let integer_bits = u16::BITS - (largest - 1).leading_zeros();
        Self {
            fraction_bits: COORDINATE_BITS - integer_bits,
        }
    }

    pub fn fraction_bits(&self) -> u32 {
        self.fraction_bits
    }

    pub fn integer_bits(&self) -> u32 {
        COORDINATE_BITS - self.fraction_bits
    }

    /// Whole pixels to fixed point. Widened so that the right image border still fits.
    #[inline]
    pub fn pixels_to_fixed(&self, pixels: u32) -> u32 {
        pixels << self.fraction_bits
    }

    /// Rounded, saturating conversion of a pixel position.
    pub fn encode(&self, pixels: f32) -> u16 {
        let scaled = (pixels * (1u32 << self.fraction_bits) as f32).round();
        scaled.clamp(0., u16::MAX as f32) as u16
    }

    pub fn decode(&self, value: u16) -> f32 {
        value as f32 / (1u32 << self.fraction_bits) as f32
    }

    /// Converts a radius with 16 integer and 16 fraction bits to this format.
    pub fn radius(&self, radius_16_16: u32) -> u32 {
        radius_16_16 >> (COORDINATE_BITS - self.fraction_bits)
    }

    /// Square of a 16.16 radius in this format, computed before the shift so that no
    /// precision is lost to truncation of the radius itself.
    pub fn radius_sq(&self, radius_16_16: u32) -> u64 {
        let r = u64::from(radius_16_16);
        (r * r) >> (2 * COORDINATE_BITS - 2 * self.fraction_bits)
    }
}

/// Converts whole pixels to a 16.16 radius.
pub const fn radius_from_pixels(pixels: u16) -> u32 {
    (pixels as u32) << 16
}
