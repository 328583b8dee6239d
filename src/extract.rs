//! Keypoint extraction: windowed local maxima of a response image, packed into vectors.

use itertools::iproduct;
use ndarray::{s, Array2, ArrayView2};
use nshare::AsNdarray2;

use crate::error::{Error, Result};
use crate::filter::LumaFImage;
use crate::keypoint::{CoordinateFormat, KeypointRecord, INVALID_LEVEL};

/// Shape of the neighbourhood a keypoint must dominate.
#[derive(Debug, Clone, PartialEq)]
pub enum NmsMask {
    Square,
    /// Offsets within the kernel radius.
    Circle,
    /// `kernel_size x kernel_size`, true where the neighbour takes part.
    Custom(Array2<bool>),
}

impl NmsMask {
    pub fn build(&self, kernel_size: usize) -> Result<Array2<bool>> {
        match self {
            NmsMask::Square => Ok(Array2::from_elem((kernel_size, kernel_size), true)),
            NmsMask::Circle => Ok(circle_mask(kernel_size)),
            NmsMask::Custom(mask) => {
                if mask.dim() != (kernel_size, kernel_size) {
                    return Err(Error::InvalidParameters(format!(
                        "mask of shape {:?} does not match kernel size {kernel_size}",
                        mask.dim()
                    )));
                }
                Ok(mask.clone())
            }
        }
    }
}

/// Offsets `(i, j)` from the centre with `i^2 + j^2 <= r^2`.
pub fn circle_mask(kernel_size: usize) -> Array2<bool> {
    let r = (kernel_size / 2) as i64;
    Array2::from_shape_fn((kernel_size, kernel_size), |(i, j)| {
        let (di, dj) = (i as i64 - r, j as i64 - r);
        di * di + dj * dj <= r * r
    })
}

#[derive(Debug, Clone)]
pub struct ExtractParams {
    /// Side of the suppression window, odd.
    pub kernel_size: usize,
    pub mask: NmsMask,
    /// Responses must be strictly above this.
    pub threshold: f32,
    /// Pixels at the image edge that never hold a keypoint.
    pub border: usize,
    /// Level tag written into every record.
    pub level: u8,
    /// The response image is downsampled by `2^octave` relative to the full resolution image.
    pub octave: u32,
    pub vector_width: usize,
    pub max_keypoints: usize,
    pub subpixel_refinement: bool,
    /// Applied before responses are saturated to 16 bits.
    pub response_scale: f32,
    /// Full resolution image size, defines the coordinate format.
    pub original_width: u16,
    pub original_height: u16,
}

impl Default for ExtractParams {
    fn default() -> Self {
        Self {
            kernel_size: 3,
            mask: NmsMask::Square,
            threshold: 0.,
            border: 1,
            level: 0,
            octave: 0,
            vector_width: 1,
            max_keypoints: 4096,
            subpixel_refinement: false,
            response_scale: 1.,
            original_width: 640,
            original_height: 480,
        }
    }
}

impl ExtractParams {
    pub fn validate(&self) -> Result<()> {
        if self.kernel_size < 3 || self.kernel_size % 2 == 0 {
            return Err(Error::InvalidParameters(format!(
                "kernel size must be odd and at least 3, got {}",
                self.kernel_size
            )));
        }
        if self.vector_width == 0 {
            return Err(Error::InvalidParameters(
                "vector width must be at least 1".into(),
            ));
        }
        if !(self.response_scale.is_finite() && self.response_scale > 0.) {
            return Err(Error::InvalidParameters(format!(
                "response scale must be positive, got {}",
                self.response_scale
            )));
        }
        if self.level == INVALID_LEVEL {
            return Err(Error::InvalidParameters(format!(
                "level {INVALID_LEVEL} is reserved for invalid records"
            )));
        }
        if self.octave >= 16 {
            return Err(Error::InvalidParameters(format!(
                "octave {} does not fit 16 bit coordinates",
                self.octave
            )));
        }
        if self.original_width == 0 || self.original_height == 0 {
            return Err(Error::InvalidParameters("original image is empty".into()));
        }
        Ok(())
    }

    pub fn format(&self) -> CoordinateFormat {
        CoordinateFormat::for_image(self.original_width, self.original_height)
    }
}

/// Extracts keypoints from a single channel response image.
pub fn extract_from_image(
    response: &LumaFImage,
    params: &ExtractParams,
) -> Result<Vec<KeypointRecord>> {
    extract_keypoints(response.as_ndarray2(), None, params)
}

/// Scans `response` (rows x cols) in raster order.
///
/// The result is a run of vectors of `vector_width` records, one slot per pixel of the
/// vector's pixel group, padded with sentinels. Only vectors holding a keypoint are written,
/// and the stream is closed by an all-sentinel vector.
pub fn extract_keypoints(
    response: ArrayView2<f32>,
    orientation: Option<ArrayView2<u8>>,
    params: &ExtractParams,
) -> Result<Vec<KeypointRecord>> {
    params.validate()?;
    if let Some(orientation) = orientation {
        if orientation.dim() != response.dim() {
            return Err(Error::InvalidParameters(format!(
                "orientation image {:?} does not match response image {:?}",
                orientation.dim(),
                response.dim()
            )));
        }
    }
    let mask = params.mask.build(params.kernel_size)?;
    let format = params.format();
    let (rows, cols) = response.dim();
    let width = params.vector_width;
    let mut out = Vec::new();
    let mut found = 0;

    let border = params.border;
    'rows: for y in border..rows.saturating_sub(border) {
        for group in (0..cols).step_by(width) {
            let mut vector = vec![KeypointRecord::SENTINEL; width];
            let mut any = false;
            for x in group..(group + width).min(cols) {
                if found == params.max_keypoints {
                    break;
                }
                if x < border || x + border >= cols {
                    continue;
                }
                let value = response[[y, x]];
                if value <= params.threshold || !is_local_max(&response, &mask, y, x) {
                    continue;
                }
                let (oy, ox) = if params.subpixel_refinement {
                    match refine(&response, y, x) {
                        Some(offset) => offset,
                        None => continue,
                    }
                } else {
                    (0., 0.)
                };
                let scale = (1u32 << params.octave) as f32;
                let record = KeypointRecord {
                    x: format.encode((x as f32 + ox) * scale),
                    y: format.encode((y as f32 + oy) * scale),
                    response: (value * params.response_scale)
                        .round()
                        .clamp(0., u16::MAX as f32) as u16,
                    level: params.level,
                    orientation: orientation.map_or(0, |o| o[[y, x]]),
                };
                vector[x - group] = record;
                any = true;
                found += 1;
            }
            if any {
                out.extend(vector);
            }
            if found == params.max_keypoints {
                break 'rows;
            }
        }
    }
    out.extend(std::iter::repeat(KeypointRecord::SENTINEL).take(width));
    Ok(out)
}

/// True if `(y, x)` dominates every masked neighbour. On plateaus only the first pixel in
/// raster order qualifies.
fn is_local_max(response: &ArrayView2<f32>, mask: &Array2<bool>, y: usize, x: usize) -> bool {
    let (rows, cols) = response.dim();
    let k = mask.nrows() / 2;
    let center = response[[y, x]];
    iproduct!(0..mask.nrows(), 0..mask.ncols())
        .filter(|&(i, j)| mask[[i, j]] && (i, j) != (k, k))
        .all(|(i, j)| {
            let (Some(ny), Some(nx)) = ((y + i).checked_sub(k), (x + j).checked_sub(k)) else {
                return true;
            };
            if ny >= rows || nx >= cols {
                return true;
            }
            let neighbour = response[[ny, nx]];
            if (i, j) < (k, k) {
                center > neighbour
            } else {
                center >= neighbour
            }
        })
}

/// Offset `(dy, dx)` of the extremum of the quadratic fitted to the 3x3 neighbourhood, if it
/// stays within one pixel.
fn refine(r: &ArrayView2<f32>, y: usize, x: usize) -> Option<(f32, f32)> {
    let (rows, cols) = r.dim();
    if y == 0 || x == 0 || y + 1 >= rows || x + 1 >= cols {
        return None;
    }
    let c = r[[y, x]];
    let dx = (r[[y, x + 1]] - r[[y, x - 1]]) / 2.;
    let dy = (r[[y + 1, x]] - r[[y - 1, x]]) / 2.;
    let dxx = r[[y, x + 1]] + r[[y, x - 1]] - 2. * c;
    let dyy = r[[y + 1, x]] + r[[y - 1, x]] - 2. * c;
    let dxy = (r[[y + 1, x + 1]] + r[[y - 1, x - 1]] - r[[y - 1, x + 1]] - r[[y + 1, x - 1]]) / 4.;

    let det = dyy * dxx - dxy * dxy;
    if det == 0. || dxx == 0. {
        return None;
    }
    let oy = (dx * dxy - dy * dxx) / det;
    let ox = (-dx - dxy * oy) / dxx;
    (ox.abs() <= 1. && oy.abs() <= 1.).then_some((oy, ox))
}

/// Determinant of the Hessian from central second differences. The one pixel frame is zero.
pub fn hessian_response(img: ArrayView2<f32>) -> Array2<f32> {
    let (h, w) = img.dim();
    let mut out = Array2::zeros((h, w));
    if h < 3 || w < 3 {
        return out;
    }
    let c = img.slice(s![1..h - 1, 1..w - 1]);
    let left = img.slice(s![1..h - 1, 0..w - 2]);
    let right = img.slice(s![1..h - 1, 2..w]);
    let up = img.slice(s![0..h - 2, 1..w - 1]);
    let down = img.slice(s![2..h, 1..w - 1]);
    let up_left = img.slice(s![0..h - 2, 0..w - 2]);
    let up_right = img.slice(s![0..h - 2, 2..w]);
    let down_left = img.slice(s![2..h, 0..w - 2]);
    let down_right = img.slice(s![2..h, 2..w]);

    let dxx = &left + &right - &c * 2.;
    let dyy = &up + &down - &c * 2.;
    let dxy = (&down_right + &up_left - &up_right - &down_left) / 4.;
    let det = &dxx * &dyy - &dxy * &dxy;
    out.slice_mut(s![1..h - 1, 1..w - 1]).assign(&det);
    out
}
