//! Streaming radius non-maximum suppression for keypoint pyramids.
//!
//! Keypoints of one pyramid level arrive as row-ordered streams of fixed point
//! [`KeypointRecord`]s, together with the streams of the neighbouring levels. The
//! [`DedupEngine`] keeps a sliding window of recently seen records and suppresses every
//! record that has a stronger one within the search radius, emitting the survivors of the
//! current level in scan order.
//!
//! ```no_run
//! use keypoint_dedup::{deduplicate, detect_keypoints, DedupParams, ExtractParams, InputStreams};
//!
//! let img = image::open("image.png").unwrap().to_luma8();
//! let extract = ExtractParams {
//!     original_width: img.width() as u16,
//!     original_height: img.height() as u16,
//!     response_scale: 65535.,
//!     ..ExtractParams::default()
//! };
//! let current = detect_keypoints(&img, &extract).unwrap();
//! let params = DedupParams {
//!     image_width: img.width() as u16,
//!     image_height: img.height() as u16,
//!     ..DedupParams::default()
//! };
//! let output = deduplicate(&params, InputStreams::current_only(&current)).unwrap();
//! println!("{} keypoints", output.survivors().len());
//! ```

use image::buffer::ConvertBuffer;
use image::GrayImage;
use log::debug;
use ndarray::Array2;
use nshare::AsNdarray2;

mod dual_buffer;
mod engine;
mod error;
mod extract;
mod filter;
mod gather;
mod keypoint;
mod merger;
mod params;
mod policy;
mod prefetch;
mod ring_buffer;
mod serialize;
mod sink;

pub use dual_buffer::DualBuffer;
pub use engine::{DedupEngine, DedupOutput, DedupStats, EngineState};
pub use error::{Error, Result};
pub use extract::{
    circle_mask, extract_from_image, extract_keypoints, hessian_response, ExtractParams, NmsMask,
};
pub use filter::{
    quantize_orientation, DerivativeKernel, Filtering, GradientImage, ImageprocFiltering,
    LumaFImage,
};
pub use gather::{gather, GatherInput, GatherMode};
pub use keypoint::{radius_from_pixels, CoordinateFormat, KeypointRecord, INVALID_LEVEL};
pub use merger::{InputStreams, StreamMerger, StreamOrigin};
pub use params::{
    max_steps, CapacityPlan, DedupParams, InputLimits, MIN_PREFETCH_DEPTH, SUPPORTED_LANE_COUNTS,
};
pub use policy::{AkazePolicy, ComparePolicy};
pub use prefetch::PrefetchWindow;
pub use ring_buffer::RingBuffer;
pub use serialize::{deserialize, serialize};
pub use sink::OutputSink;

/// Blur applied before the Hessian response is computed.
const DETECTION_SIGMA: f64 = 1.0;

/// Suppresses the current level stream of `streams` with the default AKAZE rules.
pub fn deduplicate(params: &DedupParams, streams: InputStreams) -> Result<DedupOutput> {
    Ok(DedupEngine::new(params, streams)?.run())
}

/// Suppresses the current level stream of `streams` with a custom comparison policy.
pub fn deduplicate_with_policy<P: ComparePolicy>(
    params: &DedupParams,
    streams: InputStreams,
    policy: P,
) -> Result<DedupOutput> {
    Ok(DedupEngine::with_policy(params, streams, policy)?.run())
}

/// Detect keypoints on a single image using default filter implementations.
pub fn detect_keypoints(img: &GrayImage, params: &ExtractParams) -> Result<Vec<KeypointRecord>> {
    detect_keypoints_with_filtering::<ImageprocFiltering>(img, params)
}

/// Detect keypoints on a single image using the provided filter implementations.
///
/// The image is blurred, its determinant of Hessian becomes the response and the Sobel
/// gradient direction the orientation of each keypoint. Responses of images in `[0, 1]`
/// are small, so `params.response_scale` should be set accordingly.
pub fn detect_keypoints_with_filtering<F: Filtering>(
    img: &GrayImage,
    params: &ExtractParams,
) -> Result<Vec<KeypointRecord>> {
    let img_f32: LumaFImage = img.convert();
    detect_level::<F>(&img_f32, params)
}

/// Detects keypoints on `levels` images, each half the size of the previous one.
/// Records of level `l` carry level tag `l` and coordinates of the full resolution image.
pub fn detect_pyramid<F: Filtering>(
    img: &GrayImage,
    levels: u8,
    params: &ExtractParams,
) -> Result<Vec<Vec<KeypointRecord>>> {
    let original_width = u16::try_from(img.width())
        .map_err(|_| Error::InvalidParameters(format!("image width {} too large", img.width())))?;
    let original_height = u16::try_from(img.height()).map_err(|_| {
        Error::InvalidParameters(format!("image height {} too large", img.height()))
    })?;
    let base: LumaFImage = img.convert();
    (0..levels)
        .map(|level| {
            let level_params = ExtractParams {
                level,
                octave: u32::from(level),
                original_width,
                original_height,
                ..params.clone()
            };
            level_params.validate()?;
            let width = (base.width() >> level).max(1);
            let height = (base.height() >> level).max(1);
            let records = if level == 0 {
                detect_level::<F>(&base, &level_params)?
            } else {
                detect_level::<F>(&F::resize_linear(&base, width, height), &level_params)?
            };
            debug!(
                "level {level}: {width}x{height}, {} keypoints",
                records.iter().filter(|kp| kp.is_valid()).count()
            );
            Ok(records)
        })
        .collect()
}

/// Runs the engine once per level, each level seeing its neighbours as previous and next
/// stream. `params.current_level` is overridden.
pub fn deduplicate_pyramid(
    levels: &[Vec<KeypointRecord>],
    params: &DedupParams,
) -> Result<Vec<DedupOutput>> {
    let empty: &[KeypointRecord] = &[];
    levels
        .iter()
        .enumerate()
        .map(|(index, current)| {
            let current_level = u8::try_from(index)
                .ok()
                .filter(|&level| level != INVALID_LEVEL)
                .ok_or_else(|| Error::InvalidParameters(format!("too many levels: {index}")))?;
            let streams = InputStreams {
                current,
                previous: index.checked_sub(1).map_or(empty, |i| levels[i].as_slice()),
                next: levels.get(index + 1).map_or(empty, Vec::as_slice),
            };
            let level_params = DedupParams {
                current_level,
                ..params.clone()
            };
            deduplicate(&level_params, streams)
        })
        .collect()
}

fn detect_level<F: Filtering>(
    img: &LumaFImage,
    params: &ExtractParams,
) -> Result<Vec<KeypointRecord>> {
    let blurred = F::gaussian_blur(img, DETECTION_SIGMA);
    let response = hessian_response(blurred.as_ndarray2());
    let img_u8: GrayImage = img.convert();
    let (gx, gy) = F::gradients(&img_u8, DerivativeKernel::Sobel);
    let orientation = Array2::from_shape_fn(response.dim(), |(y, x)| {
        let (x, y) = (x as u32, y as u32);
        quantize_orientation(gx.get_pixel(x, y)[0], gy.get_pixel(x, y)[0])
    });
    extract_keypoints(response.view(), Some(orientation.view()), params)
}
