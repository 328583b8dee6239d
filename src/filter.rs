use image::imageops::{resize, FilterType};
use image::{GrayImage, ImageBuffer, Luma};
use imageproc::distance_transform::Norm;
use imageproc::filter::{box_filter, gaussian_blur_f32, median_filter};
use imageproc::gradients::{horizontal_scharr, horizontal_sobel, vertical_scharr, vertical_sobel};
use imageproc::morphology::dilate;

pub type LumaFImage = ImageBuffer<Luma<f32>, Vec<f32>>;
pub type GradientImage = ImageBuffer<Luma<i16>, Vec<i16>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DerivativeKernel {
    #[default]
    Sobel,
    Scharr,
}

/// Image operations used before keypoint extraction.
/// Swapping the implementation makes it possible to compare against other libraries on
/// identical filtering.
pub trait Filtering {
    fn box_blur(img: &GrayImage, radius: u32) -> GrayImage;
    fn gaussian_blur(img: &LumaFImage, sigma: f64) -> LumaFImage;
    fn median(img: &GrayImage, radius: u32) -> GrayImage;
    /// Horizontal and vertical derivatives.
    fn gradients(img: &GrayImage, kernel: DerivativeKernel) -> (GradientImage, GradientImage);
    /// Maximum over the `(2 radius + 1)` square around each pixel.
    fn dilate(img: &GrayImage, radius: u8) -> GrayImage;
    fn resize_linear(img: &LumaFImage, width: u32, height: u32) -> LumaFImage;
}

/// Uses `imageproc` filters and `image` resizing.
pub struct ImageprocFiltering;

impl Filtering for ImageprocFiltering {
    fn box_blur(img: &GrayImage, radius: u32) -> GrayImage {
        box_filter(img, radius, radius)
    }

    fn gaussian_blur(img: &LumaFImage, sigma: f64) -> LumaFImage {
        gaussian_blur_f32(img, sigma as f32)
    }

    fn median(img: &GrayImage, radius: u32) -> GrayImage {
        median_filter(img, radius, radius)
    }

    fn gradients(img: &GrayImage, kernel: DerivativeKernel) -> (GradientImage, GradientImage) {
        match kernel {
            DerivativeKernel::Sobel => (horizontal_sobel(img), vertical_sobel(img)),
            DerivativeKernel::Scharr => (horizontal_scharr(img), vertical_scharr(img)),
        }
    }

    fn dilate(img: &GrayImage, radius: u8) -> GrayImage {
        dilate(img, Norm::LInf, radius)
    }

    fn resize_linear(img: &LumaFImage, width: u32, height: u32) -> LumaFImage {
        resize(img, width, height, FilterType::Triangle)
    }
}

/// Gradient direction quantized to a byte, a full turn spanning 256 steps.
pub fn quantize_orientation(gx: i16, gy: i16) -> u8 {
    let angle = f32::from(gy).atan2(f32::from(gx));
    let turns = angle.rem_euclid(std::f32::consts::TAU) / std::f32::consts::TAU;
    ((turns * 256.).round() as u32 % 256) as u8
}
