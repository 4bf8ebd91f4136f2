//! Detection on `image` crate buffers.

use image::{DynamicImage, ImageBuffer};
use tagscope_core::{Detection, GrayImage, GrayImageView};
use tagscope_detector::{DetectError, Detector};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Borrow an `image::GrayImage` as the lightweight `tagscope-core` view.
pub fn gray_view(img: &::image::GrayImage) -> GrayImageView<'_> {
    GrayImageView {
        width: img.width() as usize,
        height: img.height() as usize,
        data: img.as_raw(),
    }
}

/// Move a `tagscope-core` raster into an `image::GrayImage`.
///
/// `None` if the buffer length does not match the dimensions.
pub fn to_image(raster: GrayImage) -> Option<::image::GrayImage> {
    let width = u32::try_from(raster.width).ok()?;
    let height = u32::try_from(raster.height).ok()?;
    ImageBuffer::from_raw(width, height, raster.data)
}

/// Detect tags in a grayscale image.
#[cfg_attr(
    feature = "tracing",
    instrument(
        level = "info",
        skip(detector, img),
        fields(width = img.width(), height = img.height())
    )
)]
pub fn detect_tags(
    detector: &Detector,
    img: &::image::GrayImage,
) -> Result<Vec<Detection>, DetectError> {
    detector.detect(&gray_view(img))
}

/// Detect tags in any decoded image; color input is converted to luma first.
pub fn detect_tags_dynamic(
    detector: &Detector,
    img: &DynamicImage,
) -> Result<Vec<Detection>, DetectError> {
    match img {
        DynamicImage::ImageLuma8(gray) => detect_tags(detector, gray),
        other => detect_tags(detector, &other.to_luma8()),
    }
}
