//! Owned value types for AprilTag detection.
//!
//! Everything here is plain data: detections, poses, camera intrinsics and
//! grayscale rasters that outlive any engine allocation they were copied
//! from. This crate does not depend on the native engine.

mod camera;
mod detection;
mod image;
mod logger;
mod pose;

pub use camera::{CameraParams, CameraParamsError};
pub use detection::{hamming_histogram, Detection, HAMMING_HISTOGRAM_BINS};
pub use image::{GrayImage, GrayImageView, ImageError};
pub use pose::{Pose, ZSign};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::{init_from_env, init_with_level, LOG_LEVEL_ENV};
