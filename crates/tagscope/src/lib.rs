//! AprilTag detection and pose estimation over the native AprilTag engine.
//!
//! This crate provides:
//! - re-exports of the workspace crates (`ffi`, `core`, `detector`),
//! - (feature `image`) helpers that run detection on `image` buffers and
//!   draw pose boxes, axes and tag ids onto the engine's overlay.
//!
//! ## Quickstart
//!
//! ```no_run
//! use tagscope::{CameraParams, Detector, DetectorOptions, SearchPaths, ZSign};
//! use tagscope::detect;
//! use image::ImageReader;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let img = ImageReader::open("tags.png")?.decode()?.to_luma8();
//! let detector = Detector::new(DetectorOptions::default(), &SearchPaths::from_env())?;
//! let camera = CameraParams::new(3156.7, 3129.5, 359.1, 239.7)?;
//!
//! for det in detect::detect_tags(&detector, &img)? {
//!     let pose = detector.estimate_pose(&det, &camera, 0.0762, ZSign::Positive)?;
//!     println!("{det}\n{pose}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Locating the engine
//!
//! [`SearchPaths::from_env`] reads extra directories from
//! `APRILTAG_LIB_PATH`; when none of them holds the library, the system
//! loader's default search applies.
//!
//! ## API map
//! - `tagscope::ffi`: layouts, engine loading, owned handles and views.
//! - `tagscope::core`: detections, poses, camera intrinsics, gray images.
//! - `tagscope::detector`: the detector, its options and the pose adapter.
//! - `tagscope::detect` (feature `image`): detection on `image::GrayImage`.
//! - `tagscope::draw` (feature `image`): overlay composition and annotation.

pub use tagscope_core as core;
pub use tagscope_detector as detector;
pub use tagscope_ffi as ffi;

pub use tagscope_core::{CameraParams, Detection, GrayImage, GrayImageView, Pose, ZSign};
pub use tagscope_detector::{
    DetectError, Detector, DetectorOptions, FamilyRegistration, FamilySelection, SearchPaths,
};

#[cfg(feature = "image")]
pub mod detect;
#[cfg(feature = "image")]
pub mod draw;
