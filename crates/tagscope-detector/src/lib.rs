//! Safe AprilTag detection on top of the native engine.
//!
//! A [`Detector`] owns one engine detector handle plus the tag family
//! descriptors registered with it, and runs the full
//! allocate → copy → detect → extract → free protocol per call:
//!
//! ```no_run
//! use tagscope_core::GrayImageView;
//! use tagscope_detector::{Detector, DetectorOptions, SearchPaths};
//!
//! let detector = Detector::new(DetectorOptions::default(), &SearchPaths::from_env())?;
//! let pixels = vec![255u8; 640 * 480];
//! let image = GrayImageView::new(640, 480, &pixels)?;
//! for det in detector.detect(&image)? {
//!     println!("{det}");
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Results are plain values from `tagscope-core`; nothing returned here
//! borrows engine memory.

mod detector;
mod error;
mod options;
mod pipeline;
mod pose;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use detector::{Detector, FamilyRegistration};
pub use error::DetectError;
pub use options::{ConfigIoError, DetectorConfig, DetectorOptions, FamilySelection, OptionsError};

pub use tagscope_ffi::{Engine, EngineError, EngineOrigin, SearchPaths};
