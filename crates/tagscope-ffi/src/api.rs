//! Entry-point table of the native engine.

use std::os::raw::{c_char, c_int, c_uint};

use libloading::Library;

use crate::error::EngineError;
use crate::layout::{ApriltagDetector, ApriltagFamily, ImageU8, MatD, ZArray};

pub type DetectorCreateFn = unsafe extern "C" fn() -> *mut ApriltagDetector;
pub type DetectorDestroyFn = unsafe extern "C" fn(*mut ApriltagDetector);
pub type DetectorAddFamilyFn = unsafe extern "C" fn(*mut ApriltagDetector, *mut ApriltagFamily);
pub type DetectorEnableQuadContoursFn = unsafe extern "C" fn(*mut ApriltagDetector, c_int);
pub type DetectorDetectFn =
    unsafe extern "C" fn(*mut ApriltagDetector, *const ImageU8) -> *mut ZArray;
pub type DetectionsDestroyFn = unsafe extern "C" fn(*mut ZArray);
pub type FamilyCreateFn = unsafe extern "C" fn(*const c_char) -> *mut ApriltagFamily;
pub type FamilyDestroyFn = unsafe extern "C" fn(*mut ApriltagFamily);
pub type FamilyListFn = unsafe extern "C" fn() -> *mut ZArray;
pub type FamilyListDestroyFn = unsafe extern "C" fn(*mut ZArray);
pub type ImageCreateFn = unsafe extern "C" fn(c_uint, c_uint) -> *mut ImageU8;
pub type ImageDestroyFn = unsafe extern "C" fn(*mut ImageU8);
pub type MatdCreateFn = unsafe extern "C" fn(c_int, c_int) -> *mut MatD;
pub type MatdDestroyFn = unsafe extern "C" fn(*mut MatD);
/// `pose_from_homography(H, fx, fy, cx, cy, tagsize, z_sign, corners, init_error, final_error)`.
pub type PoseFromHomographyFn = unsafe extern "C" fn(
    *const MatD,
    f64,
    f64,
    f64,
    f64,
    f64,
    f64,
    *const f64,
    *mut f64,
    *mut f64,
) -> *mut MatD;
pub type VisDetectionsFn = unsafe extern "C" fn(*mut ZArray, *mut ImageU8);

/// Every engine entry point the wrapper calls.
///
/// Resolved eagerly so a partially exported library fails at load time
/// instead of in the middle of a pipeline call.
#[derive(Clone, Copy, Debug)]
pub struct RawApi {
    pub detector_create: DetectorCreateFn,
    pub detector_destroy: DetectorDestroyFn,
    pub detector_add_family: DetectorAddFamilyFn,
    pub detector_enable_quad_contours: DetectorEnableQuadContoursFn,
    pub detector_detect: DetectorDetectFn,
    pub detections_destroy: DetectionsDestroyFn,
    pub family_create: FamilyCreateFn,
    pub family_destroy: FamilyDestroyFn,
    pub family_list: FamilyListFn,
    pub family_list_destroy: FamilyListDestroyFn,
    pub image_u8_create: ImageCreateFn,
    pub image_u8_destroy: ImageDestroyFn,
    pub matd_create: MatdCreateFn,
    pub matd_destroy: MatdDestroyFn,
    pub pose_from_homography: PoseFromHomographyFn,
    pub vis_detections: VisDetectionsFn,
}

macro_rules! resolve {
    ($lib:expr, $ty:ty, $name:literal) => {{
        // SAFETY: the alias type is the engine's declared signature for `$name`.
        let symbol = unsafe { $lib.get::<$ty>(concat!($name, "\0").as_bytes()) };
        let symbol = symbol.map_err(|source| EngineError::MissingSymbol {
            symbol: $name,
            source,
        })?;
        *symbol
    }};
}

impl RawApi {
    /// Resolve every entry point from a loaded engine library.
    ///
    /// The returned function pointers are only valid while `lib` stays loaded.
    pub(crate) fn resolve(lib: &Library) -> Result<Self, EngineError> {
        Ok(Self {
            detector_create: resolve!(lib, DetectorCreateFn, "apriltag_detector_create"),
            detector_destroy: resolve!(lib, DetectorDestroyFn, "apriltag_detector_destroy"),
            detector_add_family: resolve!(lib, DetectorAddFamilyFn, "apriltag_detector_add_family"),
            detector_enable_quad_contours: resolve!(
                lib,
                DetectorEnableQuadContoursFn,
                "apriltag_detector_enable_quad_contours"
            ),
            detector_detect: resolve!(lib, DetectorDetectFn, "apriltag_detector_detect"),
            detections_destroy: resolve!(lib, DetectionsDestroyFn, "apriltag_detections_destroy"),
            family_create: resolve!(lib, FamilyCreateFn, "apriltag_family_create"),
            family_destroy: resolve!(lib, FamilyDestroyFn, "apriltag_family_destroy"),
            family_list: resolve!(lib, FamilyListFn, "apriltag_family_list"),
            family_list_destroy: resolve!(lib, FamilyListDestroyFn, "apriltag_family_list_destroy"),
            image_u8_create: resolve!(lib, ImageCreateFn, "image_u8_create"),
            image_u8_destroy: resolve!(lib, ImageDestroyFn, "image_u8_destroy"),
            matd_create: resolve!(lib, MatdCreateFn, "matd_create"),
            matd_destroy: resolve!(lib, MatdDestroyFn, "matd_destroy"),
            pose_from_homography: resolve!(lib, PoseFromHomographyFn, "pose_from_homography"),
            vis_detections: resolve!(lib, VisDetectionsFn, "apriltag_vis_detections"),
        })
    }
}
