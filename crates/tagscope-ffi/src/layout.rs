//! `#[repr(C)]` mirrors of the engine's public structures.
//!
//! Field order and widths must match the compiled engine exactly. Nothing
//! here is checked at runtime; the layout tests at the bottom of this file
//! pin sizes and offsets for 64-bit targets.

use std::os::raw::{c_char, c_float, c_int, c_uint};

/// `image_u8_t`: 8-bit raster with engine-chosen row padding.
///
/// `stride >= width`; only the first `width` bytes of each row are pixels.
#[repr(C)]
#[derive(Debug)]
pub struct ImageU8 {
    pub width: i32,
    pub height: i32,
    pub stride: i32,
    pub buf: *mut u8,
}

/// `matd_t`: matrix header followed by `nrows * ncols` row-major doubles.
///
/// `data` is a C flexible array member. Never create a `MatD` by value; the
/// payload lives past the end of the header in the same allocation.
#[repr(C)]
#[derive(Debug)]
pub struct MatD {
    pub nrows: c_uint,
    pub ncols: c_uint,
    pub data: [f64; 0],
}

/// `zarray_t`: the engine's generic growable array.
///
/// Read-only from this side.
#[repr(C)]
#[derive(Debug)]
pub struct ZArray {
    pub el_sz: usize,
    pub size: c_int,
    pub alloc: c_int,
    pub data: *mut c_char,
}

/// `apriltag_family_t`.
#[repr(C)]
#[derive(Debug)]
pub struct ApriltagFamily {
    pub ncodes: u32,
    pub codes: *mut u64,
    /// Border width in bits, read by the engine when decoding.
    pub black_border: u32,
    /// Bit dimension: codes are `d * d` bits.
    pub d: u32,
    /// Minimum hamming distance between codes.
    pub h: u32,
    pub name: *mut c_char,
}

/// `apriltag_detection_t`.
#[repr(C)]
#[derive(Debug)]
pub struct ApriltagDetection {
    /// Process-owned family descriptor; never released per detection.
    pub family: *mut ApriltagFamily,
    pub id: c_int,
    pub hamming: c_int,
    /// Deprecated by most engine builds and often zero. Kept for layout.
    pub goodness: c_float,
    pub decision_margin: c_float,
    /// 3x3 homography mapping the tag square `[-1, 1]^2` into the image.
    pub h: *mut MatD,
    pub c: [f64; 2],
    pub p: [[f64; 2]; 4],
}

/// Public prefix of `apriltag_detector_t`.
///
/// The engine allocates the full structure; the wrapper only ever reads or
/// writes these leading configuration fields through a pointer, so the
/// private tail does not need a mirror.
#[repr(C)]
#[derive(Debug)]
pub struct ApriltagDetector {
    pub nthreads: c_int,
    pub quad_decimate: c_float,
    pub quad_sigma: c_float,
    pub refine_edges: c_int,
    pub refine_decode: c_int,
    pub refine_pose: c_int,
    pub debug: c_int,
    pub quad_contours: c_int,
}

#[cfg(all(test, target_pointer_width = "64"))]
mod tests {
    use super::*;
    use std::mem::{align_of, offset_of, size_of};

    #[test]
    fn image_u8_layout() {
        assert_eq!(size_of::<ImageU8>(), 24);
        assert_eq!(offset_of!(ImageU8, stride), 8);
        assert_eq!(offset_of!(ImageU8, buf), 16);
    }

    #[test]
    fn matd_payload_follows_header() {
        assert_eq!(size_of::<MatD>(), 8);
        assert_eq!(align_of::<MatD>(), 8);
        assert_eq!(offset_of!(MatD, data), 8);
    }

    #[test]
    fn zarray_layout() {
        assert_eq!(size_of::<ZArray>(), 24);
        assert_eq!(offset_of!(ZArray, size), 8);
        assert_eq!(offset_of!(ZArray, alloc), 12);
        assert_eq!(offset_of!(ZArray, data), 16);
    }

    #[test]
    fn family_layout() {
        assert_eq!(offset_of!(ApriltagFamily, codes), 8);
        assert_eq!(offset_of!(ApriltagFamily, black_border), 16);
        assert_eq!(offset_of!(ApriltagFamily, d), 20);
        assert_eq!(offset_of!(ApriltagFamily, h), 24);
        assert_eq!(offset_of!(ApriltagFamily, name), 32);
        assert_eq!(size_of::<ApriltagFamily>(), 40);
    }

    #[test]
    fn detection_layout() {
        assert_eq!(offset_of!(ApriltagDetection, id), 8);
        assert_eq!(offset_of!(ApriltagDetection, hamming), 12);
        assert_eq!(offset_of!(ApriltagDetection, goodness), 16);
        assert_eq!(offset_of!(ApriltagDetection, decision_margin), 20);
        assert_eq!(offset_of!(ApriltagDetection, h), 24);
        assert_eq!(offset_of!(ApriltagDetection, c), 32);
        assert_eq!(offset_of!(ApriltagDetection, p), 48);
        assert_eq!(size_of::<ApriltagDetection>(), 112);
    }

    #[test]
    fn detector_prefix_layout() {
        assert_eq!(offset_of!(ApriltagDetector, quad_decimate), 4);
        assert_eq!(offset_of!(ApriltagDetector, quad_sigma), 8);
        assert_eq!(offset_of!(ApriltagDetector, refine_edges), 12);
        assert_eq!(offset_of!(ApriltagDetector, debug), 24);
        assert_eq!(offset_of!(ApriltagDetector, quad_contours), 28);
        assert_eq!(size_of::<ApriltagDetector>(), 32);
    }
}
