//! In-process engine double.
//!
//! Implements every engine entry point in Rust over the same `#[repr(C)]`
//! layouts the real library uses: rasters are stride-padded (padding bytes
//! hold [`PADDING_BYTE`]), matrices carry their payload after the header,
//! and result arrays own heap-allocated records. Allocation and release
//! counts are kept per thread in [`EngineStats`].
//!
//! Detection is a stand-in: the bounding box of all dark pixels becomes a
//! single tag of the first registered family, with id [`FAKE_TAG_ID`].
//! Pose estimation decomposes the homography with the pinhole model and
//! reports the RMS corner reprojection error.

use std::alloc::{self, Layout};
use std::cell::{Cell, RefCell};
use std::ffi::{CStr, CString};
use std::mem::{align_of, size_of};
use std::os::raw::{c_char, c_int, c_uint};
use std::ptr;
use std::slice;

use nalgebra::{Matrix3, Vector3};
use tagscope_ffi::layout::{
    ApriltagDetection, ApriltagDetector, ApriltagFamily, ImageU8, MatD, ZArray,
};
use tagscope_ffi::{Engine, RawApi};

/// Families the double "compiles in".
pub const FAMILIES: [&CStr; 6] = [
    c"tag16h5",
    c"tag25h7",
    c"tag25h9",
    c"tag36h10",
    c"tag36h11",
    c"tag36artoolkit",
];

/// Row alignment of rasters, in bytes.
pub const ROW_ALIGNMENT: usize = 96;
/// Value of every padding byte in a fresh raster.
pub const PADDING_BYTE: u8 = 0xA5;
pub const FAKE_TAG_ID: i32 = 7;

const DARK_THRESHOLD: u8 = 128;
const DECISION_MARGIN: f32 = 50.0;

/// Tag-square corners in the order records report them.
const UNIT_CORNERS: [[f64; 2]; 4] = [[-1.0, -1.0], [1.0, -1.0], [1.0, 1.0], [-1.0, 1.0]];

/// Per-thread allocation bookkeeping.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub detectors_live: i64,
    pub detectors_destroyed: usize,
    pub families_live: i64,
    /// Family descriptors released while a live detector still held them.
    pub families_released_while_attached: usize,
    pub family_lists_live: i64,
    pub images_created: usize,
    pub images_live: i64,
    pub matrices_created: usize,
    pub matrices_live: i64,
    /// Detection result arrays.
    pub arrays_live: i64,
    pub detect_calls: usize,
    pub vis_calls: usize,
    pub pose_calls: usize,
}

/// Entry points that can be told to return null once.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailPoint {
    DetectorCreate,
    ImageCreate,
    MatrixCreate,
    Detect,
    Pose,
}

thread_local! {
    static STATS: Cell<EngineStats> = Cell::new(EngineStats::default());
    static FAIL_NEXT: Cell<Option<FailPoint>> = const { Cell::new(None) };
    static ATTACHED: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
    static BORDERS: RefCell<Vec<u32>> = const { RefCell::new(Vec::new()) };
}

/// Counters for the calling thread.
pub fn stats() -> EngineStats {
    STATS.with(Cell::get)
}

/// Make the next call to `point` on this thread return null.
pub fn fail_next(point: FailPoint) {
    FAIL_NEXT.with(|f| f.set(Some(point)));
}

/// `black_border` of every family, as seen when it was added to a detector.
pub fn registered_borders() -> Vec<u32> {
    BORDERS.with(|b| b.borrow().clone())
}

/// Entry-point table of the double.
pub fn raw_api() -> RawApi {
    RawApi {
        detector_create,
        detector_destroy,
        detector_add_family,
        detector_enable_quad_contours,
        detector_detect,
        detections_destroy,
        family_create,
        family_destroy,
        family_list,
        family_list_destroy,
        image_u8_create,
        image_u8_destroy,
        matd_create,
        matd_destroy,
        pose_from_homography,
        vis_detections,
    }
}

pub fn engine() -> Engine {
    Engine::from_api(raw_api())
}

fn update(f: impl FnOnce(&mut EngineStats)) {
    STATS.with(|s| {
        let mut stats = s.get();
        f(&mut stats);
        s.set(stats);
    });
}

fn should_fail(point: FailPoint) -> bool {
    FAIL_NEXT.with(|f| {
        if f.get() == Some(point) {
            f.set(None);
            true
        } else {
            false
        }
    })
}

// Handed out as a pointer to its `ApriltagDetector` prefix.
#[repr(C)]
struct FakeDetector {
    #[allow(dead_code)]
    config: ApriltagDetector,
    families: Vec<*mut ApriltagFamily>,
}

unsafe extern "C" fn detector_create() -> *mut ApriltagDetector {
    if should_fail(FailPoint::DetectorCreate) {
        return ptr::null_mut();
    }
    update(|s| s.detectors_live += 1);
    let detector = Box::new(FakeDetector {
        config: ApriltagDetector {
            nthreads: 1,
            quad_decimate: 1.0,
            quad_sigma: 0.0,
            refine_edges: 1,
            refine_decode: 0,
            refine_pose: 0,
            debug: 0,
            quad_contours: 0,
        },
        families: Vec::new(),
    });
    Box::into_raw(detector).cast()
}

unsafe extern "C" fn detector_destroy(td: *mut ApriltagDetector) {
    let detector = unsafe { Box::from_raw(td.cast::<FakeDetector>()) };
    ATTACHED.with(|a| {
        a.borrow_mut()
            .retain(|&p| !detector.families.iter().any(|&f| f as usize == p))
    });
    update(|s| {
        s.detectors_live -= 1;
        s.detectors_destroyed += 1;
    });
}

unsafe extern "C" fn detector_add_family(td: *mut ApriltagDetector, family: *mut ApriltagFamily) {
    let detector = unsafe { &mut *td.cast::<FakeDetector>() };
    detector.families.push(family);
    ATTACHED.with(|a| a.borrow_mut().push(family as usize));
    let border = unsafe { (*family).black_border };
    BORDERS.with(|b| b.borrow_mut().push(border));
}

unsafe extern "C" fn detector_enable_quad_contours(td: *mut ApriltagDetector, enable: c_int) {
    unsafe { (*td).quad_contours = enable };
}

fn family_geometry(name: &str) -> (u32, u32) {
    let Some(rest) = name.strip_prefix("tag") else {
        return (0, 0);
    };
    let Some((bits, h)) = rest.split_once('h') else {
        return (0, 0);
    };
    let d = bits.parse::<f64>().map(|b| b.sqrt() as u32).unwrap_or(0);
    (d, h.parse().unwrap_or(0))
}

unsafe extern "C" fn family_create(name: *const c_char) -> *mut ApriltagFamily {
    if name.is_null() {
        return ptr::null_mut();
    }
    let name = unsafe { CStr::from_ptr(name) };
    if !FAMILIES.contains(&name) {
        return ptr::null_mut();
    }
    let (d, h) = family_geometry(&name.to_string_lossy());
    update(|s| s.families_live += 1);
    Box::into_raw(Box::new(ApriltagFamily {
        ncodes: 0,
        codes: ptr::null_mut(),
        black_border: 1,
        d,
        h,
        name: CString::from(name).into_raw(),
    }))
}

unsafe extern "C" fn family_destroy(family: *mut ApriltagFamily) {
    let attached = ATTACHED.with(|a| a.borrow().contains(&(family as usize)));
    let family = unsafe { Box::from_raw(family) };
    drop(unsafe { CString::from_raw(family.name) });
    update(|s| {
        s.families_live -= 1;
        if attached {
            s.families_released_while_attached += 1;
        }
    });
}

fn zarray_from_vec<T>(items: Vec<T>) -> *mut ZArray {
    let len = items.len();
    let data = if len == 0 {
        ptr::null_mut()
    } else {
        Box::into_raw(items.into_boxed_slice()).cast::<c_char>()
    };
    Box::into_raw(Box::new(ZArray {
        el_sz: size_of::<T>(),
        size: len as c_int,
        alloc: len as c_int,
        data,
    }))
}

unsafe fn zarray_into_vec<T>(arr: *mut ZArray) -> Vec<T> {
    let arr = unsafe { Box::from_raw(arr) };
    if arr.data.is_null() {
        return Vec::new();
    }
    let items = ptr::slice_from_raw_parts_mut(arr.data.cast::<T>(), arr.size as usize);
    unsafe { Box::from_raw(items) }.into_vec()
}

unsafe extern "C" fn family_list() -> *mut ZArray {
    update(|s| s.family_lists_live += 1);
    zarray_from_vec::<*const c_char>(FAMILIES.iter().map(|name| name.as_ptr()).collect())
}

unsafe extern "C" fn family_list_destroy(arr: *mut ZArray) {
    drop(unsafe { zarray_into_vec::<*const c_char>(arr) });
    update(|s| s.family_lists_live -= 1);
}

unsafe extern "C" fn image_u8_create(width: c_uint, height: c_uint) -> *mut ImageU8 {
    if should_fail(FailPoint::ImageCreate) || width == 0 || height == 0 {
        return ptr::null_mut();
    }
    let (w, h) = (width as usize, height as usize);
    let stride = w.div_ceil(ROW_ALIGNMENT) * ROW_ALIGNMENT;
    let mut buf = vec![PADDING_BYTE; stride * h];
    for row in buf.chunks_exact_mut(stride) {
        row[..w].fill(0);
    }
    update(|s| {
        s.images_created += 1;
        s.images_live += 1;
    });
    Box::into_raw(Box::new(ImageU8 {
        width: width as i32,
        height: height as i32,
        stride: stride as i32,
        buf: Box::into_raw(buf.into_boxed_slice()).cast::<u8>(),
    }))
}

unsafe extern "C" fn image_u8_destroy(im: *mut ImageU8) {
    let im = unsafe { Box::from_raw(im) };
    let len = im.stride as usize * im.height as usize;
    drop(unsafe { Box::from_raw(ptr::slice_from_raw_parts_mut(im.buf, len)) });
    update(|s| s.images_live -= 1);
}

fn matrix_layout(rows: usize, cols: usize) -> Option<Layout> {
    let payload = rows.checked_mul(cols)?.checked_mul(size_of::<f64>())?;
    Layout::from_size_align(size_of::<MatD>() + payload, align_of::<MatD>()).ok()
}

fn alloc_matrix(rows: usize, cols: usize) -> *mut MatD {
    let Some(layout) = matrix_layout(rows, cols) else {
        return ptr::null_mut();
    };
    // SAFETY: the layout is never zero-sized (it includes the header).
    let m = unsafe { alloc::alloc_zeroed(layout) }.cast::<MatD>();
    if m.is_null() {
        return m;
    }
    // SAFETY: freshly allocated and large enough for the header.
    unsafe {
        m.write(MatD {
            nrows: rows as c_uint,
            ncols: cols as c_uint,
            data: [],
        })
    };
    update(|s| {
        s.matrices_created += 1;
        s.matrices_live += 1;
    });
    m
}

unsafe fn payload_mut<'a>(m: *mut MatD) -> &'a mut [f64] {
    let len = unsafe { (*m).nrows as usize * (*m).ncols as usize };
    unsafe { slice::from_raw_parts_mut(ptr::addr_of_mut!((*m).data).cast::<f64>(), len) }
}

unsafe extern "C" fn matd_create(rows: c_int, cols: c_int) -> *mut MatD {
    if should_fail(FailPoint::MatrixCreate) || rows <= 0 || cols <= 0 {
        return ptr::null_mut();
    }
    alloc_matrix(rows as usize, cols as usize)
}

unsafe extern "C" fn matd_destroy(m: *mut MatD) {
    let (rows, cols) = unsafe { ((*m).nrows as usize, (*m).ncols as usize) };
    if let Some(layout) = matrix_layout(rows, cols) {
        unsafe { alloc::dealloc(m.cast::<u8>(), layout) };
    }
    update(|s| s.matrices_live -= 1);
}

unsafe extern "C" fn detector_detect(td: *mut ApriltagDetector, im: *const ImageU8) -> *mut ZArray {
    update(|s| s.detect_calls += 1);
    if should_fail(FailPoint::Detect) {
        return ptr::null_mut();
    }
    let detector = unsafe { &*td.cast::<FakeDetector>() };
    let im = unsafe { &*im };
    let (w, h) = (im.width as usize, im.height as usize);
    let stride = im.stride as usize;
    let buf = unsafe { slice::from_raw_parts(im.buf, stride * h) };

    let mut bbox: Option<(usize, usize, usize, usize)> = None;
    for (y, row) in buf.chunks_exact(stride).enumerate() {
        for (x, _) in row[..w]
            .iter()
            .enumerate()
            .filter(|&(_, &v)| v < DARK_THRESHOLD)
        {
            bbox = Some(match bbox {
                None => (x, y, x, y),
                Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
            });
        }
    }

    let mut records: Vec<*mut ApriltagDetection> = Vec::new();
    if let (Some((x0, y0, x1, y1)), Some(&family)) = (bbox, detector.families.first()) {
        let cx = (x0 + x1 + 1) as f64 / 2.0;
        let cy = (y0 + y1 + 1) as f64 / 2.0;
        let sx = (x1 + 1 - x0) as f64 / 2.0;
        let sy = (y1 + 1 - y0) as f64 / 2.0;
        let hmat = alloc_matrix(3, 3);
        if !hmat.is_null() {
            let payload = unsafe { payload_mut(hmat) };
            payload.copy_from_slice(&[sx, 0.0, cx, 0.0, sy, cy, 0.0, 0.0, 1.0]);
        }
        records.push(Box::into_raw(Box::new(ApriltagDetection {
            family,
            id: FAKE_TAG_ID,
            hamming: 0,
            goodness: 0.0,
            decision_margin: DECISION_MARGIN,
            h: hmat,
            c: [cx, cy],
            p: UNIT_CORNERS.map(|[u, v]| [cx + sx * u, cy + sy * v]),
        })));
    }
    update(|s| s.arrays_live += 1);
    zarray_from_vec(records)
}

unsafe extern "C" fn detections_destroy(arr: *mut ZArray) {
    for record in unsafe { zarray_into_vec::<*mut ApriltagDetection>(arr) } {
        let record = unsafe { Box::from_raw(record) };
        if !record.h.is_null() {
            unsafe { matd_destroy(record.h) };
        }
    }
    update(|s| s.arrays_live -= 1);
}

unsafe extern "C" fn vis_detections(arr: *mut ZArray, im: *mut ImageU8) {
    update(|s| s.vis_calls += 1);
    let arr = unsafe { &*arr };
    let im = unsafe { &mut *im };
    let (w, h) = (im.width as usize, im.height as usize);
    let stride = im.stride as usize;
    let buf = unsafe { slice::from_raw_parts_mut(im.buf, stride * h) };
    let records: &[*mut ApriltagDetection] = if arr.data.is_null() {
        &[]
    } else {
        let data = arr.data.cast::<*mut ApriltagDetection>();
        unsafe { slice::from_raw_parts(data, arr.size as usize) }
    };
    let clamp = |v: f64, limit: usize| v.max(0.0).min(limit as f64) as usize;
    let lo = |v: [f64; 4]| v.into_iter().fold(f64::INFINITY, f64::min).floor();
    let hi = |v: [f64; 4]| v.into_iter().fold(f64::NEG_INFINITY, f64::max).ceil();
    for &record in records {
        let p = unsafe { (*record).p };
        let (xs, ys) = (p.map(|c| c[0]), p.map(|c| c[1]));
        let (x0, x1) = (clamp(lo(xs), w), clamp(hi(xs), w));
        let (y0, y1) = (clamp(lo(ys), h), clamp(hi(ys), h));
        for row in buf.chunks_exact_mut(stride).take(y1).skip(y0) {
            row[x0..x1].fill(255);
        }
    }
}

#[allow(clippy::too_many_arguments)]
unsafe extern "C" fn pose_from_homography(
    h: *const MatD,
    fx: f64,
    fy: f64,
    cx: f64,
    cy: f64,
    tag_size: f64,
    z_sign: f64,
    corners: *const f64,
    init_error: *mut f64,
    final_error: *mut f64,
) -> *mut MatD {
    update(|s| s.pose_calls += 1);
    if should_fail(FailPoint::Pose) {
        return ptr::null_mut();
    }
    let hmat = Matrix3::from_row_slice(unsafe { payload_mut(h.cast_mut()) });
    let k = Matrix3::new(fx, 0.0, cx, 0.0, fy, cy, 0.0, 0.0, 1.0);
    let Some(k_inv) = k.try_inverse() else {
        return ptr::null_mut();
    };
    let m = k_inv * hmat;
    let (c0, c1, c2): (Vector3<f64>, Vector3<f64>, Vector3<f64>) = (
        m.column(0).into_owned(),
        m.column(1).into_owned(),
        m.column(2).into_owned(),
    );
    let scale = (c0.norm() + c1.norm()) / 2.0;
    if !scale.is_finite() || scale <= 0.0 {
        return ptr::null_mut();
    }
    let (mut r1, mut r2, mut t) = (c0 / scale, c1 / scale, c2 / scale);
    if t.z * z_sign < 0.0 {
        r1 = -r1;
        r2 = -r2;
        t = -t;
    }
    let r3 = r1.cross(&r2);
    let half = tag_size / 2.0;
    let t = t * half;

    let out = alloc_matrix(4, 4);
    if out.is_null() {
        return out;
    }
    unsafe { payload_mut(out) }.copy_from_slice(&[
        r1.x, r2.x, r3.x, t.x, //
        r1.y, r2.y, r3.y, t.y, //
        r1.z, r2.z, r3.z, t.z, //
        0.0, 0.0, 0.0, 1.0,
    ]);

    let observed = unsafe { slice::from_raw_parts(corners, 8) };
    let sq_sum: f64 = UNIT_CORNERS
        .iter()
        .enumerate()
        .map(|(i, [u, v])| {
            let pc = r1 * (u * half) + r2 * (v * half) + t;
            let px = fx * pc.x / pc.z + cx;
            let py = fy * pc.y / pc.z + cy;
            (px - observed[2 * i]).powi(2) + (py - observed[2 * i + 1]).powi(2)
        })
        .sum();
    let rms = (sq_sum / UNIT_CORNERS.len() as f64).sqrt();
    unsafe {
        *init_error = rms;
        *final_error = rms;
    }
    out
}
