//! Image in, owned detections out.
//!
//! Every call allocates an engine raster, copies the caller's pixels into it
//! row by row (engine rows are padded), runs detection, deep-copies each
//! result record and releases every engine allocation before returning.

use std::os::raw::c_uint;

use log::debug;
use nalgebra::Point2;
use tagscope_core::{Detection, GrayImage, GrayImageView};
use tagscope_ffi::layout::ApriltagDetection;
use tagscope_ffi::{Borrowed, DetectionsKind, Engine, EngineError, ImageKind, Owned};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::detector::Detector;
use crate::error::DetectError;

impl Detector {
    /// Detect tags in an 8-bit grayscale image.
    ///
    /// The input is only read. Returned detections are independent of any
    /// engine memory.
    #[cfg_attr(
        feature = "tracing",
        instrument(
            level = "info",
            skip(self, image),
            fields(width = image.width, height = image.height)
        )
    )]
    pub fn detect(&self, image: &GrayImageView<'_>) -> Result<Vec<Detection>, DetectError> {
        let detections = self.run_detection(image)?;
        let out = extract_detections(&detections)?;
        debug!(
            "{} detection(s) in {}x{} image",
            out.len(),
            image.width,
            image.height
        );
        Ok(out)
    }

    /// Like [`detect`](Self::detect), and also render the engine's
    /// visualization raster for the same detections.
    ///
    /// The raster has the input's shape; tag regions are drawn by the engine
    /// on a black background.
    #[cfg_attr(
        feature = "tracing",
        instrument(
            level = "info",
            skip(self, image),
            fields(width = image.width, height = image.height)
        )
    )]
    pub fn detect_with_overlay(
        &self,
        image: &GrayImageView<'_>,
    ) -> Result<(Vec<Detection>, GrayImage), DetectError> {
        let detections = self.run_detection(image)?;
        let out = extract_detections(&detections)?;
        let overlay = render_overlay(self.engine(), image.width, image.height, &detections)?;
        debug!(
            "{} detection(s) in {}x{} image, overlay rendered",
            out.len(),
            image.width,
            image.height
        );
        Ok((out, overlay))
    }

    /// Upload `image`, run the engine and hand back the owned result array.
    ///
    /// The engine raster is released before returning.
    fn run_detection(
        &self,
        image: &GrayImageView<'_>,
    ) -> Result<Owned<DetectionsKind>, DetectError> {
        let handle = self.live_handle()?;
        image.validate()?;
        let raster = upload_image(self.engine(), image)?;
        let detect = self.engine().api().detector_detect;
        // SAFETY: both handles are live and owned by this engine.
        let raw = unsafe { detect(handle.as_ptr(), raster.as_ptr()) };
        // SAFETY: fresh result array from this engine.
        let detections = unsafe { Owned::<DetectionsKind>::from_raw(self.engine(), raw) }?;
        Ok(detections)
    }
}

/// Raster dimensions as the engine's allocator takes them.
pub(crate) fn engine_dims(width: usize, height: usize) -> Result<(c_uint, c_uint), DetectError> {
    let too_large = || DetectError::ImageTooLarge { width, height };
    // Descriptors store dimensions as `int`.
    let w = i32::try_from(width).map_err(|_| too_large())?;
    let h = i32::try_from(height).map_err(|_| too_large())?;
    Ok((w as c_uint, h as c_uint))
}

fn allocate_raster(
    engine: &Engine,
    width: usize,
    height: usize,
) -> Result<Owned<ImageKind>, DetectError> {
    let (w, h) = engine_dims(width, height)?;
    // SAFETY: `image_u8_create` has no preconditions beyond the dimensions.
    let raw = unsafe { (engine.api().image_u8_create)(w, h) };
    // SAFETY: fresh allocation from this engine.
    let raster = unsafe { Owned::<ImageKind>::from_raw(engine, raw) }?;
    let desc = raster.raw();
    if desc.width as usize != width || desc.height as usize != height {
        return Err(DetectError::UnexpectedShape {
            what: "image buffer",
            rows: desc.height.max(0) as usize,
            cols: desc.width.max(0) as usize,
            expected: "the requested size",
        });
    }
    Ok(raster)
}

/// Copy a packed image into a freshly allocated, stride-padded engine raster.
pub(crate) fn upload_image(
    engine: &Engine,
    image: &GrayImageView<'_>,
) -> Result<Owned<ImageKind>, DetectError> {
    let mut raster = allocate_raster(engine, image.width, image.height)?;
    raster.view_mut().copy_from_packed(image.data);
    Ok(raster)
}

/// Deep-copy every record of a live result array.
pub(crate) fn extract_detections(
    detections: &Owned<DetectionsKind>,
) -> Result<Vec<Detection>, DetectError> {
    detections
        .records()
        .map(|record| copy_detection(record?))
        .collect()
}

fn copy_detection(record: Borrowed<'_, ApriltagDetection>) -> Result<Detection, DetectError> {
    let raw = record.get();
    let h = record
        .homography()
        .ok_or(EngineError::NullHandle { what: "homography" })?;
    let homography = h.to_matrix3().ok_or(DetectError::UnexpectedShape {
        what: "homography",
        rows: h.nrows(),
        cols: h.ncols(),
        expected: "3x3",
    })?;
    let family = record
        .family()
        .ok_or(EngineError::NullHandle { what: "tag family" })?
        .name();

    Ok(Detection {
        family,
        id: raw.id,
        hamming: raw.hamming,
        goodness: raw.goodness,
        decision_margin: raw.decision_margin,
        homography,
        center: Point2::new(raw.c[0], raw.c[1]),
        corners: raw.p.map(|[x, y]| Point2::new(x, y)),
    })
}

/// Have the engine draw `detections` into a blank raster and copy out the
/// visible region.
pub(crate) fn render_overlay(
    engine: &Engine,
    width: usize,
    height: usize,
    detections: &Owned<DetectionsKind>,
) -> Result<GrayImage, DetectError> {
    let raster = allocate_raster(engine, width, height)?;
    // SAFETY: both handles are live; the engine only writes inside the raster.
    unsafe { (engine.api().vis_detections)(detections.as_ptr(), raster.as_ptr()) };
    let view = raster.view();
    Ok(GrayImage {
        width: view.width(),
        height: view.height(),
        data: view.copy_cropped(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{DetectorOptions, FamilySelection};
    use crate::testing;
    use approx::assert_relative_eq;

    fn detector() -> Detector {
        Detector::with_engine(
            testing::engine(),
            DetectorOptions {
                families: FamilySelection::parse("tag36h11"),
                ..DetectorOptions::default()
            },
        )
        .expect("detector")
    }

    /// White `width x height` image with a black rectangle.
    fn image_with_square(
        width: usize,
        height: usize,
        x0: usize,
        y0: usize,
        side: usize,
    ) -> Vec<u8> {
        let mut data = vec![255u8; width * height];
        for y in y0..y0 + side {
            for x in x0..x0 + side {
                data[y * width + x] = 0;
            }
        }
        data
    }

    #[test]
    fn detects_and_copies_records() {
        let det = detector();
        // Width 50 is not a multiple of the engine's row alignment.
        let data = image_with_square(50, 40, 10, 5, 20);
        let img = GrayImageView::new(50, 40, &data).expect("view");

        let dets = det.detect(&img).expect("detect");
        assert_eq!(dets.len(), 1);
        let d = &dets[0];
        assert_eq!(d.family, "tag36h11");
        assert_eq!(d.id, testing::FAKE_TAG_ID);
        assert_relative_eq!(d.center.x, 20.0);
        assert_relative_eq!(d.center.y, 15.0);
        assert_relative_eq!(d.corners[0].x, 10.0);
        assert_relative_eq!(d.corners[0].y, 5.0);
        assert_relative_eq!(d.corners[2].x, 30.0);
        assert_relative_eq!(d.corners[2].y, 25.0);
        assert_relative_eq!(d.homography[(0, 0)], 10.0);
        assert_relative_eq!(d.homography[(1, 2)], 15.0);

        let stats = testing::stats();
        assert_eq!(stats.images_live, 0);
        assert_eq!(stats.arrays_live, 0);
        assert_eq!(stats.matrices_live, 0);
        assert_eq!(stats.detect_calls, 1);
    }

    #[test]
    fn results_survive_later_calls() {
        let det = detector();
        let first = image_with_square(64, 64, 4, 4, 8);
        let second = image_with_square(64, 64, 30, 40, 16);
        let a = det
            .detect(&GrayImageView::new(64, 64, &first).expect("view"))
            .expect("detect");
        let snapshot = a.clone();
        let b = det
            .detect(&GrayImageView::new(64, 64, &second).expect("view"))
            .expect("detect");
        assert_eq!(a, snapshot);
        assert_ne!(a[0].center, b[0].center);
    }

    #[test]
    fn results_survive_detector_teardown() {
        let mut det = detector();
        let data = image_with_square(48, 48, 8, 8, 16);
        let dets = det
            .detect(&GrayImageView::new(48, 48, &data).expect("view"))
            .expect("detect");
        let snapshot = dets.clone();

        det.destroy();
        drop(det);

        assert_eq!(dets, snapshot);
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].family, "tag36h11");
        assert_relative_eq!(dets[0].center.x, 16.0);
        let stats = testing::stats();
        assert_eq!(stats.detectors_live, 0);
        assert_eq!(stats.detectors_destroyed, 1);
        assert_eq!(stats.families_live, 0);
        assert_eq!(stats.family_lists_live, 0);
        assert_eq!(stats.images_live, 0);
        assert_eq!(stats.matrices_live, 0);
        assert_eq!(stats.arrays_live, 0);
    }

    #[test]
    fn input_buffer_is_not_modified() {
        let det = detector();
        let data = image_with_square(37, 21, 3, 3, 9);
        let before = data.clone();
        det.detect(&GrayImageView::new(37, 21, &data).expect("view"))
            .expect("detect");
        assert_eq!(data, before);
    }

    #[test]
    fn blank_image_yields_no_detections() {
        let det = detector();
        let data = vec![200u8; 32 * 24];
        let dets = det
            .detect(&GrayImageView::new(32, 24, &data).expect("view"))
            .expect("detect");
        assert!(dets.is_empty());
        assert_eq!(testing::stats().arrays_live, 0);
    }

    #[test]
    fn blank_image_overlay_is_empty_with_input_shape() {
        let det = detector();
        let data = vec![200u8; 97 * 13];
        let (dets, overlay) = det
            .detect_with_overlay(&GrayImageView::new(97, 13, &data).expect("view"))
            .expect("detect");
        assert!(dets.is_empty());
        assert_eq!(overlay.shape(), (13, 97));
        assert!(overlay.data.iter().all(|&v| v == 0));
        assert_eq!(testing::stats().images_live, 0);
    }

    #[test]
    fn no_registered_family_yields_no_detections() {
        let det = Detector::with_engine(
            testing::engine(),
            DetectorOptions {
                families: FamilySelection::parse("not_a_real_family"),
                ..DetectorOptions::default()
            },
        )
        .expect("detector");
        let data = image_with_square(32, 32, 8, 8, 8);
        let dets = det
            .detect(&GrayImageView::new(32, 32, &data).expect("view"))
            .expect("detect");
        assert!(dets.is_empty());
    }

    #[test]
    fn malformed_input_fails_before_any_engine_allocation() {
        let det = detector();
        let data = vec![0u8; 10];
        let img = GrayImageView {
            width: 4,
            height: 4,
            data: &data,
        };
        let err = det.detect(&img).unwrap_err();
        assert!(matches!(err, DetectError::Image(_)));
        let stats = testing::stats();
        assert_eq!(stats.images_created, 0);
        assert_eq!(stats.detect_calls, 0);
    }

    #[test]
    fn overlay_has_input_shape_and_no_padding() {
        let det = detector();
        let data = image_with_square(50, 30, 5, 5, 10);
        let (dets, overlay) = det
            .detect_with_overlay(&GrayImageView::new(50, 30, &data).expect("view"))
            .expect("detect");
        assert_eq!(dets.len(), 1);
        assert_eq!(overlay.shape(), (30, 50));
        assert_eq!(overlay.data.len(), 50 * 30);
        assert!(!overlay.data.contains(&testing::PADDING_BYTE));
        assert_eq!(overlay.get(10, 10), 255);
        assert_eq!(overlay.get(40, 25), 0);

        let stats = testing::stats();
        assert_eq!(stats.images_created, 2);
        assert_eq!(stats.images_live, 0);
        assert_eq!(stats.arrays_live, 0);
        assert_eq!(stats.vis_calls, 1);
    }

    #[test]
    fn destroyed_detector_refuses_detection() {
        let mut det = detector();
        det.destroy();
        let data = vec![0u8; 16];
        let err = det
            .detect(&GrayImageView::new(4, 4, &data).expect("view"))
            .unwrap_err();
        assert!(matches!(err, DetectError::Destroyed));
    }

    #[test]
    fn null_result_array_is_an_engine_error() {
        let det = detector();
        testing::fail_next(testing::FailPoint::Detect);
        let data = vec![0u8; 16];
        let err = det
            .detect(&GrayImageView::new(4, 4, &data).expect("view"))
            .unwrap_err();
        assert!(matches!(
            err,
            DetectError::Engine(EngineError::NullHandle { .. })
        ));
        assert_eq!(testing::stats().images_live, 0);
    }

    #[test]
    fn null_raster_is_an_engine_error() {
        let det = detector();
        testing::fail_next(testing::FailPoint::ImageCreate);
        let data = vec![0u8; 16];
        let err = det
            .detect(&GrayImageView::new(4, 4, &data).expect("view"))
            .unwrap_err();
        assert!(matches!(
            err,
            DetectError::Engine(EngineError::NullHandle {
                what: "image buffer",
            })
        ));
        assert_eq!(testing::stats().detect_calls, 0);
    }

    #[test]
    fn dimensions_beyond_int_range_are_rejected() {
        assert!(engine_dims(640, 480).is_ok());
        assert!(matches!(
            engine_dims(usize::MAX, 1),
            Err(DetectError::ImageTooLarge { .. })
        ));
    }
}
