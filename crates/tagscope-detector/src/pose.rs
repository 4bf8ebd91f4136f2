//! Tag pose from a detection's homography.

use log::debug;
use tagscope_core::{CameraParams, Detection, Pose, ZSign};
use tagscope_ffi::{MatrixKind, Owned};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::detector::Detector;
use crate::error::DetectError;

impl Detector {
    /// Estimate the pose of a detected tag of physical edge length
    /// `tag_size` (in the units wanted for the translation).
    ///
    /// Inputs are validated before the engine is called. Both engine
    /// matrices (the homography copy and the result) are released before
    /// returning, on success and on error.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self, detection, camera), fields(id = detection.id))
    )]
    pub fn estimate_pose(
        &self,
        detection: &Detection,
        camera: &CameraParams,
        tag_size: f64,
        z_sign: ZSign,
    ) -> Result<Pose, DetectError> {
        self.live_handle()?;
        camera.validate()?;
        if !tag_size.is_finite() || tag_size <= 0.0 {
            return Err(DetectError::InvalidTagSize(tag_size));
        }

        let engine = self.engine();
        let api = engine.api();

        // SAFETY: `matd_create` has no preconditions beyond the dimensions.
        let raw = unsafe { (api.matd_create)(3, 3) };
        // SAFETY: fresh allocation from this engine.
        let mut h = unsafe { Owned::<MatrixKind>::from_raw(engine, raw) }?;
        let (rows, cols) = (h.raw().nrows as usize, h.raw().ncols as usize);
        if (rows, cols) != (3, 3) {
            return Err(DetectError::UnexpectedShape {
                what: "homography buffer",
                rows,
                cols,
                expected: "3x3",
            });
        }
        h.view_mut().copy_from_matrix3(&detection.homography);

        let corners = detection.corners_flat();
        let mut init_error = 0.0;
        let mut final_error = 0.0;
        // SAFETY: `h` is a live 3x3 matrix, `corners` holds four (x, y)
        // pairs and both error slots are valid for writes.
        let raw = unsafe {
            (api.pose_from_homography)(
                h.as_ptr(),
                camera.fx,
                camera.fy,
                camera.cx,
                camera.cy,
                tag_size,
                z_sign.as_f64(),
                corners.as_ptr(),
                &mut init_error,
                &mut final_error,
            )
        };
        // SAFETY: fresh result matrix from this engine.
        let m = unsafe { Owned::<MatrixKind>::from_raw(engine, raw) }?;
        let view = m.view();
        let transform = view.to_matrix4().ok_or(DetectError::UnexpectedShape {
            what: "pose matrix",
            rows: view.nrows(),
            cols: view.ncols(),
            expected: "4x4",
        })?;

        debug!(
            "pose for tag {} (init error {:.4}, final error {:.4})",
            detection.id, init_error, final_error
        );
        Ok(Pose {
            transform,
            init_error,
            final_error,
        })
    }

    /// [`estimate_pose`](Self::estimate_pose) with intrinsics given as a
    /// `[fx, fy, cx, cy]` slice.
    pub fn estimate_pose_from_slice(
        &self,
        detection: &Detection,
        camera: &[f64],
        tag_size: f64,
        z_sign: ZSign,
    ) -> Result<Pose, DetectError> {
        let camera = CameraParams::try_from(camera)?;
        self.estimate_pose(detection, &camera, tag_size, z_sign)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::DetectorOptions;
    use crate::testing;
    use approx::assert_relative_eq;
    use nalgebra::{Matrix3, Point2};
    use tagscope_core::CameraParamsError;
    use tagscope_ffi::EngineError;

    fn detector() -> Detector {
        Detector::with_engine(testing::engine(), DetectorOptions::default()).expect("detector")
    }

    /// Fronto-parallel tag centred on the principal point.
    fn centered_detection() -> Detection {
        Detection {
            family: "tag36h11".into(),
            id: 0,
            hamming: 0,
            goodness: 0.0,
            decision_margin: 80.0,
            homography: Matrix3::new(50.0, 0.0, 320.0, 0.0, 50.0, 240.0, 0.0, 0.0, 1.0),
            center: Point2::new(320.0, 240.0),
            corners: [
                Point2::new(270.0, 190.0),
                Point2::new(370.0, 190.0),
                Point2::new(370.0, 290.0),
                Point2::new(270.0, 290.0),
            ],
        }
    }

    fn camera() -> CameraParams {
        CameraParams::new(1000.0, 1000.0, 320.0, 240.0).expect("camera")
    }

    #[test]
    fn centered_tag_sits_on_the_optical_axis() {
        let det = detector();
        let pose = det
            .estimate_pose(&centered_detection(), &camera(), 0.1, ZSign::Positive)
            .expect("pose");
        let t = pose.translation();
        assert_relative_eq!(t.x, 0.0, epsilon = 1e-9);
        assert_relative_eq!(t.y, 0.0, epsilon = 1e-9);
        assert_relative_eq!(t.z, 1.0, epsilon = 1e-9);
        assert_relative_eq!(pose.rotation(), Matrix3::identity(), epsilon = 1e-9);
        assert!(pose.init_error < 1e-6);
        assert!(pose.final_error <= pose.init_error + 1e-12);

        let stats = testing::stats();
        assert_eq!(stats.matrices_live, 0);
        assert_eq!(stats.pose_calls, 1);
    }

    #[test]
    fn z_sign_is_passed_through() {
        let det = detector();
        let pose = det
            .estimate_pose(&centered_detection(), &camera(), 0.1, ZSign::Negative)
            .expect("pose");
        assert!(pose.translation().z < 0.0);
    }

    #[test]
    fn invalid_inputs_fail_before_any_engine_call() {
        let det = detector();
        let d = centered_detection();

        let err = det
            .estimate_pose_from_slice(&d, &[1000.0, 1000.0, 320.0], 0.1, ZSign::Positive)
            .unwrap_err();
        assert!(matches!(
            err,
            DetectError::CameraParams(CameraParamsError::WrongLength { got: 3 })
        ));

        for size in [0.0, -1.0, f64::NAN] {
            let err = det
                .estimate_pose(&d, &camera(), size, ZSign::Positive)
                .unwrap_err();
            assert!(matches!(err, DetectError::InvalidTagSize(_)));
        }

        let stats = testing::stats();
        assert_eq!(stats.matrices_created, 0);
        assert_eq!(stats.pose_calls, 0);
    }

    #[test]
    fn null_pose_releases_the_homography_copy() {
        let det = detector();
        testing::fail_next(testing::FailPoint::Pose);
        let err = det
            .estimate_pose(&centered_detection(), &camera(), 0.1, ZSign::Positive)
            .unwrap_err();
        assert!(matches!(
            err,
            DetectError::Engine(EngineError::NullHandle { .. })
        ));
        let stats = testing::stats();
        assert_eq!(stats.matrices_created, 1);
        assert_eq!(stats.matrices_live, 0);
    }

    #[test]
    fn null_homography_buffer_skips_the_solver() {
        let det = detector();
        testing::fail_next(testing::FailPoint::MatrixCreate);
        let err = det
            .estimate_pose(&centered_detection(), &camera(), 0.1, ZSign::Positive)
            .unwrap_err();
        assert!(matches!(
            err,
            DetectError::Engine(EngineError::NullHandle { what: "matrix" })
        ));
        assert_eq!(testing::stats().pose_calls, 0);
    }

    #[test]
    fn pose_from_detected_tag() {
        let det = detector();
        let mut data = vec![255u8; 640 * 480];
        for y in 190..290 {
            for x in 270..370 {
                data[y * 640 + x] = 0;
            }
        }
        let image = tagscope_core::GrayImageView::new(640, 480, &data).expect("view");
        let dets = det.detect(&image).expect("detect");
        assert_eq!(dets.len(), 1);
        let pose = det
            .estimate_pose(&dets[0], &camera(), 0.1, ZSign::Positive)
            .expect("pose");
        assert_relative_eq!(pose.translation().z, 1.0, epsilon = 1e-9);
        assert_eq!(testing::stats().matrices_live, 0);
    }
}
