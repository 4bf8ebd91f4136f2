use nalgebra::{Matrix3, Matrix4, Point2, Point3};
use serde::{Deserialize, Serialize};

/// Pinhole intrinsics with zero lens distortion.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraParams {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CameraParamsError {
    #[error("camera parameters need exactly 4 values (fx, fy, cx, cy), got {got}")]
    WrongLength { got: usize },

    #[error("camera parameters must be finite")]
    NonFinite,

    #[error("focal lengths must be non-zero (fx={fx}, fy={fy})")]
    ZeroFocalLength { fx: f64, fy: f64 },
}

impl CameraParams {
    /// Checked constructor.
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Result<Self, CameraParamsError> {
        let params = Self { fx, fy, cx, cy };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), CameraParamsError> {
        if !self.to_array().iter().all(|v| v.is_finite()) {
            return Err(CameraParamsError::NonFinite);
        }
        if self.fx == 0.0 || self.fy == 0.0 {
            return Err(CameraParamsError::ZeroFocalLength {
                fx: self.fx,
                fy: self.fy,
            });
        }
        Ok(())
    }

    pub fn to_array(&self) -> [f64; 4] {
        [self.fx, self.fy, self.cx, self.cy]
    }

    /// The intrinsic matrix `K`.
    pub fn intrinsics(&self) -> Matrix3<f64> {
        Matrix3::new(self.fx, 0.0, self.cx, 0.0, self.fy, self.cy, 0.0, 0.0, 1.0)
    }

    /// Project an object-frame point through `transform` (object -> camera).
    ///
    /// Returns `None` for points on the camera plane.
    pub fn project(&self, transform: &Matrix4<f64>, p: &Point3<f64>) -> Option<Point2<f64>> {
        let pc = transform.transform_point(p);
        if pc.z.abs() < 1e-12 || !pc.z.is_finite() {
            return None;
        }
        Some(Point2::new(
            self.fx * pc.x / pc.z + self.cx,
            self.fy * pc.y / pc.z + self.cy,
        ))
    }
}

impl TryFrom<&[f64]> for CameraParams {
    type Error = CameraParamsError;

    fn try_from(values: &[f64]) -> Result<Self, Self::Error> {
        match *values {
            [fx, fy, cx, cy] => Self::new(fx, fy, cx, cy),
            _ => Err(CameraParamsError::WrongLength { got: values.len() }),
        }
    }
}

impl TryFrom<[f64; 4]> for CameraParams {
    type Error = CameraParamsError;

    fn try_from([fx, fy, cx, cy]: [f64; 4]) -> Result<Self, Self::Error> {
        Self::new(fx, fy, cx, cy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    #[test]
    fn rejects_wrong_element_count() {
        let err = CameraParams::try_from(&[1000.0, 1000.0, 320.0][..]).unwrap_err();
        assert_eq!(err, CameraParamsError::WrongLength { got: 3 });
        let err = CameraParams::try_from(&[1.0; 5][..]).unwrap_err();
        assert_eq!(err, CameraParamsError::WrongLength { got: 5 });
    }

    #[test]
    fn rejects_degenerate_focal_length() {
        assert!(matches!(
            CameraParams::new(0.0, 1.0, 0.0, 0.0),
            Err(CameraParamsError::ZeroFocalLength { .. })
        ));
        assert_eq!(
            CameraParams::new(f64::NAN, 1.0, 0.0, 0.0),
            Err(CameraParamsError::NonFinite)
        );
    }

    #[test]
    fn projects_through_pinhole() {
        let cam = CameraParams::new(1000.0, 1000.0, 320.0, 240.0).unwrap();
        let mut t = Matrix4::identity();
        t.fixed_view_mut::<3, 1>(0, 3)
            .copy_from(&Vector3::new(0.0, 0.0, 2.0));
        let p = cam.project(&t, &Point3::new(0.1, -0.2, 0.0)).unwrap();
        assert_relative_eq!(p.x, 370.0, epsilon = 1e-9);
        assert_relative_eq!(p.y, 140.0, epsilon = 1e-9);
        let origin = cam.project(&Matrix4::identity(), &Point3::origin());
        assert!(origin.is_none());
    }
}
