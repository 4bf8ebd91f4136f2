use std::fmt;

use nalgebra::{Matrix3, Matrix4, Vector3};
use serde::{Deserialize, Serialize};

use crate::detection::{format_matrix, write_fields};

/// Which side of the tag plane counts as "in front of" the camera.
///
/// Passed through to the pose solver unchanged.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ZSign {
    #[default]
    Positive,
    Negative,
}

impl ZSign {
    #[inline]
    pub fn as_f64(self) -> f64 {
        match self {
            ZSign::Positive => 1.0,
            ZSign::Negative => -1.0,
        }
    }
}

/// Tag pose in the camera frame plus solver residuals.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    /// Rigid transform taking tag-frame points into the camera frame.
    pub transform: Matrix4<f64>,
    /// Reprojection error of the closed-form estimate.
    pub init_error: f64,
    /// Reprojection error after iterative refinement.
    pub final_error: f64,
}

impl Pose {
    pub fn rotation(&self) -> Matrix3<f64> {
        self.transform.fixed_view::<3, 3>(0, 0).into_owned()
    }

    pub fn translation(&self) -> Vector3<f64> {
        self.transform.fixed_view::<3, 1>(0, 3).into_owned()
    }
}

impl fmt::Display for Pose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_fields(
            f,
            &[
                ("Pose", format_matrix(4, 4, |r, c| self.transform[(r, c)])),
                ("InitError", format!("{:.4}", self.init_error)),
                ("FinalError", format!("{:.4}", self.final_error)),
            ],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_rotation_and_translation() {
        let mut transform = Matrix4::identity();
        transform[(0, 3)] = 0.5;
        transform[(2, 3)] = 2.0;
        let pose = Pose {
            transform,
            init_error: 0.0,
            final_error: 0.0,
        };
        assert_eq!(pose.translation(), Vector3::new(0.5, 0.0, 2.0));
        assert_eq!(pose.rotation(), Matrix3::identity());
    }

    #[test]
    fn z_sign_maps_to_unit_values() {
        assert_eq!(ZSign::default().as_f64(), 1.0);
        assert_eq!(ZSign::Negative.as_f64(), -1.0);
    }
}
