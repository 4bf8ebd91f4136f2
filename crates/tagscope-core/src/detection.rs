use std::fmt;

use nalgebra::{Matrix3, Point2};
use serde::{Deserialize, Serialize};

/// Number of bins in [`hamming_histogram`].
pub const HAMMING_HISTOGRAM_BINS: usize = 10;

/// One decoded tag, fully owned.
///
/// Every field is a deep copy; nothing here points into engine memory.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Name of the family the tag was decoded with, e.g. `tag36h11`.
    pub family: String,
    pub id: i32,
    /// Bit errors corrected while decoding.
    pub hamming: i32,
    /// Kept for compatibility; many engine builds leave it at zero.
    pub goodness: f32,
    pub decision_margin: f32,
    /// Maps the tag square `[-1, 1]^2` into image pixels.
    pub homography: Matrix3<f64>,
    pub center: Point2<f64>,
    /// Image-space corners, in the engine's winding order.
    pub corners: [Point2<f64>; 4],
}

impl Detection {
    /// Length of the first tag edge in pixels.
    pub fn edge_length_px(&self) -> f64 {
        (self.corners[1] - self.corners[0]).norm()
    }

    /// Corners flattened as `[x0, y0, x1, y1, ...]`.
    pub fn corners_flat(&self) -> [f64; 8] {
        let mut out = [0.0; 8];
        for (i, c) in self.corners.iter().enumerate() {
            out[2 * i] = c.x;
            out[2 * i + 1] = c.y;
        }
        out
    }
}

impl fmt::Display for Detection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let corners: Vec<[f64; 2]> = self.corners.iter().map(|c| [c.x, c.y]).collect();
        write_fields(
            f,
            &[
                ("Family", self.family.clone()),
                ("ID", self.id.to_string()),
                ("Hamming error", self.hamming.to_string()),
                ("Goodness", format!("{:.4}", self.goodness)),
                ("Decision margin", format!("{:.4}", self.decision_margin)),
                (
                    "Homography",
                    format_matrix(3, 3, |r, c| self.homography[(r, c)]),
                ),
                (
                    "Center",
                    format!("[{:.4}, {:.4}]", self.center.x, self.center.y),
                ),
                ("Corners", format_matrix(4, 2, |r, c| corners[r][c])),
            ],
        )
    }
}

/// Count detections per hamming error; the last bin collects the overflow.
pub fn hamming_histogram(detections: &[Detection]) -> [usize; HAMMING_HISTOGRAM_BINS] {
    let mut hist = [0; HAMMING_HISTOGRAM_BINS];
    for det in detections {
        let bin = usize::try_from(det.hamming)
            .unwrap_or(0)
            .min(HAMMING_HISTOGRAM_BINS - 1);
        hist[bin] += 1;
    }
    hist
}

const LABEL_WIDTH: usize = 15;

pub(crate) fn format_matrix(rows: usize, cols: usize, at: impl Fn(usize, usize) -> f64) -> String {
    (0..rows)
        .map(|r| {
            let row: Vec<String> = (0..cols).map(|c| format!("{:.4}", at(r, c))).collect();
            format!("[{}]", row.join(", "))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Right-aligned `label: value` lines; continuation lines of multi-line
/// values are indented under the value column.
pub(crate) fn write_fields(f: &mut fmt::Formatter<'_>, fields: &[(&str, String)]) -> fmt::Result {
    let indent = f.width().unwrap_or(0);
    let pad = " ".repeat(LABEL_WIDTH + 2 + indent);
    for (i, (label, value)) in fields.iter().enumerate() {
        if i > 0 {
            writeln!(f)?;
        }
        write!(f, "{:>width$}: ", label, width = LABEL_WIDTH + indent)?;
        for (j, line) in value.lines().enumerate() {
            if j > 0 {
                write!(f, "\n{pad}")?;
            }
            f.write_str(line)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(hamming: i32) -> Detection {
        Detection {
            family: "tag36h11".into(),
            id: 3,
            hamming,
            goodness: 0.0,
            decision_margin: 42.5,
            homography: Matrix3::identity(),
            center: Point2::new(1.0, 2.0),
            corners: [
                Point2::new(0.0, 0.0),
                Point2::new(3.0, 4.0),
                Point2::new(3.0, 8.0),
                Point2::new(0.0, 4.0),
            ],
        }
    }

    #[test]
    fn histogram_clamps_large_errors_into_last_bin() {
        let dets = [detection(0), detection(0), detection(2), detection(25)];
        let hist = hamming_histogram(&dets);
        assert_eq!(hist[0], 2);
        assert_eq!(hist[2], 1);
        assert_eq!(hist[HAMMING_HISTOGRAM_BINS - 1], 1);
    }

    #[test]
    fn edge_length_uses_first_edge() {
        assert_eq!(detection(0).edge_length_px(), 5.0);
        assert_eq!(detection(0).corners_flat()[2..4], [3.0, 4.0]);
    }

    #[test]
    fn display_aligns_labels_and_indents_matrices() {
        let text = detection(1).to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "         Family: tag36h11");
        assert_eq!(lines[1], "             ID: 3");
        assert!(lines[5].starts_with("     Homography: [1.0000, 0.0000, 0.0000]"));
        assert!(lines[6].starts_with(&" ".repeat(17)));
    }

    #[test]
    fn serializes_to_json() {
        let json = serde_json::to_string(&detection(0)).expect("serialize");
        let back: Detection = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, detection(0));
    }
}
