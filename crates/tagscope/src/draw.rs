//! Overlay composition and pose annotation.
//!
//! The engine renders a grayscale highlight raster of its detections; it is
//! blended into the input frame at half intensity, and pose boxes, axes and
//! tag ids are drawn on top by projecting tag-frame points through the
//! camera intrinsics.

use image::{DynamicImage, ImageBuffer, Pixel, Rgb, RgbImage};
use imageproc::drawing::draw_line_segment_mut;
use log::debug;
use nalgebra::{Point2, Point3};
use tagscope_core::{CameraParams, Detection, GrayImage, Pose, ZSign};
use tagscope_detector::{DetectError, Detector};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::detect::gray_view;

pub const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
/// Colors of the x, y and z axes.
pub const AXIS_COLORS: [Rgb<u8>; 3] = [Rgb([255, 0, 0]), Rgb([0, 255, 0]), Rgb([0, 0, 255])];
pub const LABEL_COLOR: Rgb<u8> = Rgb([255, 255, 0]);

const BOX_THICKNESS: u32 = 1;
const AXIS_THICKNESS: u32 = 2;
const LABEL_THICKNESS: u32 = 2;

/// Label scale is the tag's first edge length divided by this.
const LABEL_SCALE_DIVISOR: f64 = 22.0;
/// Glyph height at scale 1, in pixels.
const GLYPH_HEIGHT: f64 = 21.0;
const GLYPH_ASPECT: f64 = 0.55;
const GLYPH_GAP: f64 = 0.3;

const BOX_EDGES: [(usize, usize); 12] = [
    (0, 1),
    (1, 2),
    (2, 3),
    (3, 0),
    (0, 4),
    (1, 5),
    (2, 6),
    (3, 7),
    (4, 5),
    (5, 6),
    (6, 7),
    (7, 4),
];

#[derive(thiserror::Error, Debug)]
pub enum DrawError {
    #[error(
        "overlay raster is {raster_width}x{raster_height}, frame is {frame_width}x{frame_height}"
    )]
    ShapeMismatch {
        frame_width: u32,
        frame_height: u32,
        raster_width: usize,
        raster_height: usize,
    },

    #[error(transparent)]
    Detect(#[from] DetectError),
}

/// What [`render_detections`] draws on top of the highlight overlay.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Visualization {
    #[default]
    Highlight,
    Boxes,
    Axes,
    BoxesAndAxes,
}

impl Visualization {
    /// Map the numeric levels `0..=3` used by command-line drivers.
    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(Self::Highlight),
            1 => Some(Self::Boxes),
            2 => Some(Self::Axes),
            3 => Some(Self::BoxesAndAxes),
            _ => None,
        }
    }

    pub fn level(self) -> u8 {
        match self {
            Self::Highlight => 0,
            Self::Boxes => 1,
            Self::Axes => 2,
            Self::BoxesAndAxes => 3,
        }
    }

    pub fn draws_boxes(self) -> bool {
        matches!(self, Self::Boxes | Self::BoxesAndAxes)
    }

    pub fn draws_axes(self) -> bool {
        matches!(self, Self::Axes | Self::BoxesAndAxes)
    }
}

/// Blend the engine's highlight raster into a frame: `frame / 2 + raster / 2`
/// on every channel.
pub fn compose_overlay<P>(
    frame: &ImageBuffer<P, Vec<u8>>,
    raster: &GrayImage,
) -> Result<ImageBuffer<P, Vec<u8>>, DrawError>
where
    P: Pixel<Subpixel = u8>,
{
    let (frame_width, frame_height) = frame.dimensions();
    if frame_width as usize != raster.width
        || frame_height as usize != raster.height
        || raster.data.len() != raster.width * raster.height
    {
        return Err(DrawError::ShapeMismatch {
            frame_width,
            frame_height,
            raster_width: raster.width,
            raster_height: raster.height,
        });
    }
    let mut out = frame.clone();
    for (x, y, px) in out.enumerate_pixels_mut() {
        let highlight = raster.get(x as usize, y as usize) / 2;
        px.apply(|c| c / 2 + highlight);
    }
    Ok(out)
}

/// Pixel position of a tag-frame point, rounded; `None` behind the camera.
fn project(camera: &CameraParams, pose: &Pose, p: Point3<f64>) -> Option<Point2<f64>> {
    if pose.transform.transform_point(&p).z <= 0.0 {
        return None;
    }
    camera
        .project(&pose.transform, &p)
        .map(|ip| Point2::new(ip.x.round(), ip.y.round()))
}

/// Draw a segment `thickness` pixels wide. Segments with an endpoint far
/// outside the canvas are skipped.
fn draw_segment(
    canvas: &mut RgbImage,
    a: Point2<f64>,
    b: Point2<f64>,
    thickness: u32,
    color: Rgb<u8>,
) {
    let (w, h) = (canvas.width() as f64, canvas.height() as f64);
    let near = |p: &Point2<f64>| {
        p.x.is_finite()
            && p.y.is_finite()
            && p.x > -4.0 * w
            && p.x < 5.0 * w
            && p.y > -4.0 * h
            && p.y < 5.0 * h
    };
    if !near(&a) || !near(&b) {
        return;
    }
    let d = b - a;
    let len = d.norm();
    let normal = if len > 0.0 {
        nalgebra::Vector2::new(-d.y / len, d.x / len)
    } else {
        nalgebra::Vector2::zeros()
    };
    let thickness = thickness.max(1);
    let half = (thickness - 1) as f64 / 2.0;
    for i in 0..thickness {
        let offset = normal * (i as f64 - half);
        let (s, e) = (a + offset, b + offset);
        draw_line_segment_mut(
            canvas,
            (s.x as f32, s.y as f32),
            (e.x as f32, e.y as f32),
            color,
        );
    }
}

/// Draw the tag outline and a cube of the tag's size extruded along `-z`
/// (scaled by `z_sign`).
pub fn draw_pose_box(
    canvas: &mut RgbImage,
    camera: &CameraParams,
    tag_size: f64,
    pose: &Pose,
    z_sign: ZSign,
    color: Rgb<u8>,
) {
    let half = 0.5 * tag_size;
    let depth = -2.0 * z_sign.as_f64();
    let vertices: Vec<Option<Point2<f64>>> = [
        (-1.0, -1.0, 0.0),
        (1.0, -1.0, 0.0),
        (1.0, 1.0, 0.0),
        (-1.0, 1.0, 0.0),
        (-1.0, -1.0, depth),
        (1.0, -1.0, depth),
        (1.0, 1.0, depth),
        (-1.0, 1.0, depth),
    ]
    .into_iter()
    .map(|(x, y, z)| project(camera, pose, Point3::new(x * half, y * half, z * half)))
    .collect();

    for (i, j) in BOX_EDGES {
        if let (Some(a), Some(b)) = (vertices[i], vertices[j]) {
            draw_segment(canvas, a, b, BOX_THICKNESS, color);
        }
    }
}

/// Draw the tag's x, y and z axes, each one `tag_size` long, from the
/// detected center. Colors follow [`AXIS_COLORS`].
pub fn draw_pose_axes(
    canvas: &mut RgbImage,
    camera: &CameraParams,
    tag_size: f64,
    pose: &Pose,
    center: &Point2<f64>,
) {
    let origin = Point2::new(center.x.round(), center.y.round());
    let tips = [
        Point3::new(tag_size, 0.0, 0.0),
        Point3::new(0.0, -tag_size, 0.0),
        Point3::new(0.0, 0.0, -tag_size),
    ];
    for (tip, color) in tips.into_iter().zip(AXIS_COLORS) {
        if let Some(end) = project(camera, pose, tip) {
            draw_segment(canvas, origin, end, AXIS_THICKNESS, color);
        }
    }
}

// Seven-segment strokes on a 1x2 glyph cell: a, b, c, d, e, f, g.
const SEGMENTS: [((f64, f64), (f64, f64)); 7] = [
    ((0.0, 0.0), (1.0, 0.0)),
    ((1.0, 0.0), (1.0, 1.0)),
    ((1.0, 1.0), (1.0, 2.0)),
    ((0.0, 2.0), (1.0, 2.0)),
    ((0.0, 1.0), (0.0, 2.0)),
    ((0.0, 0.0), (0.0, 1.0)),
    ((0.0, 1.0), (1.0, 1.0)),
];

fn glyph_mask(ch: char) -> u8 {
    match ch {
        '0' => 0b011_1111,
        '1' => 0b000_0110,
        '2' => 0b101_1011,
        '3' => 0b100_1111,
        '4' => 0b110_0110,
        '5' => 0b110_1101,
        '6' => 0b111_1101,
        '7' => 0b000_0111,
        '8' => 0b111_1111,
        '9' => 0b110_1111,
        '-' => 0b100_0000,
        _ => 0,
    }
}

/// Glyph cell size `(width, height)` and text origin for a label.
fn label_layout(detection: &Detection, text: &str) -> (f64, f64, Point2<f64>) {
    let scale = detection.edge_length_px() / LABEL_SCALE_DIVISOR;
    let height = GLYPH_HEIGHT * scale;
    let width = GLYPH_ASPECT * height;
    let n = text.chars().count() as f64;
    let total = n * width + (n - 1.0).max(0.0) * GLYPH_GAP * width;
    let origin = Point2::new(
        detection.center.x - total / 2.0,
        detection.center.y - height / 2.0,
    );
    (width, height, origin)
}

/// Write the tag id centred on the tag, sized from its first edge.
pub fn annotate_detection(canvas: &mut RgbImage, detection: &Detection, color: Rgb<u8>) {
    let text = detection.id.to_string();
    let (width, height, origin) = label_layout(detection, &text);
    let half_height = height / 2.0;
    for (k, ch) in text.chars().enumerate() {
        let left = origin.x + k as f64 * width * (1.0 + GLYPH_GAP);
        let mask = glyph_mask(ch);
        for (bit, ((x0, y0), (x1, y1))) in SEGMENTS.iter().enumerate() {
            if mask & (1 << bit) == 0 {
                continue;
            }
            let a = Point2::new(left + x0 * width, origin.y + y0 * half_height);
            let b = Point2::new(left + x1 * width, origin.y + y1 * half_height);
            draw_segment(canvas, a, b, LABEL_THICKNESS, color);
        }
    }
}

/// Parameters of [`render_detections`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RenderOptions {
    pub camera: CameraParams,
    /// Physical tag edge length; pose translations use the same unit.
    pub tag_size: f64,
    pub visualization: Visualization,
    /// Write each tag's id on the overlay.
    pub annotate: bool,
    pub z_sign: ZSign,
}

impl RenderOptions {
    pub fn new(camera: CameraParams, tag_size: f64) -> Self {
        Self {
            camera,
            tag_size,
            visualization: Visualization::default(),
            annotate: false,
            z_sign: ZSign::default(),
        }
    }
}

/// One detected tag and its estimated pose.
#[derive(Clone, Debug, PartialEq)]
pub struct TagReport {
    pub detection: Detection,
    pub pose: Pose,
}

/// Detect, estimate every pose and draw the result over `frame`.
///
/// Color frames are detected on their luma; the returned overlay is always
/// RGB so annotations keep their colors.
#[cfg_attr(
    feature = "tracing",
    instrument(
        level = "info",
        skip(detector, frame, opts),
        fields(width = frame.width(), height = frame.height())
    )
)]
pub fn render_detections(
    detector: &Detector,
    frame: &DynamicImage,
    opts: &RenderOptions,
) -> Result<(Vec<TagReport>, RgbImage), DrawError> {
    let gray = frame.to_luma8();
    let (detections, raster) = detector.detect_with_overlay(&gray_view(&gray))?;
    let mut canvas = compose_overlay(&frame.to_rgb8(), &raster)?;

    let mut reports = Vec::with_capacity(detections.len());
    for detection in detections {
        let pose = detector.estimate_pose(&detection, &opts.camera, opts.tag_size, opts.z_sign)?;
        if opts.visualization.draws_boxes() {
            draw_pose_box(
                &mut canvas,
                &opts.camera,
                opts.tag_size,
                &pose,
                opts.z_sign,
                BOX_COLOR,
            );
        }
        if opts.visualization.draws_axes() {
            draw_pose_axes(
                &mut canvas,
                &opts.camera,
                opts.tag_size,
                &pose,
                &detection.center,
            );
        }
        if opts.annotate {
            annotate_detection(&mut canvas, &detection, LABEL_COLOR);
        }
        reports.push(TagReport { detection, pose });
    }
    debug!(
        "rendered {} tag(s) at visualization level {}",
        reports.len(),
        opts.visualization.level()
    );
    Ok((reports, canvas))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use nalgebra::{Matrix3, Matrix4, Vector3};
    use std::ops::RangeInclusive;

    fn camera() -> CameraParams {
        CameraParams::new(100.0, 100.0, 50.0, 50.0).unwrap()
    }

    /// Identity rotation, tag one unit in front of the camera.
    fn pose() -> Pose {
        let mut transform = Matrix4::identity();
        transform
            .fixed_view_mut::<3, 1>(0, 3)
            .copy_from(&Vector3::new(0.0, 0.0, 1.0));
        Pose {
            transform,
            init_error: 0.0,
            final_error: 0.0,
        }
    }

    fn detection(center: (f64, f64), edge: f64, id: i32) -> Detection {
        let (cx, cy) = center;
        let h = edge / 2.0;
        Detection {
            family: "tag36h11".into(),
            id,
            hamming: 0,
            goodness: 0.0,
            decision_margin: 50.0,
            homography: Matrix3::new(h, 0.0, cx, 0.0, h, cy, 0.0, 0.0, 1.0),
            center: Point2::new(cx, cy),
            corners: [
                Point2::new(cx - h, cy - h),
                Point2::new(cx + h, cy - h),
                Point2::new(cx + h, cy + h),
                Point2::new(cx - h, cy + h),
            ],
        }
    }

    fn pixels_of(canvas: &RgbImage, color: Rgb<u8>) -> Vec<(u32, u32)> {
        canvas
            .enumerate_pixels()
            .filter(|(_, _, px)| **px == color)
            .map(|(x, y, _)| (x, y))
            .collect()
    }

    fn within(pts: &[(u32, u32)], xs: RangeInclusive<u32>, ys: RangeInclusive<u32>) -> bool {
        pts.iter().all(|(x, y)| xs.contains(x) && ys.contains(y))
    }

    #[test]
    fn visualization_levels_round_trip() {
        for level in 0..4 {
            let vis = Visualization::from_level(level).expect("level");
            assert_eq!(vis.level(), level);
        }
        assert_eq!(Visualization::from_level(4), None);
        assert!(Visualization::BoxesAndAxes.draws_boxes());
        assert!(Visualization::BoxesAndAxes.draws_axes());
        assert!(!Visualization::Highlight.draws_boxes());
        assert!(!Visualization::Boxes.draws_axes());
    }

    #[test]
    fn overlay_blends_at_half_intensity() {
        let frame = image::GrayImage::from_pixel(4, 2, Luma([200]));
        let mut raster = GrayImage::new(4, 2);
        raster.data[1] = 255;
        let out = compose_overlay(&frame, &raster).expect("same shape");
        assert_eq!(out.get_pixel(0, 0).0, [100]);
        assert_eq!(out.get_pixel(1, 0).0, [227]);

        let rgb = RgbImage::from_pixel(4, 2, Rgb([10, 100, 255]));
        let out = compose_overlay(&rgb, &raster).expect("same shape");
        assert_eq!(out.get_pixel(1, 0).0, [132, 177, 254]);
        assert_eq!(out.get_pixel(3, 1).0, [5, 50, 127]);
    }

    #[test]
    fn overlay_rejects_shape_mismatch() {
        let frame = image::GrayImage::new(4, 2);
        let raster = GrayImage::new(2, 4);
        assert!(matches!(
            compose_overlay(&frame, &raster),
            Err(DrawError::ShapeMismatch {
                frame_width: 4,
                frame_height: 2,
                raster_width: 2,
                raster_height: 4,
            })
        ));
    }

    #[test]
    fn pose_box_outlines_the_tag() {
        let mut canvas = RgbImage::new(100, 100);
        draw_pose_box(
            &mut canvas,
            &camera(),
            0.2,
            &pose(),
            ZSign::Positive,
            BOX_COLOR,
        );
        // Near face spans 40..=60 in both axes.
        assert_eq!(*canvas.get_pixel(50, 40), BOX_COLOR);
        assert_eq!(*canvas.get_pixel(40, 50), BOX_COLOR);
        assert_eq!(*canvas.get_pixel(50, 50), Rgb([0, 0, 0]));
        let drawn = pixels_of(&canvas, BOX_COLOR);
        assert!(within(&drawn, 35..=65, 35..=65));
    }

    #[test]
    fn axes_start_at_the_center() {
        let mut canvas = RgbImage::new(100, 100);
        let center = Point2::new(50.0, 50.0);
        draw_pose_axes(&mut canvas, &camera(), 0.2, &pose(), &center);
        // x ends at (70, 50), y at (50, 30).
        let red = pixels_of(&canvas, AXIS_COLORS[0]);
        assert!(red.iter().any(|&(x, _)| x == 65));
        assert!(within(&red, 49..=71, 48..=52));
        let green = pixels_of(&canvas, AXIS_COLORS[1]);
        assert!(green.iter().any(|&(_, y)| y == 35));
        assert!(within(&green, 48..=52, 29..=51));
    }

    #[test]
    fn label_is_centred_on_the_tag() {
        let mut canvas = RgbImage::new(200, 200);
        let det = detection((100.0, 100.0), 44.0, 18);
        annotate_detection(&mut canvas, &det, LABEL_COLOR);
        let drawn = pixels_of(&canvas, LABEL_COLOR);
        assert!(!drawn.is_empty());

        // Scale 2: glyphs are 42 px tall.
        let (width, height, origin) = label_layout(&det, "18");
        assert!((height - 42.0).abs() < 1e-9);
        let right = origin.x + 2.0 * width + GLYPH_GAP * width;
        assert!((origin.x + right - 200.0).abs() < 1e-9);
        let xs = (origin.x - 2.0)..=(right + 2.0);
        let ys = (origin.y - 2.0)..=(origin.y + height + 2.0);
        for &(x, y) in &drawn {
            assert!(xs.contains(&(x as f64)), "x = {x}");
            assert!(ys.contains(&(y as f64)), "y = {y}");
        }
    }

    #[test]
    fn points_behind_the_camera_are_skipped() {
        let mut canvas = RgbImage::new(50, 50);
        let mut behind = pose();
        behind.transform[(2, 3)] = 0.0;
        draw_pose_box(
            &mut canvas,
            &camera(),
            0.2,
            &behind,
            ZSign::Positive,
            BOX_COLOR,
        );
        draw_segment(
            &mut canvas,
            Point2::new(f64::NAN, 0.0),
            Point2::new(10.0, 10.0),
            1,
            BOX_COLOR,
        );
        assert!(pixels_of(&canvas, BOX_COLOR).is_empty());
    }
}
