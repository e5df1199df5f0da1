//! Facial landmark geometry: eye aspect ratio and head pose

use capture::{BackendError, VideoFrame};
use serde::{Deserialize, Serialize};

/// 2D image point
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    fn midpoint(&self, other: &Point) -> Point {
        Point::new((self.x + other.x) / 2.0, (self.y + other.y) / 2.0)
    }
}

/// Facial landmarks needed for liveness.
///
/// Each eye holds six contour points p1..p6: p1 and p4 are the corners,
/// p2/p3 the upper lid, p6/p5 the lower lid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Landmarks {
    pub left_eye: [Point; 6],
    pub right_eye: [Point; 6],
    pub nose_tip: Point,
    pub chin: Point,
    /// Leftmost jaw point
    pub face_left: Point,
    /// Rightmost jaw point
    pub face_right: Point,
}

impl Landmarks {
    /// Average EAR of both eyes
    pub fn ear(&self) -> f32 {
        (eye_aspect_ratio(&self.left_eye) + eye_aspect_ratio(&self.right_eye)) / 2.0
    }

    /// Estimate head pose from the nose tip offset within the face bounds
    pub fn head_pose(&self) -> HeadPose {
        estimate_head_pose(self)
    }
}

/// Landmark detection function: `None` when no face is present
pub trait LandmarkDetector: Send + Sync {
    fn detect(&self, frame: &VideoFrame) -> Result<Option<Landmarks>, BackendError>;
}

/// Head pose (Euler angles)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HeadPose {
    /// Yaw (left-right rotation) in degrees
    pub yaw: f32,
    /// Pitch (up-down tilt) in degrees
    pub pitch: f32,
    /// Roll (side tilt) in degrees
    pub roll: f32,
}

impl HeadPose {
    /// Largest yaw/pitch deviation from `baseline`
    pub fn deviation_from(&self, baseline: &HeadPose) -> f32 {
        (self.yaw - baseline.yaw)
            .abs()
            .max((self.pitch - baseline.pitch).abs())
    }
}

/// Degrees per unit of normalized nose offset
const POSE_SCALE_DEG: f32 = 90.0;

/// `EAR = (|p2-p6| + |p3-p5|) / (2 |p1-p4|)`
pub fn eye_aspect_ratio(eye: &[Point; 6]) -> f32 {
    let vertical_a = eye[1].distance(&eye[5]);
    let vertical_b = eye[2].distance(&eye[4]);
    let horizontal = eye[0].distance(&eye[3]);

    if horizontal <= f32::EPSILON {
        return 0.0;
    }
    (vertical_a + vertical_b) / (2.0 * horizontal)
}

fn eye_center(eye: &[Point; 6]) -> Point {
    eye[0].midpoint(&eye[3])
}

/// Yaw from horizontal nose offset over face width, pitch from vertical nose
/// position between the eye line and the chin over face height.
pub fn estimate_head_pose(landmarks: &Landmarks) -> HeadPose {
    let face_width = landmarks.face_right.x - landmarks.face_left.x;
    let center_x = (landmarks.face_left.x + landmarks.face_right.x) / 2.0;
    let yaw = if face_width.abs() > f32::EPSILON {
        (landmarks.nose_tip.x - center_x) / face_width * POSE_SCALE_DEG
    } else {
        0.0
    };

    let left = eye_center(&landmarks.left_eye);
    let right = eye_center(&landmarks.right_eye);
    let eye_line = left.midpoint(&right);
    let face_height = landmarks.chin.y - eye_line.y;
    let pitch = if face_height.abs() > f32::EPSILON {
        ((landmarks.nose_tip.y - eye_line.y) / face_height - 0.5) * POSE_SCALE_DEG
    } else {
        0.0
    };

    let roll = (right.y - left.y).atan2(right.x - left.x).to_degrees();

    HeadPose { yaw, pitch, roll }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// Eye of width 30 centred on (cx, cy) with the given EAR
    pub fn eye(cx: f32, cy: f32, ear: f32) -> [Point; 6] {
        let w = 30.0;
        let h = ear * w / 2.0;
        let x0 = cx - w / 2.0;
        [
            Point::new(x0, cy),
            Point::new(x0 + w / 3.0, cy - h),
            Point::new(x0 + 2.0 * w / 3.0, cy - h),
            Point::new(x0 + w, cy),
            Point::new(x0 + 2.0 * w / 3.0, cy + h),
            Point::new(x0 + w / 3.0, cy + h),
        ]
    }

    /// Frontal face with the given EAR, nose shifted by (dx, dy) pixels
    pub fn face(ear: f32, nose_dx: f32, nose_dy: f32) -> Landmarks {
        Landmarks {
            left_eye: eye(70.0, 100.0, ear),
            right_eye: eye(130.0, 100.0, ear),
            nose_tip: Point::new(100.0 + nose_dx, 150.0 + nose_dy),
            chin: Point::new(100.0, 200.0),
            face_left: Point::new(40.0, 120.0),
            face_right: Point::new(160.0, 120.0),
        }
    }
}
