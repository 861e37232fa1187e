//! Geometric features fed to the camera posture classifier.
//!
//! The vector layout is fixed: it has to match the column order the classifier
//! was fitted with. Changing the order, or the keypoint subset, silently breaks
//! the deployed model.

use super::keypoint::{Keypoint, KeypointIndex, KeypointSet};

/// Guards every division against degenerate (collapsed) poses
pub const EPSILON: f32 = 1e-6;

/// Keypoints whose raw coordinates lead the feature vector, in this order
pub const COORDINATE_KEYPOINTS: [KeypointIndex; 13] = [
    KeypointIndex::Nose,
    KeypointIndex::LeftEye,
    KeypointIndex::RightEye,
    KeypointIndex::LeftEar,
    KeypointIndex::RightEar,
    KeypointIndex::LeftShoulder,
    KeypointIndex::RightShoulder,
    KeypointIndex::LeftHip,
    KeypointIndex::RightHip,
    KeypointIndex::LeftKnee,
    KeypointIndex::RightKnee,
    KeypointIndex::LeftAnkle,
    KeypointIndex::RightAnkle,
];

pub const DERIVED_FEATURE_COUNT: usize = 18;

pub const FEATURE_COUNT: usize = COORDINATE_KEYPOINTS.len() * 2 + DERIVED_FEATURE_COUNT;

/// Angle at `vertex` between the rays to `a` and `b`, in degrees
pub fn angle_deg(a: &Keypoint, vertex: &Keypoint, b: &Keypoint) -> f32 {
    let v1 = (a.x - vertex.x, a.y - vertex.y);
    let v2 = (b.x - vertex.x, b.y - vertex.y);
    let dot = v1.0 * v2.0 + v1.1 * v2.1;
    let norms = (v1.0.powi(2) + v1.1.powi(2)).sqrt() * (v2.0.powi(2) + v2.1.powi(2)).sqrt();
    let cos = (dot / (norms + EPSILON)).clamp(-1.0, 1.0);
    cos.acos().to_degrees()
}

/// Pose measurements derived from the keypoints
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DerivedFeatures {
    pub back_angle: f32,
    pub left_knee_angle: f32,
    pub right_knee_angle: f32,
    pub left_hip_angle: f32,
    pub right_hip_angle: f32,
    pub nose_to_shoulder_dist: f32,
    pub shoulder_width: f32,
    pub hip_width: f32,
    pub shoulder_y_diff: f32,
    pub shoulder_x_diff: f32,
    pub hip_y_diff: f32,
    pub hip_x_diff: f32,
    pub nose_shoulder_y_diff: f32,
    pub shoulder_hip_y_diff: f32,
    pub knee_distance: f32,
    pub ankle_distance: f32,
    pub knee_ankle_ratio: f32,
    pub shoulder_hip_ratio: f32,
}

impl DerivedFeatures {
    pub fn compute(pose: &KeypointSet) -> Self {
        use KeypointIndex::*;

        let nose = pose.get(Nose);
        let l_shoulder = pose.get(LeftShoulder);
        let r_shoulder = pose.get(RightShoulder);
        let l_hip = pose.get(LeftHip);
        let r_hip = pose.get(RightHip);
        let l_knee = pose.get(LeftKnee);
        let r_knee = pose.get(RightKnee);
        let l_ankle = pose.get(LeftAnkle);
        let r_ankle = pose.get(RightAnkle);

        let shoulder_mid = l_shoulder.midpoint(r_shoulder);
        let hip_mid = l_hip.midpoint(r_hip);

        // distances are expressed in torso lengths so camera distance drops out
        let torso = shoulder_mid.distance(&hip_mid) + EPSILON;

        let shoulder_width = l_shoulder.distance(r_shoulder) / torso;
        let hip_width = l_hip.distance(r_hip) / torso;
        let knee_distance = l_knee.distance(r_knee) / torso;
        let ankle_distance = l_ankle.distance(r_ankle) / torso;

        Self {
            back_angle: angle_deg(nose, &shoulder_mid, &hip_mid),
            left_knee_angle: angle_deg(l_hip, l_knee, l_ankle),
            right_knee_angle: angle_deg(r_hip, r_knee, r_ankle),
            left_hip_angle: angle_deg(l_shoulder, l_hip, l_knee),
            right_hip_angle: angle_deg(r_shoulder, r_hip, r_knee),
            nose_to_shoulder_dist: nose.distance(&shoulder_mid) / torso,
            shoulder_width,
            hip_width,
            shoulder_y_diff: (l_shoulder.y - r_shoulder.y).abs(),
            shoulder_x_diff: (l_shoulder.x - r_shoulder.x).abs(),
            hip_y_diff: (l_hip.y - r_hip.y).abs(),
            hip_x_diff: (l_hip.x - r_hip.x).abs(),
            nose_shoulder_y_diff: nose.y - shoulder_mid.y,
            shoulder_hip_y_diff: shoulder_mid.y - hip_mid.y,
            knee_distance,
            ankle_distance,
            knee_ankle_ratio: knee_distance / (ankle_distance + EPSILON),
            shoulder_hip_ratio: shoulder_width / (hip_width + EPSILON),
        }
    }

    pub fn to_array(&self) -> [f32; DERIVED_FEATURE_COUNT] {
        [
            self.back_angle,
            self.left_knee_angle,
            self.right_knee_angle,
            self.left_hip_angle,
            self.right_hip_angle,
            self.nose_to_shoulder_dist,
            self.shoulder_width,
            self.hip_width,
            self.shoulder_y_diff,
            self.shoulder_x_diff,
            self.hip_y_diff,
            self.hip_x_diff,
            self.nose_shoulder_y_diff,
            self.shoulder_hip_y_diff,
            self.knee_distance,
            self.ankle_distance,
            self.knee_ankle_ratio,
            self.shoulder_hip_ratio,
        ]
    }
}

/// Classifier input: 13 coordinate pairs followed by the derived features
pub fn feature_vector(pose: &KeypointSet) -> Vec<f32> {
    let mut features = Vec::with_capacity(FEATURE_COUNT);
    for idx in COORDINATE_KEYPOINTS {
        let kp = pose.get(idx);
        features.push(kp.x);
        features.push(kp.y);
    }
    features.extend_from_slice(&DerivedFeatures::compute(pose).to_array());
    features
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Upright seated person facing the camera
    fn upright() -> KeypointSet {
        let mut p = [Keypoint::default(); KeypointIndex::COUNT];
        let mut set = |i: KeypointIndex, x: f32, y: f32| p[i as usize] = Keypoint::new(x, y, 0.9);
        set(KeypointIndex::Nose, 0.5, 0.1);
        set(KeypointIndex::LeftEye, 0.48, 0.08);
        set(KeypointIndex::RightEye, 0.52, 0.08);
        set(KeypointIndex::LeftEar, 0.46, 0.09);
        set(KeypointIndex::RightEar, 0.54, 0.09);
        set(KeypointIndex::LeftShoulder, 0.4, 0.3);
        set(KeypointIndex::RightShoulder, 0.6, 0.3);
        set(KeypointIndex::LeftHip, 0.42, 0.6);
        set(KeypointIndex::RightHip, 0.58, 0.6);
        set(KeypointIndex::LeftKnee, 0.42, 0.8);
        set(KeypointIndex::RightKnee, 0.58, 0.8);
        set(KeypointIndex::LeftAnkle, 0.42, 1.0);
        set(KeypointIndex::RightAnkle, 0.58, 1.0);
        KeypointSet::new(p)
    }

    fn scaled(pose: &KeypointSet, factor: f32, dx: f32, dy: f32) -> KeypointSet {
        let mut p = [Keypoint::default(); KeypointIndex::COUNT];
        for (dst, src) in p.iter_mut().zip(pose.points()) {
            *dst = Keypoint::new(src.x * factor + dx, src.y * factor + dy, src.confidence);
        }
        KeypointSet::new(p)
    }

    #[test]
    fn test_angle_right_and_straight() {
        let o = Keypoint::new(0.0, 0.0, 1.0);
        let a = Keypoint::new(1.0, 0.0, 1.0);
        let b = Keypoint::new(0.0, 1.0, 1.0);
        let c = Keypoint::new(-1.0, 0.0, 1.0);
        assert!((angle_deg(&a, &o, &b) - 90.0).abs() < 1e-3);
        assert!((angle_deg(&a, &o, &c) - 180.0).abs() < 0.2);
    }

    #[test]
    fn test_angle_degenerate_is_finite() {
        let p = Keypoint::new(0.5, 0.5, 1.0);
        let angle = angle_deg(&p, &p, &p);
        assert!(angle.is_finite());
    }

    #[test]
    fn test_vector_layout() {
        let pose = upright();
        let v = feature_vector(&pose);
        assert_eq!(v.len(), FEATURE_COUNT);
        assert_eq!(FEATURE_COUNT, 44);
        // nose first, right ankle last among coordinates
        assert_eq!(&v[0..2], &[0.5, 0.1]);
        assert_eq!(&v[24..26], &[0.58, 1.0]);
        // back angle leads the derived block
        let derived = DerivedFeatures::compute(&pose);
        assert_eq!(v[26], derived.back_angle);
        assert_eq!(v[FEATURE_COUNT - 1], derived.shoulder_hip_ratio);
    }

    #[test]
    fn test_upright_pose_measurements() {
        let d = DerivedFeatures::compute(&upright());
        // nose straight above shoulder midpoint, hips straight below
        assert!((d.back_angle - 180.0).abs() < 0.5, "back angle {}", d.back_angle);
        assert!((d.left_knee_angle - 180.0).abs() < 0.5);
        assert!(d.shoulder_y_diff.abs() < 1e-6);
        assert!((d.shoulder_width - 0.2 / 0.3).abs() < 1e-3);
        assert!(d.shoulder_hip_y_diff < 0.0);
    }

    #[test]
    fn test_normalized_distances_are_scale_invariant() {
        let base = DerivedFeatures::compute(&upright());
        let small = DerivedFeatures::compute(&scaled(&upright(), 0.5, 0.1, 0.2));

        for (a, b) in [
            (base.shoulder_width, small.shoulder_width),
            (base.hip_width, small.hip_width),
            (base.knee_distance, small.knee_distance),
            (base.ankle_distance, small.ankle_distance),
            (base.nose_to_shoulder_dist, small.nose_to_shoulder_dist),
            (base.shoulder_hip_ratio, small.shoulder_hip_ratio),
        ] {
            assert!((a - b).abs() < 1e-3, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_collapsed_pose_stays_finite() {
        let pose = KeypointSet::new([Keypoint::new(0.5, 0.5, 0.1); KeypointIndex::COUNT]);
        assert!(feature_vector(&pose).iter().all(|f| f.is_finite()));
    }

    #[test]
    fn test_leaning_shoulders_show_asymmetry() {
        let mut p = [Keypoint::default(); KeypointIndex::COUNT];
        p.copy_from_slice(upright().points());
        p[KeypointIndex::LeftShoulder as usize].y = 0.35;
        let d = DerivedFeatures::compute(&KeypointSet::new(p));
        assert!((d.shoulder_y_diff - 0.05).abs() < 1e-5);
    }
}
