use nalgebra::Vector2;

use crate::config::FilterConfig;
use crate::pose::{KeypointIndex, Pose};

pub type Point = Vector2<f32>;

/// 除細動（微小移動の無視）を掛ける信号
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Nose,
    LeftEar,
    RightEar,
    LeftShoulder,
    RightShoulder,
    /// 左右の腰の中点
    Center,
}

impl Signal {
    pub const COUNT: usize = 6;

    pub const ALL: [Signal; Self::COUNT] = [
        Self::Nose,
        Self::LeftEar,
        Self::RightEar,
        Self::LeftShoulder,
        Self::RightShoulder,
        Self::Center,
    ];

    /// 元になるキーポイント。Center は派生値なので None
    pub fn source(self) -> Option<KeypointIndex> {
        match self {
            Self::Nose => Some(KeypointIndex::Nose),
            Self::LeftEar => Some(KeypointIndex::LeftEar),
            Self::RightEar => Some(KeypointIndex::RightEar),
            Self::LeftShoulder => Some(KeypointIndex::LeftShoulder),
            Self::RightShoulder => Some(KeypointIndex::RightShoulder),
            Self::Center => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct StableValue {
    value: Option<Point>,
    moved: bool,
}

/// 信頼度でゲートされた関節位置の現在値（フレームをまたいで保持）
#[derive(Debug, Clone, Default)]
pub struct PoseSnapshot {
    joints: [Option<Point>; KeypointIndex::COUNT],
    center: Option<Point>,
    stable: [StableValue; Signal::COUNT],
}

impl PoseSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, index: KeypointIndex) -> Option<Point> {
        self.joints[index as usize]
    }

    pub fn set(&mut self, index: KeypointIndex, point: Point) {
        self.joints[index as usize] = Some(point);
    }

    /// 両腰が一度でも検出されていれば腰中点
    pub fn center(&self) -> Option<Point> {
        self.center
    }

    /// 除細動後の安定値
    pub fn stable(&self, signal: Signal) -> Option<Point> {
        self.stable[signal as usize].value
    }

    /// 直近フレームで安定値が更新されたか
    pub fn moved(&self, signal: Signal) -> bool {
        self.stable[signal as usize].moved
    }

    pub fn has_all(&self, indices: &[KeypointIndex]) -> bool {
        indices.iter().all(|&i| self.get(i).is_some())
    }
}

/// 前回の安定値から epsilon 未満しか動いていなければ前回値を維持する。
/// 戻り値の bool は安定値が更新されたかどうか。
pub fn defibrillate(prev: Option<Point>, candidate: Point, epsilon: f32) -> (Point, bool) {
    match prev {
        Some(prev) if (candidate - prev).norm() < epsilon => (prev, false),
        _ => (candidate, true),
    }
}

/// 信頼度ゲート + 除細動
#[derive(Debug, Clone)]
pub struct KeypointFilter {
    head_confidence: f32,
    body_confidence: f32,
    head_epsilon: f32,
    center_epsilon: f32,
}

impl KeypointFilter {
    pub fn new(
        head_confidence: f32,
        body_confidence: f32,
        head_epsilon: f32,
        center_epsilon: f32,
    ) -> Self {
        Self {
            head_confidence,
            body_confidence,
            head_epsilon,
            center_epsilon,
        }
    }

    pub fn from_config(config: &FilterConfig) -> Self {
        Self::new(
            config.head_confidence,
            config.body_confidence,
            config.head_epsilon,
            config.center_epsilon,
        )
    }

    pub fn threshold(&self, index: KeypointIndex) -> f32 {
        if index.is_head() {
            self.head_confidence
        } else {
            self.body_confidence
        }
    }

    pub fn epsilon(&self, signal: Signal) -> f32 {
        match signal {
            Signal::Center => self.center_epsilon,
            _ => self.head_epsilon,
        }
    }

    /// 1フレーム分の検出結果でスナップショットを更新
    ///
    /// 閾値未満のキーポイントは無視し、既存の値を保持する。
    pub fn update(&self, pose: &Pose, snapshot: &mut PoseSnapshot) {
        for index in KeypointIndex::ALL {
            let kp = pose.get(index);
            if kp.is_valid(self.threshold(index)) && kp.x.is_finite() && kp.y.is_finite() {
                snapshot.set(index, kp.position());
            }
        }

        if let (Some(l), Some(r)) = (
            snapshot.get(KeypointIndex::LeftHip),
            snapshot.get(KeypointIndex::RightHip),
        ) {
            snapshot.center = Some((l + r) / 2.0);
        }

        for signal in Signal::ALL {
            let candidate = match signal.source() {
                Some(index) => snapshot.get(index),
                None => snapshot.center,
            };
            let slot = &mut snapshot.stable[signal as usize];
            match candidate {
                Some(candidate) => {
                    let (value, moved) = defibrillate(slot.value, candidate, self.epsilon(signal));
                    slot.value = Some(value);
                    slot.moved = moved;
                }
                None => slot.moved = false,
            }
        }
    }
}

impl Default for KeypointFilter {
    fn default() -> Self {
        Self::from_config(&FilterConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::Keypoint;

    fn pose_with(points: &[(KeypointIndex, f32, f32, f32)]) -> Pose {
        let mut pose = Pose::default();
        for &(idx, x, y, score) in points {
            pose.set(idx, Keypoint::new(x, y, score));
        }
        pose
    }

    #[test]
    fn test_low_confidence_never_overwrites() {
        let filter = KeypointFilter::default();
        let mut snap = PoseSnapshot::new();

        filter.update(&pose_with(&[(KeypointIndex::LeftElbow, 10.0, 20.0, 0.9)]), &mut snap);
        assert_eq!(snap.get(KeypointIndex::LeftElbow), Some(Point::new(10.0, 20.0)));

        for score in [0.0, 0.1, 0.3, 0.49] {
            filter.update(&pose_with(&[(KeypointIndex::LeftElbow, 99.0, 99.0, score)]), &mut snap);
            assert_eq!(snap.get(KeypointIndex::LeftElbow), Some(Point::new(10.0, 20.0)));
        }
    }

    #[test]
    fn test_low_confidence_leaves_absent_joint_absent() {
        let filter = KeypointFilter::default();
        let mut snap = PoseSnapshot::new();
        filter.update(&pose_with(&[(KeypointIndex::RightWrist, 1.0, 1.0, 0.2)]), &mut snap);
        assert!(snap.get(KeypointIndex::RightWrist).is_none());
    }

    #[test]
    fn test_head_tier_is_stricter() {
        let filter = KeypointFilter::default();
        let mut snap = PoseSnapshot::new();
        filter.update(
            &pose_with(&[
                (KeypointIndex::Nose, 5.0, 5.0, 0.6),
                (KeypointIndex::LeftHip, 5.0, 5.0, 0.6),
            ]),
            &mut snap,
        );
        assert!(snap.get(KeypointIndex::Nose).is_none());
        assert!(snap.get(KeypointIndex::LeftHip).is_some());
    }

    #[test]
    fn test_non_finite_position_rejected() {
        let filter = KeypointFilter::default();
        let mut snap = PoseSnapshot::new();
        filter.update(&pose_with(&[(KeypointIndex::LeftKnee, f32::NAN, 1.0, 0.9)]), &mut snap);
        assert!(snap.get(KeypointIndex::LeftKnee).is_none());
    }

    #[test]
    fn test_center_requires_both_hips() {
        let filter = KeypointFilter::default();
        let mut snap = PoseSnapshot::new();
        filter.update(&pose_with(&[(KeypointIndex::LeftHip, 0.0, 0.0, 0.9)]), &mut snap);
        assert!(snap.center().is_none());

        filter.update(&pose_with(&[(KeypointIndex::RightHip, 10.0, 4.0, 0.9)]), &mut snap);
        assert_eq!(snap.center(), Some(Point::new(5.0, 2.0)));
    }

    #[test]
    fn test_defibrillate_first_value_accepted() {
        let (v, moved) = defibrillate(None, Point::new(1.0, 2.0), 0.5);
        assert_eq!(v, Point::new(1.0, 2.0));
        assert!(moved);
    }

    #[test]
    fn test_defibrillate_holds_below_epsilon() {
        let prev = Point::new(1.0, 1.0);
        let (v, moved) = defibrillate(Some(prev), Point::new(1.3, 1.0), 0.5);
        assert_eq!(v, prev);
        assert!(!moved);

        let (v, moved) = defibrillate(Some(prev), Point::new(1.6, 1.0), 0.5);
        assert_eq!(v, Point::new(1.6, 1.0));
        assert!(moved);
    }

    #[test]
    fn test_stable_value_idempotent_under_jitter() {
        let filter = KeypointFilter::default();
        let mut snap = PoseSnapshot::new();
        filter.update(&pose_with(&[(KeypointIndex::Nose, 50.0, 50.0, 0.95)]), &mut snap);
        let first = snap.stable(Signal::Nose).unwrap();
        assert!(snap.moved(Signal::Nose));

        let jitter = [0.1, -0.2, 0.3, -0.4, 0.2, 0.0, -0.1];
        for (i, dx) in jitter.iter().cycle().take(40).enumerate() {
            let dy = jitter[(i + 3) % jitter.len()] * 0.5;
            filter.update(
                &pose_with(&[(KeypointIndex::Nose, 50.0 + dx, 50.0 + dy, 0.95)]),
                &mut snap,
            );
            assert_eq!(snap.stable(Signal::Nose), Some(first));
            assert!(!snap.moved(Signal::Nose));
        }
    }

    #[test]
    fn test_center_uses_center_epsilon() {
        let filter = KeypointFilter::default();
        let mut snap = PoseSnapshot::new();
        let hips = |dx: f32| {
            pose_with(&[
                (KeypointIndex::LeftHip, 0.0 + dx, 0.0, 0.9),
                (KeypointIndex::RightHip, 10.0 + dx, 0.0, 0.9),
            ])
        };
        filter.update(&hips(0.0), &mut snap);
        assert!(snap.moved(Signal::Center));

        // 0.8 は頭部の epsilon (0.5) より大きいが中心の epsilon (1.0) 未満
        filter.update(&hips(0.8), &mut snap);
        assert!(!snap.moved(Signal::Center));
        assert_eq!(snap.stable(Signal::Center), Some(Point::new(5.0, 0.0)));

        filter.update(&hips(1.5), &mut snap);
        assert!(snap.moved(Signal::Center));
        assert_eq!(snap.stable(Signal::Center), Some(Point::new(6.5, 0.0)));
    }

    #[test]
    fn test_missing_signal_not_moved() {
        let filter = KeypointFilter::default();
        let mut snap = PoseSnapshot::new();
        filter.update(&Pose::default(), &mut snap);
        for signal in Signal::ALL {
            assert!(snap.stable(signal).is_none());
            assert!(!snap.moved(signal));
        }
    }
}
