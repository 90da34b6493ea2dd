use tracing::{debug, info};

use super::filter::{Point, PoseSnapshot, Signal};
use crate::config::CalibrationConfig;
use crate::pose::KeypointIndex;

/// 静止フレーム数カウンタ
///
/// 対象が前回の安定値から動かなければ加算、動けば 0 に戻る。
#[derive(Debug, Clone, Default)]
pub struct HysteresisCounter {
    count: u32,
}

impl HysteresisCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, steady: bool) -> u32 {
        if steady {
            self.count = self.count.saturating_add(1);
        } else {
            self.count = 0;
        }
        self.count
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }
}

/// キャリブレーション時の基準寸法（画像座標）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationBaseline {
    /// 右腰X - 左腰X
    pub hip_width: f32,
    /// 右肩X - 左肩X（腰と同じ符号規約）
    pub shoulder_width: f32,
    /// 腰→膝の縦距離の左右平均
    pub leg_length: f32,
    /// 基準の腰中点
    pub reference_center: Point,
}

impl CalibrationBaseline {
    /// 腰・肩・膝がすべて揃っていれば基準値を計算
    pub fn capture(snapshot: &PoseSnapshot) -> Option<Self> {
        use KeypointIndex::*;
        let left_hip = snapshot.get(LeftHip)?;
        let right_hip = snapshot.get(RightHip)?;
        let left_shoulder = snapshot.get(LeftShoulder)?;
        let right_shoulder = snapshot.get(RightShoulder)?;
        let left_knee = snapshot.get(LeftKnee)?;
        let right_knee = snapshot.get(RightKnee)?;
        let reference_center = snapshot.center()?;

        Some(Self {
            hip_width: right_hip.x - left_hip.x,
            shoulder_width: right_shoulder.x - left_shoulder.x,
            leg_length: ((left_knee.y - left_hip.y) + (right_knee.y - right_hip.y)) / 2.0,
            reference_center,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CalibrationEvent {
    /// 初回キャプチャ。一度だけ発生する
    Ready(CalibrationBaseline),
    /// 2回目以降のキャプチャ
    Recalibrated(CalibrationBaseline),
}

const TORSO_JOINTS: [KeypointIndex; 4] = [
    KeypointIndex::LeftHip,
    KeypointIndex::RightHip,
    KeypointIndex::LeftShoulder,
    KeypointIndex::RightShoulder,
];

/// 腰中点が一定フレーム静止したら基準姿勢を記録する
#[derive(Debug, Clone)]
pub struct CalibrationTracker {
    initial_frames: u32,
    recalibration_frames: u32,
    counter: HysteresisCounter,
    baseline: Option<CalibrationBaseline>,
    captures: u32,
}

impl CalibrationTracker {
    pub fn new(initial_frames: u32, recalibration_frames: u32) -> Self {
        Self {
            initial_frames,
            recalibration_frames,
            counter: HysteresisCounter::new(),
            baseline: None,
            captures: 0,
        }
    }

    pub fn from_config(config: &CalibrationConfig) -> Self {
        Self::new(config.initial_frames, config.recalibration_frames)
    }

    /// 現在の発火閾値。初回前は短く、以後は長い
    pub fn threshold(&self) -> u32 {
        if self.baseline.is_some() {
            self.recalibration_frames
        } else {
            self.initial_frames
        }
    }

    pub fn baseline(&self) -> Option<&CalibrationBaseline> {
        self.baseline.as_ref()
    }

    pub fn is_ready(&self) -> bool {
        self.baseline.is_some()
    }

    pub fn counter(&self) -> u32 {
        self.counter.count()
    }

    pub fn captures(&self) -> u32 {
        self.captures
    }

    /// 体幹の関節が揃っているか（カウンタを進める条件）
    pub fn is_tracking(snapshot: &PoseSnapshot) -> bool {
        snapshot.has_all(&TORSO_JOINTS)
    }

    pub fn update(&mut self, snapshot: &PoseSnapshot) -> Option<CalibrationEvent> {
        if !Self::is_tracking(snapshot) {
            return None;
        }

        let count = self.counter.observe(!snapshot.moved(Signal::Center));
        if count <= self.threshold() {
            return None;
        }

        // 膝が未検出ならカウントを保持したまま待つ
        let Some(baseline) = CalibrationBaseline::capture(snapshot) else {
            debug!(count, "calibration pending: knees not tracked");
            return None;
        };

        self.counter.reset();
        self.captures += 1;
        let first = self.baseline.is_none();
        self.baseline = Some(baseline);

        if first {
            info!(
                hip_width = baseline.hip_width,
                shoulder_width = baseline.shoulder_width,
                leg_length = baseline.leg_length,
                "calibration captured, subject ready"
            );
            Some(CalibrationEvent::Ready(baseline))
        } else {
            debug!(captures = self.captures, "recalibrated");
            Some(CalibrationEvent::Recalibrated(baseline))
        }
    }
}

impl Default for CalibrationTracker {
    fn default() -> Self {
        Self::from_config(&CalibrationConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::{Keypoint, Pose};
    use crate::retarget::filter::KeypointFilter;

    fn stance_pose(dx: f32) -> Pose {
        use KeypointIndex::*;
        let mut pose = Pose::default();
        for (idx, x, y) in [
            (LeftHip, 0.0, 0.0),
            (RightHip, 10.0, 0.0),
            (LeftShoulder, 2.0, 10.0),
            (RightShoulder, 8.0, 10.0),
            (LeftKnee, 0.0, 10.0),
            (RightKnee, 10.0, 10.0),
        ] {
            pose.set(idx, Keypoint::new(x + dx, y, 0.9));
        }
        pose
    }

    #[test]
    fn test_counter_increments_and_resets() {
        let mut c = HysteresisCounter::new();
        let mut prev = 0;
        for _ in 0..10 {
            let n = c.observe(true);
            assert!(n > prev);
            prev = n;
        }
        assert_eq!(c.observe(false), 0);
        assert_eq!(c.observe(true), 1);
    }

    #[test]
    fn test_counter_tracks_center_motion() {
        let filter = KeypointFilter::default();
        let mut snap = PoseSnapshot::new();
        let mut tracker = CalibrationTracker::new(1000, 1000);

        // 静止中は単調増加、1.0以上動いたフレームで0に戻る
        let offsets = [0.0, 0.0, 0.2, 0.0, 0.0, 3.0, 3.0, 3.1, 3.0];
        let expected = [0, 1, 2, 3, 4, 0, 1, 2, 3];
        for (dx, want) in offsets.iter().zip(expected) {
            filter.update(&stance_pose(*dx), &mut snap);
            tracker.update(&snap);
            assert_eq!(tracker.counter(), want, "offset {}", dx);
        }
    }

    #[test]
    fn test_calibration_baseline_values() {
        let filter = KeypointFilter::default();
        let mut snap = PoseSnapshot::new();
        let mut tracker = CalibrationTracker::default();

        let mut ready = 0;
        for _ in 0..60 {
            filter.update(&stance_pose(0.0), &mut snap);
            if let Some(CalibrationEvent::Ready(_)) = tracker.update(&snap) {
                ready += 1;
            }
        }
        assert_eq!(ready, 1);

        let b = tracker.baseline().unwrap();
        assert_eq!(b.hip_width, 10.0);
        assert_eq!(b.shoulder_width, 6.0);
        assert_eq!(b.leg_length, 10.0);
        assert_eq!(b.reference_center, Point::new(5.0, 0.0));
    }

    #[test]
    fn test_initial_threshold_then_recalibration_threshold() {
        let filter = KeypointFilter::default();
        let mut snap = PoseSnapshot::new();
        let mut tracker = CalibrationTracker::default();

        let mut events = Vec::new();
        for frame in 0..120 {
            filter.update(&stance_pose(0.0), &mut snap);
            if let Some(ev) = tracker.update(&snap) {
                events.push((frame, ev));
            }
        }
        // 1フレーム目は中心の初回採用で count=0、count=6 (>5) で初回キャプチャ
        assert!(matches!(events[0], (6, CalibrationEvent::Ready(_))));
        // 以降は count=51 (>50) ごと
        assert!(matches!(events[1], (57, CalibrationEvent::Recalibrated(_))));
        assert!(matches!(events[2], (108, CalibrationEvent::Recalibrated(_))));
        assert_eq!(events.len(), 3);
        assert_eq!(tracker.captures(), 3);
    }

    #[test]
    fn test_missing_torso_never_triggers() {
        let filter = KeypointFilter::default();
        let mut snap = PoseSnapshot::new();
        let mut tracker = CalibrationTracker::default();

        let mut pose = stance_pose(0.0);
        pose.set(KeypointIndex::RightShoulder, Keypoint::new(8.0, 10.0, 0.1));
        for _ in 0..100 {
            filter.update(&pose, &mut snap);
            assert!(tracker.update(&snap).is_none());
        }
        assert!(!tracker.is_ready());
        assert_eq!(tracker.counter(), 0);
    }

    #[test]
    fn test_missing_knees_defers_capture() {
        let filter = KeypointFilter::default();
        let mut snap = PoseSnapshot::new();
        let mut tracker = CalibrationTracker::default();

        let mut pose = stance_pose(0.0);
        pose.set(KeypointIndex::LeftKnee, Keypoint::default());
        for _ in 0..20 {
            filter.update(&pose, &mut snap);
            assert!(tracker.update(&snap).is_none());
        }
        assert!(tracker.counter() > 5);

        filter.update(&stance_pose(0.0), &mut snap);
        assert!(matches!(tracker.update(&snap), Some(CalibrationEvent::Ready(_))));
        assert_eq!(tracker.counter(), 0);
    }
}
