use serde::{Deserialize, Serialize};
use tracing::debug;

use super::calibration::{CalibrationTracker, HysteresisCounter};
use super::filter::{Point, PoseSnapshot, Signal};
use super::rig::{bones, Rig};
use crate::config::GestureConfig;
use crate::pose::KeypointIndex;

/// サブシステムの準備状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GateState {
    #[default]
    Uncalibrated,
    Calibrating,
    Ready,
}

/// ロックとゲートの単位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BoneGroup {
    Head,
    /// 胴体・腕・脚
    Body,
}

impl BoneGroup {
    pub fn bones(self) -> &'static [&'static str] {
        use bones::*;
        match self {
            Self::Head => &[HEAD],
            Self::Body => &[
                BODY,
                UPPER_ARM_L,
                LOWER_ARM_L,
                UPPER_ARM_R,
                LOWER_ARM_R,
                UPPER_LEG_L,
                LOWER_LEG_L,
                UPPER_LEG_R,
                LOWER_LEG_R,
            ],
        }
    }

    /// トランジションの対象となる代表ボーン
    pub fn primary_bone(self) -> &'static str {
        match self {
            Self::Head => bones::HEAD,
            Self::Body => bones::BODY,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Head => "head",
            Self::Body => "body",
        }
    }
}

const HEAD_LANDMARKS: [KeypointIndex; 5] = [
    KeypointIndex::Nose,
    KeypointIndex::LeftEye,
    KeypointIndex::RightEye,
    KeypointIndex::LeftEar,
    KeypointIndex::RightEar,
];

const HEAD_REQUIRED: [KeypointIndex; 3] = [
    KeypointIndex::Nose,
    KeypointIndex::LeftEar,
    KeypointIndex::RightEar,
];

/// 更新を許可するかの判定と、回転ジェスチャの検出
#[derive(Debug, Clone)]
pub struct GateController {
    head: GateState,
    body: GateState,
    window: f32,
    turn_frames: u32,
    previous_center: Option<Point>,
    turn_counter: HysteresisCounter,
    turn_sign: i32,
}

impl GateController {
    pub fn new(window: f32, turn_frames: u32) -> Self {
        Self {
            head: GateState::Uncalibrated,
            body: GateState::Uncalibrated,
            window,
            turn_frames,
            previous_center: None,
            turn_counter: HysteresisCounter::new(),
            turn_sign: 0,
        }
    }

    pub fn from_config(config: &GestureConfig) -> Self {
        Self::new(config.window, config.turn_frames)
    }

    pub fn state(&self, group: BoneGroup) -> GateState {
        match group {
            BoneGroup::Head => self.head,
            BoneGroup::Body => self.body,
        }
    }

    /// 頭部: いずれかの顔ランドマークで Calibrating、鼻と両耳が揃えば Ready
    pub fn update_head(&mut self, snapshot: &PoseSnapshot) {
        if self.head == GateState::Ready {
            return;
        }
        if snapshot.has_all(&HEAD_REQUIRED) {
            debug!("head gate ready");
            self.head = GateState::Ready;
        } else if HEAD_LANDMARKS.iter().any(|&i| snapshot.get(i).is_some()) {
            self.head = GateState::Calibrating;
        }
    }

    /// 胴体: 腰と肩が揃えば Calibrating、初回キャプチャで Ready
    pub fn update_body(&mut self, snapshot: &PoseSnapshot, calibrated: bool) {
        if calibrated {
            if self.body != GateState::Ready {
                debug!("body gate ready");
            }
            self.body = GateState::Ready;
        } else if self.body == GateState::Uncalibrated && CalibrationTracker::is_tracking(snapshot) {
            self.body = GateState::Calibrating;
        }
    }

    /// グループ内のいずれかのボーンがトランジションに所有されているか
    pub fn is_locked(group: BoneGroup, rig: &Rig) -> bool {
        group.bones().iter().any(|bone| rig.is_locked(bone))
    }

    /// Ready かつ未ロックなら更新してよい
    pub fn admit(&self, group: BoneGroup, rig: &Rig) -> bool {
        self.state(group) == GateState::Ready && !Self::is_locked(group, rig)
    }

    /// 前フレームの腰中点に対する左右の腰の位置から回転方向の候補を求める
    pub fn turn_candidate(&self, previous_center: Point, left_hip: Point, right_hip: Point) -> i32 {
        let dl = previous_center.x - left_hip.x;
        let dr = right_hip.x - previous_center.x;
        let w = self.window;
        if -w < dl && dl < 0.0 && -w < dr && dr < 0.0 {
            1
        } else if 0.0 < dl && dl < w && 0.0 < dr && dr < w {
            -1
        } else {
            0
        }
    }

    /// 同じ符号の候補が turn_frames 回続いたら符号を返す
    pub fn detect_turn(&mut self, snapshot: &PoseSnapshot, rig: &Rig) -> Option<i32> {
        let previous = self.previous_center;
        // 生の中心ではなく除細動後の中心と比べる
        self.previous_center = snapshot.stable(Signal::Center);

        let candidate = match (
            previous,
            snapshot.get(KeypointIndex::LeftHip),
            snapshot.get(KeypointIndex::RightHip),
        ) {
            (Some(c), Some(l), Some(r)) => self.turn_candidate(c, l, r),
            _ => 0,
        };

        if candidate == 0 || Self::is_locked(BoneGroup::Body, rig) {
            self.turn_counter.reset();
            self.turn_sign = 0;
            return None;
        }
        if candidate != self.turn_sign {
            self.turn_counter.reset();
            self.turn_sign = candidate;
        }
        let count = self.turn_counter.observe(true);

        if count < self.turn_frames || self.body != GateState::Ready {
            return None;
        }
        self.turn_counter.reset();
        self.turn_sign = 0;
        debug!(sign = candidate, "turn gesture detected");
        Some(candidate)
    }
}

impl Default for GateController {
    fn default() -> Self {
        Self::from_config(&GestureConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::{Keypoint, Pose};
    use crate::retarget::filter::KeypointFilter;

    fn hips(left: f32, right: f32) -> Pose {
        let mut pose = Pose::default();
        pose.set(KeypointIndex::LeftHip, Keypoint::new(left, 0.0, 0.9));
        pose.set(KeypointIndex::RightHip, Keypoint::new(right, 0.0, 0.9));
        pose
    }

    fn ready_gate() -> GateController {
        let mut gate = GateController::default();
        gate.update_body(&PoseSnapshot::new(), true);
        gate
    }

    #[test]
    fn test_body_gate_progression() {
        let filter = KeypointFilter::default();
        let mut snap = PoseSnapshot::new();
        let mut gate = GateController::default();
        assert_eq!(gate.state(BoneGroup::Body), GateState::Uncalibrated);

        let mut pose = hips(0.0, 10.0);
        filter.update(&pose, &mut snap);
        gate.update_body(&snap, false);
        assert_eq!(gate.state(BoneGroup::Body), GateState::Uncalibrated);

        pose.set(KeypointIndex::LeftShoulder, Keypoint::new(2.0, 10.0, 0.9));
        pose.set(KeypointIndex::RightShoulder, Keypoint::new(8.0, 10.0, 0.9));
        filter.update(&pose, &mut snap);
        gate.update_body(&snap, false);
        assert_eq!(gate.state(BoneGroup::Body), GateState::Calibrating);

        gate.update_body(&snap, true);
        assert_eq!(gate.state(BoneGroup::Body), GateState::Ready);
    }

    #[test]
    fn test_head_gate_progression() {
        let filter = KeypointFilter::default();
        let mut snap = PoseSnapshot::new();
        let mut gate = GateController::default();

        let mut pose = Pose::default();
        pose.set(KeypointIndex::LeftEye, Keypoint::new(1.0, 1.0, 0.9));
        filter.update(&pose, &mut snap);
        gate.update_head(&snap);
        assert_eq!(gate.state(BoneGroup::Head), GateState::Calibrating);

        pose.set(KeypointIndex::Nose, Keypoint::new(2.0, 2.0, 0.9));
        pose.set(KeypointIndex::LeftEar, Keypoint::new(0.0, 1.0, 0.9));
        pose.set(KeypointIndex::RightEar, Keypoint::new(4.0, 1.0, 0.9));
        filter.update(&pose, &mut snap);
        gate.update_head(&snap);
        assert_eq!(gate.state(BoneGroup::Head), GateState::Ready);
    }

    #[test]
    fn test_admit_respects_lock() {
        let mut rig = Rig::humanoid(0.5, 2.4);
        let gate = ready_gate();
        assert!(gate.admit(BoneGroup::Body, &rig));
        assert!(!gate.admit(BoneGroup::Head, &rig));

        rig.lock(bones::UPPER_LEG_R, 1).unwrap();
        assert!(!gate.admit(BoneGroup::Body, &rig));
    }

    #[test]
    fn test_turn_candidate_window() {
        let gate = GateController::default();
        let c = Point::new(5.0, 0.0);
        // 正面（腰が十分離れている）
        assert_eq!(gate.turn_candidate(c, Point::new(0.0, 0.0), Point::new(10.0, 0.0)), 0);
        // 腰が中心に寄った
        assert_eq!(gate.turn_candidate(c, Point::new(3.0, 0.0), Point::new(7.0, 0.0)), -1);
        // 左右が入れ替わった
        assert_eq!(gate.turn_candidate(c, Point::new(7.0, 0.0), Point::new(3.0, 0.0)), 1);
        // 符号が揃わない
        assert_eq!(gate.turn_candidate(c, Point::new(3.0, 0.0), Point::new(3.0, 0.0)), 0);
    }

    #[test]
    fn test_turn_requires_consecutive_frames() {
        let filter = KeypointFilter::default();
        let rig = Rig::humanoid(0.5, 2.4);
        let mut snap = PoseSnapshot::new();
        let mut gate = ready_gate();

        filter.update(&hips(3.0, 7.0), &mut snap);
        assert_eq!(gate.detect_turn(&snap, &rig), None); // 前フレームの中心なし
        filter.update(&hips(3.0, 7.0), &mut snap);
        assert_eq!(gate.detect_turn(&snap, &rig), None);
        filter.update(&hips(3.0, 7.0), &mut snap);
        assert_eq!(gate.detect_turn(&snap, &rig), None);
        filter.update(&hips(3.0, 7.0), &mut snap);
        assert_eq!(gate.detect_turn(&snap, &rig), Some(-1));
        // 発火後はカウントし直し
        filter.update(&hips(3.0, 7.0), &mut snap);
        assert_eq!(gate.detect_turn(&snap, &rig), None);
    }

    #[test]
    fn test_turn_interrupted_by_sign_change() {
        let filter = KeypointFilter::default();
        let rig = Rig::humanoid(0.5, 2.4);
        let mut snap = PoseSnapshot::new();
        let mut gate = ready_gate();

        let frames = [(3.0, 7.0), (3.0, 7.0), (3.0, 7.0), (0.0, 10.0), (3.0, 7.0), (3.0, 7.0)];
        for (l, r) in frames {
            filter.update(&hips(l, r), &mut snap);
            assert_eq!(gate.detect_turn(&snap, &rig), None);
        }
    }

    #[test]
    fn test_turn_window_uses_stable_center() {
        let filter = KeypointFilter::default();
        let rig = Rig::humanoid(0.5, 2.4);
        let mut snap = PoseSnapshot::new();
        let mut gate = GateController::new(5.0, 1);
        gate.update_body(&snap, true);

        filter.update(&hips(45.0, 55.0), &mut snap);
        assert_eq!(gate.detect_turn(&snap, &rig), None);

        // 生の中心は 50.7 だが 1.0 未満のぶれなので安定値は 50 のまま
        filter.update(&hips(45.8, 55.6), &mut snap);
        assert_eq!(snap.stable(Signal::Center), Some(Point::new(50.0, 0.0)));
        assert_eq!(gate.detect_turn(&snap, &rig), None);

        // 50 基準なら dl = 4.8, dr = 4.9 で窓の中。50.7 基準だと dl = 5.5 で外れる
        filter.update(&hips(45.2, 54.9), &mut snap);
        assert_eq!(gate.detect_turn(&snap, &rig), Some(-1));
    }

    #[test]
    fn test_turn_suppressed_until_ready_and_unlocked() {
        let filter = KeypointFilter::default();
        let mut rig = Rig::humanoid(0.5, 2.4);
        let mut snap = PoseSnapshot::new();

        let mut gate = GateController::default();
        for _ in 0..10 {
            filter.update(&hips(3.0, 7.0), &mut snap);
            assert_eq!(gate.detect_turn(&snap, &rig), None);
        }

        let mut gate = ready_gate();
        rig.lock(bones::BODY, 1).unwrap();
        for _ in 0..10 {
            filter.update(&hips(3.0, 7.0), &mut snap);
            assert_eq!(gate.detect_turn(&snap, &rig), None);
        }
    }
}
