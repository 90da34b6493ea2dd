use std::time::Duration;

use tracing::{trace, warn};

use super::calibration::{CalibrationBaseline, CalibrationEvent, CalibrationTracker};
use super::filter::{KeypointFilter, Point, PoseSnapshot, Signal};
use super::gate::{BoneGroup, GateController};
use super::rig::{bones, BoneCommand, Rig, RigApplier, TransitionId};
use super::solver::{self, AxisAngle, Side};
use super::transition::TransitionRegistry;
use crate::config::Config;
use crate::error::RetargetError;
use crate::pose::{KeypointIndex, Pose};

#[derive(Debug, Clone, PartialEq)]
pub enum RetargetEvent {
    /// 初回キャリブレーション完了（一度だけ）
    Ready,
    Recalibrated(CalibrationBaseline),
    TurnRequested { group: BoneGroup, sign: i32 },
    TransitionStarted { bone: String, id: TransitionId },
    TransitionFinished { bone: String, id: TransitionId },
}

/// 1フレーム分の処理結果
#[derive(Debug, Clone, Default)]
pub struct FrameOutput {
    pub commands: Vec<BoneCommand>,
    pub events: Vec<RetargetEvent>,
}

impl FrameOutput {
    pub fn command(&self, bone: &str) -> Option<&BoneCommand> {
        self.commands.iter().find(|c| c.bone == bone)
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty() && self.events.is_empty()
    }
}

const ARMS: [(Side, KeypointIndex, KeypointIndex, KeypointIndex, &str, &str); 2] = [
    (
        Side::Left,
        KeypointIndex::LeftShoulder,
        KeypointIndex::LeftElbow,
        KeypointIndex::LeftWrist,
        bones::UPPER_ARM_L,
        bones::LOWER_ARM_L,
    ),
    (
        Side::Right,
        KeypointIndex::RightShoulder,
        KeypointIndex::RightElbow,
        KeypointIndex::RightWrist,
        bones::UPPER_ARM_R,
        bones::LOWER_ARM_R,
    ),
];

const LEGS: [(KeypointIndex, KeypointIndex, &str); 2] = [
    (KeypointIndex::LeftHip, KeypointIndex::LeftKnee, bones::UPPER_LEG_L),
    (KeypointIndex::RightHip, KeypointIndex::RightKnee, bones::UPPER_LEG_R),
];

/// リターゲットの全状態。フレームループが所有する
pub struct RetargetContext {
    filter: KeypointFilter,
    snapshot: PoseSnapshot,
    calibration: CalibrationTracker,
    gate: GateController,
    rig: Rig,
    transitions: TransitionRegistry,
    pending: Vec<RetargetEvent>,
    /// 最後に頭部へ書き込んだ鼻・左耳・右耳の安定値
    head_applied: Option<[Point; 3]>,
    frames: u64,
}

impl RetargetContext {
    pub fn new(config: &Config) -> Result<Self, RetargetError> {
        Ok(Self {
            filter: KeypointFilter::from_config(&config.filter),
            snapshot: PoseSnapshot::new(),
            calibration: CalibrationTracker::from_config(&config.calibration),
            gate: GateController::from_config(&config.gesture),
            rig: Rig::from_config(&config.rig)?,
            transitions: TransitionRegistry::from_config(&config.transition),
            pending: Vec::new(),
            head_applied: None,
            frames: 0,
        })
    }

    pub fn snapshot(&self) -> &PoseSnapshot {
        &self.snapshot
    }

    pub fn calibration(&self) -> &CalibrationTracker {
        &self.calibration
    }

    pub fn gate(&self) -> &GateController {
        &self.gate
    }

    pub fn rig(&self) -> &Rig {
        &self.rig
    }

    pub fn transitions(&self) -> &TransitionRegistry {
        &self.transitions
    }

    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    /// 頭部を Y 軸まわりに一回転させる。開始イベントは次フレームの出力に載る
    pub fn request_head_turn(&mut self, sign: i32) -> Result<TransitionId, RetargetError> {
        let id = self.transitions.start_turn(&mut self.rig, bones::HEAD, sign)?;
        self.pending.push(RetargetEvent::TransitionStarted {
            bone: bones::HEAD.to_string(),
            id,
        });
        Ok(id)
    }

    /// 1フレーム処理する。dt は前フレームからの経過時間
    pub fn process_frame(&mut self, pose: &Pose, dt: Duration) -> Result<FrameOutput, RetargetError> {
        self.frames += 1;
        let mut output = FrameOutput {
            commands: Vec::new(),
            events: std::mem::take(&mut self.pending),
        };
        let mut applier = RigApplier::new(&mut self.rig, &mut output.commands);

        // トランジションを先に進め、完了したボーンは同じフレームで駆動に戻す
        for done in self.transitions.tick(dt, &mut applier)? {
            if done.bone == bones::HEAD {
                // 頭部はトランジションの終端姿勢から解き直す
                self.head_applied = None;
            }
            output.events.push(RetargetEvent::TransitionFinished {
                bone: done.bone,
                id: done.id,
            });
        }

        self.filter.update(pose, &mut self.snapshot);

        self.gate.update_head(&self.snapshot);
        if self.gate.admit(BoneGroup::Head, applier.rig()) {
            drive_head(&self.snapshot, &mut self.head_applied, &mut applier)?;
        }

        match self.calibration.update(&self.snapshot) {
            Some(CalibrationEvent::Ready(_)) => output.events.push(RetargetEvent::Ready),
            Some(CalibrationEvent::Recalibrated(b)) => output.events.push(RetargetEvent::Recalibrated(b)),
            None => {}
        }
        self.gate.update_body(&self.snapshot, self.calibration.is_ready());

        if let Some(sign) = self.gate.detect_turn(&self.snapshot, applier.rig()) {
            output.events.push(RetargetEvent::TurnRequested {
                group: BoneGroup::Body,
                sign,
            });
            let bone = BoneGroup::Body.primary_bone();
            match self.transitions.start_turn(applier.rig_mut(), bone, sign) {
                Ok(id) => output.events.push(RetargetEvent::TransitionStarted {
                    bone: bone.to_string(),
                    id,
                }),
                Err(e) => warn!("turn not started: {}", e),
            }
        }

        if self.gate.admit(BoneGroup::Body, applier.rig()) {
            if let Some(baseline) = self.calibration.baseline() {
                drive_body(&self.snapshot, baseline, &mut applier)?;
                drive_arms(&self.snapshot, &mut applier)?;
            }
        }

        Ok(output)
    }
}

/// カスタムリグに存在しないボーンは黙って飛ばす
fn apply_if_present(applier: &mut RigApplier<'_>, bone: &str, rotation: &AxisAngle) -> Result<(), RetargetError> {
    if applier.rig().contains(bone) {
        applier.apply(bone, rotation)?;
    } else {
        trace!(bone, "bone not in rig");
    }
    Ok(())
}

/// 安定値が最後に書き込んだ値から変わったときだけ頭部を解く
fn drive_head(
    snapshot: &PoseSnapshot,
    applied: &mut Option<[Point; 3]>,
    applier: &mut RigApplier<'_>,
) -> Result<(), RetargetError> {
    let (Some(nose), Some(left_ear), Some(right_ear)) = (
        snapshot.stable(Signal::Nose),
        snapshot.stable(Signal::LeftEar),
        snapshot.stable(Signal::RightEar),
    ) else {
        return Ok(());
    };
    let current = [nose, left_ear, right_ear];
    if *applied == Some(current) {
        return Ok(());
    }
    if let Some(q) = solver::head_orientation(nose, left_ear, right_ear) {
        if applier.rig().contains(bones::HEAD) && applier.apply_quaternion(bones::HEAD, q)?.is_some() {
            *applied = Some(current);
        }
    }
    Ok(())
}

fn drive_body(
    snapshot: &PoseSnapshot,
    baseline: &CalibrationBaseline,
    applier: &mut RigApplier<'_>,
) -> Result<(), RetargetError> {
    use KeypointIndex::*;
    let (Some(hip_mid), Some(left_shoulder), Some(right_shoulder)) =
        (snapshot.center(), snapshot.get(LeftShoulder), snapshot.get(RightShoulder))
    else {
        return Ok(());
    };
    let shoulder_mid = (left_shoulder + right_shoulder) / 2.0;
    let bind_hip_width = applier.rig().bind_hip_width();
    let torso = solver::torso_pose(hip_mid, shoulder_mid, baseline, bind_hip_width);

    apply_if_present(applier, bones::BODY, &torso.rotation())?;
    let height = applier.rig().bind_root_height() + torso.vertical_offset;
    applier.set_root_height(height);

    // 腕はバインド * ひねり、脚はひねり * バインドをベースにする
    let twist = AxisAngle::about_z(-torso.lean).to_quaternion();
    let counter_twist = AxisAngle::about_z(torso.lean).to_quaternion();
    let rig = applier.rig_mut();
    for bone in [bones::UPPER_ARM_L, bones::LOWER_ARM_L, bones::UPPER_ARM_R, bones::LOWER_ARM_R] {
        if rig.contains(bone) {
            rig.set_base_twisted(bone, twist)?;
        }
    }
    for bone in [bones::UPPER_LEG_L, bones::UPPER_LEG_R] {
        if rig.contains(bone) {
            rig.set_base_rotated(bone, counter_twist)?;
        }
    }

    for (hip, knee, bone) in LEGS {
        if let (Some(hip), Some(knee)) = (snapshot.get(hip), snapshot.get(knee)) {
            let flex = solver::upper_leg_flex(hip, knee, torso.jump, baseline.leg_length);
            apply_if_present(applier, bone, &solver::upper_leg_rotation(flex))?;
        }
    }
    Ok(())
}

fn drive_arms(snapshot: &PoseSnapshot, applier: &mut RigApplier<'_>) -> Result<(), RetargetError> {
    for (side, shoulder, elbow, wrist, upper_bone, lower_bone) in ARMS {
        let (Some(shoulder), Some(elbow), Some(wrist)) =
            (snapshot.get(shoulder), snapshot.get(elbow), snapshot.get(wrist))
        else {
            continue;
        };
        if let Some(limb) = solver::limb_rotation(side, shoulder, elbow, wrist) {
            apply_if_present(applier, upper_bone, &limb.upper)?;
            apply_if_present(applier, lower_bone, &limb.lower)?;
        }
    }
    Ok(())
}
