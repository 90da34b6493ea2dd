use std::collections::HashMap;
use std::f32::consts::TAU;
use std::time::Duration;

use nalgebra::{Unit, Vector3};
use serde::Deserialize;
use tracing::debug;

use super::rig::{Rig, RigApplier, TransitionId};
use super::solver::AxisAngle;
use crate::config::TransitionConfig;
use crate::error::RetargetError;

/// イージング関数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Easing {
    Linear,
    #[default]
    QuadraticOut,
}

impl Easing {
    /// t ∈ [0, 1] → [0, 1]、単調増加
    pub fn apply(self, t: f32) -> f32 {
        let t = t.clamp(0.0, 1.0);
        match self {
            Self::Linear => t,
            Self::QuadraticOut => t * (2.0 - t),
        }
    }
}

/// 1ボーンを所有する回転アニメーション
#[derive(Debug, Clone)]
pub struct Transition {
    id: TransitionId,
    bone: String,
    axis: Unit<Vector3<f32>>,
    target: f32,
    duration: Duration,
    elapsed: Duration,
    easing: Easing,
}

impl Transition {
    pub fn id(&self) -> TransitionId {
        self.id
    }

    pub fn bone(&self) -> &str {
        &self.bone
    }

    /// 経過時間だけで決まる進捗 [0, 1]
    pub fn progress(&self) -> f32 {
        if self.duration.is_zero() {
            return 1.0;
        }
        (self.elapsed.as_secs_f32() / self.duration.as_secs_f32()).min(1.0)
    }

    pub fn angle(&self) -> f32 {
        self.target * self.easing.apply(self.progress())
    }

    pub fn is_finished(&self) -> bool {
        self.elapsed >= self.duration
    }

    fn advance(&mut self, dt: Duration) {
        self.elapsed = self.elapsed.saturating_add(dt);
    }

    fn rotation(&self) -> AxisAngle {
        AxisAngle::new(self.axis, self.angle())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedTransition {
    pub id: TransitionId,
    pub bone: String,
}

/// ボーン名ごとに高々1つのトランジションを保持する
#[derive(Debug, Clone)]
pub struct TransitionRegistry {
    active: HashMap<String, Transition>,
    next_id: TransitionId,
    duration: Duration,
    easing: Easing,
}

impl TransitionRegistry {
    pub fn new(duration: Duration, easing: Easing) -> Self {
        Self {
            active: HashMap::new(),
            next_id: 1,
            duration,
            easing,
        }
    }

    pub fn from_config(config: &TransitionConfig) -> Self {
        Self::new(Duration::from_millis(config.duration_ms), config.easing)
    }

    pub fn is_active(&self, bone: &str) -> bool {
        self.active.contains_key(bone)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn get(&self, bone: &str) -> Option<&Transition> {
        self.active.get(bone)
    }

    /// ボーンをロックしてアニメーションを開始する。実行中なら拒否
    pub fn start(
        &mut self,
        rig: &mut Rig,
        bone: &str,
        axis: Unit<Vector3<f32>>,
        target: f32,
    ) -> Result<TransitionId, RetargetError> {
        if self.active.contains_key(bone) {
            return Err(RetargetError::TransitionActive { bone: bone.to_string() });
        }
        let id = self.next_id;
        rig.lock(bone, id)?;
        self.next_id += 1;

        debug!(bone, id, target, "transition started");
        self.active.insert(
            bone.to_string(),
            Transition {
                id,
                bone: bone.to_string(),
                axis,
                target,
                duration: self.duration,
                elapsed: Duration::ZERO,
                easing: self.easing,
            },
        );
        Ok(id)
    }

    /// Y 軸まわりに sign * 360° 回る
    pub fn start_turn(&mut self, rig: &mut Rig, bone: &str, sign: i32) -> Result<TransitionId, RetargetError> {
        self.start(rig, bone, Vector3::y_axis(), sign.signum() as f32 * TAU)
    }

    /// 全トランジションを dt 進め、完了したものはロックを解除して取り除く
    pub fn tick(
        &mut self,
        dt: Duration,
        applier: &mut RigApplier<'_>,
    ) -> Result<Vec<FinishedTransition>, RetargetError> {
        let mut finished = Vec::new();
        for transition in self.active.values_mut() {
            transition.advance(dt);
            applier.apply_owned(transition.id, &transition.bone, &transition.rotation())?;
            if transition.is_finished() {
                applier.rig_mut().unlock(&transition.bone, transition.id);
                debug!(bone = %transition.bone, id = transition.id, "transition finished");
                finished.push(FinishedTransition {
                    id: transition.id,
                    bone: transition.bone.clone(),
                });
            }
        }
        for done in &finished {
            self.active.remove(&done.bone);
        }
        Ok(finished)
    }
}

impl Default for TransitionRegistry {
    fn default() -> Self {
        Self::from_config(&TransitionConfig::default())
    }
}
