use std::collections::HashMap;

use nalgebra::{Quaternion, UnitQuaternion};
use tracing::trace;

use super::solver::AxisAngle;
use crate::config::RigConfig;
use crate::error::RetargetError;

/// 標準ヒューマノイドのボーン名
pub mod bones {
    pub const BODY: &str = "Body";
    pub const HEAD: &str = "Head";
    pub const UPPER_ARM_L: &str = "UpperArmL";
    pub const LOWER_ARM_L: &str = "LowerArmL";
    pub const UPPER_ARM_R: &str = "UpperArmR";
    pub const LOWER_ARM_R: &str = "LowerArmR";
    pub const UPPER_LEG_L: &str = "UpperLegL";
    pub const LOWER_LEG_L: &str = "LowerLegL";
    pub const UPPER_LEG_R: &str = "UpperLegR";
    pub const LOWER_LEG_R: &str = "LowerLegR";
}

pub type TransitionId = u64;

/// ボーンの書き込み権
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoneState {
    /// ポーズ推定で駆動
    #[default]
    Driven,
    /// トランジションが所有中
    Locked(TransitionId),
}

/// (x, y, z, w) 配列からクォータニオン
pub fn quat_from_xyzw(q: [f32; 4]) -> UnitQuaternion<f32> {
    UnitQuaternion::from_quaternion(Quaternion::new(q[3], q[0], q[1], q[2]))
}

pub fn quat_to_xyzw(q: &UnitQuaternion<f32>) -> [f32; 4] {
    let c = q.coords;
    [c.x, c.y, c.z, c.w]
}

#[derive(Debug, Clone)]
pub struct RigBinding {
    pub name: String,
    pub parent: Option<String>,
    /// ロード時に固定されるバインド回転
    pub bind: UnitQuaternion<f32>,
    /// このフレームで回転の起点となる回転
    base: UnitQuaternion<f32>,
    /// 最後に書き込まれた回転
    current: UnitQuaternion<f32>,
    state: BoneState,
}

impl RigBinding {
    fn new(name: &str, parent: Option<&str>, bind: UnitQuaternion<f32>) -> Self {
        Self {
            name: name.to_string(),
            parent: parent.map(str::to_string),
            bind,
            base: bind,
            current: bind,
            state: BoneState::Driven,
        }
    }

    pub fn base(&self) -> UnitQuaternion<f32> {
        self.base
    }

    pub fn current(&self) -> UnitQuaternion<f32> {
        self.current
    }

    pub fn state(&self) -> BoneState {
        self.state
    }
}

/// 1ボーン分の出力
#[derive(Debug, Clone, PartialEq)]
pub struct BoneCommand {
    pub bone: String,
    pub rotation: UnitQuaternion<f32>,
    /// ルートボーンのみ: 縦位置
    pub height: Option<f32>,
}

impl BoneCommand {
    pub fn rotation_xyzw(&self) -> [f32; 4] {
        quat_to_xyzw(&self.rotation)
    }
}

/// 階層リグとボーンごとの状態
#[derive(Debug, Clone)]
pub struct Rig {
    bones: Vec<RigBinding>,
    index: HashMap<String, usize>,
    root: Option<String>,
    bind_hip_width: f32,
    bind_root_height: f32,
}

impl Rig {
    pub fn new(bind_hip_width: f32, bind_root_height: f32) -> Self {
        Self {
            bones: Vec::new(),
            index: HashMap::new(),
            root: None,
            bind_hip_width,
            bind_root_height,
        }
    }

    /// 標準ヒューマノイド。腕はTポーズから下ろした姿勢をバインドとする
    pub fn humanoid(bind_hip_width: f32, bind_root_height: f32) -> Self {
        use bones::*;
        let mut rig = Self::new(bind_hip_width, bind_root_height);
        let identity = [0.0, 0.0, 0.0, 1.0];
        let layout: [(&str, Option<&str>, [f32; 4]); 10] = [
            (BODY, None, identity),
            (HEAD, Some(BODY), [-0.000423, 0.014538, -0.029082, 0.999471]),
            (UPPER_ARM_L, Some(BODY), [0.573094, -0.819174, 0.020943, 0.008867]),
            (LOWER_ARM_L, Some(UPPER_ARM_L), [-0.015990, 0.690546, -0.033121, 0.722353]),
            (UPPER_ARM_R, Some(BODY), [-0.573094, -0.819174, 0.020943, 0.008867]),
            (LOWER_ARM_R, Some(UPPER_ARM_R), [-0.088770, -0.640632, 0.084702, 0.757982]),
            (UPPER_LEG_L, Some(BODY), identity),
            (LOWER_LEG_L, Some(UPPER_LEG_L), identity),
            (UPPER_LEG_R, Some(BODY), identity),
            (LOWER_LEG_R, Some(UPPER_LEG_R), identity),
        ];
        // 親は常に表の前方にあるので検証は不要
        for (name, parent, bind) in layout {
            rig.insert_bone(name, parent, quat_from_xyzw(bind));
        }
        rig
    }

    pub fn from_config(config: &RigConfig) -> Result<Self, RetargetError> {
        if config.bones.is_empty() {
            return Ok(Self::humanoid(config.bind_hip_width, config.bind_root_height));
        }
        let mut rig = Self::new(config.bind_hip_width, config.bind_root_height);
        for bone in &config.bones {
            rig.add_bone(&bone.name, bone.parent.as_deref(), quat_from_xyzw(bone.bind))?;
        }
        Ok(rig)
    }

    /// 親が未登録ならエラー。最初の親なしボーンがルート
    pub fn add_bone(
        &mut self,
        name: &str,
        parent: Option<&str>,
        bind: UnitQuaternion<f32>,
    ) -> Result<(), RetargetError> {
        if let Some(parent) = parent {
            if !self.index.contains_key(parent) {
                return Err(RetargetError::UnknownBone(parent.to_string()));
            }
        }
        self.insert_bone(name, parent, bind);
        Ok(())
    }

    fn insert_bone(&mut self, name: &str, parent: Option<&str>, bind: UnitQuaternion<f32>) {
        if parent.is_none() && self.root.is_none() {
            self.root = Some(name.to_string());
        }
        self.index.insert(name.to_string(), self.bones.len());
        self.bones.push(RigBinding::new(name, parent, bind));
    }

    pub fn bone(&self, name: &str) -> Option<&RigBinding> {
        self.index.get(name).map(|&i| &self.bones[i])
    }

    fn bone_mut(&mut self, name: &str) -> Result<&mut RigBinding, RetargetError> {
        match self.index.get(name) {
            Some(&i) => Ok(&mut self.bones[i]),
            None => Err(RetargetError::UnknownBone(name.to_string())),
        }
    }

    pub fn bones(&self) -> impl Iterator<Item = &RigBinding> {
        self.bones.iter()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn root(&self) -> Option<&str> {
        self.root.as_deref()
    }

    pub fn bind_hip_width(&self) -> f32 {
        self.bind_hip_width
    }

    pub fn bind_root_height(&self) -> f32 {
        self.bind_root_height
    }

    pub fn is_locked(&self, name: &str) -> bool {
        matches!(
            self.bone(name).map(RigBinding::state),
            Some(BoneState::Locked(_))
        )
    }

    pub(crate) fn lock(&mut self, name: &str, id: TransitionId) -> Result<(), RetargetError> {
        let bone = self.bone_mut(name)?;
        if let BoneState::Locked(_) = bone.state {
            return Err(RetargetError::TransitionActive { bone: name.to_string() });
        }
        bone.state = BoneState::Locked(id);
        Ok(())
    }

    /// 所有者の id が一致したときだけ解除
    pub(crate) fn unlock(&mut self, name: &str, id: TransitionId) -> bool {
        match self.bone_mut(name) {
            Ok(bone) if bone.state == BoneState::Locked(id) => {
                bone.state = BoneState::Driven;
                true
            }
            _ => false,
        }
    }

    /// ベース回転 = バインド回転 * twist（胴体のひねりに追従させる）
    pub fn set_base_twisted(&mut self, name: &str, twist: UnitQuaternion<f32>) -> Result<(), RetargetError> {
        let bone = self.bone_mut(name)?;
        bone.base = bone.bind * twist;
        Ok(())
    }

    /// ベース回転 = pre * バインド回転（親空間での回転を先に掛ける）
    pub fn set_base_rotated(&mut self, name: &str, pre: UnitQuaternion<f32>) -> Result<(), RetargetError> {
        let bone = self.bone_mut(name)?;
        bone.base = pre * bone.bind;
        Ok(())
    }

    pub fn reset_base(&mut self, name: &str) -> Result<(), RetargetError> {
        let bone = self.bone_mut(name)?;
        bone.base = bone.bind;
        Ok(())
    }

    fn write(
        &mut self,
        name: &str,
        owner: Option<TransitionId>,
        rotation: UnitQuaternion<f32>,
    ) -> Result<Option<UnitQuaternion<f32>>, RetargetError> {
        let bone = self.bone_mut(name)?;
        match (bone.state, owner) {
            (BoneState::Driven, None) => {}
            (BoneState::Locked(id), Some(owner)) if id == owner => {}
            (state, _) => {
                trace!(bone = name, ?state, "write rejected");
                return Ok(None);
            }
        }
        // 常にベース回転から合成し、前フレームの出力には積まない
        bone.current = rotation * bone.base;
        Ok(Some(bone.current))
    }
}

impl Default for Rig {
    fn default() -> Self {
        Self::from_config(&RigConfig::default()).unwrap_or_else(|_| Self::new(0.5, 2.4))
    }
}

/// リグへの唯一の書き込み口。1フレーム分のコマンドを集める
pub struct RigApplier<'a> {
    rig: &'a mut Rig,
    commands: &'a mut Vec<BoneCommand>,
}

impl<'a> RigApplier<'a> {
    pub fn new(rig: &'a mut Rig, commands: &'a mut Vec<BoneCommand>) -> Self {
        Self { rig, commands }
    }

    pub fn rig(&self) -> &Rig {
        self.rig
    }

    pub fn rig_mut(&mut self) -> &mut Rig {
        self.rig
    }

    /// ポーズ推定由来の回転。ロック中のボーンには書かない
    pub fn apply(&mut self, bone: &str, rotation: &AxisAngle) -> Result<Option<&BoneCommand>, RetargetError> {
        self.apply_quaternion(bone, rotation.to_quaternion())
    }

    pub fn apply_quaternion(
        &mut self,
        bone: &str,
        rotation: UnitQuaternion<f32>,
    ) -> Result<Option<&BoneCommand>, RetargetError> {
        match self.rig.write(bone, None, rotation)? {
            Some(q) => Ok(Some(self.push(bone, q))),
            None => Ok(None),
        }
    }

    /// トランジション由来の回転。ロックの所有者のみ書ける
    pub fn apply_owned(
        &mut self,
        owner: TransitionId,
        bone: &str,
        rotation: &AxisAngle,
    ) -> Result<Option<&BoneCommand>, RetargetError> {
        match self.rig.write(bone, Some(owner), rotation.to_quaternion())? {
            Some(q) => Ok(Some(self.push(bone, q))),
            None => Ok(None),
        }
    }

    /// ルートボーンの縦位置を付ける
    pub fn set_root_height(&mut self, height: f32) {
        let Some(root) = self.rig.root().map(str::to_string) else {
            return;
        };
        if let Some(cmd) = self.commands.iter_mut().find(|c| c.bone == root) {
            cmd.height = Some(height);
            return;
        }
        if let Some(bone) = self.rig.bone(&root) {
            let rotation = bone.current();
            self.commands.push(BoneCommand {
                bone: root,
                rotation,
                height: Some(height),
            });
        }
    }

    fn push(&mut self, bone: &str, rotation: UnitQuaternion<f32>) -> &BoneCommand {
        let pos = match self.commands.iter().position(|c| c.bone == bone) {
            Some(pos) => {
                self.commands[pos].rotation = rotation;
                pos
            }
            None => {
                self.commands.push(BoneCommand {
                    bone: bone.to_string(),
                    rotation,
                    height: None,
                });
                self.commands.len() - 1
            }
        };
        &self.commands[pos]
    }
}
