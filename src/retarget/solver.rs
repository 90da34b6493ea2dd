//! 2D キーポイントから回転を求める純粋関数群
//!
//! 画像座標は Y 下向き。出力はすべて「ボーンの現在のベース回転に合成する」
//! 軸角度で、絶対回転や前フレームからの差分ではない。

use std::f32::consts::{FRAC_PI_2, TAU};

use nalgebra::{Unit, UnitQuaternion, Vector3};

use super::calibration::CalibrationBaseline;
use super::filter::Point;

const EPSILON: f32 = 1e-6;

/// 軸と角度で表した回転
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisAngle {
    pub axis: Unit<Vector3<f32>>,
    pub angle: f32,
}

impl AxisAngle {
    pub fn new(axis: Unit<Vector3<f32>>, angle: f32) -> Self {
        Self { axis, angle }
    }

    pub fn about_x(angle: f32) -> Self {
        Self::new(Vector3::x_axis(), angle)
    }

    pub fn about_y(angle: f32) -> Self {
        Self::new(Vector3::y_axis(), angle)
    }

    pub fn about_z(angle: f32) -> Self {
        Self::new(Vector3::z_axis(), angle)
    }

    pub fn to_quaternion(&self) -> UnitQuaternion<f32> {
        UnitQuaternion::from_axis_angle(&self.axis, self.angle)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Left,
    Right,
}

/// ベクトルの向き [0, 2π)
pub fn vector_angle(v: Point) -> f32 {
    let a = v.y.atan2(v.x);
    if a < 0.0 {
        a + TAU
    } else {
        a
    }
}

/// f32::signum と違い 0 には 0 を返す
fn sign(v: f32) -> f32 {
    if v > 0.0 {
        1.0
    } else if v < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// 上腕・前腕ベクトルの向き
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LimbAngles {
    pub upper: f32,
    pub lower: f32,
}

impl LimbAngles {
    /// 上腕に対する前腕の相対角
    pub fn relative(&self) -> f32 {
        self.lower - self.upper
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LimbRotation {
    pub angles: LimbAngles,
    pub upper: AxisAngle,
    pub lower: AxisAngle,
}

/// 肩→肘→手首から上腕・前腕の回転を求める
///
/// 右側は両ベクトルを反転してから左と同じ式に通す。
/// 上腕の長さが 0 なら None。
pub fn limb_rotation(side: Side, shoulder: Point, elbow: Point, wrist: Point) -> Option<LimbRotation> {
    let (u, l) = match side {
        Side::Left => (elbow - shoulder, wrist - elbow),
        Side::Right => (-(elbow - shoulder), -(wrist - elbow)),
    };

    let r = u.norm();
    if !(r > EPSILON) {
        return None;
    }

    let angles = LimbAngles {
        upper: vector_angle(u),
        lower: vector_angle(l),
    };
    let axis = Unit::new_normalize(Vector3::new(-u.y / r, u.x / r, 1.0));

    Some(LimbRotation {
        angles,
        upper: AxisAngle::new(axis, -angles.upper),
        lower: AxisAngle::about_z(angles.relative()),
    })
}

/// 鼻と両耳から頭部の回転（pitch * yaw）
///
/// 耳が重なる、鼻が耳の線上で半径を超えるなど NaN になる場合は None。
pub fn head_orientation(nose: Point, left_ear: Point, right_ear: Point) -> Option<UnitQuaternion<f32>> {
    // 耳を通る直線 ax + by + c = 0
    let a = right_ear.y - left_ear.y;
    let b = left_ear.x - right_ear.x;
    let c = right_ear.x * left_ear.y - left_ear.x * right_ear.y;
    let norm = (a * a + b * b).sqrt();
    if !(norm > EPSILON) {
        return None;
    }
    let d = (a * nose.x + b * nose.y + c) / norm;

    let half_span = (left_ear - right_ear).norm() / 2.0;
    let mid = (left_ear + right_ear) / 2.0;
    let dd = sign(nose.x - mid.x) * (mid - nose).norm() / 2.0;
    let radius = (dd * dd + half_span * half_span).sqrt();

    let pitch = (d / radius).asin();
    let yaw = (dd / half_span).atan();
    if !pitch.is_finite() || !yaw.is_finite() {
        return None;
    }

    Some(AxisAngle::about_x(pitch).to_quaternion() * AxisAngle::about_y(yaw).to_quaternion())
}

/// 胴体の傾き。腰中点→肩中点が真上（画像座標で -Y）のとき 0
pub fn torso_lean(hip_mid: Point, shoulder_mid: Point) -> f32 {
    vector_angle(hip_mid - shoulder_mid) - FRAC_PI_2
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TorsoPose {
    /// 傾き（ラジアン）。胴体は Z 軸まわりに -lean 回転する
    pub lean: f32,
    /// 基準からの腰中点の縦変位（画像座標、下向き正）
    pub jump: f32,
    /// ルートボーンの縦オフセット（リグ単位、上向き正）
    pub vertical_offset: f32,
}

impl TorsoPose {
    pub fn rotation(&self) -> AxisAngle {
        AxisAngle::about_z(-self.lean)
    }
}

pub fn torso_pose(
    hip_mid: Point,
    shoulder_mid: Point,
    baseline: &CalibrationBaseline,
    bind_hip_width: f32,
) -> TorsoPose {
    let lean = torso_lean(hip_mid, shoulder_mid);
    let jump = hip_mid.y - baseline.reference_center.y;

    // 画像の下向きYをリグの上向きに直し、キャリブレーション時の腰幅でリグ単位へ
    let scaled = if baseline.hip_width.abs() > EPSILON {
        -jump * bind_hip_width / baseline.hip_width
    } else {
        0.0
    };
    // 傾けたことで見かけ上下がった分の補正
    let tilt = lean.tan().abs() * bind_hip_width / 2.0;
    let tilt = if tilt.is_finite() { tilt } else { 0.0 };

    TorsoPose {
        lean,
        jump,
        vertical_offset: scaled + tilt,
    }
}

/// acos の定義域外や NaN は 0
pub fn leg_flex_from_ratio(ratio: f32) -> f32 {
    if (-1.0..=1.0).contains(&ratio) {
        ratio.acos()
    } else {
        0.0
    }
}

/// 太腿の屈曲角
pub fn upper_leg_flex(hip: Point, knee: Point, jump: f32, leg_length: f32) -> f32 {
    if leg_length.abs() <= EPSILON {
        return 0.0;
    }
    leg_flex_from_ratio((knee.y - hip.y + jump) / leg_length)
}

/// 太腿の回転（X 軸まわりに -flex）
pub fn upper_leg_rotation(flex: f32) -> AxisAngle {
    AxisAngle::about_x(-flex)
}
