use anyhow::Result;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::osc::OSC_DEFAULT_ADDR;
use crate::retarget::transition::Easing;

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub calibration: CalibrationConfig,
    #[serde(default)]
    pub gesture: GestureConfig,
    #[serde(default)]
    pub transition: TransitionConfig,
    #[serde(default)]
    pub rig: RigConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FilterConfig {
    /// 頭部キーポイント（鼻・目・耳）の信頼度閾値
    #[serde(default = "default_head_confidence")]
    pub head_confidence: f32,
    /// 体幹・四肢キーポイントの信頼度閾値
    #[serde(default = "default_body_confidence")]
    pub body_confidence: f32,
    /// 鼻・耳・肩の除細動距離
    #[serde(default = "default_head_epsilon")]
    pub head_epsilon: f32,
    /// 腰中点の除細動距離
    #[serde(default = "default_center_epsilon")]
    pub center_epsilon: f32,
}

fn default_head_confidence() -> f32 { 0.8 }
fn default_body_confidence() -> f32 { 0.5 }
fn default_head_epsilon() -> f32 { 0.5 }
fn default_center_epsilon() -> f32 { 1.0 }

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            head_confidence: default_head_confidence(),
            body_confidence: default_body_confidence(),
            head_epsilon: default_head_epsilon(),
            center_epsilon: default_center_epsilon(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CalibrationConfig {
    /// 初回キャリブレーションまでの静止フレーム数
    #[serde(default = "default_initial_frames")]
    pub initial_frames: u32,
    /// 再キャリブレーションまでの静止フレーム数
    #[serde(default = "default_recalibration_frames")]
    pub recalibration_frames: u32,
}

fn default_initial_frames() -> u32 { 5 }
fn default_recalibration_frames() -> u32 { 50 }

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            initial_frames: default_initial_frames(),
            recalibration_frames: default_recalibration_frames(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GestureConfig {
    /// 腰-中心間距離がこの範囲内なら回転ジェスチャ候補
    #[serde(default = "default_gesture_window")]
    pub window: f32,
    /// 回転リクエストまでの連続フレーム数
    #[serde(default = "default_turn_frames")]
    pub turn_frames: u32,
}

fn default_gesture_window() -> f32 { 5.0 }
fn default_turn_frames() -> u32 { 3 }

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            window: default_gesture_window(),
            turn_frames: default_turn_frames(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TransitionConfig {
    /// 回転アニメーションの長さ（ミリ秒）
    #[serde(default = "default_duration_ms")]
    pub duration_ms: u64,
    #[serde(default)]
    pub easing: Easing,
}

fn default_duration_ms() -> u64 { 1000 }

impl Default for TransitionConfig {
    fn default() -> Self {
        Self {
            duration_ms: default_duration_ms(),
            easing: Easing::default(),
        }
    }
}

/// リグのバインドポーズ上書き
#[derive(Debug, Deserialize, Clone)]
pub struct BoneConfig {
    pub name: String,
    #[serde(default)]
    pub parent: Option<String>,
    /// バインド回転 (x, y, z, w)
    #[serde(default = "default_bind")]
    pub bind: [f32; 4],
}

fn default_bind() -> [f32; 4] { [0.0, 0.0, 0.0, 1.0] }

#[derive(Debug, Deserialize, Clone)]
pub struct RigConfig {
    /// バインドポーズでの左右股関節間の距離（リグ単位）
    #[serde(default = "default_bind_hip_width")]
    pub bind_hip_width: f32,
    /// バインドポーズでのルートボーンの高さ
    #[serde(default = "default_bind_root_height")]
    pub bind_root_height: f32,
    /// 空なら標準ヒューマノイド
    #[serde(default)]
    pub bones: Vec<BoneConfig>,
}

fn default_bind_hip_width() -> f32 { 0.5 }
fn default_bind_root_height() -> f32 { 2.4 }

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            bind_hip_width: default_bind_hip_width(),
            bind_root_height: default_bind_root_height(),
            bones: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    /// OSC送信先
    #[serde(default = "default_osc_addr")]
    pub osc_addr: String,
}

fn default_osc_addr() -> String { OSC_DEFAULT_ADDR.to_string() }

impl Default for OutputConfig {
    fn default() -> Self {
        Self { osc_addr: default_osc_addr() }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// ポーズ検出器からの接続を待ち受けるアドレス
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

fn default_listen_addr() -> String { "0.0.0.0:9100".to_string() }

impl Default for ServerConfig {
    fn default() -> Self {
        Self { listen_addr: default_listen_addr() }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// 読めなければデフォルト設定
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path.as_ref()) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(
                    "config {} not loaded ({}), using defaults",
                    path.as_ref().display(),
                    e
                );
                Self::default()
            }
        }
    }
}
