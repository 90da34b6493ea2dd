//! リターゲットコアのエラー型
//!
//! 欠損キーポイントや退化した幾何は値の置換で回復するためここには現れない。

use thiserror::Error;

/// 呼び出し側へ報告すべき失敗
#[derive(Debug, Error)]
pub enum RetargetError {
    /// 入力デバイス（キーポイント供給元）が開けない
    #[error("device unavailable: {device}: {reason}")]
    DeviceUnavailable {
        /// デバイス名（ファイルパスやリッスンアドレス）
        device: String,
        /// 失敗理由
        reason: String,
    },

    /// 1フレームのキーポイント数が17でない
    #[error("malformed frame: expected {expected} keypoints, got {actual}")]
    MalformedFrame { expected: usize, actual: usize },

    /// リグに存在しないボーン
    #[error("unknown bone: {0}")]
    UnknownBone(String),

    /// 同じボーンに実行中のトランジションがある
    #[error("transition already active on bone {bone}")]
    TransitionActive { bone: String },
}

impl RetargetError {
    pub fn device_unavailable(device: impl Into<String>, reason: impl ToString) -> Self {
        Self::DeviceUnavailable {
            device: device.into(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_unavailable_message() {
        let err = RetargetError::device_unavailable("frames.jsonl", "No such file");
        assert_eq!(
            err.to_string(),
            "device unavailable: frames.jsonl: No such file"
        );
    }

    #[test]
    fn test_malformed_frame_message() {
        let err = RetargetError::MalformedFrame { expected: 17, actual: 3 };
        assert!(err.to_string().contains("expected 17"));
    }
}
