use anyhow::Result;
use rosc::{encoder, OscMessage, OscPacket, OscType};
use std::net::UdpSocket;

use crate::retarget::{BoneCommand, BoneGroup, FrameOutput, RetargetEvent};

/// 出力先のデフォルトアドレス
pub const OSC_DEFAULT_ADDR: &str = "127.0.0.1:39539";

pub const ADDR_BONE: &str = "/rig/bone";
pub const ADDR_ROOT: &str = "/rig/root";
pub const ADDR_READY: &str = "/rig/ready";
pub const ADDR_TURN: &str = "/rig/turn";

/// ボーン回転
/// 引数: name, qx, qy, qz, qw
pub fn build_bone_message(command: &BoneCommand) -> OscMessage {
    let [x, y, z, w] = command.rotation_xyzw();
    OscMessage {
        addr: ADDR_BONE.to_string(),
        args: vec![
            OscType::String(command.bone.clone()),
            OscType::Float(x),
            OscType::Float(y),
            OscType::Float(z),
            OscType::Float(w),
        ],
    }
}

/// ルートボーンの縦位置（リグ単位）
pub fn build_root_message(height: f32) -> OscMessage {
    OscMessage {
        addr: ADDR_ROOT.to_string(),
        args: vec![OscType::Float(height)],
    }
}

pub fn build_ready_message() -> OscMessage {
    OscMessage {
        addr: ADDR_READY.to_string(),
        args: vec![],
    }
}

/// 回転要求。sign は ±1
pub fn build_turn_message(group: BoneGroup, sign: i32) -> OscMessage {
    OscMessage {
        addr: ADDR_TURN.to_string(),
        args: vec![OscType::String(group.as_str().to_string()), OscType::Int(sign)],
    }
}

/// 1フレーム分の出力をメッセージ列にする。イベントはボーンより先
pub fn build_frame_messages(frame: &FrameOutput) -> Vec<OscMessage> {
    let mut messages = Vec::new();
    for event in &frame.events {
        match event {
            RetargetEvent::Ready => messages.push(build_ready_message()),
            RetargetEvent::TurnRequested { group, sign } => {
                messages.push(build_turn_message(*group, *sign))
            }
            _ => {}
        }
    }
    for command in &frame.commands {
        messages.push(build_bone_message(command));
        if let Some(height) = command.height {
            messages.push(build_root_message(height));
        }
    }
    messages
}

/// OSCメッセージをバイト列にエンコード
pub fn encode_osc_message(msg: &OscMessage) -> Result<Vec<u8>> {
    let packet = OscPacket::Message(msg.clone());
    let encoded = encoder::encode(&packet)?;
    Ok(encoded)
}

/// リグ出力の送信クライアント
pub struct OscClient {
    socket: UdpSocket,
    target_addr: String,
}

impl OscClient {
    pub fn new(target_addr: &str) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        Ok(Self {
            socket,
            target_addr: target_addr.to_string(),
        })
    }

    pub fn target_addr(&self) -> &str {
        &self.target_addr
    }

    pub fn send(&self, msg: &OscMessage) -> Result<()> {
        let data = encode_osc_message(msg)?;
        self.socket.send_to(&data, &self.target_addr)?;
        Ok(())
    }

    /// フレームの全コマンドとイベントを送信し、送ったパケット数を返す
    pub fn send_frame(&self, frame: &FrameOutput) -> Result<usize> {
        let messages = build_frame_messages(frame);
        for msg in &messages {
            self.send(msg)?;
        }
        Ok(messages.len())
    }
}
