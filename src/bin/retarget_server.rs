//! Retarget server: receives keypoint frames over TCP, runs the retarget
//! engine, and sends bone commands via OSC.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use mimic_rig::config::Config;
use mimic_rig::error::RetargetError;
use mimic_rig::osc::OscClient;
use mimic_rig::protocol::{self, ClientMessage, MessageStream, ServerMessage};
use mimic_rig::retarget::{FrameOutput, RetargetContext, RetargetEvent};
use mimic_rig::stats::FrameStats;

const CONFIG_PATH: &str = "config.toml";

/// 接続ごとの終了理由
enum SessionEnd {
    Disconnected,
    Stop,
}

/// 出力イベントのうちクライアントへ返すもの
fn server_messages(output: &FrameOutput) -> Vec<ServerMessage> {
    output
        .events
        .iter()
        .filter_map(|event| match event {
            RetargetEvent::Ready => Some(ServerMessage::Ready),
            RetargetEvent::TurnRequested { sign, .. } => Some(ServerMessage::TurnRequested { sign: *sign }),
            _ => None,
        })
        .collect()
}

/// タイムスタンプ差分。初回や逆行は 0
fn frame_delta(last: Option<u64>, now_us: u64) -> Duration {
    match last {
        Some(last) => Duration::from_micros(now_us.saturating_sub(last)),
        None => Duration::ZERO,
    }
}

async fn run_session(
    stream: &mut MessageStream,
    ctx: &mut RetargetContext,
    osc: &OscClient,
) -> Result<SessionEnd> {
    let mut last_timestamp: Option<u64> = None;
    let mut stats = FrameStats::default();

    loop {
        let msg: ClientMessage = match protocol::recv_message(stream).await {
            Ok(msg) => msg,
            Err(e) => {
                debug!("receive ended: {}", e);
                return Ok(SessionEnd::Disconnected);
            }
        };

        match msg {
            ClientMessage::Keypoints { timestamp_us, keypoints } => {
                let pose = match ClientMessage::to_pose(&keypoints) {
                    Ok(pose) => pose,
                    Err(e) => {
                        warn!("frame dropped: {}", e);
                        continue;
                    }
                };
                let dt = frame_delta(last_timestamp, timestamp_us);
                last_timestamp = Some(timestamp_us);

                let started = Instant::now();
                let output = ctx.process_frame(&pose, dt)?;
                if let Err(e) = osc.send_frame(&output) {
                    warn!("OSC send failed: {}", e);
                }
                if let Some(report) = stats.record(started.elapsed()) {
                    info!(
                        fps = report.fps,
                        mean_ms = report.mean_processing.as_secs_f32() * 1000.0,
                        "frame stats"
                    );
                }

                for reply in server_messages(&output) {
                    protocol::send_message(stream, &reply).await?;
                }
                protocol::send_message(stream, &ServerMessage::Ack { frame: ctx.frame_count() }).await?;
            }
            ClientMessage::RequestHeadTurn { sign } => match ctx.request_head_turn(sign) {
                Ok(id) => info!(sign, id, "head turn started"),
                Err(e) => warn!("head turn rejected: {}", e),
            },
            ClientMessage::Stop => return Ok(SessionEnd::Stop),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::load_or_default(CONFIG_PATH);

    println!("=== Mimic Rig - Retarget Server ({}) ===", env!("GIT_VERSION"));
    println!("Listen: {}", config.server.listen_addr);
    println!("OSC target: {}", config.output.osc_addr);
    println!();

    let osc = OscClient::new(&config.output.osc_addr)?;
    let mut ctx = RetargetContext::new(&config)?;

    let listener = TcpListener::bind(&config.server.listen_addr)
        .await
        .map_err(|e| RetargetError::device_unavailable(&config.server.listen_addr, e))
        .context("failed to open keypoint source")?;
    info!("listening on {}", config.server.listen_addr);

    loop {
        let (tcp_stream, addr): (TcpStream, _) = listener.accept().await?;
        tcp_stream.set_nodelay(true)?;
        info!("client connected: {}", addr);

        let mut stream = protocol::message_stream(tcp_stream);
        match run_session(&mut stream, &mut ctx, &osc).await {
            Ok(SessionEnd::Stop) => {
                info!("stop requested, shutting down");
                return Ok(());
            }
            Ok(SessionEnd::Disconnected) => info!("client disconnected, waiting for next connection..."),
            Err(e) => warn!("session error: {:#}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_delta() {
        assert_eq!(frame_delta(None, 1_000), Duration::ZERO);
        assert_eq!(frame_delta(Some(1_000), 34_000), Duration::from_micros(33_000));
        assert_eq!(frame_delta(Some(5_000), 1_000), Duration::ZERO);
    }

    #[test]
    fn test_server_messages_filter_events() {
        let output = FrameOutput {
            commands: vec![],
            events: vec![
                RetargetEvent::Ready,
                RetargetEvent::TransitionStarted {
                    bone: "Body".to_string(),
                    id: 1,
                },
                RetargetEvent::TurnRequested {
                    group: mimic_rig::retarget::BoneGroup::Body,
                    sign: 1,
                },
            ],
        };
        assert_eq!(
            server_messages(&output),
            vec![ServerMessage::Ready, ServerMessage::TurnRequested { sign: 1 }]
        );
    }
}
