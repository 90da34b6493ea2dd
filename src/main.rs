use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::time::{Duration, Instant};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use mimic_rig::config::Config;
use mimic_rig::error::RetargetError;
use mimic_rig::osc::OscClient;
use mimic_rig::pose::{Keypoint, Pose};
use mimic_rig::retarget::{FrameOutput, RetargetContext, RetargetEvent};
use mimic_rig::stats::FrameStats;

const CONFIG_PATH: &str = "config.toml";

/// JSON lines の1行
#[derive(Debug, Deserialize)]
struct ReplayFrame {
    timestamp_ms: f64,
    keypoints: Vec<Keypoint>,
}

fn print_frame(index: usize, output: &FrameOutput) {
    for event in &output.events {
        match event {
            RetargetEvent::Ready => println!("[{}] ready", index),
            RetargetEvent::Recalibrated(b) => println!(
                "[{}] recalibrated: hip_width={:.2} shoulder_width={:.2} leg_length={:.2}",
                index, b.hip_width, b.shoulder_width, b.leg_length
            ),
            RetargetEvent::TurnRequested { group, sign } => {
                println!("[{}] turn requested: {} {:+}", index, group.as_str(), sign)
            }
            RetargetEvent::TransitionStarted { bone, id } => {
                println!("[{}] transition #{} started on {}", index, id, bone)
            }
            RetargetEvent::TransitionFinished { bone, id } => {
                println!("[{}] transition #{} finished on {}", index, id, bone)
            }
        }
    }
    for cmd in &output.commands {
        let [x, y, z, w] = cmd.rotation_xyzw();
        match cmd.height {
            Some(h) => println!(
                "[{}] {:<10} q=({:.4}, {:.4}, {:.4}, {:.4}) height={:.3}",
                index, cmd.bone, x, y, z, w, h
            ),
            None => println!(
                "[{}] {:<10} q=({:.4}, {:.4}, {:.4}, {:.4})",
                index, cmd.bone, x, y, z, w
            ),
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let Some(path) = args.get(1) else {
        bail!("usage: {} <frames.jsonl> [--osc]", args[0]);
    };
    let send_osc = args.iter().any(|a| a == "--osc");

    let config = Config::load_or_default(CONFIG_PATH);

    println!("=== Mimic Rig - Replay ({}) ===", env!("GIT_VERSION"));
    println!("入力: {}", path);
    if send_osc {
        println!("送信先: {}", config.output.osc_addr);
    }
    println!();

    let file = File::open(path)
        .map_err(|e| RetargetError::device_unavailable(path.as_str(), e))
        .context("failed to open keypoint source")?;
    let osc = if send_osc {
        Some(OscClient::new(&config.output.osc_addr)?)
    } else {
        None
    };

    let mut ctx = RetargetContext::new(&config)?;
    let mut stats = FrameStats::default();
    let mut last_ms: Option<f64> = None;
    let mut frames = 0usize;

    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let frame: ReplayFrame = serde_json::from_str(&line)
            .with_context(|| format!("line {}: invalid frame", line_no + 1))?;
        let pose = match Pose::from_slice(&frame.keypoints) {
            Ok(pose) => pose,
            Err(e) => {
                warn!("line {}: {}", line_no + 1, e);
                continue;
            }
        };

        let dt = match last_ms {
            Some(last) => Duration::try_from_secs_f64(((frame.timestamp_ms - last) / 1000.0).max(0.0))
                .unwrap_or(Duration::ZERO),
            None => Duration::ZERO,
        };
        last_ms = Some(frame.timestamp_ms);

        let started = Instant::now();
        let output = ctx.process_frame(&pose, dt)?;
        if let Some(report) = stats.record(started.elapsed()) {
            println!(
                "FPS: {:.1}, processing: {:.3}ms/frame",
                report.fps,
                report.mean_processing.as_secs_f64() * 1000.0
            );
        }

        print_frame(frames, &output);
        if let Some(osc) = &osc {
            osc.send_frame(&output)?;
        }
        frames += 1;
    }

    println!();
    println!("完了: {} フレーム", frames);
    Ok(())
}
