use std::time::{Duration, Instant};

/// 一定間隔ごとのフレームレートと処理時間
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsReport {
    pub frames: u32,
    pub fps: f32,
    /// 1フレームあたりの平均処理時間
    pub mean_processing: Duration,
}

/// FPS計測
#[derive(Debug, Clone)]
pub struct FrameStats {
    interval: Duration,
    window_start: Instant,
    frames: u32,
    busy: Duration,
}

impl FrameStats {
    pub fn new(interval: Duration) -> Self {
        Self::starting_at(Instant::now(), interval)
    }

    pub fn starting_at(start: Instant, interval: Duration) -> Self {
        Self {
            interval,
            window_start: start,
            frames: 0,
            busy: Duration::ZERO,
        }
    }

    pub fn record(&mut self, processing: Duration) -> Option<StatsReport> {
        self.record_at(Instant::now(), processing)
    }

    /// 1フレーム分を記録し、間隔を超えたらレポートを返して区間をリセット
    pub fn record_at(&mut self, now: Instant, processing: Duration) -> Option<StatsReport> {
        self.frames += 1;
        self.busy += processing;

        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < self.interval {
            return None;
        }
        let report = StatsReport {
            frames: self.frames,
            fps: self.frames as f32 / elapsed.as_secs_f32(),
            mean_processing: self.busy / self.frames,
        };
        self.window_start = now;
        self.frames = 0;
        self.busy = Duration::ZERO;
        Some(report)
    }
}

impl Default for FrameStats {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}
