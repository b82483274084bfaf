//! Fixed-timestep game loop.
//!
//! Wall-clock time feeds an accumulator that is spent in fixed physics steps
//! of `1 / physics_hz` seconds, so plugin updates always see the same `dt`
//! regardless of frame rate. Each frame:
//!
//! 1. measure the elapsed wall time;
//! 2. unless paused, add it to the accumulator;
//! 3. clamp the accumulator to `max_catch_up_steps` steps, dropping the rest;
//! 4. run one [`PluginLoader::update_physics`] per whole step;
//! 5. unless paused, drain up to `message_budget` queued messages;
//! 6. sleep out the rest of the target frame interval.

use crate::builder::PluginSpec;
use crate::context::Services;
use crate::error::ConfigError;
use crate::loader::PluginLoader;
use crate::messaging::{MessageQueue, DEFAULT_MESSAGE_BUDGET};
use crate::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Tolerance for accumulator comparisons
const STEP_EPSILON: f64 = 1e-9;

/// Timing and budget settings for the loop
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopSettings {
    /// Frame rate cap; `0` disables the cap
    pub target_fps: f64,
    /// Fixed physics update rate
    pub physics_hz: f64,
    /// Messages drained per frame
    pub message_budget: usize,
    /// Accumulator ceiling, in physics steps
    pub max_catch_up_steps: u32,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            target_fps: 60.0,
            physics_hz: 60.0,
            message_budget: DEFAULT_MESSAGE_BUDGET,
            max_catch_up_steps: 5,
        }
    }
}

impl LoopSettings {
    /// Fixed physics step in seconds
    pub fn physics_dt(&self) -> f64 {
        1.0 / self.physics_hz
    }

    /// Target frame duration, `None` when uncapped
    pub fn frame_interval(&self) -> Option<Duration> {
        (self.target_fps > 0.0).then(|| Duration::from_secs_f64(1.0 / self.target_fps))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.physics_hz.is_finite() && self.physics_hz > 0.0) {
            return Err(ConfigError::InvalidSetting {
                field: "physics_hz",
                reason: format!("must be a positive number, got {}", self.physics_hz),
            });
        }
        if !(self.target_fps.is_finite() && self.target_fps >= 0.0) {
            return Err(ConfigError::InvalidSetting {
                field: "target_fps",
                reason: format!("must be zero or positive, got {}", self.target_fps),
            });
        }
        if self.message_budget == 0 {
            return Err(ConfigError::InvalidSetting {
                field: "message_budget",
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.max_catch_up_steps == 0 {
            return Err(ConfigError::InvalidSetting {
                field: "max_catch_up_steps",
                reason: "must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

/// Clonable control surface for a running loop.
///
/// Requests take effect at the next frame boundary (stop) or step boundary
/// (pause), so they are safe to issue from signal handlers, other threads or
/// plugin callbacks.
#[derive(Debug, Clone, Default)]
pub struct LoopHandle {
    running: Arc<AtomicBool>,
    stop_requested: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    resume_requested: Arc<AtomicBool>,
}

impl LoopHandle {
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::SeqCst) {
            self.resume_requested.store(true, Ordering::SeqCst);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }
}

/// What one frame did
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameReport {
    /// Wall time fed into this frame, in seconds
    pub elapsed: f64,
    pub physics_steps: u32,
    pub messages_processed: usize,
    /// The accumulator hit its ceiling and simulated time was dropped
    pub clamped: bool,
    pub paused: bool,
}

#[derive(Debug, Default)]
struct FpsCounter {
    frames: u32,
    window: f64,
    fps: f64,
}

impl FpsCounter {
    fn record(&mut self, elapsed: f64) {
        self.frames += 1;
        self.window += elapsed;
        if self.window >= 1.0 {
            self.fps = f64::from(self.frames) / self.window;
            self.frames = 0;
            self.window = 0.0;
        }
    }
}

/// Drives plugins at a fixed physics rate and drains the message queue
pub struct GameLoop {
    loader: PluginLoader,
    queue: Arc<MessageQueue>,
    settings: LoopSettings,
    handle: LoopHandle,
    accumulator: f64,
    last_frame: Option<Instant>,
    fps: FpsCounter,
    frame_count: u64,
    simulated_time: f64,
}

impl GameLoop {
    /// Take ownership of `loader` and start every plugin it has loaded
    pub fn new(mut loader: PluginLoader, settings: LoopSettings) -> Self {
        loader.start_all();
        let queue = loader.services().message_queue.clone();
        Self {
            loader,
            queue,
            settings,
            handle: LoopHandle::default(),
            accumulator: 0.0,
            last_frame: None,
            fps: FpsCounter::default(),
            frame_count: 0,
            simulated_time: 0.0,
        }
    }

    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    pub fn settings(&self) -> &LoopSettings {
        &self.settings
    }

    pub fn services(&self) -> &Services {
        self.loader.services()
    }

    pub fn loader(&self) -> &PluginLoader {
        &self.loader
    }

    pub fn loader_mut(&mut self) -> &mut PluginLoader {
        &mut self.loader
    }

    /// Load a plugin while the loop exists and put it straight into the update set
    pub fn load_plugin(&mut self, spec: PluginSpec) -> Result<()> {
        let instance_id = spec.instance_id.clone();
        self.loader.load(spec)?;
        self.loader.start(&instance_id)
    }

    /// Seconds of unsimulated time carried to the next frame
    pub fn accumulator(&self) -> f64 {
        self.accumulator
    }

    /// Frames per second over the last full one-second window
    pub fn fps(&self) -> f64 {
        self.fps.fps
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Total simulated seconds
    pub fn simulated_time(&self) -> f64 {
        self.simulated_time
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_running()
    }

    pub fn is_paused(&self) -> bool {
        self.handle.is_paused()
    }

    /// Stop at the next frame boundary
    pub fn stop(&self) {
        self.handle.stop();
    }

    pub fn pause(&self) {
        if !self.handle.is_paused() {
            info!("⏸️ Simulation paused");
        }
        self.handle.pause();
    }

    /// Resume and discard accumulated time. No-op unless paused.
    pub fn resume(&mut self) {
        if self.handle.is_paused() {
            self.handle.resume();
            self.apply_resume();
        }
    }

    fn apply_resume(&mut self) {
        self.handle.resume_requested.store(false, Ordering::SeqCst);
        self.accumulator = 0.0;
        self.last_frame = None;
        info!("▶️ Simulation resumed");
    }

    /// Run one frame using the wall time since the previous frame
    pub fn frame(&mut self) -> FrameReport {
        let now = Instant::now();
        let elapsed = self
            .last_frame
            .map(|previous| now.duration_since(previous).as_secs_f64())
            .unwrap_or(0.0);
        self.last_frame = Some(now);
        self.advance(elapsed)
    }

    /// Run one frame as if `elapsed` seconds of wall time had passed
    pub fn advance(&mut self, elapsed: f64) -> FrameReport {
        if self.handle.resume_requested.load(Ordering::SeqCst) {
            self.apply_resume();
        }

        let elapsed = if elapsed.is_finite() { elapsed.max(0.0) } else { 0.0 };
        self.frame_count += 1;
        self.fps.record(elapsed);

        let mut report = FrameReport {
            elapsed,
            paused: self.handle.is_paused(),
            ..FrameReport::default()
        };
        if report.paused {
            return report;
        }

        let step = self.settings.physics_dt();
        self.accumulator += elapsed;

        let ceiling = step * f64::from(self.settings.max_catch_up_steps);
        if self.accumulator > ceiling + STEP_EPSILON {
            warn!(
                "⚠️ Frame took {:.3}s, dropping {:.3}s of simulated time",
                elapsed,
                self.accumulator - ceiling
            );
            self.accumulator = ceiling;
            report.clamped = true;
        }

        while self.accumulator + STEP_EPSILON >= step {
            if self.handle.is_paused() {
                report.paused = true;
                break;
            }
            self.loader.update_physics(step);
            self.accumulator -= step;
            self.simulated_time += step;
            report.physics_steps += 1;
        }
        if self.accumulator.abs() < STEP_EPSILON {
            self.accumulator = 0.0;
        }

        if !report.paused {
            report.messages_processed = self
                .queue
                .process_with(self.settings.message_budget, &mut self.loader);
        }

        debug!(
            "🎞️ Frame {}: {} step(s), {} message(s)",
            self.frame_count, report.physics_steps, report.messages_processed
        );
        report
    }

    /// Run frames until stopped, capping the frame rate. Returns frames run.
    pub fn run(&mut self) -> u64 {
        self.run_for(None)
    }

    /// Like [`GameLoop::run`] but ends after `max_frames` frames when given
    pub fn run_for(&mut self, max_frames: Option<u64>) -> u64 {
        self.handle.running.store(true, Ordering::SeqCst);
        self.last_frame = None;
        info!(
            "🚀 Game loop started: {} Hz physics, {} fps target",
            self.settings.physics_hz, self.settings.target_fps
        );

        let mut frames = 0u64;
        while !self.handle.is_stop_requested() && max_frames.map_or(true, |max| frames < max) {
            let frame_start = Instant::now();
            self.frame();
            frames += 1;

            if let Some(interval) = self.settings.frame_interval() {
                let spent = frame_start.elapsed();
                if spent < interval {
                    std::thread::sleep(interval - spent);
                }
            }
        }

        self.handle.stop_requested.store(false, Ordering::SeqCst);
        self.handle.running.store(false, Ordering::SeqCst);
        info!(
            "🛑 Game loop stopped after {} frame(s), {:.2}s simulated",
            frames, self.simulated_time
        );
        frames
    }

    /// Unload every plugin in reverse load order
    pub fn shutdown(&mut self) {
        self.handle.stop();
        self.loader.shutdown_all();
    }
}

impl std::fmt::Debug for GameLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameLoop")
            .field("settings", &self.settings)
            .field("accumulator", &self.accumulator)
            .field("frame_count", &self.frame_count)
            .field("paused", &self.handle.is_paused())
            .finish()
    }
}
