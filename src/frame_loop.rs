//! The per-frame acquire, process and publish cycle.
//!
//! The loop owns three scarce resources for its lifetime: the capture
//! session, the virtual sink and the keyboard hook. They are acquired in
//! that order and always released in reverse, whatever ends the run.

use crate::capture::{DetectionSet, FrameSource};
use crate::frame::{PixelFormat, VideoFrame};
use crate::hotkey::{FlagRegistry, FlagSnapshot, BGR2RGB, MIRROR};
use crate::output::FrameSink;
use crate::plugins::Transform;
use crate::utils::FpsCounter;
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Initializing,
    Running,
    Draining,
    Stopped,
}

/// Cooperative stop request, checked between the steps of an iteration.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Cancel on SIGINT/SIGTERM.
    pub fn install_signal_handler(&self) -> Result<()> {
        let token = self.clone();
        ctrlc::set_handler(move || token.cancel()).context("failed to install the interrupt handler")
    }
}

/// How a run ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The cancel token fired
    Cancelled,
}

/// Opens the loop's resources. Implemented by the runtime and by test doubles.
pub trait LoopResources {
    type Source: FrameSource;
    type Sink: FrameSink;
    type Hook;

    fn open_capture(&mut self) -> Result<Self::Source>;

    /// Open the sink for frames of `width` x `height`.
    fn open_sink(&mut self, width: u32, height: u32) -> Result<Self::Sink>;

    /// Lock `registry` and start delivering hotkey toggles.
    fn install_hook(&mut self, registry: &mut FlagRegistry) -> Result<Self::Hook>;
}

pub struct FrameLoop {
    transform: Box<dyn Transform>,
    registry: FlagRegistry,
    cancel: CancelToken,
    state: LoopState,
    fps: FpsCounter,
}

impl FrameLoop {
    /// `registry` must already hold the default and plugin flags.
    pub fn new(transform: Box<dyn Transform>, registry: FlagRegistry, cancel: CancelToken) -> Self {
        Self {
            transform,
            registry,
            cancel,
            state: LoopState::Initializing,
            fps: FpsCounter::new(),
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    fn enter(&mut self, state: LoopState) {
        debug!("Frame loop {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    /// Acquire the resources, run until cancelled or failed, release.
    pub fn run<R: LoopResources>(&mut self, resources: &mut R) -> Result<StopReason> {
        self.enter(LoopState::Initializing);
        // Early returns drop locals in reverse declaration order,
        // which is the required release order.
        let capture = match resources.open_capture() {
            Ok(capture) => capture,
            Err(e) => {
                self.enter(LoopState::Stopped);
                return Err(e);
            }
        };
        let (width, height) = capture.frame_size();
        let sink = match resources.open_sink(width, height) {
            Ok(sink) => sink,
            Err(e) => {
                self.enter(LoopState::Stopped);
                return Err(e);
            }
        };
        let hook = match resources.install_hook(&mut self.registry) {
            Ok(hook) => hook,
            Err(e) => {
                self.enter(LoopState::Stopped);
                return Err(e);
            }
        };

        self.enter(LoopState::Running);
        println!("Device running");
        let mut capture = capture;
        let mut sink = sink;
        let result = self.pump(&mut capture, &mut sink);

        self.enter(LoopState::Draining);
        drop(hook);
        drop(sink);
        drop(capture);
        self.enter(LoopState::Stopped);

        if result.is_ok() {
            println!("Device stopped");
        }
        result
    }

    fn pump<S: FrameSource, K: FrameSink>(&mut self, capture: &mut S, sink: &mut K) -> Result<StopReason> {
        let target = sink.pixel_format();
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            let Some((frame, detections)) = self.settle(capture.acquire())? else {
                break;
            };
            if self.cancel.is_cancelled() {
                break;
            }

            let flags = self.registry.snapshot();
            let processed = self.process_frame(frame, detections.as_ref(), &flags, target);
            let Some(frame) = self.settle(processed)? else {
                break;
            };
            if self.cancel.is_cancelled() {
                break;
            }

            if self.settle(sink.send(&frame))?.is_none() {
                break;
            }
            if let Some(fps) = self.fps.update() {
                debug!("Pipeline FPS: {:.1}", fps);
            }
            sink.wait_next_frame();
        }
        info!("Stop requested, leaving frame loop");
        Ok(StopReason::Cancelled)
    }

    /// `None` when a step failed after the token fired: a blocked read
    /// interrupted by the stop request ends the run normally.
    fn settle<T, E: Into<anyhow::Error>>(&self, step: Result<T, E>) -> Result<Option<T>> {
        match step {
            Ok(value) => Ok(Some(value)),
            Err(e) if self.cancel.is_cancelled() => {
                debug!("Ignoring error raised after stop request: {:#}", e.into());
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Steps 2 to 5 of an iteration: color swap, plugin, mirror, sink format.
    pub fn process_frame(
        &mut self,
        mut frame: VideoFrame,
        detections: Option<&DetectionSet>,
        flags: &FlagSnapshot,
        target: PixelFormat,
    ) -> Result<VideoFrame> {
        if flags.is_on(BGR2RGB) {
            frame.swap_red_blue()?;
        }
        let mut frame = self.transform.process(frame, detections, flags)?;
        if flags.is_on(MIRROR) {
            frame.flip_horizontal()?;
        }
        frame.convert_to(target)
    }
}
