//! Accelerator modules: cameras with an on-board inference unit.
//!
//! The device publishes named output streams. Each stream is a depth-1
//! queue that overwrites: consumers only ever see the most recent packet,
//! so a slow frame loop never accumulates latency.

use super::DetectionSet;
use crate::error::CaptureError;
use crate::frame::VideoFrame;
use flume::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// One item on an output stream.
#[derive(Debug, Clone)]
pub enum Packet {
    Frame(VideoFrame),
    Detections(DetectionSet),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Frames,
    Detections,
}

/// Output streams a plugin expects the device to publish.
#[derive(Debug, Clone, Default)]
pub struct PipelineLayout {
    streams: Vec<(String, StreamKind)>,
}

impl PipelineLayout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stream(mut self, name: &str, kind: StreamKind) -> Self {
        self.streams.push((name.to_string(), kind));
        self
    }

    pub fn streams(&self) -> impl Iterator<Item = (&str, StreamKind)> {
        self.streams.iter().map(|(n, k)| (n.as_str(), *k))
    }
}

/// Producer end of one output stream.
pub struct StreamWriter {
    name: String,
    kind: StreamKind,
    tx: Sender<Packet>,
    // Used to evict the stale packet when the slot is full
    evict: Receiver<Packet>,
}

impl StreamWriter {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Publish `packet`, replacing whatever the consumer has not taken yet.
    /// Returns false once the consumer side is gone.
    pub fn push(&self, mut packet: Packet) -> bool {
        // Our own eviction handle is the last receiver
        if self.tx.receiver_count() <= 1 {
            return false;
        }
        loop {
            match self.tx.try_send(packet) {
                Ok(()) => return true,
                Err(TrySendError::Full(p)) => {
                    let _ = self.evict.try_recv();
                    packet = p;
                }
                Err(TrySendError::Disconnected(_)) => return false,
            }
        }
    }
}

/// Consumer end of one output stream.
#[derive(Clone)]
pub struct OutputQueue {
    name: String,
    rx: Receiver<Packet>,
}

impl OutputQueue {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Latest packet, or `None` if nothing new arrived.
    pub fn try_get(&self) -> Result<Option<Packet>, CaptureError> {
        match self.rx.try_recv() {
            Ok(packet) => Ok(Some(packet)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(CaptureError::Disconnected(self.name.clone())),
        }
    }

    /// Wait up to `timeout` for a packet.
    pub fn get_timeout(&self, timeout: Duration) -> Result<Option<Packet>, CaptureError> {
        match self.rx.recv_timeout(timeout) {
            Ok(packet) => Ok(Some(packet)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(CaptureError::Disconnected(self.name.clone())),
        }
    }
}

/// Transport that feeds the device's output streams.
pub trait AcceleratorLink: Send {
    /// Start producing. The link owns the writers until `stop`.
    fn start(&mut self, writers: Vec<StreamWriter>) -> anyhow::Result<()>;

    fn stop(&mut self);

    /// Size of the frames actually produced, known once started.
    fn frame_size(&self) -> Option<(u32, u32)> {
        None
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AcceleratorTiming {
    /// Bounded wait per poll of a frame stream.
    pub frame_timeout: Duration,
    /// No frame for this long is fatal.
    pub stall_timeout: Duration,
}

impl Default for AcceleratorTiming {
    fn default() -> Self {
        Self {
            frame_timeout: Duration::from_millis(100),
            stall_timeout: Duration::from_secs(5),
        }
    }
}

/// An opened accelerator module.
pub struct AcceleratorDevice {
    serial: String,
    queues: HashMap<String, OutputQueue>,
    link: Box<dyn AcceleratorLink>,
    frame_size: (u32, u32),
    timing: AcceleratorTiming,
    closed: bool,
}

impl AcceleratorDevice {
    /// Create the queues of `layout` and start `link` on them.
    pub fn open(
        serial: &str,
        layout: &PipelineLayout,
        mut link: Box<dyn AcceleratorLink>,
        frame_size: (u32, u32),
        timing: AcceleratorTiming,
    ) -> Result<Self, CaptureError> {
        let mut queues = HashMap::new();
        let mut writers = Vec::new();
        for (name, kind) in layout.streams() {
            let (tx, rx) = flume::bounded(1);
            writers.push(StreamWriter {
                name: name.to_string(),
                kind,
                tx,
                evict: rx.clone(),
            });
            queues.insert(
                name.to_string(),
                OutputQueue {
                    name: name.to_string(),
                    rx,
                },
            );
        }

        link.start(writers).map_err(|e| CaptureError::Open {
            path: serial.to_string(),
            reason: format!("{:#}", e),
        })?;
        let frame_size = link.frame_size().unwrap_or(frame_size);
        info!(
            "Accelerator {} streaming {} output(s) at {}x{}",
            serial,
            queues.len(),
            frame_size.0,
            frame_size.1
        );

        Ok(Self {
            serial: serial.to_string(),
            queues,
            link,
            frame_size,
            timing,
            closed: false,
        })
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn frame_size(&self) -> (u32, u32) {
        self.frame_size
    }

    pub fn timing(&self) -> AcceleratorTiming {
        self.timing
    }

    pub fn output_queue(&self, name: &str) -> Result<OutputQueue, CaptureError> {
        self.queues
            .get(name)
            .cloned()
            .ok_or_else(|| CaptureError::UnknownStream(name.to_string()))
    }

    /// Poll `queue` in bounded steps until a frame arrives.
    ///
    /// Detection packets found on the queue are skipped. Fails with
    /// [`CaptureError::Stalled`] once nothing arrived for the stall timeout.
    pub fn wait_frame(&self, queue: &OutputQueue) -> Result<VideoFrame, CaptureError> {
        let started = Instant::now();
        loop {
            match queue.get_timeout(self.timing.frame_timeout)? {
                Some(Packet::Frame(frame)) => return Ok(frame),
                Some(Packet::Detections(_)) => {}
                None => debug!("No frame on '{}' yet", queue.name()),
            }
            if started.elapsed() >= self.timing.stall_timeout {
                return Err(CaptureError::Stalled(self.serial.clone()));
            }
        }
    }

    /// Stop the link. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.link.stop();
        debug!("Accelerator {} closed", self.serial);
    }
}

impl Drop for AcceleratorDevice {
    fn drop(&mut self) {
        if !self.closed {
            warn!("Accelerator {} dropped without close", self.serial);
            self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;
    use std::sync::{Arc, Mutex};

    /// Link that hands its writers to the test.
    #[derive(Clone, Default)]
    struct ManualLink {
        writers: Arc<Mutex<Vec<StreamWriter>>>,
        stopped: Arc<Mutex<bool>>,
    }

    impl ManualLink {
        fn push(&self, stream: &str, packet: Packet) {
            let writers = self.writers.lock().unwrap();
            let writer = writers.iter().find(|w| w.name() == stream).unwrap();
            assert!(writer.push(packet));
        }
    }

    impl AcceleratorLink for ManualLink {
        fn start(&mut self, writers: Vec<StreamWriter>) -> anyhow::Result<()> {
            *self.writers.lock().unwrap() = writers;
            Ok(())
        }

        fn stop(&mut self) {
            self.writers.lock().unwrap().clear();
            *self.stopped.lock().unwrap() = true;
        }
    }

    fn layout() -> PipelineLayout {
        PipelineLayout::new()
            .stream("rgb", StreamKind::Frames)
            .stream("nn", StreamKind::Detections)
    }

    fn timing(stall_ms: u64) -> AcceleratorTiming {
        AcceleratorTiming {
            frame_timeout: Duration::from_millis(5),
            stall_timeout: Duration::from_millis(stall_ms),
        }
    }

    fn frame(width: u32) -> Packet {
        Packet::Frame(VideoFrame::new(width, 2, PixelFormat::Rgb))
    }

    #[test]
    fn test_queue_keeps_only_latest() {
        let link = ManualLink::default();
        let device = AcceleratorDevice::open("ABC", &layout(), Box::new(link.clone()), (4, 2), timing(50)).unwrap();
        let rgb = device.output_queue("rgb").unwrap();

        link.push("rgb", frame(1));
        link.push("rgb", frame(2));
        link.push("rgb", frame(3));

        match rgb.try_get().unwrap() {
            Some(Packet::Frame(f)) => assert_eq!(f.width, 3),
            other => panic!("unexpected {:?}", other),
        }
        assert!(rgb.try_get().unwrap().is_none());
    }

    #[test]
    fn test_unknown_stream() {
        let device =
            AcceleratorDevice::open("ABC", &layout(), Box::new(ManualLink::default()), (4, 2), timing(50)).unwrap();
        assert!(matches!(
            device.output_queue("depth"),
            Err(CaptureError::UnknownStream(ref s)) if s == "depth"
        ));
    }

    #[test]
    fn test_wait_frame_stalls() {
        let device =
            AcceleratorDevice::open("ABC", &layout(), Box::new(ManualLink::default()), (4, 2), timing(20)).unwrap();
        let rgb = device.output_queue("rgb").unwrap();
        assert!(matches!(device.wait_frame(&rgb), Err(CaptureError::Stalled(ref s)) if s == "ABC"));
    }

    #[test]
    fn test_close_disconnects_queues() {
        let link = ManualLink::default();
        let mut device =
            AcceleratorDevice::open("ABC", &layout(), Box::new(link.clone()), (4, 2), timing(50)).unwrap();
        let nn = device.output_queue("nn").unwrap();
        assert!(nn.try_get().unwrap().is_none());

        device.close();
        device.close();
        assert!(*link.stopped.lock().unwrap());
        assert!(matches!(nn.try_get(), Err(CaptureError::Disconnected(_))));
    }
}
