//! MeetingCam: stream a processed camera feed into a v4l2loopback device.
//!
//! Pairs each physical camera with the virtual camera meant to carry its
//! output, then runs a per-frame plugin pipeline whose toggles are driven by
//! global hotkeys.

pub mod capture;
pub mod config;
pub mod device;
pub mod draw;
pub mod error;
pub mod frame;
pub mod frame_loop;
pub mod hotkey;
pub mod ml;
pub mod output;
pub mod plugins;
#[cfg(target_os = "linux")]
pub mod runtime;
pub mod utils;
