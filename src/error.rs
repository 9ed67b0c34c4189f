//! Error taxonomy shared by device discovery, capture, hotkeys and output.

use std::path::PathBuf;
use thiserror::Error;

/// Fatal misconfiguration. Surfaced before any camera resource is opened.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown device family '{0}', expected 'webcam' or 'accelerator'")]
    UnknownFamily(String),

    #[error("flag name '{0}' is already registered")]
    DuplicateFlagName(String),

    #[error("key combination '{combo}' of flag '{name}' is already bound to flag '{existing}'")]
    DuplicateKeyCombination {
        combo: String,
        name: String,
        existing: String,
    },

    #[error("flags must be registered before the keyboard hook is installed")]
    RegistryLocked,

    #[error("invalid key combination '{0}', expected e.g. '<ctrl>+<alt>+f'")]
    InvalidKeyCombination(String),

    #[error(
        "extra arguments must come in '--name value' pairs, got: {0}"
    )]
    MalformedPluginArguments(String),

    #[error("plugin '{plugin}' requires argument '{argument}'")]
    MissingPluginArgument { plugin: String, argument: String },

    #[error("plugin '{plugin}': {reason}")]
    InvalidPluginArgument { plugin: String, reason: String },

    #[error("unknown plugin '{0}', run with --list-plugins to see the available ones")]
    UnknownPlugin(String),

    #[error("plugin '{plugin}' is meant for the {plugin_family} family but {requested} was requested")]
    FamilyMismatch {
        plugin: String,
        plugin_family: String,
        requested: String,
    },
}

/// Host misconfiguration detected while enumerating video devices.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device path '{0}' does not follow the '/dev/video<n>' naming convention")]
    UnexpectedPath(String),

    #[error("device path '{0}' does not exist")]
    MissingPath(String),

    #[error("failed to query video devices: {0}")]
    Query(#[from] std::io::Error),
}

/// The two enumerations could not be paired without guessing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CorrelationError {
    #[error(
        "virtual device '{label}' refers to camera id {id}, but no physical device with that id exists \
         (was the camera unplugged after the virtual device was created?)"
    )]
    UnmatchedVirtual { label: String, id: u64 },

    #[error("virtual device label '{0}' does not contain a numeric camera id")]
    MissingVirtualId(String),

    #[error("physical device '{physical}' is claimed by both '{first}' and '{second}'")]
    DuplicateVirtual {
        physical: String,
        first: String,
        second: String,
    },
}

/// Failure while opening or reading the physical device.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open camera '{path}': {reason}")]
    Open { path: String, reason: String },

    #[error(
        "image acquisition failed on '{path}': {reason}. \
         Make sure the camera is not in use by another application"
    )]
    Grab { path: String, reason: String },

    #[error("accelerator '{0}' delivered no frame within the stall timeout")]
    Stalled(String),

    #[error("accelerator session must be configured before the first acquisition")]
    NotConfigured,

    #[error("accelerator session is already configured")]
    AlreadyConfigured,

    #[error("configure() is only available on accelerator sessions")]
    NotAccelerator,

    #[error("accelerator pipeline has no output stream named '{0}'")]
    UnknownStream(String),

    #[error("output stream '{0}' is disconnected")]
    Disconnected(String),
}

/// Failure while acquiring the global keyboard hook.
#[derive(Debug, Error)]
pub enum HotkeyError {
    #[error(
        "no keyboard input device is readable; add your user to the 'input' group \
         or list devices under 'keyboards' in the config file"
    )]
    NoKeyboards,

    #[error("failed to open keyboard device {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to start keyboard watcher: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Failure in the virtual camera output.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error(
        "v4l2loopback device '{0}' not found, load the module first \
         (run with --list-devices for the exact command)"
    )]
    MissingDevice(PathBuf),

    #[error("failed to open virtual device '{path}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("frame is {got_width}x{got_height} but the sink was opened for {width}x{height}")]
    GeometryMismatch {
        width: u32,
        height: u32,
        got_width: u32,
        got_height: u32,
    },

    #[error("failed to write to virtual device: {0}")]
    Write(#[source] std::io::Error),
}
