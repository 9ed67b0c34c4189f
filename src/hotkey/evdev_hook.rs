//! Global keyboard hook reading evdev keyboards.
//!
//! Works below the display server, so chords fire whichever window has focus.

use super::{Binding, ChordMatcher, FlagRegistry, KeyInput, Modifier};
use crate::error::HotkeyError;
use evdev::{Device, InputEventKind, Key};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// How long a watcher blocks in poll() before re-checking the stop flag.
const POLL_INTERVAL_MS: libc::c_int = 200;

const CHAR_KEYS: [(Key, char); 36] = [
    (Key::KEY_A, 'a'),
    (Key::KEY_B, 'b'),
    (Key::KEY_C, 'c'),
    (Key::KEY_D, 'd'),
    (Key::KEY_E, 'e'),
    (Key::KEY_F, 'f'),
    (Key::KEY_G, 'g'),
    (Key::KEY_H, 'h'),
    (Key::KEY_I, 'i'),
    (Key::KEY_J, 'j'),
    (Key::KEY_K, 'k'),
    (Key::KEY_L, 'l'),
    (Key::KEY_M, 'm'),
    (Key::KEY_N, 'n'),
    (Key::KEY_O, 'o'),
    (Key::KEY_P, 'p'),
    (Key::KEY_Q, 'q'),
    (Key::KEY_R, 'r'),
    (Key::KEY_S, 's'),
    (Key::KEY_T, 't'),
    (Key::KEY_U, 'u'),
    (Key::KEY_V, 'v'),
    (Key::KEY_W, 'w'),
    (Key::KEY_X, 'x'),
    (Key::KEY_Y, 'y'),
    (Key::KEY_Z, 'z'),
    (Key::KEY_0, '0'),
    (Key::KEY_1, '1'),
    (Key::KEY_2, '2'),
    (Key::KEY_3, '3'),
    (Key::KEY_4, '4'),
    (Key::KEY_5, '5'),
    (Key::KEY_6, '6'),
    (Key::KEY_7, '7'),
    (Key::KEY_8, '8'),
    (Key::KEY_9, '9'),
];

const MODIFIER_KEYS: [(Key, Modifier); 8] = [
    (Key::KEY_LEFTCTRL, Modifier::Ctrl),
    (Key::KEY_RIGHTCTRL, Modifier::Ctrl),
    (Key::KEY_LEFTALT, Modifier::Alt),
    (Key::KEY_RIGHTALT, Modifier::Alt),
    (Key::KEY_LEFTSHIFT, Modifier::Shift),
    (Key::KEY_RIGHTSHIFT, Modifier::Shift),
    (Key::KEY_LEFTMETA, Modifier::Meta),
    (Key::KEY_RIGHTMETA, Modifier::Meta),
];

fn key_input(key: Key) -> KeyInput {
    if let Some((_, m)) = MODIFIER_KEYS.iter().find(|(k, _)| *k == key) {
        return KeyInput::Modifier(*m);
    }
    if let Some((_, c)) = CHAR_KEYS.iter().find(|(k, _)| *k == key) {
        return KeyInput::Char(*c);
    }
    KeyInput::Other
}

fn is_keyboard(device: &Device) -> bool {
    device
        .supported_keys()
        .map(|keys| keys.contains(Key::KEY_A) && keys.contains(Key::KEY_LEFTCTRL))
        .unwrap_or(false)
}

/// Installed hook. Dropping it stops and joins every watcher thread.
pub struct KeyboardHook {
    stop: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl KeyboardHook {
    /// Lock `registry` and start watching `keyboards` (all keyboards if empty).
    pub fn install(registry: &mut FlagRegistry, keyboards: &[PathBuf]) -> Result<Self, HotkeyError> {
        let devices = open_keyboards(keyboards)?;
        let bindings: Arc<[Binding]> = registry.lock().into();
        let stop = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(devices.len());
        for (path, device) in devices {
            let bindings = bindings.clone();
            let stop = stop.clone();
            let name = format!("hotkey-{}", path.display());
            let handle = thread::Builder::new()
                .name(name)
                .spawn(move || watch(path, device, &bindings, &stop))
                .map_err(HotkeyError::Spawn)?;
            workers.push(handle);
        }

        info!("Keyboard hook installed on {} device(s)", workers.len());
        for binding in bindings.iter() {
            info!("  {:<16} {} (currently {})", binding.chord.to_string(), binding.flag.description, binding.get());
        }
        Ok(Self { stop, workers })
    }
}

impl Drop for KeyboardHook {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("Keyboard watcher thread panicked");
            }
        }
        debug!("Keyboard hook released");
    }
}

fn open_keyboards(paths: &[PathBuf]) -> Result<Vec<(PathBuf, Device)>, HotkeyError> {
    let devices: Vec<(PathBuf, Device)> = if paths.is_empty() {
        evdev::enumerate().filter(|(_, d)| is_keyboard(d)).collect()
    } else {
        paths
            .iter()
            .map(|path| {
                Device::open(path)
                    .map(|d| (path.clone(), d))
                    .map_err(|source| HotkeyError::Open {
                        path: path.clone(),
                        source,
                    })
            })
            .collect::<Result<_, _>>()?
    };

    if devices.is_empty() {
        return Err(HotkeyError::NoKeyboards);
    }
    for (path, device) in &devices {
        debug!("Watching keyboard {:?} ({})", path, device.name().unwrap_or("unnamed"));
    }
    Ok(devices)
}

/// Watcher loop. Only flips flags; never touches frame data.
fn watch(path: PathBuf, mut device: Device, bindings: &[Binding], stop: &AtomicBool) {
    let fd = device.as_raw_fd();
    let mut matcher = ChordMatcher::default();

    while !stop.load(Ordering::Relaxed) {
        let mut pfd = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };
        // SAFETY: pfd is a valid pollfd for the duration of the call and fd
        // stays open because `device` outlives the loop.
        let ready = unsafe { libc::poll(&mut pfd, 1, POLL_INTERVAL_MS) };
        if ready < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            warn!("Keyboard {:?}: poll failed: {}", path, err);
            return;
        }
        if ready == 0 {
            continue;
        }

        let events = match device.fetch_events() {
            Ok(events) => events,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) => {
                warn!("Keyboard {:?} stopped delivering events: {}", path, e);
                return;
            }
        };
        for event in events {
            let InputEventKind::Key(key) = event.kind() else {
                continue;
            };
            let input = key_input(key);
            match event.value() {
                1 => {
                    if let Some(chord) = matcher.press(input) {
                        for binding in bindings.iter().filter(|b| b.chord == chord) {
                            binding.toggle();
                        }
                    }
                }
                0 => matcher.release(input),
                // Auto-repeat
                _ => {}
            }
        }
    }
}
