//! The kernel-level virtual input device abstraction.
//!
//! A [`VirtualDevice`] is the one truly external collaborator in this
//! system: creating, emitting to, and destroying it are kernel ioctl calls
//! on Linux (via `/dev/uinput`). The trait keeps that behind a narrow seam
//! so the slot manager and its tests never touch uinput directly.
//!
//! The emission algorithm in [`emit_events`] is a direct port of the
//! reference implementation's D-pad-to-axis folding: the four D-pad
//! buttons (10-13) do not emit their own key events, they instead push
//! candidate values into a pending set for `ABS_X`/`ABS_Y`, which is
//! resolved once the whole frame has been processed.

use std::collections::HashSet;

use anyhow::Result;

/// Number of discrete button-like logical inputs (0-9 real buttons, plus
/// the D-pad at 10-13 which fold into axes instead of emitting keys).
pub const N_BUTTONS: usize = 14;
/// Number of absolute axes (`ABS_X`, `ABS_Y`, `ABS_RX`, `ABS_RY`).
pub const N_AXES: usize = 4;

const BTN_UP: u8 = 10;
const BTN_DOWN: u8 = 11;
const BTN_LEFT: u8 = 12;
const BTN_RIGHT: u8 = 13;
const ABS_X: u8 = 14;
const ABS_Y: u8 = 15;

/// Base SCAN event code; button `i` is announced as `SCAN_BASE + i`.
const SCAN_BASE: u32 = 0x90001;

const AXIS_NEUTRAL: u8 = 127;

/// One low-level instruction a [`VirtualDevice`] carries out. Button and
/// axis events are kept atomic per [`VirtualDevice::emit`] call: a single
/// `SYN` is issued once, after every event in the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    /// Set button `index` (0-9) pressed/released, with its paired SCAN
    /// announcement.
    Button { index: u8, pressed: bool },
    /// Set absolute axis `index` (0-3, in `ABS_X, ABS_Y, ABS_RX, ABS_RY`
    /// order) to `value`, already clamped to `[0, 255]`.
    Axis { index: u8, value: u8 },
}

/// Creates, emits to, and destroys a kernel-level virtual input device.
///
/// Implementations must treat `emit` as non-blocking (a kernel ioctl, not
/// a syscall that can stall indefinitely) per the concurrency model: no
/// caller holds a slot-manager lock across anything slower than this.
pub trait VirtualDevice: std::fmt::Debug + Send + Sync {
    /// Applies a batch of low-level events atomically, followed by one
    /// synchronization event. A device error is logged by the caller and
    /// the frame dropped; it must never panic.
    fn emit(&mut self, events: &[DeviceEvent]) -> Result<()>;
}

/// Builds the concrete `VirtualDevice` for this platform under the given
/// stable internal name (`Hawa-VirtualPad-<index>`).
pub trait VirtualDeviceFactory: std::fmt::Debug + Send + Sync {
    /// Creates a new device, already initialized with both axes at their
    /// neutral midpoint per the device-creation default.
    fn create(&self, name: &str) -> Result<Box<dyn VirtualDevice>>;
}

/// Runs the emission algorithm described in the module docs over a batch
/// of `(logical_input, state)` pairs from the wire protocol and returns
/// the low-level [`DeviceEvent`]s to hand to a [`VirtualDevice`].
///
/// `logical_input` is 0-17 per the layout in the external interface:
/// 0-9 plain buttons, 10-13 D-pad (folded into axes), 14-17 explicit axes.
pub fn translate_events(events: &[(u8, u8)]) -> Vec<DeviceEvent> {
    let mut out = Vec::with_capacity(events.len());

    let mut abs_x_forced = false;
    let mut abs_y_forced = false;
    let mut abs_x_changes: Option<HashSet<u8>> = None;
    let mut abs_y_changes: Option<HashSet<u8>> = None;

    for &(logical, state) in events {
        if logical < 10 {
            out.push(DeviceEvent::Button {
                index: logical,
                pressed: state != 0,
            });
        } else if logical < N_BUTTONS as u8 {
            let pressed = state != 0;
            match logical {
                BTN_UP => {
                    abs_y_changes
                        .get_or_insert_with(HashSet::new)
                        .insert(if pressed { 0 } else { AXIS_NEUTRAL });
                }
                BTN_DOWN => {
                    abs_y_changes
                        .get_or_insert_with(HashSet::new)
                        .insert(if pressed { 255 } else { AXIS_NEUTRAL });
                }
                BTN_LEFT => {
                    abs_x_changes
                        .get_or_insert_with(HashSet::new)
                        .insert(if pressed { 0 } else { AXIS_NEUTRAL });
                }
                BTN_RIGHT => {
                    abs_x_changes
                        .get_or_insert_with(HashSet::new)
                        .insert(if pressed { 255 } else { AXIS_NEUTRAL });
                }
                _ => unreachable!("D-pad logical inputs are 10..=13"),
            }
        } else if logical < (N_BUTTONS + N_AXES) as u8 {
            let axis_index = logical - N_BUTTONS as u8;
            let clamped = state.min(255);
            if logical == ABS_X {
                abs_x_forced = true;
            }
            if logical == ABS_Y {
                abs_y_forced = true;
            }
            out.push(DeviceEvent::Axis {
                index: axis_index,
                value: clamped,
            });
        } else {
            // The length byte only bounds the pair *count*; a malformed
            // frame can still carry an out-of-range key. Drop it rather
            // than index past the axis table.
            log::warn!("[device] dropping out-of-range logical input {logical}");
        }
    }

    if !abs_x_forced {
        if let Some(mut changes) = abs_x_changes {
            changes.remove(&AXIS_NEUTRAL);
            let value = resolve_single_or_neutral(changes);
            out.push(DeviceEvent::Axis { index: 0, value });
        }
    }
    if !abs_y_forced {
        if let Some(mut changes) = abs_y_changes {
            changes.remove(&AXIS_NEUTRAL);
            let value = resolve_single_or_neutral(changes);
            out.push(DeviceEvent::Axis { index: 1, value });
        }
    }

    out
}

fn resolve_single_or_neutral(changes: HashSet<u8>) -> u8 {
    if changes.len() == 1 {
        *changes.iter().next().expect("checked len == 1")
    } else {
        AXIS_NEUTRAL
    }
}

/// The neutral frame: every button released, every axis centered. Emitted
/// before a device is destroyed or retained across a graceful release.
pub fn zero_frame() -> Vec<DeviceEvent> {
    let mut out = Vec::with_capacity(N_BUTTONS + N_AXES);
    for index in 0..10u8 {
        out.push(DeviceEvent::Button {
            index,
            pressed: false,
        });
    }
    for index in 0..N_AXES as u8 {
        out.push(DeviceEvent::Axis {
            index,
            value: AXIS_NEUTRAL,
        });
    }
    out
}

/// SCAN event code paired with button `index` (0-9), exposed for
/// backends that need to announce it explicitly alongside the key event.
pub fn scan_code(index: u8) -> u32 {
    SCAN_BASE + u32::from(index)
}

/// In-memory [`VirtualDevice`] used by tests: records every emitted batch
/// instead of touching `/dev/uinput`.
#[derive(Debug, Default)]
pub struct RecordingDevice {
    pub name: String,
    pub history: Vec<Vec<DeviceEvent>>,
}

impl RecordingDevice {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            history: Vec::new(),
        }
    }

    /// The most recent emitted batch, if any.
    pub fn last(&self) -> Option<&[DeviceEvent]> {
        self.history.last().map(Vec::as_slice)
    }
}

impl VirtualDevice for RecordingDevice {
    fn emit(&mut self, events: &[DeviceEvent]) -> Result<()> {
        self.history.push(events.to_vec());
        Ok(())
    }
}

/// Factory producing [`RecordingDevice`]s, for use in tests.
#[derive(Debug, Default)]
pub struct RecordingDeviceFactory;

impl VirtualDeviceFactory for RecordingDeviceFactory {
    fn create(&self, name: &str) -> Result<Box<dyn VirtualDevice>> {
        Ok(Box::new(RecordingDevice::new(name)))
    }
}

#[cfg(target_os = "linux")]
pub use linux::{LinuxDevice, LinuxDeviceFactory};

#[cfg(target_os = "linux")]
mod linux {
    use super::{DeviceEvent, VirtualDevice, VirtualDeviceFactory, AXIS_NEUTRAL};
    use anyhow::{Context, Result};
    use input_linux::{
        AbsoluteAxis, AbsoluteInfo, AbsoluteInfoSetup, EventKind, InputId, Key, UInputHandle,
    };
    use std::fs::File;
    use std::fs::OpenOptions;

    /// Real uinput-backed device. Bus/vendor/product mirror the reference
    /// implementation's deliberately chosen identifiers.
    #[derive(Debug)]
    pub struct LinuxDevice {
        handle: UInputHandle<File>,
    }

    #[derive(Debug, Default)]
    pub struct LinuxDeviceFactory;

    const BUS_VIRTUAL: u16 = 0x06;
    const VENDOR: u16 = 0x2357;
    const PRODUCT: u16 = 0x1;
    const VERSION: u16 = 1;

    fn axis_setup(axis: AbsoluteAxis) -> AbsoluteInfoSetup {
        AbsoluteInfoSetup {
            axis,
            info: AbsoluteInfo {
                value: i32::from(AXIS_NEUTRAL),
                minimum: 0,
                maximum: 255,
                fuzz: 0,
                flat: 15,
                resolution: 0,
            },
        }
    }

    impl VirtualDeviceFactory for LinuxDeviceFactory {
        fn create(&self, name: &str) -> Result<Box<dyn VirtualDevice>> {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .open("/dev/uinput")
                .context("failed to open /dev/uinput")?;
            let handle = UInputHandle::new(file);

            handle
                .set_evbit(EventKind::Key)
                .context("set_evbit(Key)")?;
            for index in 0..10u16 {
                handle
                    .set_keybit(Key::from_code(0x120 + index).unwrap_or(Key::ButtonTrigger))
                    .context("set_keybit")?;
            }
            handle
                .set_evbit(EventKind::Absolute)
                .context("set_evbit(Absolute)")?;
            for axis in [
                AbsoluteAxis::X,
                AbsoluteAxis::Y,
                AbsoluteAxis::RX,
                AbsoluteAxis::RY,
            ] {
                handle.set_absbit(axis).context("set_absbit")?;
            }

            let id = InputId {
                bustype: BUS_VIRTUAL,
                vendor: VENDOR,
                product: PRODUCT,
                version: VERSION,
            };
            let axis_info = [
                axis_setup(AbsoluteAxis::X),
                axis_setup(AbsoluteAxis::Y),
                axis_setup(AbsoluteAxis::RX),
                axis_setup(AbsoluteAxis::RY),
            ];
            handle
                .create(&id, name.as_bytes(), 0, &axis_info)
                .context("uinput create")?;

            Ok(Box::new(LinuxDevice { handle }))
        }
    }

    impl VirtualDevice for LinuxDevice {
        fn emit(&mut self, events: &[DeviceEvent]) -> Result<()> {
            for event in events {
                match *event {
                    DeviceEvent::Button { index, pressed } => {
                        self.handle
                            .write_scancode(
                                super::scan_code(index),
                                Key::from_code(0x120 + u16::from(index))
                                    .unwrap_or(Key::ButtonTrigger),
                                i32::from(pressed),
                            )
                            .context("write button event")?;
                    }
                    DeviceEvent::Axis { index, value } => {
                        let axis = [
                            AbsoluteAxis::X,
                            AbsoluteAxis::Y,
                            AbsoluteAxis::RX,
                            AbsoluteAxis::RY,
                        ][index as usize];
                        self.handle
                            .write_absolute(axis, i32::from(value))
                            .context("write axis event")?;
                    }
                }
            }
            self.handle.synchronize().context("syn")?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_buttons_pair_with_scan_events() {
        let events = translate_events(&[(2, 1)]);
        assert_eq!(
            events,
            vec![DeviceEvent::Button {
                index: 2,
                pressed: true
            }]
        );
    }

    #[test]
    fn explicit_axis_is_clamped() {
        let events = translate_events(&[(14, 255), (15, 0)]);
        assert_eq!(
            events,
            vec![
                DeviceEvent::Axis { index: 0, value: 255 },
                DeviceEvent::Axis { index: 1, value: 0 },
            ]
        );
    }

    #[test]
    fn dpad_right_pressed_folds_into_abs_x() {
        let events = translate_events(&[(13, 1)]);
        assert_eq!(events, vec![DeviceEvent::Axis { index: 0, value: 255 }]);
    }

    #[test]
    fn dpad_released_with_no_other_change_goes_neutral() {
        let events = translate_events(&[(10, 0)]);
        assert_eq!(events, vec![DeviceEvent::Axis { index: 1, value: 127 }]);
    }

    #[test]
    fn explicit_abs_x_suppresses_dpad_x_fold() {
        let events = translate_events(&[(12, 1), (14, 90)]);
        assert_eq!(events, vec![DeviceEvent::Axis { index: 0, value: 90 }]);
    }

    #[test]
    fn conflicting_dpad_directions_resolve_to_neutral() {
        // LEFT pressed (wants 0) and RIGHT pressed (wants 255) in the same
        // frame: after stripping 127, two values remain, so neutral wins.
        let events = translate_events(&[(12, 1), (13, 1)]);
        assert_eq!(events, vec![DeviceEvent::Axis { index: 0, value: 127 }]);
    }

    #[test]
    fn zero_frame_releases_all_buttons_and_centers_axes() {
        let frame = zero_frame();
        assert_eq!(frame.len(), 14);
        assert!(frame[..10]
            .iter()
            .all(|e| matches!(e, DeviceEvent::Button { pressed: false, .. })));
        assert!(frame[10..]
            .iter()
            .all(|e| matches!(e, DeviceEvent::Axis { value: 127, .. })));
    }

    #[test]
    fn out_of_range_logical_input_is_dropped_not_indexed() {
        // The wire length byte only bounds the pair *count*; a malformed
        // frame can still carry a key >= 18. It must be dropped rather
        // than produce an axis index that would panic a real backend.
        let events = translate_events(&[(18, 1), (255, 1), (2, 1)]);
        assert_eq!(
            events,
            vec![DeviceEvent::Button {
                index: 2,
                pressed: true
            }]
        );
    }
}
