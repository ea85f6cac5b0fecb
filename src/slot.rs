//! A single controller slot and its state machine.
//!
//! [`Slot`] is deliberately dumb: it holds state and enforces the
//! invariants of a single slot's transitions, but index validation,
//! password checks, and the connection-mismatch guard are the
//! [`crate::slot_manager::SlotManager`]'s job, since those need data
//! (the password store, the calling connection id) that a slot does not
//! own.

use tokio::time::Instant;

use crate::device::{self, DeviceEvent, VirtualDevice};
use crate::error::PadError;

/// The lifecycle state of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Empty,
    Occupied,
    RecentlyUsed,
}

impl SlotState {
    /// The string tag used in `Serialize()` / admin `pad:status` reports.
    pub fn tag(self) -> &'static str {
        match self {
            SlotState::Empty => "empty",
            SlotState::Occupied => "occupied",
            SlotState::RecentlyUsed => "recently-used",
        }
    }
}

/// One numbered controller slot.
#[derive(Debug)]
pub struct Slot {
    index: usize,
    name: String,
    state: SlotState,
    device: Option<Box<dyn VirtualDevice>>,
    nickname: String,
    connection_id: i64,
    last_used_at: Option<Instant>,
}

impl Slot {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            name: format!("Hawa-VirtualPad-{index}"),
            state: SlotState::Empty,
            device: None,
            nickname: String::new(),
            connection_id: -1,
            last_used_at: None,
        }
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    pub fn connection_id(&self) -> i64 {
        self.connection_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Occupies the slot, creating the device if it was not already
    /// retained from a prior occupation's cooldown.
    pub fn occupy(
        &mut self,
        nickname: String,
        connection_id: i64,
        factory: &dyn crate::device::VirtualDeviceFactory,
    ) -> Result<(), PadError> {
        if self.state == SlotState::Occupied {
            return Err(PadError::PadInUse);
        }
        if self.device.is_none() {
            let device = factory.create(&self.name).map_err(|e| {
                log::error!("[Slot {}] device creation failed: {e:#}", self.index);
                PadError::PadInUse
            })?;
            self.device = Some(device);
        }
        self.state = SlotState::Occupied;
        self.nickname = nickname;
        self.connection_id = connection_id;
        Ok(())
    }

    /// See [`crate::slot_manager::SlotManager::release`] for the full
    /// semantics; this is the per-slot half with the expect-guard already
    /// resolved by the caller.
    pub fn release(&mut self, force: bool, expect: i64, zero: bool) -> Result<(), PadError> {
        if force {
            if self.state == SlotState::Empty {
                return Err(PadError::PadNotInUse);
            }
            if zero {
                if let Some(device) = self.device.as_mut() {
                    let _ = device.emit(&device::zero_frame());
                }
            }
            self.state = SlotState::Empty;
            self.nickname.clear();
            self.connection_id = -1;
            self.last_used_at = None;
            self.device = None;
        } else {
            if self.state != SlotState::Occupied {
                return Err(PadError::PadNotInUse);
            }
            if expect != -1 && expect != self.connection_id {
                // Stale handler; silently ignored.
                return Ok(());
            }
            if zero {
                if let Some(device) = self.device.as_mut() {
                    let _ = device.emit(&device::zero_frame());
                }
            }
            self.state = SlotState::RecentlyUsed;
            self.nickname.clear();
            self.connection_id = -1;
            self.last_used_at = Some(Instant::now());
        }
        Ok(())
    }

    /// Applies an already-assembled batch of low-level events to this
    /// slot's device. Caller must have already validated occupancy and
    /// the connection-id guard.
    pub fn emit(&mut self, events: &[DeviceEvent]) {
        if let Some(device) = self.device.as_mut() {
            if let Err(e) = device.emit(events) {
                log::warn!("[Slot {}] device emit failed: {e:#}", self.index);
            }
        }
    }

    /// Transitions `RECENTLY_USED -> EMPTY` if the cooldown has elapsed.
    /// Returns whether the transition happened.
    pub fn heartbeat(&mut self, cooldown: std::time::Duration) -> bool {
        if self.state == SlotState::RecentlyUsed {
            if let Some(last_used_at) = self.last_used_at {
                if last_used_at.elapsed() > cooldown {
                    self.state = SlotState::Empty;
                    self.last_used_at = None;
                    self.device = None;
                    return true;
                }
            }
        }
        false
    }

    /// `(state_tag, nickname)` per `Serialize()`.
    pub fn serialize(&self) -> (&'static str, String) {
        match self.state {
            SlotState::Occupied => (self.state.tag(), self.nickname.clone()),
            _ => (self.state.tag(), String::new()),
        }
    }
}
