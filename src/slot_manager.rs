//! Owns the fixed slot array and enforces the state machine and
//! concurrency discipline described in the component design.
//!
//! A single `tokio::sync::Mutex` guards the whole slot array: every
//! public operation here acquires it for its entire duration and never
//! awaits anything slower than the device's (non-blocking) emit while
//! holding it. The password store has its own internal lock (it is
//! reloaded from disk on every check regardless of slot state), so
//! `Occupy` calls into it without holding the slot lock.

use std::time::Duration;

use tokio::sync::Mutex;

use crate::device::{translate_events, VirtualDeviceFactory};
use crate::error::PadError;
use crate::password_store::PasswordStore;
use crate::slot::Slot;

/// Owns every slot and a reference to the password store, behind one
/// mutex over the slot array.
pub struct SlotManager {
    slots: Mutex<Vec<Slot>>,
    slot_count: usize,
    passwords: PasswordStore,
    device_factory: Box<dyn VirtualDeviceFactory>,
    cooldown: Duration,
}

impl std::fmt::Debug for SlotManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotManager")
            .field("slot_count", &self.slot_count)
            .field("cooldown", &self.cooldown)
            .finish_non_exhaustive()
    }
}

impl SlotManager {
    pub fn new(
        slot_count: usize,
        passwords: PasswordStore,
        device_factory: Box<dyn VirtualDeviceFactory>,
        cooldown: Duration,
    ) -> Self {
        let slots = (0..slot_count).map(Slot::new).collect();
        Self {
            slots: Mutex::new(slots),
            slot_count,
            passwords,
            device_factory,
            cooldown,
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    pub fn passwords(&self) -> &PasswordStore {
        &self.passwords
    }

    /// Authenticates `password` against `pad_index` and, if it matches,
    /// occupies the slot for `connection_id` under `nickname`.
    pub async fn occupy(
        &self,
        pad_index: usize,
        nickname: String,
        password: &str,
        connection_id: i64,
    ) -> Result<(), PadError> {
        if pad_index >= self.slot_count {
            return Err(PadError::IndexOutOfRange(pad_index));
        }
        let authenticated = self
            .passwords
            .check(pad_index, password)
            .await
            .unwrap_or(false);
        if !authenticated {
            return Err(PadError::AuthenticationFailed);
        }

        let mut slots = self.slots.lock().await;
        slots[pad_index].occupy(nickname, connection_id, self.device_factory.as_ref())
    }

    /// Releases `pad_index`. See [`crate::slot::Slot::release`] for the
    /// force/expect/zero semantics.
    pub async fn release(
        &self,
        pad_index: usize,
        force: bool,
        expect: i64,
        zero: bool,
    ) -> Result<(), PadError> {
        if pad_index >= self.slot_count {
            return Err(PadError::IndexOutOfRange(pad_index));
        }
        let mut slots = self.slots.lock().await;
        slots[pad_index].release(force, expect, zero)
    }

    /// Force-releases every slot, emitting the neutral frame on each
    /// occupied or retained device first.
    pub async fn release_all(&self) {
        let mut slots = self.slots.lock().await;
        for slot in slots.iter_mut() {
            // A slot already EMPTY yields PadNotInUse, which is expected
            // and ignored here -- release_all is unconditional.
            let _ = slot.release(true, -1, true);
        }
    }

    /// Applies `events` (raw `(logical_input, state)` pairs from the wire
    /// protocol) to `pad_index`'s device, subject to the connection-id
    /// guard.
    pub async fn emit(
        &self,
        pad_index: usize,
        events: &[(u8, u8)],
        expect: i64,
    ) -> Result<(), PadError> {
        if pad_index >= self.slot_count {
            return Err(PadError::IndexOutOfRange(pad_index));
        }
        let mut slots = self.slots.lock().await;
        let slot = &mut slots[pad_index];
        if slot.state() != crate::slot::SlotState::Occupied {
            return Err(PadError::PadNotInUse);
        }
        if expect != -1 && expect != slot.connection_id() {
            return Err(PadError::PadMismatch);
        }
        let translated = translate_events(events);
        slot.emit(&translated);
        Ok(())
    }

    /// Sweeps every slot for cooldown expiry, returning which indices
    /// transitioned `RECENTLY_USED -> EMPTY`.
    pub async fn heartbeat(&self) -> Vec<bool> {
        let mut slots = self.slots.lock().await;
        slots.iter_mut().map(|s| s.heartbeat(self.cooldown)).collect()
    }

    /// `(state_tag, nickname)` for every slot, in index order.
    pub async fn serialize(&self) -> Vec<(&'static str, String)> {
        let slots = self.slots.lock().await;
        slots.iter().map(Slot::serialize).collect()
    }
}
