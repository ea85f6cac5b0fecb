//! The `Notifier` seam between the pad/admin protocol engines and the
//! broadcast fan-out.
//!
//! Per the design notes, a handler needs to publish back to the
//! broadcast, and the source's cyclic handler/server back-references are
//! avoided by giving each protocol engine only a narrow trait reference
//! rather than a reference to the whole `BroadcastServer`.

use serde_json::Value;

/// Publishes a single notification frame to every connected observer.
pub trait Notifier: std::fmt::Debug + Send + Sync {
    fn publish(&self, notification: Value);
}

/// Builds the `{"type":"notification", ...}` envelope used on the wire.
pub fn notification(command: &str, fields: Value) -> Value {
    let mut obj = serde_json::json!({
        "type": "notification",
        "command": command,
    });
    if let (Some(map), Some(extra)) = (obj.as_object_mut(), fields.as_object()) {
        for (k, v) in extra {
            map.insert(k.clone(), v.clone());
        }
    }
    obj
}
