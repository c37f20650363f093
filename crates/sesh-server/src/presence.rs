//! Device presence records published for other services.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use sesh_core::{GroupId, SessionId};

use crate::stores::Result;

/// Key under which a device's presence hash lives.
pub fn presence_key(mac: &str) -> String {
    format!("devices/{mac}/presence")
}

/// Where a device is currently connected.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DevicePresence {
    /// Session reporting the device.
    pub session_id: SessionId,
    /// Linked user, if any.
    pub user_id: Option<String>,
    /// Group the session is in.
    pub group_id: GroupId,
    /// Session away flag.
    pub away: bool,
    /// Session mobile flag.
    pub mobile: bool,
    /// Join time, milliseconds since the epoch.
    pub joined: Option<i64>,
}

impl DevicePresence {
    /// Flattened `(field, value)` pairs for hash storage. Absent fields are
    /// omitted.
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("session_id", self.session_id.to_string()),
            ("group_id", self.group_id.to_string()),
            ("away", self.away.to_string()),
            ("mobile", self.mobile.to_string()),
        ];
        if let Some(user_id) = &self.user_id {
            fields.push(("user_id", user_id.clone()));
        }
        if let Some(joined) = self.joined {
            fields.push(("joined", joined.to_string()));
        }
        fields
    }
}

/// Sink for device presence.
#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Record presence for `mac`.
    async fn set(&self, mac: &str, presence: &DevicePresence) -> Result<()>;
    /// Forget presence for `mac`.
    async fn clear(&self, mac: &str) -> Result<()>;
}

/// Process-local presence store.
#[derive(Default)]
pub struct MemoryPresenceStore {
    entries: Mutex<HashMap<String, DevicePresence>>,
}

impl MemoryPresenceStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current presence for `mac`.
    pub fn get(&self, mac: &str) -> Option<DevicePresence> {
        self.entries.lock().get(&presence_key(mac)).cloned()
    }
}

#[async_trait]
impl PresenceStore for MemoryPresenceStore {
    async fn set(&self, mac: &str, presence: &DevicePresence) -> Result<()> {
        let _ = self.entries.lock().insert(presence_key(mac), presence.clone());
        Ok(())
    }

    async fn clear(&self, mac: &str) -> Result<()> {
        let _ = self.entries.lock().remove(&presence_key(mac));
        Ok(())
    }
}
